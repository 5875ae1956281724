//! Schema module - Archive records, fitness values and configuration types.

mod candidate;
mod config;
mod fitness;
mod seed;

pub use candidate::*;
pub use config::*;
pub use fitness::*;
pub use seed::*;
