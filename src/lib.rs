//! Agent Search - Quality-diversity search over LLM agent architectures.
//!
//! An agent architecture is a small program that solves benchmark tasks by
//! calling a language model. This crate searches for good ones: a proposer
//! model writes new candidates, each candidate is run against a validation
//! window of the benchmark, scored with a bootstrap confidence interval and
//! archived. A MAP-Elites grid over (accuracy, API calls) picks the elite
//! that seeds the next proposal.
//!
//! # Architecture
//!
//! The crate is split into two main modules:
//!
//! - `schema`: Archive records, fitness values, configuration and the seed set
//! - `engine`: Inference, candidate scripts, the evaluation harness and the search loop
//!
//! # Example
//!
//! ```rust,no_run
//! use agent_search::engine::{EvaluationMode, ScriptLoader, StrategyLoader};
//! use agent_search::schema::{Fitness, initial_archive};
//!
//! // Every seed candidate compiles to a single callable agent.
//! for candidate in initial_archive() {
//!     let symbols = ScriptLoader.load(&candidate.code).unwrap();
//!     assert_eq!(symbols.len(), 1);
//! }
//!
//! // Fitness strings carry the upper interval bound used for ranking.
//! let fitness = Fitness::parse("62.50% (55.00%, 70.00%)").unwrap();
//! assert_eq!(fitness.performance(), 70.0);
//! let _ = EvaluationMode::Search;
//! ```

pub mod engine;
pub mod schema;

// Re-export commonly used types
pub use engine::evolution::{Archive, SearchLoop};
pub use schema::{Candidate, Fitness, SearchConfig};
