//! Engine module - Inference, candidate logic, evaluation and search.

pub mod dataset;
pub mod evolution;
pub mod harness;
pub mod llm;
pub mod script;
pub mod strategy;

pub use dataset::{AnswerScorer, TaskSet};
pub use harness::{EvaluationHarness, EvaluationReport, HarnessError, MalformedCandidate};
pub use llm::{CommandModel, LanguageModel, LlmAgent, LlmError, RetryingModel};
pub use script::ScriptLoader;
pub use strategy::{AgentContext, Answer, EvaluationMode, Strategy, StrategyError, StrategyLoader};
