//! Quality-diversity search over agent architectures.
//!
//! # Overview
//!
//! - **Archive** (`archive`): the persistent, append-only candidate list
//! - **Scorer** (`fitness`): bootstrap confidence intervals over outcomes
//! - **MAP-Elites** (`map_elites`): the (performance, cost) elite grid used to pick seeds
//! - **Proposer** (`proposer`): the propose/reflect/debug conversation
//! - **Search loop** (`search`): generations, commits and the thorough pass
//!
//! # Example
//!
//! ```rust,no_run
//! use agent_search::engine::dataset::{TaskSet, load_examples, scorer_for};
//! use agent_search::engine::evolution::{DefaultPrompts, Proposer, SearchLoop};
//! use agent_search::engine::harness::EvaluationHarness;
//! use agent_search::engine::llm::{Backoff, CommandModel, RetryingModel};
//! use agent_search::engine::script::ScriptLoader;
//! use agent_search::schema::SearchConfig;
//!
//! let config = SearchConfig::default();
//! let command = vec!["./llm-adapter".to_string()];
//! let model = CommandModel::from_command(&command).unwrap();
//!
//! let examples = load_examples("mgsm.jsonl").unwrap();
//! let harness = EvaluationHarness::new(
//!     TaskSet::new(examples, &config.dataset),
//!     Box::new(ScriptLoader),
//!     scorer_for(config.evaluation.answer_match),
//!     Box::new(RetryingModel::new(model.clone(), Backoff::default())),
//!     config.evaluation.clone(),
//! );
//! let proposer = Proposer::new(Box::new(model), config.generation.proposer_temperature);
//!
//! let mut search = SearchLoop::new(config, harness, proposer, Box::new(DefaultPrompts)).unwrap();
//! let summary = search
//!     .run_with_callback(|progress| {
//!         println!("Generation {}: best = {:?}", progress.generation, progress.best_performance);
//!     })
//!     .unwrap();
//! println!("Committed {} candidates", summary.committed);
//! ```

mod archive;
mod fitness;
mod map_elites;
mod proposer;
mod search;

pub use archive::{Archive, ArchiveError};
pub use fitness::{BootstrapScorer, ScoreError};
pub use map_elites::{CellKey, EliteMap, ParseCellKeyError, dominates};
pub use proposer::{DefaultPrompts, PromptTemplates, Proposal, ProposalError, Proposer, Transcript};
pub use search::{
    GenerationOutcome, GenerationPhase, SearchError, SearchLoop, SearchProgress, SearchSummary,
    ThoroughSummary,
};
