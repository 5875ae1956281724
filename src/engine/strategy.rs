//! The capability boundary between the engine and candidate logic.
//!
//! A candidate's `code` is turned into symbols by a [`StrategyLoader`]; the
//! harness accepts a load only if it yields exactly one callable symbol,
//! which is then used as the candidate's [`Strategy`].

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::schema::Info;

use super::llm::{ChatRequest, JsonObject, LanguageModel, LlmError};

/// Which dataset window a run uses, and how strict the call protocol is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EvaluationMode {
    /// Validation window; context overflows are fatal.
    Search,
    /// Held-out test window.
    Thorough,
}

/// Everything candidate logic may touch while solving one task.
pub struct AgentContext<'a> {
    model: &'a dyn LanguageModel,
    mode: EvaluationMode,
    calls: &'a AtomicU64,
}

impl<'a> AgentContext<'a> {
    pub fn new(model: &'a dyn LanguageModel, mode: EvaluationMode, calls: &'a AtomicU64) -> Self {
        Self { model, mode, calls }
    }

    pub fn mode(&self) -> EvaluationMode {
        self.mode
    }

    /// Call the model, counting the call toward the run's cost.
    pub fn complete(&self, request: &ChatRequest) -> Result<JsonObject, LlmError> {
        self.calls.fetch_add(1, Ordering::Relaxed);
        self.model.complete(request)
    }
}

/// What a strategy hands back for a task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Answer {
    Info(Info),
    Text(String),
}

impl Answer {
    /// The text compared against the target.
    pub fn content(&self) -> &str {
        match self {
            Self::Info(info) => &info.content,
            Self::Text(text) => text,
        }
    }
}

/// Failures raised by candidate logic while solving a task.
#[derive(Debug, thiserror::Error)]
pub enum StrategyError {
    #[error("The context is too long. Please try to design the agent to have shorter context.")]
    ContextTooLong,
    #[error("Agent produced no answer")]
    NoAnswer,
    #[error("{0}")]
    Failed(String),
}

/// One task in, one answer out.
pub trait Strategy: Send + Sync {
    fn forward(&self, task: &Info, ctx: &AgentContext<'_>) -> Result<Answer, StrategyError>;
}

impl<F> Strategy for F
where
    F: Fn(&Info, &AgentContext<'_>) -> Result<Answer, StrategyError> + Send + Sync,
{
    fn forward(&self, task: &Info, ctx: &AgentContext<'_>) -> Result<Answer, StrategyError> {
        self(task, ctx)
    }
}

/// What a top-level definition in candidate code evaluates to.
#[derive(Clone)]
pub enum SymbolKind {
    Callable(Arc<dyn Strategy>),
    Value(String),
}

/// A named top-level definition.
#[derive(Clone)]
pub struct Symbol {
    pub name: String,
    pub kind: SymbolKind,
}

impl fmt::Debug for Symbol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let kind = match &self.kind {
            SymbolKind::Callable(_) => "callable".to_string(),
            SymbolKind::Value(v) => format!("value {v:?}"),
        };
        f.debug_struct("Symbol")
            .field("name", &self.name)
            .field("kind", &kind)
            .finish()
    }
}

/// Errors produced while loading candidate code.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum CompileError {
    #[error("line {line}: {message}")]
    Syntax { line: usize, message: String },
    #[error("line {line}: unknown stage '{stage}'")]
    UnknownStage { line: usize, stage: String },
    #[error("line {line}: stage '{stage}' takes no argument '{argument}'")]
    UnknownArgument {
        line: usize,
        stage: String,
        argument: String,
    },
    #[error("line {line}: invalid value for '{argument}': {message}")]
    InvalidArgument {
        line: usize,
        argument: String,
        message: String,
    },
}

/// Turns candidate source into its top-level symbols.
pub trait StrategyLoader: Send + Sync {
    fn load(&self, source: &str) -> Result<Vec<Symbol>, CompileError>;
}
