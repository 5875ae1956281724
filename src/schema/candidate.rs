//! Archive records and the values that flow through candidate logic.

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::{Map, Value};

use super::FitnessText;

/// Fields a proposer may emit that never reach the archive.
pub const INTERNAL_FIELDS: [&str; 2] = ["debug_thought", "reflection"];

/// One discovered agent architecture.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Candidate {
    /// Free-text rationale from the proposer.
    #[serde(default)]
    pub thought: String,
    /// Display name (not unique).
    pub name: String,
    /// Source of the candidate's logic.
    pub code: String,
    /// When the candidate was produced.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub generation: Option<Generation>,
    /// Search-mode fitness, set once when the candidate is scored.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fitness: Option<FitnessText>,
    /// Held-out fitness from the thorough evaluation pass.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub test_fitness: Option<FitnessText>,
    /// Inference calls per task.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_calls: Option<u64>,
    /// Anything else the proposer returned.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Candidate {
    /// Create an unscored candidate.
    pub fn new(name: impl Into<String>, thought: impl Into<String>, code: impl Into<String>) -> Self {
        Self {
            thought: thought.into(),
            name: name.into(),
            code: code.into(),
            generation: None,
            fitness: None,
            test_fitness: None,
            api_calls: None,
            extra: Map::new(),
        }
    }

    /// Upper bound of the search fitness interval, if scored.
    pub fn performance(&self) -> Option<f64> {
        self.fitness.as_ref().map(FitnessText::performance)
    }

    /// Whether this candidate belongs to the fixed seed set.
    pub fn is_initial(&self) -> bool {
        self.generation == Some(Generation::Initial)
    }

    /// Drop proposer bookkeeping that should not be archived.
    pub fn strip_internal_fields(&mut self) {
        for key in INTERNAL_FIELDS {
            self.extra.remove(key);
        }
    }
}

/// Generation tag: the seed set or a 1-based search generation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Generation {
    Initial,
    Number(u32),
}

impl Generation {
    /// The numeric generation, `None` for the seed set.
    pub fn number(&self) -> Option<u32> {
        match self {
            Self::Initial => None,
            Self::Number(n) => Some(*n),
        }
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum GenerationRepr {
    Number(u32),
    Text(String),
}

impl Serialize for Generation {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Self::Initial => serializer.serialize_str("initial"),
            Self::Number(n) => serializer.serialize_u32(*n),
        }
    }
}

impl<'de> Deserialize<'de> for Generation {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        match GenerationRepr::deserialize(deserializer)? {
            GenerationRepr::Number(n) => Ok(Self::Number(n)),
            GenerationRepr::Text(text) if text == "initial" => Ok(Self::Initial),
            GenerationRepr::Text(other) => Err(serde::de::Error::custom(format!(
                "Unknown generation tag: {other}"
            ))),
        }
    }
}

/// The unit of data exchanged between stages of candidate logic.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Info {
    /// Field name (`task`, `thinking`, `answer`, ...).
    pub name: String,
    /// Identity of the producer.
    pub author: String,
    pub content: String,
    /// Iteration index, -1 when not produced in a loop.
    pub iteration_idx: i32,
}

impl Info {
    pub fn new(
        name: impl Into<String>,
        author: impl Into<String>,
        content: impl Into<String>,
        iteration_idx: i32,
    ) -> Self {
        Self {
            name: name.into(),
            author: author.into(),
            content: content.into(),
            iteration_idx,
        }
    }

    /// The task info handed to a strategy.
    pub fn task(content: impl Into<String>) -> Self {
        Self::new("task", "User", content, -1)
    }
}

/// One benchmark item.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskExample {
    #[serde(alias = "inputs")]
    pub input: String,
    #[serde(alias = "targets", deserialize_with = "string_or_number")]
    pub target: String,
}

fn string_or_number<'de, D: Deserializer<'de>>(deserializer: D) -> Result<String, D::Error> {
    match Value::deserialize(deserializer)? {
        Value::String(s) => Ok(s),
        Value::Number(n) => Ok(n.to_string()),
        other => Err(serde::de::Error::custom(format!(
            "Expected string or number target, got {other}"
        ))),
    }
}
