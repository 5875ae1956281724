//! Conversation with the proposer model: propose, reflect, debug.
//!
//! A [`Transcript`] is never mutated; every turn returns a longer copy, so an
//! abandoned generation simply drops its transcript.

use serde_json::Value;

use crate::engine::llm::{ChatRequest, JsonObject, LanguageModel, LlmError, Message};
use crate::schema::Candidate;

/// Keys only the engine may set on an archived candidate.
const ENGINE_FIELDS: [&str; 4] = ["fitness", "test_fitness", "generation", "api_calls"];

/// Proposer failures.
#[derive(Debug, thiserror::Error)]
pub enum ProposalError {
    #[error(transparent)]
    Llm(#[from] LlmError),
    #[error("Proposal is missing a string '{0}' field")]
    MissingField(&'static str),
}

/// Ordered chat turns.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transcript {
    turns: Vec<Message>,
}

impl Transcript {
    /// Start a conversation from a system and a user prompt.
    pub fn open(system: impl Into<String>, user: impl Into<String>) -> Self {
        Self {
            turns: vec![Message::system(system), Message::user(user)],
        }
    }

    /// This conversation plus the model's reply and the next user turn.
    pub fn followed_by(&self, reply: &Proposal, user: impl Into<String>) -> Self {
        let mut turns = self.turns.clone();
        turns.push(Message::assistant(reply.to_text()));
        turns.push(Message::user(user));
        Self { turns }
    }

    /// Turns in conversation order.
    pub fn turns(&self) -> &[Message] {
        &self.turns
    }

    /// Number of turns.
    pub fn len(&self) -> usize {
        self.turns.len()
    }

    /// Whether there are no turns. An opened transcript always has two.
    pub fn is_empty(&self) -> bool {
        self.turns.is_empty()
    }

    /// The whole conversation as one model request.
    pub fn request(&self, temperature: f32) -> ChatRequest {
        ChatRequest {
            messages: self.turns.clone(),
            temperature,
        }
    }
}

/// A structured proposal with at least a `name` and a `code`.
#[derive(Debug, Clone, PartialEq)]
pub struct Proposal {
    fields: JsonObject,
}

impl Proposal {
    /// Validate a model reply as a proposal.
    pub fn from_object(fields: JsonObject) -> Result<Self, ProposalError> {
        for key in ["name", "code"] {
            if !fields.get(key).is_some_and(Value::is_string) {
                return Err(ProposalError::MissingField(key));
            }
        }
        Ok(Self { fields })
    }

    /// Proposed architecture name.
    pub fn name(&self) -> &str {
        self.text("name")
    }

    /// Proposed agent script.
    pub fn code(&self) -> &str {
        self.text("code")
    }

    fn text(&self, key: &str) -> &str {
        self.fields.get(key).and_then(Value::as_str).unwrap_or_default()
    }

    /// The reply as it is echoed back into the conversation.
    pub fn to_text(&self) -> String {
        Value::Object(self.fields.clone()).to_string()
    }

    /// An unscored archive record; engine-owned and internal keys are dropped.
    pub fn into_candidate(mut self) -> Candidate {
        for key in ENGINE_FIELDS {
            self.fields.remove(key);
        }
        let thought = match self.fields.remove("thought") {
            Some(Value::String(s)) => s,
            Some(other) => other.to_string(),
            None => String::new(),
        };
        let name = self.name().to_string();
        let code = self.code().to_string();
        self.fields.remove("name");
        self.fields.remove("code");

        let mut candidate = Candidate::new(name, thought, code);
        candidate.extra = self.fields;
        candidate.strip_internal_fields();
        candidate
    }
}

/// Sends transcripts to the proposer model.
pub struct Proposer {
    model: Box<dyn LanguageModel>,
    temperature: f32,
}

impl Proposer {
    /// Proposer sampling at `temperature`.
    pub fn new(model: Box<dyn LanguageModel>, temperature: f32) -> Self {
        Self { model, temperature }
    }

    /// Send the transcript and validate the reply.
    pub fn ask(&self, transcript: &Transcript) -> Result<Proposal, ProposalError> {
        let reply = self.model.complete(&transcript.request(self.temperature))?;
        Proposal::from_object(reply)
    }
}

/// Text of every proposer turn.
pub trait PromptTemplates: Send + Sync {
    /// System and user prompt for a fresh proposal, optionally seeded with an
    /// elite and its niche label.
    fn proposal(&self, archive: &[Candidate], seed: Option<(&Candidate, &str)>) -> (String, String);

    /// The two reflection instructions; `previous` is the last archived
    /// candidate once the search is past its first generation.
    fn reflexion(&self, previous: Option<&Candidate>) -> [String; 2];

    /// Instruction sent after a failed evaluation.
    fn debug(&self, error: &str) -> String {
        format!(
            "Error during evaluation:\n{error}\nCarefully consider where you went wrong in your latest implementation. Using insights from previous attempts, try to debug the current code to implement the same thought. Repeat your previous thought in 'thought', and put your thinking for debugging in 'debug_thought'"
        )
    }
}

/// Prompts for proposing agent scripts.
#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultPrompts;

const SYSTEM_PROMPT: &str = "You are a helpful assistant. Make sure to return in a WELL-FORMED JSON object.";

const SCRIPT_GUIDE: &str = r#"# Agent scripts
An agent is a single definition of the form `agent forward = stage | stage ...`.
Each stage reads everything produced so far and appends its own outputs; the
last "answer" produced is the agent's answer. Lines starting with `#` are
comments and a line starting with `|` continues the previous line.

Stages:
- cot(temperature=0.5, instruction="...")   one step-by-step reasoning call
- sc(samples=5, temperature=0.8)             several reasoning calls, majority vote
- refine(rounds=5)                           critic feedback and revision until accepted
- debate(rounds=2, roles="A,B,C")            agents with roles debate, a final agent decides
- step_back(temperature=0.5)                 list the principles first, then solve
- qd(samples=3)                              deliberately different attempts, then a final decision
- roles(experts="A,B,C")                     route the task to one expert role

Define exactly one agent. Every model call counts toward the agent's cost."#;

impl PromptTemplates for DefaultPrompts {
    fn proposal(&self, archive: &[Candidate], seed: Option<(&Candidate, &str)>) -> (String, String) {
        let archive_json = serde_json::to_string_pretty(archive).unwrap_or_else(|_| "[]".to_string());
        let mut prompt = format!(
            "# Overview\nYou are an expert designing agents that solve benchmark tasks by \
             composing language-model calls. Your aim is to design an agent that performs \
             well on the benchmark.\n\n{SCRIPT_GUIDE}\n\n# Discovered architectures\n{archive_json}\n\n"
        );
        if let Some((elite, label)) = seed {
            let elite_json = serde_json::to_string_pretty(elite).unwrap_or_default();
            prompt.push_str(&format!(
                "# Selected agent\nMutate the agent below into a new one with {label}.\n{elite_json}\n\n"
            ));
        }
        prompt.push_str(
            "# Output\nReply with a JSON object with the fields \"thought\" (your reasoning and \
             the design), \"name\" (a short name for the architecture) and \"code\" (the agent \
             script).",
        );
        (SYSTEM_PROMPT.to_string(), prompt)
    }

    fn reflexion(&self, previous: Option<&Candidate>) -> [String; 2] {
        let previous = previous
            .and_then(|c| serde_json::to_string(c).ok())
            .map(|json| format!("Here is the previous agent you tried:\n{json}\n\n"))
            .unwrap_or_default();
        [
            format!(
                "{previous}Carefully review the proposed architecture. Check that it is \
                 interesting compared to the archive, find implementation mistakes and suggest \
                 improvements. Put your thoughts in \"reflection\", then revise \"thought\", \
                 \"name\" and \"code\" accordingly."
            ),
            "Revise the code further. Put your new reflection in \"reflection\". Repeat the \
             previous \"thought\" and \"name\", and update the corrected version of the code in \
             \"code\"."
                .to_string(),
        ]
    }
}
