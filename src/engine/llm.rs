//! Inference boundary: the model trait, rate-limit backoff, the external
//! command adapter and the per-call agent protocol used inside candidates.

use std::io::Write;
use std::process::{Command, Stdio};
use std::sync::{Arc, LazyLock};
use std::thread;
use std::time::Duration;

use rand::Rng;
use rand::distributions::Alphanumeric;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::schema::{Info, ModelConfig};

use super::strategy::{AgentContext, EvaluationMode, StrategyError};

/// A structured model reply.
pub type JsonObject = Map<String, Value>;

/// Speaker of a chat turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

/// One chat turn.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: String,
}

impl Message {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
        }
    }
}

/// A request for one JSON object reply.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatRequest {
    pub messages: Vec<Message>,
    pub temperature: f32,
}

/// Inference failures, as seen by callers.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum LlmError {
    #[error("Rate limited: {0}")]
    RateLimited(String),
    #[error("Maximum context length exceeded: {0}")]
    ContextLength(String),
    #[error("Malformed response: {0}")]
    Malformed(String),
    #[error("Provider error: {0}")]
    Provider(String),
}

/// Black-box inference service: messages in, one JSON object out.
pub trait LanguageModel: Send + Sync {
    fn complete(&self, request: &ChatRequest) -> Result<JsonObject, LlmError>;
}

impl<M: LanguageModel + ?Sized> LanguageModel for Box<M> {
    fn complete(&self, request: &ChatRequest) -> Result<JsonObject, LlmError> {
        (**self).complete(request)
    }
}

impl<M: LanguageModel + ?Sized> LanguageModel for Arc<M> {
    fn complete(&self, request: &ChatRequest) -> Result<JsonObject, LlmError> {
        (**self).complete(request)
    }
}

/// Exponential backoff policy for rate-limited calls.
#[derive(Debug, Clone, PartialEq)]
pub struct Backoff {
    pub initial: Duration,
    pub max_delay: Duration,
    pub max_retries: usize,
}

impl Default for Backoff {
    fn default() -> Self {
        Self::from_config(&ModelConfig::default())
    }
}

impl Backoff {
    pub fn from_config(config: &ModelConfig) -> Self {
        Self {
            initial: Duration::from_millis(config.initial_backoff_ms),
            max_delay: Duration::from_millis(config.max_backoff_ms),
            max_retries: config.max_retries,
        }
    }
}

/// Retries rate-limited calls with exponential backoff; everything else
/// passes straight through.
pub struct RetryingModel<M> {
    inner: M,
    backoff: Backoff,
}

impl<M: LanguageModel> RetryingModel<M> {
    pub fn new(inner: M, backoff: Backoff) -> Self {
        Self { inner, backoff }
    }
}

impl<M: LanguageModel> LanguageModel for RetryingModel<M> {
    fn complete(&self, request: &ChatRequest) -> Result<JsonObject, LlmError> {
        let mut delay = self.backoff.initial;
        let mut retries = 0;
        loop {
            match self.inner.complete(request) {
                Err(LlmError::RateLimited(msg)) if retries < self.backoff.max_retries => {
                    retries += 1;
                    log::warn!(
                        "Rate limited ({msg}), retry {retries}/{} in {:?}",
                        self.backoff.max_retries,
                        delay
                    );
                    thread::sleep(delay);
                    delay = (delay * 2).min(self.backoff.max_delay);
                }
                other => return other,
            }
        }
    }
}

/// Talks to an external adapter process.
///
/// The request is written to the command's stdin as JSON; the command must
/// print a single JSON object on stdout.
#[derive(Debug, Clone)]
pub struct CommandModel {
    program: String,
    args: Vec<String>,
}

impl CommandModel {
    /// Build from `[program, args...]`; `None` if the command is empty.
    pub fn from_command(command: &[String]) -> Option<Self> {
        let (program, args) = command.split_first()?;
        Some(Self {
            program: program.clone(),
            args: args.to_vec(),
        })
    }
}

impl LanguageModel for CommandModel {
    fn complete(&self, request: &ChatRequest) -> Result<JsonObject, LlmError> {
        let payload =
            serde_json::to_vec(request).map_err(|e| LlmError::Provider(e.to_string()))?;

        let mut child = Command::new(&self.program)
            .args(&self.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| LlmError::Provider(format!("Failed to execute {}: {e}", self.program)))?;

        if let Some(mut stdin) = child.stdin.take()
            && let Err(e) = stdin.write_all(&payload)
        {
            drop(stdin);
            let _ = child.kill();
            let _ = child.wait();
            return Err(LlmError::Provider(format!("Failed to write request: {e}")));
        }

        let output = child
            .wait_with_output()
            .map_err(|e| LlmError::Provider(format!("Failed to wait for {}: {e}", self.program)))?;

        if !output.status.success() {
            return Err(classify_failure(&String::from_utf8_lossy(&output.stderr)));
        }

        parse_object(&String::from_utf8_lossy(&output.stdout))
    }
}

static RATE_LIMIT_STATUS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\b429\b").expect("status pattern"));

/// Map adapter stderr onto the error taxonomy.
fn classify_failure(stderr: &str) -> LlmError {
    let lower = stderr.to_lowercase();
    let message = stderr.trim().to_string();
    if lower.contains("maximum context length") {
        LlmError::ContextLength(message)
    } else if lower.contains("rate limit") || RATE_LIMIT_STATUS.is_match(&lower) {
        LlmError::RateLimited(message)
    } else {
        LlmError::Provider(message)
    }
}

/// Parse a reply that must be a single JSON object.
pub fn parse_object(text: &str) -> Result<JsonObject, LlmError> {
    match serde_json::from_str::<Value>(text.trim()) {
        Ok(Value::Object(map)) => Ok(map),
        Ok(other) => Err(LlmError::Malformed(format!("expected a JSON object, got {other}"))),
        Err(e) => Err(LlmError::Malformed(e.to_string())),
    }
}

/// Repair a reply whose field count differs from what was requested.
///
/// Too few fields: missing ones are added as empty strings. Too many:
/// unrequested ones are dropped. A reply with the right count is left alone.
pub fn conform_fields(mut response: JsonObject, fields: &[String]) -> JsonObject {
    if response.len() < fields.len() {
        for key in fields {
            if !response.contains_key(key) && response.len() < fields.len() {
                response.insert(key.clone(), Value::String(String::new()));
            }
        }
    }
    if response.len() > fields.len() {
        let extras: Vec<String> = response
            .keys()
            .filter(|k| !fields.contains(k))
            .cloned()
            .collect();
        for key in extras {
            if response.len() <= fields.len() {
                break;
            }
            response.remove(&key);
        }
    }
    response
}

fn value_text(value: Value) -> String {
    match value {
        Value::String(s) => s,
        other => other.to_string(),
    }
}

fn random_id() -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(4)
        .map(char::from)
        .collect()
}

/// A single model-backed worker inside candidate logic.
#[derive(Debug, Clone)]
pub struct LlmAgent {
    output_fields: Vec<String>,
    agent_name: String,
    role: String,
    temperature: f32,
    id: String,
}

impl LlmAgent {
    pub fn new(output_fields: &[&str], agent_name: impl Into<String>, temperature: f32) -> Self {
        Self {
            output_fields: output_fields.iter().map(|f| f.to_string()).collect(),
            agent_name: agent_name.into(),
            role: "helpful assistant".to_string(),
            temperature,
            id: random_id(),
        }
    }

    pub fn with_role(mut self, role: impl Into<String>) -> Self {
        self.role = role.into();
        self
    }

    /// `"<name> <id>"`, the author tag on every Info this agent produces.
    pub fn identity(&self) -> String {
        format!("{} {}", self.agent_name, self.id)
    }

    /// Build the system and user prompts for one call.
    pub fn prompts(&self, inputs: &[Info], instruction: &str) -> (String, String) {
        let descriptions: Map<String, Value> = self
            .output_fields
            .iter()
            .map(|key| {
                let text = if key.contains("answer") {
                    format!("Your {key}. Return ONLY the final answer, nothing else.")
                } else {
                    format!("Your {key}.")
                };
                (key.clone(), Value::String(text))
            })
            .collect();

        let system = format!(
            "You are a {}.\n\nReply EXACTLY with the following JSON format.\n{}\n\
             DO NOT MISS ANY REQUEST FIELDS and ensure that your response is a well-formed JSON object!\n",
            self.role,
            Value::Object(descriptions)
        );

        let me = self.identity();
        let mut prompt = String::new();
        for info in inputs {
            let author = if info.author == me {
                format!("{} (yourself)", info.author)
            } else {
                info.author.clone()
            };
            if info.name == "task" {
                prompt.push_str(&format!("# Your Task:\n{}\n\n", info.content));
            } else if info.iteration_idx != -1 {
                prompt.push_str(&format!(
                    "### {} #{} by {}:\n{}\n\n",
                    info.name,
                    info.iteration_idx + 1,
                    author,
                    info.content
                ));
            } else {
                prompt.push_str(&format!("### {} by {}:\n{}\n\n", info.name, author, info.content));
            }
        }
        prompt.push_str(instruction);

        (system, prompt)
    }

    /// Ask the model and return one Info per output field.
    pub fn query(
        &self,
        ctx: &AgentContext<'_>,
        inputs: &[Info],
        instruction: &str,
        iteration_idx: i32,
    ) -> Result<Vec<Info>, StrategyError> {
        let (system, prompt) = self.prompts(inputs, instruction);
        let request = ChatRequest {
            messages: vec![Message::system(system), Message::user(prompt)],
            temperature: self.temperature,
        };

        let response = match ctx.complete(&request) {
            Ok(response) => response,
            Err(LlmError::ContextLength(_)) if ctx.mode() == EvaluationMode::Search => {
                return Err(StrategyError::ContextTooLong);
            }
            Err(e) => {
                log::debug!("{} call failed, padding fields: {e}", self.identity());
                JsonObject::new()
            }
        };

        let mut response = conform_fields(response, &self.output_fields);
        let author = self.identity();
        let mut infos = Vec::with_capacity(response.len());
        for key in &self.output_fields {
            if let Some(value) = response.remove(key) {
                infos.push(Info::new(key.clone(), author.clone(), value_text(value), iteration_idx));
            }
        }
        for (key, value) in response {
            infos.push(Info::new(key, author.clone(), value_text(value), iteration_idx));
        }
        Ok(infos)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::Mutex;
    use std::sync::atomic::AtomicU64;

    fn fields(names: &[&str]) -> Vec<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    fn object(value: Value) -> JsonObject {
        match value {
            Value::Object(map) => map,
            _ => panic!("not an object"),
        }
    }

    struct Scripted(Mutex<Vec<Result<JsonObject, LlmError>>>);

    impl LanguageModel for Scripted {
        fn complete(&self, _request: &ChatRequest) -> Result<JsonObject, LlmError> {
            self.0.lock().unwrap().remove(0)
        }
    }

    #[test]
    fn test_conform_pads_missing_fields() {
        let out = conform_fields(object(json!({"answer": "4"})), &fields(&["thinking", "answer"]));
        assert_eq!(out["answer"], json!("4"));
        assert_eq!(out["thinking"], json!(""));
    }

    #[test]
    fn test_conform_drops_extras() {
        let out = conform_fields(
            object(json!({"answer": "4", "thinking": "t", "mood": "fine"})),
            &fields(&["thinking", "answer"]),
        );
        assert_eq!(out.len(), 2);
        assert!(!out.contains_key("mood"));
    }

    #[test]
    fn test_conform_leaves_matching_count_alone() {
        let out = conform_fields(
            object(json!({"thinking": "t", "result": "4"})),
            &fields(&["thinking", "answer"]),
        );
        assert!(out.contains_key("result"));
        assert!(!out.contains_key("answer"));
    }

    #[test]
    fn test_parse_object() {
        assert!(parse_object(" {\"a\": 1} \n").is_ok());
        assert!(matches!(parse_object("[1, 2]"), Err(LlmError::Malformed(_))));
        assert!(matches!(parse_object("nope"), Err(LlmError::Malformed(_))));
    }

    #[cfg(unix)]
    #[test]
    fn test_command_that_ignores_stdin_is_reaped() {
        let model = CommandModel::from_command(&["true".to_string()]).unwrap();
        // Larger than a pipe buffer, so the write fails once the child exits.
        let request = ChatRequest {
            messages: vec![Message::user("x".repeat(1 << 20))],
            temperature: 0.0,
        };
        match model.complete(&request) {
            Err(LlmError::Provider(message)) => assert!(message.starts_with("Failed to write request")),
            other => panic!("unexpected result: {other:?}"),
        }
    }

    #[test]
    fn test_classify_failure() {
        assert!(matches!(
            classify_failure("This model's maximum context length is 8192 tokens"),
            LlmError::ContextLength(_)
        ));
        assert!(matches!(classify_failure("HTTP 429"), LlmError::RateLimited(_)));
        assert!(matches!(classify_failure("status 429: Too Many Requests"), LlmError::RateLimited(_)));
        assert!(matches!(
            classify_failure("request used 14290 tokens"),
            LlmError::Provider(_)
        ));
        assert!(matches!(classify_failure("boom"), LlmError::Provider(_)));
    }

    #[test]
    fn test_retry_on_rate_limit_only() {
        let model = RetryingModel::new(
            Scripted(Mutex::new(vec![
                Err(LlmError::RateLimited("slow down".into())),
                Err(LlmError::RateLimited("slow down".into())),
                Ok(object(json!({"ok": true}))),
            ])),
            Backoff {
                initial: Duration::ZERO,
                max_delay: Duration::ZERO,
                max_retries: 3,
            },
        );
        let request = ChatRequest {
            messages: vec![Message::user("hi")],
            temperature: 0.5,
        };
        assert_eq!(model.complete(&request).unwrap()["ok"], json!(true));

        let model = RetryingModel::new(
            Scripted(Mutex::new(vec![
                Err(LlmError::RateLimited("1".into())),
                Err(LlmError::RateLimited("2".into())),
            ])),
            Backoff {
                initial: Duration::ZERO,
                max_delay: Duration::ZERO,
                max_retries: 1,
            },
        );
        assert_eq!(
            model.complete(&request),
            Err(LlmError::RateLimited("2".into()))
        );
    }

    #[test]
    fn test_prompt_rendering() {
        let agent = LlmAgent::new(&["thinking", "answer"], "Chain-of-Thought Agent", 0.5);
        let inputs = vec![
            Info::task("What is 2 + 2?"),
            Info::new("answer", agent.identity(), "4", 0),
            Info::new("feedback", "Critic Agent abcd", "Looks right", -1),
        ];
        let (system, prompt) = agent.prompts(&inputs, "Solve it.");
        assert!(system.starts_with("You are a helpful assistant."));
        assert!(system.contains("\"answer\""));
        assert!(prompt.starts_with("# Your Task:\nWhat is 2 + 2?"));
        assert!(prompt.contains("### answer #1 by Chain-of-Thought Agent"));
        assert!(prompt.contains("(yourself)"));
        assert!(prompt.contains("### feedback by Critic Agent abcd:\nLooks right"));
        assert!(prompt.ends_with("Solve it."));
    }

    #[test]
    fn test_query_context_length_is_fatal_only_in_search() {
        let calls = AtomicU64::new(0);
        let agent = LlmAgent::new(&["answer"], "Agent", 0.5);
        let inputs = vec![Info::task("long")];

        let model = Scripted(Mutex::new(vec![Err(LlmError::ContextLength("too long".into()))]));
        let ctx = AgentContext::new(&model, EvaluationMode::Search, &calls);
        assert!(matches!(
            agent.query(&ctx, &inputs, "go", -1),
            Err(StrategyError::ContextTooLong)
        ));

        let model = Scripted(Mutex::new(vec![Err(LlmError::ContextLength("too long".into()))]));
        let ctx = AgentContext::new(&model, EvaluationMode::Thorough, &calls);
        let infos = agent.query(&ctx, &inputs, "go", -1).unwrap();
        assert_eq!(infos.len(), 1);
        assert_eq!(infos[0].content, "");
        assert_eq!(calls.load(std::sync::atomic::Ordering::Relaxed), 2);
    }

    #[test]
    fn test_query_outputs_in_field_order() {
        let calls = AtomicU64::new(0);
        let model = Scripted(Mutex::new(vec![Ok(object(
            json!({"answer": 7, "thinking": "add"}),
        ))]));
        let ctx = AgentContext::new(&model, EvaluationMode::Search, &calls);
        let agent = LlmAgent::new(&["thinking", "answer"], "Agent", 0.5);
        let infos = agent.query(&ctx, &[Info::task("3 + 4")], "go", 2).unwrap();
        assert_eq!(infos[0].name, "thinking");
        assert_eq!(infos[1].name, "answer");
        assert_eq!(infos[1].content, "7");
        assert_eq!(infos[1].iteration_idx, 2);
        assert_eq!(infos[1].author, agent.identity());
    }
}
