//! Agent scripts: the built-in candidate language.
//!
//! A script is a list of top-level definitions, one per line:
//!
//! ```text
//! # comment
//! let rounds = 3
//! agent forward = cot(temperature=0.8)
//!     | refine(rounds=5)
//! ```
//!
//! `agent` defines a callable pipeline of stages, `let` defines a plain
//! value, and a line starting with `|` continues the previous definition.
//! Redefining a name replaces the earlier definition.
//!
//! Each stage reads the Info trail built so far and appends its outputs;
//! the last `answer` on the trail is the pipeline's answer.
//!
//! | stage       | arguments                        | calls per task          |
//! |-------------|----------------------------------|-------------------------|
//! | `cot`       | `temperature`, `instruction`     | 1                       |
//! | `sc`        | `samples`, `temperature`         | samples                 |
//! | `refine`    | `rounds`                         | up to 2 * rounds (+1)   |
//! | `debate`    | `rounds`, `roles`                | roles * rounds + 1      |
//! | `step_back` | `temperature`                    | 2                       |
//! | `qd`        | `samples`                        | samples + 1             |
//! | `roles`     | `experts`                        | 2                       |

use std::sync::Arc;

use crate::schema::Info;

use super::llm::LlmAgent;
use super::strategy::{
    AgentContext, Answer, CompileError, Strategy, StrategyError, StrategyLoader, Symbol,
    SymbolKind,
};

const COT_INSTRUCTION: &str = "Please think step by step and then solve the task.";
const REFLECT_INSTRUCTION: &str = "Given previous attempts and feedback, carefully consider where you could go wrong in your latest attempt. Using insights from previous attempts, try to solve the task better.";
const CRITIC_INSTRUCTION: &str = "Please review the answer above and criticize on where might be wrong. If you are absolutely sure it is correct, output 'True' in 'correct'.";
const DEBATE_INSTRUCTION: &str = "Given solutions to the problem from other agents, consider their opinions as additional advice. Please think carefully and provide an updated answer.";
const FINAL_INSTRUCTION: &str = "Given all the above thinking and answers, reason over them carefully and provide a final answer.";
const PRINCIPLE_INSTRUCTION: &str = "What are the principles and concepts involved in solving this task? First think step by step. Then list all involved principles and explain them.";
const DIVERSE_INSTRUCTION: &str =
    "Given previous attempts, try to come up with another interesting way to solve the task.";

const THINKING_ANSWER: [&str; 2] = ["thinking", "answer"];

/// Loads agent scripts.
#[derive(Debug, Clone, Copy, Default)]
pub struct ScriptLoader;

impl StrategyLoader for ScriptLoader {
    fn load(&self, source: &str) -> Result<Vec<Symbol>, CompileError> {
        let mut symbols: Vec<Symbol> = Vec::new();
        for statement in statements(source)? {
            let symbol = parse_statement(&statement)?;
            match symbols.iter_mut().find(|s| s.name == symbol.name) {
                Some(existing) => *existing = symbol,
                None => symbols.push(symbol),
            }
        }
        Ok(symbols)
    }
}

/// A compiled `agent` definition.
#[derive(Debug, Clone)]
pub struct ScriptStrategy {
    name: String,
    stages: Vec<Stage>,
}

impl Strategy for ScriptStrategy {
    fn forward(&self, task: &Info, ctx: &AgentContext<'_>) -> Result<Answer, StrategyError> {
        let mut trail = vec![task.clone()];
        for stage in &self.stages {
            let produced = stage.run(ctx, &trail)?;
            trail.extend(produced);
        }
        trail
            .into_iter()
            .rev()
            .find(|info| info.name == "answer")
            .map(Answer::Info)
            .ok_or_else(|| {
                log::debug!("Agent '{}' finished without an answer", self.name);
                StrategyError::NoAnswer
            })
    }
}

// ============================================================================
// Parsing
// ============================================================================

struct Statement {
    line: usize,
    text: String,
}

fn statements(source: &str) -> Result<Vec<Statement>, CompileError> {
    let mut out: Vec<Statement> = Vec::new();
    for (idx, raw) in source.lines().enumerate() {
        let line = idx + 1;
        let trimmed = raw.trim();
        if trimmed.is_empty() || trimmed.starts_with('#') {
            continue;
        }
        if trimmed.starts_with('|') {
            let Some(previous) = out.last_mut() else {
                return Err(CompileError::Syntax {
                    line,
                    message: "continuation without a definition".to_string(),
                });
            };
            previous.text.push(' ');
            previous.text.push_str(trimmed);
        } else {
            out.push(Statement {
                line,
                text: trimmed.to_string(),
            });
        }
    }
    Ok(out)
}

fn parse_statement(statement: &Statement) -> Result<Symbol, CompileError> {
    let line = statement.line;
    let syntax = |message: &str| CompileError::Syntax {
        line,
        message: message.to_string(),
    };

    let (keyword, rest) = statement
        .text
        .split_once(char::is_whitespace)
        .ok_or_else(|| syntax("expected `agent <name> = ...` or `let <name> = ...`"))?;
    let (name, body) = rest
        .split_once('=')
        .ok_or_else(|| syntax("expected '=' after the name"))?;
    let name = name.trim();
    if !is_identifier(name) {
        return Err(syntax(&format!("invalid name '{name}'")));
    }

    let kind = match keyword {
        "agent" => {
            let stages = split_outside_quotes(body, '|', line)?
                .into_iter()
                .map(|text| parse_stage(text.trim(), line))
                .collect::<Result<Vec<_>, _>>()?;
            SymbolKind::Callable(Arc::new(ScriptStrategy {
                name: name.to_string(),
                stages,
            }))
        }
        "let" => match parse_literal(body.trim()) {
            Literal::Number(n) => SymbolKind::Value(n.to_string()),
            Literal::Text(t) => SymbolKind::Value(t),
        },
        other => return Err(syntax(&format!("unknown keyword '{other}'"))),
    };

    Ok(Symbol {
        name: name.to_string(),
        kind,
    })
}

fn is_identifier(text: &str) -> bool {
    let mut chars = text.chars();
    matches!(chars.next(), Some(c) if c.is_ascii_alphabetic() || c == '_')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

fn split_outside_quotes(text: &str, separator: char, line: usize) -> Result<Vec<&str>, CompileError> {
    let mut parts = Vec::new();
    let mut in_quote = false;
    let mut start = 0;
    for (i, c) in text.char_indices() {
        if c == '"' {
            in_quote = !in_quote;
        } else if c == separator && !in_quote {
            parts.push(&text[start..i]);
            start = i + c.len_utf8();
        }
    }
    if in_quote {
        return Err(CompileError::Syntax {
            line,
            message: "unterminated string".to_string(),
        });
    }
    parts.push(&text[start..]);
    Ok(parts)
}

#[derive(Debug, Clone, PartialEq)]
enum Literal {
    Number(f64),
    Text(String),
}

fn parse_literal(text: &str) -> Literal {
    if let Some(inner) = text
        .strip_prefix('"')
        .and_then(|rest| rest.strip_suffix('"'))
    {
        return Literal::Text(inner.to_string());
    }
    match text.parse::<f64>() {
        Ok(n) => Literal::Number(n),
        Err(_) => Literal::Text(text.to_string()),
    }
}

fn parse_stage(text: &str, line: usize) -> Result<Stage, CompileError> {
    let (name, args_text) = match text.find('(') {
        Some(open) => {
            let Some(inner) = text[open + 1..].strip_suffix(')') else {
                return Err(CompileError::Syntax {
                    line,
                    message: format!("missing ')' in '{text}'"),
                });
            };
            (text[..open].trim(), inner)
        }
        None => (text, ""),
    };
    if !is_identifier(name) {
        return Err(CompileError::Syntax {
            line,
            message: format!("invalid stage '{text}'"),
        });
    }

    let mut values = Vec::new();
    for part in split_outside_quotes(args_text, ',', line)? {
        let part = part.trim();
        if part.is_empty() {
            continue;
        }
        let (key, value) = part.split_once('=').ok_or_else(|| CompileError::Syntax {
            line,
            message: format!("expected key=value, got '{part}'"),
        })?;
        values.push((key.trim().to_string(), parse_literal(value.trim())));
    }

    let mut args = Args {
        line,
        stage: name.to_string(),
        values,
    };
    let stage = Stage::build(&mut args)?;
    args.finish()?;
    Ok(stage)
}

struct Args {
    line: usize,
    stage: String,
    values: Vec<(String, Literal)>,
}

impl Args {
    fn take(&mut self, key: &str) -> Option<Literal> {
        let pos = self.values.iter().position(|(k, _)| k == key)?;
        Some(self.values.remove(pos).1)
    }

    fn invalid(&self, key: &str, message: &str) -> CompileError {
        CompileError::InvalidArgument {
            line: self.line,
            argument: key.to_string(),
            message: message.to_string(),
        }
    }

    fn number(&mut self, key: &str, default: f64) -> Result<f64, CompileError> {
        match self.take(key) {
            None => Ok(default),
            Some(Literal::Number(n)) if n.is_finite() => Ok(n),
            Some(_) => Err(self.invalid(key, "expected a number")),
        }
    }

    fn temperature(&mut self, default: f32) -> Result<f32, CompileError> {
        let t = self.number("temperature", f64::from(default))?;
        if !(0.0..=2.0).contains(&t) {
            return Err(self.invalid("temperature", "must be within [0, 2]"));
        }
        Ok(t as f32)
    }

    fn count(&mut self, key: &str, default: usize) -> Result<usize, CompileError> {
        let n = self.number(key, default as f64)?;
        if n < 1.0 || n.fract() != 0.0 || n > 64.0 {
            return Err(self.invalid(key, "expected an integer between 1 and 64"));
        }
        Ok(n as usize)
    }

    fn text(&mut self, key: &str, default: &str) -> Result<String, CompileError> {
        match self.take(key) {
            None => Ok(default.to_string()),
            Some(Literal::Text(t)) => Ok(t),
            Some(Literal::Number(_)) => Err(self.invalid(key, "expected text")),
        }
    }

    fn list(&mut self, key: &str, default: &str) -> Result<Vec<String>, CompileError> {
        let items: Vec<String> = self
            .text(key, default)?
            .split(',')
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect();
        if items.is_empty() {
            return Err(self.invalid(key, "expected a non-empty comma-separated list"));
        }
        Ok(items)
    }

    fn finish(self) -> Result<(), CompileError> {
        match self.values.into_iter().next() {
            None => Ok(()),
            Some((argument, _)) => Err(CompileError::UnknownArgument {
                line: self.line,
                stage: self.stage,
                argument,
            }),
        }
    }
}

// ============================================================================
// Stages
// ============================================================================

#[derive(Debug, Clone, PartialEq)]
enum Stage {
    Cot { temperature: f32, instruction: String },
    SelfConsistency { samples: usize, temperature: f32 },
    Refine { rounds: usize },
    Debate { rounds: usize, roles: Vec<String> },
    StepBack { temperature: f32 },
    QualityDiversity { samples: usize },
    Roles { experts: Vec<String> },
}

impl Stage {
    fn build(args: &mut Args) -> Result<Self, CompileError> {
        let name = args.stage.clone();
        let stage = match name.as_str() {
            "cot" => Self::Cot {
                temperature: args.temperature(0.5)?,
                instruction: args.text("instruction", COT_INSTRUCTION)?,
            },
            "sc" => Self::SelfConsistency {
                samples: args.count("samples", 5)?,
                temperature: args.temperature(0.8)?,
            },
            "refine" => Self::Refine {
                rounds: args.count("rounds", 5)?,
            },
            "debate" => Self::Debate {
                rounds: args.count("rounds", 2)?,
                roles: args.list("roles", "Domain Expert,Skeptical Reviewer,Generalist")?,
            },
            "step_back" => Self::StepBack {
                temperature: args.temperature(0.5)?,
            },
            "qd" => Self::QualityDiversity {
                samples: args.count("samples", 3)?,
            },
            "roles" => Self::Roles {
                experts: args.list("experts", "Domain Expert,Generalist,Helpful Assistant")?,
            },
            other => {
                return Err(CompileError::UnknownStage {
                    line: args.line,
                    stage: other.to_string(),
                });
            }
        };
        Ok(stage)
    }

    fn run(&self, ctx: &AgentContext<'_>, trail: &[Info]) -> Result<Vec<Info>, StrategyError> {
        match self {
            Self::Cot {
                temperature,
                instruction,
            } => LlmAgent::new(&THINKING_ANSWER, "Chain-of-Thought Agent", *temperature)
                .query(ctx, trail, instruction, -1),

            Self::SelfConsistency {
                samples,
                temperature,
            } => {
                let mut answers = Vec::with_capacity(*samples);
                for _ in 0..*samples {
                    let agent =
                        LlmAgent::new(&THINKING_ANSWER, "Chain-of-Thought Agent", *temperature);
                    let outputs = agent.query(ctx, trail, COT_INSTRUCTION, -1)?;
                    if let Some(answer) = find_last(&outputs, "answer") {
                        answers.push(answer.clone());
                    }
                }
                majority_vote(&answers)
                    .cloned()
                    .map(|answer| vec![answer])
                    .ok_or(StrategyError::NoAnswer)
            }

            Self::Refine { rounds } => refine(ctx, trail, *rounds),

            Self::Debate { rounds, roles } => {
                let debaters: Vec<LlmAgent> = roles
                    .iter()
                    .map(|role| LlmAgent::new(&THINKING_ANSWER, "Debate Agent", 0.8).with_role(role))
                    .collect();
                let mut produced = Vec::new();
                let mut previous: Vec<Info> = Vec::new();
                for round in 0..*rounds {
                    let (inputs, instruction) = if round == 0 {
                        (trail.to_vec(), COT_INSTRUCTION)
                    } else {
                        (concat(trail, &previous), DEBATE_INSTRUCTION)
                    };
                    let mut current = Vec::new();
                    for debater in &debaters {
                        current.extend(debater.query(ctx, &inputs, instruction, round as i32)?);
                    }
                    produced.extend(current.iter().cloned());
                    previous = current;
                }
                let decision = LlmAgent::new(&THINKING_ANSWER, "Final Decision Agent", 0.1)
                    .query(ctx, &concat(trail, &previous), FINAL_INSTRUCTION, -1)?;
                produced.extend(decision);
                Ok(produced)
            }

            Self::StepBack { temperature } => {
                let principles = LlmAgent::new(&["thinking", "principle"], "Principle Agent", *temperature)
                    .query(ctx, trail, PRINCIPLE_INSTRUCTION, -1)?;
                let solved = LlmAgent::new(&THINKING_ANSWER, "Chain-of-Thought Agent", *temperature)
                    .query(ctx, &concat(trail, &principles), COT_INSTRUCTION, -1)?;
                Ok(concat(&principles, &solved))
            }

            Self::QualityDiversity { samples } => {
                let agent = LlmAgent::new(&THINKING_ANSWER, "Chain-of-Thought Agent", 0.8);
                let mut attempts = Vec::new();
                for i in 0..*samples {
                    let instruction = if i == 0 {
                        COT_INSTRUCTION
                    } else {
                        DIVERSE_INSTRUCTION
                    };
                    let outputs = agent.query(ctx, &concat(trail, &attempts), instruction, i as i32)?;
                    attempts.extend(outputs);
                }
                let decision = LlmAgent::new(&THINKING_ANSWER, "Final Decision Agent", 0.1)
                    .query(ctx, &concat(trail, &attempts), FINAL_INSTRUCTION, -1)?;
                Ok(concat(&attempts, &decision))
            }

            Self::Roles { experts } => {
                let instruction = format!(
                    "Given the task, please choose an Expert to answer the question. Choose from: {}.",
                    experts.join(", ")
                );
                let routed = LlmAgent::new(&["choice"], "Routing agent", 0.8)
                    .with_role("routing assistant")
                    .query(ctx, trail, &instruction, -1)?;
                let choice = find_last(&routed, "choice")
                    .map(|info| info.content.to_lowercase())
                    .unwrap_or_default();
                let expert = experts
                    .iter()
                    .find(|e| choice.contains(&e.to_lowercase()))
                    .or(experts.last())
                    .cloned()
                    .unwrap_or_else(|| "helpful assistant".to_string());
                let solved = LlmAgent::new(&THINKING_ANSWER, "Expert Agent", 0.8)
                    .with_role(expert)
                    .query(ctx, trail, COT_INSTRUCTION, -1)?;
                Ok(concat(&routed, &solved))
            }
        }
    }
}

/// Critic/revise loop on top of the latest answer.
fn refine(ctx: &AgentContext<'_>, trail: &[Info], rounds: usize) -> Result<Vec<Info>, StrategyError> {
    let task = trail
        .iter()
        .find(|info| info.name == "task")
        .or(trail.first())
        .cloned()
        .ok_or(StrategyError::NoAnswer)?;
    let solver = LlmAgent::new(&THINKING_ANSWER, "Chain-of-Thought Agent", 0.5);
    let critic = LlmAgent::new(&["feedback", "correct"], "Critic Agent", 0.5).with_role("critic");

    let mut produced = Vec::new();
    let mut latest: Vec<Info> = ["thinking", "answer"]
        .iter()
        .filter_map(|name| find_last(trail, name).cloned())
        .collect();
    if find_last(&latest, "answer").is_none() {
        latest = solver.query(ctx, trail, COT_INSTRUCTION, -1)?;
        produced.extend(latest.iter().cloned());
    }

    let mut solver_inputs = vec![task.clone()];
    for round in 0..rounds {
        let review = critic.query(ctx, &concat(&[task.clone()], &latest), CRITIC_INSTRUCTION, round as i32)?;
        produced.extend(review.iter().cloned());
        if find_last(&review, "correct").is_some_and(|c| c.content.trim() == "True") {
            break;
        }
        solver_inputs.extend(latest.iter().cloned());
        solver_inputs.extend(review.into_iter().filter(|info| info.name == "feedback"));
        latest = solver.query(ctx, &solver_inputs, REFLECT_INSTRUCTION, round as i32 + 1)?;
        produced.extend(latest.iter().cloned());
    }
    Ok(produced)
}

fn find_last<'a>(infos: &'a [Info], name: &str) -> Option<&'a Info> {
    infos.iter().rev().find(|info| info.name == name)
}

fn concat(a: &[Info], b: &[Info]) -> Vec<Info> {
    a.iter().chain(b).cloned().collect()
}

/// Most common answer content; ties go to the earliest.
fn majority_vote(answers: &[Info]) -> Option<&Info> {
    let mut best: Option<(&Info, usize)> = None;
    for answer in answers {
        let key = answer.content.trim();
        let count = answers.iter().filter(|a| a.content.trim() == key).count();
        if best.is_none_or(|(_, c)| count > c) {
            best = Some((answer, count));
        }
    }
    best.map(|(answer, _)| answer)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::llm::{ChatRequest, JsonObject, LanguageModel, LlmError};
    use crate::schema::initial_archive;
    use serde_json::{Value, json};
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicU64, Ordering};
    use crate::engine::strategy::EvaluationMode;

    /// Answers every call with a fixed object.
    struct Fixed(Value);

    impl LanguageModel for Fixed {
        fn complete(&self, _request: &ChatRequest) -> Result<JsonObject, LlmError> {
            match &self.0 {
                Value::Object(map) => Ok(map.clone()),
                _ => Err(LlmError::Malformed("not an object".into())),
            }
        }
    }

    /// Replays a queue of replies, recording the prompts it saw.
    struct Queue {
        replies: Mutex<Vec<Value>>,
        seen: Mutex<Vec<String>>,
    }

    impl Queue {
        fn new(replies: Vec<Value>) -> Self {
            Self {
                replies: Mutex::new(replies),
                seen: Mutex::new(Vec::new()),
            }
        }
    }

    impl LanguageModel for Queue {
        fn complete(&self, request: &ChatRequest) -> Result<JsonObject, LlmError> {
            let prompt = request.messages.last().map(|m| m.content.clone()).unwrap_or_default();
            self.seen.lock().unwrap().push(prompt);
            match self.replies.lock().unwrap().remove(0) {
                Value::Object(map) => Ok(map),
                _ => Err(LlmError::Malformed("not an object".into())),
            }
        }
    }

    fn single(source: &str) -> Arc<dyn Strategy> {
        let mut symbols = ScriptLoader.load(source).unwrap();
        assert_eq!(symbols.len(), 1);
        match symbols.remove(0).kind {
            SymbolKind::Callable(s) => s,
            SymbolKind::Value(_) => panic!("not callable"),
        }
    }

    fn run(source: &str, model: &dyn LanguageModel) -> (Result<Answer, StrategyError>, u64) {
        let strategy = single(source);
        let calls = AtomicU64::new(0);
        let ctx = AgentContext::new(model, EvaluationMode::Search, &calls);
        let answer = strategy.forward(&Info::task("What is 6 * 7?"), &ctx);
        (answer, calls.load(Ordering::Relaxed))
    }

    #[test]
    fn test_symbols() {
        let symbols = ScriptLoader
            .load("# two things\nlet limit = 3\nagent forward = cot\n")
            .unwrap();
        assert_eq!(symbols.len(), 2);
        assert_eq!(symbols[0].name, "limit");
        assert!(matches!(&symbols[0].kind, SymbolKind::Value(v) if v == "3"));
        assert!(matches!(symbols[1].kind, SymbolKind::Callable(_)));

        assert!(ScriptLoader.load("\n# nothing here\n").unwrap().is_empty());

        let redefined = ScriptLoader
            .load("agent forward = cot\nagent forward = sc")
            .unwrap();
        assert_eq!(redefined.len(), 1);
    }

    #[test]
    fn test_continuation_lines() {
        let source = "agent forward = cot(temperature=0.2)\n    | refine(rounds=2)";
        let symbols = ScriptLoader.load(source).unwrap();
        assert_eq!(symbols.len(), 1);

        let err = ScriptLoader.load("| cot").unwrap_err();
        assert!(matches!(err, CompileError::Syntax { line: 1, .. }));
    }

    #[test]
    fn test_compile_errors() {
        assert!(matches!(
            ScriptLoader.load("agent forward = juggle").unwrap_err(),
            CompileError::UnknownStage { .. }
        ));
        assert!(matches!(
            ScriptLoader.load("agent forward = cot(depth=3)").unwrap_err(),
            CompileError::UnknownArgument { .. }
        ));
        assert!(matches!(
            ScriptLoader.load("agent forward = sc(samples=0)").unwrap_err(),
            CompileError::InvalidArgument { .. }
        ));
        assert!(matches!(
            ScriptLoader.load("agent forward = cot(temperature=\"hot\")").unwrap_err(),
            CompileError::InvalidArgument { .. }
        ));
        assert!(matches!(
            ScriptLoader.load("def forward(self, taskInfo):").unwrap_err(),
            CompileError::Syntax { .. }
        ));
        assert!(matches!(
            ScriptLoader.load("agent forward = roles(experts=\"a,b)").unwrap_err(),
            CompileError::Syntax { .. }
        ));
        assert!(matches!(
            ScriptLoader.load("agent 9lives = cot").unwrap_err(),
            CompileError::Syntax { .. }
        ));
    }

    #[test]
    fn test_seed_set_compiles() {
        for candidate in initial_archive() {
            let symbols = ScriptLoader.load(&candidate.code).unwrap();
            assert_eq!(symbols.len(), 1, "{}", candidate.name);
            assert!(matches!(symbols[0].kind, SymbolKind::Callable(_)));
        }
    }

    #[test]
    fn test_cot_answer() {
        let model = Fixed(json!({"thinking": "6 sevens", "answer": "42"}));
        let (answer, calls) = run("agent forward = cot", &model);
        assert_eq!(answer.unwrap().content(), "42");
        assert_eq!(calls, 1);
    }

    #[test]
    fn test_self_consistency_votes() {
        let model = Queue::new(vec![
            json!({"thinking": "a", "answer": "41"}),
            json!({"thinking": "b", "answer": "42"}),
            json!({"thinking": "c", "answer": "42"}),
        ]);
        let (answer, calls) = run("agent forward = sc(samples=3)", &model);
        assert_eq!(answer.unwrap().content(), "42");
        assert_eq!(calls, 3);
    }

    #[test]
    fn test_refine_stops_when_critic_accepts() {
        let model = Queue::new(vec![
            json!({"thinking": "guess", "answer": "40"}),
            json!({"feedback": "check the product", "correct": "False"}),
            json!({"thinking": "recompute", "answer": "42"}),
            json!({"feedback": "fine", "correct": "True"}),
        ]);
        let (answer, calls) = run("agent forward = cot | refine(rounds=5)", &model);
        assert_eq!(answer.unwrap().content(), "42");
        assert_eq!(calls, 4);

        let seen = model.seen.lock().unwrap();
        assert!(seen[2].contains("check the product"));
    }

    #[test]
    fn test_debate_and_roles_call_counts() {
        let model = Fixed(json!({"thinking": "t", "answer": "42", "choice": "Generalist"}));
        let (answer, calls) = run("agent forward = debate(rounds=2, roles=\"a,b\")", &model);
        assert_eq!(answer.unwrap().content(), "42");
        assert_eq!(calls, 5);

        let (answer, calls) = run("agent forward = roles", &model);
        assert_eq!(answer.unwrap().content(), "42");
        assert_eq!(calls, 2);

        let (answer, calls) = run("agent forward = qd(samples=2)", &model);
        assert_eq!(answer.unwrap().content(), "42");
        assert_eq!(calls, 3);

        let (answer, calls) = run("agent forward = step_back", &model);
        assert_eq!(answer.unwrap().content(), "42");
        assert_eq!(calls, 2);
    }

    #[test]
    fn test_missing_answer_field_is_padded() {
        let model = Fixed(json!({"thinking": "no idea"}));
        let (answer, _) = run("agent forward = cot", &model);
        assert_eq!(answer.unwrap().content(), "");
    }

    #[test]
    fn test_majority_vote_tie_goes_to_first() {
        let answers = vec![
            Info::new("answer", "a", "1", -1),
            Info::new("answer", "b", "2", -1),
        ];
        assert_eq!(majority_vote(&answers).unwrap().author, "a");
        assert!(majority_vote(&[]).is_none());
    }
}
