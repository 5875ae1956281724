//! Evaluation harness: compiles candidate code and runs it over a task window.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use rayon::prelude::*;

use crate::schema::{EvaluationConfig, Info, TaskExample};

use super::dataset::{AnswerScorer, TaskSet};
use super::llm::LanguageModel;
use super::strategy::{
    AgentContext, CompileError, EvaluationMode, Strategy, StrategyError, StrategyLoader,
    SymbolKind,
};

/// Candidate code that does not define exactly one callable.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum MalformedCandidate {
    #[error("No callable defined in namespace")]
    NoSymbols,
    #[error("{0} things in namespace. Please only provide 1")]
    TooManySymbols(usize),
    #[error("{0} is not callable")]
    NotCallable(String),
}

/// Failures that abort a whole evaluation run.
#[derive(Debug, thiserror::Error)]
pub enum HarnessError {
    #[error(transparent)]
    MalformedCandidate(#[from] MalformedCandidate),
    #[error("Failed to compile candidate: {0}")]
    Compile(#[from] CompileError),
    #[error("Task {task} failed: {source}")]
    Strategy {
        task: usize,
        #[source]
        source: StrategyError,
    },
    #[error("Failed to build worker pool: {0}")]
    Pool(String),
    #[error("No tasks in the {0:?} window")]
    NoTasks(EvaluationMode),
}

/// Outcomes of one run, in task order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EvaluationReport {
    /// 1 for a correct answer, 0 otherwise.
    pub outcomes: Vec<u8>,
    /// Inference calls per task, rounded up.
    pub api_calls: u64,
}

impl EvaluationReport {
    pub fn mean(&self) -> f64 {
        if self.outcomes.is_empty() {
            return 0.0;
        }
        self.outcomes.iter().map(|&o| f64::from(o)).sum::<f64>() / self.outcomes.len() as f64
    }
}

/// Runs candidate strategies against the benchmark.
pub struct EvaluationHarness {
    tasks: TaskSet,
    loader: Box<dyn StrategyLoader>,
    scorer: Box<dyn AnswerScorer>,
    model: Box<dyn LanguageModel>,
    config: EvaluationConfig,
}

impl EvaluationHarness {
    pub fn new(
        tasks: TaskSet,
        loader: Box<dyn StrategyLoader>,
        scorer: Box<dyn AnswerScorer>,
        model: Box<dyn LanguageModel>,
        config: EvaluationConfig,
    ) -> Self {
        Self {
            tasks,
            loader,
            scorer,
            model,
            config,
        }
    }

    /// Compile `source` into its single callable.
    pub fn compile(&self, source: &str) -> Result<Arc<dyn Strategy>, HarnessError> {
        let symbols = self.loader.load(source)?;
        Ok(single_callable(symbols)?)
    }

    /// Compile and evaluate candidate code.
    pub fn evaluate_source(
        &self,
        source: &str,
        mode: EvaluationMode,
    ) -> Result<EvaluationReport, HarnessError> {
        let strategy = self.compile(source)?;
        self.evaluate(strategy.as_ref(), mode)
    }

    /// Run `strategy` once per task in the window for `mode`.
    ///
    /// Outcomes keep task order whatever order the workers finish in. A
    /// strategy failure on any task fails the run; a scoring failure only
    /// zeroes that task.
    pub fn evaluate(
        &self,
        strategy: &dyn Strategy,
        mode: EvaluationMode,
    ) -> Result<EvaluationReport, HarnessError> {
        let tasks = self.tasks.window(mode);
        if tasks.is_empty() {
            return Err(HarnessError::NoTasks(mode));
        }
        log::debug!("problem length: {}", tasks.len());

        let workers = if self.config.parallel {
            tasks.len().min(self.config.max_workers).max(1)
        } else {
            1
        };
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(workers)
            .build()
            .map_err(|e| HarnessError::Pool(e.to_string()))?;

        let calls = AtomicU64::new(0);
        let ctx = AgentContext::new(self.model.as_ref(), mode, &calls);
        let results: Vec<Result<u8, HarnessError>> = pool.install(|| {
            tasks
                .par_iter()
                .enumerate()
                .map(|(i, example)| self.run_task(strategy, &ctx, i, example))
                .collect()
        });
        let outcomes = results.into_iter().collect::<Result<Vec<u8>, _>>()?;

        let total = calls.load(Ordering::Relaxed);
        let api_calls = total.div_ceil(tasks.len() as u64);
        Ok(EvaluationReport {
            outcomes,
            api_calls,
        })
    }

    fn run_task(
        &self,
        strategy: &dyn Strategy,
        ctx: &AgentContext<'_>,
        index: usize,
        example: &TaskExample,
    ) -> Result<u8, HarnessError> {
        let answer = strategy
            .forward(&Info::task(example.input.clone()), ctx)
            .map_err(|source| HarnessError::Strategy {
                task: index,
                source,
            })?;
        match self.scorer.score(answer.content(), &example.target) {
            Ok(correct) => Ok(u8::from(correct)),
            Err(e) => {
                log::debug!("task {index} scored as wrong: {e}");
                Ok(0)
            }
        }
    }
}

/// Accept a load only if it defines exactly one callable.
pub fn single_callable(
    mut symbols: Vec<super::strategy::Symbol>,
) -> Result<Arc<dyn Strategy>, MalformedCandidate> {
    match symbols.len() {
        0 => Err(MalformedCandidate::NoSymbols),
        1 => {
            let symbol = symbols.remove(0);
            match symbol.kind {
                SymbolKind::Callable(strategy) => Ok(strategy),
                SymbolKind::Value(_) => Err(MalformedCandidate::NotCallable(symbol.name)),
            }
        }
        n => Err(MalformedCandidate::TooManySymbols(n)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::dataset::{ExactMatch, NumericMatch};
    use crate::engine::llm::{ChatRequest, JsonObject, LlmError};
    use crate::engine::script::ScriptLoader;
    use crate::engine::strategy::Answer;
    use serde_json::json;
    use std::sync::atomic::AtomicUsize;
    use std::thread;
    use std::time::Duration;

    /// Replies with the task text's trailing number, counting calls.
    #[derive(Default)]
    struct EchoNumber {
        calls: AtomicUsize,
    }

    impl LanguageModel for EchoNumber {
        fn complete(&self, request: &ChatRequest) -> Result<JsonObject, LlmError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let prompt = &request.messages[1].content;
            let task = prompt
                .lines()
                .nth(1)
                .unwrap_or_default()
                .trim_start_matches("echo ")
                .to_string();
            let mut map = JsonObject::new();
            map.insert("thinking".into(), json!("copy"));
            map.insert("answer".into(), json!(task));
            Ok(map)
        }
    }

    fn task_set(n: usize) -> TaskSet {
        let examples: Vec<TaskExample> = (0..n)
            .map(|i| TaskExample {
                input: format!("echo {i}"),
                target: i.to_string(),
            })
            .collect();
        TaskSet::fixed(examples.clone(), examples)
    }

    fn harness(tasks: TaskSet, model: Box<dyn LanguageModel>) -> EvaluationHarness {
        EvaluationHarness::new(
            tasks,
            Box::new(ScriptLoader),
            Box::new(NumericMatch),
            model,
            EvaluationConfig {
                max_workers: 4,
                ..Default::default()
            },
        )
    }

    #[test]
    fn test_malformed_candidates() {
        let h = harness(task_set(2), Box::new(EchoNumber::default()));
        assert!(matches!(
            h.compile("# nothing"),
            Err(HarnessError::MalformedCandidate(MalformedCandidate::NoSymbols))
        ));
        assert!(matches!(
            h.compile("let x = 1"),
            Err(HarnessError::MalformedCandidate(MalformedCandidate::NotCallable(name))) if name == "x"
        ));
        assert!(matches!(
            h.compile("agent a = cot\nagent b = cot"),
            Err(HarnessError::MalformedCandidate(MalformedCandidate::TooManySymbols(2)))
        ));
        assert!(matches!(h.compile("agent a = nope"), Err(HarnessError::Compile(_))));
        assert_eq!(
            MalformedCandidate::TooManySymbols(2).to_string(),
            "2 things in namespace. Please only provide 1"
        );
    }

    #[test]
    fn test_too_many_symbols_runs_no_tasks() {
        let model = Arc::new(EchoNumber::default());
        let h = harness(task_set(4), Box::new(Arc::clone(&model)));
        let result = h.evaluate_source("agent a = cot\nagent b = sc", EvaluationMode::Search);
        assert!(matches!(
            result,
            Err(HarnessError::MalformedCandidate(MalformedCandidate::TooManySymbols(2)))
        ));
        assert_eq!(model.calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_outcomes_keep_task_order() {
        // Later tasks finish first; only even targets are answered correctly.
        let strategy = |task: &Info, _ctx: &AgentContext<'_>| -> Result<Answer, StrategyError> {
            let n: u64 = task.content.trim_start_matches("echo ").parse().unwrap_or(0);
            thread::sleep(Duration::from_millis(20 - n));
            let answer = if n % 2 == 0 { n } else { n + 100 };
            Ok(Answer::Text(answer.to_string()))
        };
        let h = harness(task_set(8), Box::new(EchoNumber::default()));
        let report = h.evaluate(&strategy, EvaluationMode::Search).unwrap();
        assert_eq!(report.outcomes, vec![1, 0, 1, 0, 1, 0, 1, 0]);
        assert_eq!(report.mean(), 0.5);
        assert_eq!(report.api_calls, 0);
    }

    #[test]
    fn test_api_calls_per_task() {
        let h = harness(task_set(3), Box::new(EchoNumber::default()));
        let report = h
            .evaluate_source("agent forward = sc(samples=3)", EvaluationMode::Search)
            .unwrap();
        assert_eq!(report.outcomes, vec![1, 1, 1]);
        assert_eq!(report.api_calls, 3);
    }

    #[test]
    fn test_strategy_failure_fails_run_but_scoring_failure_does_not() {
        let failing = |task: &Info, _ctx: &AgentContext<'_>| -> Result<Answer, StrategyError> {
            if task.content.ends_with('1') {
                Err(StrategyError::Failed("boom".into()))
            } else {
                Ok(Answer::Text("no number".into()))
            }
        };
        let h = harness(task_set(3), Box::new(EchoNumber::default()));
        assert!(matches!(
            h.evaluate(&failing, EvaluationMode::Search),
            Err(HarnessError::Strategy { task: 1, .. })
        ));

        let unparsable = |_task: &Info, _ctx: &AgentContext<'_>| -> Result<Answer, StrategyError> {
            Ok(Answer::Text("no number".into()))
        };
        let report = h.evaluate(&unparsable, EvaluationMode::Search).unwrap();
        assert_eq!(report.outcomes, vec![0, 0, 0]);
    }

    #[test]
    fn test_sequential_and_empty_window() {
        let mut h = harness(TaskSet::fixed(Vec::new(), Vec::new()), Box::new(EchoNumber::default()));
        h.config.parallel = false;
        h.scorer = Box::new(ExactMatch);
        assert!(matches!(
            h.evaluate_source("agent forward = cot", EvaluationMode::Thorough),
            Err(HarnessError::NoTasks(EvaluationMode::Thorough))
        ));
    }
}
