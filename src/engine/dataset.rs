//! Benchmark loading, the validation/test windows and answer matching.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;

use rand::SeedableRng;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use regex::Regex;

use crate::schema::{AnswerMatch, DatasetConfig, TaskExample};

use super::strategy::EvaluationMode;

static NUMBER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"-?\d[\d,]*(?:\.\d+)?").expect("number pattern"));

/// Dataset loading errors.
#[derive(Debug, thiserror::Error)]
pub enum DatasetError {
    #[error("Failed to read dataset {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("Invalid record on line {line}: {source}")]
    Record {
        line: usize,
        source: serde_json::Error,
    },
    #[error("Dataset {0} contains no examples")]
    Empty(PathBuf),
}

/// Load benchmark items from a JSON array or a JSON-lines file.
pub fn load_examples<P: AsRef<Path>>(path: P) -> Result<Vec<TaskExample>, DatasetError> {
    let path = path.as_ref();
    let content = fs::read_to_string(path).map_err(|source| DatasetError::Io {
        path: path.to_path_buf(),
        source,
    })?;

    let examples = if content.trim_start().starts_with('[') {
        serde_json::from_str(&content).map_err(|source| DatasetError::Record { line: 1, source })?
    } else {
        let mut examples = Vec::new();
        for (idx, line) in content.lines().enumerate() {
            if line.trim().is_empty() {
                continue;
            }
            let example = serde_json::from_str(line).map_err(|source| DatasetError::Record {
                line: idx + 1,
                source,
            })?;
            examples.push(example);
        }
        examples
    };

    if examples.is_empty() {
        return Err(DatasetError::Empty(path.to_path_buf()));
    }
    Ok(examples)
}

/// The shuffled benchmark cut into non-overlapping windows.
#[derive(Debug, Clone)]
pub struct TaskSet {
    validation: Vec<TaskExample>,
    test: Vec<TaskExample>,
}

impl TaskSet {
    /// Shuffle once with the configured seed and cut both windows.
    ///
    /// Windows are clipped to the available examples; each is repeated
    /// `n_repeat` times.
    pub fn new(mut examples: Vec<TaskExample>, config: &DatasetConfig) -> Self {
        let mut rng = StdRng::seed_from_u64(config.shuffle_seed);
        examples.shuffle(&mut rng);

        let valid_end = config.valid_size.min(examples.len());
        let test_end = (config.valid_size + config.test_size).min(examples.len());
        let repeat = |window: &[TaskExample]| -> Vec<TaskExample> {
            (0..config.n_repeat.max(1))
                .flat_map(|_| window.iter().cloned())
                .collect()
        };

        Self {
            validation: repeat(&examples[..valid_end]),
            test: repeat(&examples[valid_end..test_end]),
        }
    }

    /// Use the given items as-is for both modes.
    pub fn fixed(validation: Vec<TaskExample>, test: Vec<TaskExample>) -> Self {
        Self { validation, test }
    }

    /// Tasks for a run in `mode`.
    pub fn window(&self, mode: EvaluationMode) -> &[TaskExample] {
        match mode {
            EvaluationMode::Search => &self.validation,
            EvaluationMode::Thorough => &self.test,
        }
    }
}

/// Why an answer could not be scored.
#[derive(Debug, thiserror::Error)]
pub enum MatchError {
    #[error("No number in answer '{0}'")]
    NoNumber(String),
}

/// Compares a strategy's answer with the target.
pub trait AnswerScorer: Send + Sync {
    fn score(&self, answer: &str, target: &str) -> Result<bool, MatchError>;
}

/// Trimmed, case-insensitive equality.
#[derive(Debug, Clone, Copy, Default)]
pub struct ExactMatch;

impl AnswerScorer for ExactMatch {
    fn score(&self, answer: &str, target: &str) -> Result<bool, MatchError> {
        Ok(answer.trim().to_lowercase() == target.trim().to_lowercase())
    }
}

/// Compares the last number in each string, ignoring thousands separators.
#[derive(Debug, Clone, Copy, Default)]
pub struct NumericMatch;

fn last_number(text: &str) -> Option<f64> {
    NUMBER
        .find_iter(text)
        .last()?
        .as_str()
        .replace(',', "")
        .parse()
        .ok()
}

impl AnswerScorer for NumericMatch {
    fn score(&self, answer: &str, target: &str) -> Result<bool, MatchError> {
        let got = last_number(answer).ok_or_else(|| MatchError::NoNumber(answer.to_string()))?;
        match last_number(target) {
            Some(want) => Ok((got - want).abs() < 1e-9),
            None => Ok(false),
        }
    }
}

/// The scorer selected by configuration.
pub fn scorer_for(mode: AnswerMatch) -> Box<dyn AnswerScorer> {
    match mode {
        AnswerMatch::Numeric => Box::new(NumericMatch),
        AnswerMatch::Exact => Box::new(ExactMatch),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn examples(n: usize) -> Vec<TaskExample> {
        (0..n)
            .map(|i| TaskExample {
                input: format!("q{i}"),
                target: i.to_string(),
            })
            .collect()
    }

    #[test]
    fn test_load_json_array_and_lines() {
        let mut array = NamedTempFile::new().unwrap();
        write!(array, r#"[{{"inputs": "1+1", "targets": 2}}, {{"input": "2+2", "target": "4"}}]"#)
            .unwrap();
        let loaded = load_examples(array.path()).unwrap();
        assert_eq!(loaded.len(), 2);
        assert_eq!(loaded[0].target, "2");

        let mut lines = NamedTempFile::new().unwrap();
        writeln!(lines, r#"{{"inputs": "a", "targets": 1}}"#).unwrap();
        writeln!(lines).unwrap();
        writeln!(lines, r#"{{"inputs": "b", "targets": 2}}"#).unwrap();
        assert_eq!(load_examples(lines.path()).unwrap().len(), 2);

        let mut bad = NamedTempFile::new().unwrap();
        writeln!(bad, r#"{{"inputs": "a", "targets": 1}}"#).unwrap();
        writeln!(bad, "not json").unwrap();
        assert!(matches!(
            load_examples(bad.path()),
            Err(DatasetError::Record { line: 2, .. })
        ));
    }

    #[test]
    fn test_windows_do_not_overlap() {
        let config = DatasetConfig {
            valid_size: 4,
            test_size: 3,
            ..Default::default()
        };
        let set = TaskSet::new(examples(10), &config);
        let valid = set.window(EvaluationMode::Search);
        let test = set.window(EvaluationMode::Thorough);
        assert_eq!(valid.len(), 4);
        assert_eq!(test.len(), 3);
        assert!(valid.iter().all(|v| !test.contains(v)));

        // Same seed, same cut.
        let again = TaskSet::new(examples(10), &config);
        assert_eq!(again.window(EvaluationMode::Search), valid);
    }

    #[test]
    fn test_windows_clip_and_repeat() {
        let config = DatasetConfig {
            valid_size: 3,
            test_size: 10,
            n_repeat: 2,
            ..Default::default()
        };
        let set = TaskSet::new(examples(5), &config);
        assert_eq!(set.window(EvaluationMode::Search).len(), 6);
        assert_eq!(set.window(EvaluationMode::Thorough).len(), 4);
    }

    #[test]
    fn test_numeric_match() {
        let m = NumericMatch;
        assert!(m.score("The answer is 1,234.", "1234").unwrap());
        assert!(m.score("42", "42.0").unwrap());
        assert!(!m.score("41", "42").unwrap());
        assert!(m.score("no idea", "42").is_err());
    }

    #[test]
    fn test_exact_match() {
        assert!(ExactMatch.score(" Paris ", "paris").unwrap());
        assert!(!ExactMatch.score("Lyon", "Paris").unwrap());
    }
}
