//! Configuration types for a search experiment.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Top-level configuration for an agent search experiment.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SearchConfig {
    /// Where archives and snapshots are written.
    #[serde(default)]
    pub experiment: ExperimentConfig,
    /// Benchmark windows.
    #[serde(default)]
    pub dataset: DatasetConfig,
    /// Harness and scorer settings.
    #[serde(default)]
    pub evaluation: EvaluationConfig,
    /// Search loop settings.
    #[serde(default)]
    pub generation: GenerationConfig,
    /// Held-out evaluation pass.
    #[serde(default)]
    pub thorough: ThoroughConfig,
    /// Quality-diversity grid.
    #[serde(default)]
    pub map_elites: MapElitesConfig,
    /// Model used to propose, reflect on and debug candidates.
    #[serde(default)]
    pub proposer_model: ModelConfig,
    /// Model called from inside candidate logic.
    #[serde(default)]
    pub agent_model: ModelConfig,
    /// Random seed for bootstrap resampling and cell sampling.
    #[serde(default)]
    pub random_seed: Option<u64>,
}

/// Experiment naming and output location.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExperimentConfig {
    #[serde(default = "default_save_dir")]
    pub save_dir: PathBuf,
    #[serde(default = "default_expr_name")]
    pub expr_name: String,
}

impl Default for ExperimentConfig {
    fn default() -> Self {
        Self {
            save_dir: default_save_dir(),
            expr_name: default_expr_name(),
        }
    }
}

fn default_save_dir() -> PathBuf {
    PathBuf::from("results/")
}
fn default_expr_name() -> String {
    "mgsm_results".to_string()
}

/// Dataset location and the validation/test windows cut from it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatasetConfig {
    /// JSON array or JSON-lines file of `{inputs, targets}` records.
    #[serde(default)]
    pub path: Option<PathBuf>,
    /// Examples used while searching.
    #[serde(default = "default_valid_size")]
    pub valid_size: usize,
    /// Held-out examples used by the thorough pass.
    #[serde(default = "default_test_size")]
    pub test_size: usize,
    /// Seed for the one-time shuffle.
    #[serde(default)]
    pub shuffle_seed: u64,
    /// How many times each window is repeated.
    #[serde(default = "default_n_repeat")]
    pub n_repeat: usize,
}

impl Default for DatasetConfig {
    fn default() -> Self {
        Self {
            path: None,
            valid_size: default_valid_size(),
            test_size: default_test_size(),
            shuffle_seed: 0,
            n_repeat: default_n_repeat(),
        }
    }
}

fn default_valid_size() -> usize {
    128
}
fn default_test_size() -> usize {
    200
}
fn default_n_repeat() -> usize {
    1
}

/// How answers are compared against targets.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum AnswerMatch {
    /// Compare the last number in each string.
    #[default]
    Numeric,
    /// Trimmed, case-insensitive string equality.
    Exact,
}

/// Harness and scorer settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EvaluationConfig {
    /// Run tasks on a worker pool (otherwise strictly sequential).
    #[serde(default = "default_parallel")]
    pub parallel: bool,
    /// Upper bound on concurrent workers.
    #[serde(default = "default_max_workers")]
    pub max_workers: usize,
    /// Bootstrap resamples per fitness estimate.
    #[serde(default = "default_bootstrap_samples")]
    pub bootstrap_samples: usize,
    /// Mean outcome below which a search-mode run is degenerate.
    #[serde(default = "default_degenerate_threshold")]
    pub degenerate_threshold: f64,
    #[serde(default)]
    pub answer_match: AnswerMatch,
}

impl Default for EvaluationConfig {
    fn default() -> Self {
        Self {
            parallel: default_parallel(),
            max_workers: default_max_workers(),
            bootstrap_samples: default_bootstrap_samples(),
            degenerate_threshold: default_degenerate_threshold(),
            answer_match: AnswerMatch::default(),
        }
    }
}

fn default_parallel() -> bool {
    true
}
fn default_max_workers() -> usize {
    48
}
fn default_bootstrap_samples() -> usize {
    1000
}
fn default_degenerate_threshold() -> f64 {
    0.01
}

/// Search loop settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerationConfig {
    /// Generation index to stop at.
    #[serde(default = "default_n_generation")]
    pub n_generation: u32,
    /// Debug exchanges allowed after a failed evaluation.
    #[serde(default = "default_debug_max")]
    pub debug_max: usize,
    /// Sampling temperature for proposer turns.
    #[serde(default = "default_proposer_temperature")]
    pub proposer_temperature: f32,
    /// Give up on the run after this many abandoned attempts at one index.
    /// `None` retries forever.
    #[serde(default)]
    pub max_attempts_per_generation: Option<usize>,
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            n_generation: default_n_generation(),
            debug_max: default_debug_max(),
            proposer_temperature: default_proposer_temperature(),
            max_attempts_per_generation: None,
        }
    }
}

fn default_n_generation() -> u32 {
    20
}
fn default_debug_max() -> usize {
    5
}
fn default_proposer_temperature() -> f32 {
    0.8
}

/// Held-out evaluation pass.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ThoroughConfig {
    /// Non-initial candidates to evaluate, best first.
    #[serde(default = "default_max_agents")]
    pub max_agents: usize,
}

impl Default for ThoroughConfig {
    fn default() -> Self {
        Self {
            max_agents: default_max_agents(),
        }
    }
}

fn default_max_agents() -> usize {
    2
}

/// MAP-Elites grid over (performance, api calls).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MapElitesConfig {
    /// Bins on the performance axis.
    #[serde(default = "default_bins")]
    pub bins_dim1: usize,
    /// Bins on the cost axis.
    #[serde(default = "default_bins")]
    pub bins_dim2: usize,
    /// Explicit axis bounds; observed min/max are used when absent.
    #[serde(default)]
    pub min_dim1: Option<f64>,
    #[serde(default)]
    pub max_dim1: Option<f64>,
    #[serde(default)]
    pub min_dim2: Option<u64>,
    #[serde(default)]
    pub max_dim2: Option<u64>,
}

impl Default for MapElitesConfig {
    fn default() -> Self {
        Self {
            bins_dim1: default_bins(),
            bins_dim2: default_bins(),
            min_dim1: None,
            max_dim1: None,
            min_dim2: None,
            max_dim2: None,
        }
    }
}

fn default_bins() -> usize {
    3
}

/// External inference adapter and its rate-limit policy.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelConfig {
    /// Program and arguments; the request is written to its stdin.
    #[serde(default)]
    pub command: Vec<String>,
    #[serde(default = "default_max_retries")]
    pub max_retries: usize,
    #[serde(default = "default_initial_backoff_ms")]
    pub initial_backoff_ms: u64,
    #[serde(default = "default_max_backoff_ms")]
    pub max_backoff_ms: u64,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            command: Vec::new(),
            max_retries: default_max_retries(),
            initial_backoff_ms: default_initial_backoff_ms(),
            max_backoff_ms: default_max_backoff_ms(),
        }
    }
}

fn default_max_retries() -> usize {
    8
}
fn default_initial_backoff_ms() -> u64 {
    1000
}
fn default_max_backoff_ms() -> u64 {
    60_000
}

// ============================================================================
// Validation
// ============================================================================

/// Configuration validation errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Experiment name must not be empty")]
    EmptyExperimentName,
    #[error("Validation window must contain at least one example")]
    EmptyValidationWindow,
    #[error("Repeat count must be positive")]
    InvalidRepeat,
    #[error("Worker cap must be positive")]
    NoWorkers,
    #[error("Bootstrap sample count must be positive")]
    NoBootstrapSamples,
    #[error("MAP-Elites needs at least one bin per dimension")]
    NoBins,
    #[error("Invalid bounds: {0}")]
    InvalidBounds(String),
}

impl SearchConfig {
    /// Validate configuration parameters.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.experiment.expr_name.trim().is_empty() {
            return Err(ConfigError::EmptyExperimentName);
        }
        if self.dataset.valid_size == 0 {
            return Err(ConfigError::EmptyValidationWindow);
        }
        if self.dataset.n_repeat == 0 {
            return Err(ConfigError::InvalidRepeat);
        }
        if self.evaluation.max_workers == 0 {
            return Err(ConfigError::NoWorkers);
        }
        if self.evaluation.bootstrap_samples == 0 {
            return Err(ConfigError::NoBootstrapSamples);
        }
        if self.map_elites.bins_dim1 == 0 || self.map_elites.bins_dim2 == 0 {
            return Err(ConfigError::NoBins);
        }

        let m = &self.map_elites;
        if let (Some(lo), Some(hi)) = (m.min_dim1, m.max_dim1)
            && lo > hi
        {
            return Err(ConfigError::InvalidBounds(format!(
                "performance min ({lo}) > max ({hi})"
            )));
        }
        if let (Some(lo), Some(hi)) = (m.min_dim2, m.max_dim2)
            && lo > hi
        {
            return Err(ConfigError::InvalidBounds(format!(
                "api calls min ({lo}) > max ({hi})"
            )));
        }

        Ok(())
    }

    /// Path of the run archive.
    pub fn archive_path(&self) -> PathBuf {
        self.experiment
            .save_dir
            .join(format!("{}_run_archive.json", self.experiment.expr_name))
    }

    /// Path of the MAP-Elites snapshot written after `generation` commits.
    pub fn map_snapshot_path(&self, generation: u32) -> PathBuf {
        self.experiment.save_dir.join(format!(
            "{}_map_elites_gen{}.json",
            self.experiment.expr_name, generation
        ))
    }

    /// Path of the thorough-evaluation archive.
    pub fn evaluation_path(&self) -> PathBuf {
        self.experiment
            .save_dir
            .join(format!("{}_run_archive_evaluate.json", self.experiment.expr_name))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_valid() {
        let config = SearchConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.generation.debug_max, 5);
        assert_eq!(config.map_elites.bins_dim1, 3);
    }

    #[test]
    fn test_partial_json_uses_defaults() {
        let config: SearchConfig = serde_json::from_str(
            r#"{"experiment": {"expr_name": "demo"}, "dataset": {"valid_size": 4}}"#,
        )
        .unwrap();
        assert_eq!(config.experiment.expr_name, "demo");
        assert_eq!(config.dataset.valid_size, 4);
        assert_eq!(config.dataset.test_size, 200);
        assert_eq!(config.evaluation.max_workers, 48);
        assert_eq!(config.evaluation.answer_match, AnswerMatch::Numeric);
    }

    #[test]
    fn test_invalid_bounds() {
        let mut config = SearchConfig::default();
        config.map_elites.min_dim1 = Some(80.0);
        config.map_elites.max_dim1 = Some(20.0);
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidBounds(_))
        ));
    }

    #[test]
    fn test_paths() {
        let mut config = SearchConfig::default();
        config.experiment.save_dir = PathBuf::from("out");
        config.experiment.expr_name = "run".to_string();
        assert_eq!(config.archive_path(), PathBuf::from("out/run_run_archive.json"));
        assert_eq!(
            config.map_snapshot_path(4),
            PathBuf::from("out/run_map_elites_gen4.json")
        );
        assert_eq!(
            config.evaluation_path(),
            PathBuf::from("out/run_run_archive_evaluate.json")
        );
    }
}
