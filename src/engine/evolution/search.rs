//! Search loop controller and the thorough evaluation pass.
//!
//! One generation runs `seed select -> propose -> reflect x2 -> evaluate
//! (with debug retries) -> score -> commit`. A generation that fails at any
//! step is abandoned and the same index is attempted again; nothing is
//! written for an abandoned attempt.

use std::path::PathBuf;

use rand::SeedableRng;
use rand::rngs::StdRng;

use crate::engine::harness::{EvaluationHarness, EvaluationReport, HarnessError};
use crate::engine::strategy::{EvaluationMode, StrategyError};
use crate::schema::{Candidate, ConfigError, Fitness, Generation, SearchConfig};

use super::archive::{Archive, ArchiveError, write_json};
use super::fitness::BootstrapScorer;
use super::map_elites::EliteMap;
use super::proposer::{PromptTemplates, Proposal, Proposer, Transcript};

/// Fatal search errors. Everything else abandons a single attempt.
#[derive(Debug, thiserror::Error)]
pub enum SearchError {
    #[error(transparent)]
    Archive(#[from] ArchiveError),
    #[error("Invalid configuration: {0}")]
    Config(#[from] ConfigError),
    #[error("Generation {generation} abandoned {attempts} times in a row")]
    Stalled { generation: u32, attempts: usize },
}

/// Step of a generation, as reported on abandonment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GenerationPhase {
    Propose,
    Reflect,
    Evaluate,
    Score,
}

/// What one attempt at a generation index produced.
#[derive(Debug, Clone, PartialEq)]
pub enum GenerationOutcome {
    Committed { name: String, fitness: Fitness },
    Abandoned { phase: GenerationPhase, reason: String },
}

/// Reported after every attempt.
#[derive(Debug, Clone, PartialEq)]
pub struct SearchProgress {
    /// Generation index the attempt was for.
    pub generation: u32,
    /// Attempts made on that index so far.
    pub attempts: usize,
    pub archive_size: usize,
    pub best_performance: Option<f64>,
    pub occupied_cells: usize,
    pub outcome: GenerationOutcome,
}

/// Result of a search run.
#[derive(Debug, Clone, PartialEq)]
pub struct SearchSummary {
    /// Generation the run resumed after.
    pub start_generation: u32,
    pub final_generation: u32,
    pub committed: usize,
    pub abandoned: usize,
    /// Seed candidates scored before the first generation.
    pub initial_scored: usize,
    pub archive_size: usize,
    pub best_performance: Option<f64>,
}

/// Result of a thorough evaluation pass.
#[derive(Debug, Clone, PartialEq)]
pub struct ThoroughSummary {
    /// Candidates evaluated by this call.
    pub evaluated: usize,
    /// Candidates whose evaluation failed and were skipped.
    pub failed: usize,
    /// Entries in the evaluation archive afterwards.
    pub total: usize,
    pub path: PathBuf,
}

/// Drives the search over a persistent archive.
pub struct SearchLoop {
    config: SearchConfig,
    harness: EvaluationHarness,
    proposer: Proposer,
    prompts: Box<dyn PromptTemplates>,
    scorer: BootstrapScorer,
    rng: StdRng,
    archive: Archive,
    map: EliteMap,
}

impl SearchLoop {
    /// Validate the configuration and load (or seed) the archive.
    pub fn new(
        config: SearchConfig,
        harness: EvaluationHarness,
        proposer: Proposer,
        prompts: Box<dyn PromptTemplates>,
    ) -> Result<Self, SearchError> {
        config.validate()?;
        let archive = Archive::load_or_seed(config.archive_path())?;
        let seed = config.random_seed.unwrap_or_else(rand::random);
        let scorer = BootstrapScorer::new(config.evaluation.bootstrap_samples, Some(seed));
        let map = EliteMap::build(archive.candidates(), &config.map_elites);

        Ok(Self {
            config,
            harness,
            proposer,
            prompts,
            scorer,
            rng: StdRng::seed_from_u64(seed.wrapping_add(1)),
            archive,
            map,
        })
    }

    pub fn archive(&self) -> &Archive {
        &self.archive
    }

    pub fn map(&self) -> &EliteMap {
        &self.map
    }

    /// Run until `n_generation` generations are committed.
    pub fn run(&mut self) -> Result<SearchSummary, SearchError> {
        self.run_with_callback(|_| {})
    }

    /// Run with a progress callback invoked after every attempt.
    pub fn run_with_callback<F>(&mut self, callback: F) -> Result<SearchSummary, SearchError>
    where
        F: Fn(&SearchProgress),
    {
        let start = self.archive.resume_point();
        let target = self.config.generation.n_generation;
        if start > 0 {
            log::info!("Resuming after generation {start}");
        }

        let filled = self.archive.backfill_api_calls();
        if filled > 0 {
            log::debug!("Defaulted api_calls to 0 on {filled} candidates");
        }
        let initial_scored = self.score_unscored()?;
        self.map = EliteMap::build(self.archive.candidates(), &self.config.map_elites);

        let mut generation = start + 1;
        let mut attempts = 0;
        let mut committed = 0;
        let mut abandoned = 0;

        while generation <= target {
            log::info!("Generation {generation}");
            attempts += 1;
            let outcome = self.run_generation(generation)?;

            match &outcome {
                GenerationOutcome::Committed { name, fitness } => {
                    log::info!("Generation {generation}: committed '{name}' with fitness {fitness}");
                    committed += 1;
                }
                GenerationOutcome::Abandoned { phase, reason } => {
                    log::warn!(
                        "Generation {generation} abandoned during {phase:?} (attempt {attempts}): {reason}"
                    );
                    abandoned += 1;
                }
            }

            callback(&SearchProgress {
                generation,
                attempts,
                archive_size: self.archive.len(),
                best_performance: self.archive.best_performance(),
                occupied_cells: self.map.occupied(),
                outcome: outcome.clone(),
            });

            match outcome {
                GenerationOutcome::Committed { .. } => {
                    generation += 1;
                    attempts = 0;
                }
                GenerationOutcome::Abandoned { .. } => {
                    if let Some(max) = self.config.generation.max_attempts_per_generation
                        && attempts >= max
                    {
                        return Err(SearchError::Stalled {
                            generation,
                            attempts,
                        });
                    }
                }
            }
        }

        Ok(SearchSummary {
            start_generation: start,
            final_generation: self.archive.resume_point(),
            committed,
            abandoned,
            initial_scored,
            archive_size: self.archive.len(),
            best_performance: self.archive.best_performance(),
        })
    }

    /// Score every archived candidate that has no fitness yet.
    ///
    /// These are marked as initial. A failed evaluation leaves the candidate
    /// unscored; the archive is saved after each success.
    pub fn score_unscored(&mut self) -> Result<usize, SearchError> {
        let mut scored = 0;
        for index in 0..self.archive.len() {
            let Some(candidate) = self.archive.get_mut(index) else {
                continue;
            };
            if candidate.fitness.is_some() {
                continue;
            }
            candidate.generation = Some(Generation::Initial);
            let name = candidate.name.clone();
            let code = candidate.code.clone();
            log::info!("Initial archive: {name}");

            let result = self
                .harness
                .evaluate_source(&code, EvaluationMode::Search)
                .map_err(|e| e.to_string())
                .and_then(|report| {
                    let fitness = self.scorer.score(&report.outcomes).map_err(|e| e.to_string())?;
                    Ok((fitness, report.api_calls))
                });
            match result {
                Ok((fitness, api_calls)) => {
                    if let Some(candidate) = self.archive.get_mut(index) {
                        candidate.fitness = Some(fitness.into());
                        candidate.api_calls = Some(api_calls);
                    }
                    self.archive.save(self.config.archive_path())?;
                    scored += 1;
                }
                Err(e) => log::warn!("Failed to evaluate initial candidate '{name}': {e}"),
            }
        }
        Ok(scored)
    }

    /// Make one attempt at generation `generation`.
    ///
    /// Only persistence failures are returned as errors; every other failure
    /// abandons the attempt.
    pub fn run_generation(&mut self, generation: u32) -> Result<GenerationOutcome, SearchError> {
        let seed = self
            .map
            .sample_cell(&mut self.rng)
            .map(|(key, elite)| (elite.clone(), key.category_label()));
        let (system, user) = self.prompts.proposal(
            self.archive.candidates(),
            seed.as_ref().map(|(elite, label)| (elite, label.as_str())),
        );

        let mut transcript = Transcript::open(system, user);
        let mut proposal = match self.proposer.ask(&transcript) {
            Ok(proposal) => proposal,
            Err(e) => return Ok(abandon(GenerationPhase::Propose, e)),
        };

        let previous = if generation > 1 {
            self.archive.candidates().last()
        } else {
            None
        };
        for instruction in self.prompts.reflexion(previous) {
            transcript = transcript.followed_by(&proposal, instruction);
            proposal = match self.proposer.ask(&transcript) {
                Ok(proposal) => proposal,
                Err(e) => return Ok(abandon(GenerationPhase::Reflect, e)),
            };
        }

        let (proposal, report) = match self.evaluate_with_debug(transcript, proposal) {
            Ok(evaluated) => evaluated,
            Err(reason) => return Ok(abandon(GenerationPhase::Evaluate, reason)),
        };

        let fitness = match self.scorer.score(&report.outcomes) {
            Ok(fitness) => fitness,
            Err(e) => return Ok(abandon(GenerationPhase::Score, e)),
        };

        let mut candidate = proposal.into_candidate();
        candidate.fitness = Some(fitness.into());
        candidate.generation = Some(Generation::Number(generation));
        candidate.api_calls = Some(report.api_calls);
        let name = candidate.name.clone();
        self.commit(candidate, generation)?;

        Ok(GenerationOutcome::Committed { name, fitness })
    }

    /// Evaluate `proposal`, asking for a fix after each failure.
    ///
    /// At most `1 + debug_max` evaluations are made. A context overflow ends
    /// the attempt at once.
    fn evaluate_with_debug(
        &self,
        mut transcript: Transcript,
        mut proposal: Proposal,
    ) -> Result<(Proposal, EvaluationReport), String> {
        let debug_max = self.config.generation.debug_max;
        let mut last_error = String::new();

        for attempt in 0..=debug_max {
            match self.harness.evaluate_source(proposal.code(), EvaluationMode::Search) {
                Ok(report) if report.mean() >= self.config.evaluation.degenerate_threshold => {
                    return Ok((proposal, report));
                }
                Ok(_) => last_error = "All 0 accuracy".to_string(),
                Err(HarnessError::Strategy {
                    source: e @ StrategyError::ContextTooLong,
                    ..
                }) => return Err(e.to_string()),
                Err(e) => last_error = e.to_string(),
            }
            log::warn!("Evaluation attempt {} failed: {last_error}", attempt + 1);
            if attempt == debug_max {
                break;
            }

            transcript = transcript.followed_by(&proposal, self.prompts.debug(&last_error));
            match self.proposer.ask(&transcript) {
                Ok(revised) => proposal = revised,
                Err(e) => log::warn!("Debug request failed: {e}"),
            }
        }

        Err(format!(
            "no working candidate after {} evaluations: {last_error}",
            debug_max + 1
        ))
    }

    /// Append, persist, re-index and snapshot.
    fn commit(&mut self, candidate: Candidate, generation: u32) -> Result<(), SearchError> {
        self.archive.push(candidate);
        self.archive.save(self.config.archive_path())?;
        self.map = EliteMap::build(self.archive.candidates(), &self.config.map_elites);
        self.map.save(self.config.map_snapshot_path(generation))?;
        Ok(())
    }

    /// Candidates due for held-out evaluation: every initial candidate in
    /// archive order, then the best `max_agents` others.
    pub fn thorough_queue(archive: &Archive, max_agents: usize) -> (Vec<Candidate>, usize) {
        let mut queue: Vec<Candidate> = archive
            .candidates()
            .iter()
            .filter(|c| c.is_initial())
            .cloned()
            .collect();
        let initial_count = queue.len();
        queue.extend(archive.by_performance().into_iter().take(max_agents).cloned());
        (queue, initial_count)
    }

    /// Re-evaluate the strongest candidates on the test window.
    ///
    /// Reads the saved archive, resumes from an existing evaluation archive
    /// and saves it after every success.
    pub fn evaluate_thoroughly(&mut self) -> Result<ThoroughSummary, SearchError> {
        let archive = Archive::load(self.config.archive_path())?;
        let path = self.config.evaluation_path();
        let mut evaluated = match Archive::load(&path) {
            Ok(existing) => existing,
            Err(ArchiveError::NotFound(_)) => Archive::default(),
            Err(e) => return Err(e.into()),
        };

        let max_agents = self.config.thorough.max_agents;
        let (queue, initial_count) = Self::thorough_queue(&archive, max_agents);
        log::info!(
            "Thorough evaluation: {} queued, {} already done",
            queue.len(),
            evaluated.len()
        );

        let mut summary = ThoroughSummary {
            evaluated: 0,
            failed: 0,
            total: evaluated.len(),
            path: path.clone(),
        };

        for (index, mut candidate) in queue.into_iter().enumerate().skip(evaluated.len()) {
            if evaluated.len().saturating_sub(initial_count) >= max_agents {
                break;
            }
            log::info!(
                "Thorough evaluation {}: '{}' (generation {:?})",
                index + 1,
                candidate.name,
                candidate.generation
            );

            let result = self
                .harness
                .evaluate_source(&candidate.code, EvaluationMode::Thorough)
                .map_err(|e| e.to_string())
                .and_then(|report| self.scorer.score(&report.outcomes).map_err(|e| e.to_string()));
            match result {
                Ok(fitness) => {
                    candidate.test_fitness = Some(fitness.into());
                    evaluated.push(candidate);
                    write_json(&path, &evaluated)?;
                    summary.evaluated += 1;
                }
                Err(e) => {
                    log::warn!("Thorough evaluation of '{}' failed: {e}", candidate.name);
                    summary.failed += 1;
                }
            }
        }

        summary.total = evaluated.len();
        Ok(summary)
    }
}

fn abandon(phase: GenerationPhase, reason: impl ToString) -> GenerationOutcome {
    GenerationOutcome::Abandoned {
        phase,
        reason: reason.to_string(),
    }
}
