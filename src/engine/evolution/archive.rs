//! Persistent candidate archive.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::schema::{Candidate, Generation, initial_archive};

/// Archive persistence errors.
#[derive(Debug, thiserror::Error)]
pub enum ArchiveError {
    #[error("Archive not found: {0}")]
    NotFound(PathBuf),
    #[error("Archive I/O error on {path}: {source}")]
    Io { path: PathBuf, source: io::Error },
    #[error("Invalid archive JSON in {path}: {source}")]
    Json {
        path: PathBuf,
        source: serde_json::Error,
    },
}

/// Ordered, append-only list of candidates.
///
/// Order is generation order; the last entry tells a resumed search where to
/// pick up.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Archive {
    candidates: Vec<Candidate>,
}

impl Archive {
    /// Wrap candidates in archive order.
    pub fn new(candidates: Vec<Candidate>) -> Self {
        Self { candidates }
    }

    /// Read an archive file; `NotFound` if it does not exist.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ArchiveError> {
        let path = path.as_ref();
        let content = match fs::read_to_string(path) {
            Ok(content) => content,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                return Err(ArchiveError::NotFound(path.to_path_buf()));
            }
            Err(source) => {
                return Err(ArchiveError::Io {
                    path: path.to_path_buf(),
                    source,
                });
            }
        };
        serde_json::from_str(&content).map_err(|source| ArchiveError::Json {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Load the archive at `path`, or start from the seed set.
    pub fn load_or_seed<P: AsRef<Path>>(path: P) -> Result<Self, ArchiveError> {
        match Self::load(&path) {
            Ok(archive) => Ok(archive),
            Err(ArchiveError::NotFound(path)) => {
                log::info!("No archive at {}, starting from the seed set", path.display());
                Ok(Self::new(initial_archive()))
            }
            Err(e) => Err(e),
        }
    }

    /// Rewrite the whole archive file.
    ///
    /// Writes to a sibling temp file first so a crash mid-write leaves the
    /// previous archive intact.
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<(), ArchiveError> {
        write_json(path.as_ref(), self)
    }

    /// Generation to resume after: the last entry's number, 0 otherwise.
    pub fn resume_point(&self) -> u32 {
        self.candidates
            .last()
            .and_then(|c| c.generation)
            .and_then(|g| g.number())
            .unwrap_or(0)
    }

    /// Give every candidate without a cost the default of 0.
    pub fn backfill_api_calls(&mut self) -> usize {
        let mut filled = 0;
        for candidate in &mut self.candidates {
            if candidate.api_calls.is_none() {
                candidate.api_calls = Some(0);
                filled += 1;
            }
        }
        filled
    }

    /// Append a record; existing entries are never reordered.
    pub fn push(&mut self, candidate: Candidate) {
        self.candidates.push(candidate);
    }

    /// Mutable access for scoring the seed set in place.
    pub fn get_mut(&mut self, index: usize) -> Option<&mut Candidate> {
        self.candidates.get_mut(index)
    }

    /// All records in archive order.
    pub fn candidates(&self) -> &[Candidate] {
        &self.candidates
    }

    /// Number of records.
    pub fn len(&self) -> usize {
        self.candidates.len()
    }

    /// Whether the archive holds no records.
    pub fn is_empty(&self) -> bool {
        self.candidates.is_empty()
    }

    /// Scored, non-initial candidates, best upper bound first.
    pub fn by_performance(&self) -> Vec<&Candidate> {
        let mut scored: Vec<&Candidate> = self
            .candidates
            .iter()
            .filter(|c| c.generation != Some(Generation::Initial) && c.fitness.is_some())
            .collect();
        scored.sort_by(|a, b| {
            b.performance()
                .unwrap_or(0.0)
                .total_cmp(&a.performance().unwrap_or(0.0))
        });
        scored
    }

    /// Best upper bound across the archive.
    pub fn best_performance(&self) -> Option<f64> {
        self.candidates
            .iter()
            .filter_map(Candidate::performance)
            .max_by(f64::total_cmp)
    }
}

/// Pretty-print `value` to `path` via a temp file and rename.
pub(crate) fn write_json<T: Serialize + ?Sized>(path: &Path, value: &T) -> Result<(), ArchiveError> {
    let io_err = |source| ArchiveError::Io {
        path: path.to_path_buf(),
        source,
    };
    if let Some(dir) = path.parent()
        && !dir.as_os_str().is_empty()
    {
        fs::create_dir_all(dir).map_err(io_err)?;
    }

    let json = serde_json::to_string_pretty(value).map_err(|source| ArchiveError::Json {
        path: path.to_path_buf(),
        source,
    })?;
    let tmp = path.with_extension("json.tmp");
    fs::write(&tmp, json).map_err(io_err)?;
    fs::rename(&tmp, path).map_err(io_err)
}
