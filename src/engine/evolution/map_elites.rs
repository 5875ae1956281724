//! MAP-Elites grid over (performance, api calls).
//!
//! Performance is a candidate's upper fitness bound (higher is better) and
//! cost is its `api_calls` (lower is better). Each cell keeps one elite; a
//! newcomer takes the cell only if it Pareto-dominates the incumbent.

use std::collections::BTreeMap;
use std::fmt;
use std::path::Path;
use std::str::FromStr;

use rand::Rng;
use rand::seq::IteratorRandom;
use serde::ser::SerializeMap;
use serde::{Serialize, Serializer};

use crate::schema::{Candidate, MapElitesConfig};

use super::archive::{ArchiveError, write_json};

/// Grid coordinates: performance bin, cost bin.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct CellKey {
    pub performance: usize,
    pub cost: usize,
}

impl CellKey {
    /// Key for performance bin `performance` and cost bin `cost`.
    pub fn new(performance: usize, cost: usize) -> Self {
        Self { performance, cost }
    }

    /// Human-readable niche description used to steer the proposer.
    pub fn category_label(&self) -> String {
        let accuracy = match self.performance {
            0 => "medium accuracy",
            1 => "high accuracy",
            2 => "very high accuracy",
            _ => "unknown accuracy",
        };
        let cost = match self.cost {
            0 => "few API calls",
            1 => "medium number of API calls",
            2 => "medium-high number of API calls",
            _ => "unknown API calls",
        };
        format!("{accuracy}, {cost}")
    }
}

impl fmt::Display for CellKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{},{}", self.performance, self.cost)
    }
}

/// Error parsing an `"i,j"` cell key.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("Invalid cell key: {0}")]
pub struct ParseCellKeyError(String);

impl FromStr for CellKey {
    type Err = ParseCellKeyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let err = || ParseCellKeyError(s.to_string());
        let (i, j) = s.split_once(',').ok_or_else(err)?;
        Ok(Self {
            performance: i.trim().parse().map_err(|_| err())?,
            cost: j.trim().parse().map_err(|_| err())?,
        })
    }
}

/// Axis bounds used for normalisation.
#[derive(Debug, Clone, Copy, PartialEq)]
struct Axis {
    min: f64,
    max: f64,
    bins: usize,
}

impl Axis {
    /// Observed bounds unless overridden.
    fn new(values: &[f64], min: Option<f64>, max: Option<f64>, bins: usize) -> Self {
        let observed_min = values.iter().copied().fold(f64::INFINITY, f64::min);
        let observed_max = values.iter().copied().fold(f64::NEG_INFINITY, f64::max);
        Self {
            min: min.unwrap_or(observed_min),
            max: max.unwrap_or(observed_max),
            bins: bins.max(1),
        }
    }

    /// Bin index, clamped into `0..bins`.
    fn bin(&self, value: f64) -> usize {
        let normalized = if self.max == self.min {
            0.0
        } else {
            (value - self.min) / (self.max - self.min)
        };
        let scaled = (normalized * self.bins as f64).floor();
        if scaled <= 0.0 {
            0
        } else {
            (scaled as usize).min(self.bins - 1)
        }
    }
}

/// The elite grid.
///
/// Either empty (nothing to index yet) or covering every cell of the
/// configured grid, occupied or not.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EliteMap {
    cells: BTreeMap<CellKey, Option<Candidate>>,
}

/// `(performance, cost)` for candidates carrying both.
fn coordinates(candidate: &Candidate) -> Option<(f64, u64)> {
    Some((candidate.performance()?, candidate.api_calls?))
}

/// Whether `challenger` strictly Pareto-improves on `incumbent`.
pub fn dominates(challenger: (f64, u64), incumbent: (f64, u64)) -> bool {
    let (perf, cost) = challenger;
    let (best_perf, best_cost) = incumbent;
    perf >= best_perf && cost <= best_cost && (perf > best_perf || cost < best_cost)
}

impl EliteMap {
    /// An empty map with no cells.
    pub fn empty() -> Self {
        Self::default()
    }

    /// Index `candidates` into a fresh grid.
    ///
    /// Bounds come from the observed values on each axis unless configured.
    /// Candidates missing a fitness or a cost stay out of the grid; if no
    /// candidate has one of them the result is empty.
    pub fn build(candidates: &[Candidate], config: &MapElitesConfig) -> Self {
        let performances: Vec<f64> = candidates.iter().filter_map(Candidate::performance).collect();
        let costs: Vec<f64> = candidates
            .iter()
            .filter_map(|c| c.api_calls)
            .map(|c| c as f64)
            .collect();
        if performances.is_empty() || costs.is_empty() {
            return Self::empty();
        }

        let dim1 = Axis::new(&performances, config.min_dim1, config.max_dim1, config.bins_dim1);
        let dim2 = Axis::new(
            &costs,
            config.min_dim2.map(|v| v as f64),
            config.max_dim2.map(|v| v as f64),
            config.bins_dim2,
        );

        let mut cells: BTreeMap<CellKey, Option<Candidate>> = (0..dim1.bins)
            .flat_map(|i| (0..dim2.bins).map(move |j| (CellKey::new(i, j), None)))
            .collect();

        for candidate in candidates {
            let Some((perf, cost)) = coordinates(candidate) else {
                continue;
            };
            let key = CellKey::new(dim1.bin(perf), dim2.bin(cost as f64));
            let slot = cells.entry(key).or_default();
            let replace = match slot.as_ref().and_then(coordinates) {
                None => true,
                Some(incumbent) => dominates((perf, cost), incumbent),
            };
            if replace {
                *slot = Some(candidate.clone());
            }
        }

        Self { cells }
    }

    /// Whether the map has no cells at all.
    pub fn is_empty(&self) -> bool {
        self.cells.is_empty()
    }

    /// Number of cells holding an elite.
    pub fn occupied(&self) -> usize {
        self.cells.values().filter(|c| c.is_some()).count()
    }

    /// The elite in `key`, if the cell exists and is occupied.
    pub fn get(&self, key: CellKey) -> Option<&Candidate> {
        self.cells.get(&key)?.as_ref()
    }

    /// Pick an occupied cell uniformly at random.
    pub fn sample_cell<R: Rng + ?Sized>(&self, rng: &mut R) -> Option<(CellKey, &Candidate)> {
        self.cells
            .iter()
            .filter_map(|(key, elite)| elite.as_ref().map(|e| (*key, e)))
            .choose(rng)
    }

    /// Write the grid as a `"i,j" -> elite | null` JSON object.
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<(), ArchiveError> {
        write_json(path.as_ref(), self)
    }
}

impl Serialize for EliteMap {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.cells.len()))?;
        for (key, elite) in &self.cells {
            map.serialize_entry(&key.to_string(), elite)?;
        }
        map.end()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{Fitness, Generation};
    use rand::SeedableRng;
    use rand::rngs::StdRng;
    use serde_json::json;
    use tempfile::TempDir;

    fn candidate(name: &str, upper: f64, api_calls: Option<u64>) -> Candidate {
        let mut c = Candidate::new(name, "", "agent forward = cot");
        c.generation = Some(Generation::Number(1));
        c.fitness = Some(Fitness {
            median: upper,
            lower: upper,
            upper,
        }.into());
        c.api_calls = api_calls;
        c
    }

    fn config() -> MapElitesConfig {
        MapElitesConfig::default()
    }

    #[test]
    fn test_cell_key_text() {
        let key = CellKey::new(2, 0);
        assert_eq!(key.to_string(), "2,0");
        assert_eq!("2,0".parse::<CellKey>().unwrap(), key);
        assert!("2".parse::<CellKey>().is_err());
        assert!("a,b".parse::<CellKey>().is_err());
        assert_eq!(key.category_label(), "very high accuracy, few API calls");
        assert_eq!(
            CellKey::new(5, 1).category_label(),
            "unknown accuracy, medium number of API calls"
        );
    }

    #[test]
    fn test_empty_without_api_calls() {
        let archive = vec![candidate("A", 50.0, None), candidate("B", 70.0, None)];
        let grid = EliteMap::build(&archive, &config());
        assert!(grid.is_empty());
        assert!(grid.sample_cell(&mut StdRng::seed_from_u64(0)).is_none());
        assert_eq!(serde_json::to_value(&grid).unwrap(), json!({}));
    }

    #[test]
    fn test_full_grid_and_binning() {
        let archive = vec![
            candidate("low", 10.0, Some(1)),
            candidate("mid", 50.0, Some(5)),
            candidate("top", 90.0, Some(9)),
            Candidate::new("unscored", "", "agent forward = cot"),
        ];
        let grid = EliteMap::build(&archive, &config());
        assert_eq!(grid.cells.len(), 9);
        assert_eq!(grid.occupied(), 3);
        assert_eq!(grid.get(CellKey::new(0, 0)).unwrap().name, "low");
        assert_eq!(grid.get(CellKey::new(1, 1)).unwrap().name, "mid");
        // The maximum lands in the last bin rather than past it.
        assert_eq!(grid.get(CellKey::new(2, 2)).unwrap().name, "top");

        let value = serde_json::to_value(&grid).unwrap();
        assert!(value["0,1"].is_null());
        assert_eq!(value["2,2"]["name"], json!("top"));
    }

    #[test]
    fn test_equal_bounds_normalise_to_zero() {
        let archive = vec![candidate("A", 50.0, Some(3)), candidate("B", 50.0, Some(3))];
        let grid = EliteMap::build(&archive, &config());
        assert_eq!(grid.cells.len(), 9);
        assert_eq!(grid.occupied(), 1);
        assert_eq!(grid.get(CellKey::new(0, 0)).unwrap().name, "A");

        // Only the performance axis is degenerate: cost still spreads.
        let archive = vec![candidate("A", 50.0, Some(3)), candidate("B", 50.0, Some(2))];
        let grid = EliteMap::build(&archive, &config());
        assert_eq!(grid.get(CellKey::new(0, 2)).unwrap().name, "A");
        assert_eq!(grid.get(CellKey::new(0, 0)).unwrap().name, "B");
    }

    #[test]
    fn test_cheaper_equal_performance_dominates() {
        let cfg = MapElitesConfig {
            bins_dim1: 1,
            bins_dim2: 1,
            ..config()
        };
        let archive = vec![candidate("A", 50.0, Some(3)), candidate("B", 50.0, Some(2))];
        let grid = EliteMap::build(&archive, &cfg);
        assert_eq!(grid.occupied(), 1);
        assert_eq!(grid.get(CellKey::new(0, 0)).unwrap().name, "B");
    }

    #[test]
    fn test_explicit_bounds_clamp() {
        let cfg = MapElitesConfig {
            min_dim1: Some(40.0),
            max_dim1: Some(60.0),
            min_dim2: Some(0),
            max_dim2: Some(2),
            ..config()
        };
        let archive = vec![candidate("below", 10.0, Some(0)), candidate("above", 99.0, Some(10))];
        let grid = EliteMap::build(&archive, &cfg);
        assert_eq!(grid.cells.len(), 9);
        assert_eq!(grid.get(CellKey::new(0, 0)).unwrap().name, "below");
        assert_eq!(grid.get(CellKey::new(2, 2)).unwrap().name, "above");
    }

    #[test]
    fn test_ties_keep_incumbent() {
        assert!(!dominates((50.0, 3), (50.0, 3)));
        assert!(!dominates((60.0, 4), (50.0, 3)));
        assert!(dominates((60.0, 3), (50.0, 3)));

        let archive = vec![candidate("first", 60.0, Some(4)), candidate("second", 55.0, Some(3))];
        let cfg = MapElitesConfig {
            bins_dim1: 1,
            bins_dim2: 1,
            ..config()
        };
        let grid = EliteMap::build(&archive, &cfg);
        assert_eq!(grid.get(CellKey::new(0, 0)).unwrap().name, "first");
    }

    #[test]
    fn test_rebuild_is_idempotent() {
        let archive: Vec<Candidate> = (0..12)
            .map(|i| candidate(&format!("c{i}"), (i * 7 % 100) as f64, Some(i % 5)))
            .collect();
        let a = EliteMap::build(&archive, &config());
        let b = EliteMap::build(&archive, &config());
        assert_eq!(a, b);
    }

    #[test]
    fn test_sample_only_occupied_cells() {
        let archive = vec![candidate("only", 50.0, Some(1))];
        let grid = EliteMap::build(&archive, &config());
        let mut rng = StdRng::seed_from_u64(11);
        for _ in 0..10 {
            let (key, elite) = grid.sample_cell(&mut rng).unwrap();
            assert_eq!(key, CellKey::new(0, 0));
            assert_eq!(elite.name, "only");
        }
    }

    #[test]
    fn test_save_snapshot() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("run_map_elites_gen1.json");
        let grid = EliteMap::build(&[candidate("A", 50.0, Some(1))], &config());
        grid.save(&path).unwrap();
        let value: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(value.as_object().unwrap().len(), 9);
        assert_eq!(value["0,0"]["fitness"], json!("50.00% (50.00%, 50.00%)"));
    }

    mod property_tests {
        use super::*;
        use proptest::prelude::*;

        proptest! {
            #[test]
            fn test_dominant_candidate_wins_in_any_order(
                perf in 0.0f64..100.0,
                cost in 1u64..20,
                perf_gap in 0.0f64..10.0,
                cost_gap in 0u64..5,
                better_perf in any::<bool>()
            ) {
                // A is at least as good on both axes and strictly better on one.
                let (a_perf, a_cost) = if better_perf || cost_gap == 0 {
                    (perf + perf_gap + 0.5, cost.saturating_sub(cost_gap))
                } else {
                    (perf + perf_gap, cost - cost_gap.min(cost))
                };
                let a = candidate("A", a_perf, Some(a_cost));
                let b = candidate("B", perf, Some(cost));
                let cfg = MapElitesConfig { bins_dim1: 1, bins_dim2: 1, ..MapElitesConfig::default() };

                let forward = EliteMap::build(&[a.clone(), b.clone()], &cfg);
                let backward = EliteMap::build(&[b, a], &cfg);
                prop_assert_eq!(&forward.get(CellKey::new(0, 0)).unwrap().name, "A");
                prop_assert_eq!(&backward.get(CellKey::new(0, 0)).unwrap().name, "A");
            }
        }
    }
}
