//! Fitness values: a bootstrap point estimate with its 95% interval.
//!
//! Archives store fitness as a string such as `"62.50% (55.00%, 70.00%)"`.
//! The structured [`Fitness`] is what the engine computes. A stored record
//! holds a [`FitnessText`], which keeps the text exactly as it was read so
//! that loading and saving an archive never rewrites it.

use std::fmt;
use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

static INTERVAL: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\(([\d.]+)%,\s*([\d.]+)%\)").expect("interval pattern"));
static CANONICAL: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^\s*([\d.]+)%\s*\(([\d.]+)%,\s*([\d.]+)%\)\s*$").expect("canonical pattern")
});
static MEDIAN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"Median:\s*([\d.]+)%").expect("median pattern"));

/// Point estimate and 95% confidence interval, all in percent.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Fitness {
    /// Median of the bootstrap distribution.
    pub median: f64,
    /// 2.5th percentile.
    pub lower: f64,
    /// 97.5th percentile.
    pub upper: f64,
}

impl Fitness {
    pub const ZERO: Fitness = Fitness {
        median: 0.0,
        lower: 0.0,
        upper: 0.0,
    };

    /// Parse the canonical `"<median>% (<lower>%, <upper>%)"` form.
    pub fn parse(text: &str) -> Option<Self> {
        let caps = CANONICAL.captures(text)?;
        let number = |i: usize| caps.get(i)?.as_str().parse::<f64>().ok();
        Some(Self {
            median: number(1)?,
            lower: number(2)?,
            upper: number(3)?,
        })
    }

    /// Recover whatever can be recovered from a fitness string.
    ///
    /// Accepts the canonical form as well as the older
    /// `"95% Bootstrap Confidence Interval: (l%, u%), Median: m%"` layout.
    /// Missing parts default to 0.
    pub fn from_text_lossy(text: &str) -> Self {
        if let Some(fitness) = Self::parse(text) {
            return fitness;
        }
        let (lower, upper) = interval(text).unwrap_or((0.0, 0.0));
        let median = capture_number(&MEDIAN, text).unwrap_or(0.0);
        Self {
            median,
            lower,
            upper,
        }
    }

    /// The comparable performance number used for sorting and indexing.
    pub fn performance(&self) -> f64 {
        self.upper
    }
}

/// Extract the upper interval bound from a fitness string, 0.0 if malformed.
pub fn upper_bound(text: &str) -> f64 {
    interval(text).map(|(_, upper)| upper).unwrap_or(0.0)
}

fn interval(text: &str) -> Option<(f64, f64)> {
    let caps = INTERVAL.captures(text)?;
    let lower = caps.get(1)?.as_str().parse().ok()?;
    let upper = caps.get(2)?.as_str().parse().ok()?;
    Some((lower, upper))
}

fn capture_number(pattern: &Regex, text: &str) -> Option<f64> {
    pattern.captures(text)?.get(1)?.as_str().parse().ok()
}

impl fmt::Display for Fitness {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:.2}% ({:.2}%, {:.2}%)",
            self.median, self.lower, self.upper
        )
    }
}

impl Serialize for Fitness {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

/// A fitness as stored on an archive record.
///
/// `raw` is written back verbatim; `parsed` is recovered from it with
/// [`Fitness::from_text_lossy`], so malformed text ranks as 0.
#[derive(Debug, Clone, PartialEq)]
pub struct FitnessText {
    raw: String,
    parsed: Fitness,
}

impl FitnessText {
    /// Keep `raw` as read and recover what it can from it.
    pub fn new(raw: impl Into<String>) -> Self {
        let raw = raw.into();
        let parsed = Fitness::from_text_lossy(&raw);
        Self { raw, parsed }
    }

    /// The stored text.
    pub fn as_str(&self) -> &str {
        &self.raw
    }

    /// The recovered structured value.
    pub fn fitness(&self) -> Fitness {
        self.parsed
    }

    /// Upper interval bound, 0.0 when the text is malformed.
    pub fn performance(&self) -> f64 {
        self.parsed.performance()
    }
}

impl From<Fitness> for FitnessText {
    fn from(fitness: Fitness) -> Self {
        Self {
            raw: fitness.to_string(),
            parsed: fitness,
        }
    }
}

impl fmt::Display for FitnessText {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.raw)
    }
}

impl Serialize for FitnessText {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.raw)
    }
}

impl<'de> Deserialize<'de> for FitnessText {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        String::deserialize(deserializer).map(Self::new)
    }
}
