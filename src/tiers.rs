//! Ordinal classification of scores through half-open threshold bands.
//!
//! Bands are validated once at construction: ascending, contiguous and
//! covering the whole domain. The last band is closed on both ends so the
//! domain's upper bound (100 for composites) lands in the top tier.

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::{Result, ScoringError};

pub const SCORE_MIN: f64 = 0.0;
pub const SCORE_MAX: f64 = 100.0;

const BOUNDARY_TOLERANCE: f64 = 1e-9;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TierBand {
    pub label: String,
    pub min_inclusive: f64,
    pub max_exclusive: f64,
}

impl TierBand {
    pub fn new(label: impl Into<String>, min_inclusive: f64, max_exclusive: f64) -> Self {
        Self {
            label: label.into(),
            min_inclusive,
            max_exclusive,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "Vec<TierBand>", into = "Vec<TierBand>")]
pub struct TierBands {
    bands: Vec<TierBand>,
}

impl TryFrom<Vec<TierBand>> for TierBands {
    type Error = ScoringError;

    fn try_from(bands: Vec<TierBand>) -> Result<Self> {
        TierBands::new(bands)
    }
}

impl From<TierBands> for Vec<TierBand> {
    fn from(bands: TierBands) -> Self {
        bands.bands
    }
}

impl TierBands {
    /// Bands over the composite score domain `[0, 100]`.
    pub fn new(bands: Vec<TierBand>) -> Result<Self> {
        Self::with_domain(bands, SCORE_MIN, SCORE_MAX)
    }

    /// Bands over an arbitrary domain. `upper` may be `f64::INFINITY`.
    ///
    /// Boundaries within `BOUNDARY_TOLERANCE` of each other are snapped
    /// together so the stored bands are exactly contiguous.
    pub fn with_domain(mut bands: Vec<TierBand>, lower: f64, upper: f64) -> Result<Self> {
        if bands.is_empty() {
            return Err(ScoringError::bands("at least one band is required"));
        }
        if !lower.is_finite() || upper.is_nan() || upper <= lower {
            return Err(ScoringError::bands(format!(
                "domain [{lower}, {upper}] is empty"
            )));
        }

        for band in &bands {
            if band.min_inclusive.is_nan() || band.max_exclusive.is_nan() {
                return Err(ScoringError::bands(format!(
                    "band '{}' has a NaN bound",
                    band.label
                )));
            }
            if band.max_exclusive <= band.min_inclusive {
                return Err(ScoringError::bands(format!(
                    "band '{}' is empty or inverted: [{}, {})",
                    band.label, band.min_inclusive, band.max_exclusive
                )));
            }
        }

        let first = &mut bands[0];
        if !boundary_eq(first.min_inclusive, lower) {
            return Err(ScoringError::bands(format!(
                "first band '{}' starts at {}, expected {lower}",
                first.label, first.min_inclusive
            )));
        }
        first.min_inclusive = lower;

        for index in 1..bands.len() {
            let (current, next) = (&bands[index - 1], &bands[index]);
            if next.min_inclusive < current.min_inclusive {
                return Err(ScoringError::bands(format!(
                    "bands are not ascending: '{}' follows '{}'",
                    next.label, current.label
                )));
            }
            if !boundary_eq(current.max_exclusive, next.min_inclusive) {
                let kind = if next.min_inclusive > current.max_exclusive {
                    "gap"
                } else {
                    "overlap"
                };
                return Err(ScoringError::bands(format!(
                    "{kind} between '{}' (ends {}) and '{}' (starts {})",
                    current.label, current.max_exclusive, next.label, next.min_inclusive
                )));
            }
            let boundary = current.max_exclusive;
            bands[index].min_inclusive = boundary;
        }

        let last_index = bands.len() - 1;
        let last = &mut bands[last_index];
        if !boundary_eq(last.max_exclusive, upper) {
            return Err(ScoringError::bands(format!(
                "last band '{}' ends at {}, expected {upper}",
                last.label, last.max_exclusive
            )));
        }
        last.max_exclusive = upper;

        Ok(Self { bands })
    }

    /// Build ascending bands over `[0, 100]` from `(label, lower bound)`
    /// pairs; each band ends where the next begins and the last ends at 100.
    /// The first threshold must be 0.
    pub fn from_thresholds<L: Into<String>>(thresholds: impl IntoIterator<Item = (L, f64)>) -> Result<Self> {
        Self::from_thresholds_in(thresholds, SCORE_MIN, SCORE_MAX)
    }

    /// As `from_thresholds`, over the domain `[lower, upper]`.
    pub fn from_thresholds_in<L: Into<String>>(
        thresholds: impl IntoIterator<Item = (L, f64)>,
        lower: f64,
        upper: f64,
    ) -> Result<Self> {
        let pairs: Vec<(String, f64)> = thresholds
            .into_iter()
            .map(|(label, min)| (label.into(), min))
            .collect();
        let bands = pairs
            .iter()
            .enumerate()
            .map(|(index, (label, min))| {
                let max = pairs.get(index + 1).map(|(_, next)| *next).unwrap_or(upper);
                TierBand::new(label.clone(), *min, max)
            })
            .collect();
        Self::with_domain(bands, lower, upper)
    }

    pub fn bands(&self) -> &[TierBand] {
        &self.bands
    }

    pub fn labels(&self) -> impl Iterator<Item = &str> {
        self.bands.iter().map(|band| band.label.as_str())
    }

    pub fn lower(&self) -> f64 {
        self.bands[0].min_inclusive
    }

    pub fn upper(&self) -> f64 {
        self.bands[self.bands.len() - 1].max_exclusive
    }

    /// Label of the band containing `score`.
    pub fn classify(&self, score: f64) -> &str {
        &self.bands[self.rank(score)].label
    }

    /// Ordinal index of the band containing `score`, 0 being the lowest.
    pub fn rank(&self, score: f64) -> usize {
        let score = self.clamp_into_domain(score);
        // Bands are exactly contiguous, so the containing band is the last one
        // starting at or below the score. Only the upper bound itself reaches
        // the top band without starting inside it.
        self.bands
            .partition_point(|band| band.min_inclusive <= score)
            .saturating_sub(1)
    }

    fn clamp_into_domain(&self, score: f64) -> f64 {
        let (lower, upper) = (self.lower(), self.upper());
        if score.is_nan() {
            warn!("classifying NaN score, assigning lowest band");
            return lower;
        }
        if score < lower || score > upper {
            warn!(score, lower, upper, "score outside band domain, clamping");
        }
        score.clamp(lower, upper)
    }
}

fn boundary_eq(a: f64, b: f64) -> bool {
    a == b || (a - b).abs() <= BOUNDARY_TOLERANCE
}
