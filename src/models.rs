use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{Result, ScoringError};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Polarity {
    HigherBetter,
    LowerBetter,
}

impl std::str::FromStr for Polarity {
    type Err = String;

    fn from_str(value: &str) -> std::result::Result<Self, Self::Err> {
        match value.trim() {
            "higher_better" => Ok(Polarity::HigherBetter),
            "lower_better" => Ok(Polarity::LowerBetter),
            other => Err(format!(
                "unknown polarity '{other}', expected higher_better or lower_better"
            )),
        }
    }
}

/// Declared domain of a raw metric, e.g. sentiment 1..6 or a rate 0..100.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SignalRange {
    pub min: f64,
    pub max: f64,
}

impl SignalRange {
    pub const fn new(min: f64, max: f64) -> Self {
        Self { min, max }
    }

    pub fn contains(&self, value: f64) -> bool {
        value >= self.min && value <= self.max
    }

    pub(crate) fn is_degenerate(&self) -> bool {
        !(self.min.is_finite() && self.max.is_finite()) || self.max <= self.min
    }
}

/// One bounded observation of a metric about a subject.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Signal {
    pub key: String,
    pub raw_value: f64,
    pub valid_range: SignalRange,
    pub polarity: Polarity,
}

impl Signal {
    pub fn new(
        key: impl Into<String>,
        raw_value: f64,
        valid_range: SignalRange,
        polarity: Polarity,
    ) -> Result<Self> {
        let key = key.into();
        if valid_range.is_degenerate() {
            return Err(ScoringError::DegenerateRange {
                key,
                min: valid_range.min,
                max: valid_range.max,
            });
        }
        Ok(Self {
            key,
            raw_value,
            valid_range,
            polarity,
        })
    }

    pub fn higher_better(key: impl Into<String>, raw_value: f64, min: f64, max: f64) -> Result<Self> {
        Self::new(key, raw_value, SignalRange::new(min, max), Polarity::HigherBetter)
    }

    pub fn lower_better(key: impl Into<String>, raw_value: f64, min: f64, max: f64) -> Result<Self> {
        Self::new(key, raw_value, SignalRange::new(min, max), Polarity::LowerBetter)
    }
}

/// A raw value that fell outside its declared range and was clamped.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RangeWarning {
    pub key: String,
    pub raw_value: f64,
    pub valid_range: SignalRange,
}

impl std::fmt::Display for RangeWarning {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "signal '{}' value {} outside [{}, {}], clamped",
            self.key, self.raw_value, self.valid_range.min, self.valid_range.max
        )
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CompositeScore {
    pub subject_id: String,
    pub formula_name: String,
    /// Rounded half-up, always within 0..=100.
    pub value: u32,
    /// Unrounded 0..100 value for downstream trend math.
    pub unrounded: f64,
    pub component_breakdown: BTreeMap<String, f64>,
    pub weights: BTreeMap<String, f64>,
    pub warnings: Vec<RangeWarning>,
}

impl CompositeScore {
    /// The component that cost the most points, i.e. the largest gap between
    /// its weight share of 100 and its actual contribution.
    pub fn weakest_component(&self) -> Option<(&str, f64)> {
        self.component_breakdown
            .iter()
            .filter_map(|(key, contribution)| {
                let weight = self.weights.get(key)?;
                Some((key.as_str(), 100.0 * weight - contribution))
            })
            .max_by(|a, b| a.1.partial_cmp(&b.1).unwrap_or(std::cmp::Ordering::Equal))
    }

    pub fn has_warnings(&self) -> bool {
        !self.warnings.is_empty()
    }
}

/// A composite together with its tier under the formula's band set.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ScoredSubject {
    pub score: CompositeScore,
    pub tier: String,
    /// Ordinal position of the tier, 0 being the lowest band.
    pub tier_rank: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Observation {
    pub timestamp: DateTime<Utc>,
    pub value: f64,
}

/// Time-ordered observations of one signal for one subject.
///
/// Append-only: observations can only be pushed at or after the last
/// timestamp, and only with finite values.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TimeSeries {
    pub subject_id: String,
    pub signal_key: String,
    points: Vec<Observation>,
}

impl TimeSeries {
    pub fn new(subject_id: impl Into<String>, signal_key: impl Into<String>) -> Self {
        Self {
            subject_id: subject_id.into(),
            signal_key: signal_key.into(),
            points: Vec::new(),
        }
    }

    pub fn from_observations(
        subject_id: impl Into<String>,
        signal_key: impl Into<String>,
        observations: impl IntoIterator<Item = Observation>,
    ) -> Result<Self> {
        let mut series = Self::new(subject_id, signal_key);
        for observation in observations {
            series.push(observation)?;
        }
        Ok(series)
    }

    pub fn push(&mut self, observation: Observation) -> Result<()> {
        if !observation.value.is_finite() {
            return Err(ScoringError::NonFiniteSignal {
                key: self.signal_key.clone(),
                value: observation.value,
            });
        }
        if let Some(last) = self.points.last() {
            if observation.timestamp < last.timestamp {
                return Err(ScoringError::UnorderedSeries {
                    last: last.timestamp.to_rfc3339(),
                    attempted: observation.timestamp.to_rfc3339(),
                });
            }
        }
        self.points.push(observation);
        Ok(())
    }

    pub fn points(&self) -> &[Observation] {
        &self.points
    }

    pub fn values(&self) -> Vec<f64> {
        self.points.iter().map(|point| point.value).collect()
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }
}

/// Derived membership of one subject in independent risk categories.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CrossRiskMembership {
    pub subject_id: String,
    pub group: Option<String>,
    pub flags: BTreeSet<String>,
    pub is_compound_risk: bool,
}
