use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{Result, ScoringError};
use crate::models::{CompositeScore, Signal};
use crate::normalize::normalize_checked;

const WEIGHT_SUM_TOLERANCE: f64 = 1e-9;

/// A named scoring formula: signal key to weight, weights summing to 1.0.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "RawWeightTable", into = "RawWeightTable")]
pub struct WeightTable {
    name: String,
    weights: BTreeMap<String, f64>,
}

#[derive(Serialize, Deserialize)]
struct RawWeightTable {
    name: String,
    weights: BTreeMap<String, f64>,
}

impl TryFrom<RawWeightTable> for WeightTable {
    type Error = ScoringError;

    fn try_from(raw: RawWeightTable) -> Result<Self> {
        WeightTable::new(raw.name, raw.weights)
    }
}

impl From<WeightTable> for RawWeightTable {
    fn from(table: WeightTable) -> Self {
        RawWeightTable {
            name: table.name,
            weights: table.weights,
        }
    }
}

impl WeightTable {
    pub fn new<K: Into<String>>(
        name: impl Into<String>,
        weights: impl IntoIterator<Item = (K, f64)>,
    ) -> Result<Self> {
        let name = name.into();
        let mut table = BTreeMap::new();
        for (key, weight) in weights {
            let key = key.into();
            if !weight.is_finite() {
                return Err(ScoringError::weight_table(
                    &name,
                    format!("weight for '{key}' is not finite"),
                ));
            }
            if weight < 0.0 {
                return Err(ScoringError::weight_table(
                    &name,
                    format!("weight for '{key}' is negative ({weight})"),
                ));
            }
            if table.insert(key.clone(), weight).is_some() {
                return Err(ScoringError::weight_table(
                    &name,
                    format!("signal '{key}' is weighted twice"),
                ));
            }
        }

        if table.is_empty() {
            return Err(ScoringError::weight_table(&name, "no weights"));
        }

        let sum: f64 = table.values().sum();
        if (sum - 1.0).abs() > WEIGHT_SUM_TOLERANCE {
            return Err(ScoringError::weight_table(
                &name,
                format!("weights sum to {sum}, expected 1.0"),
            ));
        }

        Ok(Self {
            name,
            weights: table,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn weights(&self) -> &BTreeMap<String, f64> {
        &self.weights
    }

    pub fn weight(&self, key: &str) -> Option<f64> {
        self.weights.get(key).copied()
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.weights.keys().map(String::as_str)
    }
}

/// Combine signals into a 0..100 composite under `table`.
///
/// Every weighted key must be present exactly once; extra signals are ignored.
pub fn compute_composite(
    subject_id: &str,
    signals: &[Signal],
    table: &WeightTable,
) -> Result<CompositeScore> {
    let mut by_key: BTreeMap<&str, &Signal> = BTreeMap::new();
    for signal in signals {
        if by_key.insert(signal.key.as_str(), signal).is_some() {
            return Err(ScoringError::DuplicateSignal {
                key: signal.key.clone(),
            });
        }
    }

    let mut breakdown = BTreeMap::new();
    let mut warnings = Vec::new();
    let mut total = 0.0;

    for (key, weight) in &table.weights {
        let signal = by_key
            .get(key.as_str())
            .ok_or_else(|| ScoringError::MissingSignal {
                formula: table.name.clone(),
                key: key.clone(),
            })?;
        let normalized = normalize_checked(signal)?;
        let contribution = 100.0 * weight * normalized.value;
        total += contribution;
        breakdown.insert(key.clone(), contribution);
        warnings.extend(normalized.warning);
    }

    for key in by_key.keys().filter(|key| !table.weights.contains_key(**key)) {
        debug!(subject = subject_id, formula = %table.name, signal = key, "ignoring unweighted signal");
    }

    let unrounded = total.clamp(0.0, 100.0);
    Ok(CompositeScore {
        subject_id: subject_id.to_string(),
        formula_name: table.name.clone(),
        value: round_half_up(unrounded),
        unrounded,
        component_breakdown: breakdown,
        weights: table.weights.clone(),
        warnings,
    })
}

/// Round half-up after snapping away accumulated float noise, so that a sum
/// meant to be exactly 64.5 does not land on 64.
pub(crate) fn round_half_up(value: f64) -> u32 {
    let snapped = (value * 1e9).round() / 1e9;
    (snapped + 0.5).floor().clamp(0.0, 100.0) as u32
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn success_table() -> WeightTable {
        WeightTable::new(
            "student_success",
            [("sentiment", 0.4), ("grade", 0.4), ("late_submission_rate", 0.2)],
        )
        .unwrap()
    }

    fn success_signals() -> Vec<Signal> {
        vec![
            Signal::higher_better("sentiment", 5.0, 1.0, 6.0).unwrap(),
            Signal::higher_better("grade", 92.0, 0.0, 100.0).unwrap(),
            Signal::lower_better("late_submission_rate", 10.0, 0.0, 100.0).unwrap(),
        ]
    }

    #[test]
    fn weights_must_sum_to_one() {
        for weights in [[0.5, 0.4], [0.6, 0.5]] {
            let err = WeightTable::new("t", [("a", weights[0]), ("b", weights[1])]).unwrap_err();
            assert!(matches!(err, ScoringError::InvalidWeightTable { .. }));
        }
    }

    #[test]
    fn negative_weight_rejected() {
        let err = WeightTable::new("t", [("a", 1.2), ("b", -0.2)]).unwrap_err();
        assert!(err.to_string().contains("negative"));
    }

    #[test]
    fn empty_table_rejected() {
        assert!(WeightTable::new("t", Vec::<(&str, f64)>::new()).is_err());
    }

    #[test]
    fn composite_matches_weighted_sum() {
        let score = compute_composite("s-1", &success_signals(), &success_table()).unwrap();
        assert!((score.unrounded - 86.8).abs() < 1e-9);
        assert_eq!(score.value, 87);
        assert!((score.component_breakdown["sentiment"] - 32.0).abs() < 1e-9);
        assert!((score.component_breakdown["grade"] - 36.8).abs() < 1e-9);
        assert!((score.component_breakdown["late_submission_rate"] - 18.0).abs() < 1e-9);
        assert!(score.warnings.is_empty());
    }

    #[test]
    fn missing_signal_is_an_error_not_a_default() {
        let signals = &success_signals()[..2];
        let err = compute_composite("s-1", signals, &success_table()).unwrap_err();
        assert_eq!(
            err,
            ScoringError::MissingSignal {
                formula: "student_success".to_string(),
                key: "late_submission_rate".to_string()
            }
        );
    }

    #[test]
    fn duplicate_signal_is_rejected() {
        let mut signals = success_signals();
        signals.push(Signal::higher_better("grade", 40.0, 0.0, 100.0).unwrap());
        let err = compute_composite("s-1", &signals, &success_table()).unwrap_err();
        assert!(matches!(err, ScoringError::DuplicateSignal { .. }));
    }

    #[test]
    fn extra_signals_are_ignored() {
        let mut signals = success_signals();
        signals.push(Signal::higher_better("logins", 3.0, 0.0, 7.0).unwrap());
        let score = compute_composite("s-1", &signals, &success_table()).unwrap();
        assert_eq!(score.value, 87);
        assert!(!score.component_breakdown.contains_key("logins"));
    }

    #[test]
    fn out_of_range_signal_surfaces_warning() {
        let mut signals = success_signals();
        signals[1] = Signal::higher_better("grade", 104.0, 0.0, 100.0).unwrap();
        let score = compute_composite("s-1", &signals, &success_table()).unwrap();
        assert_eq!(score.warnings.len(), 1);
        assert_eq!(score.warnings[0].key, "grade");
        assert_eq!(score.value, 90);
    }

    #[test]
    fn rounding_is_half_up() {
        assert_eq!(round_half_up(64.5), 65);
        assert_eq!(round_half_up(64.49), 64);
        assert_eq!(round_half_up(64.499_999_999_999_99), 65);
        assert_eq!(round_half_up(0.0), 0);
        assert_eq!(round_half_up(100.0), 100);
    }

    #[test]
    fn weight_table_deserialization_validates() {
        let ok: WeightTable =
            serde_json::from_str(r#"{"name":"t","weights":{"a":0.25,"b":0.75}}"#).unwrap();
        assert_eq!(ok.weight("b"), Some(0.75));
        let bad = serde_json::from_str::<WeightTable>(r#"{"name":"t","weights":{"a":0.25}}"#);
        assert!(bad.is_err());
    }
}
