//! Built-in weight tables, band sets and standard signal declarations.
//!
//! The numbers here are product policy, not methodology. Deployments that
//! disagree override them through a JSON config (see `config`).

use crate::composite::WeightTable;
use crate::config::{Formula, ScoringConfig};
use crate::error::Result;
use crate::models::{Polarity, Signal, SignalRange};
use crate::tiers::TierBands;

pub const RISK_BANDS: &str = "risk";
pub const QUALITY_BANDS: &str = "quality";
pub const ENGAGEMENT_BANDS: &str = "engagement";
pub const STABILITY_BANDS: &str = "stability";

/// Declared range and polarity for a well-known signal key.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SignalDeclaration {
    pub key: &'static str,
    pub range: SignalRange,
    pub polarity: Polarity,
}

impl SignalDeclaration {
    pub fn observe(&self, raw_value: f64) -> Signal {
        Signal {
            key: self.key.to_string(),
            raw_value,
            valid_range: self.range,
            polarity: self.polarity,
        }
    }
}

const fn declare(key: &'static str, min: f64, max: f64, polarity: Polarity) -> SignalDeclaration {
    SignalDeclaration {
        key,
        range: SignalRange::new(min, max),
        polarity,
    }
}

const STANDARD_SIGNALS: &[SignalDeclaration] = &[
    // Pulse survey sentiment, 1 (very negative) to 6 (very positive).
    declare("sentiment", 1.0, 6.0, Polarity::HigherBetter),
    declare("class_sentiment", 1.0, 6.0, Polarity::HigherBetter),
    declare("grade", 0.0, 100.0, Polarity::HigherBetter),
    declare("attendance_rate", 0.0, 100.0, Polarity::HigherBetter),
    declare("participation_rate", 0.0, 100.0, Polarity::HigherBetter),
    declare("assignment_completion_rate", 0.0, 100.0, Polarity::HigherBetter),
    declare("resource_usage_rate", 0.0, 100.0, Polarity::HigherBetter),
    declare("late_submission_rate", 0.0, 100.0, Polarity::LowerBetter),
    declare("login_frequency", 0.0, 7.0, Polarity::HigherBetter),
    declare("feedback_frequency", 0.0, 7.0, Polarity::HigherBetter),
    declare("response_time_hours", 0.0, 72.0, Polarity::LowerBetter),
    declare("pulse_frequency_score", 0.0, 25.0, Polarity::HigherBetter),
    declare("feedback_frequency_score", 0.0, 25.0, Polarity::HigherBetter),
    declare("response_time_score", 0.0, 25.0, Polarity::HigherBetter),
    declare("platform_activity_score", 0.0, 25.0, Polarity::HigherBetter),
];

pub fn declaration(key: &str) -> Option<SignalDeclaration> {
    STANDARD_SIGNALS.iter().find(|decl| decl.key == key).copied()
}

pub fn standard_signals() -> &'static [SignalDeclaration] {
    STANDARD_SIGNALS
}

/// Low composites are the dangerous end, so the bottom band is Critical.
pub fn risk_bands() -> TierBands {
    fixed_bands(&[("Critical", 0.0), ("High", 25.0), ("Medium", 50.0), ("Low", 75.0)])
}

pub fn quality_bands() -> TierBands {
    fixed_bands(&[
        ("At-Risk", 0.0),
        ("Struggling", 40.0),
        ("Stable", 60.0),
        ("Thriving", 80.0),
    ])
}

pub fn engagement_bands() -> TierBands {
    fixed_bands(&[
        ("Disengaged", 0.0),
        ("Moderately Engaged", 50.0),
        ("Engaged", 70.0),
        ("Highly Engaged", 85.0),
    ])
}

/// Bands over population standard deviation, unbounded above.
pub fn stability_bands() -> TierBands {
    TierBands::from_thresholds_in(
        [
            ("Very Stable", 0.0),
            ("Stable", 0.5),
            ("Moderate", 1.0),
            ("Volatile", 1.5),
            ("Very Volatile", 2.0),
        ],
        0.0,
        f64::INFINITY,
    )
    .expect("built-in stability bands are contiguous")
}

fn fixed_bands(thresholds: &[(&str, f64)]) -> TierBands {
    TierBands::from_thresholds(thresholds.iter().copied())
        .expect("built-in band thresholds are ascending")
}

pub fn band_sets() -> Vec<(&'static str, TierBands)> {
    vec![
        (RISK_BANDS, risk_bands()),
        (QUALITY_BANDS, quality_bands()),
        (ENGAGEMENT_BANDS, engagement_bands()),
        (STABILITY_BANDS, stability_bands()),
    ]
}

/// The stock formulas, each a weight table paired with a band set.
pub fn builtin() -> Result<ScoringConfig> {
    let formulas = [
        (
            WeightTable::new(
                "early_warning",
                [
                    ("sentiment", 0.3),
                    ("grade", 0.3),
                    ("attendance_rate", 0.2),
                    ("assignment_completion_rate", 0.2),
                ],
            )?,
            RISK_BANDS,
        ),
        (
            WeightTable::new(
                "student_success",
                [("sentiment", 0.4), ("grade", 0.4), ("late_submission_rate", 0.2)],
            )?,
            QUALITY_BANDS,
        ),
        (
            WeightTable::new(
                "teacher_engagement",
                [
                    ("pulse_frequency_score", 0.25),
                    ("feedback_frequency_score", 0.25),
                    ("response_time_score", 0.25),
                    ("platform_activity_score", 0.25),
                ],
            )?,
            ENGAGEMENT_BANDS,
        ),
        (
            WeightTable::new(
                "teacher_support",
                [
                    ("class_sentiment", 0.35),
                    ("response_time_hours", 0.25),
                    ("feedback_frequency", 0.2),
                    ("resource_usage_rate", 0.2),
                ],
            )?,
            QUALITY_BANDS,
        ),
        (
            WeightTable::new(
                "academic_risk_drivers",
                [
                    ("grade", 0.35),
                    ("attendance_rate", 0.25),
                    ("late_submission_rate", 0.2),
                    ("participation_rate", 0.2),
                ],
            )?,
            RISK_BANDS,
        ),
        (
            WeightTable::new(
                "disengagement",
                [
                    ("login_frequency", 0.3),
                    ("participation_rate", 0.3),
                    ("assignment_completion_rate", 0.2),
                    ("sentiment", 0.2),
                ],
            )?,
            RISK_BANDS,
        ),
    ];

    let mut config = ScoringConfig::empty();
    for (name, bands) in band_sets() {
        config.insert_band_set(name, bands);
    }
    for (table, band_set) in formulas {
        let bands = config.require_band_set(table.name(), band_set)?;
        config.insert_formula(Formula::new(table, band_set, bands));
    }
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builtin_formulas_load() {
        let config = builtin().unwrap();
        let names: Vec<&str> = config.formulas().map(|formula| formula.name()).collect();
        assert_eq!(
            names,
            vec![
                "academic_risk_drivers",
                "disengagement",
                "early_warning",
                "student_success",
                "teacher_engagement",
                "teacher_support",
            ]
        );
    }

    #[test]
    fn every_formula_key_has_a_standard_declaration() {
        let config = builtin().unwrap();
        for formula in config.formulas() {
            for key in formula.table().keys() {
                assert!(declaration(key).is_some(), "{key} has no declaration");
            }
        }
    }

    #[test]
    fn builtin_band_sets_are_valid() {
        let sets = band_sets();
        assert_eq!(sets.len(), 4);
        assert_eq!(risk_bands().classify(10.0), "Critical");
        assert_eq!(quality_bands().classify(100.0), "Thriving");
        assert_eq!(stability_bands().classify(0.7), "Stable");
    }

    #[test]
    fn declarations_observe_with_declared_range() {
        let signal = declaration("response_time_hours").unwrap().observe(12.0);
        assert_eq!(signal.polarity, Polarity::LowerBetter);
        assert_eq!(signal.valid_range, SignalRange::new(0.0, 72.0));
        assert!(declaration("shoe_size").is_none());
    }
}
