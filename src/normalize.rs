//! Maps raw metrics onto a common 0..1 scale where 1 is always the
//! favourable end.

use tracing::warn;

use crate::error::{Result, ScoringError};
use crate::models::{Polarity, RangeWarning, Signal};

/// Normalized value plus the diagnostic raised when the raw input had to be
/// clamped into its declared range.
#[derive(Debug, Clone, PartialEq)]
pub struct Normalized {
    pub value: f64,
    pub warning: Option<RangeWarning>,
}

/// Normalize a signal, reporting clamping through `tracing`.
pub fn normalize(signal: &Signal) -> Result<f64> {
    normalize_checked(signal).map(|normalized| normalized.value)
}

pub fn normalize_checked(signal: &Signal) -> Result<Normalized> {
    let range = signal.valid_range;
    if range.is_degenerate() {
        return Err(ScoringError::DegenerateRange {
            key: signal.key.clone(),
            min: range.min,
            max: range.max,
        });
    }

    let raw = signal.raw_value;
    let warning = if range.contains(raw) {
        None
    } else {
        warn!(
            signal = %signal.key,
            raw,
            min = range.min,
            max = range.max,
            "raw signal outside declared range, clamping"
        );
        Some(RangeWarning {
            key: signal.key.clone(),
            raw_value: raw,
            valid_range: range,
        })
    };

    // NaN fails `contains` above and is pinned to the unfavourable end.
    let position = if raw.is_nan() {
        0.0
    } else {
        ((raw - range.min) / (range.max - range.min)).clamp(0.0, 1.0)
    };
    let value = match signal.polarity {
        Polarity::HigherBetter => position,
        Polarity::LowerBetter if raw.is_nan() => 0.0,
        Polarity::LowerBetter => 1.0 - position,
    };

    Ok(Normalized { value, warning })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::SignalRange;

    fn signal(raw: f64, min: f64, max: f64, polarity: Polarity) -> Signal {
        Signal {
            key: "metric".to_string(),
            raw_value: raw,
            valid_range: SignalRange::new(min, max),
            polarity,
        }
    }

    #[test]
    fn higher_better_scales_linearly() {
        let value = normalize(&signal(5.0, 1.0, 6.0, Polarity::HigherBetter)).unwrap();
        assert!((value - 0.8).abs() < 1e-12);
    }

    #[test]
    fn lower_better_inverts() {
        let value = normalize(&signal(10.0, 0.0, 100.0, Polarity::LowerBetter)).unwrap();
        assert!((value - 0.9).abs() < 1e-12);
    }

    #[test]
    fn out_of_range_is_clamped_and_reported() {
        let result = normalize_checked(&signal(120.0, 0.0, 100.0, Polarity::HigherBetter)).unwrap();
        assert_eq!(result.value, 1.0);
        let warning = result.warning.unwrap();
        assert_eq!(warning.raw_value, 120.0);

        let below = normalize_checked(&signal(-3.0, 0.0, 100.0, Polarity::LowerBetter)).unwrap();
        assert_eq!(below.value, 1.0);
        assert!(below.warning.is_some());
    }

    #[test]
    fn in_range_has_no_warning() {
        let result = normalize_checked(&signal(0.0, 0.0, 100.0, Polarity::HigherBetter)).unwrap();
        assert_eq!(result.value, 0.0);
        assert!(result.warning.is_none());
    }

    #[test]
    fn degenerate_range_fails_fast() {
        let err = normalize(&signal(3.0, 3.0, 3.0, Polarity::HigherBetter)).unwrap_err();
        assert_eq!(
            err,
            ScoringError::DegenerateRange {
                key: "metric".to_string(),
                min: 3.0,
                max: 3.0
            }
        );
    }

    #[test]
    fn nan_is_flagged_and_unfavourable() {
        for polarity in [Polarity::HigherBetter, Polarity::LowerBetter] {
            let result = normalize_checked(&signal(f64::NAN, 0.0, 1.0, polarity)).unwrap();
            assert_eq!(result.value, 0.0);
            assert!(result.warning.is_some());
        }
    }

    #[test]
    fn already_normalized_values_are_fixed_points() {
        for raw in [0.0, 0.25, 0.5, 0.87, 1.0] {
            let value = normalize(&signal(raw, 0.0, 1.0, Polarity::HigherBetter)).unwrap();
            let again = normalize(&signal(value, 0.0, 1.0, Polarity::HigherBetter)).unwrap();
            assert_eq!(value, again);
        }
    }
}
