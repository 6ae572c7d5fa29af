use std::collections::BTreeMap;

use chrono::{Datelike, Duration, NaiveDate};
use serde::{Deserialize, Serialize};

use crate::catalog;
use crate::models::TimeSeries;
use crate::tiers::TierBands;

const EPSILON: f64 = 1e-12;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrendConfig {
    /// Relative change between the earliest and latest thirds that still
    /// counts as stable.
    pub dead_band: f64,
}

impl Default for TrendConfig {
    fn default() -> Self {
        Self { dead_band: 0.05 }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    Increasing,
    Decreasing,
    Stable,
}

impl Direction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Direction::Increasing => "increasing",
            Direction::Decreasing => "decreasing",
            Direction::Stable => "stable",
        }
    }
}

impl std::fmt::Display for Direction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Trend {
    pub direction: Direction,
    /// Least-squares slope of value per observation step.
    pub slope: f64,
    /// Relative change of the latest third's mean over the earliest third's.
    pub relative_change: f64,
}

impl Trend {
    fn flat() -> Self {
        Self {
            direction: Direction::Stable,
            slope: 0.0,
            relative_change: 0.0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Stability {
    pub std_dev: f64,
    pub label: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WeeklyMean {
    pub week_start: NaiveDate,
    pub mean: f64,
    pub count: usize,
}

/// Direction and slope of a series. `TimeSeries` only holds finite values,
/// so every relative change here is a number or a signed infinity.
pub fn estimate_trend(series: &TimeSeries, config: &TrendConfig) -> Trend {
    let values = series.values();
    if values.len() < 2 || values.iter().all(|value| *value == values[0]) {
        return Trend::flat();
    }

    let third = (values.len() / 3).max(1);
    let early = mean(&values[..third]);
    let recent = mean(&values[values.len() - third..]);
    let relative_change = relative_change(early, recent);

    let direction = if relative_change.abs() <= config.dead_band {
        Direction::Stable
    } else if relative_change > 0.0 {
        Direction::Increasing
    } else {
        Direction::Decreasing
    };

    Trend {
        direction,
        slope: least_squares_slope(&values),
        relative_change,
    }
}

/// Stability under the standard std-dev bands.
pub fn estimate_stability(series: &TimeSeries) -> Stability {
    estimate_stability_with(series, &catalog::stability_bands())
}

pub fn estimate_stability_with(series: &TimeSeries, bands: &TierBands) -> Stability {
    let values = series.values();
    let std_dev = if values.len() < 2 {
        0.0
    } else {
        population_std_dev(&values)
    };
    Stability {
        std_dev,
        label: bands.classify(std_dev).to_string(),
    }
}

/// Mean value per ISO week (weeks start on Monday), oldest first.
pub fn weekly_means(series: &TimeSeries) -> Vec<WeeklyMean> {
    let mut buckets: BTreeMap<NaiveDate, (f64, usize)> = BTreeMap::new();
    for point in series.points() {
        let day = point.timestamp.date_naive();
        let week_start = day - Duration::days(i64::from(day.weekday().num_days_from_monday()));
        let entry = buckets.entry(week_start).or_insert((0.0, 0));
        entry.0 += point.value;
        entry.1 += 1;
    }

    buckets
        .into_iter()
        .map(|(week_start, (total, count))| WeeklyMean {
            week_start,
            mean: total / count as f64,
            count,
        })
        .collect()
}

fn mean(values: &[f64]) -> f64 {
    values.iter().sum::<f64>() / values.len() as f64
}

fn relative_change(early: f64, recent: f64) -> f64 {
    let delta = recent - early;
    if early.abs() > EPSILON {
        delta / early.abs()
    } else if delta.abs() <= EPSILON {
        0.0
    } else {
        // Any movement away from a zero baseline is outside every dead-band.
        f64::INFINITY.copysign(delta)
    }
}

fn least_squares_slope(values: &[f64]) -> f64 {
    let n = values.len() as f64;
    let x_mean = (n - 1.0) / 2.0;
    let y_mean = mean(values);
    let (numerator, denominator) = values
        .iter()
        .enumerate()
        .fold((0.0, 0.0), |(num, den), (index, value)| {
            let dx = index as f64 - x_mean;
            (num + dx * (value - y_mean), den + dx * dx)
        });
    numerator / denominator
}

fn population_std_dev(values: &[f64]) -> f64 {
    let avg = mean(values);
    let variance = values.iter().map(|value| (value - avg).powi(2)).sum::<f64>() / values.len() as f64;
    variance.sqrt()
}
