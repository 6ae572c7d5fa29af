//! Composite scoring and risk classification for student and teacher
//! wellbeing signals.
//!
//! Raw signals are normalized onto 0..1, combined under a named weight
//! table into a 0..100 composite, and classified into ordinal tiers. Time
//! series get a trend direction and a stability tier; independent flags are
//! combined into compound-risk prevalence against an explicit population.
//!
//! Everything here is a pure function of its inputs.

pub mod catalog;
pub mod composite;
pub mod config;
pub mod cross_risk;
pub mod error;
pub mod models;
pub mod normalize;
pub mod provider;
pub mod report;
pub mod tiers;
pub mod trend;

pub use composite::{compute_composite, WeightTable};
pub use config::{Formula, ScoringConfig};
pub use cross_risk::{CompoundRiskRule, CrossRiskSummary, FlagCriterion};
pub use error::{Result, ScoringError};
pub use models::{
    CompositeScore, CrossRiskMembership, Observation, Polarity, ScoredSubject, Signal,
    SignalRange, TimeSeries,
};
pub use normalize::normalize;
pub use provider::{SignalProvider, SignalStore};
pub use tiers::{TierBand, TierBands};
pub use trend::{estimate_stability, estimate_trend, Direction, TrendConfig};
