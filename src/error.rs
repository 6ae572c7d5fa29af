use thiserror::Error;

pub type Result<T> = std::result::Result<T, ScoringError>;

/// Failures raised by the scoring core.
///
/// Every variant is synchronous and final for the call that produced it. A
/// failed composite never yields a partial score.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ScoringError {
    #[error("signal '{key}' has a degenerate range [{min}, {max}]")]
    DegenerateRange { key: String, min: f64, max: f64 },

    #[error("formula '{formula}' requires signal '{key}' which was not supplied")]
    MissingSignal { formula: String, key: String },

    #[error("signal '{key}' has non-finite value {value}")]
    NonFiniteSignal { key: String, value: f64 },

    #[error("signal '{key}' was supplied more than once")]
    DuplicateSignal { key: String },

    #[error("invalid weight table '{name}': {reason}")]
    InvalidWeightTable { name: String, reason: String },

    #[error("invalid tier bands: {0}")]
    InvalidTierBands(String),

    #[error("observation at {attempted} precedes the last observation at {last}")]
    UnorderedSeries { last: String, attempted: String },

    #[error("population {population} is smaller than the {members} memberships supplied")]
    InvalidPopulation { population: usize, members: usize },

    #[error("subject '{0}' appears more than once")]
    DuplicateSubject(String),

    #[error("compound risk rule requires at least one flag")]
    EmptyCompoundRule,

    #[error("unknown formula '{0}'")]
    UnknownFormula(String),
}

impl ScoringError {
    pub(crate) fn weight_table(name: &str, reason: impl Into<String>) -> Self {
        ScoringError::InvalidWeightTable {
            name: name.to_string(),
            reason: reason.into(),
        }
    }

    pub(crate) fn bands(reason: impl Into<String>) -> Self {
        ScoringError::InvalidTierBands(reason.into())
    }
}
