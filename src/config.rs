use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::Deserialize;
use thiserror::Error;
use tracing::debug;

use crate::catalog;
use crate::composite::{compute_composite, WeightTable};
use crate::error::{Result, ScoringError};
use crate::models::{ScoredSubject, Signal};
use crate::tiers::{TierBand, TierBands};
use crate::trend::TrendConfig;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config {path}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("malformed scoring config")]
    Json(#[from] serde_json::Error),
    #[error(transparent)]
    Scoring(#[from] ScoringError),
}

/// One scoring feature: a weight table and the bands its composite is
/// classified into.
#[derive(Debug, Clone, PartialEq)]
pub struct Formula {
    table: WeightTable,
    band_set: String,
    bands: TierBands,
}

impl Formula {
    pub fn new(table: WeightTable, band_set: impl Into<String>, bands: TierBands) -> Self {
        Self {
            table,
            band_set: band_set.into(),
            bands,
        }
    }

    pub fn name(&self) -> &str {
        self.table.name()
    }

    pub fn table(&self) -> &WeightTable {
        &self.table
    }

    pub fn band_set(&self) -> &str {
        &self.band_set
    }

    pub fn bands(&self) -> &TierBands {
        &self.bands
    }

    /// Composite and tier for one subject. Either the full result or an error.
    pub fn evaluate(&self, subject_id: &str, signals: &[Signal]) -> Result<ScoredSubject> {
        let score = compute_composite(subject_id, signals, &self.table)?;
        let value = f64::from(score.value);
        let tier = self.bands.classify(value).to_string();
        let tier_rank = self.bands.rank(value);
        debug!(subject = subject_id, formula = self.name(), value = score.value, tier = %tier, "evaluated");
        Ok(ScoredSubject {
            score,
            tier,
            tier_rank,
        })
    }
}

/// Named formulas and band sets available to the scoring core.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ScoringConfig {
    formulas: BTreeMap<String, Formula>,
    band_sets: BTreeMap<String, TierBands>,
    pub trend: TrendConfig,
}

#[derive(Deserialize)]
struct ConfigFile {
    #[serde(default)]
    band_sets: BTreeMap<String, Vec<TierBand>>,
    #[serde(default)]
    formulas: Vec<FormulaEntry>,
    #[serde(default)]
    trend: TrendConfig,
}

#[derive(Deserialize)]
struct FormulaEntry {
    name: String,
    weights: BTreeMap<String, f64>,
    bands: String,
}

impl ScoringConfig {
    pub fn empty() -> Self {
        Self::default()
    }

    /// Parse a JSON config. Band sets not defined in the file fall back to
    /// the built-in sets of the same name.
    pub fn from_json_str(json: &str) -> std::result::Result<Self, ConfigError> {
        let file: ConfigFile = serde_json::from_str(json)?;

        let mut config = Self::empty();
        for (name, bands) in catalog::band_sets() {
            config.insert_band_set(name, bands);
        }
        for (name, bands) in file.band_sets {
            let bands = if name == catalog::STABILITY_BANDS {
                let upper = bands.last().map(|band| band.max_exclusive).unwrap_or(f64::INFINITY);
                TierBands::with_domain(bands, 0.0, upper)?
            } else {
                TierBands::new(bands)?
            };
            config.insert_band_set(name, bands);
        }
        for entry in file.formulas {
            let table = WeightTable::new(entry.name, entry.weights)?;
            let bands = config.require_band_set(table.name(), &entry.bands)?;
            config.insert_formula(Formula::new(table, entry.bands, bands));
        }
        config.trend = file.trend;
        Ok(config)
    }

    pub fn from_json_path(path: &Path) -> std::result::Result<Self, ConfigError> {
        let json = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_json_str(&json)
    }

    pub fn insert_band_set(&mut self, name: impl Into<String>, bands: TierBands) {
        self.band_sets.insert(name.into(), bands);
    }

    pub fn insert_formula(&mut self, formula: Formula) {
        self.formulas.insert(formula.name().to_string(), formula);
    }

    pub fn formula(&self, name: &str) -> Result<&Formula> {
        self.formulas
            .get(name)
            .ok_or_else(|| ScoringError::UnknownFormula(name.to_string()))
    }

    pub fn formulas(&self) -> impl Iterator<Item = &Formula> {
        self.formulas.values()
    }

    pub fn band_set(&self, name: &str) -> Option<&TierBands> {
        self.band_sets.get(name)
    }

    pub fn stability_bands(&self) -> TierBands {
        self.band_set(catalog::STABILITY_BANDS)
            .cloned()
            .unwrap_or_else(catalog::stability_bands)
    }

    pub(crate) fn require_band_set(&self, formula: &str, band_set: &str) -> Result<TierBands> {
        self.band_set(band_set).cloned().ok_or_else(|| {
            ScoringError::bands(format!(
                "formula '{formula}' references unknown band set '{band_set}'"
            ))
        })
    }
}
