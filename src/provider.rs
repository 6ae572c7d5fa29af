use std::collections::BTreeMap;
use std::io::Read;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::Deserialize;
use thiserror::Error;
use tracing::debug;

use crate::catalog;
use crate::error::ScoringError;
use crate::models::{Observation, Polarity, Signal, SignalRange, TimeSeries};

#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("failed to open signal file {path}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("malformed signal row")]
    Csv(#[from] csv::Error),
    #[error("line {line}: signal '{key}' has no range/polarity and is not a standard signal")]
    UndeclaredSignal { line: u64, key: String },
    #[error("unknown subject '{0}'")]
    UnknownSubject(String),
    #[error("no timestamped observations of '{key}' for subject '{subject}'")]
    NoSeries { subject: String, key: String },
    #[error(transparent)]
    Scoring(#[from] ScoringError),
}

/// Supplies signals for a subject. Whether values are live or simulated is
/// the provider's business; scoring only sees `Signal`s and `TimeSeries`.
pub trait SignalProvider {
    fn subjects(&self) -> Vec<String>;

    fn group_of(&self, subject_id: &str) -> Option<String>;

    /// Current value of every signal recorded for the subject.
    fn signals_for(&self, subject_id: &str) -> Result<Vec<Signal>, ProviderError>;

    fn series_for(&self, subject_id: &str, signal_key: &str) -> Result<TimeSeries, ProviderError>;
}

#[derive(Debug, Deserialize)]
struct CsvRow {
    subject_id: String,
    #[serde(default)]
    group: Option<String>,
    key: String,
    raw_value: f64,
    #[serde(default)]
    min: Option<f64>,
    #[serde(default)]
    max: Option<f64>,
    #[serde(default)]
    polarity: Option<Polarity>,
    #[serde(default)]
    timestamp: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone)]
struct Recorded {
    signal: Signal,
    timestamp: Option<DateTime<Utc>>,
}

#[derive(Debug, Default)]
struct SubjectRecord {
    group: Option<String>,
    signals: BTreeMap<String, Vec<Recorded>>,
}

/// In-memory signal history keyed by subject, loadable from CSV.
///
/// The current value of a signal is its latest timestamped observation;
/// untimestamped rows rank after all timestamped ones, later rows winning.
#[derive(Debug, Default)]
pub struct SignalStore {
    subjects: BTreeMap<String, SubjectRecord>,
}

impl SignalStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_path(path: &Path) -> Result<Self, ProviderError> {
        let file = std::fs::File::open(path).map_err(|source| ProviderError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_reader(file)
    }

    /// Columns: `subject_id,group,key,raw_value,min,max,polarity,timestamp`.
    /// `min`, `max` and `polarity` may be left empty for standard signals.
    pub fn from_reader<R: Read>(reader: R) -> Result<Self, ProviderError> {
        let mut reader = csv::ReaderBuilder::new().trim(csv::Trim::All).from_reader(reader);
        let mut store = Self::new();
        let mut rows = 0usize;

        for result in reader.deserialize::<CsvRow>() {
            let row = result?;
            rows += 1;
            let line = rows as u64 + 1;
            let signal = match (row.min, row.max, row.polarity) {
                (Some(min), Some(max), Some(polarity)) => Signal {
                    key: row.key,
                    raw_value: row.raw_value,
                    valid_range: SignalRange::new(min, max),
                    polarity,
                },
                _ => catalog::declaration(&row.key)
                    .ok_or_else(|| ProviderError::UndeclaredSignal {
                        line,
                        key: row.key.clone(),
                    })?
                    .observe(row.raw_value),
            };
            store.record(&row.subject_id, row.group, signal, row.timestamp);
        }

        debug!(rows, subjects = store.subjects.len(), "loaded signal rows");
        Ok(store)
    }

    /// Record one observation. A degenerate range is kept as supplied and
    /// surfaces when the subject is scored.
    pub fn record(
        &mut self,
        subject_id: &str,
        group: Option<String>,
        signal: Signal,
        timestamp: Option<DateTime<Utc>>,
    ) {
        let subject = self.subjects.entry(subject_id.to_string()).or_default();
        if subject.group.is_none() {
            subject.group = group.filter(|group| !group.is_empty());
        }
        subject
            .signals
            .entry(signal.key.clone())
            .or_default()
            .push(Recorded { signal, timestamp });
    }

    pub fn len(&self) -> usize {
        self.subjects.len()
    }

    pub fn is_empty(&self) -> bool {
        self.subjects.is_empty()
    }

    fn subject(&self, subject_id: &str) -> Result<&SubjectRecord, ProviderError> {
        self.subjects
            .get(subject_id)
            .ok_or_else(|| ProviderError::UnknownSubject(subject_id.to_string()))
    }
}

fn in_time_order(history: &[Recorded]) -> Vec<&Recorded> {
    let mut ordered: Vec<&Recorded> = history.iter().collect();
    ordered.sort_by_key(|recorded| (recorded.timestamp.is_none(), recorded.timestamp));
    ordered
}

impl SignalProvider for SignalStore {
    fn subjects(&self) -> Vec<String> {
        self.subjects.keys().cloned().collect()
    }

    fn group_of(&self, subject_id: &str) -> Option<String> {
        self.subjects.get(subject_id)?.group.clone()
    }

    fn signals_for(&self, subject_id: &str) -> Result<Vec<Signal>, ProviderError> {
        let subject = self.subject(subject_id)?;
        Ok(subject
            .signals
            .values()
            .filter_map(|history| in_time_order(history).last().map(|recorded| recorded.signal.clone()))
            .collect())
    }

    fn series_for(&self, subject_id: &str, signal_key: &str) -> Result<TimeSeries, ProviderError> {
        let subject = self.subject(subject_id)?;
        let observations: Vec<Observation> = subject
            .signals
            .get(signal_key)
            .map(|history| {
                in_time_order(history)
                    .into_iter()
                    .filter_map(|recorded| {
                        recorded.timestamp.map(|timestamp| Observation {
                            timestamp,
                            value: recorded.signal.raw_value,
                        })
                    })
                    .collect()
            })
            .unwrap_or_default();

        if observations.is_empty() {
            return Err(ProviderError::NoSeries {
                subject: subject_id.to_string(),
                key: signal_key.to_string(),
            });
        }
        Ok(TimeSeries::from_observations(subject_id, signal_key, observations)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use indoc::indoc;
    use pretty_assertions::assert_eq;

    const SIGNALS: &str = indoc! {"
        subject_id,group,key,raw_value,min,max,polarity,timestamp
        s-1,Grade 9,sentiment,4,,,,2026-02-02T09:00:00Z
        s-1,Grade 9,sentiment,5,,,,2026-02-09T09:00:00Z
        s-1,,sentiment,3,,,,2026-01-26T09:00:00Z
        s-1,Grade 9,grade,92,,,,
        s-1,Grade 9,focus_minutes,40,0,60,higher_better,2026-02-09T09:00:00Z
        s-2,Grade 10,late_submission_rate,10,,,,
    "};

    #[test]
    fn latest_observation_is_current() {
        let store = SignalStore::from_reader(SIGNALS.as_bytes()).unwrap();
        assert_eq!(store.subjects(), vec!["s-1".to_string(), "s-2".to_string()]);
        let signals = store.signals_for("s-1").unwrap();
        let sentiment = signals.iter().find(|signal| signal.key == "sentiment").unwrap();
        assert_eq!(sentiment.raw_value, 5.0);
        assert_eq!(sentiment.valid_range, SignalRange::new(1.0, 6.0));
        let focus = signals.iter().find(|signal| signal.key == "focus_minutes").unwrap();
        assert_eq!(focus.valid_range, SignalRange::new(0.0, 60.0));
    }

    #[test]
    fn series_is_time_ordered() {
        let store = SignalStore::from_reader(SIGNALS.as_bytes()).unwrap();
        let series = store.series_for("s-1", "sentiment").unwrap();
        assert_eq!(series.values(), vec![3.0, 4.0, 5.0]);
    }

    #[test]
    fn untimestamped_signal_has_no_series() {
        let store = SignalStore::from_reader(SIGNALS.as_bytes()).unwrap();
        assert!(matches!(
            store.series_for("s-1", "grade"),
            Err(ProviderError::NoSeries { .. })
        ));
    }

    #[test]
    fn group_comes_from_first_non_empty_value() {
        let store = SignalStore::from_reader(SIGNALS.as_bytes()).unwrap();
        assert_eq!(store.group_of("s-2"), Some("Grade 10".to_string()));
        assert_eq!(store.group_of("missing"), None);
    }

    #[test]
    fn undeclared_signal_without_range_is_rejected() {
        let csv = "subject_id,group,key,raw_value,min,max,polarity,timestamp\ns-1,,shoe_size,9,,,,\n";
        let err = SignalStore::from_reader(csv.as_bytes()).unwrap_err();
        assert!(matches!(err, ProviderError::UndeclaredSignal { line: 2, .. }));
    }

    #[test]
    fn unknown_subject_is_an_error() {
        let store = SignalStore::new();
        assert!(matches!(
            store.signals_for("ghost"),
            Err(ProviderError::UnknownSubject(_))
        ));
    }

    #[test]
    fn missing_file_reports_path() {
        let err = SignalStore::from_path(Path::new("/nonexistent/signals.csv")).unwrap_err();
        assert!(err.to_string().contains("/nonexistent/signals.csv"));
    }
}
