//! Compound risk: subjects carrying every flag of a required set at once
//! (e.g. academically AND emotionally flagged), and its prevalence.

use std::collections::{BTreeMap, BTreeSet};
use std::str::FromStr;

use serde::Serialize;
use tracing::warn;

use crate::error::{Result, ScoringError};
use crate::models::{CrossRiskMembership, Signal};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Comparison {
    Below,
    AtOrBelow,
    Above,
    AtOrAbove,
}

impl Comparison {
    fn holds(&self, value: f64, threshold: f64) -> bool {
        match self {
            Comparison::Below => value < threshold,
            Comparison::AtOrBelow => value <= threshold,
            Comparison::Above => value > threshold,
            Comparison::AtOrAbove => value >= threshold,
        }
    }
}

/// Raises `flag` when the raw value of `signal_key` satisfies the comparison.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FlagCriterion {
    pub flag: String,
    pub signal_key: String,
    pub comparison: Comparison,
    pub threshold: f64,
}

impl FlagCriterion {
    pub fn new(
        flag: impl Into<String>,
        signal_key: impl Into<String>,
        comparison: Comparison,
        threshold: f64,
    ) -> Self {
        Self {
            flag: flag.into(),
            signal_key: signal_key.into(),
            comparison,
            threshold,
        }
    }

    pub fn matches(&self, raw_value: f64) -> bool {
        self.comparison.holds(raw_value, self.threshold)
    }

    /// A criterion whose signal is absent or non-finite cannot be judged and
    /// is an error. Out-of-range values are judged as given, with a warning.
    pub fn evaluate(&self, signals: &[Signal]) -> Result<bool> {
        let signal = signals
            .iter()
            .find(|signal| signal.key == self.signal_key)
            .ok_or_else(|| ScoringError::MissingSignal {
                formula: self.flag.clone(),
                key: self.signal_key.clone(),
            })?;
        let raw = signal.raw_value;
        if !raw.is_finite() {
            return Err(ScoringError::NonFiniteSignal {
                key: signal.key.clone(),
                value: raw,
            });
        }
        if !signal.valid_range.contains(raw) {
            warn!(
                flag = %self.flag,
                signal = %signal.key,
                raw,
                min = signal.valid_range.min,
                max = signal.valid_range.max,
                "raw signal outside declared range while evaluating flag"
            );
        }
        Ok(self.matches(raw))
    }
}

/// Parses `flag:signal:comparison:threshold`, e.g. `academic_flag:grade:below:60`.
impl FromStr for FlagCriterion {
    type Err = String;

    fn from_str(value: &str) -> std::result::Result<Self, Self::Err> {
        let parts: Vec<&str> = value.split(':').map(str::trim).collect();
        let [flag, signal_key, comparison, threshold] = parts[..] else {
            return Err(format!(
                "expected flag:signal:comparison:threshold, got '{value}'"
            ));
        };
        let comparison = match comparison {
            "below" | "lt" => Comparison::Below,
            "at_or_below" | "le" => Comparison::AtOrBelow,
            "above" | "gt" => Comparison::Above,
            "at_or_above" | "ge" => Comparison::AtOrAbove,
            other => return Err(format!("unknown comparison '{other}'")),
        };
        let threshold: f64 = threshold
            .parse()
            .map_err(|_| format!("threshold '{threshold}' is not a number"))?;
        if flag.is_empty() || signal_key.is_empty() {
            return Err(format!("flag and signal must be non-empty in '{value}'"));
        }
        Ok(FlagCriterion::new(flag, signal_key, comparison, threshold))
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct GroupBreakdown {
    pub subjects: usize,
    pub compound_count: usize,
    /// Relative to the memberships supplied for this group.
    pub compound_percentage: f64,
    pub flag_counts: BTreeMap<String, usize>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CrossRiskSummary {
    pub population: usize,
    pub compound_count: usize,
    /// Relative to the caller-supplied population.
    pub compound_percentage: f64,
    pub flag_counts: BTreeMap<String, usize>,
    pub per_group_breakdown: BTreeMap<String, GroupBreakdown>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CompoundRiskRule {
    required: BTreeSet<String>,
}

impl CompoundRiskRule {
    pub fn new<F: Into<String>>(required: impl IntoIterator<Item = F>) -> Result<Self> {
        let required: BTreeSet<String> = required.into_iter().map(Into::into).collect();
        if required.is_empty() {
            return Err(ScoringError::EmptyCompoundRule);
        }
        Ok(Self { required })
    }

    pub fn required(&self) -> &BTreeSet<String> {
        &self.required
    }

    pub fn is_compound(&self, flags: &BTreeSet<String>) -> bool {
        self.required.is_subset(flags)
    }

    pub fn membership(
        &self,
        subject_id: impl Into<String>,
        group: Option<String>,
        flags: BTreeSet<String>,
    ) -> CrossRiskMembership {
        CrossRiskMembership {
            subject_id: subject_id.into(),
            group,
            is_compound_risk: self.is_compound(&flags),
            flags,
        }
    }

    /// Derive flags from raw signals and build the membership.
    pub fn assess(
        &self,
        subject_id: impl Into<String>,
        group: Option<String>,
        signals: &[Signal],
        criteria: &[FlagCriterion],
    ) -> Result<CrossRiskMembership> {
        let mut flags = BTreeSet::new();
        for criterion in criteria {
            if criterion.evaluate(signals)? {
                flags.insert(criterion.flag.clone());
            }
        }
        Ok(self.membership(subject_id, group, flags))
    }

    /// Count compound-risk subjects against an explicit `population`.
    ///
    /// Compound status is re-derived from each membership's flags under this
    /// rule. Memberships without a group only count toward the totals. A
    /// subject listed twice is rejected.
    pub fn combine(
        &self,
        memberships: &[CrossRiskMembership],
        population: usize,
    ) -> Result<CrossRiskSummary> {
        if population < memberships.len() {
            return Err(ScoringError::InvalidPopulation {
                population,
                members: memberships.len(),
            });
        }

        let mut seen = BTreeSet::new();
        if let Some(duplicate) = memberships
            .iter()
            .find(|membership| !seen.insert(membership.subject_id.as_str()))
        {
            return Err(ScoringError::DuplicateSubject(duplicate.subject_id.clone()));
        }

        let mut compound_count = 0;
        let mut flag_counts: BTreeMap<String, usize> = BTreeMap::new();
        let mut groups: BTreeMap<String, GroupBreakdown> = BTreeMap::new();

        for membership in memberships {
            let compound = self.is_compound(&membership.flags);
            if compound {
                compound_count += 1;
            }
            for flag in &membership.flags {
                *flag_counts.entry(flag.clone()).or_default() += 1;
            }
            if let Some(group) = &membership.group {
                let entry = groups.entry(group.clone()).or_default();
                entry.subjects += 1;
                if compound {
                    entry.compound_count += 1;
                }
                for flag in &membership.flags {
                    *entry.flag_counts.entry(flag.clone()).or_default() += 1;
                }
            }
        }

        for breakdown in groups.values_mut() {
            breakdown.compound_percentage = percentage(breakdown.compound_count, breakdown.subjects);
        }

        Ok(CrossRiskSummary {
            population,
            compound_count,
            compound_percentage: percentage(compound_count, population),
            flag_counts,
            per_group_breakdown: groups,
        })
    }
}

fn percentage(count: usize, total: usize) -> f64 {
    if total == 0 {
        0.0
    } else {
        100.0 * count as f64 / total as f64
    }
}
