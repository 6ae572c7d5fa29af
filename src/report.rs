use std::fmt::Write;

use serde::Serialize;
use tracing::warn;

use crate::config::Formula;
use crate::cross_risk::{CompoundRiskRule, FlagCriterion};
use crate::models::{CrossRiskMembership, ScoredSubject};
use crate::provider::SignalProvider;
use crate::trend::{Stability, Trend};

/// Result of scoring one subject. A subject whose data could not be scored
/// stays visible as unavailable rather than showing as a zero.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum SubjectOutcome {
    Scored(ScoredSubject),
    Unavailable { subject_id: String, reason: String },
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TierSummary {
    pub tier: String,
    pub rank: usize,
    pub count: usize,
    pub avg_value: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SubjectTrend {
    pub subject_id: String,
    pub signal_key: String,
    pub trend: Trend,
    pub stability: Stability,
}

/// Score every subject the provider knows, lowest composite first.
pub fn score_subjects(provider: &dyn SignalProvider, formula: &Formula) -> Vec<SubjectOutcome> {
    let mut scored = Vec::new();
    let mut unavailable = Vec::new();

    for subject_id in provider.subjects() {
        let result = provider
            .signals_for(&subject_id)
            .map_err(|err| err.to_string())
            .and_then(|signals| {
                formula
                    .evaluate(&subject_id, &signals)
                    .map_err(|err| err.to_string())
            });
        match result {
            Ok(subject) => scored.push(subject),
            Err(reason) => {
                warn!(subject = %subject_id, formula = formula.name(), %reason, "subject could not be scored");
                unavailable.push(SubjectOutcome::Unavailable { subject_id, reason });
            }
        }
    }

    scored.sort_by(|a, b| {
        a.score
            .unrounded
            .partial_cmp(&b.score.unrounded)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.score.subject_id.cmp(&b.score.subject_id))
    });

    scored
        .into_iter()
        .map(SubjectOutcome::Scored)
        .chain(unavailable)
        .collect()
}

/// Memberships for every subject whose criterion signals could be read.
#[derive(Debug, Clone, Default, Serialize)]
pub struct CohortRisk {
    pub memberships: Vec<CrossRiskMembership>,
    /// Subjects left out of `memberships`, with the reason.
    pub unavailable: Vec<(String, String)>,
}

impl CohortRisk {
    /// Population used when the caller names none: only assessed subjects.
    pub fn assessed(&self) -> usize {
        self.memberships.len()
    }
}

/// Derive a compound-risk membership for every subject the provider knows.
pub fn assess_subjects(
    provider: &dyn SignalProvider,
    rule: &CompoundRiskRule,
    criteria: &[FlagCriterion],
) -> CohortRisk {
    let mut cohort = CohortRisk::default();
    for subject_id in provider.subjects() {
        let group = provider.group_of(&subject_id);
        let result = provider
            .signals_for(&subject_id)
            .map_err(|err| err.to_string())
            .and_then(|signals| {
                rule.assess(subject_id.as_str(), group, &signals, criteria)
                    .map_err(|err| err.to_string())
            });
        match result {
            Ok(membership) => cohort.memberships.push(membership),
            Err(reason) => {
                warn!(subject = %subject_id, %reason, "subject could not be assessed");
                cohort.unavailable.push((subject_id, reason));
            }
        }
    }
    cohort
}

pub fn summarize_by_tier(scored: &[&ScoredSubject]) -> Vec<TierSummary> {
    let mut summaries: Vec<TierSummary> = Vec::new();
    for subject in scored {
        match summaries.iter_mut().find(|summary| summary.tier == subject.tier) {
            Some(summary) => {
                summary.avg_value += f64::from(subject.score.value);
                summary.count += 1;
            }
            None => summaries.push(TierSummary {
                tier: subject.tier.clone(),
                rank: subject.tier_rank,
                count: 1,
                avg_value: f64::from(subject.score.value),
            }),
        }
    }
    for summary in &mut summaries {
        summary.avg_value /= summary.count as f64;
    }
    summaries.sort_by_key(|summary| summary.rank);
    summaries
}

pub fn build_report(formula: &Formula, outcomes: &[SubjectOutcome], trends: &[SubjectTrend]) -> String {
    let scored: Vec<&ScoredSubject> = outcomes
        .iter()
        .filter_map(|outcome| match outcome {
            SubjectOutcome::Scored(subject) => Some(subject),
            SubjectOutcome::Unavailable { .. } => None,
        })
        .collect();
    let summaries = summarize_by_tier(&scored);

    let mut output = String::new();
    let _ = writeln!(output, "# Wellbeing Scoring Report");
    let _ = writeln!(
        output,
        "Formula `{}` over {} subjects ({} tiers: {})",
        formula.name(),
        outcomes.len(),
        formula.band_set(),
        formula.bands().labels().collect::<Vec<_>>().join(" < ")
    );
    let _ = writeln!(output);
    let _ = writeln!(output, "## Tier Mix");

    if summaries.is_empty() {
        let _ = writeln!(output, "No subjects could be scored.");
    } else {
        for summary in &summaries {
            let _ = writeln!(
                output,
                "- {}: {} subjects (avg score {:.1})",
                summary.tier, summary.count, summary.avg_value
            );
        }
    }

    let _ = writeln!(output);
    let _ = writeln!(output, "## Lowest Scoring Subjects");

    if scored.is_empty() {
        let _ = writeln!(output, "No scored subjects.");
    } else {
        for subject in scored.iter().take(10) {
            let weakest = subject
                .score
                .weakest_component()
                .map(|(key, shortfall)| format!(", weakest factor {key} (-{shortfall:.1})"))
                .unwrap_or_default();
            let _ = writeln!(
                output,
                "- {} score {} ({}){}",
                subject.score.subject_id, subject.score.value, subject.tier, weakest
            );
            for warning in &subject.score.warnings {
                let _ = writeln!(output, "  - warning: {warning}");
            }
        }
    }

    let unavailable: Vec<(&str, &str)> = outcomes
        .iter()
        .filter_map(|outcome| match outcome {
            SubjectOutcome::Unavailable { subject_id, reason } => Some((subject_id.as_str(), reason.as_str())),
            SubjectOutcome::Scored(_) => None,
        })
        .collect();
    if !unavailable.is_empty() {
        let _ = writeln!(output);
        let _ = writeln!(output, "## Data Unavailable");
        for (subject_id, reason) in unavailable {
            let _ = writeln!(output, "- {subject_id}: {reason}");
        }
    }

    if !trends.is_empty() {
        let _ = writeln!(output);
        let _ = writeln!(output, "## Trends");
        for entry in trends {
            let _ = writeln!(
                output,
                "- {} {}: {} (slope {:+.2}), {} (std dev {:.2})",
                entry.subject_id,
                entry.signal_key,
                entry.trend.direction,
                entry.trend.slope,
                entry.stability.label,
                entry.stability.std_dev
            );
        }
    }

    output
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog;
    use crate::models::Signal;
    use crate::provider::SignalStore;

    fn store() -> SignalStore {
        let mut store = SignalStore::new();
        let rows = [
            ("s-1", "sentiment", 5.0),
            ("s-1", "grade", 92.0),
            ("s-1", "late_submission_rate", 10.0),
            ("s-2", "sentiment", 2.0),
            ("s-2", "grade", 48.0),
            ("s-2", "late_submission_rate", 60.0),
            ("s-3", "sentiment", 4.0),
        ];
        for (subject, key, raw) in rows {
            let signal = catalog::declaration(key).unwrap().observe(raw);
            store.record(subject, None, signal, None);
        }
        store
    }

    #[test]
    fn scores_lowest_first_and_keeps_unavailable() {
        let config = catalog::builtin().unwrap();
        let formula = config.formula("student_success").unwrap();
        let outcomes = score_subjects(&store(), formula);
        assert_eq!(outcomes.len(), 3);
        match &outcomes[0] {
            SubjectOutcome::Scored(subject) => assert_eq!(subject.score.subject_id, "s-2"),
            other => panic!("expected scored subject, got {other:?}"),
        }
        match &outcomes[2] {
            SubjectOutcome::Unavailable { subject_id, reason } => {
                assert_eq!(subject_id, "s-3");
                assert!(reason.contains("grade"));
            }
            other => panic!("expected unavailable subject, got {other:?}"),
        }
    }

    #[test]
    fn unassessed_subjects_stay_out_of_the_default_population() {
        let criteria: Vec<FlagCriterion> = ["low_grade:grade:lt:60", "low_mood:sentiment:le:2"]
            .iter()
            .map(|text| text.parse().unwrap())
            .collect();
        let rule = CompoundRiskRule::new(["low_grade", "low_mood"]).unwrap();
        let cohort = assess_subjects(&store(), &rule, &criteria);

        assert_eq!(cohort.assessed(), 2);
        assert_eq!(cohort.unavailable.len(), 1);
        assert_eq!(cohort.unavailable[0].0, "s-3");

        let summary = rule.combine(&cohort.memberships, cohort.assessed()).unwrap();
        assert_eq!(summary.compound_count, 1);
        assert!((summary.compound_percentage - 50.0).abs() < 1e-9);
    }

    #[test]
    fn tier_summary_orders_by_rank() {
        let config = catalog::builtin().unwrap();
        let formula = config.formula("student_success").unwrap();
        let outcomes = score_subjects(&store(), formula);
        let scored: Vec<&ScoredSubject> = outcomes
            .iter()
            .filter_map(|outcome| match outcome {
                SubjectOutcome::Scored(subject) => Some(subject),
                _ => None,
            })
            .collect();
        let summaries = summarize_by_tier(&scored);
        assert_eq!(summaries.len(), 2);
        assert!(summaries[0].rank < summaries[1].rank);
        assert_eq!(summaries[1].tier, "Thriving");
    }

    #[test]
    fn report_lists_sections() {
        let config = catalog::builtin().unwrap();
        let formula = config.formula("student_success").unwrap();
        let outcomes = score_subjects(&store(), formula);
        let report = build_report(formula, &outcomes, &[]);
        assert!(report.starts_with("# Wellbeing Scoring Report"));
        assert!(report.contains("## Tier Mix"));
        assert!(report.contains("- Thriving: 1 subjects (avg score 87.0)"));
        assert!(report.contains("## Data Unavailable"));
        assert!(report.contains("- s-3: "));
        assert!(!report.contains("## Trends"));
    }

    #[test]
    fn warnings_are_listed_under_subject() {
        let mut store = SignalStore::new();
        store.record("s-9", None, Signal::higher_better("sentiment", 7.5, 1.0, 6.0).unwrap(), None);
        store.record("s-9", None, catalog::declaration("grade").unwrap().observe(70.0), None);
        store.record(
            "s-9",
            None,
            catalog::declaration("late_submission_rate").unwrap().observe(0.0),
            None,
        );
        let config = catalog::builtin().unwrap();
        let formula = config.formula("student_success").unwrap();
        let report = build_report(formula, &score_subjects(&store, formula), &[]);
        assert!(report.contains("warning: signal 'sentiment' value 7.5 outside [1, 6], clamped"));
    }
}
