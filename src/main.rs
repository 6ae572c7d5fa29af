use std::path::PathBuf;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use wellbeing_scoring::catalog;
use wellbeing_scoring::cross_risk::{CompoundRiskRule, FlagCriterion};
use wellbeing_scoring::report::{self, SubjectOutcome, SubjectTrend};
use wellbeing_scoring::trend::{estimate_stability_with, estimate_trend, weekly_means};
use wellbeing_scoring::{ScoringConfig, SignalProvider, SignalStore};

#[derive(Parser)]
#[command(name = "wellbeing-scoring")]
#[command(about = "Composite wellbeing scores, risk tiers and trends from signal exports", long_about = None)]
struct Cli {
    /// JSON file with formulas and band sets (defaults to the built-in catalog)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List the available formulas and their weights
    Formulas,
    /// Score every subject in a signal file
    Score {
        #[arg(long)]
        signals: PathBuf,
        #[arg(long)]
        formula: String,
        #[arg(long, default_value_t = 10)]
        limit: usize,
    },
    /// Trend and stability of one signal for one subject
    Trend {
        #[arg(long)]
        signals: PathBuf,
        #[arg(long)]
        subject: String,
        #[arg(long)]
        signal: String,
    },
    /// Compound risk prevalence across subjects
    CrossRisk {
        #[arg(long)]
        signals: PathBuf,
        /// flag:signal:comparison:threshold, e.g. academic_flag:grade:below:60
        #[arg(long = "criterion", required = true)]
        criteria: Vec<FlagCriterion>,
        /// Flags a subject must all carry to count as compound risk
        /// (defaults to every criterion's flag)
        #[arg(long = "require", value_delimiter = ',')]
        required: Vec<String>,
        /// Population denominator (defaults to the subjects in the file)
        #[arg(long)]
        population: Option<usize>,
    },
    /// Generate a markdown report
    Report {
        #[arg(long)]
        signals: PathBuf,
        #[arg(long)]
        formula: String,
        /// Signal to include trend lines for
        #[arg(long)]
        trend_signal: Option<String>,
        #[arg(long, default_value = "report.md")]
        out: PathBuf,
    },
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("wellbeing_scoring=warn")),
        )
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();

    let cli = Cli::parse();
    let config = match &cli.config {
        Some(path) => ScoringConfig::from_json_path(path)
            .with_context(|| format!("failed to load config {}", path.display()))?,
        None => catalog::builtin().context("built-in catalog is invalid")?,
    };

    match cli.command {
        Commands::Formulas => {
            for formula in config.formulas() {
                let weights: Vec<String> = formula
                    .table()
                    .weights()
                    .iter()
                    .map(|(key, weight)| format!("{key}={weight}"))
                    .collect();
                println!(
                    "- {} [{}]: {}",
                    formula.name(),
                    formula.band_set(),
                    weights.join(", ")
                );
            }
        }
        Commands::Score {
            signals,
            formula,
            limit,
        } => {
            let store = load_signals(&signals)?;
            let formula = config.formula(&formula)?;
            let outcomes = report::score_subjects(&store, formula);

            if outcomes.is_empty() {
                println!("No subjects found in {}.", signals.display());
                return Ok(());
            }

            println!("Lowest {} scores:", formula.name());
            for outcome in outcomes.iter().take(limit) {
                match outcome {
                    SubjectOutcome::Scored(subject) => println!(
                        "- {} score {} ({}){}",
                        subject.score.subject_id,
                        subject.score.value,
                        subject.tier,
                        if subject.score.has_warnings() {
                            " [clamped input]"
                        } else {
                            ""
                        }
                    ),
                    SubjectOutcome::Unavailable { subject_id, reason } => {
                        println!("- {subject_id} data unavailable: {reason}")
                    }
                }
            }
        }
        Commands::Trend {
            signals,
            subject,
            signal,
        } => {
            let store = load_signals(&signals)?;
            let series = store.series_for(&subject, &signal)?;
            let trend = estimate_trend(&series, &config.trend);
            let stability = estimate_stability_with(&series, &config.stability_bands());

            println!(
                "{subject} {signal}: {} (slope {:+.3}, change {:+.1}%) across {} observations",
                trend.direction,
                trend.slope,
                trend.relative_change * 100.0,
                series.len()
            );
            println!("Stability: {} (std dev {:.3})", stability.label, stability.std_dev);
            for week in weekly_means(&series) {
                println!("- week of {}: mean {:.2} over {}", week.week_start, week.mean, week.count);
            }
        }
        Commands::CrossRisk {
            signals,
            criteria,
            required,
            population,
        } => {
            let store = load_signals(&signals)?;
            let required = if required.is_empty() {
                criteria.iter().map(|criterion| criterion.flag.clone()).collect()
            } else {
                required
            };
            let rule = CompoundRiskRule::new(required)?;

            let cohort = report::assess_subjects(&store, &rule, &criteria);
            for (subject_id, reason) in &cohort.unavailable {
                println!("- {subject_id} data unavailable: {reason}");
            }

            // Unassessed subjects stay out of the denominator unless the
            // caller names the population explicitly.
            let population = population.unwrap_or(cohort.assessed());
            let summary = rule.combine(&cohort.memberships, population)?;
            println!(
                "Compound risk: {} of {} ({:.1}%), {} unavailable",
                summary.compound_count,
                summary.population,
                summary.compound_percentage,
                cohort.unavailable.len()
            );
            for (flag, count) in &summary.flag_counts {
                println!("- {flag}: {count}");
            }
            for (group, breakdown) in &summary.per_group_breakdown {
                println!(
                    "- {group}: {} of {} ({:.1}%)",
                    breakdown.compound_count, breakdown.subjects, breakdown.compound_percentage
                );
            }
        }
        Commands::Report {
            signals,
            formula,
            trend_signal,
            out,
        } => {
            let store = load_signals(&signals)?;
            let formula = config.formula(&formula)?;
            let outcomes = report::score_subjects(&store, formula);

            let mut trends = Vec::new();
            if let Some(signal_key) = &trend_signal {
                let bands = config.stability_bands();
                for subject_id in store.subjects() {
                    let Ok(series) = store.series_for(&subject_id, signal_key) else {
                        continue;
                    };
                    trends.push(SubjectTrend {
                        trend: estimate_trend(&series, &config.trend),
                        stability: estimate_stability_with(&series, &bands),
                        signal_key: signal_key.clone(),
                        subject_id,
                    });
                }
            }

            let report = report::build_report(formula, &outcomes, &trends);
            std::fs::write(&out, report)
                .with_context(|| format!("failed to write {}", out.display()))?;
            println!("Report written to {}.", out.display());
        }
    }

    Ok(())
}

fn load_signals(path: &std::path::Path) -> anyhow::Result<SignalStore> {
    SignalStore::from_path(path).with_context(|| format!("failed to load signals from {}", path.display()))
}
