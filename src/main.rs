use std::path::{Path, PathBuf};

use anyhow::Context;
use clap::{ArgGroup, Args, Parser, Subcommand};
use serde_json::Value;
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use tracing::info;

use groupscholar_report_engine::export::{self, ArtifactContent, ExportOptions};
use groupscholar_report_engine::models::{ReportData, TimeSeriesPoint};
use groupscholar_report_engine::report::{self, ReportTemplate};
use groupscholar_report_engine::risk::{self, RiskPolicy};
use groupscholar_report_engine::stats::{self, StatsPolicy};
use groupscholar_report_engine::trend::{self, TrendOptions};

mod db;

#[derive(Parser)]
#[command(name = "report-engine")]
#[command(
    about = "Class statistics and report exports for Group Scholar dashboards",
    long_about = None
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Args, Clone, Copy)]
struct PolicyArgs {
    /// Score counted as a pass
    #[arg(long, default_value_t = stats::DEFAULT_PASS_MARK)]
    pass_mark: f64,
    /// Percent change between moving averages that counts as a trend
    #[arg(long, default_value_t = stats::DEFAULT_TREND_THRESHOLD_PCT)]
    trend_threshold: f64,
    /// Standard deviation above which a group is flagged as highly variable
    #[arg(long, default_value_t = stats::DEFAULT_HIGH_VARIABILITY)]
    variability_threshold: f64,
}

impl PolicyArgs {
    fn policy(self) -> StatsPolicy {
        StatsPolicy {
            pass_mark: self.pass_mark,
            trend_threshold_pct: self.trend_threshold,
            high_variability_std_dev: self.variability_threshold,
            ..StatsPolicy::default()
        }
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Create or upgrade the database schema
    InitDb,
    /// Load realistic seed data
    Seed,
    /// Import grades from a CSV file
    Import {
        #[arg(long)]
        csv: PathBuf,
    },
    /// Class metrics for a JSON or CSV list of scores
    Metrics {
        #[arg(long)]
        input: PathBuf,
        #[command(flatten)]
        policy: PolicyArgs,
    },
    /// Trend analysis for a JSON series of {date, value} points
    Trend {
        #[arg(long)]
        input: PathBuf,
        #[arg(long, default_value_t = trend::DEFAULT_WINDOW_SIZE)]
        window: usize,
        #[arg(long, default_value_t = trend::DEFAULT_FORECAST_PERIODS)]
        periods: usize,
        #[command(flatten)]
        policy: PolicyArgs,
    },
    /// Compare groups given as a JSON object of label -> scores
    Compare {
        #[arg(long)]
        input: PathBuf,
        #[command(flatten)]
        policy: PolicyArgs,
    },
    /// List at-risk students from a report data file
    Risk {
        #[arg(long)]
        data: PathBuf,
        #[arg(long, default_value_t = risk::DEFAULT_ATTENDANCE_THRESHOLD)]
        attendance_threshold: f64,
        #[command(flatten)]
        policy: PolicyArgs,
    },
    /// List the report template catalog
    Templates,
    /// Build a report and export it
    #[command(group(
        ArgGroup::new("source")
            .args(["data", "class", "student"])
            .required(true)
            .multiple(false)
    ))]
    Report {
        #[arg(long, default_value = "STUDENT_PROGRESS")]
        template: String,
        /// Custom template definition, overrides --template
        #[arg(long)]
        template_file: Option<PathBuf>,
        /// Report data as JSON
        #[arg(long)]
        data: Option<PathBuf>,
        /// Load a class from the database
        #[arg(long)]
        class: Option<String>,
        /// Load a student, by email, from the database
        #[arg(long)]
        student: Option<String>,
        #[arg(long, default_value = "html")]
        format: String,
        /// Section id of the table to export as CSV
        #[arg(long)]
        table: Option<String>,
        #[arg(long)]
        pretty: bool,
        #[arg(long)]
        out: Option<PathBuf>,
        #[command(flatten)]
        policy: PolicyArgs,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                tracing_subscriber::EnvFilter::new(
                    "groupscholar_report_engine=info,report_engine=info",
                )
            }),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::InitDb => {
            let pool = connect().await?;
            db::init_db(&pool).await?;
            println!("Schema ready.");
        }
        Commands::Seed => {
            let pool = connect().await?;
            db::seed(&pool).await?;
            println!("Seed data inserted.");
        }
        Commands::Import { csv } => {
            let pool = connect().await?;
            let inserted = db::import_csv(&pool, &csv).await?;
            println!("Inserted {inserted} grades from {}.", csv.display());
        }
        Commands::Metrics { input, policy } => {
            let scores = read_scores(&input)?;
            let metrics = stats::class_metrics_with(&scores, &policy.policy());
            print_json(&metrics)?;
        }
        Commands::Trend {
            input,
            window,
            periods,
            policy,
        } => {
            let series: Vec<TimeSeriesPoint> = read_json(&input)?;
            let options = TrendOptions {
                window_size: window,
                forecast_periods: periods,
            };
            let result = trend::trend_analysis_with(&series, &options, &policy.policy());
            print_json(&result)?;
        }
        Commands::Compare { input, policy } => {
            let value: Value = read_json(&input)?;
            let groups: Vec<(String, Vec<f64>)> = value
                .as_object()
                .context("compare input must be a JSON object of label -> scores")?
                .iter()
                .map(|(label, scores)| (label.clone(), stats::scores_from_json(scores)))
                .collect();
            let analysis = stats::comparative_analysis(&groups, &policy.policy());
            print_json(&analysis)?;
        }
        Commands::Risk {
            data,
            attendance_threshold,
            policy,
        } => {
            let data: ReportData = read_json(&data)?;
            let risk_policy = RiskPolicy {
                stats: policy.policy(),
                attendance_threshold,
                ..RiskPolicy::default()
            };
            let flagged = risk::identify_at_risk(&data.students, &data.grades, &risk_policy);
            if flagged.is_empty() {
                println!("No students flagged.");
                return Ok(());
            }
            for student in flagged.iter() {
                println!(
                    "- {} ({}) {}: {}",
                    student.name,
                    student.student_id,
                    student.risk_level.as_str(),
                    student.reasons.join("; ")
                );
            }
        }
        Commands::Templates => {
            for template in report::catalog() {
                let sections: Vec<&str> = template.sections.iter().map(|s| s.id.as_str()).collect();
                println!("- {} \"{}\": {}", template.id, template.title, sections.join(", "));
            }
        }
        Commands::Report {
            template,
            template_file,
            data,
            class,
            student,
            format,
            table,
            pretty,
            out,
            policy,
        } => {
            let template: ReportTemplate = match template_file {
                Some(path) => read_json(&path)?,
                None => report::get_template(&template)
                    .with_context(|| format!("unknown report template {template}"))?,
            };

            let mut context = match (data, class, student) {
                (Some(path), _, _) => read_json::<ReportData>(&path)?,
                (None, Some(class), _) => db::fetch_class_context(&connect().await?, &class).await?,
                (None, None, Some(email)) => {
                    db::fetch_student_context(&connect().await?, &email).await?
                }
                (None, None, None) => {
                    anyhow::bail!("one of --data, --class or --student is required")
                }
            };

            let policy = policy.policy();
            if context.risk_students.is_empty() && !context.students.is_empty() {
                let risk_policy = RiskPolicy {
                    stats: policy,
                    ..RiskPolicy::default()
                };
                context.risk_students =
                    risk::identify_at_risk(&context.students, &context.grades, &risk_policy);
            }

            let processed =
                report::process_template_with(&template, &context, &policy, chrono::Utc::now());
            let options = ExportOptions { pretty, table };
            let artifact = export::export_named(&processed, &format, &options)?;

            let path = out.unwrap_or_else(|| PathBuf::from(&artifact.filename));
            let body = match &artifact.content {
                ArtifactContent::Text(text) => text.clone(),
                ArtifactContent::Workbook(workbook) => serde_json::to_string_pretty(workbook)?,
            };
            std::fs::write(&path, body)
                .with_context(|| format!("failed to write {}", path.display()))?;
            info!(mime_type = %artifact.mime_type, "report written");
            println!("Report written to {}.", path.display());
        }
    }

    Ok(())
}

async fn connect() -> anyhow::Result<PgPool> {
    let database_url = std::env::var("DATABASE_URL")
        .context("DATABASE_URL must be set to a production Postgres instance")?;

    PgPoolOptions::new()
        .max_connections(5)
        .connect(&database_url)
        .await
        .context("failed to connect to Postgres")
}

fn read_json<T: serde::de::DeserializeOwned>(path: &Path) -> anyhow::Result<T> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read {}", path.display()))?;
    serde_json::from_str(&text).with_context(|| format!("invalid JSON in {}", path.display()))
}

/// Scores from a CSV file with a `score` column, or a JSON array. Entries that
/// are not numbers are skipped.
fn read_scores(path: &Path) -> anyhow::Result<Vec<f64>> {
    let is_csv = path
        .extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| ext.eq_ignore_ascii_case("csv"));
    if !is_csv {
        let value: Value = read_json(path)?;
        return Ok(stats::scores_from_json(&value));
    }

    let mut reader = csv::Reader::from_path(path)
        .with_context(|| format!("failed to open {}", path.display()))?;
    let column = reader
        .headers()?
        .iter()
        .position(|header| header.trim().eq_ignore_ascii_case("score"))
        .with_context(|| format!("{} has no score column", path.display()))?;

    let mut scores = Vec::new();
    for record in reader.records() {
        let record = record?;
        if let Some(score) = record.get(column).and_then(|cell| cell.trim().parse::<f64>().ok()) {
            scores.push(score);
        }
    }
    Ok(scores)
}

fn print_json<T: serde::Serialize>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
