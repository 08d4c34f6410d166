use std::path::PathBuf;

use anyhow::Context;
use chrono::Month;
use clap::{ArgGroup, Args, Parser, Subcommand, ValueEnum};
use serde::Serialize;
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;

mod cefr;
mod config;
mod db;
mod error;
mod models;
mod payload;
mod report;
mod rollup;
mod rubric;
mod scoring;
mod submission;
mod telemetry;
mod tier;

use config::AppConfig;
use error::SubmissionError;
use models::{parse_month, Category, CategorySelections, CourseMonth, Selection, SubScore};
use payload::DraftInput;
use rollup::Grouping;
use rubric::RubricCatalog;
use scoring::{round2, ScoreCard};

#[derive(Parser)]
#[command(name = "proficiency-scoring")]
#[command(
    about = "Language proficiency scoring and roll-ups for evaluated courses",
    long_about = None
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create or upgrade the database schema
    InitDb,
    /// Load a rubric, a roster, and sample evaluations
    Seed,
    /// List the options of a rubric version
    Rubric {
        /// Defaults to the active version
        #[arg(long)]
        version: Option<String>,
        #[arg(long, value_parser = parse_category)]
        category: Option<Category>,
    },
    /// Compute derived fields for ratings without saving them
    Score {
        #[command(flatten)]
        selections: SelectionArgs,
    },
    /// Show the tier and CEFR level of a composite score
    Classify {
        #[arg(long)]
        composite: f64,
    },
    /// Save a draft evaluation row
    Save {
        #[arg(long)]
        student: String,
        #[command(flatten)]
        month: MonthArgs,
        #[arg(long)]
        semester: String,
        #[arg(long)]
        task: String,
        #[arg(long, default_value = "")]
        comment: String,
        #[command(flatten)]
        selections: SelectionArgs,
    },
    /// Save evaluation payloads from a JSON file, recomputing derived fields
    Ingest {
        #[arg(long)]
        payload: PathBuf,
    },
    /// Finalize a course month; later submissions are rejected
    Submit {
        #[command(flatten)]
        month: MonthArgs,
        #[arg(long, default_value = "evaluator")]
        by: String,
    },
    /// Check whether a course month has been submitted
    Status {
        #[command(flatten)]
        month: MonthArgs,
    },
    /// Print completion and EPGF roll-ups for a scope
    Rollup {
        #[command(flatten)]
        scope: ScopeArgs,
        #[arg(long, value_enum, default_value_t = GroupingArg::Month)]
        by: GroupingArg,
        #[arg(long, value_enum, default_value_t = OutputFormat::Csv)]
        format: OutputFormat,
    },
    /// Generate a markdown roll-up report
    Report {
        #[command(flatten)]
        scope: ScopeArgs,
        #[arg(long, value_enum, default_value_t = GroupingArg::Program)]
        by: GroupingArg,
        #[arg(long, default_value = "report.md")]
        out: PathBuf,
    },
    /// Monthly EPGF series for one student
    Trend {
        #[arg(long)]
        student: String,
        #[arg(long)]
        course: String,
        #[arg(long)]
        school_year: String,
    },
}

#[derive(Args)]
struct SelectionArgs {
    /// Rubric version the option ids belong to; defaults to the active one
    #[arg(long)]
    rubric_version: Option<String>,
    /// Selected option id, as category=id
    #[arg(long = "select", value_parser = parse_option_pair)]
    options: Vec<(Category, i64)>,
    /// Raw rating, as category=value
    #[arg(long = "rate", value_parser = parse_rating_pair)]
    ratings: Vec<(Category, f64)>,
}

impl SelectionArgs {
    fn to_selections(&self) -> CategorySelections {
        let rated = self
            .ratings
            .iter()
            .fold(CategorySelections::new(), |selections, (category, rating)| {
                selections.with(*category, Selection::Rating(*rating))
            });
        self.options.iter().fold(rated, |selections, (category, id)| {
            selections.with(*category, Selection::Option(*id))
        })
    }
}

#[derive(Args)]
struct MonthArgs {
    #[arg(long)]
    course: String,
    #[arg(long)]
    school_year: String,
    #[arg(long, value_parser = parse_month)]
    month: Month,
}

impl MonthArgs {
    fn key(&self) -> CourseMonth {
        CourseMonth::new(&self.course, &self.school_year, self.month)
    }
}

#[derive(Args)]
#[command(group(
    ArgGroup::new("scope")
        .args(["course", "department"])
        .multiple(false)
))]
struct ScopeArgs {
    #[arg(long)]
    school_year: String,
    #[arg(long)]
    course: Option<String>,
    #[arg(long)]
    department: Option<String>,
    #[arg(long)]
    semester: Option<String>,
    #[arg(long, value_parser = parse_month)]
    month: Option<Month>,
}

impl ScopeArgs {
    fn scope(&self) -> db::RollupScope {
        db::RollupScope {
            school_year: self.school_year.clone(),
            course_code: self.course.clone(),
            department: self.department.clone(),
            semester: self.semester.clone(),
            month: self.month,
        }
    }
}

#[derive(Clone, Copy, ValueEnum)]
enum GroupingArg {
    Month,
    Course,
    Program,
    YearLevel,
    Department,
}

impl From<GroupingArg> for Grouping {
    fn from(value: GroupingArg) -> Self {
        match value {
            GroupingArg::Month => Grouping::Month,
            GroupingArg::Course => Grouping::Course,
            GroupingArg::Program => Grouping::Program,
            GroupingArg::YearLevel => Grouping::YearLevel,
            GroupingArg::Department => Grouping::Department,
        }
    }
}

#[derive(Clone, Copy, ValueEnum)]
enum OutputFormat {
    Csv,
    Json,
}

fn parse_category(value: &str) -> Result<Category, String> {
    value.parse()
}

fn split_pair(value: &str) -> Result<(Category, &str), String> {
    let (category, rest) = value
        .split_once('=')
        .ok_or_else(|| format!("expected category=value, got '{value}'"))?;
    Ok((category.parse()?, rest.trim()))
}

fn parse_option_pair(value: &str) -> Result<(Category, i64), String> {
    let (category, id) = split_pair(value)?;
    let id = id
        .parse::<i64>()
        .map_err(|_| format!("option id '{id}' is not an integer"))?;
    Ok((category, id))
}

fn parse_rating_pair(value: &str) -> Result<(Category, f64), String> {
    let (category, rating) = split_pair(value)?;
    let rating = rating
        .parse::<f64>()
        .map_err(|_| format!("rating '{rating}' is not a number"))?;
    Ok((category, rating))
}

#[derive(Serialize)]
struct ScoreView<'a> {
    pronunciation_average: f64,
    grammar_average: f64,
    fluency_average: f64,
    epgf_average: f64,
    proficiency_level: &'static str,
    band_color: &'static str,
    cefr: String,
    ratings: &'a [models::RatingRecord],
}

impl<'a> From<&'a ScoreCard> for ScoreView<'a> {
    fn from(card: &'a ScoreCard) -> Self {
        Self {
            pronunciation_average: round2(card.sub_score(SubScore::Pronunciation)),
            grammar_average: round2(card.sub_score(SubScore::Grammar)),
            fluency_average: round2(card.sub_score(SubScore::Fluency)),
            epgf_average: card.display_epgf(),
            proficiency_level: card.proficiency_level(),
            band_color: card.tier.color().as_str(),
            cefr: card.cefr.to_string(),
            ratings: &card.ratings,
        }
    }
}

async fn connect(config: &AppConfig) -> anyhow::Result<PgPool> {
    let database_url = config.require_database_url()?;
    PgPoolOptions::new()
        .max_connections(config.max_connections)
        .connect(database_url)
        .await
        .context("failed to connect to Postgres")
}

fn pick_version(catalog: &RubricCatalog, requested: Option<&str>) -> Option<String> {
    requested
        .map(str::to_string)
        .or_else(|| catalog.active().map(|version| version.id.clone()))
}

/// Turns a guard rejection into the message shown to evaluators.
fn explain(err: anyhow::Error) -> anyhow::Error {
    match err.downcast_ref::<SubmissionError>() {
        Some(rejection) => anyhow::anyhow!("{} ({rejection})", rejection.user_message()),
        None => err,
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let config = AppConfig::load()?;
    telemetry::init(&config.log_level)?;
    let policy = config.scoring;

    match cli.command {
        Commands::InitDb => {
            let pool = connect(&config).await?;
            db::init_db(&pool).await?;
            println!("Schema ready.");
        }
        Commands::Seed => {
            let pool = connect(&config).await?;
            db::seed(&pool, policy).await?;
            println!("Seed data inserted.");
        }
        Commands::Rubric { version, category } => {
            let pool = connect(&config).await?;
            let catalog = db::load_rubric_catalog(&pool).await?;
            let version_id = pick_version(&catalog, version.as_deref())
                .context("no active rubric version")?;
            let version = catalog
                .version(&version_id)
                .with_context(|| format!("rubric version {version_id} not found"))?;

            let categories: Vec<Category> = match category {
                Some(category) => vec![category],
                None => Category::ALL.to_vec(),
            };
            for category in categories {
                println!("{category} ({}):", version.id);
                for option in version.options_for(category) {
                    println!("  [{}] {:.2} {}", option.id, option.rating, option.descriptor);
                }
            }
        }
        Commands::Score { selections } => {
            let catalog = if selections.options.is_empty() {
                RubricCatalog::new()
            } else {
                let pool = connect(&config).await?;
                db::load_rubric_catalog(&pool).await?
            };
            let version_id = pick_version(&catalog, selections.rubric_version.as_deref());
            let card = scoring::score_selections(
                version_id.as_deref().and_then(|id| catalog.version(id)),
                &selections.to_selections(),
                policy,
            );
            println!("{}", serde_json::to_string_pretty(&ScoreView::from(&card))?);
        }
        Commands::Classify { composite } => {
            let tier = tier::classify(composite);
            println!(
                "{composite:.2}: {} ({}), CEFR {}",
                tier.label(),
                tier.color().as_str(),
                cefr::map_level(composite, policy.cefr_fallback)
            );
        }
        Commands::Save {
            student,
            month,
            semester,
            task,
            comment,
            selections,
        } => {
            let pool = connect(&config).await?;
            let catalog = db::load_rubric_catalog(&pool).await?;
            let rubric_version = pick_version(&catalog, selections.rubric_version.as_deref())
                .context("no active rubric version; pass --rubric-version")?;
            let (draft, card) = payload::build_draft(
                DraftInput {
                    student_id: student,
                    key: month.key(),
                    semester,
                    task_title: task,
                    rubric_version,
                    comment,
                    selections: selections.to_selections(),
                },
                &catalog,
                policy,
            );
            let id = db::save_evaluation(&pool, draft).await.map_err(explain)?;
            println!(
                "Saved draft {id}: EPGF {:.2}, {}, {}.",
                card.display_epgf(),
                card.proficiency_level(),
                card.cefr
            );
        }
        Commands::Ingest { payload: path } => {
            let raw = std::fs::read_to_string(&path)
                .with_context(|| format!("failed to read {}", path.display()))?;
            let payloads = payload::parse_payloads(&raw)?;
            let pool = connect(&config).await?;
            let catalog = db::load_rubric_catalog(&pool).await?;

            let mut saved = 0usize;
            let mut rejected = 0usize;
            for item in payloads {
                let (input, hints) = item.into_draft_input()?;
                let (draft, card) = payload::build_draft(input, &catalog, policy);
                for mismatch in hints.compare(&card) {
                    tracing::warn!(
                        student_id = %draft.student_id,
                        field = mismatch.field,
                        sent = %mismatch.sent,
                        computed = %mismatch.computed,
                        "client-sent score differs, keeping recomputed value"
                    );
                }

                let student_id = draft.student_id.clone();
                match db::save_evaluation(&pool, draft).await {
                    Ok(_) => saved += 1,
                    Err(err) => match err.downcast_ref::<SubmissionError>() {
                        Some(rejection) => {
                            rejected += 1;
                            println!("Skipped {student_id}: {}", rejection.user_message());
                        }
                        None => return Err(err),
                    },
                }
            }
            println!(
                "Saved {saved} evaluations from {} ({rejected} rejected).",
                path.display()
            );
        }
        Commands::Submit { month, by } => {
            let pool = connect(&config).await?;
            let key = month.key();
            let finalized = db::finalize_month(&pool, &key, &by)
                .await
                .map_err(explain)?;
            println!("Submitted {key}: {finalized} evaluations finalized.");
        }
        Commands::Status { month } => {
            let pool = connect(&config).await?;
            let key = month.key();
            match db::submission_status(&pool, &key).await?.submitted_at() {
                Some(at) => println!(
                    "{key}: submitted at {} (submit disabled, scores read-only).",
                    at.format("%Y-%m-%d %H:%M UTC")
                ),
                None => println!("{key}: open."),
            }
        }
        Commands::Rollup { scope, by, format } => {
            let pool = connect(&config).await?;
            let scope = scope.scope();
            let grouping = Grouping::from(by);
            let rows = db::fetch_scope_scores(&pool, &scope).await?;
            let enrolled = db::fetch_enrolled_counts(&pool, &scope, grouping).await?;
            let summaries = rollup::breakdown(&rows, grouping, &enrolled, policy.cefr_fallback);

            match format {
                OutputFormat::Csv => report::write_series_csv(std::io::stdout(), &summaries)?,
                OutputFormat::Json => {
                    println!("{}", serde_json::to_string_pretty(&summaries)?)
                }
            }
        }
        Commands::Report { scope, by, out } => {
            let pool = connect(&config).await?;
            let scope = scope.scope();
            let grouping = Grouping::from(by);
            let rows = db::fetch_scope_scores(&pool, &scope).await?;

            let roster = db::fetch_enrolled_counts(&pool, &scope, Grouping::Month).await?;
            let total_enrolled = match &roster {
                rollup::EnrolledCounts::Uniform(count) => *count,
                rollup::EnrolledCounts::ByGroup(counts) => counts.values().sum(),
            };
            let overall = rollup::summarize_scope(&rows, total_enrolled, policy.cefr_fallback);
            let monthly =
                rollup::breakdown(&rows, Grouping::Month, &roster, policy.cefr_fallback);
            let enrolled = db::fetch_enrolled_counts(&pool, &scope, grouping).await?;
            let groups = rollup::breakdown(&rows, grouping, &enrolled, policy.cefr_fallback);

            let report =
                report::build_report(&scope.label(), &overall, &monthly, grouping, &groups);
            std::fs::write(&out, report)?;
            println!("Report written to {}.", out.display());
        }
        Commands::Trend {
            student,
            course,
            school_year,
        } => {
            let pool = connect(&config).await?;
            let rows = db::fetch_student_trend(&pool, &student, &course, &school_year).await?;
            let label = rows
                .first()
                .map(|row| format!("{} ({course})", row.student_name))
                .unwrap_or_else(|| format!("{student} ({course})"));
            let points = rollup::student_trend(&rows);
            print!("{}", report::build_trend(&label, &points));
        }
    }

    Ok(())
}
