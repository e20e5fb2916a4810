use std::net::SocketAddr;
use std::path::PathBuf;

use anyhow::Context;
use chrono::Utc;
use clap::{Parser, Subcommand, ValueEnum};
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use tracing::info;
use tracing_subscriber::EnvFilter;
use uuid::Uuid;

mod access;
mod analytics;
mod config;
mod db;
mod error;
mod models;
mod pipeline;
mod report;
mod server;
mod source;
mod store;
mod validation;

use config::Settings;
use source::PgProgressSource;
use store::{AnalyticsFilter, AnalyticsStore, PgAnalyticsStore};

#[derive(Parser)]
#[command(name = "progress-analytics")]
#[command(about = "School progress tracking and analytics", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create or upgrade the database schema
    InitDb,
    /// Load a sample school with teachers, students and progress
    Seed,
    /// Register a school
    School {
        #[arg(long)]
        name: String,
    },
    /// Register a student, teacher or head teacher profile
    Profile {
        #[arg(long)]
        name: String,
        #[arg(long)]
        email: String,
        #[arg(long)]
        role: String,
        #[arg(long)]
        grade: Option<String>,
        #[arg(long)]
        school_id: Uuid,
    },
    /// Import progress records from a CSV file
    Import {
        /// Email of the teacher or head teacher recording the scores
        #[arg(long = "as")]
        actor: String,
        #[arg(long)]
        csv: PathBuf,
    },
    /// Read or record progress as a given profile
    Progress {
        #[command(subcommand)]
        command: ProgressCommand,
    },
    /// List or create classrooms as a given profile
    Classrooms {
        #[command(subcommand)]
        command: ClassroomCommand,
    },
    /// Recalculate class and school analytics and store them
    Calculate,
    /// Print stored analytics as JSON
    Analytics {
        #[arg(long = "type", value_enum, default_value_t = AnalyticsKind::ClassAverages)]
        kind: AnalyticsKind,
        #[arg(long)]
        school_id: Option<Uuid>,
        #[arg(long)]
        teacher_id: Option<Uuid>,
    },
    /// Generate a markdown dashboard from stored analytics
    Report {
        #[arg(long)]
        school_id: Option<Uuid>,
        #[arg(long, default_value = "analytics.md")]
        out: PathBuf,
    },
    /// Serve the analytics HTTP API
    Serve {
        #[arg(long, env = "PROGRESS_BIND_ADDR", default_value = "127.0.0.1:8080")]
        bind: SocketAddr,
    },
}

#[derive(Subcommand)]
enum ProgressCommand {
    /// List the progress records visible to a profile
    List {
        #[arg(long = "as")]
        actor: String,
    },
    /// Record a score for a student
    Add {
        #[arg(long = "as")]
        actor: String,
        #[arg(long)]
        student: String,
        #[arg(long)]
        classroom: Uuid,
        #[arg(long)]
        score: f64,
        #[arg(long, default_value_t = 100.0)]
        max_score: f64,
        #[arg(long)]
        subject: Option<String>,
    },
    /// Change the score or subject of a record
    Update {
        #[arg(long = "as")]
        actor: String,
        #[arg(long)]
        id: Uuid,
        #[arg(long)]
        score: Option<f64>,
        #[arg(long)]
        subject: Option<String>,
    },
}

#[derive(Subcommand)]
enum ClassroomCommand {
    List {
        #[arg(long = "as")]
        actor: String,
    },
    Add {
        #[arg(long = "as")]
        actor: String,
        #[arg(long)]
        name: String,
        #[arg(long)]
        subject: Option<String>,
    },
}

#[derive(Clone, Copy, ValueEnum)]
#[value(rename_all = "snake_case")]
enum AnalyticsKind {
    ClassAverages,
    SchoolAnalytics,
}

fn init_logging() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .compact()
        .init();
}

async fn connect(url: &str, max_connections: u32) -> anyhow::Result<PgPool> {
    PgPoolOptions::new()
        .max_connections(max_connections)
        .connect(url)
        .await
        .context("failed to connect to Postgres")
}

/// Connection pools for one invocation. Closed before the process exits.
struct Pools {
    source: PgPool,
    analytics: PgPool,
}

impl Pools {
    async fn open(settings: &Settings) -> anyhow::Result<Self> {
        let source = connect(&settings.database_url, settings.max_connections).await?;
        let analytics = if settings.shares_database() {
            source.clone()
        } else {
            connect(&settings.analytics_database_url, settings.max_connections).await?
        };
        Ok(Self { source, analytics })
    }

    async fn close(self) {
        self.analytics.close().await;
        self.source.close().await;
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_logging();

    let settings = Settings::from_env()?;
    let pools = Pools::open(&settings).await?;
    let result = run(cli.command, &pools).await;
    pools.close().await;
    result
}

async fn run(command: Commands, pools: &Pools) -> anyhow::Result<()> {
    let pool = &pools.source;
    let analytics_pool = &pools.analytics;

    match command {
        Commands::InitDb => {
            db::init_db(pool).await?;
            db::init_analytics_db(analytics_pool).await?;
            println!("Schema ready.");
        }
        Commands::Seed => {
            db::seed(pool).await?;
            println!("Seed data inserted.");
        }
        Commands::School { name } => {
            let id = db::create_school(pool, &name).await?;
            println!("School {name} created with id {id}.");
        }
        Commands::Profile {
            name,
            email,
            role,
            grade,
            school_id,
        } => {
            let new = db::NewProfile {
                full_name: name,
                email,
                role: role.parse()?,
                grade,
                school_id,
            };
            let id = db::create_profile(pool, &new).await?;
            info!(%id, role = %new.role, "Profile registered");
            println!("Profile {} registered with id {id}.", new.email);
        }
        Commands::Import { actor, csv } => {
            let actor = db::fetch_profile(pool, &actor).await?;
            let inserted = db::import_csv(pool, &actor, &csv).await?;
            println!("Inserted {inserted} progress records from {}.", csv.display());
        }
        Commands::Progress { command } => run_progress(command, pool).await?,
        Commands::Classrooms { command } => run_classrooms(command, pool).await?,
        Commands::Calculate => {
            let source = PgProgressSource::new(pool.clone());
            let store = PgAnalyticsStore::new(analytics_pool.clone());
            let summary = pipeline::calculate(&source, &store, Utc::now()).await?;
            println!(
                "Stored {} class averages and {} school summaries from {} progress records.",
                summary.class_averages_calculated,
                summary.school_analytics_calculated,
                summary.total_progress_records
            );
        }
        Commands::Analytics {
            kind,
            school_id,
            teacher_id,
        } => {
            let store = PgAnalyticsStore::new(analytics_pool.clone());
            let filter = AnalyticsFilter {
                school_id: school_id.map(|id| id.to_string()),
                teacher_id: teacher_id.map(|id| id.to_string()),
            };
            let data = match kind {
                AnalyticsKind::ClassAverages => {
                    serde_json::to_value(store.class_averages(&filter).await?)?
                }
                AnalyticsKind::SchoolAnalytics => {
                    serde_json::to_value(store.school_analytics(&filter).await?)?
                }
            };
            println!("{}", serde_json::to_string_pretty(&data)?);
        }
        Commands::Report { school_id, out } => {
            let store = PgAnalyticsStore::new(analytics_pool.clone());
            let filter = AnalyticsFilter {
                school_id: school_id.map(|id| id.to_string()),
                teacher_id: None,
            };
            let classes = store.class_averages(&filter).await?;
            let schools = store.school_analytics(&filter).await?;
            let scope = schools
                .first()
                .filter(|_| school_id.is_some())
                .map(|s| s.school_name.as_str());
            let report = report::build_report(scope, &classes, &schools);
            std::fs::write(&out, report)
                .with_context(|| format!("failed to write {}", out.display()))?;
            println!("Report written to {}.", out.display());
        }
        Commands::Serve { bind } => {
            let state = server::AppState {
                source: PgProgressSource::new(pool.clone()),
                store: PgAnalyticsStore::new(analytics_pool.clone()),
            };
            server::serve(bind, state).await?;
        }
    }

    Ok(())
}

async fn run_progress(command: ProgressCommand, pool: &PgPool) -> anyhow::Result<()> {
    match command {
        ProgressCommand::List { actor } => {
            let actor = db::fetch_profile(pool, &actor).await?;
            let entries = db::list_progress(pool, &actor).await?;
            if entries.is_empty() {
                println!("No progress records visible to {}.", actor.email);
                return Ok(());
            }

            match actor.grade.as_deref() {
                Some(grade) => println!(
                    "Progress visible to {} ({}, {}):",
                    actor.full_name, actor.role, grade
                ),
                None => println!("Progress visible to {} ({}):", actor.full_name, actor.role),
            }
            for entry in &entries {
                println!(
                    "- {} {} {}: {}/{} on {}",
                    entry.id,
                    entry.student_name,
                    entry.subject,
                    entry.score,
                    entry.max_score,
                    entry.created_at.format("%Y-%m-%d")
                );
            }
        }
        ProgressCommand::Add {
            actor,
            student,
            classroom,
            score,
            max_score,
            subject,
        } => {
            let actor = db::fetch_profile(pool, &actor).await?;
            let new = db::NewProgress {
                student_email: student,
                classroom_id: classroom,
                subject,
                score,
                max_score,
                source_key: None,
            };
            let mut conn = pool.acquire().await?;
            if let Some(id) = db::create_progress(&mut conn, &actor, &new).await? {
                info!(%id, "Progress record created");
                println!("Progress record {id} created.");
            }
        }
        ProgressCommand::Update {
            actor,
            id,
            score,
            subject,
        } => {
            let actor = db::fetch_profile(pool, &actor).await?;
            let entry =
                db::update_progress(pool, &actor, id, score, subject.as_deref()).await?;
            println!(
                "Progress record {} now {} {}/{}.",
                entry.id, entry.subject, entry.score, entry.max_score
            );
        }
    }

    Ok(())
}

async fn run_classrooms(command: ClassroomCommand, pool: &PgPool) -> anyhow::Result<()> {
    match command {
        ClassroomCommand::List { actor } => {
            let actor = db::fetch_profile(pool, &actor).await?;
            let classrooms = db::list_classrooms(pool, &actor).await?;
            if classrooms.is_empty() {
                println!("No classrooms visible to {}.", actor.email);
                return Ok(());
            }
            for classroom in &classrooms {
                println!(
                    "- {} {} ({})",
                    classroom.id,
                    classroom.name,
                    classroom.subject.as_deref().unwrap_or("no subject")
                );
            }
        }
        ClassroomCommand::Add {
            actor,
            name,
            subject,
        } => {
            let actor = db::fetch_profile(pool, &actor).await?;
            let classroom =
                db::create_classroom(pool, &actor, &name, subject.as_deref()).await?;
            println!("Classroom {} created with id {}.", classroom.name, classroom.id);
        }
    }

    Ok(())
}
