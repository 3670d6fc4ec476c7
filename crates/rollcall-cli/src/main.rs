use anyhow::{Context, Result};
use chrono::Utc;
use clap::{Parser, Subcommand};
use rollcall_api::ApiClient;
use rollcall_core::Embedding;
use rollcall_store::{NewEnrollmentIntent, OfflineQueue};
use rollcall_sync::{Connectivity, SyncEngine};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

#[derive(Parser)]
#[command(name = "rollcall", about = "rollcall attendance client CLI")]
struct Cli {
    /// Path to the offline queue database
    #[arg(long, env = "ROLLCALL_DB_PATH")]
    db: Option<PathBuf>,

    /// Base URL of the attendance service
    #[arg(
        long,
        env = "ROLLCALL_SERVER_URL",
        default_value = "http://localhost:5000/api"
    )]
    server_url: String,

    /// Bearer token for the service
    #[arg(long, env = "ROLLCALL_AUTH_TOKEN")]
    token: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show pending queue entries
    Queue,
    /// Drain the offline queue to the service now
    Sync,
    /// Delete synced queue entries older than the retention window
    Prune {
        /// Retention window in days
        #[arg(long, default_value_t = 7)]
        days: i64,
    },
    /// Fetch and print the roster for a class
    Roster {
        /// Class id
        class_id: String,
    },
    /// Enroll a student (queued locally, then synced)
    Enroll {
        /// Student full name
        #[arg(long)]
        name: String,
        /// Roll number
        #[arg(long)]
        roll: String,
        /// Class id
        #[arg(long)]
        class_id: String,
        /// File containing the face embedding as a JSON float array
        #[arg(long)]
        embedding: PathBuf,
    },
}

fn default_db_path() -> PathBuf {
    let data_dir = std::env::var("XDG_DATA_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| {
            let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
            PathBuf::from(home).join(".local/share")
        });
    data_dir.join("rollcall/queue.db")
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    let db_path = cli.db.clone().unwrap_or_else(default_db_path);

    let queue = OfflineQueue::open(&db_path)
        .await
        .with_context(|| format!("opening queue at {}", db_path.display()))?;
    let api = Arc::new(ApiClient::new(
        &cli.server_url,
        Duration::from_secs(10),
        cli.token.clone(),
    )?);

    match cli.command {
        Commands::Queue => {
            let pending = queue.pending_attendance().await?;
            let enrollments = queue.pending_enrollments().await?;

            if pending.is_empty() && enrollments.is_empty() {
                println!("queue is empty");
                return Ok(());
            }

            for intent in &pending {
                println!(
                    "#{} {} {} in {} ({}) at {}{}",
                    intent.id,
                    intent.student_id,
                    intent.status,
                    intent.class_id,
                    intent.session_id,
                    intent.time,
                    if intent.captured_offline {
                        " [offline]"
                    } else {
                        ""
                    }
                );
            }
            for intent in &enrollments {
                println!(
                    "enroll #{} {} ({}) in {}",
                    intent.id, intent.full_name, intent.roll_no, intent.class_id
                );
            }
            let (attendance_count, enrollment_count) = queue.pending_counts().await?;
            println!("{attendance_count} attendance, {enrollment_count} enrollment(s) pending");
        }
        Commands::Sync => {
            let report = drain(queue, api).await;
            println!(
                "sync complete: {} submitted, {} still pending",
                report.submitted, report.failed
            );
        }
        Commands::Prune { days } => {
            let removed = queue.prune_synced(chrono::Duration::days(days)).await?;
            println!("removed {removed} synced entries older than {days} days");
        }
        Commands::Roster { class_id } => {
            use rollcall_api::AttendanceService;
            let roster = api
                .fetch_roster(&class_id)
                .await
                .context("fetching roster")?;
            for entry in &roster {
                println!(
                    "{} {} ({}) embedding {}d v{}",
                    entry.student_id,
                    entry.full_name,
                    entry.roll_no,
                    entry.embedding.dim(),
                    entry.embedding_version
                );
            }
            println!("{} student(s)", roster.len());
        }
        Commands::Enroll {
            name,
            roll,
            class_id,
            embedding,
        } => {
            let raw = std::fs::read_to_string(&embedding)
                .with_context(|| format!("reading {}", embedding.display()))?;
            let values: Vec<f32> =
                serde_json::from_str(&raw).context("embedding file must be a JSON float array")?;
            anyhow::ensure!(!values.is_empty(), "embedding must not be empty");

            queue
                .enqueue_enrollment(NewEnrollmentIntent {
                    full_name: name.clone(),
                    roll_no: roll.clone(),
                    class_id,
                    embedding: Embedding::new(values),
                    embedding_version: 1,
                    enqueued_at: Utc::now(),
                })
                .await?;
            println!("queued enrollment for {name} ({roll})");

            let report = drain(queue, api).await;
            if report.failed > 0 {
                println!("service unreachable; enrollment will sync later");
            } else {
                println!("enrollment synced");
            }
        }
    }

    Ok(())
}

/// One manual drain pass against a fresh sync engine.
async fn drain(queue: OfflineQueue, api: Arc<ApiClient>) -> rollcall_sync::DrainReport {
    let engine = SyncEngine::new(
        queue,
        api,
        Arc::new(Connectivity::new(true)),
        Duration::from_secs(30),
        chrono::Duration::days(7),
    );
    engine.drain().await
}
