use std::path::PathBuf;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use clap::{Parser, Subcommand};

use loadgate::config::{AppConfig, LoggingConfig};
use loadgate::model::{NewTask, TaskStatus};
use loadgate::storage::{SqliteTaskStore, TaskStore};

#[derive(Parser)]
#[command(
    name = "loadgate",
    about = "Approval-gated load test scheduler driving headless Locust runs",
    version,
    long_about = None
)]
struct Cli {
    /// Config file (defaults: $LOADGATE_CONFIG, then ./loadgate.toml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the daemon (API server + scheduler)
    Serve {
        /// Bind address (overrides [server].bind)
        #[arg(long)]
        bind: Option<String>,
    },

    /// Submit, review, and inspect load test tasks
    Task {
        #[command(subcommand)]
        action: TaskAction,
    },

    /// Inspect upcoming scheduled runs
    Schedule {
        #[command(subcommand)]
        action: ScheduleAction,
    },

    /// Parse a Locust stats CSV and print the normalized metrics as JSON
    Parse {
        /// Path to a `*_stats.csv` artifact
        path: PathBuf,
    },

    /// Print the effective configuration as TOML
    Config,
}

#[derive(Subcommand)]
enum TaskAction {
    /// Submit a new task (starts as pending)
    Submit {
        /// Owner (user) id
        #[arg(long)]
        owner: i64,

        /// Number of concurrent simulated users
        #[arg(long)]
        users: u32,

        /// Users spawned per second
        #[arg(long, default_value = "1")]
        ramp_up: u32,

        /// Target URL (http:// or https://)
        #[arg(long)]
        target: String,

        /// Window start, e.g. 2024-05-01T10:00 (UTC) or RFC 3339
        #[arg(long, value_parser = parse_time)]
        start: DateTime<Utc>,

        /// Window end, exclusive
        #[arg(long, value_parser = parse_time)]
        end: DateTime<Utc>,
    },

    /// List tasks by status
    List {
        /// Status filter or "all"
        #[arg(long, default_value = "pending")]
        status: String,
    },

    /// Approve a pending task
    Approve {
        id: i64,
    },

    /// Reject a pending or approved task
    Reject {
        id: i64,
    },

    /// Show recorded results for a task
    Results {
        id: i64,
    },
}

#[derive(Subcommand)]
enum ScheduleAction {
    /// Preview approved tasks starting in the next N hours
    DryRun {
        /// Hours to preview
        #[arg(long, default_value = "24")]
        hours: u64,
    },
}

fn parse_time(raw: &str) -> Result<DateTime<Utc>, String> {
    loadgate::model::parse_timestamp(raw).ok_or_else(|| format!("unrecognized timestamp '{raw}'"))
}

fn init_tracing(logging: &LoggingConfig) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&logging.level));

    if logging.json {
        tracing_subscriber::fmt().json().with_env_filter(filter).init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }
}

fn open_store(config: &AppConfig) -> Result<SqliteTaskStore> {
    let pool = loadgate::storage::open_pool(&config.storage.db_path)
        .with_context(|| format!("opening database {}", config.storage.db_path))?;
    Ok(SqliteTaskStore::new(pool))
}

fn print_tasks(tasks: &[loadgate::model::Task]) {
    println!(
        "{:<6} | {:<10} | {:<6} | {:<5} | {:<25} | {:<25} | Target",
        "ID", "Status", "Users", "Ramp", "Start", "End"
    );
    println!("{:-<6}-|-{:-<10}-|-{:-<6}-|-{:-<5}-|-{:-<25}-|-{:-<25}-|-{:-<30}", "", "", "", "", "", "", "");
    for t in tasks {
        println!(
            "{:<6} | {:<10} | {:<6} | {:<5} | {:<25} | {:<25} | {}",
            t.id,
            t.status,
            t.num_users,
            t.ramp_up,
            t.scheduled_start.to_rfc3339(),
            t.scheduled_end.to_rfc3339(),
            t.target_url
        );
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // The configured subscriber needs the config; log its resolution to stderr meanwhile.
    let bootstrap = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .finish();
    let config = tracing::subscriber::with_default(bootstrap, || {
        AppConfig::resolve(cli.config.as_deref())
    })?;

    init_tracing(&config.logging);

    match cli.command {
        Commands::Serve { bind } => {
            let mut config = config;
            if let Some(bind) = bind {
                config.server.bind = bind;
            }
            tracing::info!(bind = %config.server.bind, "Starting loadgate daemon");
            loadgate::serve(&config).await?;
        }
        Commands::Task { action } => {
            let store = open_store(&config)?;

            match action {
                TaskAction::Submit {
                    owner,
                    users,
                    ramp_up,
                    target,
                    start,
                    end,
                } => {
                    let task = store
                        .create_task(NewTask {
                            owner_id: owner,
                            num_users: users,
                            ramp_up,
                            target_url: target,
                            scheduled_start: start,
                            scheduled_end: end,
                        })
                        .await?;
                    println!("Task {} submitted, awaiting approval.", task.id);
                }
                TaskAction::List { status } => {
                    let tasks = if status == "all" {
                        store.list_tasks().await?
                    } else {
                        store.list_tasks_by_status(status.parse::<TaskStatus>()?).await?
                    };
                    if tasks.is_empty() {
                        println!("No {} tasks.", status);
                    } else {
                        print_tasks(&tasks);
                    }
                }
                TaskAction::Approve { id } => {
                    if store
                        .claim_task(id, TaskStatus::Pending, TaskStatus::Approved)
                        .await?
                    {
                        println!("Task {} approved; it runs when its window opens.", id);
                    } else {
                        anyhow::bail!("Task {} is not pending", id);
                    }
                }
                TaskAction::Reject { id } => {
                    let mut rejected = false;
                    for from in [TaskStatus::Pending, TaskStatus::Approved] {
                        if store.claim_task(id, from, TaskStatus::Rejected).await? {
                            rejected = true;
                            break;
                        }
                    }
                    if !rejected {
                        anyhow::bail!("Task {} is neither pending nor approved", id);
                    }
                    println!("Task {} rejected.", id);
                }
                TaskAction::Results { id } => {
                    let results = store.results_for_task(id).await?;
                    if results.is_empty() {
                        println!("No results for task {}.", id);
                    } else {
                        println!("{}", serde_json::to_string_pretty(&results)?);
                    }
                }
            }
        }
        Commands::Schedule { action } => match action {
            ScheduleAction::DryRun { hours } => {
                let scheduler = loadgate::build_scheduler(&config)?;
                let upcoming = scheduler.preview(Utc::now(), hours).await?;
                if upcoming.is_empty() {
                    println!("No runs scheduled in next {} hours.", hours);
                } else {
                    println!("Upcoming runs (next {} hours):", hours);
                    for t in upcoming {
                        println!(
                            "{} : task {} ({} users -> {}, {}s)",
                            t.scheduled_start.to_rfc3339(),
                            t.id,
                            t.num_users,
                            t.target_url,
                            t.run_duration_secs()
                        );
                    }
                }
            }
        },
        Commands::Parse { path } => {
            let metrics = loadgate::runner::parse_stats_file(&path)?;
            println!("{}", serde_json::to_string_pretty(&metrics)?);
        }
        Commands::Config => {
            print!("{}", toml::to_string_pretty(&config)?);
        }
    }

    Ok(())
}
