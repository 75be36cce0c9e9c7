use std::fmt;

use services::{AppServices, Clock};
use storage::repository::SessionFilter;
use study_core::model::{OwnerId, SessionCategory};
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Debug)]
enum ArgsError {
    MissingValue { flag: &'static str },
    UnknownArg(String),
    InvalidOwnerId { raw: String },
    InvalidCategory { raw: String },
    InvalidDbUrl { raw: String },
}

impl fmt::Display for ArgsError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ArgsError::MissingValue { flag } => write!(f, "{flag} requires a value"),
            ArgsError::UnknownArg(arg) => write!(f, "unknown argument: {arg}"),
            ArgsError::InvalidOwnerId { raw } => write!(f, "invalid --owner value: {raw}"),
            ArgsError::InvalidCategory { raw } => write!(f, "invalid --category value: {raw}"),
            ArgsError::InvalidDbUrl { raw } => write!(f, "invalid --db value: {raw}"),
        }
    }
}

impl std::error::Error for ArgsError {}

fn require_value(
    args: &mut impl Iterator<Item = String>,
    flag: &'static str,
) -> Result<String, ArgsError> {
    args.next().ok_or(ArgsError::MissingValue { flag })
}

struct Args {
    db_url: String,
    owner_id: OwnerId,
    category: Option<SessionCategory>,
}

fn print_usage() {
    eprintln!("Usage:");
    eprintln!("  cargo run -p app -- list   [--db <sqlite_url>] [--owner <id>] [--category <name>]");
    eprintln!("  cargo run -p app -- stats  [--db <sqlite_url>] [--owner <id>] [--category <name>]");
    eprintln!("  cargo run -p app -- sweep  [--db <sqlite_url>]");
    eprintln!("  cargo run -p app -- remind [--db <sqlite_url>]");
    eprintln!();
    eprintln!("Defaults:");
    eprintln!("  --db sqlite://study.sqlite3");
    eprintln!("  --owner 1");
    eprintln!();
    eprintln!("Categories: exam_prep, homework, reading, review, practice");
    eprintln!();
    eprintln!("Environment:");
    eprintln!("  STUDY_DB_URL, STUDY_OWNER_ID, STUDY_WEBHOOK_URL, STUDY_WEBHOOK_TIMEOUT_SECS");
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Command {
    List,
    Stats,
    Sweep,
    Remind,
}

impl Command {
    fn from_arg(arg: &str) -> Option<Self> {
        match arg {
            "list" => Some(Self::List),
            "stats" => Some(Self::Stats),
            "sweep" => Some(Self::Sweep),
            "remind" => Some(Self::Remind),
            _ => None,
        }
    }
}

impl Args {
    fn parse(args: &mut impl Iterator<Item = String>) -> Result<Self, ArgsError> {
        let mut db_url = std::env::var("STUDY_DB_URL")
            .ok()
            .map_or_else(|| "sqlite://study.sqlite3".into(), normalize_sqlite_url);
        let mut owner_id = std::env::var("STUDY_OWNER_ID")
            .ok()
            .and_then(|value| value.parse::<u64>().ok())
            .map_or_else(|| OwnerId::new(1), OwnerId::new);
        let mut category = None;

        while let Some(arg) = args.next() {
            match arg.as_str() {
                "--db" => {
                    let value = require_value(args, "--db")?;
                    if value.trim().is_empty() {
                        return Err(ArgsError::InvalidDbUrl { raw: value });
                    }
                    db_url = normalize_sqlite_url(value);
                }
                "--owner" => {
                    let value = require_value(args, "--owner")?;
                    let parsed: u64 = value
                        .parse()
                        .map_err(|_| ArgsError::InvalidOwnerId { raw: value.clone() })?;
                    owner_id = OwnerId::new(parsed);
                }
                "--category" => {
                    let value = require_value(args, "--category")?;
                    category = Some(
                        value
                            .parse()
                            .map_err(|_| ArgsError::InvalidCategory { raw: value.clone() })?,
                    );
                }
                "--help" | "-h" => {
                    print_usage();
                    std::process::exit(0);
                }
                _ => return Err(ArgsError::UnknownArg(arg)),
            }
        }

        Ok(Self {
            db_url,
            owner_id,
            category,
        })
    }
}

fn normalize_sqlite_url(raw: String) -> String {
    if raw == "sqlite::memory:" || raw.starts_with("sqlite://") {
        return raw;
    }

    let trimmed = raw.trim().to_string();
    let path_str = trimmed
        .strip_prefix("sqlite:")
        .unwrap_or(trimmed.as_str())
        .to_string();
    let path = std::path::Path::new(&path_str);
    let absolute = if path.is_absolute() {
        path.to_path_buf()
    } else {
        std::env::current_dir()
            .unwrap_or_else(|_| std::path::PathBuf::from("."))
            .join(path)
    };
    format!("sqlite://{}", absolute.display())
}

async fn run() -> Result<(), Box<dyn std::error::Error>> {
    let mut argv: Vec<String> = std::env::args().skip(1).collect();

    // Default behavior: listing sessions when no subcommand is provided.
    let cmd = match argv.first().map(String::as_str) {
        None => Command::List,
        Some("--help" | "-h") => {
            print_usage();
            return Ok(());
        }
        Some(first) if first.starts_with("--") => Command::List,
        Some(first) => Command::from_arg(first).ok_or_else(|| {
            eprintln!("unknown subcommand: {first}");
            print_usage();
            std::io::Error::new(std::io::ErrorKind::InvalidInput, "unknown subcommand")
        })?,
    };

    if !argv.is_empty() && !argv[0].starts_with("--") {
        argv.remove(0);
    }

    let mut iter = argv.into_iter();
    let parsed = Args::parse(&mut iter).map_err(|e| {
        eprintln!("{e}");
        print_usage();
        e
    })?;

    // Open + migrate SQLite at startup. Keep this in the binary glue so core/services stay pure.
    prepare_sqlite_file(&parsed.db_url)?;
    let app = AppServices::new_sqlite(&parsed.db_url, Clock::default_clock()).await?;

    let filter = SessionFilter {
        category: parsed.category,
        ..SessionFilter::default()
    };

    match cmd {
        Command::List => {
            let sessions = app
                .session_service()
                .list_sessions(parsed.owner_id, &filter)
                .await?;
            if sessions.is_empty() {
                println!("no sessions for owner {}", parsed.owner_id);
                return Ok(());
            }
            for session in &sessions {
                println!(
                    "{:>6}  {}  {:<11}  {:<9}  {}",
                    session.id().value(),
                    session.start_time().format("%Y-%m-%d %H:%M"),
                    session.progress().status().as_str(),
                    session.category().as_str(),
                    session.title()
                );
            }
            Ok(())
        }
        Command::Stats => {
            let stats = app
                .stats_service()
                .summarize(parsed.owner_id, &filter)
                .await?;
            if stats.is_empty() {
                println!("no sessions recorded for owner {}", parsed.owner_id);
                return Ok(());
            }
            println!(
                "{:<10}  {:>8}  {:>9}  {:>13}  {:>11}",
                "category", "sessions", "completed", "total minutes", "avg minutes"
            );
            for (category, row) in &stats {
                println!(
                    "{:<10}  {:>8}  {:>9}  {:>13}  {:>11}",
                    category.as_str(),
                    row.total_sessions,
                    row.completed_sessions,
                    row.total_duration_minutes,
                    row.average_duration_minutes
                );
            }
            Ok(())
        }
        Command::Sweep => {
            let swept = app.progress_service().sweep_missed().await?;
            println!("marked {swept} overdue sessions as missed");
            Ok(())
        }
        Command::Remind => {
            let restored = app.restore_reminders().await?;
            info!(restored, "reminder timers armed");
            println!("Reminder delivery running. Press Ctrl+C to stop.");
            tokio::signal::ctrl_c().await?;
            info!("received Ctrl+C, shutting down...");
            app.reminders().shutdown().await;
            Ok(())
        }
    }
}

fn prepare_sqlite_file(db_url: &str) -> Result<(), Box<dyn std::error::Error>> {
    if db_url == "sqlite::memory:" {
        return Ok(());
    }

    let path = db_url
        .strip_prefix("sqlite://")
        .ok_or_else(|| ArgsError::InvalidDbUrl {
            raw: db_url.to_string(),
        })?;
    let path = path.split('?').next().unwrap_or(path);
    if path.is_empty() {
        return Err(ArgsError::InvalidDbUrl {
            raw: db_url.to_string(),
        }
        .into());
    }

    let path = std::path::Path::new(path);
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    if !path.exists() {
        std::fs::OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(false)
            .open(path)?;
    }

    Ok(())
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    if let Err(err) = run().await {
        // At this layer (binary glue), printing once is fine.
        eprintln!("{err}");
        std::process::exit(2);
    }
}
