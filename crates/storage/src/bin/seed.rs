use std::fmt;

use chrono::{DateTime, Duration, Utc};
use storage::repository::{NewSession, Storage};
use study_core::model::{
    CourseId, Frequency, OwnerId, Recurrence, RecurrenceGroupId, ReminderSpec, SessionCategory,
    SessionDraft,
};
use study_core::recurrence::expand;

#[derive(Debug, Clone)]
struct Args {
    db_url: String,
    owner_id: OwnerId,
    course_id: Option<CourseId>,
    singles: u32,
    weeks: u32,
    now: Option<DateTime<Utc>>,
}

#[derive(Debug)]
enum ArgsError {
    MissingValue { flag: &'static str },
    UnknownArg(String),
    InvalidOwnerId { raw: String },
    InvalidCourseId { raw: String },
    InvalidSingles { raw: String },
    InvalidWeeks { raw: String },
    InvalidDbUrl { raw: String },
    InvalidNow { raw: String },
}

impl fmt::Display for ArgsError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ArgsError::MissingValue { flag } => write!(f, "{flag} requires a value"),
            ArgsError::UnknownArg(arg) => write!(f, "unknown argument: {arg}"),
            ArgsError::InvalidOwnerId { raw } => write!(f, "invalid --owner value: {raw}"),
            ArgsError::InvalidCourseId { raw } => write!(f, "invalid --course value: {raw}"),
            ArgsError::InvalidSingles { raw } => write!(f, "invalid --singles value: {raw}"),
            ArgsError::InvalidWeeks { raw } => write!(f, "invalid --weeks value: {raw}"),
            ArgsError::InvalidDbUrl { raw } => write!(f, "invalid --db value: {raw}"),
            ArgsError::InvalidNow { raw } => {
                write!(f, "invalid --now value (expected RFC3339): {raw}")
            }
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

impl Args {
    fn parse() -> Result<Self, ArgsError> {
        let mut db_url =
            std::env::var("STUDY_DB_URL").unwrap_or_else(|_| "sqlite:dev.sqlite3".into());
        let mut owner_id = std::env::var("STUDY_OWNER_ID")
            .ok()
            .and_then(|value| value.parse::<u64>().ok())
            .map_or_else(|| OwnerId::new(1), OwnerId::new);
        let mut course_id = std::env::var("STUDY_COURSE_ID")
            .ok()
            .and_then(|value| value.parse::<u64>().ok())
            .map(CourseId::new);
        let mut singles = std::env::var("STUDY_SINGLES")
            .ok()
            .and_then(|value| value.parse::<u32>().ok())
            .unwrap_or(3);
        let mut weeks = std::env::var("STUDY_WEEKS")
            .ok()
            .and_then(|value| value.parse::<u32>().ok())
            .unwrap_or(4);
        let mut now: Option<DateTime<Utc>> = None;

        let mut args = std::env::args().skip(1);
        while let Some(arg) = args.next() {
            match arg.as_str() {
                "--db" => {
                    let value = require_value(&mut args, "--db")?;
                    if value.trim().is_empty() {
                        return Err(ArgsError::InvalidDbUrl { raw: value });
                    }
                    db_url = value;
                }
                "--owner" => {
                    let value = require_value(&mut args, "--owner")?;
                    let parsed: u64 = value
                        .parse()
                        .map_err(|_| ArgsError::InvalidOwnerId { raw: value.clone() })?;
                    owner_id = OwnerId::new(parsed);
                }
                "--course" => {
                    let value = require_value(&mut args, "--course")?;
                    let parsed: u64 = value
                        .parse()
                        .map_err(|_| ArgsError::InvalidCourseId { raw: value.clone() })?;
                    course_id = Some(CourseId::new(parsed));
                }
                "--singles" => {
                    let value = require_value(&mut args, "--singles")?;
                    singles = value
                        .parse::<u32>()
                        .map_err(|_| ArgsError::InvalidSingles { raw: value.clone() })?;
                }
                "--weeks" => {
                    let value = require_value(&mut args, "--weeks")?;
                    let parsed = value
                        .parse::<u32>()
                        .map_err(|_| ArgsError::InvalidWeeks { raw: value.clone() })?;
                    if parsed == 0 {
                        return Err(ArgsError::InvalidWeeks { raw: value });
                    }
                    weeks = parsed;
                }
                "--now" => {
                    let value = require_value(&mut args, "--now")?;
                    let parsed = DateTime::parse_from_rfc3339(&value)
                        .map_err(|_| ArgsError::InvalidNow { raw: value.clone() })?
                        .with_timezone(&Utc);
                    now = Some(parsed);
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
            course_id,
            singles,
            weeks,
            now,
        })
    }
}

fn print_usage() {
    eprintln!("Usage:");
    eprintln!("  cargo run -p storage --bin seed -- [options]");
    eprintln!();
    eprintln!("Options:");
    eprintln!("  --db <sqlite_url>         SQLite URL (default: sqlite:dev.sqlite3)");
    eprintln!("  --owner <id>              Owner id to seed sessions for (default: 1)");
    eprintln!("  --course <id>             Optional course id to attach");
    eprintln!("  --singles <n>             Number of one-off sessions (default: 3)");
    eprintln!("  --weeks <n>               Length of the weekly series in weeks (default: 4)");
    eprintln!("  --now <rfc3339>           Fixed current time for deterministic seeding");
    eprintln!("  -h, --help                Show this help");
    eprintln!();
    eprintln!("Environment (same as flags):");
    eprintln!("  STUDY_DB_URL, STUDY_OWNER_ID, STUDY_COURSE_ID, STUDY_SINGLES, STUDY_WEEKS");
}

async fn run() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse().map_err(|e| {
        eprintln!("{e}");
        print_usage();
        e
    })?;

    let storage = Storage::sqlite(&args.db_url).await?;
    let now = args.now.unwrap_or_else(Utc::now);

    let samples = [
        ("Linear algebra problem sets", SessionCategory::ExamPrep),
        ("Read two chapters of cell biology", SessionCategory::Reading),
        ("History essay outline", SessionCategory::Homework),
        ("Flashcard catch-up", SessionCategory::Review),
        ("Past paper under exam conditions", SessionCategory::Practice),
    ];
    for i in 0..args.singles {
        let (title, category) = samples[(i as usize) % samples.len()];
        let start = now + Duration::days(i64::from(i) + 1);
        let definition = SessionDraft {
            title: title.into(),
            category,
            start_time: start,
            end_time: start + Duration::minutes(90),
            description: None,
            course_id: args.course_id,
            recurrence: None,
            reminder: Some(ReminderSpec::default()),
        }
        .validate(now)?;

        let occurrence = expand(&definition)[0];
        let session = NewSession::from_definition(args.owner_id, &definition, occurrence, None);
        storage.sessions.insert(session).await?;
    }

    let series_start = now + Duration::days(7);
    let definition = SessionDraft {
        title: "Weekly calculus revision".into(),
        category: SessionCategory::Review,
        start_time: series_start,
        end_time: series_start + Duration::hours(1),
        description: Some("derivatives and integrals".into()),
        course_id: args.course_id,
        recurrence: Some(Recurrence {
            frequency: Frequency::Weekly,
            until: series_start + Duration::weeks(i64::from(args.weeks) - 1),
        }),
        reminder: Some(ReminderSpec::default()),
    }
    .validate(now)?;

    let group_id = RecurrenceGroupId::generate();
    let batch: Vec<_> = expand(&definition)
        .into_iter()
        .map(|occ| NewSession::from_definition(args.owner_id, &definition, occ, Some(group_id)))
        .collect();
    let series_len = batch.len();
    storage.sessions.insert_group(batch).await?;

    println!(
        "Seeded {} one-off sessions and a {}-instance weekly series for owner {} into {}",
        args.singles,
        series_len,
        args.owner_id.value(),
        args.db_url
    );

    Ok(())
}

#[tokio::main]
async fn main() {
    if let Err(err) = run().await {
        eprintln!("{err}");
        std::process::exit(2);
    }
}
