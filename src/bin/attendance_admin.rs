//! attendance_admin - roster maintenance and attendance stats

use anyhow::{anyhow, Result};
use chrono::NaiveDate;
use clap::{Parser, Subcommand};

use attendance_kernel::{daily_stats, SqliteAttendanceStore, SubjectId};

#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Args {
    /// Path to the attendance database.
    #[arg(long, env = "ATTENDANCE_DB_PATH", default_value = "attendance.db")]
    db_path: String,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Add or update a roster entry.
    AddSubject {
        #[arg(long)]
        id: SubjectId,
        #[arg(long)]
        name: String,
        /// Keep the subject on the roster without counting them in stats.
        #[arg(long)]
        inactive: bool,
    },
    /// Print attendance figures for a day (default: today).
    Stats {
        /// Day to report, YYYY-MM-DD.
        #[arg(long)]
        date: Option<String>,
    },
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();
    let args = Args::parse();
    let store = SqliteAttendanceStore::open(&args.db_path)?;

    match args.command {
        Command::AddSubject { id, name, inactive } => {
            store.add_subject(id, &name, !inactive)?;
            println!(
                "subject {} ({}) saved{}",
                id,
                name,
                if inactive { " as inactive" } else { "" }
            );
        }
        Command::Stats { date } => {
            let date = match date {
                Some(raw) => NaiveDate::parse_from_str(&raw, "%Y-%m-%d")
                    .map_err(|_| anyhow!("--date must be YYYY-MM-DD, got '{}'", raw))?,
                None => chrono::Local::now().date_naive(),
            };
            let stats = daily_stats(&store, date);
            println!("{}", serde_json::to_string_pretty(&stats)?);
            for record in store.records_on(date)? {
                println!(
                    "{}  subject {}  {}",
                    record.time, record.subject_id, record.session_id
                );
            }
        }
    }
    Ok(())
}
