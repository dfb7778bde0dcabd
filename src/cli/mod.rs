pub mod account;
pub mod records;
pub mod tasks;
pub mod timeline;
pub mod tracking;

use std::{fmt::Display, path::Path, path::PathBuf, sync::Arc};

use anyhow::Result;
use chrono::{Local, NaiveDate};
use chrono_english::parse_date_string;
use clap::{CommandFactory, Parser, Subcommand, ValueEnum};
use records::RecordsCommand;
use tasks::TasksCommand;
use timeline::{DatesCommand, SummaryCommand, TimelineCommand};
use tracing::level_filters::LevelFilter;

use crate::{
    remote::{http::HttpRemoteStore, identity},
    storage::{RemoteHandle, Storage, StorageOptions},
    utils::{
        clock::{Clock, DefaultClock},
        dir::create_application_default_path,
        logging::enable_logging,
        time::{parse_date_key, parse_wall_minutes},
    },
};

#[derive(Parser, Debug)]
#[command(name = "stint", version, long_about = None)]
#[command(about = "Offline-first time tracker with tasks, records and background sync", long_about = None)]
struct Args {
    #[command(subcommand)]
    commands: Commands,
    #[arg(long, help = "Mirror logs to stdout")]
    log: bool,
    #[arg(
        long,
        help = "Application directory. By default tries to save into $XDG_STATE_HOME or $HOME/.local/state"
    )]
    dir: Option<PathBuf>,
}

#[derive(Subcommand, Debug)]
#[command(version, about, long_about = None)]
enum Commands {
    #[command(about = "Manage tasks")]
    Tasks {
        #[command(subcommand)]
        command: TasksCommand,
    },
    #[command(about = "Start timing a task. Without an argument the selected task is used")]
    Start { task: Option<String> },
    #[command(about = "Stop the running timer and record the stretch")]
    Stop {},
    #[command(about = "Stop the running timer without recording anything")]
    Discard {},
    #[command(about = "Show what the timer is doing")]
    Status {},
    #[command(about = "Follow the running timer with a live readout until Ctrl-C")]
    Watch {},
    #[command(about = "Manage records")]
    Records {
        #[command(subcommand)]
        command: RecordsCommand,
    },
    #[command(about = "Draw a day as a colored minute grid")]
    Timeline {
        #[command(flatten)]
        command: TimelineCommand,
    },
    #[command(about = "Per-task totals over a date range")]
    Summary {
        #[command(flatten)]
        command: SummaryCommand,
    },
    #[command(about = "List dates that have records")]
    Dates {
        #[command(flatten)]
        command: DatesCommand,
    },
    #[command(about = "Log in against a sync server")]
    Login {
        server_url: String,
        user_id: String,
        #[arg(long, help = "Bearer token sent with every request")]
        token: Option<String>,
    },
    #[command(about = "Log out and stop syncing. Local data is kept")]
    Logout {},
    #[command(about = "Reconcile with the sync server now")]
    Sync {},
    #[command(about = "Show the stored login session")]
    Account {},
}

pub async fn run_cli() -> Result<()> {
    let args = Args::parse();

    let data_dir = match &args.dir {
        Some(dir) => {
            std::fs::create_dir_all(dir)?;
            dir.clone()
        }
        None => create_application_default_path()?,
    };

    let logging_level = if args.log {
        Some(LevelFilter::TRACE)
    } else {
        None
    };
    enable_logging(&data_dir, logging_level, args.log)?;

    match args.commands {
        // Session commands manage the auth file and never need an open store.
        Commands::Login {
            server_url,
            user_id,
            token,
        } => account::process_login(&data_dir, server_url, user_id, token).await,
        Commands::Logout {} => account::process_logout(&data_dir).await,
        Commands::Account {} => account::process_account(&data_dir).await,
        command => {
            let clock = Arc::new(DefaultClock);
            let storage = open_storage(&data_dir, clock.clone()).await?;
            let result = dispatch(command, &storage, clock).await;
            storage.close().await;
            result
        }
    }
}

async fn dispatch(
    command: Commands,
    storage: &Arc<Storage>,
    clock: Arc<DefaultClock>,
) -> Result<()> {
    match command {
        Commands::Tasks { command } => tasks::process_tasks_command(command, storage).await,
        Commands::Start { task } => tracking::process_start(storage, clock, task).await,
        Commands::Stop {} => tracking::process_stop(storage, clock, true).await,
        Commands::Discard {} => tracking::process_stop(storage, clock, false).await,
        Commands::Status {} => tracking::process_status(storage, clock),
        Commands::Watch {} => tracking::process_watch(storage, clock).await,
        Commands::Records { command } => records::process_records_command(command, storage).await,
        Commands::Timeline { command } => timeline::process_timeline_command(command, storage).await,
        Commands::Summary { command } => timeline::process_summary_command(command, storage).await,
        Commands::Dates { command } => timeline::process_dates_command(command, storage).await,
        Commands::Sync {} => account::process_sync(storage).await,
        // Handled before the store is opened.
        Commands::Login { .. } | Commands::Logout {} | Commands::Account {} => Ok(()),
    }
}

/// Opens the storage facade, wiring in the remote store when a login session
/// is on disk.
pub(crate) async fn open_storage(data_dir: &Path, clock: Arc<dyn Clock>) -> Result<Arc<Storage>> {
    let remote = match identity::load_session(data_dir).await? {
        Some(session) => {
            let store = HttpRemoteStore::new(session.server_url, session.token)?;
            Some(RemoteHandle {
                store: Arc::new(store),
                user_id: session.user_id,
            })
        }
        None => None,
    };

    let storage = Storage::open(StorageOptions {
        data_dir: data_dir.to_owned(),
        clock,
        remote,
    })
    .await?;
    Ok(storage)
}

#[derive(Debug, Clone, Copy, ValueEnum)]
pub(crate) enum DateStyle {
    Uk,
    Us,
}

impl From<DateStyle> for chrono_english::Dialect {
    fn from(value: DateStyle) -> Self {
        match value {
            DateStyle::Uk => Self::Uk,
            DateStyle::Us => Self::Us,
        }
    }
}

impl Display for DateStyle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DateStyle::Uk => write!(f, "uk"),
            DateStyle::Us => write!(f, "us"),
        }
    }
}

/// A day argument: an exact `YYYY-MM-DD` day key, otherwise a lenient phrase
/// like "yesterday" or "15/03/2025". Absent means today.
pub(crate) fn parse_day_arg(value: Option<&str>, date_style: DateStyle) -> Result<NaiveDate> {
    let Some(value) = value else {
        return Ok(Local::now().date_naive());
    };
    if let Some(date) = parse_date_key(value) {
        return Ok(date);
    }
    match parse_date_string(value, Local::now(), date_style.into()) {
        Ok(parsed) => Ok(parsed.with_timezone(&Local).date_naive()),
        Err(e) => Err(arg_error(format!("Failed to parse date {value:?}: {e}"))),
    }
}

pub(crate) fn parse_wall_arg(value: &str) -> Result<u32> {
    parse_wall_minutes(value)
        .ok_or_else(|| arg_error(format!("Expected a HH:MM wall time, got {value:?}")))
}

pub(crate) fn arg_error(message: String) -> anyhow::Error {
    Args::command()
        .error(clap::error::ErrorKind::ValueValidation, message)
        .into()
}

pub(crate) fn parse_hex_color(value: &str) -> Option<(u8, u8, u8)> {
    let hex = value.strip_prefix('#')?;
    if hex.len() != 6 || !hex.is_ascii() {
        return None;
    }
    let r = u8::from_str_radix(&hex[0..2], 16).ok()?;
    let g = u8::from_str_radix(&hex[2..4], 16).ok()?;
    let b = u8::from_str_radix(&hex[4..6], 16).ok()?;
    Some((r, g, b))
}

/// Two-cell colored block for task colors, or a placeholder when the stored
/// color doesn't parse.
pub(crate) fn swatch(color: &str) -> String {
    match parse_hex_color(color) {
        Some((r, g, b)) => ansi_term::Colour::RGB(r, g, b).paint("██").to_string(),
        None => "??".to_string(),
    }
}

#[cfg(test)]
mod cli_tests {
    use super::{DateStyle, parse_day_arg, parse_hex_color};

    #[test]
    fn day_arguments_accept_keys_and_phrases() {
        let exact = parse_day_arg(Some("2025-03-15"), DateStyle::Uk).unwrap();
        assert_eq!(exact.to_string(), "2025-03-15");

        let today = parse_day_arg(None, DateStyle::Uk).unwrap();
        let yesterday = parse_day_arg(Some("yesterday"), DateStyle::Uk).unwrap();
        assert_eq!(yesterday.succ_opt().unwrap(), today);

        assert!(parse_day_arg(Some("not a date at all %%"), DateStyle::Uk).is_err());
    }

    #[test]
    fn hex_colors_parse_or_reject() {
        assert_eq!(parse_hex_color("#3B82F6"), Some((0x3B, 0x82, 0xF6)));
        assert_eq!(parse_hex_color("#000000"), Some((0, 0, 0)));
        assert_eq!(parse_hex_color("3B82F6"), None);
        assert_eq!(parse_hex_color("#3B82F"), None);
        assert_eq!(parse_hex_color("#GGGGGG"), None);
    }
}
