use crate::engine::{ErrorPolicy, DEFAULT_COMMIT_INTERVAL};
use clap::{ArgAction, Parser, ValueEnum};
use log::LevelFilter;
use std::path::PathBuf;
use std::time::Duration;

pub const DEFAULT_LISTING_URL: &str = "https://dmf.ntis.gov/dmldata/monthly/";

#[derive(Copy, Clone, Debug, PartialEq, Eq, ValueEnum)]
pub enum OnError {
    /// Roll back the open batch and exit non-zero.
    Abort,
    /// Log the record and carry on.
    Skip,
}

impl From<OnError> for ErrorPolicy {
    fn from(value: OnError) -> Self {
        match value {
            OnError::Abort => ErrorPolicy::Abort,
            OnError::Skip => ErrorPolicy::SkipAndContinue,
        }
    }
}

/// Load the Death Master File, in full or as this month's update, into the
/// `death_index` table.
#[derive(Parser, Debug)]
#[command(name = "dmf-sync", version)]
pub struct Cli {
    /// Full file or a historical update to load
    #[arg(required_unless_present = "update", conflicts_with = "update")]
    pub file: Option<PathBuf>,

    /// Fetch, verify and load the current month's update
    #[arg(short, long)]
    pub update: bool,

    /// Expected MD5 of FILE (update mode always uses the published one)
    #[arg(long)]
    pub md5: Option<String>,

    /// Records per transaction
    #[arg(
        short,
        long,
        default_value_t = DEFAULT_COMMIT_INTERVAL as u64,
        value_parser = clap::value_parser!(u64).range(1..)
    )]
    pub commit: u64,

    /// Target database name
    #[arg(short, long, default_value = "ssn")]
    pub database: String,

    /// More output; repeat for more
    #[arg(short, long, action = ArgAction::Count)]
    pub verbose: u8,

    /// What to do when a single record cannot be written
    #[arg(long, value_enum, default_value_t = OnError::Abort)]
    pub on_error: OnError,

    /// Write skipped records to this CSV file
    #[arg(long)]
    pub rejects: Option<PathBuf>,

    /// Reconcile against an empty in-memory table instead of the database
    #[arg(long)]
    pub dry_run: bool,

    #[arg(long, default_value = ".")]
    pub log_dir: PathBuf,

    #[arg(long, default_value = ".")]
    pub download_dir: PathBuf,

    #[arg(long, env = "DMF_LISTING_URL", default_value = DEFAULT_LISTING_URL)]
    pub listing_url: String,

    #[arg(long, env = "DMF_USER")]
    pub user: Option<String>,

    #[arg(long, env = "DMF_PASSWORD", hide_env_values = true)]
    pub password: Option<String>,

    /// Text identifying the ASCII variant in the listing's file names
    #[arg(long, default_value = "ascii")]
    pub marker: String,

    /// Download attempts before giving up
    #[arg(long, default_value_t = 3)]
    pub retries: u32,

    /// HTTP timeout in seconds
    #[arg(long, default_value_t = 120)]
    pub timeout: u64,
}

impl Cli {
    pub fn log_level(&self) -> LevelFilter {
        match self.verbose {
            0 => LevelFilter::Warn,
            1 => LevelFilter::Info,
            2 => LevelFilter::Debug,
            _ => LevelFilter::Trace,
        }
    }

    /// `ssn` becomes `ssn.db`; anything already ending in `.db` is a path.
    pub fn database_path(&self) -> PathBuf {
        if self.database.ends_with(".db") {
            PathBuf::from(&self.database)
        } else {
            PathBuf::from(format!("{}.db", self.database))
        }
    }

    pub fn commit_interval(&self) -> usize {
        self.commit as usize
    }

    pub fn policy(&self) -> ErrorPolicy {
        self.on_error.into()
    }

    pub fn http_timeout(&self) -> Duration {
        Duration::from_secs(self.timeout)
    }
}
