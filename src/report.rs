use crate::record::Status;
use serde::Serialize;
use std::io::Write;

/// What happened to one input line, or to the run as a whole.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoadEvent<'a> {
    Inserted { line: usize, ssn: &'a str },
    Updated { line: usize, ssn: &'a str },
    Deleted { line: usize, ssn: &'a str },
    /// The store did the right thing, just not what the status flag implied.
    Unexpected {
        line: usize,
        ssn: &'a str,
        status: Status,
        detail: &'static str,
    },
    Malformed { line: usize, reason: String },
    InvalidDate { line: usize, ssn: &'a str, reason: String },
    UnknownStatus { line: usize, ssn: &'a str, flag: char },
    MutationFailed { line: usize, ssn: &'a str, reason: String },
    Committed { line: usize },
}

/// Receives per-record outcomes from the engine.
pub trait Reporter {
    fn report(&mut self, event: &LoadEvent<'_>);
}

#[derive(Debug, Serialize)]
struct RejectRow<'a> {
    line: usize,
    ssn: &'a str,
    reason: &'static str,
    detail: String,
}

/// Routes events onto the `log` facade and, optionally, skipped records into
/// a CSV reject file.
pub struct LogReporter {
    rejects: Option<csv::Writer<Box<dyn Write>>>,
}

impl LogReporter {
    pub fn new() -> LogReporter {
        LogReporter { rejects: None }
    }

    pub fn with_rejects(writer: Box<dyn Write>) -> LogReporter {
        LogReporter {
            rejects: Some(csv::Writer::from_writer(writer)),
        }
    }

    fn reject(&mut self, line: usize, ssn: &str, reason: &'static str, detail: String) {
        if let Some(wtr) = self.rejects.as_mut() {
            let row = RejectRow {
                line,
                ssn,
                reason,
                detail,
            };
            if let Err(err) = wtr.serialize(row) {
                log::warn!("could not write reject row for line {}: {}", line, err);
            }
        }
    }

    pub fn flush(&mut self) -> Result<(), std::io::Error> {
        match self.rejects.as_mut() {
            Some(wtr) => wtr.flush(),
            None => Ok(()),
        }
    }
}

impl Default for LogReporter {
    fn default() -> Self {
        Self::new()
    }
}

impl Reporter for LogReporter {
    fn report(&mut self, event: &LoadEvent<'_>) {
        match event {
            LoadEvent::Inserted { line, ssn } => log::info!("line {}: inserted {}", line, ssn),
            LoadEvent::Updated { line, ssn } => log::info!("line {}: updated {}", line, ssn),
            LoadEvent::Deleted { line, ssn } => log::info!("line {}: deleted {}", line, ssn),
            LoadEvent::Unexpected {
                line,
                ssn,
                status,
                detail,
            } => log::warn!("line {}: {:?} for {} {}", line, status, ssn, detail),
            LoadEvent::Malformed { line, reason } => {
                log::warn!("line {}: skipping malformed record: {}", line, reason);
                self.reject(*line, "", "malformed", reason.clone());
            }
            LoadEvent::InvalidDate { line, ssn, reason } => {
                log::warn!("line {}: skipping {}: invalid {}", line, ssn, reason);
                self.reject(*line, ssn, "invalid_date", reason.clone());
            }
            LoadEvent::UnknownStatus { line, ssn, flag } => {
                log::error!("line {}: skipping {}: unknown status {:?}", line, ssn, flag);
                self.reject(*line, ssn, "unknown_status", flag.to_string());
            }
            LoadEvent::MutationFailed { line, ssn, reason } => {
                log::error!("line {}: could not apply {}: {}", line, ssn, reason);
                self.reject(*line, ssn, "mutation_failed", reason.clone());
            }
            LoadEvent::Committed { line } => log::info!("committed through line {}", line),
        }
    }
}
