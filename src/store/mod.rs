//! The keyed `death_index` table the loader writes into.

use crate::record::DeathRecord;
use chrono::{NaiveDateTime, Utc};
use thiserror::Error;

pub mod memory;
pub mod sqlite;

pub use memory::MemoryStore;
pub use sqlite::SqliteStore;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("{0}")]
    Backend(String),
    /// The backend threw away the open transaction along with the failure.
    #[error("transaction rolled back by the database: {0}")]
    TransactionLost(#[source] rusqlite::Error),
}

impl StoreError {
    /// Writes made since the last commit are gone, so the batch can't continue.
    pub fn is_fatal(&self) -> bool {
        matches!(self, StoreError::TransactionLost(_))
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum UpsertOutcome {
    Inserted,
    Updated,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum DeleteOutcome {
    Deleted,
    NotFound,
}

/// A full `death_index` row as persisted.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StoredRow {
    pub record: DeathRecord,
    pub created: NaiveDateTime,
    pub updated: NaiveDateTime,
}

/// Source of `created`/`updated` timestamps.
pub type Clock = Box<dyn Fn() -> NaiveDateTime>;

pub fn system_clock() -> Clock {
    Box::new(|| Utc::now().naive_utc())
}

/// Mutations are buffered in an open transaction until `commit`.
pub trait Store {
    /// Writes every mutable field; `created` is only ever set on insert.
    fn upsert(&mut self, record: &DeathRecord) -> Result<UpsertOutcome, StoreError>;

    /// Removing an absent key is not an error.
    fn delete(&mut self, ssn: &str) -> Result<DeleteOutcome, StoreError>;

    fn commit(&mut self) -> Result<(), StoreError>;

    fn rollback(&mut self) -> Result<(), StoreError>;

    /// Anything not yet committed is discarded.
    fn close(self) -> Result<(), StoreError>
    where
        Self: Sized;
}
