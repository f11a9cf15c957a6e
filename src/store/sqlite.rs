use super::{system_clock, Clock, DeleteOutcome, Store, StoreError, StoredRow, UpsertOutcome};
use crate::record::DeathRecord;
use rusqlite::{params, Connection, OptionalExtension};
use std::path::Path;

const SCHEMA_SQL: &str = r#"
CREATE TABLE IF NOT EXISTS death_index (
    ssn TEXT PRIMARY KEY NOT NULL,
    last TEXT NOT NULL,
    suffix TEXT NOT NULL,
    first TEXT NOT NULL,
    middle TEXT NOT NULL,
    verified TEXT NOT NULL,
    date_of_death TEXT NOT NULL,
    date_of_birth TEXT NOT NULL,
    created TEXT NOT NULL,
    updated TEXT NOT NULL
);
"#;

const UPSERT_SQL: &str = r#"
INSERT INTO death_index (
    ssn, last, suffix, first, middle, verified,
    date_of_death, date_of_birth, created, updated
) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?9)
ON CONFLICT(ssn) DO UPDATE SET
    last = excluded.last,
    suffix = excluded.suffix,
    first = excluded.first,
    middle = excluded.middle,
    verified = excluded.verified,
    date_of_death = excluded.date_of_death,
    date_of_birth = excluded.date_of_birth,
    updated = excluded.updated
"#;

/// `death_index` in a SQLite database. Writes accumulate in one open
/// transaction that only `commit` makes durable.
pub struct SqliteStore {
    conn: Connection,
    clock: Clock,
}

impl SqliteStore {
    pub fn open(path: impl AsRef<Path>) -> Result<SqliteStore, StoreError> {
        let conn = Connection::open(path)?;
        SqliteStore::from_connection(conn, system_clock())
    }

    pub fn open_in_memory() -> Result<SqliteStore, StoreError> {
        SqliteStore::from_connection(Connection::open_in_memory()?, system_clock())
    }

    pub fn from_connection(conn: Connection, clock: Clock) -> Result<SqliteStore, StoreError> {
        conn.execute_batch(SCHEMA_SQL)?;
        Ok(SqliteStore { conn, clock })
    }

    fn begin(&self) -> Result<(), StoreError> {
        if self.conn.is_autocommit() {
            self.conn.execute_batch("BEGIN IMMEDIATE")?;
        }
        Ok(())
    }

    /// Runs `op` inside the open transaction. SQLite aborts the whole
    /// transaction on some failures (`RAISE(ROLLBACK)`, full disk, I/O
    /// errors); those come back as `TransactionLost`.
    fn in_transaction<T>(
        &self,
        op: impl FnOnce(&Connection) -> rusqlite::Result<T>,
    ) -> Result<T, StoreError> {
        self.begin()?;
        op(&self.conn).map_err(|err| {
            if self.conn.is_autocommit() {
                StoreError::TransactionLost(err)
            } else {
                StoreError::Sqlite(err)
            }
        })
    }

    pub fn get(&self, ssn: &str) -> Result<Option<StoredRow>, StoreError> {
        let row = self
            .conn
            .query_row(
                "SELECT ssn, last, suffix, first, middle, verified,
                        date_of_death, date_of_birth, created, updated
                 FROM death_index WHERE ssn = ?1",
                params![ssn],
                |row| {
                    Ok(StoredRow {
                        record: DeathRecord {
                            ssn: row.get(0)?,
                            last: row.get(1)?,
                            suffix: row.get(2)?,
                            first: row.get(3)?,
                            middle: row.get(4)?,
                            verified: row.get(5)?,
                            date_of_death: row.get(6)?,
                            date_of_birth: row.get(7)?,
                        },
                        created: row.get(8)?,
                        updated: row.get(9)?,
                    })
                },
            )
            .optional()?;
        Ok(row)
    }

    pub fn count(&self) -> Result<usize, StoreError> {
        let n: i64 = self
            .conn
            .query_row("SELECT COUNT(*) FROM death_index", [], |row| row.get(0))?;
        Ok(n as usize)
    }
}

impl Store for SqliteStore {
    fn upsert(&mut self, record: &DeathRecord) -> Result<UpsertOutcome, StoreError> {
        let now = (self.clock)();
        let existing = self.in_transaction(|conn| {
            let existing = conn
                .query_row(
                    "SELECT 1 FROM death_index WHERE ssn = ?1",
                    params![record.ssn],
                    |_| Ok(()),
                )
                .optional()?;
            conn.execute(
                UPSERT_SQL,
                params![
                    record.ssn,
                    record.last,
                    record.suffix,
                    record.first,
                    record.middle,
                    record.verified,
                    record.date_of_death,
                    record.date_of_birth,
                    now,
                ],
            )?;
            Ok(existing)
        })?;
        Ok(match existing {
            Some(()) => UpsertOutcome::Updated,
            None => UpsertOutcome::Inserted,
        })
    }

    fn delete(&mut self, ssn: &str) -> Result<DeleteOutcome, StoreError> {
        let removed = self.in_transaction(|conn| {
            conn.execute("DELETE FROM death_index WHERE ssn = ?1", params![ssn])
        })?;
        Ok(if removed > 0 {
            DeleteOutcome::Deleted
        } else {
            DeleteOutcome::NotFound
        })
    }

    fn commit(&mut self) -> Result<(), StoreError> {
        if !self.conn.is_autocommit() {
            self.conn.execute_batch("COMMIT")?;
        }
        Ok(())
    }

    fn rollback(&mut self) -> Result<(), StoreError> {
        if !self.conn.is_autocommit() {
            self.conn.execute_batch("ROLLBACK")?;
        }
        Ok(())
    }

    fn close(mut self) -> Result<(), StoreError> {
        self.rollback()?;
        self.conn.close().map_err(|(_, err)| StoreError::from(err))
    }
}
