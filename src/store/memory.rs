use super::{system_clock, Clock, DeleteOutcome, Store, StoreError, StoredRow, UpsertOutcome};
use crate::record::DeathRecord;
use std::collections::HashMap;

/// In-process store used for dry runs. Keeps an undo journal so a rollback
/// restores exactly what the last commit left behind.
pub struct MemoryStore {
    rows: HashMap<String, StoredRow>,
    undo: Vec<(String, Option<StoredRow>)>,
    commits: usize,
    clock: Clock,
}

impl MemoryStore {
    pub fn new() -> MemoryStore {
        MemoryStore::with_clock(system_clock())
    }

    pub fn with_clock(clock: Clock) -> MemoryStore {
        MemoryStore {
            rows: Default::default(),
            undo: Vec::new(),
            commits: 0,
            clock,
        }
    }

    pub fn get(&self, ssn: &str) -> Option<&StoredRow> {
        self.rows.get(ssn)
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn commits(&self) -> usize {
        self.commits
    }

    /// Rows sorted by key, for comparing whole-store snapshots.
    pub fn snapshot(&self) -> Vec<StoredRow> {
        let mut rows: Vec<StoredRow> = self.rows.values().cloned().collect();
        rows.sort_by(|a, b| a.record.ssn.cmp(&b.record.ssn));
        rows
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl Store for MemoryStore {
    fn upsert(&mut self, record: &DeathRecord) -> Result<UpsertOutcome, StoreError> {
        let now = (self.clock)();
        let previous = self.rows.get(&record.ssn).cloned();
        let (created, outcome) = match &previous {
            Some(row) => (row.created, UpsertOutcome::Updated),
            None => (now, UpsertOutcome::Inserted),
        };
        self.undo.push((record.ssn.clone(), previous));
        self.rows.insert(
            record.ssn.clone(),
            StoredRow {
                record: record.clone(),
                created,
                updated: now,
            },
        );
        Ok(outcome)
    }

    fn delete(&mut self, ssn: &str) -> Result<DeleteOutcome, StoreError> {
        match self.rows.remove(ssn) {
            Some(row) => {
                self.undo.push((ssn.to_string(), Some(row)));
                Ok(DeleteOutcome::Deleted)
            }
            None => Ok(DeleteOutcome::NotFound),
        }
    }

    fn commit(&mut self) -> Result<(), StoreError> {
        self.undo.clear();
        self.commits += 1;
        Ok(())
    }

    fn rollback(&mut self) -> Result<(), StoreError> {
        while let Some((ssn, previous)) = self.undo.pop() {
            match previous {
                Some(row) => self.rows.insert(ssn, row),
                None => self.rows.remove(&ssn),
            };
        }
        Ok(())
    }

    fn close(mut self) -> Result<(), StoreError> {
        self.rollback()
    }
}
