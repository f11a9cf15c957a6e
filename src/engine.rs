use crate::parser::{ParseError, Parser};
use crate::record::{DeathRecord, SourceRecord, Status};
use crate::report::{LoadEvent, Reporter};
use crate::store::{DeleteOutcome, Store, StoreError, UpsertOutcome};
use serde::Serialize;
use std::io::{BufRead, Write};
use thiserror::Error;

pub const DEFAULT_COMMIT_INTERVAL: usize = 100;

/// What to do when the store refuses a single mutation.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub enum ErrorPolicy {
    /// Roll back the open batch and stop the run.
    #[default]
    Abort,
    /// Report the record and keep going.
    SkipAndContinue,
}

#[derive(Debug, Error)]
pub enum LoadError {
    #[error("line {line}: could not apply {ssn}: {source}")]
    Mutation {
        line: usize,
        ssn: String,
        source: StoreError,
    },
    #[error("line {line}: commit failed: {source}")]
    Commit { line: usize, source: StoreError },
    #[error("line {line}: {source}")]
    Read { line: usize, source: ParseError },
}

/// Per-run tallies.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct LoadReport {
    pub lines: usize,
    pub inserted: usize,
    pub updated: usize,
    pub deleted: usize,
    pub delete_missing: usize,
    pub unexpected: usize,
    pub malformed: usize,
    pub invalid_dates: usize,
    pub unknown_status: usize,
    pub failed: usize,
    pub commits: usize,
}

impl LoadReport {
    pub fn skipped(&self) -> usize {
        self.malformed + self.invalid_dates + self.unknown_status + self.failed
    }

    /// Writes the tallies as a one-row CSV table with a header.
    pub fn write_csv<W: Write>(&self, writer: W) -> Result<(), csv::Error> {
        let mut wtr = csv::Writer::from_writer(writer);
        wtr.serialize(self)?;
        wtr.flush()?;
        Ok(())
    }
}

pub struct Engine<'a, S, R> {
    store: &'a mut S,
    reporter: &'a mut R,
    commit_interval: usize,
    policy: ErrorPolicy,
    report: LoadReport,
}

impl<'a, S: Store, R: Reporter> Engine<'a, S, R> {
    pub fn new(
        store: &'a mut S,
        reporter: &'a mut R,
        commit_interval: usize,
        policy: ErrorPolicy,
    ) -> Engine<'a, S, R> {
        Engine {
            store,
            reporter,
            commit_interval: commit_interval.max(1),
            policy,
            report: LoadReport::default(),
        }
    }

    fn upsert(
        &mut self,
        line: usize,
        record: &DeathRecord,
        status: Status,
    ) -> Result<(), StoreError> {
        let outcome = self.store.upsert(record)?;
        let ssn = record.ssn.as_str();
        match (status, outcome) {
            (Status::Change, UpsertOutcome::Inserted) => {
                self.report.inserted += 1;
                self.report.unexpected += 1;
                self.reporter.report(&LoadEvent::Unexpected {
                    line,
                    ssn,
                    status,
                    detail: "inserted a new row",
                });
            }
            (Status::Change, UpsertOutcome::Updated) => {
                self.report.updated += 1;
                self.reporter.report(&LoadEvent::Updated { line, ssn });
            }
            (_, UpsertOutcome::Inserted) => {
                self.report.inserted += 1;
                self.reporter.report(&LoadEvent::Inserted { line, ssn });
            }
            (_, UpsertOutcome::Updated) => {
                self.report.updated += 1;
                self.report.unexpected += 1;
                self.reporter.report(&LoadEvent::Unexpected {
                    line,
                    ssn,
                    status,
                    detail: "updated an existing row",
                });
            }
        }
        Ok(())
    }

    fn delete(&mut self, line: usize, ssn: &str) -> Result<(), StoreError> {
        match self.store.delete(ssn)? {
            DeleteOutcome::Deleted => {
                self.report.deleted += 1;
                self.reporter.report(&LoadEvent::Deleted { line, ssn });
            }
            DeleteOutcome::NotFound => {
                self.report.delete_missing += 1;
                self.reporter.report(&LoadEvent::Unexpected {
                    line,
                    ssn,
                    status: Status::Delete,
                    detail: "had no row to delete",
                });
            }
        }
        Ok(())
    }

    /// Dates are checked before anything touches the store, whatever the status.
    fn apply(&mut self, line: usize, source: &SourceRecord) -> Result<(), LoadError> {
        let record = match source.validate() {
            Ok(record) => record,
            Err(invalid) => {
                self.report.invalid_dates += 1;
                self.reporter.report(&LoadEvent::InvalidDate {
                    line,
                    ssn: source.ssn(),
                    reason: invalid.to_string(),
                });
                return Ok(());
            }
        };

        let result = match source.status() {
            status @ (Status::Add | Status::Change) => self.upsert(line, &record, status),
            Status::Delete => self.delete(line, &record.ssn),
            Status::Unknown(flag) => {
                self.report.unknown_status += 1;
                self.reporter.report(&LoadEvent::UnknownStatus {
                    line,
                    ssn: source.ssn(),
                    flag,
                });
                Ok(())
            }
        };

        let Err(err) = result else {
            return Ok(());
        };
        self.report.failed += 1;
        self.reporter.report(&LoadEvent::MutationFailed {
            line,
            ssn: source.ssn(),
            reason: err.to_string(),
        });
        match self.policy {
            ErrorPolicy::SkipAndContinue if !err.is_fatal() => Ok(()),
            _ => {
                self.abandon();
                Err(LoadError::Mutation {
                    line,
                    ssn: record.ssn,
                    source: err,
                })
            }
        }
    }

    fn abandon(&mut self) {
        if let Err(err) = self.store.rollback() {
            log::error!("rollback failed: {}", err);
        }
    }

    fn commit(&mut self, line: usize) -> Result<(), LoadError> {
        if let Err(source) = self.store.commit() {
            self.abandon();
            return Err(LoadError::Commit { line, source });
        }
        self.report.commits += 1;
        self.reporter.report(&LoadEvent::Committed { line });
        Ok(())
    }

    /// Applies every line of `input` in order, committing every
    /// `commit_interval` lines and once more at the end.
    pub fn process<B: BufRead>(&mut self, input: B) -> Result<LoadReport, LoadError> {
        let mut line = 0;
        for parsed in Parser::new(input) {
            line += 1;
            self.report.lines = line;
            match parsed {
                Ok(record) => self.apply(line, &record)?,
                Err(source) if source.is_fatal() => {
                    self.abandon();
                    return Err(LoadError::Read { line, source });
                }
                Err(err) => {
                    self.report.malformed += 1;
                    self.reporter.report(&LoadEvent::Malformed {
                        line,
                        reason: err.to_string(),
                    });
                }
            }

            if line % self.commit_interval == 0 {
                self.commit(line)?;
            }
        }

        self.commit(line)?;
        Ok(std::mem::take(&mut self.report))
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::parser::test::fixed_line;
    use crate::report::test::RecordingReporter;
    use crate::store::memory::test::ticking_clock;
    use crate::store::MemoryStore;

    fn base_store() -> MemoryStore {
        MemoryStore::with_clock(ticking_clock())
    }

    fn lines(lines: &[String]) -> String {
        lines.join("\n")
    }

    fn add(ssn: &str) -> String {
        fixed_line('A', ssn, "06011985", "01011950")
    }

    /// Fails any mutation touching `poison`, otherwise defers to a `MemoryStore`.
    struct FailingStore {
        inner: MemoryStore,
        poison: &'static str,
        lose_transaction: bool,
        rollbacks: usize,
    }

    impl FailingStore {
        fn new(poison: &'static str) -> FailingStore {
            FailingStore {
                inner: base_store(),
                poison,
                lose_transaction: false,
                rollbacks: 0,
            }
        }
    }

    impl Store for FailingStore {
        fn upsert(&mut self, record: &DeathRecord) -> Result<UpsertOutcome, StoreError> {
            if record.ssn == self.poison && self.lose_transaction {
                self.inner.rollback()?;
                return Err(StoreError::TransactionLost(rusqlite::Error::InvalidQuery));
            }
            if record.ssn == self.poison {
                return Err(StoreError::Backend("constraint violation".to_string()));
            }
            self.inner.upsert(record)
        }

        fn delete(&mut self, ssn: &str) -> Result<DeleteOutcome, StoreError> {
            if ssn == self.poison {
                return Err(StoreError::Backend("connection lost".to_string()));
            }
            self.inner.delete(ssn)
        }

        fn commit(&mut self) -> Result<(), StoreError> {
            self.inner.commit()
        }

        fn rollback(&mut self) -> Result<(), StoreError> {
            self.rollbacks += 1;
            self.inner.rollback()
        }

        fn close(self) -> Result<(), StoreError> {
            self.inner.close()
        }
    }

    #[test]
    fn add_fresh_key() {
        let mut store = base_store();
        let mut reporter = RecordingReporter::default();
        let mut engine = Engine::new(&mut store, &mut reporter, 100, ErrorPolicy::Abort);
        let report = engine.process(add("123456789").as_bytes()).unwrap();

        assert_eq!(report.inserted, 1);
        assert_eq!(report.unexpected, 0);
        let row = store.get("123456789").unwrap();
        assert_eq!(row.record.last, format!("{:<20}", "DOE"));
        assert_eq!(row.record.verified, "V");
        assert_eq!(row.created, row.updated);
    }

    #[test]
    fn blank_status_adds() {
        let mut store = base_store();
        let mut reporter = RecordingReporter::default();
        let input = fixed_line(' ', "123456789", "06011985", "01011950");
        let report = Engine::new(&mut store, &mut reporter, 100, ErrorPolicy::Abort)
            .process(input.as_bytes())
            .unwrap();
        assert_eq!(report.inserted, 1);
        assert!(store.get("123456789").is_some());
    }

    #[test]
    fn change_replaces_fields() {
        let mut store = base_store();
        let mut reporter = RecordingReporter::default();
        let input = lines(&[
            add("123456789"),
            fixed_line('C', "123456789", "07021986", "01011950"),
        ]);
        let mut engine = Engine::new(&mut store, &mut reporter, 1, ErrorPolicy::Abort);
        let report = engine.process(input.as_bytes()).unwrap();

        assert_eq!(report.inserted, 1);
        assert_eq!(report.updated, 1);
        assert_eq!(report.unexpected, 0);
        let row = store.get("123456789").unwrap();
        assert_eq!(
            row.record.date_of_death,
            chrono::NaiveDate::from_ymd_opt(1986, 7, 2).unwrap()
        );
        assert!(row.updated > row.created);
    }

    #[test]
    fn change_without_row_is_tolerated() {
        let mut store = base_store();
        let mut reporter = RecordingReporter::default();
        let input = fixed_line('C', "123456789", "06011985", "01011950");
        let report = Engine::new(&mut store, &mut reporter, 100, ErrorPolicy::Abort)
            .process(input.as_bytes())
            .unwrap();

        assert_eq!(report.inserted, 1);
        assert_eq!(report.unexpected, 1);
        assert!(store.get("123456789").is_some());
        assert!(reporter.events[0].starts_with("Unexpected"));
    }

    #[test]
    fn add_over_existing_row_is_tolerated() {
        let mut store = base_store();
        let mut reporter = RecordingReporter::default();
        let input = lines(&[add("123456789"), add("123456789")]);
        let report = Engine::new(&mut store, &mut reporter, 100, ErrorPolicy::Abort)
            .process(input.as_bytes())
            .unwrap();

        assert_eq!(report.inserted, 1);
        assert_eq!(report.updated, 1);
        assert_eq!(report.unexpected, 1);
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn delete_removes_key_whether_or_not_present() {
        let mut store = base_store();
        let mut reporter = RecordingReporter::default();
        let input = lines(&[
            add("000000001"),
            fixed_line('D', "000000001", "06011985", "01011950"),
            fixed_line('D', "000000002", "06011985", "01011950"),
        ]);
        let report = Engine::new(&mut store, &mut reporter, 100, ErrorPolicy::Abort)
            .process(input.as_bytes())
            .unwrap();

        assert_eq!(report.deleted, 1);
        assert_eq!(report.delete_missing, 1);
        assert!(store.is_empty());
    }

    #[test]
    fn invalid_dates_never_reach_the_store() {
        let mut store = base_store();
        let mut reporter = RecordingReporter::default();
        let input = lines(&[
            fixed_line('A', "000000001", "60006200", "01011950"),
            fixed_line('A', "000000002", "06011985", "02291900"),
            fixed_line('C', "000000003", "0601198X", "01011950"),
        ]);
        let report = Engine::new(&mut store, &mut reporter, 100, ErrorPolicy::Abort)
            .process(input.as_bytes())
            .unwrap();

        assert_eq!(report.invalid_dates, 3);
        assert_eq!(report.inserted, 0);
        assert!(store.is_empty());
        assert!(reporter.events[0].contains("000000001"));
        assert!(reporter.events[0].contains("60006200"));
        assert!(reporter.events[1].contains("02291900"));
    }

    #[test]
    fn invalid_date_blocks_delete() {
        let mut store = base_store();
        let mut reporter = RecordingReporter::default();
        let input = lines(&[
            add("000000001"),
            fixed_line('D', "000000001", "13011985", "01011950"),
        ]);
        let report = Engine::new(&mut store, &mut reporter, 100, ErrorPolicy::Abort)
            .process(input.as_bytes())
            .unwrap();

        assert_eq!(report.invalid_dates, 1);
        assert!(store.get("000000001").is_some());
    }

    #[test]
    fn unknown_status_and_short_lines_are_skipped() {
        let mut store = base_store();
        let mut reporter = RecordingReporter::default();
        let input = lines(&[
            fixed_line('X', "000000001", "06011985", "01011950"),
            "A000000002DOE".to_string(),
            String::new(),
            add("000000003"),
        ]);
        let report = Engine::new(&mut store, &mut reporter, 100, ErrorPolicy::Abort)
            .process(input.as_bytes())
            .unwrap();

        assert_eq!(report.lines, 4);
        assert_eq!(report.unknown_status, 1);
        assert_eq!(report.malformed, 2);
        assert_eq!(report.skipped(), 3);
        assert_eq!(store.len(), 1);
        assert!(store.get("000000003").is_some());
    }

    #[test]
    fn commits_at_each_boundary_and_at_end() {
        let n = 5;
        let input: Vec<String> = (0..2 * n + 1).map(|i| add(&format!("{:09}", i))).collect();
        let mut store = base_store();
        let mut reporter = RecordingReporter::default();
        let report = Engine::new(&mut store, &mut reporter, n, ErrorPolicy::Abort)
            .process(lines(&input).as_bytes())
            .unwrap();

        assert_eq!(report.commits, 3);
        assert_eq!(store.commits(), 3);
        assert_eq!(store.len(), 2 * n + 1);
    }

    #[test]
    fn later_records_win() {
        let mut store = base_store();
        let mut reporter = RecordingReporter::default();
        let input = lines(&[
            add("000000001"),
            fixed_line('D', "000000001", "06011985", "01011950"),
            fixed_line('A', "000000001", "08081988", "01011950"),
        ]);
        Engine::new(&mut store, &mut reporter, 100, ErrorPolicy::Abort)
            .process(input.as_bytes())
            .unwrap();

        let row = store.get("000000001").unwrap();
        assert_eq!(
            row.record.date_of_death,
            chrono::NaiveDate::from_ymd_opt(1988, 8, 8).unwrap()
        );
    }

    #[test]
    fn same_file_twice_is_idempotent() {
        let input = lines(&[
            add("000000001"),
            add("000000002"),
            fixed_line('C', "000000001", "07021986", "01011950"),
            fixed_line('D', "000000002", "06011985", "01011950"),
            add("000000003"),
        ]);
        let mut store = base_store();
        let mut reporter = RecordingReporter::default();
        Engine::new(&mut store, &mut reporter, 2, ErrorPolicy::Abort)
            .process(input.as_bytes())
            .unwrap();
        let once: Vec<DeathRecord> = store.snapshot().into_iter().map(|r| r.record).collect();
        Engine::new(&mut store, &mut reporter, 2, ErrorPolicy::Abort)
            .process(input.as_bytes())
            .unwrap();
        let twice: Vec<DeathRecord> = store.snapshot().into_iter().map(|r| r.record).collect();

        assert_eq!(once, twice);
        assert_eq!(twice.len(), 2);
    }

    #[test]
    fn summary_csv() {
        let report = LoadReport {
            lines: 3,
            inserted: 2,
            invalid_dates: 1,
            commits: 1,
            ..Default::default()
        };
        let mut out = Vec::new();
        report.write_csv(&mut out).unwrap();
        assert_eq!(
            String::from_utf8(out).unwrap(),
            "lines,inserted,updated,deleted,delete_missing,unexpected,malformed,invalid_dates,unknown_status,failed,commits\n\
             3,2,0,0,0,0,0,1,0,0,1\n"
        );
    }

    #[test]
    fn failure_rolls_back_open_batch() {
        let mut store = FailingStore::new("000000004");
        let mut reporter = RecordingReporter::default();
        let input = lines(&[
            add("000000001"),
            add("000000002"),
            add("000000003"),
            add("000000004"),
            add("000000005"),
        ]);
        let mut engine = Engine::new(&mut store, &mut reporter, 2, ErrorPolicy::Abort);
        let err = engine.process(input.as_bytes()).unwrap_err();

        match err {
            LoadError::Mutation { line, ssn, .. } => {
                assert_eq!(line, 4);
                assert_eq!(ssn, "000000004");
            }
            other => panic!("unexpected error: {other}"),
        }
        assert_eq!(store.rollbacks, 1);
        assert_eq!(store.inner.len(), 2);
        assert!(store.inner.get("000000003").is_none());
        assert!(store.inner.get("000000005").is_none());
    }

    #[test]
    fn lost_transaction_is_fatal_even_when_skipping() {
        let mut store = FailingStore::new("000000002");
        store.lose_transaction = true;
        let mut reporter = RecordingReporter::default();
        let input = lines(&[add("000000001"), add("000000002"), add("000000003")]);
        let err = Engine::new(&mut store, &mut reporter, 100, ErrorPolicy::SkipAndContinue)
            .process(input.as_bytes())
            .unwrap_err();

        assert!(matches!(err, LoadError::Mutation { line: 2, .. }));
        assert_eq!(store.rollbacks, 1);
        assert!(store.inner.is_empty());
        assert!(store.inner.get("000000003").is_none());
    }

    #[test]
    fn skip_policy_keeps_going() {
        let mut store = FailingStore::new("000000002");
        let mut reporter = RecordingReporter::default();
        let input = lines(&[
            add("000000001"),
            fixed_line('D', "000000002", "06011985", "01011950"),
            add("000000003"),
        ]);
        let report = Engine::new(&mut store, &mut reporter, 100, ErrorPolicy::SkipAndContinue)
            .process(input.as_bytes())
            .unwrap();

        assert_eq!(report.failed, 1);
        assert_eq!(report.inserted, 2);
        assert_eq!(store.rollbacks, 0);
        assert_eq!(store.inner.len(), 2);
        assert!(reporter
            .events
            .iter()
            .any(|e| e.starts_with("MutationFailed") && e.contains("connection lost")));
    }
}
