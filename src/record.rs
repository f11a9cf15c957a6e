use chrono::NaiveDate;

use crate::date::{self, DateError};

/// What a source line asks the store to do with its key.
#[derive(Copy, Debug, Clone, PartialEq, Eq)]
pub enum Status {
    Add,
    Change,
    Delete,
    Unknown(char),
}

impl Status {
    /// Blank and `A` both mean add; full files leave the flag blank.
    pub fn from_flag(flag: char) -> Status {
        match flag {
            ' ' | 'A' => Status::Add,
            'C' => Status::Change,
            'D' => Status::Delete,
            other => Status::Unknown(other),
        }
    }
}

/// One fixed-width line sliced into its fields, nothing validated yet.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SourceRecord {
    pub(crate) flag: char,
    pub(crate) ssn: String,
    pub(crate) last: String,
    pub(crate) suffix: String,
    pub(crate) first: String,
    pub(crate) middle: String,
    pub(crate) verified: String,
    pub(crate) date_of_death: String,
    pub(crate) date_of_birth: String,
}

/// Both raw date fields that failed validation for a single record.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct InvalidDates {
    pub date_of_death: Option<DateError>,
    pub date_of_birth: Option<DateError>,
}

impl std::fmt::Display for InvalidDates {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut parts = Vec::new();
        if let Some(err) = &self.date_of_death {
            parts.push(format!("date of death {err}"));
        }
        if let Some(err) = &self.date_of_birth {
            parts.push(format!("date of birth {err}"));
        }
        write!(f, "{}", parts.join(", "))
    }
}

impl SourceRecord {
    pub fn status(&self) -> Status {
        Status::from_flag(self.flag)
    }

    pub fn flag(&self) -> char {
        self.flag
    }

    pub fn ssn(&self) -> &str {
        &self.ssn
    }

    /// Checks both dates independently so a rejection can name every bad field.
    pub fn validate(&self) -> Result<DeathRecord, InvalidDates> {
        let death = date::parse_legacy_date(&self.date_of_death);
        let birth = date::parse_legacy_date(&self.date_of_birth);
        match (death, birth) {
            (Ok(date_of_death), Ok(date_of_birth)) => Ok(DeathRecord {
                ssn: self.ssn.clone(),
                last: self.last.clone(),
                suffix: self.suffix.clone(),
                first: self.first.clone(),
                middle: self.middle.clone(),
                verified: self.verified.clone(),
                date_of_death,
                date_of_birth,
            }),
            (death, birth) => Err(InvalidDates {
                date_of_death: death.err(),
                date_of_birth: birth.err(),
            }),
        }
    }
}

/// A validated record, shaped like a `death_index` row minus its timestamps.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DeathRecord {
    pub ssn: String,
    pub last: String,
    pub suffix: String,
    pub first: String,
    pub middle: String,
    pub verified: String,
    pub date_of_death: NaiveDate,
    pub date_of_birth: NaiveDate,
}
