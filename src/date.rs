use chrono::NaiveDate;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DateError {
    #[error("{0:?} is not an 8-digit MMDDCCYY value")]
    Shape(String),
    #[error("{0:?} is not a calendar date")]
    Calendar(String),
}

/// Parses the file's `MMDDCCYY` layout: month, day, then century and year
/// concatenated into a four digit year.
pub fn parse_legacy_date(raw: &str) -> Result<NaiveDate, DateError> {
    if raw.len() != 8 || !raw.bytes().all(|b| b.is_ascii_digit()) {
        return Err(DateError::Shape(raw.to_string()));
    }

    let field = |range: std::ops::Range<usize>| raw[range].parse::<u32>();
    let (month, day, century, year) = match (field(0..2), field(2..4), field(4..6), field(6..8)) {
        (Ok(m), Ok(d), Ok(c), Ok(y)) => (m, d, c, y),
        _ => return Err(DateError::Shape(raw.to_string())),
    };
    let year = (century * 100 + year) as i32;
    // 0000 is a placeholder in the file, not a year.
    if year == 0 {
        return Err(DateError::Calendar(raw.to_string()));
    }

    NaiveDate::from_ymd_opt(year, month, day).ok_or_else(|| DateError::Calendar(raw.to_string()))
}
