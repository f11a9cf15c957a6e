use crate::record::SourceRecord;
use std::io::{self, BufRead};
use std::ops::Range;
use thiserror::Error;

/// Shortest line that still carries every field.
pub const MIN_LINE_LEN: usize = 81;

const STATUS: Range<usize> = 0..1;
const SSN: Range<usize> = 1..10;
const LAST: Range<usize> = 10..30;
const SUFFIX: Range<usize> = 30..34;
const FIRST: Range<usize> = 34..49;
const MIDDLE: Range<usize> = 49..64;
const VERIFIED: Range<usize> = 64..65;
const DATE_OF_DEATH: Range<usize> = 65..73;
const DATE_OF_BIRTH: Range<usize> = 73..81;

#[derive(Debug, Error)]
pub enum ParseError {
    #[error("line is {0} bytes, need at least {min}", min = MIN_LINE_LEN)]
    TooShort(usize),
    #[error("field {0} is not valid text")]
    Encoding(&'static str),
    #[error("could not read input: {0}")]
    Io(#[from] io::Error),
}

impl ParseError {
    /// Only a failing reader stops the stream; everything else is one bad line.
    pub fn is_fatal(&self) -> bool {
        matches!(self, ParseError::Io(_))
    }
}

fn field(line: &[u8], range: Range<usize>, name: &'static str) -> Result<String, ParseError> {
    let bytes = line.get(range).ok_or(ParseError::TooShort(line.len()))?;
    std::str::from_utf8(bytes)
        .map(str::to_string)
        .map_err(|_| ParseError::Encoding(name))
}

/// Slices one line into its fields. Values are kept exactly as laid out,
/// padding included.
pub fn parse_line(line: &[u8]) -> Result<SourceRecord, ParseError> {
    if line.len() < MIN_LINE_LEN {
        return Err(ParseError::TooShort(line.len()));
    }

    // Any byte is a flag; unrecognised ones surface as an unknown status.
    Ok(SourceRecord {
        flag: char::from(line[STATUS.start]),
        ssn: field(line, SSN, "ssn")?,
        last: field(line, LAST, "last")?,
        suffix: field(line, SUFFIX, "suffix")?,
        first: field(line, FIRST, "first")?,
        middle: field(line, MIDDLE, "middle")?,
        verified: field(line, VERIFIED, "verified")?,
        date_of_death: field(line, DATE_OF_DEATH, "date_of_death")?,
        date_of_birth: field(line, DATE_OF_BIRTH, "date_of_birth")?,
    })
}

/// Streams records out of a reader, one per line, in file order.
pub struct Parser<R> {
    reader: R,
    buf: Vec<u8>,
}

impl<R: BufRead> Parser<R> {
    pub fn new(reader: R) -> Parser<R> {
        Parser {
            reader,
            buf: Vec::with_capacity(128),
        }
    }
}

impl<R: BufRead> Iterator for Parser<R> {
    type Item = Result<SourceRecord, ParseError>;

    fn next(&mut self) -> Option<Self::Item> {
        self.buf.clear();
        match self.reader.read_until(b'\n', &mut self.buf) {
            Ok(0) => None,
            Ok(_) => {
                let mut line = self.buf.as_slice();
                if let Some(stripped) = line.strip_suffix(b"\n") {
                    line = stripped;
                }
                if let Some(stripped) = line.strip_suffix(b"\r") {
                    line = stripped;
                }
                Some(parse_line(line))
            }
            Err(err) => Some(Err(err.into())),
        }
    }
}
