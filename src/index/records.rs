//! `key,value` text records used by bulk load and extract
//!
//! One record per line: an unsigned decimal key, a single comma and an
//! unsigned decimal value. Surrounding whitespace is tolerated.

use crate::IndexError;
use std::fmt;

/// Parse one record. Returns `None` for anything but `<u64>,<u64>`.
pub fn parse_record(line: &str) -> Option<(u64, u64)> {
    let (key, value) = line.trim().split_once(',')?;
    let key = parse_u64(key.trim())?;
    let value = parse_u64(value.trim())?;
    Some((key, value))
}

// u64::from_str accepts a leading '+', the record grammar doesn't
pub(crate) fn parse_u64(field: &str) -> Option<u64> {
    if field.is_empty() || !field.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    field.parse().ok()
}

/// Display adapter writing a pair as `key,value`
pub struct Record(pub u64, pub u64);

impl fmt::Display for Record {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{},{}", self.0, self.1)
    }
}

/// A line `load` could not parse
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MalformedLine {
    /// 1-based line number
    pub line: usize,
    pub content: String,
}

impl From<MalformedLine> for IndexError {
    fn from(bad: MalformedLine) -> Self {
        IndexError::MalformedLine {
            line: bad.line,
            content: bad.content,
        }
    }
}

/// Outcome of a bulk load
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct LoadReport {
    /// Pairs inserted
    pub inserted: usize,

    /// Keys skipped because they were already present
    pub duplicates: Vec<u64>,

    /// Lines skipped because they did not parse
    pub malformed: Vec<MalformedLine>,
}

impl LoadReport {
    pub fn is_clean(&self) -> bool {
        self.duplicates.is_empty() && self.malformed.is_empty()
    }
}
