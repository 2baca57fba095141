//! Lenient CSV parsing
//!
//! Bank and spreadsheet exports disagree on separators and quoting, so the
//! scanner here is deliberately forgiving: commas and semicolons both end a
//! field, quotes only toggle the in-quotes state, and ragged rows are padded
//! or truncated to the header width. Nothing in this module fails on bad
//! input; a file that yields no header is reported by the caller.

use std::path::Path;
use std::sync::LazyLock;

use chrono::{DateTime, NaiveDate, NaiveDateTime};
use regex::Regex;
use tracing::debug;

use crate::error::{Error, Result};
use crate::models::RawRow;

/// Headers plus one [`RawRow`] per data line
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ParsedCsv {
    pub headers: Vec<String>,
    pub data: Vec<RawRow>,
}

impl ParsedCsv {
    pub fn is_empty(&self) -> bool {
        self.headers.is_empty()
    }
}

/// Parse CSV text into headers and rows
pub fn parse_csv(text: &str) -> ParsedCsv {
    let text = text.strip_prefix('\u{feff}').unwrap_or(text);

    let mut lines = text
        .split('\n')
        .map(|l| l.strip_suffix('\r').unwrap_or(l))
        .filter(|l| !l.trim().is_empty());

    let Some(header_line) = lines.next() else {
        return ParsedCsv::default();
    };
    let headers = parse_line(header_line);

    let data: Vec<RawRow> = lines
        .map(|line| {
            let fields = parse_line(line);
            let mut row = RawRow::new();
            for (i, header) in headers.iter().enumerate() {
                let value = fields.get(i).cloned().unwrap_or_default();
                row.insert(header, value);
            }
            row
        })
        .collect();

    debug!("Parsed CSV: {} columns, {} rows", headers.len(), data.len());
    ParsedCsv { headers, data }
}

/// Split one line into trimmed fields
///
/// Every `"` flips the in-quotes flag and is never emitted, so `""` inside a
/// quoted field contributes nothing.
pub fn parse_line(line: &str) -> Vec<String> {
    let mut fields = Vec::new();
    let mut current = String::new();
    let mut in_quotes = false;

    for ch in line.chars() {
        match ch {
            '"' => in_quotes = !in_quotes,
            ',' | ';' if !in_quotes => {
                fields.push(current.trim().to_string());
                current.clear();
            }
            _ => current.push(ch),
        }
    }
    fields.push(current.trim().to_string());

    fields
}

/// Read a `.csv` file from disk as text (invalid UTF-8 is replaced)
pub fn read_csv_file(path: &Path) -> Result<String> {
    let is_csv = path
        .extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| e.eq_ignore_ascii_case("csv"));
    if !is_csv {
        return Err(Error::UnsupportedFile(format!(
            "{} (only .csv files can be imported)",
            path.display()
        )));
    }

    let bytes = std::fs::read(path)?;
    Ok(String::from_utf8_lossy(&bytes).into_owned())
}

/// Read and parse a `.csv` file from disk
pub fn load_csv_file(path: &Path) -> Result<ParsedCsv> {
    Ok(parse_csv(&read_csv_file(path)?))
}

static ISO_DATE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(\d{4})-(\d{2})-(\d{2})$").expect("valid regex"));
static DAY_FIRST_DATE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(\d{2})[/-](\d{2})[/-](\d{4})$").expect("valid regex"));

/// Coerce a date string to a calendar date
///
/// `YYYY-MM-DD`, `DD/MM/YYYY` and `DD-MM-YYYY` are tried first; anything
/// else goes through a list of common export formats.
pub fn parse_date_to_iso(value: &str) -> Option<NaiveDate> {
    let s = value.trim();
    if s.is_empty() {
        return None;
    }

    if let Some(caps) = ISO_DATE.captures(s) {
        if let Some(date) = ymd(&caps[1], &caps[2], &caps[3]) {
            return Some(date);
        }
    }
    if let Some(caps) = DAY_FIRST_DATE.captures(s) {
        if let Some(date) = ymd(&caps[3], &caps[2], &caps[1]) {
            return Some(date);
        }
    }

    let formats = [
        "%m/%d/%Y", // 01/15/2024
        "%m/%d/%y", // 01/15/24
        "%Y/%m/%d", // 2024/01/15
        "%d.%m.%Y", // 15.01.2024
        "%b %d, %Y", // Jan 15, 2024
        "%d %b %Y", // 15 Jan 2024
    ];
    for fmt in formats {
        if let Ok(date) = NaiveDate::parse_from_str(s, fmt) {
            return Some(date);
        }
    }

    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.date_naive());
    }
    for fmt in ["%Y-%m-%dT%H:%M:%S", "%Y-%m-%d %H:%M:%S", "%Y-%m-%dT%H:%M:%S%.f"] {
        if let Ok(dt) = NaiveDateTime::parse_from_str(s, fmt) {
            return Some(dt.date());
        }
    }

    None
}

fn ymd(year: &str, month: &str, day: &str) -> Option<NaiveDate> {
    NaiveDate::from_ymd_opt(year.parse().ok()?, month.parse().ok()?, day.parse().ok()?)
}
