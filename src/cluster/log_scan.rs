//! Node log scanning.

use std::fs;
use std::io::BufRead;
use std::io::BufReader;
use std::io::Read;
use std::path::Path;

use regex::Regex;

use crate::Result;

/// Marker searched for anywhere in a line
const ERROR_MARKER: &str = "ERROR";

/// Levels that open a new log entry and therefore end a stack trace.
const ENTRY_LEVELS: [&str; 5] = ["INFO", "WARN", "DEBUG", "TRACE", "ERROR"];

/// Collects every line mentioning `ERROR` together with the continuation
/// lines (stack traces, wrapped messages) that follow it, up to the next
/// log entry.
pub fn grep_errors<R: Read>(reader: R) -> Result<Vec<Vec<String>>> {
    let mut matchings: Vec<Vec<String>> = Vec::new();
    let mut in_error = false;

    for line in BufReader::new(reader).lines() {
        let line = line?;
        if line.contains(ERROR_MARKER) {
            matchings.push(vec![line]);
            in_error = true;
            continue;
        }
        if !in_error {
            continue;
        }
        if starts_entry(&line) {
            in_error = false;
        } else if let Some(current) = matchings.last_mut() {
            current.push(line);
        }
    }

    Ok(matchings)
}

/// [`grep_errors`] over a file; a missing file has no errors.
pub fn grep_errors_in_file(path: &Path) -> Result<Vec<Vec<String>>> {
    match fs::File::open(path) {
        Ok(file) => grep_errors(file),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Vec::new()),
        Err(e) => Err(e.into()),
    }
}

/// Drops every error whose text matches one of `ignore`.
pub fn filter_errors(
    errors: Vec<String>,
    ignore: &[Regex],
) -> Vec<String> {
    errors
        .into_iter()
        .filter(|e| !ignore.iter().any(|p| p.is_match(e)))
        .collect()
}

fn starts_entry(line: &str) -> bool {
    let trimmed = line.trim_start();
    ENTRY_LEVELS.iter().any(|l| trimmed.starts_with(l))
}
