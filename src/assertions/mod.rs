//! Query-result assertions used by test bodies.
//!
//! Each helper executes one statement, normalises the returned rows into
//! plain [`Row`]s and compares them against the expectation. Queries accept
//! anything convertible into a [`Statement`], so a bare `&str` runs at
//! [`crate::Consistency::One`] and an explicit
//! `Statement::new(q).with_consistency(..)` picks another level.
//!
//! Helpers that expect a failure match on the closed [`FailureKind`] set and
//! hand back any other error untouched.


use regex::Regex;

use crate::format_row;
use crate::format_rows;
use crate::CqlSession;
use crate::Error;
use crate::FailureKind;
use crate::Result;
use crate::Row;
use crate::Statement;
use crate::DEFAULT_ALMOST_EQUAL_TOLERANCE;

fn fetch(
    session: &dyn CqlSession,
    statement: &Statement,
) -> Result<Vec<Row>> {
    Ok(session.execute(statement)?.into_inner())
}

/// Exactly one row equal to `expected`.
pub fn assert_one(
    session: &dyn CqlSession,
    query: impl Into<Statement>,
    expected: Row,
) -> Result<()> {
    let statement = query.into();
    let actual = fetch(session, &statement)?;
    let expected = vec![expected];
    if actual != expected {
        return Err(Error::Assertion(format!(
            "Expected {} from {}, but got {}",
            format_rows(&expected),
            statement.query,
            format_rows(&actual)
        )));
    }
    Ok(())
}

/// No rows at all.
pub fn assert_none(
    session: &dyn CqlSession,
    query: impl Into<Statement>,
) -> Result<()> {
    let statement = query.into();
    let actual = fetch(session, &statement)?;
    if !actual.is_empty() {
        return Err(Error::Assertion(format!(
            "Expected nothing from {}, but got {}",
            statement.query,
            format_rows(&actual)
        )));
    }
    Ok(())
}

/// Exactly `expected`, in the same order.
pub fn assert_all(
    session: &dyn CqlSession,
    query: impl Into<Statement>,
    expected: Vec<Row>,
) -> Result<()> {
    let statement = query.into();
    let actual = fetch(session, &statement)?;
    if actual != expected {
        return Err(Error::Assertion(format!(
            "Expected {} from {}, but got {}",
            format_rows(&expected),
            statement.query,
            format_rows(&actual)
        )));
    }
    Ok(())
}

/// `op` must fail with one of [`FailureKind::UNAVAILABILITY`].
pub fn assert_unavailable<T, E, F>(op: F) -> Result<()>
where
    F: FnOnce() -> std::result::Result<T, E>,
    E: Into<Error>,
{
    match op() {
        Ok(_) => Err(Error::Assertion(
            "Expecting unavailable exception but no exception was raised".to_string(),
        )),
        Err(e) => {
            let e: Error = e.into();
            match e.failure_kind() {
                Some(kind) if FailureKind::UNAVAILABILITY.contains(&kind) => Ok(()),
                _ => Err(Error::Assertion(format!(
                    "Expecting unavailable exception, got: {}",
                    e
                ))),
            }
        }
    }
}

/// The statement must be rejected with `expected`; when `matching` is given
/// the error message must contain a match for that pattern.
///
/// Failures of any other kind are returned as they are.
pub fn assert_invalid(
    session: &dyn CqlSession,
    query: impl Into<Statement>,
    matching: Option<&str>,
    expected: FailureKind,
) -> Result<()> {
    let statement = query.into();
    match session.execute(&statement) {
        Ok(rows) => Err(Error::Assertion(format!(
            "Expecting query to be invalid: got {}",
            format_rows(&rows.into_inner())
        ))),
        Err(e) if e.is(expected) => {
            if let Some(pattern) = matching {
                if !Regex::new(pattern)?.is_match(&e.message) {
                    return Err(Error::Assertion(format!(
                        "Error message does not contain {} (error = {})",
                        pattern, e.message
                    )));
                }
            }
            Ok(())
        }
        Err(e) => Err(e.into()),
    }
}

/// Every sample lies within `error` (a fraction) of the largest one.
///
/// `assert_almost_equal(&[100.0, 110.0], 0.16)` holds, `&[100.0, 130.0]`
/// does not.
pub fn assert_almost_equal(
    values: &[f64],
    error: f64,
) -> Result<()> {
    let (Some(vmin), Some(vmax)) = (
        values.iter().copied().reduce(f64::min),
        values.iter().copied().reduce(f64::max),
    ) else {
        return Err(Error::Assertion(
            "assert_almost_equal needs at least one value".to_string(),
        ));
    };

    if vmin > vmax * (1.0 - error) || vmin == vmax {
        Ok(())
    } else {
        Err(Error::Assertion(format!(
            "values not within {:.2}% of the max: {:?}",
            error * 100.0,
            values
        )))
    }
}

/// [`assert_almost_equal`] with the default 16% tolerance.
pub fn assert_almost_equal_default(values: &[f64]) -> Result<()> {
    assert_almost_equal(values, DEFAULT_ALMOST_EQUAL_TOLERANCE)
}

/// `SELECT count(*)` on `table` must return `expected`.
pub fn assert_row_count(
    session: &dyn CqlSession,
    table: &str,
    expected: i64,
) -> Result<()> {
    let query = format!("SELECT count(*) FROM {};", table);
    let rows = fetch(session, &Statement::new(query))?;
    let count = rows.first().and_then(|r| r.first()).and_then(|v| v.as_i64());
    match count {
        Some(count) if count == expected => Ok(()),
        Some(count) => Err(Error::Assertion(format!(
            "Expected a row count of {} in table '{}', but got {}",
            expected, table, count
        ))),
        None => Err(Error::Assertion(format!(
            "Expected a row count of {} in table '{}', but got {}",
            expected,
            table,
            rows.first().map(|r| format_row(r)).unwrap_or_else(|| "no rows".to_string())
        ))),
    }
}
