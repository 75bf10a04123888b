//! Scenario batches.
//!
//! Scenarios are mini-tests where one procedure is reused with several
//! configurations inside a single test, without paying cluster set-up again.
//! Failures accepted by the `deferrable` predicate are collected and the
//! batch keeps going; any other failure aborts the batch at once. Either way
//! the collected failures surface together as one [`MultiError`].


use std::backtrace::Backtrace;
use std::backtrace::BacktraceStatus;
use std::error::Error as StdError;
use std::fmt;
use std::fmt::Debug;

use tracing::debug;

use crate::Error;

/// One failed scenario.
#[derive(Debug)]
pub struct ScenarioFailure {
    /// `Debug` rendering of the scenario input
    pub scenario: String,
    /// Failure class of the underlying error
    pub kind: &'static str,
    pub error: Error,
}

impl fmt::Display for ScenarioFailure {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        write!(
            f,
            "encountered {} {} running scenario:\n  {}\n",
            self.kind, self.error, self.scenario
        )
    }
}

/// Per-scenario record, in input order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScenarioResult {
    /// 1-based position in the batch
    pub index: usize,
    pub scenario: String,
    pub passed: bool,
}

/// Every failure of a scenario batch.
///
/// `exceptions[i]` and `tracebacks[i]` describe the same failure; entries
/// follow the order failures happened in, successes contribute nothing.
#[derive(Debug)]
pub struct MultiError {
    pub exceptions: Vec<ScenarioFailure>,
    pub tracebacks: Vec<String>,
    /// Every scenario that ran, passed or not
    pub results: Vec<ScenarioResult>,
}

impl MultiError {
    pub fn len(&self) -> usize {
        self.exceptions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.exceptions.is_empty()
    }
}

impl fmt::Display for MultiError {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        writeln!(f)?;
        writeln!(
            f,
            "****************************** BEGIN MultiError ******************************"
        )?;
        for (exc, tb) in self.exceptions.iter().zip(self.tracebacks.iter()) {
            write!(f, "{}", exc)?;
            writeln!(f, "{}", tb)?;
        }
        write!(
            f,
            "****************************** END MultiError ******************************"
        )
    }
}

impl StdError for MultiError {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        self.exceptions.first().map(|e| &e.error as &(dyn StdError + 'static))
    }
}

/// Runs `handler` on each scenario in order.
///
/// Returns `Ok(())` only when every scenario passed.
pub fn run_scenarios<I, S, H, D>(
    scenarios: I,
    mut handler: H,
    deferrable: D,
) -> std::result::Result<(), MultiError>
where
    I: IntoIterator<Item = S>,
    S: Debug,
    H: FnMut(&S) -> crate::Result<()>,
    D: Fn(&Error) -> bool,
{
    let scenarios: Vec<S> = scenarios.into_iter().collect();
    let total = scenarios.len();

    let mut exceptions = Vec::new();
    let mut tracebacks = Vec::new();
    let mut results = Vec::with_capacity(total);

    for (i, scenario) in scenarios.iter().enumerate() {
        let index = i + 1;
        debug!("running scenario {}/{}: {:?}", index, total, scenario);

        let error = match handler(scenario) {
            Ok(()) => {
                results.push(ScenarioResult {
                    index,
                    scenario: format!("{:?}", scenario),
                    passed: true,
                });
                continue;
            }
            Err(e) => e,
        };

        let deferred = deferrable(&error);
        tracebacks.push(traceback(&error));
        exceptions.push(ScenarioFailure {
            scenario: format!("{:?}", scenario),
            kind: error.kind_name(),
            error,
        });
        results.push(ScenarioResult {
            index,
            scenario: format!("{:?}", scenario),
            passed: false,
        });

        if deferred {
            debug!(
                "scenario {}/{} encountered a deferrable exception, continuing",
                index, total
            );
        } else {
            debug!(
                "scenario {}/{} encountered a non-deferrable exception, aborting",
                index, total
            );
            return Err(MultiError {
                exceptions,
                tracebacks,
                results,
            });
        }
    }

    if exceptions.is_empty() {
        Ok(())
    } else {
        Err(MultiError {
            exceptions,
            tracebacks,
            results,
        })
    }
}

/// Error chain plus, when enabled through `RUST_BACKTRACE`, the stack at the
/// point the failure was collected.
fn traceback(error: &Error) -> String {
    let mut out = String::new();
    let mut source = error.source();
    while let Some(cause) = source {
        out.push_str(&format!("  caused by: {}\n", cause));
        source = cause.source();
    }
    let backtrace = Backtrace::capture();
    if backtrace.status() == BacktraceStatus::Captured {
        out.push_str(&backtrace.to_string());
    }
    out
}
