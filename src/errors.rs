//! Harness Error Hierarchy
//!
//! Errors are grouped by where they surface: configuration and filesystem
//! failures during set-up, driver failures reported as a closed set of
//! [`FailureKind`]s, assertion failures from test bodies, and the deferred
//! failures the harness promotes at teardown (background tasks, scenario
//! batches, server-side log errors).

use std::fmt;

use config::ConfigError;

use crate::runner::TaskFailure;
use crate::scenario::MultiError;

#[doc(hidden)]
pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Harness configuration could not be loaded or is inconsistent
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("Invalid harness configuration: {0}")]
    InvalidConfig(String),

    /// Working directory, sentinel file or log artifact failures
    #[error(transparent)]
    Io(#[from] std::io::Error),

    /// Driver-reported failure, tagged with its kind
    #[error(transparent)]
    Query(#[from] QueryError),

    /// A test expectation did not hold
    #[error("Assertion failed: {0}")]
    Assertion(String),

    /// Unignored error lines found in node logs after the test body ran
    #[error("Unexpected error in {node} node log: {errors:?}")]
    LogErrors { node: String, errors: Vec<String> },

    /// A background runner stopped on an error
    #[error(transparent)]
    BackgroundTask(#[from] TaskFailure),

    /// One or more scenarios of a batch failed
    #[error(transparent)]
    Scenarios(#[from] MultiError),

    /// Test skipped (version gate, explicit skip)
    #[error("Skipped: {0}")]
    Skipped(String),

    #[error(transparent)]
    InvalidPattern(#[from] regex::Error),

    /// Cluster manager reported a failure
    #[error("Cluster error: {0}")]
    Cluster(String),

    /// Unrecoverable harness state
    #[error("Fatal error: {0}")]
    Fatal(String),
}

impl Error {
    pub fn is_assertion(&self) -> bool {
        matches!(self, Error::Assertion(_))
    }

    pub fn is_skipped(&self) -> bool {
        matches!(self, Error::Skipped(_))
    }

    /// Short name of the failure class, used when reporting batched failures.
    pub fn kind_name(&self) -> &'static str {
        match self {
            Error::Config(_) => "ConfigError",
            Error::InvalidConfig(_) => "InvalidConfig",
            Error::Io(_) => "IoError",
            Error::Query(e) => e.kind.as_str(),
            Error::Assertion(_) => "AssertionError",
            Error::LogErrors { .. } => "LogErrors",
            Error::BackgroundTask(_) => "TaskFailure",
            Error::Scenarios(_) => "MultiError",
            Error::Skipped(_) => "Skipped",
            Error::InvalidPattern(_) => "InvalidPattern",
            Error::Cluster(_) => "ClusterError",
            Error::Fatal(_) => "Fatal",
        }
    }

    /// Failure kind when this is a driver error.
    pub fn failure_kind(&self) -> Option<FailureKind> {
        match self {
            Error::Query(e) => Some(e.kind),
            _ => None,
        }
    }
}

/// Closed set of driver failure kinds.
///
/// Assertions match on these instead of on open-ended error types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FailureKind {
    /// Not enough live replicas to satisfy the consistency level
    Unavailable,
    /// Replicas did not acknowledge a write in time
    WriteTimeout,
    /// Replicas did not answer a read in time
    ReadTimeout,
    /// Query rejected by the coordinator (syntax, schema, semantics)
    InvalidRequest,
    /// No contact point accepted a connection
    NoHostAvailable,
    /// Client-side request timeout
    OperationTimedOut,
    /// Any other server failure response
    Failure,
}

impl FailureKind {
    /// Kinds that prove the cluster could not reach the requested consistency.
    pub const UNAVAILABILITY: [FailureKind; 3] = [
        FailureKind::Unavailable,
        FailureKind::WriteTimeout,
        FailureKind::ReadTimeout,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            FailureKind::Unavailable => "Unavailable",
            FailureKind::WriteTimeout => "WriteTimeout",
            FailureKind::ReadTimeout => "ReadTimeout",
            FailureKind::InvalidRequest => "InvalidRequest",
            FailureKind::NoHostAvailable => "NoHostAvailable",
            FailureKind::OperationTimedOut => "OperationTimedOut",
            FailureKind::Failure => "Failure",
        }
    }
}

impl fmt::Display for FailureKind {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Failure surfaced by a [`crate::CqlSession`] or [`crate::SessionFactory`].
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{kind}: {message}")]
pub struct QueryError {
    pub kind: FailureKind,
    pub message: String,
}

impl QueryError {
    pub fn new(
        kind: FailureKind,
        message: impl Into<String>,
    ) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn unavailable(message: impl Into<String>) -> Self {
        Self::new(FailureKind::Unavailable, message)
    }

    pub fn invalid(message: impl Into<String>) -> Self {
        Self::new(FailureKind::InvalidRequest, message)
    }

    pub fn no_host_available(message: impl Into<String>) -> Self {
        Self::new(FailureKind::NoHostAvailable, message)
    }

    pub fn is(
        &self,
        kind: FailureKind,
    ) -> bool {
        self.kind == kind
    }
}
