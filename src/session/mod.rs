//! Seams to the CQL driver.
//!
//! Results are normalised into plain rows of [`Value`]s so assertions can
//! compare them structurally, and every driver failure is reported as a
//! [`QueryError`] tagged with a [`FailureKind`].

#[cfg(feature = "scylla")]
pub mod scylla_driver;
#[cfg(feature = "scylla")]
pub use scylla_driver::*;

mod value;
pub use value::*;


use std::net::SocketAddr;
use std::sync::Arc;

#[cfg(test)]
use mockall::automock;

use crate::FailureKind;
use crate::QueryError;

/// Per-query replica acknowledgement requirement; passed through to the driver.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Consistency {
    Any,
    #[default]
    One,
    Two,
    Three,
    Quorum,
    All,
    LocalQuorum,
    EachQuorum,
    LocalOne,
    Serial,
    LocalSerial,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Statement {
    pub query: String,
    pub consistency: Consistency,
}

impl Statement {
    pub fn new(query: impl Into<String>) -> Self {
        Self {
            query: query.into(),
            consistency: Consistency::default(),
        }
    }

    pub fn with_consistency(
        mut self,
        consistency: Consistency,
    ) -> Self {
        self.consistency = consistency;
        self
    }
}

impl From<&str> for Statement {
    fn from(query: &str) -> Self {
        Statement::new(query)
    }
}

impl From<String> for Statement {
    fn from(query: String) -> Self {
        Statement::new(query)
    }
}

impl std::fmt::Debug for dyn CqlSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CqlSession").finish_non_exhaustive()
    }
}

/// A live connection to one cluster.
#[cfg_attr(test, automock)]
pub trait CqlSession: Send + Sync {
    fn execute(
        &self,
        statement: &Statement,
    ) -> std::result::Result<Rows, QueryError>;

    /// Closes every connection held by the session; later calls fail with
    /// [`FailureKind::NoHostAvailable`].
    fn shutdown(&self);

    fn query(
        &self,
        query: &str,
    ) -> std::result::Result<Rows, QueryError> {
        self.execute(&Statement::new(query))
    }

    fn set_keyspace(
        &self,
        keyspace: &str,
    ) -> std::result::Result<(), QueryError> {
        self.execute(&Statement::new(format!("USE {}", keyspace)))
            .map(|_| ())
    }
}

/// How a session should be opened
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionOptions {
    pub keyspace: Option<String>,
    pub user: Option<String>,
    pub password: Option<String>,
    pub compression: bool,
    /// Native protocol version; chosen from the cluster version when unset
    pub protocol_version: Option<u8>,
    /// Route every request to this single host only
    pub exclusive_host: Option<SocketAddr>,
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self {
            keyspace: None,
            user: None,
            password: None,
            compression: true,
            protocol_version: None,
            exclusive_host: None,
        }
    }
}

impl SessionOptions {
    pub fn keyspace(
        mut self,
        keyspace: impl Into<String>,
    ) -> Self {
        self.keyspace = Some(keyspace.into());
        self
    }

    pub fn credentials(
        mut self,
        user: impl Into<String>,
        password: impl Into<String>,
    ) -> Self {
        self.user = Some(user.into());
        self.password = Some(password.into());
        self
    }

    pub fn compression(
        mut self,
        enabled: bool,
    ) -> Self {
        self.compression = enabled;
        self
    }

    pub fn protocol_version(
        mut self,
        version: u8,
    ) -> Self {
        self.protocol_version = Some(version);
        self
    }
}

/// Opens driver sessions.
#[cfg_attr(test, automock)]
pub trait SessionFactory: Send + Sync + 'static {
    /// Fails with [`FailureKind::NoHostAvailable`] while the contact point is
    /// not serving yet.
    fn connect(
        &self,
        contact: SocketAddr,
        options: &SessionOptions,
    ) -> std::result::Result<Arc<dyn CqlSession>, QueryError>;
}

/// Treats `NoHostAvailable` as the transient start-up failure.
pub fn is_no_host_available(e: &QueryError) -> bool {
    e.is(FailureKind::NoHostAvailable)
}
