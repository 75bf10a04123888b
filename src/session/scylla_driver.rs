//! [`SessionFactory`] over the ScyllaDB Rust driver.
//!
//! The harness is blocking; a private multi-threaded runtime drives the
//! async driver and every call blocks on it.

use std::net::SocketAddr;
use std::sync::Arc;

use parking_lot::RwLock;
use scylla::client::execution_profile::ExecutionProfile;
use scylla::client::session::Session;
use scylla::client::session_builder::SessionBuilder;
use scylla::client::Compression;
use scylla::errors::DbError;
use scylla::errors::ExecutionError;
use scylla::errors::NewSessionError;
use scylla::errors::RequestAttemptError;
use scylla::errors::UseKeyspaceError;
use scylla::policies::host_filter::AllowListHostFilter;
use scylla::response::query_result::IntoRowsResultError;
use scylla::statement::unprepared::Statement as ScyllaStatement;
use scylla::value::CqlValue;
use tokio::runtime::Runtime;
use tracing::debug;

use super::Consistency;
use super::CqlSession;
use super::Row;
use super::Rows;
use super::SessionFactory;
use super::SessionOptions;
use super::Statement;
use super::Value;
use crate::constants::SESSION_REQUEST_TIMEOUT;
use crate::FailureKind;
use crate::QueryError;

pub struct ScyllaSessionFactory {
    runtime: Arc<Runtime>,
}

impl ScyllaSessionFactory {
    pub fn new() -> std::io::Result<Self> {
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(2)
            .enable_all()
            .build()?;
        Ok(Self {
            runtime: Arc::new(runtime),
        })
    }
}

impl SessionFactory for ScyllaSessionFactory {
    fn connect(
        &self,
        contact: SocketAddr,
        options: &SessionOptions,
    ) -> Result<Arc<dyn CqlSession>, QueryError> {
        let profile = ExecutionProfile::builder()
            .request_timeout(Some(SESSION_REQUEST_TIMEOUT))
            .build();

        let mut builder = SessionBuilder::new()
            .known_node_addr(contact)
            .default_execution_profile_handle(profile.into_handle());

        if options.compression {
            builder = builder.compression(Some(Compression::Lz4));
        }
        if let (Some(user), Some(password)) = (&options.user, &options.password) {
            builder = builder.user(user, password);
        }
        if let Some(keyspace) = &options.keyspace {
            builder = builder.use_keyspace(keyspace, false);
        }
        if let Some(host) = options.exclusive_host {
            let filter = AllowListHostFilter::new([host])
                .map_err(|e| QueryError::no_host_available(e.to_string()))?;
            builder = builder.host_filter(Arc::new(filter));
        }
        if let Some(version) = options.protocol_version {
            // the driver negotiates v4+ on its own
            debug!("ignoring requested protocol version {}", version);
        }

        let session = self
            .runtime
            .block_on(builder.build())
            .map_err(|e| QueryError::new(classify_connect(&e), e.to_string()))?;

        Ok(Arc::new(ScyllaCqlSession {
            runtime: self.runtime.clone(),
            session: RwLock::new(Some(Arc::new(session))),
        }))
    }
}

struct ScyllaCqlSession {
    runtime: Arc<Runtime>,
    session: RwLock<Option<Arc<Session>>>,
}

impl CqlSession for ScyllaCqlSession {
    fn execute(
        &self,
        statement: &Statement,
    ) -> Result<Rows, QueryError> {
        let session = self
            .session
            .read()
            .clone()
            .ok_or_else(|| QueryError::no_host_available("session already shut down"))?;

        let mut query = ScyllaStatement::new(statement.query.as_str());
        query.set_consistency(consistency(statement.consistency));

        let result = self
            .runtime
            .block_on(session.query_unpaged(query, ()))
            .map_err(|e| QueryError::new(classify(&e), e.to_string()))?;

        let rows_result = match result.into_rows_result() {
            Ok(rows) => rows,
            Err(IntoRowsResultError::ResultNotRows(_)) => return Ok(Rows::default()),
            Err(e) => return Err(QueryError::new(FailureKind::Failure, e.to_string())),
        };

        let mut rows = Vec::new();
        let typed = rows_result
            .rows::<scylla::value::Row>()
            .map_err(|e| QueryError::new(FailureKind::Failure, e.to_string()))?;
        for row in typed {
            let row = row.map_err(|e| QueryError::new(FailureKind::Failure, e.to_string()))?;
            rows.push(
                row.columns
                    .into_iter()
                    .map(|c| c.map(to_value).unwrap_or(Value::Null))
                    .collect::<Row>(),
            );
        }
        Ok(Rows::new(rows))
    }

    fn shutdown(&self) {
        self.session.write().take();
    }
}

fn consistency(c: Consistency) -> scylla::statement::Consistency {
    use scylla::statement::Consistency as C;
    match c {
        Consistency::Any => C::Any,
        Consistency::One => C::One,
        Consistency::Two => C::Two,
        Consistency::Three => C::Three,
        Consistency::Quorum => C::Quorum,
        Consistency::All => C::All,
        Consistency::LocalQuorum => C::LocalQuorum,
        Consistency::EachQuorum => C::EachQuorum,
        Consistency::LocalOne => C::LocalOne,
        Consistency::Serial => C::Serial,
        Consistency::LocalSerial => C::LocalSerial,
    }
}

fn classify(e: &ExecutionError) -> FailureKind {
    match e {
        ExecutionError::LastAttemptError(RequestAttemptError::DbError(db, _)) => match db {
            DbError::Unavailable { .. } => FailureKind::Unavailable,
            DbError::WriteTimeout { .. } => FailureKind::WriteTimeout,
            DbError::ReadTimeout { .. } => FailureKind::ReadTimeout,
            DbError::Invalid | DbError::SyntaxError => FailureKind::InvalidRequest,
            _ => FailureKind::Failure,
        },
        ExecutionError::EmptyPlan | ExecutionError::ConnectionPoolError(_) => {
            FailureKind::NoHostAvailable
        }
        ExecutionError::RequestTimeout(_) => FailureKind::OperationTimedOut,
        _ => FailureKind::Failure,
    }
}

/// Only failures a starting node can recover from are `NoHostAvailable`, so
/// patient connections give up at once on bad credentials or keyspaces.
pub(crate) fn classify_connect(e: &NewSessionError) -> FailureKind {
    match e {
        NewSessionError::UseKeyspaceError(UseKeyspaceError::BadKeyspaceName(_))
        | NewSessionError::UseKeyspaceError(UseKeyspaceError::RequestError(
            RequestAttemptError::DbError(DbError::Invalid | DbError::SyntaxError, _),
        )) => FailureKind::InvalidRequest,
        // setup errors are wrapped several levels deep in the pool error
        _ if is_auth_failure(&e.to_string()) => FailureKind::Failure,
        _ => FailureKind::NoHostAvailable,
    }
}

pub(crate) fn is_auth_failure(message: &str) -> bool {
    let message = message.to_ascii_lowercase();
    message.contains("authenticat") || message.contains("bad credentials")
}

fn to_value(v: CqlValue) -> Value {
    match v {
        CqlValue::Boolean(b) => Value::Boolean(b),
        CqlValue::TinyInt(i) => Value::Int(i as i64),
        CqlValue::SmallInt(i) => Value::Int(i as i64),
        CqlValue::Int(i) => Value::Int(i as i64),
        CqlValue::BigInt(i) => Value::Int(i),
        CqlValue::Counter(c) => Value::Int(c.0),
        CqlValue::Float(f) => Value::Double(f as f64),
        CqlValue::Double(d) => Value::Double(d),
        CqlValue::Text(s) | CqlValue::Ascii(s) => Value::Text(s),
        CqlValue::Blob(b) => Value::Blob(b),
        CqlValue::Empty => Value::Null,
        CqlValue::List(items) | CqlValue::Set(items) => {
            Value::List(items.into_iter().map(to_value).collect())
        }
        CqlValue::Tuple(items) => Value::List(
            items
                .into_iter()
                .map(|i| i.map(to_value).unwrap_or(Value::Null))
                .collect(),
        ),
        CqlValue::Map(entries) => Value::Map(
            entries
                .into_iter()
                .map(|(k, v)| (to_value(k), to_value(v)))
                .collect(),
        ),
        other => Value::Other(format!("{:?}", other)),
    }
}
