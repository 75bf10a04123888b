//! Keyspace and table helpers for test bodies.

use std::thread;

use tracing::debug;

use crate::constants::SCHEMA_SETTLE_DELAY;
use crate::CqlSession;
use crate::Error;
use crate::Result;
use crate::Statement;
use crate::Version;

/// Replication settings of a test keyspace
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Replication {
    /// `SimpleStrategy` with one replication factor
    Simple(u32),
    /// `NetworkTopologyStrategy` with a replication factor per datacenter
    NetworkTopology(Vec<(String, u32)>),
}

impl From<u32> for Replication {
    fn from(rf: u32) -> Self {
        Replication::Simple(rf)
    }
}

impl Replication {
    fn to_cql(&self) -> Result<String> {
        match self {
            Replication::Simple(rf) => Ok(format!(
                "'class':'SimpleStrategy', 'replication_factor':{}",
                rf
            )),
            Replication::NetworkTopology(dcs) => {
                if dcs.is_empty() {
                    return Err(Error::Assertion(
                        "At least one datacenter/rf pair is needed".to_string(),
                    ));
                }
                let options: Vec<String> = dcs
                    .iter()
                    .map(|(dc, rf)| format!("'{}':{}", dc, rf))
                    .collect();
                Ok(format!(
                    "'class':'NetworkTopologyStrategy', {}",
                    options.join(", ")
                ))
            }
        }
    }
}

/// Table layout created by [`create_cf_statement`].
///
/// Without extra columns the table is `(key, c varchar, v varchar)` keyed on
/// `(key, c)`; with columns it is `(key PRIMARY KEY, <columns>)`.
#[derive(Debug, Clone, PartialEq)]
pub struct CfOptions {
    pub key_type: String,
    pub columns: Vec<(String, String)>,
    /// Compressor class prefix, e.g. `LZ4` or `Snappy`; `None` disables compression
    pub compression: Option<String>,
    pub read_repair: Option<f64>,
    pub gc_grace: Option<u32>,
    /// Only applied on clusters at version 2.0 or later
    pub speculative_retry: Option<String>,
    pub compact_storage: bool,
}

impl Default for CfOptions {
    fn default() -> Self {
        Self {
            key_type: "varchar".to_string(),
            columns: Vec::new(),
            compression: None,
            read_repair: None,
            gc_grace: None,
            speculative_retry: None,
            compact_storage: false,
        }
    }
}

impl CfOptions {
    pub fn key_type(
        mut self,
        key_type: impl Into<String>,
    ) -> Self {
        self.key_type = key_type.into();
        self
    }

    pub fn column(
        mut self,
        name: impl Into<String>,
        cql_type: impl Into<String>,
    ) -> Self {
        self.columns.push((name.into(), cql_type.into()));
        self
    }

    pub fn compression(
        mut self,
        compressor: impl Into<String>,
    ) -> Self {
        self.compression = Some(compressor.into());
        self
    }

    pub fn read_repair(
        mut self,
        chance: f64,
    ) -> Self {
        self.read_repair = Some(chance);
        self
    }

    pub fn gc_grace(
        mut self,
        seconds: u32,
    ) -> Self {
        self.gc_grace = Some(seconds);
        self
    }

    pub fn speculative_retry(
        mut self,
        policy: impl Into<String>,
    ) -> Self {
        self.speculative_retry = Some(policy.into());
        self
    }

    pub fn compact_storage(mut self) -> Self {
        self.compact_storage = true;
        self
    }
}

/// Creates keyspace `name` and switches the session to it.
pub fn create_ks(
    session: &dyn CqlSession,
    name: &str,
    replication: &Replication,
) -> Result<()> {
    let query = format!(
        "CREATE KEYSPACE {} WITH replication={{{}}}",
        name,
        replication.to_cql()?
    );
    debug!("{}", query);
    session.execute(&Statement::new(query))?;
    session.set_keyspace(name)?;
    Ok(())
}

pub fn create_cf_statement(
    name: &str,
    options: &CfOptions,
    version: &Version,
) -> String {
    let mut query = if options.columns.is_empty() {
        format!(
            "CREATE COLUMNFAMILY {} (key {}, c varchar, v varchar, PRIMARY KEY(key, c)) WITH comment='test cf'",
            name, options.key_type
        )
    } else {
        let columns: String = options
            .columns
            .iter()
            .map(|(k, v)| format!(", {} {}", k, v))
            .collect();
        format!(
            "CREATE COLUMNFAMILY {} (key {} PRIMARY KEY{}) WITH comment='test cf'",
            name, options.key_type, columns
        )
    };

    match &options.compression {
        Some(compressor) => query.push_str(&format!(
            " AND compression = {{ 'sstable_compression': '{}Compressor' }}",
            compressor
        )),
        // the server falls back to LZ4 when the option is absent
        None => query.push_str(" AND compression = {}"),
    }

    if let Some(chance) = options.read_repair {
        query.push_str(&format!(" AND read_repair_chance={:.6}", chance));
    }
    if let Some(gc_grace) = options.gc_grace {
        query.push_str(&format!(" AND gc_grace_seconds={}", gc_grace));
    }
    if version.at_least("2.0") {
        if let Some(policy) = &options.speculative_retry {
            query.push_str(&format!(" AND speculative_retry='{}'", policy));
        }
    }
    if options.compact_storage {
        query.push_str(" AND COMPACT STORAGE");
    }
    query
}

/// Creates table `name` in the session's keyspace and waits briefly for the
/// schema change to settle.
pub fn create_cf(
    session: &dyn CqlSession,
    name: &str,
    options: &CfOptions,
    version: &Version,
) -> Result<()> {
    let query = create_cf_statement(name, options, version);
    debug!("{}", query);
    session.execute(&Statement::new(query))?;
    thread::sleep(SCHEMA_SETTLE_DELAY);
    Ok(())
}
