//! Per-test cluster lifecycle.
//!
//! A [`Tester`] owns one ephemeral cluster per test:
//! - `set_up`: recover whatever an interrupted earlier run left behind (see
//!   [`Recovery`]), provision a working directory and cluster, apply the
//!   configured overrides, persist the sentinel and snapshot the environment.
//! - test body: open connections, spawn background runners, assert.
//! - `tear_down`: restore the environment, close connections, stop runners,
//!   promote unignored node log errors to a failure, save logs when needed and
//!   remove the cluster unless it is being reused.
//!
//! ## Example
//! ```ignore
//! let mut tester = Tester::new(config, Arc::new(CcmClusterManager::default()), sessions, TesterOptions::default());
//! tester.run("counters::simple_increment", |t| {
//!     t.cluster_mut()?.populate(3)?.start()?;
//!     let node1 = t.cluster()?.nodes()[0].clone();
//!     let session = t.patient_cql_connection(node1.as_ref(), SessionOptions::default())?;
//!     t.create_ks(session.as_ref(), "ks", 3)?;
//!     Ok(())
//! })?;
//! ```

mod artifacts;
mod cluster_handle;
mod coverage;
mod env;
mod schema;
mod sentinel;
pub use artifacts::*;
pub use cluster_handle::*;
pub use env::*;
pub use schema::*;
pub use sentinel::*;


use std::net::IpAddr;
use std::net::SocketAddr;
use std::panic;
use std::panic::AssertUnwindSafe;
use std::path::Path;
use std::path::PathBuf;
use std::sync::Arc;

use regex::Regex;
use tracing::debug;
use tracing::error;
use tracing::info;
use tracing::info_span;
use tracing::span::EnteredSpan;
use tracing::warn;

use crate::constants::DEFAULT_REQUEST_TIMEOUT_MS;
use crate::constants::NATIVE_TRANSPORT_PORT;
use crate::constants::PHI_CONVICT_THRESHOLD;
use crate::constants::REQUEST_TIMEOUT_OPTIONS;
use crate::filter_errors;
use crate::runner::panic_message;
use crate::utils::file_io::remove_dir_all_if_exists;
use crate::ClusterManager;
use crate::ConfigOptions;
use crate::CqlSession;
use crate::Error;
use crate::FailureKind;
use crate::HarnessConfig;
use crate::LogLevelToggle;
use crate::ManagedNode;
use crate::Result;
use crate::RetryExecutor;
use crate::Runner;
use crate::SessionFactory;
use crate::SessionOptions;
use crate::Version;
use crate::DEFAULT_CLUSTER_NAME;
use crate::LAST_LOG;
use crate::TEST_DIR_PREFIX;

/// Per-suite knobs of a [`Tester`]
#[derive(Debug, Clone)]
pub struct TesterOptions {
    pub cluster_name: String,
    /// Replaces the default request timeouts when set
    pub cluster_options: Option<ConfigOptions>,
    /// Node log errors matching any of these are not failures
    pub ignore_log_patterns: Vec<Regex>,
    /// Skip node log scanning at teardown
    pub allow_log_errors: bool,
    /// Keep the cluster alive across tests run by the same process
    pub preserve_cluster: bool,
}

impl Default for TesterOptions {
    fn default() -> Self {
        Self {
            cluster_name: DEFAULT_CLUSTER_NAME.to_string(),
            cluster_options: None,
            ignore_log_patterns: Vec::new(),
            allow_log_errors: false,
            preserve_cluster: false,
        }
    }
}

impl TesterOptions {
    pub fn cluster_name(
        mut self,
        name: impl Into<String>,
    ) -> Self {
        self.cluster_name = name.into();
        self
    }

    pub fn cluster_options(
        mut self,
        options: ConfigOptions,
    ) -> Self {
        self.cluster_options = Some(options);
        self
    }

    pub fn ignore_log_pattern(
        mut self,
        pattern: &str,
    ) -> Result<Self> {
        self.ignore_log_patterns.push(Regex::new(pattern)?);
        Ok(self)
    }

    pub fn allow_log_errors(mut self) -> Self {
        self.allow_log_errors = true;
        self
    }

    /// Opts the suite into cluster reuse; effective only when `REUSE_CLUSTER`
    /// is set.
    pub fn can_reuse_cluster(
        mut self,
        config: &HarnessConfig,
    ) -> Self {
        self.preserve_cluster = config.reuse_cluster;
        self
    }
}

/// What set-up found left over from an earlier run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Recovery {
    /// No sentinel, or the cluster it names is ours already
    Clean,
    /// Leftover cluster loaded and torn down
    CleanedUp(String),
    /// Leftover cluster kept for reuse
    Adopted(String),
    /// Sentinel present but its cluster could not be loaded (e.g. temp dir wiped)
    Unloadable,
}

/// Cluster lifecycle manager for one test at a time.
pub struct Tester {
    config: Arc<HarnessConfig>,
    manager: Arc<dyn ClusterManager>,
    sessions: Arc<dyn SessionFactory>,
    options: TesterOptions,

    test_id: String,
    cluster: Option<ClusterHandle>,
    connections: Vec<Arc<dyn CqlSession>>,
    runners: Vec<Arc<Runner>>,
    env: Option<EnvSnapshot>,
    /// Set by [`Tester::fresh_cluster`] until the current test is torn down
    fresh: bool,
}

impl Tester {
    pub fn new(
        config: Arc<HarnessConfig>,
        manager: Arc<dyn ClusterManager>,
        sessions: Arc<dyn SessionFactory>,
        options: TesterOptions,
    ) -> Self {
        Self {
            config,
            manager,
            sessions,
            options,
            test_id: String::new(),
            cluster: None,
            connections: Vec::new(),
            runners: Vec::new(),
            env: None,
            fresh: false,
        }
    }

    pub fn config(&self) -> &HarnessConfig {
        &self.config
    }

    pub fn options(&self) -> &TesterOptions {
        &self.options
    }

    pub fn test_id(&self) -> &str {
        &self.test_id
    }

    pub fn cluster(&self) -> Result<&ClusterHandle> {
        self.cluster.as_ref().ok_or_else(no_cluster)
    }

    pub fn cluster_mut(&mut self) -> Result<&mut ClusterHandle> {
        self.cluster.as_mut().ok_or_else(no_cluster)
    }

    /// Connections opened since set-up
    pub fn connections(&self) -> &[Arc<dyn CqlSession>] {
        &self.connections
    }

    /// Runners spawned with [`Tester::go`] since set-up
    pub fn runners(&self) -> &[Arc<Runner>] {
        &self.runners
    }

    /// Whether the current cluster outlives the current test.
    fn reusing(&self) -> bool {
        self.options.preserve_cluster && !self.fresh
    }

    fn span(&self) -> EnteredSpan {
        info_span!("test", id = %self.test_id).entered()
    }

    //-----------------------------------------------------------
    // Set-up

    pub fn set_up(
        &mut self,
        test_id: impl Into<String>,
    ) -> Result<Recovery> {
        self.test_id = test_id.into();
        let _span = self.span();
        info!("setting up");

        if self.env.is_none() {
            self.env = Some(EnvSnapshot::capture());
        }

        let recovery = self.recover()?;
        self.provision()?;

        let config = self.config.clone();
        let cluster = self.cluster.as_mut().ok_or_else(no_cluster)?;

        if config.record_coverage {
            coverage::setup_jacoco(&config, cluster.test_path(), &cluster.name())?;
        }

        // the failure detector is slow to react to the quick restarts tests do
        cluster.set_configuration_options(ConfigOptions::from([(
            "phi_convict_threshold".to_string(),
            Some(PHI_CONVICT_THRESHOLD.to_string()),
        )]))?;

        let options = match &self.options.cluster_options {
            Some(options) => options.clone(),
            None => REQUEST_TIMEOUT_OPTIONS
                .iter()
                .map(|k| (k.to_string(), Some(DEFAULT_REQUEST_TIMEOUT_MS.to_string())))
                .collect(),
        };
        cluster.set_configuration_options(options)?;

        LastTestDir::new(cluster.test_path(), cluster.name()).write(&config.sentinel_path)?;

        modify_log(cluster, &config)?;

        self.connections.clear();
        self.runners.clear();
        Ok(recovery)
    }

    /// Loads the cluster named by the sentinel and, unless clusters are being
    /// reused, tears it down. Failing to load it is not an error.
    fn recover(&mut self) -> Result<Recovery> {
        if self.reusing() && self.cluster.is_some() {
            return Ok(Recovery::Clean);
        }

        let sentinel_path = self.config.sentinel_path.clone();
        let last = match LastTestDir::read(&sentinel_path) {
            Ok(Some(last)) => last,
            Ok(None) => return Ok(Recovery::Clean),
            Err(e) => {
                warn!("ignoring unreadable sentinel {:?}: {}", sentinel_path, e);
                return Ok(Recovery::Unloadable);
            }
        };

        let loaded = match self.manager.load(&last.test_path, &last.cluster_name) {
            Ok(loaded) => loaded,
            Err(e) => {
                warn!(
                    "cluster {} left at {:?} could not be loaded: {}",
                    last.cluster_name, last.test_path, e
                );
                return Ok(Recovery::Unloadable);
            }
        };

        let name = loaded.name();
        info!("found cluster {} left over at {:?}", name, last.test_path);
        self.cluster = Some(ClusterHandle::new(
            loaded,
            last.test_path,
            LifecycleState::Started,
        ));

        if self.reusing() {
            return Ok(Recovery::Adopted(name));
        }
        self.cleanup_cluster()?;
        Ok(Recovery::CleanedUp(name))
    }

    fn provision(&mut self) -> Result<()> {
        if self.reusing() {
            if let Some(cluster) = &self.cluster {
                if cluster.state() != LifecycleState::Removed {
                    debug!("reusing cluster {}", cluster.name());
                    return Ok(());
                }
            }
        }

        let test_path = tempfile::Builder::new()
            .prefix(TEST_DIR_PREFIX)
            .tempdir()?
            .keep();
        debug!("cluster ccm directory: {}", test_path.display());

        let inner = self.manager.create(
            &test_path,
            &self.options.cluster_name,
            &self.config.install_source(),
        )?;
        let mut cluster = ClusterHandle::new(inner, test_path, LifecycleState::Unconfigured);

        let mut options = ConfigOptions::new();
        if self.config.disable_vnodes {
            options.insert("num_tokens".to_string(), None);
        } else {
            options.insert("initial_token".to_string(), None);
            options.insert(
                "num_tokens".to_string(),
                Some(self.config.num_tokens.to_string()),
            );
        }
        cluster.set_configuration_options(options)?;

        if cluster.version().at_least("2.1") && self.config.offheap_memtables {
            cluster.set_configuration_options(ConfigOptions::from([(
                "memtable_allocation_type".to_string(),
                Some("offheap_objects".to_string()),
            )]))?;
        }

        self.cluster = Some(cluster);
        Ok(())
    }

    /// Throws away the reused cluster and provisions a new one for the
    /// current test only.
    pub fn fresh_cluster(&mut self) -> Result<()> {
        self.fresh = true;
        self.close_connections();
        self.stop_runners();
        if self.cluster.is_some() {
            self.cleanup_cluster()?;
        }
        let test_id = self.test_id.clone();
        self.set_up(test_id).map(|_| ())
    }

    //-----------------------------------------------------------
    // Connections

    pub fn cql_connection(
        &mut self,
        node: &dyn ManagedNode,
        options: SessionOptions,
    ) -> Result<Arc<dyn CqlSession>> {
        let session = self.open_session(node, options, false)?;
        Ok(self.track(session))
    }

    /// Every request of the returned session is routed to `node` only.
    pub fn exclusive_cql_connection(
        &mut self,
        node: &dyn ManagedNode,
        options: SessionOptions,
    ) -> Result<Arc<dyn CqlSession>> {
        let session = self.open_session(node, options, true)?;
        Ok(self.track(session))
    }

    /// [`Tester::cql_connection`], retried while the node reports
    /// `NoHostAvailable`.
    pub fn patient_cql_connection(
        &mut self,
        node: &dyn ManagedNode,
        options: SessionOptions,
    ) -> Result<Arc<dyn CqlSession>> {
        let session = self.connection_retry().run(
            || self.open_session(node, options.clone(), false),
            is_not_ready,
        )?;
        Ok(self.track(session))
    }

    /// [`Tester::exclusive_cql_connection`], retried while the node reports
    /// `NoHostAvailable`.
    pub fn patient_exclusive_cql_connection(
        &mut self,
        node: &dyn ManagedNode,
        options: SessionOptions,
    ) -> Result<Arc<dyn CqlSession>> {
        let session = self.connection_retry().run(
            || self.open_session(node, options.clone(), true),
            is_not_ready,
        )?;
        Ok(self.track(session))
    }

    fn connection_retry(&self) -> RetryExecutor {
        let connection = &self.config.connection;
        RetryExecutor::from_policy(&self.config.retry)
            .with_timeout(connection.effective(connection.timeout()))
    }

    fn open_session(
        &self,
        node: &dyn ManagedNode,
        mut options: SessionOptions,
        exclusive: bool,
    ) -> Result<Arc<dyn CqlSession>> {
        let contact = contact_point(node)?;
        if options.protocol_version.is_none() {
            options.protocol_version = Some(protocol_version_for(&self.cluster()?.version()));
        }
        if exclusive {
            options.exclusive_host = Some(contact);
        }
        debug!(
            "connecting to {} at {} (exclusive: {})",
            node.name(),
            contact,
            exclusive
        );
        Ok(self.sessions.connect(contact, &options)?)
    }

    fn track(
        &mut self,
        session: Arc<dyn CqlSession>,
    ) -> Arc<dyn CqlSession> {
        self.connections.push(session.clone());
        session
    }

    /// Address clients should contact `node` on: its native protocol
    /// interface, else its thrift one.
    pub fn get_ip_from_node(
        &self,
        node: &dyn ManagedNode,
    ) -> Result<IpAddr> {
        Ok(contact_point(node)?.ip())
    }

    //-----------------------------------------------------------
    // Test body helpers

    /// Runs `func` on a background thread until stopped or failing; the
    /// runner is stopped at teardown if the test did not do it.
    pub fn go<F, E>(
        &mut self,
        name: impl Into<String>,
        func: F,
    ) -> Result<Arc<Runner>>
    where
        F: FnMut(u64) -> std::result::Result<(), E> + Send + 'static,
        E: Into<Box<dyn std::error::Error + Send + Sync>>,
    {
        let runner = Arc::new(Runner::spawn(name, func)?);
        self.runners.push(runner.clone());
        Ok(runner)
    }

    /// Skips the current test unless `SKIP=no`.
    pub fn skip(
        &self,
        msg: &str,
    ) -> Result<()> {
        if self.config.no_skip {
            return Ok(());
        }
        Err(Error::Skipped(msg.to_string()))
    }

    /// Skips the current test when the cluster version falls outside
    /// `[min, max]`.
    pub fn require_version(
        &self,
        min: &str,
        max: Option<&str>,
    ) -> Result<()> {
        if self.config.ignore_require {
            return Ok(());
        }
        let version = self.cluster()?.version();
        if !version.at_least(min) {
            return Err(Error::Skipped(format!("{} < {}", version, min)));
        }
        if let Some(max) = max {
            if version > Version::parse(max) {
                return Err(Error::Skipped(format!("{} > {}", version, max)));
            }
        }
        Ok(())
    }

    /// Points `node` back at the configured install after a version switch.
    pub fn set_node_to_current_version(
        &self,
        node: &dyn ManagedNode,
    ) -> Result<()> {
        node.set_install_dir(&self.config.install_source())
    }

    pub fn create_ks(
        &self,
        session: &dyn CqlSession,
        name: &str,
        replication: impl Into<Replication>,
    ) -> Result<()> {
        create_ks(session, name, &replication.into())
    }

    pub fn create_cf(
        &self,
        session: &dyn CqlSession,
        name: &str,
        options: &CfOptions,
    ) -> Result<()> {
        create_cf(session, name, options, &self.cluster()?.version())
    }

    //-----------------------------------------------------------
    // Teardown

    /// Runs the teardown sequence. `failed` tells whether the test body
    /// failed; an unignored node log error fails the test as well and is
    /// returned as [`Error::LogErrors`].
    pub fn tear_down(
        &mut self,
        failed: bool,
    ) -> Result<()> {
        let _span = self.span();
        info!("tearing down");

        self.close_connections();
        self.stop_runners();
        // nothing else reads the environment once runners and sessions are gone
        if let Some(env) = self.env.take() {
            env.restore();
        }

        let log_check = self.check_node_logs();
        let failed = failed || log_check.is_err();

        if failed || self.config.keep_logs {
            match self.copy_logs(None, None) {
                Ok(Some(dir)) => info!("node logs saved to {}", dir.display()),
                Ok(None) => {}
                Err(e) => error!("Error saving log: {}", e),
            }
        }

        let cleanup = if !self.reusing() || failed {
            self.cleanup_cluster()
        } else {
            Ok(())
        };
        self.fresh = false;

        log_check.and(cleanup)
    }

    fn close_connections(&mut self) {
        for session in self.connections.drain(..) {
            session.shutdown();
        }
    }

    fn stop_runners(&mut self) {
        for runner in self.runners.drain(..) {
            if let Err(e) = runner.stop() {
                warn!("ignoring failure of runner {}: {}", runner.name(), e);
            }
        }
    }

    fn check_node_logs(&self) -> Result<()> {
        if self.options.allow_log_errors {
            return Ok(());
        }
        let Some(cluster) = &self.cluster else {
            return Ok(());
        };

        let mut offending = Vec::new();
        let mut errors = Vec::new();
        for node in cluster.nodes() {
            let entries = node
                .grep_log_for_errors()?
                .into_iter()
                .map(|lines| lines.join(" "))
                .collect();
            let unexpected = filter_errors(entries, &self.options.ignore_log_patterns);
            if !unexpected.is_empty() {
                error!("Unexpected error in {} node log: {:?}", node.name(), unexpected);
                offending.push(node.name());
                errors.extend(unexpected);
            }
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(Error::LogErrors {
                node: offending.join(", "),
                errors,
            })
        }
    }

    /// Copies every node log under `directory` (default: the configured log
    /// directory) and points `name` (default `last`) at the copy.
    pub fn copy_logs(
        &self,
        directory: Option<&Path>,
        name: Option<&str>,
    ) -> Result<Option<PathBuf>> {
        let cluster = self.cluster()?;
        copy_node_logs(
            directory.unwrap_or(&self.config.log_saved_dir),
            name.unwrap_or(LAST_LOG),
            &self.test_id,
            &cluster.nodes(),
        )
    }

    fn cleanup_cluster(&mut self) -> Result<()> {
        if self.config.silence_driver_on_shutdown {
            debug!("driver errors from here on are expected while nodes go down");
        }

        if let Some(mut cluster) = self.cluster.take() {
            if self.config.keep_test_dir {
                cluster.stop(self.config.record_coverage)?;
                self.cluster = Some(cluster);
            } else {
                // jacoco only writes coverage data when the JVM exits normally
                if self.config.record_coverage {
                    cluster.stop(true)?;
                }
                debug!(
                    "removing ccm cluster {} at: {}",
                    cluster.name(),
                    cluster.test_path().display()
                );
                cluster.remove()?;
                remove_dir_all_if_exists(cluster.test_path())?;
            }
        }

        LastTestDir::remove(&self.config.sentinel_path)?;
        Ok(())
    }

    //-----------------------------------------------------------
    // Whole-test drivers

    /// Set-up, `body`, teardown.
    ///
    /// A panicking body counts as a failed test. The body's failure wins over
    /// a teardown failure; a skipped test is not a failure.
    pub fn run<F>(
        &mut self,
        test_id: impl Into<String>,
        body: F,
    ) -> Result<()>
    where
        F: FnOnce(&mut Tester) -> Result<()>,
    {
        self.set_up(test_id)?;

        let outcome = match panic::catch_unwind(AssertUnwindSafe(|| body(&mut *self))) {
            Ok(outcome) => outcome,
            Err(payload) => Err(Error::Assertion(panic_message(payload))),
        };

        let failed = match &outcome {
            Ok(()) => false,
            Err(e) if e.is_skipped() => {
                info!("{} skipped: {}", self.test_id, e);
                false
            }
            Err(e) => {
                error!("{} failed: {}", self.test_id, e);
                true
            }
        };

        let teardown = self.tear_down(failed);
        outcome.and(teardown)
    }

    /// End-of-suite cleanup of whatever cluster the sentinel still names.
    pub fn tear_down_class(
        config: &HarnessConfig,
        manager: &dyn ClusterManager,
    ) -> Result<()> {
        let sentinel = &config.sentinel_path;
        let last = match LastTestDir::read(sentinel) {
            Ok(Some(last)) => last,
            Ok(None) => return Ok(()),
            Err(e) => {
                warn!("ignoring unreadable sentinel {:?}: {}", sentinel, e);
                return Ok(());
            }
        };

        match manager.load(&last.test_path, &last.cluster_name) {
            Ok(mut cluster) => {
                if config.keep_test_dir {
                    cluster.stop(config.record_coverage)?;
                } else {
                    cluster.remove()?;
                    remove_dir_all_if_exists(&last.test_path)?;
                }
            }
            Err(e) => debug!("leftover cluster {} not loadable: {}", last.cluster_name, e),
        }

        if let Err(e) = LastTestDir::remove(sentinel) {
            debug!("sentinel {:?} not removed: {}", sentinel, e);
        }
        Ok(())
    }
}

impl std::fmt::Debug for Tester {
    fn fmt(
        &self,
        f: &mut std::fmt::Formatter<'_>,
    ) -> std::fmt::Result {
        f.debug_struct("Tester")
            .field("test_id", &self.test_id)
            .field("cluster", &self.cluster)
            .field("connections", &self.connections.len())
            .field("runners", &self.runners.len())
            .finish()
    }
}

/// Native protocol version matching the cluster's server version.
pub fn protocol_version_for(version: &Version) -> u8 {
    if version.at_least("2.1") {
        3
    } else if version.at_least("2.0") {
        2
    } else {
        1
    }
}

/// Applies `DEBUG` / `TRACE`: whole-cluster levels first, then per-class ones.
fn modify_log(
    cluster: &mut ClusterHandle,
    config: &HarnessConfig,
) -> Result<()> {
    let toggles = [("DEBUG", &config.debug), ("TRACE", &config.trace)];
    for (level, toggle) in toggles {
        if *toggle == LogLevelToggle::All {
            cluster.set_log_level(level, Vec::new())?;
        }
    }
    for (level, toggle) in toggles {
        if let LogLevelToggle::Classes(classes) = toggle {
            cluster.set_log_level(level, classes.clone())?;
        }
    }
    Ok(())
}

fn contact_point(node: &dyn ManagedNode) -> Result<SocketAddr> {
    node.binary_address()
        .or_else(|| {
            node.thrift_address()
                .map(|a| SocketAddr::new(a.ip(), NATIVE_TRANSPORT_PORT))
        })
        .ok_or_else(|| Error::Cluster(format!("node {} exposes no client interface", node.name())))
}

fn is_not_ready(e: &Error) -> bool {
    e.failure_kind() == Some(FailureKind::NoHostAvailable)
}

fn no_cluster() -> Error {
    Error::Fatal("no cluster provisioned; call set_up first".to_string())
}
