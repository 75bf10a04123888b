//! Harness configuration.
//!
//! Built once per process and shared by reference with every [`crate::Tester`].
//! Sources are merged in the following order (later sources override earlier):
//! 1. Type defaults (lowest priority)
//! 2. TOML file named by `DTEST_CONFIG`, else `~/.cassandra-dtest.toml` if present
//! 3. Process environment variables (highest priority)
//!
//! Boolean switches follow the case-insensitive `yes`/`true` convention; any
//! other value (including unset) reads as off.
mod retry;
pub use retry::*;


use std::collections::HashMap;
use std::path::PathBuf;

use ::config::Config;
use ::config::Environment;
use ::config::File;
use serde::Deserialize;

use crate::cluster::InstallSource;
use crate::constants::DEFAULT_NUM_TOKENS;
use crate::constants::HARNESS_LOG_FILE;
use crate::constants::LAST_TEST_DIR;
use crate::constants::LOG_SAVED_DIR;
use crate::Error;
use crate::Result;

/// Variables the harness reads from the process environment.
const HARNESS_VARS: [&str; 19] = [
    "CASSANDRA_DIR",
    "CASSANDRA_VERSION",
    "SKIP",
    "DEBUG",
    "TRACE",
    "KEEP_LOGS",
    "KEEP_TEST_DIR",
    "PRINT_DEBUG",
    "DISABLE_VNODES",
    "OFFHEAP_MEMTABLES",
    "NUM_TOKENS",
    "RECORD_COVERAGE",
    "REUSE_CLUSTER",
    "SILENCE_DRIVER_ON_SHUTDOWN",
    "IGNORE_REQUIRE",
    "JACOCO_AGENT_JAR",
    "JACOCO_EXECFILE",
    "DTEST_LOG_DIR",
    "DTEST_SENTINEL",
];

/// Nested sections overridable as `RETRY__TIMEOUT_MS`, `CONNECTION__TIMEOUT_MS`, ...
const SECTION_PREFIXES: [&str; 2] = ["RETRY__", "CONNECTION__"];

const CONFIG_PATH_VAR: &str = "DTEST_CONFIG";
const HOME_CONFIG_FILE: &str = ".cassandra-dtest.toml";

/// Cluster log level requested through `DEBUG` / `TRACE`
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum LogLevelToggle {
    #[default]
    Off,
    /// Whole cluster
    All,
    /// Only the listed logger classes
    Classes(Vec<String>),
}

impl LogLevelToggle {
    /// `yes`/`true` → all, `no`/`false`/empty → off, anything else is a
    /// `:`-separated class list.
    pub fn parse(value: Option<&str>) -> Self {
        let Some(value) = value else {
            return LogLevelToggle::Off;
        };
        match value.trim().to_lowercase().as_str() {
            "" | "no" | "false" => LogLevelToggle::Off,
            "yes" | "true" => LogLevelToggle::All,
            _ => LogLevelToggle::Classes(
                value
                    .split(':')
                    .map(str::trim)
                    .filter(|c| !c.is_empty())
                    .map(String::from)
                    .collect(),
            ),
        }
    }

    pub fn is_enabled(&self) -> bool {
        !matches!(self, LogLevelToggle::Off)
    }
}

/// Raw, string-typed view of every source; converted into [`HarnessConfig`].
#[derive(Debug, Deserialize, Default)]
#[serde(default)]
struct RawSettings {
    default_dir: Option<String>,
    cassandra_dir: Option<String>,
    cassandra_version: Option<String>,
    skip: Option<String>,
    debug: Option<String>,
    trace: Option<String>,
    keep_logs: Option<String>,
    keep_test_dir: Option<String>,
    print_debug: Option<String>,
    disable_vnodes: Option<String>,
    offheap_memtables: Option<String>,
    num_tokens: Option<String>,
    record_coverage: Option<String>,
    reuse_cluster: Option<String>,
    silence_driver_on_shutdown: Option<String>,
    ignore_require: Option<String>,
    jacoco_agent_jar: Option<String>,
    jacoco_execfile: Option<String>,
    dtest_log_dir: Option<String>,
    dtest_sentinel: Option<String>,
    retry: RetryPolicy,
    connection: ConnectionPolicy,
}

#[derive(Debug, Clone, PartialEq)]
pub struct HarnessConfig {
    /// Cassandra installation used when no version is requested
    pub cassandra_dir: PathBuf,
    /// Released version for the cluster manager to fetch instead of `cassandra_dir`
    pub cassandra_version: Option<String>,
    /// `SKIP=no`: run tests that would otherwise skip themselves
    pub no_skip: bool,
    pub debug: LogLevelToggle,
    pub trace: LogLevelToggle,
    /// Save node logs even when the test passes
    pub keep_logs: bool,
    /// Stop the cluster at teardown but leave its working directory
    pub keep_test_dir: bool,
    /// Echo harness debug logs to stdout
    pub print_debug: bool,
    pub disable_vnodes: bool,
    pub offheap_memtables: bool,
    pub num_tokens: u32,
    /// Instrument nodes with the jacoco agent; nodes are then stopped gently
    pub record_coverage: bool,
    /// Keep the cluster alive across tests of a reuse-enabled suite
    pub reuse_cluster: bool,
    pub silence_driver_on_shutdown: bool,
    pub ignore_require: bool,
    pub jacoco_agent_jar: PathBuf,
    pub jacoco_execfile: PathBuf,
    /// Saved node logs and the harness log land here
    pub log_saved_dir: PathBuf,
    /// Crash-recovery sentinel
    pub sentinel_path: PathBuf,
    pub retry: RetryPolicy,
    pub connection: ConnectionPolicy,
}

impl Default for HarnessConfig {
    fn default() -> Self {
        Self::from_raw(RawSettings::default())
    }
}

impl HarnessConfig {
    /// Loads the configuration from the process environment without validation.
    ///
    /// # Examples
    /// ```ignore
    /// std::env::set_var("DISABLE_VNODES", "yes");
    /// let config = HarnessConfig::load()?.validate()?;
    /// assert!(config.disable_vnodes);
    /// ```
    pub fn load() -> Result<Self> {
        Self::from_vars(std::env::vars())
    }

    /// Same as [`HarnessConfig::load`] but reading an explicit variable list.
    pub fn from_vars<I, K, V>(vars: I) -> Result<Self>
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        let vars: HashMap<String, String> = vars
            .into_iter()
            .map(|(k, v)| (k.into(), v.into()))
            .collect();

        let mut builder = Config::builder();

        if let Some(path) = vars.get(CONFIG_PATH_VAR) {
            builder = builder.add_source(File::with_name(path).required(true));
        } else if let Some(home) = vars.get("HOME") {
            let path = PathBuf::from(home).join(HOME_CONFIG_FILE);
            builder = builder.add_source(File::from(path).required(false));
        }

        let harness_vars: ::config::Map<String, String> = vars
            .into_iter()
            .filter(|(k, _)| {
                HARNESS_VARS.contains(&k.as_str())
                    || SECTION_PREFIXES.iter().any(|p| k.starts_with(p))
            })
            .collect();

        builder = builder.add_source(
            Environment::default()
                .separator("__")
                .ignore_empty(true)
                .source(Some(harness_vars)),
        );

        let raw: RawSettings = builder.build()?.try_deserialize()?;
        Ok(Self::from_raw(raw))
    }

    fn from_raw(raw: RawSettings) -> Self {
        let cassandra_dir = raw
            .cassandra_dir
            .or(raw.default_dir)
            .map(|d| expand_home(&d))
            .unwrap_or_else(|| PathBuf::from("./"));

        let jacoco_agent_jar = raw
            .jacoco_agent_jar
            .map(PathBuf::from)
            .unwrap_or_else(|| cassandra_dir.join("build/lib/jars/jacocoagent.jar"));
        let jacoco_execfile = raw
            .jacoco_execfile
            .map(PathBuf::from)
            .unwrap_or_else(|| cassandra_dir.join("build/jacoco/jacoco.exec"));

        Self {
            cassandra_version: raw.cassandra_version.filter(|v| !v.trim().is_empty()),
            no_skip: raw
                .skip
                .map(|v| matches!(v.to_lowercase().as_str(), "no" | "false"))
                .unwrap_or(false),
            debug: LogLevelToggle::parse(raw.debug.as_deref()),
            trace: LogLevelToggle::parse(raw.trace.as_deref()),
            keep_logs: is_flag_set(raw.keep_logs.as_deref()),
            keep_test_dir: is_flag_set(raw.keep_test_dir.as_deref()),
            print_debug: is_flag_set(raw.print_debug.as_deref()),
            disable_vnodes: is_flag_set(raw.disable_vnodes.as_deref()),
            offheap_memtables: is_flag_set(raw.offheap_memtables.as_deref()),
            num_tokens: raw
                .num_tokens
                .and_then(|n| n.trim().parse().ok())
                .unwrap_or(DEFAULT_NUM_TOKENS),
            record_coverage: is_flag_set(raw.record_coverage.as_deref()),
            reuse_cluster: is_flag_set(raw.reuse_cluster.as_deref()),
            silence_driver_on_shutdown: raw
                .silence_driver_on_shutdown
                .map(|v| is_flag_set(Some(&v)))
                .unwrap_or(true),
            ignore_require: is_flag_set(raw.ignore_require.as_deref()),
            jacoco_agent_jar,
            jacoco_execfile,
            log_saved_dir: raw
                .dtest_log_dir
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from(LOG_SAVED_DIR)),
            sentinel_path: raw
                .dtest_sentinel
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from(LAST_TEST_DIR)),
            retry: raw.retry,
            connection: raw.connection,
            cassandra_dir,
        }
    }

    /// Validates configuration and returns validated instance.
    pub fn validate(self) -> Result<Self> {
        if self.num_tokens == 0 && !self.disable_vnodes {
            return Err(Error::InvalidConfig(
                "NUM_TOKENS must be positive unless DISABLE_VNODES is set".into(),
            ));
        }
        if self.log_saved_dir.as_os_str().is_empty() {
            return Err(Error::InvalidConfig("log directory path cannot be empty".into()));
        }
        if self.sentinel_path.as_os_str().is_empty() {
            return Err(Error::InvalidConfig("sentinel path cannot be empty".into()));
        }
        self.retry.validate()?;
        self.connection.validate()?;
        Ok(self)
    }

    /// What the cluster manager should install: a released version when one
    /// is requested, the local build otherwise.
    pub fn install_source(&self) -> InstallSource {
        match &self.cassandra_version {
            Some(version) => InstallSource::Version(version.clone()),
            None => InstallSource::Directory(self.cassandra_dir.clone()),
        }
    }

    pub fn harness_log_path(&self) -> PathBuf {
        self.log_saved_dir.join(HARNESS_LOG_FILE)
    }
}

/// Case-insensitive `yes`/`true`.
pub fn is_flag_set(value: Option<&str>) -> bool {
    value
        .map(|v| matches!(v.trim().to_lowercase().as_str(), "yes" | "true"))
        .unwrap_or(false)
}

fn expand_home(path: &str) -> PathBuf {
    match (path.strip_prefix("~/"), std::env::var_os("HOME")) {
        (Some(rest), Some(home)) => PathBuf::from(home).join(rest),
        _ => PathBuf::from(path),
    }
}
