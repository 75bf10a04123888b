//! Seams to the external cluster manager.
//!
//! The harness never starts database processes itself; it drives an
//! implementation of [`ClusterManager`] (by default the `ccm` command line
//! tool, see [`ccm`]) and only relies on the operations below.

pub mod ccm;
pub mod log_scan;
mod version;
pub use ccm::*;
pub use log_scan::*;
pub use version::*;


use std::collections::BTreeMap;
use std::fmt::Debug;
use std::net::SocketAddr;
use std::path::Path;
use std::path::PathBuf;
use std::sync::Arc;

#[cfg(test)]
use mockall::automock;

use crate::Result;

/// `cassandra.yaml` overrides; `None` removes the option from the node configuration.
pub type ConfigOptions = BTreeMap<String, Option<String>>;

/// Where node binaries come from
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InstallSource {
    /// Released version fetched by the cluster manager
    Version(String),
    /// Local Cassandra checkout or tarball
    Directory(PathBuf),
}

/// Provisions and reloads named clusters inside a working directory.
#[cfg_attr(test, automock)]
pub trait ClusterManager: Send + Sync + 'static {
    /// Creates an unconfigured, unpopulated cluster.
    fn create(
        &self,
        test_path: &Path,
        name: &str,
        install: &InstallSource,
    ) -> Result<Box<dyn ManagedCluster>>;

    /// Loads a cluster previously created under `test_path`.
    ///
    /// Fails with an I/O error when the directory is gone (e.g. temp dirs
    /// wiped by a reboot).
    fn load(
        &self,
        test_path: &Path,
        name: &str,
    ) -> Result<Box<dyn ManagedCluster>>;
}

/// One provisioned cluster.
#[cfg_attr(test, automock)]
pub trait ManagedCluster: Send + Sync + Debug {
    fn name(&self) -> String;

    /// Cassandra version of the installed binaries
    fn version(&self) -> Version;

    fn nodes(&self) -> Vec<Arc<dyn ManagedNode>>;

    /// Adds `count` nodes with default addresses.
    fn populate(
        &mut self,
        count: usize,
    ) -> Result<()>;

    fn start(&mut self) -> Result<()>;

    /// `gently` waits for a clean JVM exit; otherwise processes are killed.
    fn stop(
        &mut self,
        gently: bool,
    ) -> Result<()>;

    /// Stops every node and deletes the cluster directory.
    fn remove(&mut self) -> Result<()>;

    fn set_configuration_options(
        &mut self,
        options: ConfigOptions,
    ) -> Result<()>;

    /// `classes` empty means the root logger.
    fn set_log_level(
        &mut self,
        level: &str,
        classes: Vec<String>,
    ) -> Result<()>;
}

/// One database process of a cluster.
#[cfg_attr(test, automock)]
pub trait ManagedNode: Send + Sync + Debug {
    fn name(&self) -> String;

    /// Native protocol interface
    fn binary_address(&self) -> Option<SocketAddr>;

    /// Legacy thrift interface
    fn thrift_address(&self) -> Option<SocketAddr>;

    fn log_file(&self) -> PathBuf;

    /// Every `ERROR` entry of the node log, each with its continuation lines.
    fn grep_log_for_errors(&self) -> Result<Vec<Vec<String>>>;

    fn set_install_dir(
        &self,
        install: &InstallSource,
    ) -> Result<()>;

    fn start(&self) -> Result<()>;

    fn stop(
        &self,
        gently: bool,
    ) -> Result<()>;
}
