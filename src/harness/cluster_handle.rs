use std::fmt;
use std::net::SocketAddr;
use std::path::Path;
use std::path::PathBuf;
use std::sync::Arc;

use tracing::debug;

use crate::ConfigOptions;
use crate::Error;
use crate::ManagedCluster;
use crate::ManagedNode;
use crate::Result;
use crate::Version;

/// Lifecycle of a provisioned cluster: `Unconfigured → Started → Stopped/Removed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleState {
    /// Created, possibly populated and configured, never started
    Unconfigured,
    Started,
    Stopped,
    /// Processes gone and working directory deleted; the handle is spent
    Removed,
}

/// The cluster owned by one [`crate::Tester`].
///
/// Wraps the cluster manager's handle with the working directory it lives
/// in, the configuration applied through the harness and its lifecycle state.
pub struct ClusterHandle {
    inner: Box<dyn ManagedCluster>,
    test_path: PathBuf,
    options: ConfigOptions,
    state: LifecycleState,
}

impl ClusterHandle {
    pub(crate) fn new(
        inner: Box<dyn ManagedCluster>,
        test_path: PathBuf,
        state: LifecycleState,
    ) -> Self {
        Self {
            inner,
            test_path,
            options: ConfigOptions::new(),
            state,
        }
    }

    pub fn name(&self) -> String {
        self.inner.name()
    }

    pub fn version(&self) -> Version {
        self.inner.version()
    }

    /// Working directory the cluster was created in
    pub fn test_path(&self) -> &Path {
        &self.test_path
    }

    pub fn state(&self) -> LifecycleState {
        self.state
    }

    pub fn nodes(&self) -> Vec<Arc<dyn ManagedNode>> {
        self.inner.nodes()
    }

    pub fn node_count(&self) -> usize {
        self.inner.nodes().len()
    }

    pub fn node(
        &self,
        name: &str,
    ) -> Option<Arc<dyn ManagedNode>> {
        self.inner.nodes().into_iter().find(|n| n.name() == name)
    }

    /// Native protocol address of each node, in node order.
    pub fn addresses(&self) -> Vec<(String, Option<SocketAddr>)> {
        self.inner
            .nodes()
            .iter()
            .map(|n| (n.name(), n.binary_address()))
            .collect()
    }

    /// Every option applied through this handle, later values winning.
    pub fn configuration(&self) -> &ConfigOptions {
        &self.options
    }

    pub fn populate(
        &mut self,
        count: usize,
    ) -> Result<&mut Self> {
        self.ensure_usable()?;
        self.inner.populate(count)?;
        Ok(self)
    }

    pub fn start(&mut self) -> Result<&mut Self> {
        self.ensure_usable()?;
        self.inner.start()?;
        self.state = LifecycleState::Started;
        debug!("cluster {} started", self.inner.name());
        Ok(self)
    }

    pub fn stop(
        &mut self,
        gently: bool,
    ) -> Result<&mut Self> {
        self.ensure_usable()?;
        self.inner.stop(gently)?;
        self.state = LifecycleState::Stopped;
        debug!("cluster {} stopped (gently: {})", self.inner.name(), gently);
        Ok(self)
    }

    pub fn remove(&mut self) -> Result<()> {
        self.ensure_usable()?;
        self.inner.remove()?;
        self.state = LifecycleState::Removed;
        Ok(())
    }

    pub fn set_configuration_options(
        &mut self,
        options: ConfigOptions,
    ) -> Result<&mut Self> {
        self.ensure_usable()?;
        self.inner.set_configuration_options(options.clone())?;
        self.options.extend(options);
        Ok(self)
    }

    /// `classes` empty sets the root logger.
    pub fn set_log_level(
        &mut self,
        level: &str,
        classes: Vec<String>,
    ) -> Result<&mut Self> {
        self.ensure_usable()?;
        self.inner.set_log_level(level, classes)?;
        Ok(self)
    }

    fn ensure_usable(&self) -> Result<()> {
        if self.state == LifecycleState::Removed {
            return Err(Error::Fatal(format!(
                "cluster {} has already been removed",
                self.inner.name()
            )));
        }
        Ok(())
    }
}

impl fmt::Debug for ClusterHandle {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        f.debug_struct("ClusterHandle")
            .field("name", &self.inner.name())
            .field("test_path", &self.test_path)
            .field("state", &self.state)
            .field("nodes", &self.node_count())
            .finish()
    }
}
