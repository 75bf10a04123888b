//! [`ClusterManager`] backed by the `ccm` command line tool.
//!
//! Every command runs with `--config-dir` pointing at the test working
//! directory, so concurrent harness processes never share ccm state.

use std::fs;
use std::net::IpAddr;
use std::net::Ipv4Addr;
use std::net::SocketAddr;
use std::path::Path;
use std::path::PathBuf;
use std::process::Command;
use std::process::Stdio;
use std::sync::Arc;

use regex::Regex;
use tracing::debug;
use tracing::warn;

use super::grep_errors_in_file;
use super::ClusterManager;
use super::ConfigOptions;
use super::InstallSource;
use super::ManagedCluster;
use super::ManagedNode;
use super::Version;
use crate::constants::NATIVE_TRANSPORT_PORT;
use crate::Error;
use crate::Result;

const THRIFT_PORT: u16 = 9160;
pub(super) const CLUSTER_CONF: &str = "cluster.conf";
const NODE_LOG: &str = "logs/system.log";

/// Runs `ccm` from `PATH` unless told otherwise.
#[derive(Debug, Clone)]
pub struct CcmClusterManager {
    binary: PathBuf,
}

impl Default for CcmClusterManager {
    fn default() -> Self {
        Self {
            binary: PathBuf::from("ccm"),
        }
    }
}

impl CcmClusterManager {
    pub fn new(binary: impl Into<PathBuf>) -> Self {
        Self {
            binary: binary.into(),
        }
    }
}

impl ClusterManager for CcmClusterManager {
    fn create(
        &self,
        test_path: &Path,
        name: &str,
        install: &InstallSource,
    ) -> Result<Box<dyn ManagedCluster>> {
        let ccm = Ccm::new(&self.binary, test_path);
        let mut args = vec!["create".to_string(), name.to_string()];
        args.extend(install_args(install));
        ccm.run(&args)?;

        let version = match install {
            InstallSource::Version(v) => Version::parse(v),
            InstallSource::Directory(dir) => version_from_build(dir)?,
        };

        Ok(Box::new(CcmCluster {
            ccm,
            name: name.to_string(),
            version,
            nodes: Vec::new(),
        }))
    }

    fn load(
        &self,
        test_path: &Path,
        name: &str,
    ) -> Result<Box<dyn ManagedCluster>> {
        let cluster_dir = test_path.join(name);
        let conf = fs::read_to_string(cluster_dir.join(CLUSTER_CONF))?;
        let version = version_from_conf(&conf)?;

        let ccm = Ccm::new(&self.binary, test_path);
        let mut nodes = Vec::new();
        for index in node_indexes(&cluster_dir)? {
            nodes.push(Arc::new(CcmNode::new(ccm.clone(), &cluster_dir, index)));
        }

        Ok(Box::new(CcmCluster {
            ccm,
            name: name.to_string(),
            version,
            nodes,
        }))
    }
}

/// Command runner bound to one ccm configuration directory.
#[derive(Debug, Clone)]
struct Ccm {
    binary: PathBuf,
    config_dir: PathBuf,
}

impl Ccm {
    fn new(
        binary: &Path,
        config_dir: &Path,
    ) -> Self {
        Self {
            binary: binary.to_path_buf(),
            config_dir: config_dir.to_path_buf(),
        }
    }

    fn run<S: AsRef<str>>(
        &self,
        args: &[S],
    ) -> Result<String> {
        let mut cmd = Command::new(&self.binary);
        cmd.args(args.iter().map(|a| a.as_ref()))
            .arg(format!("--config-dir={}", self.config_dir.display()))
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());

        debug!("running {:?}", cmd);
        let output = cmd.output()?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(Error::Cluster(format!(
                "ccm {} failed ({}): {}",
                args.iter().map(|a| a.as_ref()).collect::<Vec<_>>().join(" "),
                output.status,
                stderr.trim()
            )));
        }
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }
}

#[derive(Debug)]
struct CcmCluster {
    ccm: Ccm,
    name: String,
    version: Version,
    nodes: Vec<Arc<CcmNode>>,
}

impl CcmCluster {
    fn cluster_dir(&self) -> PathBuf {
        self.ccm.config_dir.join(&self.name)
    }
}

impl ManagedCluster for CcmCluster {
    fn name(&self) -> String {
        self.name.clone()
    }

    fn version(&self) -> Version {
        self.version.clone()
    }

    fn nodes(&self) -> Vec<Arc<dyn ManagedNode>> {
        self.nodes
            .iter()
            .map(|n| n.clone() as Arc<dyn ManagedNode>)
            .collect()
    }

    fn populate(
        &mut self,
        count: usize,
    ) -> Result<()> {
        self.ccm.run(&["populate".to_string(), "-n".to_string(), count.to_string()])?;
        let cluster_dir = self.cluster_dir();
        self.nodes = (1..=count)
            .map(|i| Arc::new(CcmNode::new(self.ccm.clone(), &cluster_dir, i)))
            .collect();
        Ok(())
    }

    fn start(&mut self) -> Result<()> {
        self.ccm.run(&["start", "--wait-for-binary-proto"])?;
        Ok(())
    }

    fn stop(
        &mut self,
        gently: bool,
    ) -> Result<()> {
        if gently {
            self.ccm.run(&["stop"])?;
        } else {
            self.ccm.run(&["stop", "--not-gently"])?;
        }
        Ok(())
    }

    fn remove(&mut self) -> Result<()> {
        self.ccm.run(&["remove"])?;
        let dir = self.cluster_dir();
        if dir.exists() {
            warn!("ccm left {} behind, deleting it", dir.display());
            fs::remove_dir_all(&dir)?;
        }
        self.nodes.clear();
        Ok(())
    }

    fn set_configuration_options(
        &mut self,
        options: ConfigOptions,
    ) -> Result<()> {
        if options.is_empty() {
            return Ok(());
        }
        let mut args = vec!["updateconf".to_string()];
        args.extend(options.into_iter().map(|(k, v)| match v {
            Some(v) => format!("{}:{}", k, v),
            None => format!("{}:null", k),
        }));
        self.ccm.run(&args)?;
        Ok(())
    }

    fn set_log_level(
        &mut self,
        level: &str,
        classes: Vec<String>,
    ) -> Result<()> {
        if classes.is_empty() {
            self.ccm.run(&["setlog", level])?;
            return Ok(());
        }
        for class in classes {
            self.ccm.run(&["setlog".to_string(), "-c".to_string(), class, level.to_string()])?;
        }
        Ok(())
    }
}

#[derive(Debug)]
struct CcmNode {
    ccm: Ccm,
    name: String,
    ip: IpAddr,
    log_file: PathBuf,
}

impl CcmNode {
    /// ccm numbers nodes from 1 and binds `nodeN` to `127.0.0.N`.
    fn new(
        ccm: Ccm,
        cluster_dir: &Path,
        index: usize,
    ) -> Self {
        let name = format!("node{}", index);
        let log_file = cluster_dir.join(&name).join(NODE_LOG);
        Self {
            ccm,
            ip: IpAddr::V4(Ipv4Addr::new(127, 0, 0, index.min(255) as u8)),
            name,
            log_file,
        }
    }
}

impl ManagedNode for CcmNode {
    fn name(&self) -> String {
        self.name.clone()
    }

    fn binary_address(&self) -> Option<SocketAddr> {
        Some(SocketAddr::new(self.ip, NATIVE_TRANSPORT_PORT))
    }

    fn thrift_address(&self) -> Option<SocketAddr> {
        Some(SocketAddr::new(self.ip, THRIFT_PORT))
    }

    fn log_file(&self) -> PathBuf {
        self.log_file.clone()
    }

    fn grep_log_for_errors(&self) -> Result<Vec<Vec<String>>> {
        grep_errors_in_file(&self.log_file)
    }

    fn set_install_dir(
        &self,
        install: &InstallSource,
    ) -> Result<()> {
        let mut args = vec![self.name.clone(), "setdir".to_string()];
        args.extend(install_args(install));
        self.ccm.run(&args)?;
        Ok(())
    }

    fn start(&self) -> Result<()> {
        self.ccm.run(&[self.name.as_str(), "start", "--wait-for-binary-proto"])?;
        Ok(())
    }

    fn stop(
        &self,
        gently: bool,
    ) -> Result<()> {
        if gently {
            self.ccm.run(&[self.name.as_str(), "stop"])?;
        } else {
            self.ccm.run(&[self.name.as_str(), "stop", "--not-gently"])?;
        }
        Ok(())
    }
}

pub(super) fn install_args(install: &InstallSource) -> Vec<String> {
    match install {
        InstallSource::Version(v) => vec!["-v".to_string(), v.clone()],
        InstallSource::Directory(dir) => vec![format!("--install-dir={}", dir.display())],
    }
}

/// Reads `base.version` from the `build.xml` of a source checkout.
pub(super) fn version_from_build(install_dir: &Path) -> Result<Version> {
    let build = fs::read_to_string(install_dir.join("build.xml"))?;
    let re = Regex::new(r#"name="base\.version"\s+value="([^"]+)""#)?;
    re.captures(&build)
        .and_then(|c| c.get(1))
        .map(|m| Version::parse(m.as_str()))
        .ok_or_else(|| {
            Error::Cluster(format!(
                "no base.version in {}",
                install_dir.join("build.xml").display()
            ))
        })
}

/// `cluster.conf` records either the fetched version or the install directory.
fn version_from_conf(conf: &str) -> Result<Version> {
    let field = |key: &str| {
        conf.lines()
            .filter_map(|l| l.trim().strip_prefix(key))
            .map(|v| v.trim().trim_matches(|c| c == '\'' || c == '"').to_string())
            .find(|v| !v.is_empty())
    };
    if let Some(v) = field("cassandra_version:").or_else(|| field("version:")) {
        return Ok(Version::parse(&v));
    }
    match field("install_dir:").or_else(|| field("cassandra_dir:")) {
        Some(dir) => version_from_build(Path::new(&dir)),
        None => Err(Error::Cluster(format!("{} names no version", CLUSTER_CONF))),
    }
}

fn node_indexes(cluster_dir: &Path) -> Result<Vec<usize>> {
    let mut indexes = Vec::new();
    for entry in fs::read_dir(cluster_dir)? {
        let entry = entry?;
        if !entry.file_type()?.is_dir() {
            continue;
        }
        if let Some(i) = entry
            .file_name()
            .to_str()
            .and_then(|n| n.strip_prefix("node"))
            .and_then(|n| n.parse::<usize>().ok())
        {
            indexes.push(i);
        }
    }
    indexes.sort_unstable();
    Ok(indexes)
}
