//! Saved node logs.
//!
//! Each save lands in `<directory>/<millis>_<test id>/<node>.log`; a stable
//! `<directory>/last` entry always points at the most recent save.

use std::fs;
use std::path::Path;
use std::path::PathBuf;
use std::sync::Arc;

use tracing::debug;

use crate::utils::file_io::remove_entry;
use crate::utils::time::timestamp_millis;
use crate::ManagedNode;
use crate::Result;

/// Copies every node log and refreshes the `last` link.
///
/// Returns the directory holding the copies, or `None` when the cluster has
/// no nodes.
pub fn copy_node_logs(
    directory: &Path,
    link_name: &str,
    test_id: &str,
    nodes: &[Arc<dyn ManagedNode>],
) -> Result<Option<PathBuf>> {
    fs::create_dir_all(directory)?;
    if nodes.is_empty() {
        return Ok(None);
    }

    let basedir = format!("{}_{}", timestamp_millis(), sanitize(test_id));
    let logdir = directory.join(&basedir);
    fs::create_dir(&logdir)?;

    for node in nodes {
        let target = logdir.join(format!("{}.log", node.name()));
        debug!("saving {:?} to {:?}", node.log_file(), target);
        fs::copy(node.log_file(), target)?;
    }

    let link = directory.join(link_name);
    remove_entry(&link)?;
    link_latest(&basedir, &logdir, &link)?;

    Ok(Some(logdir))
}

#[cfg(unix)]
fn link_latest(
    basedir: &str,
    _logdir: &Path,
    link: &Path,
) -> Result<()> {
    std::os::unix::fs::symlink(basedir, link)?;
    Ok(())
}

/// Symbolic links need elevated rights on some platforms; keep a copy instead.
#[cfg(not(unix))]
fn link_latest(
    _basedir: &str,
    logdir: &Path,
    link: &Path,
) -> Result<()> {
    crate::utils::file_io::copy_dir_all(logdir, link)?;
    Ok(())
}

/// Test ids may carry path separators (`module::suite::case`).
fn sanitize(test_id: &str) -> String {
    test_id
        .chars()
        .map(|c| match c {
            '/' | '\\' | ':' | ' ' => '_',
            c => c,
        })
        .collect()
}
