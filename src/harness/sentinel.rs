//! Crash-recovery sentinel.
//!
//! Written at set-up and removed by a clean teardown, so finding one at the
//! start of a run means the previous test never reached its teardown. The
//! file holds the working directory on the first line and the cluster name
//! on the second.

use std::fs;
use std::io;
use std::path::Path;
use std::path::PathBuf;

use crate::utils::file_io::create_parent_dir_if_not_exist;
use crate::utils::file_io::remove_file_if_exists;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LastTestDir {
    pub test_path: PathBuf,
    pub cluster_name: String,
}

impl LastTestDir {
    pub fn new(
        test_path: impl Into<PathBuf>,
        cluster_name: impl Into<String>,
    ) -> Self {
        Self {
            test_path: test_path.into(),
            cluster_name: cluster_name.into(),
        }
    }

    /// `Ok(None)` when no sentinel exists.
    pub fn read(path: &Path) -> io::Result<Option<Self>> {
        let content = match fs::read_to_string(path) {
            Ok(content) => content,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e),
        };

        let mut lines = content.lines();
        let test_path = lines.next().unwrap_or_default();
        let cluster_name = lines.next().unwrap_or_default().trim_end();
        if test_path.is_empty() {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!("sentinel {:?} names no working directory", path),
            ));
        }
        Ok(Some(Self::new(test_path, cluster_name)))
    }

    pub fn write(
        &self,
        path: &Path,
    ) -> io::Result<()> {
        create_parent_dir_if_not_exist(path)?;
        fs::write(
            path,
            format!("{}\n{}", self.test_path.display(), self.cluster_name),
        )
    }

    pub fn remove(path: &Path) -> io::Result<()> {
        remove_file_if_exists(path)
    }
}
