use std::fs;
use std::path::Path;

use tracing::debug;

use crate::HarnessConfig;
use crate::Result;

/// Instruments the cluster's JVMs with the jacoco agent.
///
/// Nodes read `<test_path>/<cluster>/cassandra.in.sh` at start-up. Nothing is
/// written when the agent jar is missing.
pub(super) fn setup_jacoco(
    config: &HarnessConfig,
    test_path: &Path,
    cluster_name: &str,
) -> Result<()> {
    let agent = &config.jacoco_agent_jar;
    let execfile = &config.jacoco_execfile;

    if !agent.is_file() {
        debug!("Jacoco agent not found or is not file. Execution will not be recorded.");
        return Ok(());
    }
    debug!("Jacoco agent found at {}", agent.display());

    let cluster_dir = test_path.join(cluster_name);
    fs::create_dir_all(&cluster_dir)?;
    fs::write(
        cluster_dir.join("cassandra.in.sh"),
        format!(
            "JVM_OPTS=\"$JVM_OPTS -javaagent:{}=destfile={}\"",
            agent.display(),
            execfile.display()
        ),
    )?;

    if execfile.is_file() {
        debug!(
            "Jacoco execfile found at {}, execution data will be appended",
            execfile.display()
        );
    } else {
        debug!("Jacoco execfile will be created at {}", execfile.display());
    }
    Ok(())
}
