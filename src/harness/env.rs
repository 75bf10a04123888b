use std::collections::HashMap;
use std::env;
use std::ffi::OsString;

use tracing::debug;

/// Process environment captured at set-up.
///
/// Test bodies may change variables (JDK selection during upgrade tests);
/// [`EnvSnapshot::restore`] puts every variable back as captured and drops
/// the ones added since.
#[derive(Debug, Clone)]
pub struct EnvSnapshot {
    vars: HashMap<OsString, OsString>,
}

impl EnvSnapshot {
    pub fn capture() -> Self {
        Self {
            vars: env::vars_os().collect(),
        }
    }

    pub fn restore(&self) {
        let current: HashMap<OsString, OsString> = env::vars_os().collect();

        for key in current.keys() {
            if !self.vars.contains_key(key) {
                debug!("unsetting {:?} added during the test", key);
                env::remove_var(key);
            }
        }
        for (key, value) in &self.vars {
            if current.get(key) != Some(value) {
                debug!("restoring {:?}", key);
                env::set_var(key, value);
            }
        }
    }
}
