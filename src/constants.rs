use std::time::Duration;

// -
// Artifacts

/// Directory receiving saved node logs and the harness log
pub const LOG_SAVED_DIR: &str = "logs";
/// Stable name pointing at the most recent saved logs
pub const LAST_LOG: &str = "last";
/// Harness log file name inside [`LOG_SAVED_DIR`]
pub const HARNESS_LOG_FILE: &str = "dtest.log";
/// Sentinel naming the working directory and cluster of the last test
pub const LAST_TEST_DIR: &str = "last_test_dir";
/// Prefix of per-test working directories
pub const TEST_DIR_PREFIX: &str = "dtest-";
/// Default cluster name
pub const DEFAULT_CLUSTER_NAME: &str = "test";

// -
// Retry

pub(crate) const DEFAULT_RETRY_TIMEOUT_MS: u64 = 60_000;
pub(crate) const DEFAULT_RETRY_INTERVAL_MS: u64 = 250;
pub(crate) const DEFAULT_CONNECTION_TIMEOUT_MS: u64 = 10_000;
pub(crate) const SLOW_PLATFORM_TIMEOUT_MULTIPLIER: u32 = 5;

// -
// Cluster configuration applied at set-up

pub(crate) const DEFAULT_NUM_TOKENS: u32 = 256;
pub(crate) const DEFAULT_REQUEST_TIMEOUT_MS: u64 = 10_000;
pub(crate) const PHI_CONVICT_THRESHOLD: u32 = 5;

/// CQL port assumed for nodes that only advertise a thrift address
pub(crate) const NATIVE_TRANSPORT_PORT: u16 = 9042;

pub(crate) const REQUEST_TIMEOUT_OPTIONS: [&str; 5] = [
    "read_request_timeout_in_ms",
    "range_request_timeout_in_ms",
    "write_request_timeout_in_ms",
    "truncate_request_timeout_in_ms",
    "request_timeout_in_ms",
];

/// Client-side request timeout set on every harness session
pub const SESSION_REQUEST_TIMEOUT: Duration = Duration::from_secs(60);

/// Pause after schema changes issued by helpers
pub(crate) const SCHEMA_SETTLE_DELAY: Duration = Duration::from_millis(200);

// -
// Assertions

/// Default relative spread accepted by [`crate::assert_almost_equal`]
pub const DEFAULT_ALMOST_EQUAL_TOLERANCE: f64 = 0.16;
