use std::time::Duration;
use std::time::SystemTime;
use std::time::UNIX_EPOCH;

/// Wall-clock time since the Unix epoch; zero if the clock is set before it.
pub fn get_duration_since_epoch() -> Duration {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
}

/// return milliseconds
pub fn timestamp_millis() -> u128 {
    get_duration_since_epoch().as_millis()
}
