//! Tunables for coordination, autosave and change delivery.
//!
//! All durations serialize in human-readable form (`"1s"`, `"250ms"`), so the
//! struct can be embedded directly in a TOML or JSON configuration file.
//!
//! ```toml
//! [coordination]
//! quiescence = "1s"
//! lock_timeout = "5s"
//! ```

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Timing configuration shared by the coordinator and sessions.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CoordinationConfig {
    /// Idle time after the last edit before autosave commits.
    #[serde(with = "humantime_serde")]
    pub quiescence: Duration,

    /// How long to wait for another process to drop an incompatible lock.
    #[serde(with = "humantime_serde")]
    pub lock_timeout: Duration,

    /// Poll interval while waiting for a contended lock.
    #[serde(with = "humantime_serde")]
    pub lock_poll: Duration,

    /// How long presenters get to flush and acknowledge a relinquish request.
    #[serde(with = "humantime_serde")]
    pub relinquish_timeout: Duration,

    /// Filesystem events for a path this process just wrote are dropped for
    /// this long.
    #[serde(with = "humantime_serde")]
    pub echo_window: Duration,

    /// Upper bound on waiting for a placeholder to download.
    #[serde(with = "humantime_serde")]
    pub materialize_timeout: Duration,
}

impl Default for CoordinationConfig {
    fn default() -> Self {
        Self {
            quiescence: Duration::from_secs(1),
            lock_timeout: Duration::from_secs(5),
            lock_poll: Duration::from_millis(50),
            relinquish_timeout: Duration::from_secs(5),
            echo_window: Duration::from_millis(500),
            materialize_timeout: Duration::from_secs(30),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_document_keeps_defaults() {
        let config: CoordinationConfig =
            serde_json::from_str(r#"{"quiescence": "250ms"}"#).unwrap();
        assert_eq!(config.quiescence, Duration::from_millis(250));
        assert_eq!(config.lock_timeout, Duration::from_secs(5));
        assert_eq!(config.echo_window, Duration::from_millis(500));
    }

    #[test]
    fn test_durations_serialize_human_readable() {
        let json = serde_json::to_value(CoordinationConfig::default()).unwrap();
        assert_eq!(json["quiescence"], "1s");
        assert_eq!(json["lock_poll"], "50ms");
    }
}
