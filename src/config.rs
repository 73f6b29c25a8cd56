use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Engine-wide configuration. All fields have defaults so an empty config
/// document deserializes to a working setup.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    #[serde(default = "default_event_buffer_size")]
    pub event_buffer_size: usize,

    /// Wait after the first message of a media group before the aggregate
    /// event is synthesized.
    #[serde(default = "default_media_group_delay", with = "duration_ms")]
    pub media_group_delay: Duration,

    /// Grace period for in-flight event tasks during shutdown.
    #[serde(default = "default_shutdown_timeout", with = "duration_ms")]
    pub shutdown_timeout: Duration,

    /// Runaway-loop guard for `foreach`, surfaced as a runtime error.
    #[serde(default = "default_loop_iteration_cap")]
    pub loop_iteration_cap: usize,

    /// FIFO capacity of the per-group log kept by the variable store.
    #[serde(default = "default_log_capacity")]
    pub log_capacity: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            event_buffer_size: default_event_buffer_size(),
            media_group_delay: default_media_group_delay(),
            shutdown_timeout: default_shutdown_timeout(),
            loop_iteration_cap: default_loop_iteration_cap(),
            log_capacity: default_log_capacity(),
        }
    }
}

fn default_event_buffer_size() -> usize {
    256
}

fn default_media_group_delay() -> Duration {
    Duration::from_millis(1500)
}

fn default_shutdown_timeout() -> Duration {
    Duration::from_secs(5)
}

fn default_loop_iteration_cap() -> usize {
    10_000
}

fn default_log_capacity() -> usize {
    500
}

mod duration_ms {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_u64(duration.as_millis() as u64)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let millis = u64::deserialize(deserializer)?;
        Ok(Duration::from_millis(millis))
    }
}
