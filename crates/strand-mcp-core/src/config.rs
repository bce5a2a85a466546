//! Configuration types for connections and transports

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Engine configuration shared by both roles
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnectionConfig {
    /// Timeout applied by typed calls; `None` waits indefinitely
    #[serde(with = "duration_serde::option")]
    pub request_timeout: Option<Duration>,

    /// Refuse outbound calls the peer did not advertise a capability for
    pub strict_capabilities: bool,

    /// How outbound request ids are generated
    pub id_strategy: IdStrategy,
}

/// Outbound request id generation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum IdStrategy {
    /// Random UUID strings
    #[default]
    Random,
    /// Monotonic integers starting at 1
    Sequential,
}

/// Heartbeat configuration for socket transports
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HeartbeatConfig {
    pub enabled: bool,

    /// Interval between heartbeat frames
    #[serde(with = "duration_serde")]
    pub interval: Duration,

    /// Delay before the first heartbeat after (re)connecting
    #[serde(with = "duration_serde")]
    pub initial_delay: Duration,
}

/// Reconnection policy for socket transports
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReconnectConfig {
    pub enabled: bool,

    /// Maximum number of reconnection attempts
    pub max_attempts: u32,

    /// Delay before the first attempt
    #[serde(with = "duration_serde")]
    pub base_delay: Duration,

    /// Maximum delay between attempts
    #[serde(with = "duration_serde")]
    pub max_delay: Duration,

    /// Exponential backoff multiplier
    pub backoff_multiplier: f64,

    /// Jitter factor (0.0 to 1.0)
    pub jitter: f64,
}

/// Socket transport configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SocketConfig {
    pub heartbeat: HeartbeatConfig,
    pub reconnect: ReconnectConfig,

    /// Largest accepted frame; longer lines are dropped
    pub max_frame_bytes: usize,
}

/// Largest newline-delimited frame accepted by the line-based transports
pub const MAX_FRAME_BYTES: usize = 4 * 1024 * 1024;

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            request_timeout: Some(Duration::from_secs(60)),
            strict_capabilities: false,
            id_strategy: IdStrategy::Random,
        }
    }
}

impl Default for HeartbeatConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            interval: Duration::from_secs(15),
            initial_delay: Duration::from_secs(1),
        }
    }
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_attempts: 5,
            base_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(30),
            backoff_multiplier: 2.0,
            jitter: 0.0,
        }
    }
}

impl Default for SocketConfig {
    fn default() -> Self {
        Self {
            heartbeat: HeartbeatConfig::default(),
            reconnect: ReconnectConfig::default(),
            max_frame_bytes: MAX_FRAME_BYTES,
        }
    }
}

impl ReconnectConfig {
    pub fn disabled() -> Self {
        Self {
            enabled: false,
            ..Self::default()
        }
    }

    /// Delay before attempt `attempt` (1-based):
    /// `base_delay * backoff_multiplier^(attempt - 1)`, capped at `max_delay`.
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        if attempt == 0 {
            return Duration::ZERO;
        }

        let multiplier = self.backoff_multiplier.powi((attempt - 1) as i32);
        let mut delay = Duration::from_millis((self.base_delay.as_millis() as f64 * multiplier) as u64);

        // Cap at max delay
        if delay > self.max_delay {
            delay = self.max_delay;
        }

        // Apply jitter
        if self.jitter > 0.0 {
            let jitter_ms = (delay.as_millis() as f64 * self.jitter) as u64;
            let random_offset = rand::random::<f64>() * jitter_ms as f64;
            delay = Duration::from_millis(delay.as_millis() as u64 + random_offset as u64);
        }

        delay.min(self.max_delay)
    }

    /// Check if another attempt is allowed after `attempt` failures
    pub fn should_retry(&self, attempt: u32) -> bool {
        self.enabled && attempt < self.max_attempts
    }
}

/// Duration (de)serialization as integer milliseconds
pub mod duration_serde {
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

    pub mod option {
        use serde::{Deserialize, Deserializer, Serializer};
        use std::time::Duration;

        pub fn serialize<S>(duration: &Option<Duration>, serializer: S) -> Result<S::Ok, S::Error>
        where
            S: Serializer,
        {
            match duration {
                Some(d) => serializer.serialize_some(&(d.as_millis() as u64)),
                None => serializer.serialize_none(),
            }
        }

        pub fn deserialize<'de, D>(deserializer: D) -> Result<Option<Duration>, D::Error>
        where
            D: Deserializer<'de>,
        {
            Ok(Option::<u64>::deserialize(deserializer)?.map(Duration::from_millis))
        }
    }
}
