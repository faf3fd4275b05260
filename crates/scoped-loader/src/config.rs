//! Loader tuning.

use std::time::Duration;

use serde::{Deserialize, Serialize};

const DEFAULT_MAX_BATCH_SIZE: usize = 100;
const DEFAULT_DELAY_MS: u64 = 1;

/// Batching parameters shared by every loader of a registry.
///
/// Deserializes from e.g. `{"max_batch_size": 50, "delay_ms": 2}`; missing
/// fields take their defaults.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct LoaderConfig {
    /// Maximum number of unique keys handed to one batch function call.
    ///
    /// A queue that reaches this size is dispatched without waiting for the
    /// window to close. Larger queues are split into consecutive batches.
    #[serde(default = "default_max_batch_size")]
    pub max_batch_size: usize,

    /// How long the dispatch window stays open after the first key arrives.
    ///
    /// `Duration::ZERO` dispatches after a single scheduler yield.
    #[serde(default = "default_delay", rename = "delay_ms", with = "millis")]
    pub delay: Duration,
}

impl Default for LoaderConfig {
    fn default() -> Self {
        Self {
            max_batch_size: DEFAULT_MAX_BATCH_SIZE,
            delay: default_delay(),
        }
    }
}

impl LoaderConfig {
    /// Sets the batch capacity. Zero is treated as one.
    pub fn with_max_batch_size(mut self, max_batch_size: usize) -> Self {
        self.max_batch_size = max_batch_size;
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    /// The capacity actually used by the dispatch loop.
    pub(crate) fn batch_capacity(&self) -> usize {
        self.max_batch_size.max(1)
    }
}

fn default_max_batch_size() -> usize {
    DEFAULT_MAX_BATCH_SIZE
}

fn default_delay() -> Duration {
    Duration::from_millis(DEFAULT_DELAY_MS)
}

mod millis {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(delay: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(delay.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_defaults() {
        let config = LoaderConfig::default();
        assert_eq!(config.max_batch_size, 100);
        assert_eq!(config.delay, Duration::from_millis(1));
    }

    #[test]
    fn test_deserialize_partial() {
        let config: LoaderConfig = serde_json::from_str(r#"{"max_batch_size": 25}"#).unwrap();
        assert_eq!(config, LoaderConfig::default().with_max_batch_size(25));

        let config: LoaderConfig = serde_json::from_str(r#"{"delay_ms": 0}"#).unwrap();
        assert_eq!(config.delay, Duration::ZERO);
        assert_eq!(config.max_batch_size, 100);
    }

    #[test]
    fn test_serialize_uses_millis() {
        let config = LoaderConfig::default().with_delay(Duration::from_millis(16));
        let json = serde_json::to_value(&config).unwrap();
        assert_eq!(json, serde_json::json!({"max_batch_size": 100, "delay_ms": 16}));
    }

    #[test]
    fn test_zero_capacity_is_clamped() {
        let config = LoaderConfig::default().with_max_batch_size(0);
        assert_eq!(config.batch_capacity(), 1);
    }
}
