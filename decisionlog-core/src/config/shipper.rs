use std::time::Duration;

use serde::Deserialize;
use tokio::sync::Semaphore;

use crate::error::{Error, Result};

const DEFAULT_MAX_BATCH_SIZE: usize = 512;
const DEFAULT_PUBLISH_TIMEOUT_SECONDS: u64 = 10;
const DEFAULT_MAX_INFLIGHT_BATCHES: usize = 20;
const DEFAULT_BACKOFF_SECONDS: [u64; 6] = [5, 10, 30, 60, 120, 300];

/// Batching and flow-control settings for the [crate::shipper::Shipper].
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct ShipperConfig {
    /// A batch is flushed as soon as it holds this many records.
    pub max_batch_size: usize,
    /// A non-empty batch is flushed at the latest this long after its first record arrived.
    pub publish_timeout_seconds: u64,
    /// Upper bound on batches awaiting an acknowledgment from the collector.
    pub max_inflight_batches: usize,
    /// Delete the durable stream on shutdown. Only meant for ephemeral and test setups.
    pub delete_stream_on_done: bool,
    /// Cool-off schedule between reconnect attempts after the collector connection failed.
    pub backoff_seconds: Vec<u64>,
}

impl Default for ShipperConfig {
    fn default() -> Self {
        Self {
            max_batch_size: DEFAULT_MAX_BATCH_SIZE,
            publish_timeout_seconds: DEFAULT_PUBLISH_TIMEOUT_SECONDS,
            max_inflight_batches: DEFAULT_MAX_INFLIGHT_BATCHES,
            delete_stream_on_done: false,
            backoff_seconds: DEFAULT_BACKOFF_SECONDS.to_vec(),
        }
    }
}

impl ShipperConfig {
    pub fn validate(&self) -> Result<()> {
        if self.max_batch_size < 1 {
            return Err(Error::Config(
                "max_batch_size must be at least 1".to_string(),
            ));
        }
        if self.publish_timeout_seconds < 1 {
            return Err(Error::Config(
                "publish_timeout_seconds must be at least 1".to_string(),
            ));
        }
        if self.max_inflight_batches < 1 {
            return Err(Error::Config(
                "max_inflight_batches must be at least 1".to_string(),
            ));
        }
        match self.max_batch_size.checked_mul(self.max_inflight_batches) {
            Some(capacity) if capacity <= Semaphore::MAX_PERMITS => {}
            _ => {
                return Err(Error::Config(format!(
                    "max_batch_size * max_inflight_batches must not exceed {}",
                    Semaphore::MAX_PERMITS
                )));
            }
        }
        Ok(())
    }

    pub fn publish_timeout(&self) -> Duration {
        Duration::from_secs(self.publish_timeout_seconds)
    }

    /// Capacity of the delivery channel between the queue and the shipper. Together with the
    /// collector's permit pool this is what pushes back on the queue. Bounded by `validate`.
    pub fn channel_capacity(&self) -> usize {
        self.max_batch_size.saturating_mul(self.max_inflight_batches)
    }
}
