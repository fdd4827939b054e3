use std::time::Duration;

use serde::Deserialize;

use crate::error::{Error, Result};

const DEFAULT_ADDRESS: &str = "http://localhost:8383";
const DEFAULT_ACK_WAIT_SECONDS: u64 = 10;
const DEFAULT_CONNECT_TIMEOUT_SECONDS: u64 = 5;

/// Connection settings for the remote collector.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct CollectorConfig {
    pub address: String,
    /// How long a sent batch may wait for its acknowledgment before it counts as failed.
    pub ack_wait_seconds: u64,
    pub connect_timeout_seconds: u64,
}

impl Default for CollectorConfig {
    fn default() -> Self {
        Self {
            address: DEFAULT_ADDRESS.to_string(),
            ack_wait_seconds: DEFAULT_ACK_WAIT_SECONDS,
            connect_timeout_seconds: DEFAULT_CONNECT_TIMEOUT_SECONDS,
        }
    }
}

impl CollectorConfig {
    pub fn validate(&self) -> Result<()> {
        if self.address.is_empty() {
            return Err(Error::Config("collector address is empty".to_string()));
        }
        if self.ack_wait_seconds < 1 {
            return Err(Error::Config(
                "ack_wait_seconds must be at least 1".to_string(),
            ));
        }
        if self.connect_timeout_seconds < 1 {
            return Err(Error::Config(
                "connect_timeout_seconds must be at least 1".to_string(),
            ));
        }
        Ok(())
    }

    pub fn ack_wait(&self) -> Duration {
        Duration::from_secs(self.ack_wait_seconds)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_seconds)
    }
}
