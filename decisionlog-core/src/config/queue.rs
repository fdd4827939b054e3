use std::time::Duration;

use serde::Deserialize;

use crate::error::{Error, Result};

const DEFAULT_URL: &str = "localhost:4222";
const DEFAULT_STREAM: &str = "decision-log-stream";
const DEFAULT_SUBJECT: &str = "decision-logs";
const DEFAULT_CONSUMER: &str = "decision-queue";
const DEFAULT_MAX_BYTES: i64 = 100 * 1024 * 1024;
const DEFAULT_ACK_WAIT_SECONDS: u64 = 60;

/// JetStream settings for the durable queue.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct QueueConfig {
    /// NATS server URL.
    pub url: String,
    /// NATS server username.
    pub user: Option<String>,
    /// NATS server password.
    pub password: Option<String>,
    pub stream: String,
    pub subject: String,
    /// Durable consumer (queue group) name.
    pub consumer: String,
    /// Upper bound on stored bytes. New publishes are rejected once it is reached.
    pub max_bytes: i64,
    /// Redelivery deadline for a message that was neither acked nor naked.
    pub ack_wait_seconds: u64,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            url: DEFAULT_URL.to_string(),
            user: None,
            password: None,
            stream: DEFAULT_STREAM.to_string(),
            subject: DEFAULT_SUBJECT.to_string(),
            consumer: DEFAULT_CONSUMER.to_string(),
            max_bytes: DEFAULT_MAX_BYTES,
            ack_wait_seconds: DEFAULT_ACK_WAIT_SECONDS,
        }
    }
}

impl QueueConfig {
    pub fn validate(&self) -> Result<()> {
        for (field, value) in [
            ("url", &self.url),
            ("stream", &self.stream),
            ("subject", &self.subject),
            ("consumer", &self.consumer),
        ] {
            if value.is_empty() {
                return Err(Error::Config(format!("queue {field} is empty")));
            }
        }
        if self.max_bytes < 1 {
            return Err(Error::Config("max_bytes must be at least 1".to_string()));
        }
        if self.ack_wait_seconds < 1 {
            return Err(Error::Config(
                "queue ack_wait_seconds must be at least 1".to_string(),
            ));
        }
        Ok(())
    }

    pub fn ack_wait(&self) -> Duration {
        Duration::from_secs(self.ack_wait_seconds)
    }
}
