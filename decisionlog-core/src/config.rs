use std::collections::HashMap;

use base64::Engine;
use base64::prelude::BASE64_STANDARD;
use serde::Deserialize;

use crate::error::{Error, Result};

pub mod collector;
pub mod queue;
pub mod shipper;

pub use collector::CollectorConfig;
pub use queue::QueueConfig;
pub use shipper::ShipperConfig;

const ENV_DECISIONLOG_CONFIG: &str = "DECISIONLOG_CONFIG";
const ENV_DECISIONLOG_JETSTREAM_URL: &str = "DECISIONLOG_JETSTREAM_URL";
const ENV_DECISIONLOG_JETSTREAM_USER: &str = "DECISIONLOG_JETSTREAM_USER";
const ENV_DECISIONLOG_JETSTREAM_PASSWORD: &str = "DECISIONLOG_JETSTREAM_PASSWORD";
const ENV_DECISIONLOG_COLLECTOR_ADDRESS: &str = "DECISIONLOG_COLLECTOR_ADDRESS";

/// Complete configuration of a decision logger.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub shipper: ShipperConfig,
    pub collector: CollectorConfig,
    pub queue: QueueConfig,
}

impl Settings {
    /// Loads the settings from the environment. `DECISIONLOG_CONFIG` holds the base64 encoded
    /// JSON document; the connection variables override the corresponding fields of it.
    pub fn load(
        env_vars: impl IntoIterator<Item = (impl Into<String>, impl Into<String>)>,
    ) -> Result<Self> {
        let env_vars: HashMap<String, String> = env_vars
            .into_iter()
            .map(|(key, val)| (key.into(), val.into()))
            .filter(|(key, _val)| {
                [
                    ENV_DECISIONLOG_CONFIG,
                    ENV_DECISIONLOG_JETSTREAM_URL,
                    ENV_DECISIONLOG_JETSTREAM_USER,
                    ENV_DECISIONLOG_JETSTREAM_PASSWORD,
                    ENV_DECISIONLOG_COLLECTOR_ADDRESS,
                ]
                .contains(&key.as_str())
            })
            .collect();

        let mut settings = match env_vars.get(ENV_DECISIONLOG_CONFIG) {
            Some(encoded) => {
                let decoded = BASE64_STANDARD.decode(encoded).map_err(|e| {
                    Error::Config(format!("{ENV_DECISIONLOG_CONFIG} is not valid base64: {e}"))
                })?;
                serde_json::from_slice::<Settings>(&decoded).map_err(|e| {
                    Error::Config(format!("{ENV_DECISIONLOG_CONFIG} is not valid JSON: {e}"))
                })?
            }
            None => Settings::default(),
        };

        if let Some(url) = env_vars.get(ENV_DECISIONLOG_JETSTREAM_URL) {
            settings.queue.url = url.clone();
        }
        if let Some(user) = env_vars.get(ENV_DECISIONLOG_JETSTREAM_USER) {
            settings.queue.user = Some(user.clone());
        }
        if let Some(password) = env_vars.get(ENV_DECISIONLOG_JETSTREAM_PASSWORD) {
            settings.queue.password = Some(password.clone());
        }
        if let Some(address) = env_vars.get(ENV_DECISIONLOG_COLLECTOR_ADDRESS) {
            settings.collector.address = address.clone();
        }

        settings.validate()?;
        Ok(settings)
    }

    pub fn validate(&self) -> Result<()> {
        self.shipper.validate()?;
        self.collector.validate()?;
        self.queue.validate()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn encoded(json: &str) -> String {
        BASE64_STANDARD.encode(json)
    }

    #[test]
    fn test_load_defaults_without_env() {
        let settings = Settings::load(Vec::<(String, String)>::new()).unwrap();
        assert_eq!(settings, Settings::default());
        assert_eq!(settings.shipper.max_batch_size, 512);
        assert_eq!(settings.shipper.max_inflight_batches, 20);
        assert_eq!(settings.shipper.backoff_seconds, vec![5, 10, 30, 60, 120, 300]);
        assert_eq!(settings.collector.ack_wait_seconds, 10);
        assert_eq!(settings.queue.ack_wait_seconds, 60);
        assert_eq!(settings.queue.max_bytes, 100 * 1024 * 1024);
        assert_eq!(settings.queue.consumer, "decision-queue");
    }

    #[test]
    fn test_load_partial_document_keeps_defaults() {
        let env = [(
            ENV_DECISIONLOG_CONFIG,
            encoded(r#"{"shipper": {"max_batch_size": 500}, "collector": {"ack_wait_seconds": 3}}"#),
        )];
        let settings = Settings::load(env).unwrap();
        assert_eq!(settings.shipper.max_batch_size, 500);
        assert_eq!(settings.shipper.publish_timeout_seconds, 10);
        assert_eq!(settings.collector.ack_wait_seconds, 3);
        assert_eq!(settings.collector.address, "http://localhost:8383");
    }

    #[test]
    fn test_load_overrides() {
        let env = [
            (ENV_DECISIONLOG_JETSTREAM_URL, "nats://isbsvc:4222".to_string()),
            (ENV_DECISIONLOG_JETSTREAM_USER, "user".to_string()),
            (ENV_DECISIONLOG_JETSTREAM_PASSWORD, "pass".to_string()),
            (ENV_DECISIONLOG_COLLECTOR_ADDRESS, "http://collector:9000".to_string()),
            ("UNRELATED", "ignored".to_string()),
        ];
        let settings = Settings::load(env).unwrap();
        assert_eq!(settings.queue.url, "nats://isbsvc:4222");
        assert_eq!(settings.queue.user.as_deref(), Some("user"));
        assert_eq!(settings.queue.password.as_deref(), Some("pass"));
        assert_eq!(settings.collector.address, "http://collector:9000");
    }

    #[test]
    fn test_explicit_zero_is_rejected() {
        for doc in [
            r#"{"shipper": {"max_batch_size": 0}}"#,
            r#"{"shipper": {"publish_timeout_seconds": 0}}"#,
            r#"{"shipper": {"max_inflight_batches": 0}}"#,
            r#"{"collector": {"ack_wait_seconds": 0}}"#,
            r#"{"queue": {"ack_wait_seconds": 0}}"#,
        ] {
            let result = Settings::load([(ENV_DECISIONLOG_CONFIG, encoded(doc))]);
            assert!(
                matches!(result, Err(Error::Config(_))),
                "expected config error for {doc}"
            );
        }
    }

    #[test]
    fn test_malformed_document() {
        let result = Settings::load([(ENV_DECISIONLOG_CONFIG, "not base64!")]);
        assert!(matches!(result, Err(Error::Config(_))));

        let result = Settings::load([(ENV_DECISIONLOG_CONFIG, encoded("{not json"))]);
        assert!(matches!(result, Err(Error::Config(_))));
    }

    #[test]
    fn test_channel_capacity() {
        let config = ShipperConfig {
            max_batch_size: 500,
            max_inflight_batches: 4,
            ..Default::default()
        };
        assert_eq!(config.channel_capacity(), 2000);
    }

    #[test]
    fn test_oversized_channel_capacity() {
        let overflowing = ShipperConfig {
            max_batch_size: usize::MAX,
            max_inflight_batches: 2,
            ..Default::default()
        };
        assert!(matches!(overflowing.validate(), Err(Error::Config(_))));

        let above_permits = ShipperConfig {
            max_batch_size: 1 << 62,
            max_inflight_batches: 1,
            ..Default::default()
        };
        assert!(matches!(above_permits.validate(), Err(Error::Config(_))));

        let largest = ShipperConfig {
            max_batch_size: tokio::sync::Semaphore::MAX_PERMITS,
            max_inflight_batches: 1,
            ..Default::default()
        };
        assert!(largest.validate().is_ok());
    }
}
