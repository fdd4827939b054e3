//! Ships authorization decision records from a local durable queue to a remote collector.
//!
//! Records are published to the queue through the [DecisionLogger] façade. A single
//! [shipper::Shipper] actor drains the queue, groups records into size- or time-bounded
//! batches and forwards each batch over one long-lived stream managed by the
//! [collector::CollectorClient]. Acknowledgments arrive asynchronously and are turned back into
//! queue acks and naks, so delivery is at-least-once.

/// Errors shared by every component of the pipeline.
pub mod error;
pub use error::{Error, Result};

/// Configuration for the shipper, the collector connection and the durable queue.
pub mod config;

/// Messages read from the durable queue and the envelopes they carry.
pub mod message;

/// Durable queue abstraction with JetStream and in-memory backends.
pub mod queue;

/// Ack-correlated streaming client for the remote collector.
pub mod collector;

/// Batching shipper that drives the collector client from the durable queue.
pub mod shipper;

/// Façade for publishing decision records.
pub mod logger;
pub use logger::DecisionLogger;
