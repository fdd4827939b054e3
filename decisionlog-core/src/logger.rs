use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::collector::{Connector, GrpcConnector};
use crate::config::Settings;
use crate::error::Result;
use crate::message::Envelope;
use crate::queue::{DurableQueue, JetStreamQueue};
use crate::shipper::Shipper;

/// Entry point for producers of decision records. Records are only written to the durable queue
/// here; shipping them to the collector happens in the background and never fails a caller.
pub struct DecisionLogger {
    queue: Arc<dyn DurableQueue>,
    shipper: Shipper,
}

impl DecisionLogger {
    /// Connects to JetStream and the collector described by `settings` and starts shipping.
    pub async fn start(settings: Settings, cancel: CancellationToken) -> Result<Self> {
        settings.validate()?;
        let queue = JetStreamQueue::connect(settings.queue.clone()).await?;
        let connector = GrpcConnector::new(
            &settings.collector,
            settings.shipper.max_inflight_batches,
        )?;
        Self::with_queue(Arc::new(queue), Arc::new(connector), settings, cancel).await
    }

    /// Starts shipping from an existing queue through an existing connector.
    pub async fn with_queue(
        queue: Arc<dyn DurableQueue>,
        connector: Arc<dyn Connector>,
        settings: Settings,
        cancel: CancellationToken,
    ) -> Result<Self> {
        let shipper = Shipper::start(
            Arc::clone(&queue),
            connector,
            settings.shipper,
            settings.collector,
            cancel,
        )
        .await?;
        Ok(Self { queue, shipper })
    }

    /// Packs `record` into an envelope and stores it in the durable queue. This is the only
    /// failure a producer can observe.
    pub async fn log<M: prost::Name>(&self, record: &M) -> Result<()> {
        self.log_envelope(Envelope::pack(record)?).await
    }

    /// Stores an already packed record.
    pub async fn log_envelope(&self, envelope: Envelope) -> Result<()> {
        self.queue.publish(envelope.encode_to_bytes()).await
    }

    /// Stops shipping. Records still in the queue are picked up by the next logger on the same
    /// stream, unless the stream is deleted on shutdown.
    pub async fn shutdown(self) -> Result<()> {
        self.shipper.shutdown().await?;
        info!("Decision logger stopped");
        Ok(())
    }
}
