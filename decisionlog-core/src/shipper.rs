//! Batching shipper.
//!
//! A single actor owns the batch being built and its flush deadline, so the hot path needs no
//! locks. It waits on four events: a message from the queue, the flush deadline, shutdown, and
//! outcome notifications from the tasks awaiting acknowledgments of earlier batches. Those tasks
//! ack or nak the queue messages of their batch and report back, so only the actor ever touches
//! the cached collector client.

use std::sync::Arc;
use std::time::Duration;

use backoff::strategy::stepped::Stepped;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

use crate::collector::Connector;
use crate::config::{CollectorConfig, ShipperConfig};
use crate::error::{Error, Result};
use crate::message::{Envelope, QueueMessage};
use crate::queue::{DurableQueue, Subscription};

mod client_cache;
use client_cache::ClientCache;

/// Outcome of an in-flight batch, reported back to the actor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum BatchOutcome {
    Acked { generation: u64 },
    Failed { generation: u64 },
}

/// Handle to a running shipper.
pub struct Shipper {
    queue: Arc<dyn DurableQueue>,
    subscription: Subscription,
    actor: JoinHandle<()>,
    cancel: CancellationToken,
    delete_stream_on_done: bool,
}

impl Shipper {
    /// Validates the configuration, subscribes to `queue` and starts shipping to the collector
    /// reached through `connector`.
    pub async fn start(
        queue: Arc<dyn DurableQueue>,
        connector: Arc<dyn Connector>,
        config: ShipperConfig,
        collector: CollectorConfig,
        cancel: CancellationToken,
    ) -> Result<Self> {
        config.validate()?;
        collector.validate()?;

        let (subscription, messages) = queue
            .subscribe(config.channel_capacity(), cancel.clone())
            .await?;

        let clients = ClientCache::new(
            connector,
            Stepped::from_secs(&config.backoff_seconds),
            config.max_inflight_batches,
            collector.ack_wait(),
            cancel.clone(),
        );
        let (outcomes_tx, outcomes_rx) = mpsc::channel(config.max_inflight_batches);

        let actor = ShipperActor {
            messages,
            outcomes_tx,
            outcomes_rx,
            batch: Vec::new(),
            deadline: None,
            clients,
            max_batch_size: config.max_batch_size,
            publish_timeout: config.publish_timeout(),
            cancel: cancel.clone(),
        };
        let actor = tokio::spawn(actor.run());

        info!(
            max_batch_size = config.max_batch_size,
            max_inflight_batches = config.max_inflight_batches,
            publish_timeout_seconds = config.publish_timeout_seconds,
            "Shipper running"
        );
        Ok(Self {
            queue,
            subscription,
            actor,
            cancel,
            delete_stream_on_done: config.delete_stream_on_done,
        })
    }

    /// Stops intake and flushing. A partially built batch is abandoned; its messages are
    /// redelivered by the queue. Batches already sent still resolve by ack or timeout.
    pub async fn shutdown(self) -> Result<()> {
        self.cancel.cancel();
        self.subscription.unsubscribe().await;
        if self.delete_stream_on_done {
            self.queue.delete().await?;
        }
        self.actor
            .await
            .map_err(|e| Error::Queue(format!("shipper task failed: {e}")))?;
        info!("Shipper stopped");
        Ok(())
    }
}

struct ShipperActor {
    messages: mpsc::Receiver<QueueMessage>,
    outcomes_tx: mpsc::Sender<BatchOutcome>,
    outcomes_rx: mpsc::Receiver<BatchOutcome>,
    batch: Vec<QueueMessage>,
    deadline: Option<Instant>,
    clients: ClientCache,
    max_batch_size: usize,
    publish_timeout: Duration,
    cancel: CancellationToken,
}

impl ShipperActor {
    async fn run(mut self) {
        loop {
            let deadline = self.deadline.unwrap_or_else(Instant::now);
            tokio::select! {
                biased;
                _ = self.cancel.cancelled() => {
                    info!(abandoned = self.batch.len(), "Shipper cancelled");
                    break;
                }
                Some(outcome) = self.outcomes_rx.recv() => self.on_outcome(outcome),
                _ = tokio::time::sleep_until(deadline), if self.deadline.is_some() => {
                    trace!(batch_size = self.batch.len(), "Flush deadline reached");
                    self.flush().await;
                }
                message = self.messages.recv() => match message {
                    Some(message) => self.push(message).await,
                    None => {
                        warn!("Queue subscription closed, stopping shipper");
                        break;
                    }
                },
            }
        }
    }

    async fn push(&mut self, message: QueueMessage) {
        if self.batch.is_empty() {
            self.deadline = Some(Instant::now() + self.publish_timeout);
        }
        self.batch.push(message);
        if self.batch.len() >= self.max_batch_size {
            self.flush().await;
        }
    }

    fn on_outcome(&mut self, outcome: BatchOutcome) {
        match outcome {
            BatchOutcome::Acked { generation } => self.clients.succeeded(generation),
            BatchOutcome::Failed { generation } => self.clients.invalidate(generation),
        }
    }

    async fn flush(&mut self) {
        self.deadline = None;
        let pending = std::mem::take(&mut self.batch);

        let mut records = Vec::with_capacity(pending.len());
        let mut handles = Vec::with_capacity(pending.len());
        for message in pending {
            match Envelope::decode(&message.payload) {
                Ok(envelope) => {
                    records.push(envelope.into_any());
                    handles.push(message);
                }
                Err(e) => {
                    warn!(?e, id = message.id, delivered = message.delivered, "Failed to decode decision log, nacking");
                    message.nak();
                }
            }
        }

        // nothing decodable, nothing to send
        if records.is_empty() {
            debug!("Skipping flush without decodable records");
            return;
        }

        let Some((client, generation)) = self.clients.get().await else {
            let retry_after = self.clients.retry_after();
            debug!(batch_size = handles.len(), ?retry_after, "Collector unavailable, nacking batch");
            for message in handles {
                message.nak_after(retry_after);
            }
            return;
        };

        let batch_size = records.len();
        let (respond_to, outcome) = oneshot::channel();
        match client.send(records, respond_to).await {
            Ok(()) => {
                tokio::spawn(dispose(
                    handles,
                    outcome,
                    generation,
                    self.outcomes_tx.clone(),
                ));
            }
            Err(e) => {
                warn!(?e, batch_size, generation, "Failed to send batch, nacking and reconnecting");
                for message in handles {
                    message.nak();
                }
                self.clients.invalidate(generation);
            }
        }
    }
}

// Waits for the acknowledgment of one batch and settles its queue messages accordingly.
async fn dispose(
    handles: Vec<QueueMessage>,
    outcome: oneshot::Receiver<Result<()>>,
    generation: u64,
    outcomes: mpsc::Sender<BatchOutcome>,
) {
    let outcome = outcome.await.unwrap_or_else(|_| {
        Err(Error::Send(
            "batch was dropped before it was acknowledged".to_string(),
        ))
    });

    let batch_size = handles.len();
    let report = match &outcome {
        Ok(()) => BatchOutcome::Acked { generation },
        Err(_) => BatchOutcome::Failed { generation },
    };

    // report before settling, so redelivered messages find the failed client already invalidated
    if outcomes.send(report).await.is_err() {
        debug!(generation, "Shipper stopped before the batch outcome was reported");
    }

    match outcome {
        Ok(()) => {
            for message in handles {
                message.ack();
            }
            trace!(batch_size, generation, "Batch acknowledged");
        }
        Err(e) => {
            warn!(?e, batch_size, generation, "Batch failed, nacking and reconnecting");
            for message in handles {
                message.nak();
            }
        }
    }
}
