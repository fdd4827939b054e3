use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::error;

use crate::error::Result;
use crate::message::QueueMessage;

/// JetStream backed durable queue.
pub mod jetstream;
pub use jetstream::JetStreamQueue;

/// In-process durable queue with redelivery, for tests and embedding.
pub mod memory;
pub use memory::InMemoryQueue;

/// At-least-once queue with manual acknowledgments. Messages that are naked, or dropped without
/// a disposition, are delivered again.
#[async_trait]
pub trait DurableQueue: Send + Sync + 'static {
    /// Stores a payload. Returns once the queue has accepted it.
    async fn publish(&self, payload: Bytes) -> Result<()>;

    /// Starts delivering messages into a bounded channel of `capacity`. At most `capacity`
    /// messages are outstanding (delivered but not yet acked or naked) at any time.
    async fn subscribe(
        &self,
        capacity: usize,
        cancel: CancellationToken,
    ) -> Result<(Subscription, mpsc::Receiver<QueueMessage>)>;

    /// Deletes the backing resource and everything stored in it.
    async fn delete(&self) -> Result<()>;
}

/// Handle to the background task feeding a subscription channel. Unsubscribing stops the task and
/// closes the sending end of the channel.
pub struct Subscription {
    token: CancellationToken,
    handle: JoinHandle<()>,
}

impl Subscription {
    pub(crate) fn new(token: CancellationToken, handle: JoinHandle<()>) -> Self {
        Self { token, handle }
    }

    pub async fn unsubscribe(self) {
        self.token.cancel();
        if let Err(e) = self.handle.await {
            error!(?e, "Subscription task failed");
        }
    }
}
