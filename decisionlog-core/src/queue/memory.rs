use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;
use tokio::sync::{Notify, OwnedSemaphorePermit, Semaphore, mpsc, oneshot};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::error::{Error, Result};
use crate::message::{QueueMessage, ReadAck};
use crate::queue::{DurableQueue, Subscription};

/// Durable queue kept in process memory. Mirrors the JetStream work-queue semantics the shipper
/// relies on: explicit acks, immediate or delayed redelivery on nak, and redelivery of messages
/// whose handle was dropped.
#[derive(Debug, Clone, Default)]
pub struct InMemoryQueue {
    inner: Arc<Inner>,
}

#[derive(Debug, Default)]
struct Inner {
    state: Mutex<State>,
    notify: Notify,
}

#[derive(Debug, Default)]
struct State {
    next_id: u64,
    ready: VecDeque<Stored>,
    published: u64,
    acked: u64,
    naked: u64,
    deleted: bool,
}

#[derive(Debug, Clone)]
struct Stored {
    id: u64,
    payload: Bytes,
    delivered: u64,
}

impl InMemoryQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Messages waiting to be delivered.
    pub fn pending(&self) -> usize {
        self.inner.state.lock().ready.len()
    }

    pub fn published(&self) -> u64 {
        self.inner.state.lock().published
    }

    pub fn acked(&self) -> u64 {
        self.inner.state.lock().acked
    }

    pub fn naked(&self) -> u64 {
        self.inner.state.lock().naked
    }

    pub fn is_deleted(&self) -> bool {
        self.inner.state.lock().deleted
    }
}

impl Inner {
    fn requeue(&self, stored: Stored) {
        {
            let mut state = self.state.lock();
            if state.deleted {
                return;
            }
            state.naked += 1;
            state.ready.push_back(stored);
        }
        self.notify.notify_waiters();
    }

    fn pop(&self) -> Option<Stored> {
        self.state.lock().ready.pop_front()
    }

    /// Waits for the next stored message. Returns `None` once the token is cancelled.
    async fn next(&self, token: &CancellationToken) -> Option<Stored> {
        loop {
            let notified = self.notify.notified();
            tokio::pin!(notified);
            // register interest before looking, so a publish in between is not missed
            notified.as_mut().enable();
            if let Some(stored) = self.pop() {
                return Some(stored);
            }
            tokio::select! {
                _ = token.cancelled() => return None,
                _ = &mut notified => {}
            }
        }
    }
}

#[async_trait]
impl DurableQueue for InMemoryQueue {
    async fn publish(&self, payload: Bytes) -> Result<()> {
        {
            let mut state = self.inner.state.lock();
            if state.deleted {
                return Err(Error::Queue("queue has been deleted".to_string()));
            }
            state.next_id += 1;
            let id = state.next_id;
            state.published += 1;
            state.ready.push_back(Stored {
                id,
                payload,
                delivered: 0,
            });
        }
        self.inner.notify.notify_waiters();
        Ok(())
    }

    async fn subscribe(
        &self,
        capacity: usize,
        cancel: CancellationToken,
    ) -> Result<(Subscription, mpsc::Receiver<QueueMessage>)> {
        if capacity == 0 {
            return Err(Error::Queue(
                "subscription capacity must be at least 1".to_string(),
            ));
        }
        let token = cancel.child_token();
        let (messages_tx, messages_rx) = mpsc::channel(capacity);
        let outstanding = Arc::new(Semaphore::new(capacity));

        let handle = tokio::spawn(deliver(
            Arc::clone(&self.inner),
            messages_tx,
            outstanding,
            token.clone(),
        ));
        Ok((Subscription::new(token, handle), messages_rx))
    }

    async fn delete(&self) -> Result<()> {
        let mut state = self.inner.state.lock();
        state.deleted = true;
        state.ready.clear();
        Ok(())
    }
}

// Moves stored messages into the subscription channel, holding one permit of `outstanding` per
// message until its disposition arrives.
async fn deliver(
    inner: Arc<Inner>,
    messages: mpsc::Sender<QueueMessage>,
    outstanding: Arc<Semaphore>,
    token: CancellationToken,
) {
    loop {
        let permit = tokio::select! {
            _ = token.cancelled() => return,
            permit = Arc::clone(&outstanding).acquire_owned() => match permit {
                Ok(permit) => permit,
                Err(_) => return,
            },
        };

        let Some(stored) = inner.next(&token).await else {
            return;
        };

        let delivered = stored.delivered + 1;
        let (ack_tx, ack_rx) = oneshot::channel();
        let message = QueueMessage::new(stored.id, stored.payload.clone(), delivered, ack_tx);
        tokio::spawn(await_disposition(
            Arc::clone(&inner),
            Stored {
                delivered,
                ..stored
            },
            ack_rx,
            permit,
        ));

        // a message that cannot be handed over is dropped, which naks it back into the queue
        tokio::select! {
            _ = token.cancelled() => return,
            sent = messages.send(message) => {
                if sent.is_err() {
                    return;
                }
            }
        }
    }
}

async fn await_disposition(
    inner: Arc<Inner>,
    stored: Stored,
    ack_rx: oneshot::Receiver<ReadAck>,
    permit: OwnedSemaphorePermit,
) {
    let ack = ack_rx.await.unwrap_or(ReadAck::Nak(None));
    drop(permit);
    match ack {
        ReadAck::Ack => {
            inner.state.lock().acked += 1;
        }
        ReadAck::Nak(None) => inner.requeue(stored),
        ReadAck::Nak(Some(delay)) => {
            debug!(id = stored.id, ?delay, "Delaying redelivery");
            tokio::time::sleep(delay).await;
            inner.requeue(stored);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_ack_removes_message() {
        let queue = InMemoryQueue::new();
        queue.publish(Bytes::from_static(b"one")).await.unwrap();

        let cancel = CancellationToken::new();
        let (subscription, mut rx) = queue.subscribe(4, cancel.clone()).await.unwrap();
        let message = rx.recv().await.unwrap();
        assert_eq!(message.payload, Bytes::from_static(b"one"));
        assert_eq!(message.delivered, 1);
        message.ack();

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(queue.acked(), 1);
        assert_eq!(queue.pending(), 0);
        subscription.unsubscribe().await;
    }

    #[tokio::test]
    async fn test_nak_and_drop_redeliver() {
        let queue = InMemoryQueue::new();
        queue.publish(Bytes::from_static(b"one")).await.unwrap();

        let cancel = CancellationToken::new();
        let (subscription, mut rx) = queue.subscribe(4, cancel.clone()).await.unwrap();

        let first = rx.recv().await.unwrap();
        let id = first.id;
        first.nak();

        let second = rx.recv().await.unwrap();
        assert_eq!(second.id, id);
        assert_eq!(second.delivered, 2);
        drop(second);

        let third = rx.recv().await.unwrap();
        assert_eq!(third.id, id);
        assert_eq!(third.delivered, 3);
        third.ack();

        subscription.unsubscribe().await;
        assert_eq!(queue.naked(), 2);
    }

    #[tokio::test]
    async fn test_delayed_nak() {
        let queue = InMemoryQueue::new();
        queue.publish(Bytes::from_static(b"one")).await.unwrap();

        let cancel = CancellationToken::new();
        let (subscription, mut rx) = queue.subscribe(4, cancel.clone()).await.unwrap();
        rx.recv().await.unwrap().nak_after(Duration::from_millis(200));

        let early = tokio::time::timeout(Duration::from_millis(50), rx.recv()).await;
        assert!(early.is_err(), "message redelivered before its delay");

        let message = tokio::time::timeout(Duration::from_secs(2), rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(message.delivered, 2);
        message.ack();
        subscription.unsubscribe().await;
    }

    #[tokio::test]
    async fn test_outstanding_messages_are_bounded() {
        let queue = InMemoryQueue::new();
        for i in 0..10u8 {
            queue.publish(Bytes::from(vec![i])).await.unwrap();
        }

        let cancel = CancellationToken::new();
        let (subscription, mut rx) = queue.subscribe(3, cancel.clone()).await.unwrap();

        let mut held = Vec::new();
        for _ in 0..3 {
            held.push(rx.recv().await.unwrap());
        }
        let blocked = tokio::time::timeout(Duration::from_millis(100), rx.recv()).await;
        assert!(blocked.is_err(), "more than 3 messages outstanding");

        held.pop().unwrap().ack();
        let next = tokio::time::timeout(Duration::from_secs(1), rx.recv()).await;
        assert!(next.unwrap().is_some());

        subscription.unsubscribe().await;
    }

    #[tokio::test]
    async fn test_delete() {
        let queue = InMemoryQueue::new();
        queue.publish(Bytes::from_static(b"one")).await.unwrap();
        queue.delete().await.unwrap();

        assert!(queue.is_deleted());
        assert_eq!(queue.pending(), 0);
        assert!(matches!(
            queue.publish(Bytes::from_static(b"two")).await,
            Err(Error::Queue(_))
        ));
    }
}
