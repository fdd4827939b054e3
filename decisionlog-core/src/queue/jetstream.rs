use std::time::Duration;

use async_nats::jetstream::consumer::{AckPolicy, pull};
use async_nats::jetstream::stream::{self, DiscardPolicy, RetentionPolicy, StorageType};
use async_nats::jetstream::{self, AckKind, Context, Message as JetstreamMessage};
use async_nats::ConnectOptions;
use async_trait::async_trait;
use bytes::Bytes;
use futures::StreamExt;
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::config::QueueConfig;
use crate::error::{Error, Result};
use crate::message::{QueueMessage, ReadAck};
use crate::queue::{DurableQueue, Subscription};

/// Durable queue on a JetStream work-queue stream with a durable pull consumer.
#[derive(Clone)]
pub struct JetStreamQueue {
    context: Context,
    config: QueueConfig,
}

impl JetStreamQueue {
    /// Connects to NATS and makes sure the stream exists.
    pub async fn connect(config: QueueConfig) -> Result<Self> {
        config.validate()?;
        let context = create_js_context(&config).await?;
        Self::new(context, config).await
    }

    pub async fn new(context: Context, config: QueueConfig) -> Result<Self> {
        context
            .get_or_create_stream(stream::Config {
                name: config.stream.clone(),
                subjects: vec![config.subject.clone()],
                retention: RetentionPolicy::WorkQueue,
                storage: StorageType::File,
                max_bytes: config.max_bytes,
                discard: DiscardPolicy::New,
                ..Default::default()
            })
            .await
            .map_err(|e| Error::Queue(format!("failed to create stream {}: {e}", config.stream)))?;

        info!(stream = %config.stream, subject = %config.subject, "JetStream queue ready");
        Ok(Self { context, config })
    }
}

async fn create_js_context(config: &QueueConfig) -> Result<Context> {
    let mut opts = ConnectOptions::new()
        .max_reconnects(None) // unlimited reconnects
        .ping_interval(Duration::from_secs(3))
        .retry_on_initial_connect();

    if let (Some(user), Some(password)) = (config.user.clone(), config.password.clone()) {
        opts = opts.user_and_password(user, password);
    }

    let client = async_nats::connect_with_options(&config.url, opts)
        .await
        .map_err(|e| Error::Connection(e.to_string()))?;

    Ok(jetstream::new(client))
}

#[async_trait]
impl DurableQueue for JetStreamQueue {
    async fn publish(&self, payload: Bytes) -> Result<()> {
        self.context
            .publish(self.config.subject.clone(), payload)
            .await
            .map_err(|e| Error::Queue(format!("failed to publish: {e}")))?
            .await
            .map_err(|e| Error::Queue(format!("publish was not acknowledged: {e}")))?;
        Ok(())
    }

    async fn subscribe(
        &self,
        capacity: usize,
        cancel: CancellationToken,
    ) -> Result<(Subscription, mpsc::Receiver<QueueMessage>)> {
        let max_ack_pending = i64::try_from(capacity)
            .map_err(|_| Error::Queue(format!("subscription capacity {capacity} is too large")))?;
        if max_ack_pending < 1 {
            return Err(Error::Queue(
                "subscription capacity must be at least 1".to_string(),
            ));
        }

        let stream = self
            .context
            .get_stream(&self.config.stream)
            .await
            .map_err(|e| Error::Queue(format!("failed to get stream: {e}")))?;

        let consumer = stream
            .get_or_create_consumer(
                &self.config.consumer,
                pull::Config {
                    durable_name: Some(self.config.consumer.clone()),
                    ack_policy: AckPolicy::Explicit,
                    ack_wait: self.config.ack_wait(),
                    max_ack_pending,
                    max_deliver: -1,
                    ..Default::default()
                },
            )
            .await
            .map_err(|e| Error::Queue(format!("failed to create consumer: {e}")))?;

        let messages = consumer
            .messages()
            .await
            .map_err(|e| Error::Queue(format!("failed to start consuming: {e}")))?;

        let token = cancel.child_token();
        let (messages_tx, messages_rx) = mpsc::channel(capacity);
        let handle = tokio::spawn(deliver(messages, messages_tx, token.clone()));

        Ok((Subscription::new(token, handle), messages_rx))
    }

    async fn delete(&self) -> Result<()> {
        self.context
            .delete_stream(&self.config.stream)
            .await
            .map_err(|e| Error::Queue(format!("failed to delete stream: {e}")))?;
        info!(stream = %self.config.stream, "Deleted JetStream stream");
        Ok(())
    }
}

// Forwards consumer messages into the subscription channel until the token is cancelled or the
// receiving side goes away. Messages left in the channel nak themselves when dropped.
async fn deliver(
    mut messages: pull::Stream,
    messages_tx: mpsc::Sender<QueueMessage>,
    token: CancellationToken,
) {
    loop {
        let next = tokio::select! {
            _ = token.cancelled() => {
                info!("Subscription cancelled, stopping JetStream delivery");
                return;
            }
            next = messages.next() => next,
        };

        let jetstream_message = match next {
            Some(Ok(message)) => message,
            Some(Err(e)) => {
                error!(?e, "Failed to fetch message from JetStream");
                continue;
            }
            None => {
                warn!("JetStream consumer stream ended");
                return;
            }
        };

        let (id, delivered) = match jetstream_message.info() {
            Ok(info) => (info.stream_sequence, u64::try_from(info.delivered).unwrap_or(1)),
            Err(e) => {
                error!(?e, "JetStream message has no metadata, skipping");
                continue;
            }
        };

        let (ack_tx, ack_rx) = oneshot::channel();
        let message = QueueMessage::new(
            id,
            jetstream_message.payload.clone(),
            delivered,
            ack_tx,
        );
        tokio::spawn(await_disposition(jetstream_message, ack_rx));

        tokio::select! {
            _ = token.cancelled() => return,
            sent = messages_tx.send(message) => {
                if sent.is_err() {
                    return;
                }
            }
        }
    }
}

// If the sender end of `ack_rx` was dropped before a disposition was sent, the message is naked.
async fn await_disposition(message: JetstreamMessage, ack_rx: oneshot::Receiver<ReadAck>) {
    let ack = ack_rx.await.unwrap_or_else(|e| {
        error!(?e, "Received error while waiting for ack oneshot channel");
        ReadAck::Nak(None)
    });

    match ack {
        ReadAck::Ack => {
            if let Err(e) = message.ack().await {
                warn!(?e, "Failed to send Ack to JetStream for message");
            }
        }
        ReadAck::Nak(delay) => {
            if let Err(e) = message.ack_with(AckKind::Nak(delay)).await {
                warn!(?e, "Failed to send Nak to JetStream for message");
            }
        }
    }
}
