//! Ack-correlated streaming client for the remote collector.
//!
//! Many "send a batch, wait for its ack" operations share one long-lived bidirectional stream.
//! Every batch is tagged with a [CorrelationId] and parked in a waiter map together with a
//! concurrency permit and a deadline. A single receive loop per client matches incoming
//! acknowledgments to their waiters; whichever of ack or deadline comes first completes the
//! waiter, the other one finds nothing to complete.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use decisionlog_pb::clients::collector::{WriteBatchRequest, WriteBatchResponse};
use futures::StreamExt;
use futures::stream::BoxStream;
use prost_types::Any;
use tokio::sync::{Semaphore, mpsc, oneshot};
use tokio_util::sync::{CancellationToken, DropGuard};
use tracing::{debug, info, warn};

use crate::error::{Error, Result};

mod waiter;
pub use waiter::CorrelationId;
use waiter::WaiterMap;

/// gRPC transport for the collector protocol.
pub mod grpc;
pub use grpc::GrpcConnector;

/// Both halves of an open collector stream.
pub struct CollectorStream {
    /// Outbound batches. Dropping the sender half-closes the stream.
    pub requests: mpsc::Sender<WriteBatchRequest>,
    /// Inbound acknowledgments. Ends when the collector closes the stream.
    pub responses: BoxStream<'static, Result<WriteBatchResponse>>,
}

/// Opens streams to the collector. Every call yields an independent stream.
#[async_trait]
pub trait Connector: Send + Sync + 'static {
    async fn connect(&self) -> Result<CollectorStream>;
}

/// Multiplexes batch sends over one collector stream with at most `max_inflight` batches
/// awaiting acknowledgment at any time.
pub struct CollectorClient {
    requests: mpsc::Sender<WriteBatchRequest>,
    waiters: WaiterMap,
    permits: Arc<Semaphore>,
    closed: CancellationToken,
    cancel: CancellationToken,
    // stops the receive loop once the last handle to this client is gone
    _receiver: DropGuard,
}

impl CollectorClient {
    /// Opens a new stream through `connector` and starts its receive loop.
    pub async fn new(
        connector: &dyn Connector,
        max_inflight: usize,
        ack_wait: Duration,
        cancel: CancellationToken,
    ) -> Result<Self> {
        if max_inflight < 1 || max_inflight > Semaphore::MAX_PERMITS {
            return Err(Error::Config(format!(
                "max_inflight must be between 1 and {}",
                Semaphore::MAX_PERMITS
            )));
        }
        if ack_wait < Duration::from_secs(1) {
            return Err(Error::Config(
                "ack_wait must be at least one second".to_string(),
            ));
        }

        let CollectorStream {
            requests,
            responses,
        } = connector.connect().await?;

        let waiters = WaiterMap::new(ack_wait);
        let closed = CancellationToken::new();
        let receiver = CancellationToken::new();
        tokio::spawn(receive_acks(
            waiters.clone(),
            responses,
            closed.clone(),
            receiver.clone(),
        ));

        info!(max_inflight, ?ack_wait, "Collector client connected");
        Ok(Self {
            requests,
            waiters,
            permits: Arc::new(Semaphore::new(max_inflight)),
            closed,
            cancel,
            _receiver: receiver.drop_guard(),
        })
    }

    /// Sends one batch and returns without waiting for its acknowledgment. The outcome is
    /// delivered on `respond_to` exactly once: `Ok` on ack, an error on nak or timeout.
    ///
    /// Blocks while `max_inflight` batches are outstanding. If the batch cannot be written the
    /// waiter is completed with the send error, which is also returned.
    pub async fn send(
        &self,
        batch: Vec<Any>,
        respond_to: oneshot::Sender<Result<()>>,
    ) -> Result<()> {
        if self.closed.is_cancelled() {
            return Err(Error::Connection(
                "collector stream is closed".to_string(),
            ));
        }

        let permit = tokio::select! {
            _ = self.cancel.cancelled() => {
                return Err(Error::Cancelled("send was cancelled".to_string()));
            }
            _ = self.closed.cancelled() => {
                return Err(Error::Connection(
                    "collector stream closed while waiting for capacity".to_string(),
                ));
            }
            permit = Arc::clone(&self.permits).acquire_owned() => {
                permit.map_err(|e| Error::Connection(e.to_string()))?
            }
        };

        let batch_size = batch.len();
        let id = self.waiters.register(respond_to, permit);
        let request = WriteBatchRequest {
            id: id.to_string(),
            batch,
        };

        if let Err(e) = self.requests.send(request).await {
            let err = Error::Send(format!("failed to write batch {id}: {e}"));
            self.waiters.complete(id.as_str(), Err(err.clone()));
            return Err(err);
        }
        debug!(%id, batch_size, "Sent batch to collector");
        Ok(())
    }

    /// True once the receive loop has ended. A closed client never sends again.
    pub fn is_closed(&self) -> bool {
        self.closed.is_cancelled()
    }

    /// Batches awaiting an acknowledgment.
    pub fn in_flight(&self) -> usize {
        self.waiters.len()
    }
}

// Runs until the collector closes the stream, it fails, or the client is dropped. Waiters still
// pending afterwards are left to their deadlines.
async fn receive_acks(
    waiters: WaiterMap,
    mut responses: BoxStream<'static, Result<WriteBatchResponse>>,
    closed: CancellationToken,
    dropped: CancellationToken,
) {
    loop {
        let response = tokio::select! {
            _ = dropped.cancelled() => {
                debug!("Collector client dropped, releasing its stream");
                break;
            }
            response = responses.next() => match response {
                Some(Ok(response)) => response,
                Some(Err(e)) => {
                    warn!(?e, "Collector stream failed");
                    break;
                }
                None => break,
            },
        };

        let outcome = if response.ack {
            Ok(())
        } else {
            Err(Error::Nak(format!(
                "collector rejected batch {}",
                response.id
            )))
        };
        if !waiters.complete(&response.id, outcome) {
            debug!(id = %response.id, "Ignoring acknowledgment for unknown or expired batch");
        }
    }
    // releases the response stream and with it the underlying connection
    drop(responses);
    closed.cancel();
    info!(pending = waiters.len(), "Collector stream closed");
}

/// In-process collector transport for tests. The returned [CollectorPeer] is the remote end of
/// every stream the connector opens.
#[cfg(test)]
pub(crate) mod test_utils {
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    use tokio_stream::wrappers::ReceiverStream;

    use super::*;

    pub(crate) struct ChannelConnector {
        peers: mpsc::UnboundedSender<CollectorPeer>,
        connects: AtomicUsize,
        refuse: AtomicBool,
    }

    /// The collector side of one stream.
    pub(crate) struct CollectorPeer {
        pub(crate) requests: mpsc::Receiver<WriteBatchRequest>,
        pub(crate) responses: mpsc::Sender<Result<WriteBatchResponse>>,
    }

    impl CollectorPeer {
        pub(crate) async fn respond(&self, id: &str, ack: bool) {
            let _ = self
                .responses
                .send(Ok(WriteBatchResponse {
                    id: id.to_string(),
                    ack,
                }))
                .await;
        }
    }

    impl ChannelConnector {
        pub(crate) fn new() -> (Self, mpsc::UnboundedReceiver<CollectorPeer>) {
            let (peers, peers_rx) = mpsc::unbounded_channel();
            (
                Self {
                    peers,
                    connects: AtomicUsize::new(0),
                    refuse: AtomicBool::new(false),
                },
                peers_rx,
            )
        }

        pub(crate) fn connects(&self) -> usize {
            self.connects.load(Ordering::SeqCst)
        }

        pub(crate) fn refuse_connections(&self, refuse: bool) {
            self.refuse.store(refuse, Ordering::SeqCst);
        }
    }

    #[async_trait]
    impl Connector for ChannelConnector {
        async fn connect(&self) -> Result<CollectorStream> {
            self.connects.fetch_add(1, Ordering::SeqCst);
            if self.refuse.load(Ordering::SeqCst) {
                return Err(Error::Connection("connection refused".to_string()));
            }
            let (requests_tx, requests_rx) = mpsc::channel(64);
            let (responses_tx, responses_rx) = mpsc::channel(64);
            self.peers
                .send(CollectorPeer {
                    requests: requests_rx,
                    responses: responses_tx,
                })
                .map_err(|_| Error::Connection("collector is gone".to_string()))?;
            Ok(CollectorStream {
                requests: requests_tx,
                responses: ReceiverStream::new(responses_rx).boxed(),
            })
        }
    }
}
