use std::sync::Arc;
use std::time::Duration;

use backoff::strategy::stepped::Stepped;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::collector::{CollectorClient, Connector};

/// Cached collector client with explicit invalidation. After a failure the cache stays open for
/// the next step of the backoff schedule before it dials again.
pub(super) struct ClientCache {
    state: State,
    connector: Arc<dyn Connector>,
    backoff: Stepped,
    generation: u64,
    max_inflight: usize,
    ack_wait: Duration,
    cancel: CancellationToken,
}

enum State {
    Empty,
    Ready {
        client: Arc<CollectorClient>,
        generation: u64,
    },
    Open {
        until: Instant,
    },
}

impl ClientCache {
    pub(super) fn new(
        connector: Arc<dyn Connector>,
        backoff: Stepped,
        max_inflight: usize,
        ack_wait: Duration,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            state: State::Empty,
            connector,
            backoff,
            generation: 0,
            max_inflight,
            ack_wait,
            cancel,
        }
    }

    /// Returns the cached client and its generation, dialing a new one if there is none or its
    /// stream is closed, and the breaker is not open.
    pub(super) async fn get(&mut self) -> Option<(Arc<CollectorClient>, u64)> {
        match &self.state {
            State::Ready { client, generation } if !client.is_closed() => {
                return Some((Arc::clone(client), *generation));
            }
            // the collector hung up, dial again without waiting for a batch to fail on it
            State::Ready { generation, .. } => {
                info!(generation, "Collector stream closed, replacing client");
            }
            State::Open { until } if Instant::now() < *until => return None,
            State::Open { .. } | State::Empty => {}
        }

        match CollectorClient::new(
            self.connector.as_ref(),
            self.max_inflight,
            self.ack_wait,
            self.cancel.clone(),
        )
        .await
        {
            Ok(client) => {
                self.generation += 1;
                let client = Arc::new(client);
                info!(generation = self.generation, "Created collector client");
                self.state = State::Ready {
                    client: Arc::clone(&client),
                    generation: self.generation,
                };
                Some((client, self.generation))
            }
            Err(e) => {
                let delay = self.open();
                warn!(?e, ?delay, "Failed to create collector client");
                None
            }
        }
    }

    /// Drops the client of `generation` and opens the breaker. Failures reported for an older
    /// generation are ignored, the client they refer to is already gone.
    pub(super) fn invalidate(&mut self, generation: u64) {
        match &self.state {
            State::Ready {
                generation: current,
                ..
            } if *current == generation => {
                let delay = self.open();
                warn!(generation, ?delay, "Invalidated collector client");
            }
            _ => {}
        }
    }

    /// A batch sent by `generation` was acknowledged.
    pub(super) fn succeeded(&mut self, generation: u64) {
        if matches!(&self.state, State::Ready { generation: current, .. } if *current == generation)
        {
            self.backoff.reset();
        }
    }

    /// Time left until the breaker closes again.
    pub(super) fn retry_after(&self) -> Duration {
        match &self.state {
            State::Open { until } => until.saturating_duration_since(Instant::now()),
            State::Empty | State::Ready { .. } => Duration::ZERO,
        }
    }

    fn open(&mut self) -> Duration {
        let delay = self.backoff.next().unwrap_or_default();
        self.state = State::Open {
            until: Instant::now() + delay,
        };
        delay
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collector::test_utils::ChannelConnector;

    fn cache(connector: Arc<ChannelConnector>, steps: &[u64]) -> ClientCache {
        ClientCache::new(
            connector,
            Stepped::from_secs(steps),
            2,
            Duration::from_secs(5),
            CancellationToken::new(),
        )
    }

    #[tokio::test(start_paused = true)]
    async fn test_cached_until_invalidated() {
        let (connector, _peers) = ChannelConnector::new();
        let connector = Arc::new(connector);
        let mut cache = cache(Arc::clone(&connector), &[1, 4]);

        let (_, first) = cache.get().await.unwrap();
        let (_, again) = cache.get().await.unwrap();
        assert_eq!(first, again);
        assert_eq!(connector.connects(), 1);

        // stale generations do not open the breaker
        cache.invalidate(first + 10);
        assert!(cache.get().await.is_some());

        cache.invalidate(first);
        assert!(cache.get().await.is_none());
        assert_eq!(cache.retry_after(), Duration::from_secs(1));
        assert_eq!(connector.connects(), 1);

        tokio::time::advance(Duration::from_secs(1)).await;
        let (_, second) = cache.get().await.unwrap();
        assert!(second > first);
        assert_eq!(connector.connects(), 2);

        // next failure waits for the next step, success resets the schedule
        cache.invalidate(second);
        assert_eq!(cache.retry_after(), Duration::from_secs(4));
        tokio::time::advance(Duration::from_secs(4)).await;
        let (_, third) = cache.get().await.unwrap();
        cache.succeeded(third);
        cache.invalidate(third);
        assert_eq!(cache.retry_after(), Duration::from_secs(1));
    }

    #[tokio::test(start_paused = true)]
    async fn test_closed_client_is_replaced_right_away() {
        let (connector, mut peers) = ChannelConnector::new();
        let connector = Arc::new(connector);
        let mut cache = cache(Arc::clone(&connector), &[30]);

        let (client, first) = cache.get().await.unwrap();
        drop(peers.recv().await.unwrap());
        while !client.is_closed() {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }

        let (_, second) = cache.get().await.unwrap();
        assert!(second > first);
        assert_eq!(connector.connects(), 2);
        assert_eq!(cache.retry_after(), Duration::ZERO);
    }

    #[tokio::test(start_paused = true)]
    async fn test_invalidated_clients_release_their_streams() {
        let (connector, mut peers) = ChannelConnector::new();
        let connector = Arc::new(connector);
        let mut cache = cache(Arc::clone(&connector), &[1]);

        for _ in 0..5 {
            let (_, generation) = cache.get().await.unwrap();
            // a collector that neither answers nor hangs up
            let peer = peers.recv().await.unwrap();
            cache.invalidate(generation);

            tokio::time::timeout(Duration::from_secs(1), peer.responses.closed())
                .await
                .expect("invalidated client must stop reading its stream");
            tokio::time::advance(Duration::from_secs(1)).await;
        }
        assert_eq!(connector.connects(), 5);
    }

    #[tokio::test(start_paused = true)]
    async fn test_dial_failure_opens_breaker() {
        let (connector, _peers) = ChannelConnector::new();
        let connector = Arc::new(connector);
        connector.refuse_connections(true);
        let mut cache = cache(Arc::clone(&connector), &[2]);

        assert!(cache.get().await.is_none());
        assert!(cache.get().await.is_none());
        assert_eq!(connector.connects(), 1);

        connector.refuse_connections(false);
        tokio::time::advance(Duration::from_secs(2)).await;
        assert!(cache.get().await.is_some());
        assert_eq!(connector.connects(), 2);
    }
}
