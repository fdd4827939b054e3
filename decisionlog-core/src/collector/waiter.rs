use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::{OwnedSemaphorePermit, oneshot};
use tokio::task::AbortHandle;
use tracing::debug;
use uuid::Uuid;

use crate::error::{Error, Result};

/// Identifies one outstanding batch: a per-client prefix plus a monotonically increasing counter.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CorrelationId(String);

impl CorrelationId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CorrelationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A caller waiting for the acknowledgment of one batch. The permit is released when the waiter
/// is dropped, which only happens on completion.
struct Waiter {
    respond_to: oneshot::Sender<Result<()>>,
    deadline: AbortHandle,
    _permit: OwnedSemaphorePermit,
}

/// Outstanding batches keyed by correlation id. Every waiter is completed exactly once, either by
/// an acknowledgment or by its own deadline, because both go through the same remove-if-present.
#[derive(Clone)]
pub(crate) struct WaiterMap {
    waiters: Arc<Mutex<HashMap<String, Waiter>>>,
    prefix: Arc<str>,
    counter: Arc<AtomicU64>,
    ack_wait: Duration,
}

impl WaiterMap {
    pub(crate) fn new(ack_wait: Duration) -> Self {
        Self {
            waiters: Arc::new(Mutex::new(HashMap::new())),
            prefix: Uuid::new_v4().to_string().into(),
            counter: Arc::new(AtomicU64::new(0)),
            ack_wait,
        }
    }

    fn next_id(&self) -> CorrelationId {
        let n = self.counter.fetch_add(1, Ordering::Relaxed) + 1;
        CorrelationId(format!("{}:{n}", self.prefix))
    }

    /// Registers a waiter under a fresh id and arms its deadline.
    pub(crate) fn register(
        &self,
        respond_to: oneshot::Sender<Result<()>>,
        permit: OwnedSemaphorePermit,
    ) -> CorrelationId {
        let id = self.next_id();
        let mut waiters = self.waiters.lock();

        // spawned under the lock so the deadline can never observe the map without its waiter
        let deadline = tokio::spawn({
            let this = self.clone();
            let id = id.clone();
            async move {
                tokio::time::sleep(this.ack_wait).await;
                let timeout = Error::AckTimeout(format!(
                    "no acknowledgment for batch {id} within {:?}",
                    this.ack_wait
                ));
                if this.complete(id.as_str(), Err(timeout)) {
                    debug!(%id, "Batch timed out waiting for acknowledgment");
                }
            }
        })
        .abort_handle();

        waiters.insert(
            id.0.clone(),
            Waiter {
                respond_to,
                deadline,
                _permit: permit,
            },
        );
        id
    }

    /// Completes the waiter registered under `id`. Returns false if there is none, e.g. for an
    /// acknowledgment arriving after the deadline already fired.
    pub(crate) fn complete(&self, id: &str, outcome: Result<()>) -> bool {
        let Some(waiter) = self.waiters.lock().remove(id) else {
            return false;
        };
        let Waiter {
            respond_to,
            deadline,
            _permit: permit,
        } = waiter;
        deadline.abort();
        drop(permit);
        // the caller may have stopped listening, the permit is released either way
        let _ = respond_to.send(outcome);
        true
    }

    pub(crate) fn len(&self) -> usize {
        self.waiters.lock().len()
    }
}

#[cfg(test)]
mod tests {
    use tokio::sync::Semaphore;

    use super::*;

    #[tokio::test]
    async fn test_complete_is_exactly_once() {
        let permits = Arc::new(Semaphore::new(1));
        let waiters = WaiterMap::new(Duration::from_secs(10));

        let (tx, rx) = oneshot::channel();
        let permit = Arc::clone(&permits).acquire_owned().await.unwrap();
        let id = waiters.register(tx, permit);
        assert_eq!(permits.available_permits(), 0);
        assert_eq!(waiters.len(), 1);

        assert!(waiters.complete(id.as_str(), Ok(())));
        assert!(!waiters.complete(id.as_str(), Err(Error::Nak("late".to_string()))));

        assert_eq!(rx.await.unwrap(), Ok(()));
        assert_eq!(permits.available_permits(), 1);
        assert_eq!(waiters.len(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_deadline_completes_with_timeout() {
        let permits = Arc::new(Semaphore::new(1));
        let waiters = WaiterMap::new(Duration::from_secs(2));

        let (tx, rx) = oneshot::channel();
        let permit = Arc::clone(&permits).acquire_owned().await.unwrap();
        let id = waiters.register(tx, permit);

        let outcome = rx.await.unwrap();
        assert!(matches!(outcome, Err(Error::AckTimeout(_))));
        assert_eq!(permits.available_permits(), 1);
        assert!(!waiters.complete(id.as_str(), Ok(())));
    }

    #[test]
    fn test_ids_are_unique_across_maps() {
        let first = WaiterMap::new(Duration::from_secs(1));
        let second = WaiterMap::new(Duration::from_secs(1));
        let a = first.next_id();
        let b = first.next_id();
        let c = second.next_id();

        assert_ne!(a, b);
        assert_ne!(a, c);
        assert!(a.as_str().ends_with(":1"));
        assert!(b.as_str().ends_with(":2"));
        assert!(c.as_str().ends_with(":1"));
    }
}
