use std::fmt;
use std::time::Duration;

use bytes::Bytes;
use prost::Message as _;
use prost_types::Any;
use tokio::sync::oneshot;

use crate::error::{Error, Result};

/// Final disposition of a [QueueMessage], handed back to the queue backend that delivered it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ReadAck {
    /// Message was shipped and acknowledged by the collector.
    Ack,
    /// Message should be redelivered, optionally not before the given delay.
    Nak(Option<Duration>),
}

/// Sends the disposition of a message back to the queue. A handle dropped without a
/// disposition naks the message, so nothing read from the queue is ever silently lost.
struct AckHandle {
    ack_handle: Option<oneshot::Sender<ReadAck>>,
}

impl AckHandle {
    fn send(&mut self, ack: ReadAck) {
        if let Some(ack_handle) = self.ack_handle.take() {
            // the receiving side only goes away when the queue itself is gone, in which case
            // the broker redelivers on its own
            let _ = ack_handle.send(ack);
        }
    }
}

impl Drop for AckHandle {
    fn drop(&mut self) {
        self.send(ReadAck::Nak(None));
    }
}

/// A message read from the durable queue. `ack` and `nak` consume the message, so each one
/// reaches exactly one terminal disposition.
pub struct QueueMessage {
    /// Queue assigned identifier (stream sequence for JetStream).
    pub id: u64,
    pub payload: Bytes,
    /// Delivery attempt, starting at 1.
    pub delivered: u64,
    ack_handle: AckHandle,
}

impl fmt::Debug for QueueMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("QueueMessage")
            .field("id", &self.id)
            .field("payload_len", &self.payload.len())
            .field("delivered", &self.delivered)
            .finish()
    }
}

impl QueueMessage {
    pub(crate) fn new(
        id: u64,
        payload: Bytes,
        delivered: u64,
        ack_handle: oneshot::Sender<ReadAck>,
    ) -> Self {
        Self {
            id,
            payload,
            delivered,
            ack_handle: AckHandle {
                ack_handle: Some(ack_handle),
            },
        }
    }

    pub fn ack(mut self) {
        self.ack_handle.send(ReadAck::Ack);
    }

    /// Asks the queue to redeliver the message right away.
    pub fn nak(mut self) {
        self.ack_handle.send(ReadAck::Nak(None));
    }

    /// Asks the queue to redeliver the message once `delay` has passed.
    pub fn nak_after(mut self, delay: Duration) {
        self.ack_handle.send(ReadAck::Nak(Some(delay)));
    }
}

/// Self-describing record stored in the queue: a `google.protobuf.Any` carrying the type url
/// of the record next to its encoded bytes.
#[derive(Debug, Clone, PartialEq)]
pub struct Envelope(Any);

impl Envelope {
    /// Packs a record into an envelope.
    pub fn pack<M: prost::Name>(record: &M) -> Result<Self> {
        Any::from_msg(record)
            .map(Self)
            .map_err(|e| Error::Encode(format!("failed to pack {}: {e}", M::full_name())))
    }

    /// Decodes an envelope from the raw payload of a queue message. Fails on malformed bytes and
    /// on envelopes that do not say what they carry.
    pub fn decode(payload: &[u8]) -> Result<Self> {
        let any = Any::decode(payload)
            .map_err(|e| Error::Decode(format!("malformed envelope: {e}")))?;
        if any.type_url.is_empty() {
            return Err(Error::Decode("envelope has no type url".to_string()));
        }
        Ok(Self(any))
    }

    /// Unpacks the record carried by the envelope.
    pub fn unpack<M: prost::Name + Default>(&self) -> Result<M> {
        self.0
            .to_msg()
            .map_err(|e| Error::Decode(format!("failed to unpack {}: {e}", M::full_name())))
    }

    pub fn type_url(&self) -> &str {
        &self.0.type_url
    }

    pub fn encode_to_bytes(&self) -> Bytes {
        Bytes::from(self.0.encode_to_vec())
    }

    pub fn into_any(self) -> Any {
        self.0
    }
}

#[cfg(test)]
mod tests {
    use decisionlog_pb::objects::decision::Decision;

    use super::*;

    fn decision(id: &str) -> Decision {
        Decision {
            id: id.to_string(),
            identity: "user:alice".to_string(),
            policy_path: "/authz/allow".to_string(),
            outcomes: [("allowed".to_string(), true)].into_iter().collect(),
            ..Default::default()
        }
    }

    #[test]
    fn test_envelope_carries_type_url() {
        let envelope = Envelope::pack(&decision("d-1")).unwrap();
        assert_eq!(envelope.type_url(), "/decision.v1.Decision");

        let decoded = Envelope::decode(&envelope.encode_to_bytes()).unwrap();
        assert_eq!(decoded, envelope);
        assert_eq!(decoded.unpack::<Decision>().unwrap(), decision("d-1"));
    }

    #[test]
    fn test_decode_rejects_garbage() {
        let result = Envelope::decode(&[0xff, 0xff, 0xff, 0xff]);
        assert!(matches!(result, Err(Error::Decode(_))));
    }

    #[test]
    fn test_decode_rejects_untyped_envelope() {
        let untyped = Any {
            type_url: String::new(),
            value: vec![1, 2, 3],
        };
        let result = Envelope::decode(&untyped.encode_to_vec());
        assert!(matches!(result, Err(Error::Decode(_))));
    }

    #[tokio::test]
    async fn test_single_disposition() {
        let (tx, rx) = oneshot::channel();
        let message = QueueMessage::new(1, Bytes::from_static(b"x"), 1, tx);
        message.ack();
        assert_eq!(rx.await.unwrap(), ReadAck::Ack);

        let (tx, rx) = oneshot::channel();
        let message = QueueMessage::new(2, Bytes::from_static(b"x"), 1, tx);
        message.nak_after(Duration::from_secs(3));
        assert_eq!(rx.await.unwrap(), ReadAck::Nak(Some(Duration::from_secs(3))));
    }

    #[tokio::test]
    async fn test_drop_naks() {
        let (tx, rx) = oneshot::channel();
        let message = QueueMessage::new(1, Bytes::from_static(b"x"), 1, tx);
        drop(message);
        assert_eq!(rx.await.unwrap(), ReadAck::Nak(None));
    }
}
