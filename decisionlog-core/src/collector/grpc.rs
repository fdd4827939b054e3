use async_trait::async_trait;
use decisionlog_pb::clients::collector::collector_client::CollectorClient as CollectorGrpcClient;
use futures::StreamExt;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tonic::transport::Endpoint;
use tracing::info;

use crate::collector::{CollectorStream, Connector};
use crate::config::CollectorConfig;
use crate::error::{Error, Result};

/// Opens `collector.v1.Collector/WriteBatch` streams over gRPC.
#[derive(Debug, Clone)]
pub struct GrpcConnector {
    endpoint: Endpoint,
    buffer: usize,
}

impl GrpcConnector {
    /// `buffer` bounds the number of batches queued for writing on one stream.
    pub fn new(config: &CollectorConfig, buffer: usize) -> Result<Self> {
        config.validate()?;
        let endpoint = Endpoint::from_shared(config.address.clone())
            .map_err(|e| Error::Config(format!("invalid collector address {}: {e}", config.address)))?
            .connect_timeout(config.connect_timeout());
        Ok(Self {
            endpoint,
            buffer: buffer.max(1),
        })
    }
}

#[async_trait]
impl Connector for GrpcConnector {
    async fn connect(&self) -> Result<CollectorStream> {
        let channel = self
            .endpoint
            .connect()
            .await
            .map_err(|e| Error::Connection(format!("failed to dial collector: {e}")))?;
        let mut client = CollectorGrpcClient::new(channel);

        let (requests_tx, requests_rx) = mpsc::channel(self.buffer);
        let responses = client
            .write_batch(ReceiverStream::new(requests_rx))
            .await
            .map_err(|e| Error::Connection(format!("failed to open batch stream: {e}")))?
            .into_inner();

        info!(uri = %self.endpoint.uri(), "Opened collector stream");
        Ok(CollectorStream {
            requests: requests_tx,
            responses: responses.map(|r| r.map_err(Error::from)).boxed(),
        })
    }
}
