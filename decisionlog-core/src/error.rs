use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

/// Errors are `Clone` so a single failure can be delivered to every waiter it affects.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum Error {
    #[error("Config Error - {0}")]
    Config(String),

    #[error("Connection Error - {0}")]
    Connection(String),

    #[error("Send Error - {0}")]
    Send(String),

    #[error("Ack Timeout Error - {0}")]
    AckTimeout(String),

    #[error("Nak Error - {0}")]
    Nak(String),

    #[error("Decode Error - {0}")]
    Decode(String),

    #[error("Encode Error - {0}")]
    Encode(String),

    #[error("Queue Error - {0}")]
    Queue(String),

    #[error("gRPC Error - {0}")]
    Grpc(String),

    #[error("Cancelled Error - {0}")]
    Cancelled(String),
}

impl From<tonic::Status> for Error {
    fn from(status: tonic::Status) -> Self {
        Error::Grpc(status.to_string())
    }
}
