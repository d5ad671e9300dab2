//! Error types for the messaging layer

use thiserror::Error;

pub type Result<T> = std::result::Result<T, MessagingError>;

#[derive(Error, Debug)]
pub enum MessagingError {
    /// `start_waiting` called twice with the same request id.
    #[error("aggregation already waiting on request {0}")]
    DuplicateId(String),

    /// Response delivered for an id nobody is waiting on.
    #[error("no aggregation waiting on request {0}")]
    UnknownId(String),

    /// Response delivered after the expected count was reached.
    #[error("aggregation storage for request {0} is full")]
    Full(String),

    #[error("no data in download response")]
    EmptyDownload,

    #[error("downloaded bytes do not match the requested cid")]
    HashMismatch,

    #[error(transparent)]
    Protocol(#[from] vigilmesh_protocol::ProtocolError),

    #[error(transparent)]
    Crypto(#[from] vigilmesh_crypto::CryptoError),

    #[error(transparent)]
    Net(#[from] vigilmesh_net::NetError),

    #[error(transparent)]
    Book(#[from] vigilmesh_books::BookError),

    #[error(transparent)]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("{0}")]
    Other(String),
}
