//! Error types for networking operations

use thiserror::Error;

use vigilmesh_protocol::PeerId;

pub type Result<T> = std::result::Result<T, NetError>;

#[derive(Error, Debug)]
pub enum NetError {
    #[error("unknown peer {0}")]
    UnknownPeer(PeerId),

    #[error("refusing to dial ourselves")]
    SelfDial,

    #[error("message too large: {size} bytes (max: {max})")]
    MessageTooLarge { size: usize, max: usize },

    #[error("stream channel closed")]
    ChannelClosed,

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("{0}")]
    Other(String),
}
