//! Error types for protocol operations

use thiserror::Error;

pub type Result<T> = std::result::Result<T, ProtocolError>;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum ProtocolError {
    #[error("Truncated message: needed {needed} more bytes")]
    Truncated { needed: usize },

    #[error("Trailing garbage after message: {0} bytes")]
    TrailingBytes(usize),

    #[error("Invalid peer ID")]
    InvalidPeerId,

    #[error("Invalid organisation ID")]
    InvalidOrgId,

    #[error("Invalid content ID")]
    InvalidContentId,

    #[error("Message too large: {size} bytes (max: {max})")]
    MessageTooLarge { size: usize, max: usize },

    #[error("Invalid UTF-8 in {0} field")]
    InvalidString(&'static str),

}
