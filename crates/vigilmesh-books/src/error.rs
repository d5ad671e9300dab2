//! Error types for the state books

use thiserror::Error;

use vigilmesh_protocol::{ContentId, OrgId};

pub type Result<T> = std::result::Result<T, BookError>;

#[derive(Error, Debug)]
pub enum BookError {
    #[error("file with cid {0} already exists")]
    FileExists(ContentId),

    #[error("no file with cid {0}")]
    UnknownFile(ContentId),

    #[error("configured signature of org {0} does not verify against our key")]
    InvalidOwnSignature(OrgId),

    #[error("unknown severity: {0}")]
    UnknownSeverity(String),

    #[error(transparent)]
    Crypto(#[from] vigilmesh_crypto::CryptoError),
}
