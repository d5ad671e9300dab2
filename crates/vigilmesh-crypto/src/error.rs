//! Error types for cryptographic operations

use thiserror::Error;

pub type Result<T> = std::result::Result<T, CryptoError>;

#[derive(Error, Debug)]
pub enum CryptoError {
    /// Signature does not verify against the claimed author.
    #[error("signature does not match")]
    BadSignature,

    /// Sender public key does not derive the claimed peer id.
    #[error("sender identity does not match its public key")]
    IdentityMismatch,

    /// Key, signature or ciphertext bytes could not be parsed.
    #[error("malformed cryptographic input: {0}")]
    Malformed(String),

    #[error("key handling failed: {0}")]
    Key(String),

    #[error("decryption failed")]
    Decryption,

    #[error(transparent)]
    Io(#[from] std::io::Error),
}
