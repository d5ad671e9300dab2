//! Vigilmesh cryptography
//!
//! Ed25519 identities for nodes and organisations, message signing and
//! authentication, organisation endorsements and sealed-box encryption
//! of intelligence answers.

pub mod error;
pub mod identity;
pub mod kit;
pub mod orgsig;
pub mod sealed;

pub use error::{CryptoError, Result};
pub use identity::{resolve_identity, verify_detached, Identity};
pub use kit::CryptoKit;

/// Initialise the underlying crypto library. Safe to call repeatedly.
pub fn init() -> Result<()> {
    sodiumoxide::init().map_err(|_| CryptoError::Key("sodium initialisation failed".to_string()))
}
