//! Node and organisation identities
//!
//! An identity is an ed25519 keypair. The peer id (or organisation id)
//! is the raw public key, so any party holding an id can verify
//! signatures made with the matching secret key.

use std::fs;
use std::path::Path;

use sodiumoxide::crypto::sign::ed25519;

use vigilmesh_protocol::PeerId;

use crate::error::{CryptoError, Result};

/// An ed25519 keypair backing a node or organisation identity.
#[derive(Clone)]
pub struct Identity {
    public: ed25519::PublicKey,
    secret: ed25519::SecretKey,
}

impl Identity {
    /// Generate a fresh keypair.
    pub fn generate() -> Result<Self> {
        crate::init()?;
        let (public, secret) = ed25519::gen_keypair();
        Ok(Identity { public, secret })
    }

    /// Rebuild an identity from raw secret-key bytes.
    pub fn from_secret_bytes(bytes: &[u8]) -> Result<Self> {
        crate::init()?;
        let secret = ed25519::SecretKey::from_slice(bytes)
            .ok_or_else(|| CryptoError::Key("invalid secret key length".to_string()))?;
        let public = secret.public_key();
        Ok(Identity { public, secret })
    }

    /// Load an identity from a key file written by [`Identity::save`].
    pub fn load(path: &Path) -> Result<Self> {
        let bytes = fs::read(path)?;
        Self::from_secret_bytes(&bytes)
    }

    /// Persist the secret key to `path`.
    pub fn save(&self, path: &Path) -> Result<()> {
        fs::write(path, self.secret.0)?;
        Ok(())
    }

    pub fn peer_id(&self) -> PeerId {
        // Raw public keys are always PEER_ID_SIZE bytes.
        PeerId::from_public_key(&self.public.0).expect("ed25519 public key size")
    }

    pub fn public_key_bytes(&self) -> Vec<u8> {
        self.public.0.to_vec()
    }

    pub(crate) fn public(&self) -> &ed25519::PublicKey {
        &self.public
    }

    pub(crate) fn secret(&self) -> &ed25519::SecretKey {
        &self.secret
    }

    /// Detached signature over `data`.
    pub fn sign(&self, data: &[u8]) -> Vec<u8> {
        ed25519::sign_detached(data, &self.secret).to_bytes().to_vec()
    }
}

/// Verify a detached signature against a raw ed25519 public key.
pub fn verify_detached(public_key: &[u8], data: &[u8], signature: &[u8]) -> Result<bool> {
    let key = ed25519::PublicKey::from_slice(public_key)
        .ok_or_else(|| CryptoError::Malformed("public key".to_string()))?;
    let sig = ed25519::Signature::from_bytes(signature)
        .map_err(|_| CryptoError::Malformed("signature".to_string()))?;
    Ok(ed25519::verify_detached(&sig, data, &key))
}

/// Resolve an identity from configuration: either generate a new key or
/// load one from disk, optionally persisting the result.
pub fn resolve_identity(
    generate_new: bool,
    load_from: Option<&Path>,
    save_to: Option<&Path>,
) -> Result<Identity> {
    let identity = if generate_new {
        Identity::generate()?
    } else {
        let path = load_from
            .ok_or_else(|| CryptoError::Key("no key source configured".to_string()))?;
        Identity::load(path)?
    };

    if let Some(path) = save_to {
        identity.save(path)?;
    }
    Ok(identity)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_peer_id_is_public_key() {
        let id = Identity::generate().unwrap();
        assert_eq!(id.peer_id().as_bytes().as_slice(), &id.public_key_bytes());
    }

    #[test]
    fn test_sign_verify_roundtrip() {
        let id = Identity::generate().unwrap();
        let sig = id.sign(b"payload");
        assert!(verify_detached(&id.public_key_bytes(), b"payload", &sig).unwrap());
        assert!(!verify_detached(&id.public_key_bytes(), b"other", &sig).unwrap());
    }

    #[test]
    fn test_verify_rejects_malformed_inputs() {
        let id = Identity::generate().unwrap();
        let sig = id.sign(b"payload");
        assert!(verify_detached(&[1, 2, 3], b"payload", &sig).is_err());
        assert!(verify_detached(&id.public_key_bytes(), b"payload", &[1, 2, 3]).is_err());
    }

    #[test]
    fn test_save_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("node.key");

        let id = Identity::generate().unwrap();
        id.save(&path).unwrap();

        let restored = Identity::load(&path).unwrap();
        assert_eq!(restored.peer_id(), id.peer_id());
    }

    #[test]
    fn test_resolve_identity_generate_and_save() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("generated.key");

        let id = resolve_identity(true, None, Some(&path)).unwrap();
        let reloaded = resolve_identity(false, Some(&path), None).unwrap();
        assert_eq!(id.peer_id(), reloaded.peer_id());
    }
}
