//! Sealed-box encryption of intelligence answers
//!
//! Each TL answer travelling back through the overlay is encrypted to
//! the original requester's public key, so intermediate forwarders
//! only carry opaque blobs. The ed25519 identity keys are converted to
//! their curve25519 form for the sealed box.

use sodiumoxide::crypto::sealedbox;
use sodiumoxide::crypto::sign::ed25519;

use crate::error::{CryptoError, Result};
use crate::identity::Identity;

/// Encrypt `plaintext` so that only the holder of the ed25519 secret
/// key matching `recipient_public_key` can read it.
pub fn encrypt_for(recipient_public_key: &[u8], plaintext: &[u8]) -> Result<Vec<u8>> {
    let ed_pk = ed25519::PublicKey::from_slice(recipient_public_key)
        .ok_or_else(|| CryptoError::Malformed("recipient public key".to_string()))?;
    let curve_pk = ed25519::to_curve25519_pk(&ed_pk)
        .map_err(|_| CryptoError::Key("public key conversion failed".to_string()))?;
    Ok(sealedbox::seal(plaintext, &curve_pk))
}

/// Decrypt a blob sealed to this identity.
pub fn decrypt_with(identity: &Identity, ciphertext: &[u8]) -> Result<Vec<u8>> {
    let curve_pk = ed25519::to_curve25519_pk(identity.public())
        .map_err(|_| CryptoError::Key("public key conversion failed".to_string()))?;
    let curve_sk = ed25519::to_curve25519_sk(identity.secret())
        .map_err(|_| CryptoError::Key("secret key conversion failed".to_string()))?;
    sealedbox::open(ciphertext, &curve_pk, &curve_sk).map_err(|_| CryptoError::Decryption)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_roundtrip() {
        let recipient = Identity::generate().unwrap();
        let blob = encrypt_for(&recipient.public_key_bytes(), b"secret answer").unwrap();
        assert_ne!(blob, b"secret answer");
        assert_eq!(decrypt_with(&recipient, &blob).unwrap(), b"secret answer");
    }

    #[test]
    fn test_wrong_recipient_cannot_open() {
        let recipient = Identity::generate().unwrap();
        let eavesdropper = Identity::generate().unwrap();

        let blob = encrypt_for(&recipient.public_key_bytes(), b"secret").unwrap();
        assert!(decrypt_with(&eavesdropper, &blob).is_err());
    }

    #[test]
    fn test_garbage_ciphertext() {
        let recipient = Identity::generate().unwrap();
        assert!(decrypt_with(&recipient, b"not a sealed box").is_err());
    }
}
