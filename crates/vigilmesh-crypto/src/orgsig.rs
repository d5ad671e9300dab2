//! Organisation signatures over peer public keys
//!
//! An organisation endorses a peer by signing the raw bytes of the
//! peer's public key with the organisation's secret key. Since a peer
//! id embeds the public key, the signature effectively covers the
//! peer's identity. Signatures travel base64-encoded.

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;

use vigilmesh_protocol::{OrgId, PeerId};

use crate::error::{CryptoError, Result};
use crate::identity::{verify_detached, Identity};

/// Sign `peer` with an organisation identity. Returns the base64
/// signature handed out to the peer for later presentation.
pub fn sign_peer(org: &Identity, peer: &PeerId) -> String {
    let signature = org.sign(peer.public_key());
    BASE64.encode(signature)
}

/// Verify that `b64_signature` is `org`'s endorsement of the peer whose
/// raw public key is `peer_public_key`.
pub fn verify_peer(org: &OrgId, peer_public_key: &[u8], b64_signature: &str) -> Result<bool> {
    let signature = BASE64
        .decode(b64_signature)
        .map_err(|_| CryptoError::Malformed("base64 org signature".to_string()))?;
    verify_detached(org.public_key(), peer_public_key, &signature)
}

/// Derive the printable organisation id of an org keypair.
pub fn org_id_of(org: &Identity) -> OrgId {
    OrgId::from_public_key(&org.public_key_bytes()).expect("ed25519 public key size")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sign_and_verify_peer() {
        let org = Identity::generate().unwrap();
        let peer = Identity::generate().unwrap();

        let sig = sign_peer(&org, &peer.peer_id());
        let org_id = org_id_of(&org);

        assert!(verify_peer(&org_id, &peer.public_key_bytes(), &sig).unwrap());
    }

    #[test]
    fn test_signature_bound_to_peer() {
        let org = Identity::generate().unwrap();
        let peer = Identity::generate().unwrap();
        let other = Identity::generate().unwrap();

        let sig = sign_peer(&org, &peer.peer_id());
        let org_id = org_id_of(&org);

        assert!(!verify_peer(&org_id, &other.public_key_bytes(), &sig).unwrap());
    }

    #[test]
    fn test_signature_bound_to_org() {
        let org = Identity::generate().unwrap();
        let impostor = Identity::generate().unwrap();
        let peer = Identity::generate().unwrap();

        let sig = sign_peer(&org, &peer.peer_id());

        assert!(!verify_peer(&org_id_of(&impostor), &peer.public_key_bytes(), &sig).unwrap());
    }

    #[test]
    fn test_invalid_base64_rejected() {
        let org = Identity::generate().unwrap();
        let peer = Identity::generate().unwrap();

        let err = verify_peer(&org_id_of(&org), &peer.public_key_bytes(), "not base64!!");
        assert!(matches!(err, Err(CryptoError::Malformed(_))));
    }
}
