//! Signing and authentication of overlay messages

use std::sync::Arc;

use vigilmesh_protocol::{MessageMeta, PeerId, WireMessage};

use crate::error::{CryptoError, Result};
use crate::identity::{verify_detached, Identity};

/// Signs outgoing messages with the local identity and authenticates
/// incoming ones against their embedded sender identity.
///
/// A message is signed once by its original author; forwarders never
/// re-sign. Verification therefore re-encodes the message with the
/// signature field cleared and checks the original author's signature
/// over those exact bytes.
#[derive(Clone)]
pub struct CryptoKit {
    identity: Arc<Identity>,
}

impl CryptoKit {
    pub fn new(identity: Arc<Identity>) -> Self {
        CryptoKit { identity }
    }

    pub fn local_peer(&self) -> PeerId {
        self.identity.peer_id()
    }

    pub fn identity(&self) -> &Arc<Identity> {
        &self.identity
    }

    /// Fresh unsigned metadata authored by this node.
    pub fn new_meta(&self) -> MessageMeta {
        MessageMeta::new(self.identity.peer_id(), self.identity.public_key_bytes())
    }

    /// Sign `msg` in place: encode with an empty signature field, sign
    /// the bytes, store the signature back into the metadata.
    pub fn sign_message<M: WireMessage>(&self, msg: &mut M) {
        msg.meta_mut().signature.clear();
        let bytes = msg.encode();
        msg.meta_mut().signature = self.identity.sign(&bytes);
    }

    /// Authenticate a received message.
    ///
    /// Checks that the embedded public key derives the claimed peer id
    /// and that the signature verifies over the message encoded with
    /// the signature cleared.
    pub fn authenticate<M: WireMessage + Clone>(&self, msg: &M) -> Result<()> {
        let meta = msg.meta();

        let claimed = meta.original_sender.peer_id;
        let derived = PeerId::from_public_key(&meta.original_sender.public_key)
            .map_err(|_| CryptoError::Malformed("sender public key".to_string()))?;
        if derived != claimed {
            return Err(CryptoError::IdentityMismatch);
        }

        if meta.signature.is_empty() {
            return Err(CryptoError::Malformed("missing signature".to_string()));
        }

        let mut unsigned = msg.clone();
        let signature = std::mem::take(&mut unsigned.meta_mut().signature);
        let bytes = unsigned.encode();

        if verify_detached(&meta.original_sender.public_key, &bytes, &signature)? {
            Ok(())
        } else {
            Err(CryptoError::BadSignature)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use vigilmesh_protocol::Alert;

    fn kit() -> CryptoKit {
        CryptoKit::new(Arc::new(Identity::generate().unwrap()))
    }

    fn signed_alert(kit: &CryptoKit) -> Alert {
        let mut alert = Alert {
            meta: kit.new_meta(),
            payload: b"{}".to_vec(),
        };
        kit.sign_message(&mut alert);
        alert
    }

    #[test]
    fn test_sign_then_authenticate() {
        let kit = kit();
        let alert = signed_alert(&kit);
        assert!(!alert.meta.signature.is_empty());

        // Any node can authenticate, not just the author.
        let other = CryptoKit::new(Arc::new(Identity::generate().unwrap()));
        other.authenticate(&alert).unwrap();
    }

    #[test]
    fn test_tampered_payload_fails() {
        let kit = kit();
        let mut alert = signed_alert(&kit);
        alert.payload = b"tampered".to_vec();

        assert!(matches!(
            kit.authenticate(&alert),
            Err(CryptoError::BadSignature)
        ));
    }

    #[test]
    fn test_identity_mismatch_detected() {
        let kit = kit();
        let other = Identity::generate().unwrap();

        let mut alert = signed_alert(&kit);
        // Claim another peer authored it while keeping the real key.
        alert.meta.original_sender.peer_id = other.peer_id();

        assert!(matches!(
            kit.authenticate(&alert),
            Err(CryptoError::IdentityMismatch)
        ));
    }

    #[test]
    fn test_unsigned_message_rejected() {
        let kit = kit();
        let alert = Alert {
            meta: kit.new_meta(),
            payload: b"{}".to_vec(),
        };
        assert!(matches!(
            kit.authenticate(&alert),
            Err(CryptoError::Malformed(_))
        ));
    }

    #[test]
    fn test_authentication_restores_nothing() {
        // authenticate() works on a clone; the original keeps its
        // signature for further forwarding.
        let kit = kit();
        let alert = signed_alert(&kit);
        let sig_before = alert.meta.signature.clone();
        kit.authenticate(&alert).unwrap();
        assert_eq!(alert.meta.signature, sig_before);
    }
}
