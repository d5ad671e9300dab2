//! Message metadata carried by every overlay message

use std::time::{SystemTime, UNIX_EPOCH};

use crate::error::Result;
use crate::types::{new_message_id, PeerId, PEER_ID_SIZE};
use crate::wire::{WireReader, WireWriter};

/// Identity of the node that authored a message. Forwarders never
/// rewrite it, so a multi-hop message still verifies against the
/// original author.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SenderIdentity {
    pub peer_id: PeerId,
    /// Raw ed25519 public key of the author.
    pub public_key: Vec<u8>,
}

/// Metadata attached to every overlay message.
///
/// Serialisation order is fixed: sender peer id, sender public key,
/// timestamp, message id, signature.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageMeta {
    pub original_sender: SenderIdentity,
    /// Unix seconds at creation time.
    pub timestamp: i64,
    /// Printable random UUID.
    pub id: String,
    /// Signature over the enclosing message encoded with this field
    /// empty. Empty until signed.
    pub signature: Vec<u8>,
}

impl MessageMeta {
    /// Fresh unsigned metadata authored by `sender`.
    pub fn new(peer_id: PeerId, public_key: Vec<u8>) -> Self {
        let timestamp = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs() as i64)
            .unwrap_or(0);

        MessageMeta {
            original_sender: SenderIdentity { peer_id, public_key },
            timestamp,
            id: new_message_id(),
            signature: Vec::new(),
        }
    }

    pub fn write_to(&self, w: &mut WireWriter) {
        w.put_raw(self.original_sender.peer_id.as_bytes());
        w.put_bytes(&self.original_sender.public_key);
        w.put_i64(self.timestamp);
        w.put_str(&self.id);
        w.put_bytes(&self.signature);
    }

    pub fn read_from(r: &mut WireReader<'_>) -> Result<Self> {
        let mut id_bytes = [0u8; PEER_ID_SIZE];
        id_bytes.copy_from_slice(r.take_raw(PEER_ID_SIZE)?);
        let peer_id = PeerId::from_bytes(id_bytes);
        let public_key = r.take_bytes()?;
        let timestamp = r.take_i64()?;
        let id = r.take_str("meta.id")?;
        let signature = r.take_bytes()?;

        Ok(MessageMeta {
            original_sender: SenderIdentity { peer_id, public_key },
            timestamp,
            id,
            signature,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_meta() -> MessageMeta {
        let peer = PeerId::from_bytes([5u8; PEER_ID_SIZE]);
        let mut meta = MessageMeta::new(peer, vec![5u8; PEER_ID_SIZE]);
        meta.signature = vec![9u8; 64];
        meta
    }

    #[test]
    fn test_meta_roundtrip() {
        let meta = sample_meta();
        let mut w = WireWriter::new();
        meta.write_to(&mut w);
        let bytes = w.into_bytes();

        let mut r = WireReader::new(&bytes);
        let back = MessageMeta::read_from(&mut r).unwrap();
        r.finish().unwrap();
        assert_eq!(back, meta);
    }

    #[test]
    fn test_encoding_is_deterministic() {
        let meta = sample_meta();
        let encode = |m: &MessageMeta| {
            let mut w = WireWriter::new();
            m.write_to(&mut w);
            w.into_bytes()
        };
        assert_eq!(encode(&meta), encode(&meta));
    }

    #[test]
    fn test_new_meta_is_unsigned() {
        let peer = PeerId::from_bytes([1u8; PEER_ID_SIZE]);
        let meta = MessageMeta::new(peer, vec![1u8; PEER_ID_SIZE]);
        assert!(meta.signature.is_empty());
        assert!(meta.timestamp > 0);
        assert_eq!(meta.id.len(), 36);
    }
}
