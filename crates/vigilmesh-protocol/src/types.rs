//! Core identifier types

use blake2::{Blake2b512, Digest};
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::error::{ProtocolError, Result};

/// Size of a peer ID in bytes (raw ed25519 public key)
pub const PEER_ID_SIZE: usize = 32;

/// Size of a content ID in bytes (truncated Blake2b digest)
pub const CONTENT_ID_SIZE: usize = 32;

/// Identifier of a peer on the overlay.
///
/// A peer id is the raw bytes of the peer's ed25519 public key, so the
/// key needed to verify the peer's signatures can always be recovered
/// from the id itself.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PeerId([u8; PEER_ID_SIZE]);

impl PeerId {
    /// Build a peer id from a raw ed25519 public key.
    pub fn from_public_key(key: &[u8]) -> Result<Self> {
        let bytes: [u8; PEER_ID_SIZE] =
            key.try_into().map_err(|_| ProtocolError::InvalidPeerId)?;
        Ok(PeerId(bytes))
    }

    pub fn from_bytes(bytes: [u8; PEER_ID_SIZE]) -> Self {
        PeerId(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; PEER_ID_SIZE] {
        &self.0
    }

    /// The public key embedded in this id.
    pub fn public_key(&self) -> &[u8; PEER_ID_SIZE] {
        &self.0
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    pub fn from_hex(s: &str) -> Result<Self> {
        let bytes = hex::decode(s).map_err(|_| ProtocolError::InvalidPeerId)?;
        Self::from_public_key(&bytes)
    }
}

impl std::fmt::Debug for PeerId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "PeerId({}...)", &self.to_hex()[..12])
    }
}

impl std::fmt::Display for PeerId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl std::str::FromStr for PeerId {
    type Err = ProtocolError;

    fn from_str(s: &str) -> Result<Self> {
        Self::from_hex(s)
    }
}

impl Serialize for PeerId {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_hex())
    }
}

impl<'de> Deserialize<'de> for PeerId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Self::from_hex(&s).map_err(serde::de::Error::custom)
    }
}

/// Identifier of an organisation.
///
/// Organisations are keypair-backed identities exactly like peers; the
/// id is the raw ed25519 public key of the organisation.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct OrgId([u8; PEER_ID_SIZE]);

impl OrgId {
    pub fn from_public_key(key: &[u8]) -> Result<Self> {
        let bytes: [u8; PEER_ID_SIZE] =
            key.try_into().map_err(|_| ProtocolError::InvalidOrgId)?;
        Ok(OrgId(bytes))
    }

    pub fn from_bytes(bytes: [u8; PEER_ID_SIZE]) -> Self {
        OrgId(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; PEER_ID_SIZE] {
        &self.0
    }

    pub fn public_key(&self) -> &[u8; PEER_ID_SIZE] {
        &self.0
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    pub fn from_hex(s: &str) -> Result<Self> {
        let bytes = hex::decode(s).map_err(|_| ProtocolError::InvalidOrgId)?;
        Self::from_public_key(&bytes)
    }

    /// Deterministic content-routing key for this organisation, used to
    /// announce and look up membership on the DHT.
    pub fn content_id(&self) -> ContentId {
        ContentId::for_bytes(&self.0)
    }
}

impl std::fmt::Debug for OrgId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "OrgId({}...)", &self.to_hex()[..12])
    }
}

impl std::fmt::Display for OrgId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl std::str::FromStr for OrgId {
    type Err = ProtocolError;

    fn from_str(s: &str) -> Result<Self> {
        Self::from_hex(s)
    }
}

impl Serialize for OrgId {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_hex())
    }
}

impl<'de> Deserialize<'de> for OrgId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Self::from_hex(&s).map_err(serde::de::Error::custom)
    }
}

/// Content-addressed identifier: a truncated Blake2b digest over the
/// addressed bytes. The hash function is fixed for the whole overlay so
/// every node derives the same id for the same content.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ContentId([u8; CONTENT_ID_SIZE]);

impl ContentId {
    /// Hash `data` into its content id.
    pub fn for_bytes(data: &[u8]) -> Self {
        let mut hasher = Blake2b512::new();
        hasher.update(data);
        let digest = hasher.finalize();

        let mut id = [0u8; CONTENT_ID_SIZE];
        id.copy_from_slice(&digest[..CONTENT_ID_SIZE]);
        ContentId(id)
    }

    pub fn from_bytes(bytes: [u8; CONTENT_ID_SIZE]) -> Self {
        ContentId(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; CONTENT_ID_SIZE] {
        &self.0
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    pub fn from_hex(s: &str) -> Result<Self> {
        let bytes = hex::decode(s).map_err(|_| ProtocolError::InvalidContentId)?;
        let arr: [u8; CONTENT_ID_SIZE] = bytes
            .try_into()
            .map_err(|_| ProtocolError::InvalidContentId)?;
        Ok(ContentId(arr))
    }
}

impl std::fmt::Debug for ContentId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "ContentId({}...)", &self.to_hex()[..12])
    }
}

impl std::fmt::Display for ContentId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl std::str::FromStr for ContentId {
    type Err = ProtocolError;

    fn from_str(s: &str) -> Result<Self> {
        Self::from_hex(s)
    }
}

impl Serialize for ContentId {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_hex())
    }
}

impl<'de> Deserialize<'de> for ContentId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Self::from_hex(&s).map_err(serde::de::Error::custom)
    }
}

/// Generate a fresh random message id (printable UUID).
pub fn new_message_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_peer_id_roundtrip() {
        let id = PeerId::from_bytes([7u8; PEER_ID_SIZE]);
        let hex = id.to_hex();
        assert_eq!(hex.len(), 64);
        assert_eq!(PeerId::from_hex(&hex).unwrap(), id);
    }

    #[test]
    fn test_peer_id_rejects_wrong_length() {
        assert!(PeerId::from_public_key(&[1u8; 16]).is_err());
        assert!(PeerId::from_hex("abcd").is_err());
    }

    #[test]
    fn test_content_id_deterministic() {
        let a = ContentId::for_bytes(b"some file bytes");
        let b = ContentId::for_bytes(b"some file bytes");
        let c = ContentId::for_bytes(b"other file bytes");
        assert_eq!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn test_org_content_id_differs_from_id() {
        let org = OrgId::from_bytes([3u8; PEER_ID_SIZE]);
        assert_ne!(org.content_id().as_bytes(), org.as_bytes());
        assert_eq!(org.content_id(), org.content_id());
    }

    #[test]
    fn test_message_ids_unique() {
        assert_ne!(new_message_id(), new_message_id());
    }

    #[test]
    fn test_serde_as_hex_string() {
        let id = PeerId::from_bytes([9u8; PEER_ID_SIZE]);
        let json = serde_json::to_string(&id).unwrap();
        assert_eq!(json, format!("\"{}\"", id.to_hex()));
        let back: PeerId = serde_json::from_str(&json).unwrap();
        assert_eq!(back, id);
    }
}
