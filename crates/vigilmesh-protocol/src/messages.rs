//! Overlay message definitions
//!
//! One message type per protocol stream. Field order within each
//! message is fixed; see `wire` for the encoding rules.

use crate::error::Result;
use crate::meta::MessageMeta;
use crate::wire::{WireMessage, WireReader, WireWriter};

macro_rules! impl_meta_accessors {
    () => {
        fn meta(&self) -> &MessageMeta {
            &self.meta
        }

        fn meta_mut(&mut self) -> &mut MessageMeta {
            &mut self.meta
        }
    };
}

fn put_str_list(w: &mut WireWriter, items: &[String]) {
    w.put_u32(items.len() as u32);
    for item in items {
        w.put_str(item);
    }
}

fn take_str_list(r: &mut WireReader<'_>, field: &'static str) -> Result<Vec<String>> {
    let count = r.take_u32()? as usize;
    let mut items = Vec::with_capacity(count.min(1024));
    for _ in 0..count {
        items.push(r.take_str(field)?);
    }
    Ok(items)
}

fn put_bytes_list(w: &mut WireWriter, items: &[Vec<u8>]) {
    w.put_u32(items.len() as u32);
    for item in items {
        w.put_bytes(item);
    }
}

fn take_bytes_list(r: &mut WireReader<'_>) -> Result<Vec<Vec<u8>>> {
    let count = r.take_u32()? as usize;
    let mut items = Vec::with_capacity(count.min(1024));
    for _ in 0..count {
        items.push(r.take_bytes()?);
    }
    Ok(items)
}

/// Best-effort flooded alert. Payload is opaque TL JSON.
#[derive(Debug, Clone, PartialEq)]
pub struct Alert {
    pub meta: MessageMeta,
    pub payload: Vec<u8>,
}

impl WireMessage for Alert {
    fn encode(&self) -> Vec<u8> {
        let mut w = WireWriter::new();
        self.meta.write_to(&mut w);
        w.put_bytes(&self.payload);
        w.into_bytes()
    }

    fn decode(bytes: &[u8]) -> Result<Self> {
        let mut r = WireReader::new(bytes);
        let meta = MessageMeta::read_from(&mut r)?;
        let payload = r.take_bytes()?;
        r.finish()?;
        Ok(Alert { meta, payload })
    }

    impl_meta_accessors!();
}

/// Directed recommendation request.
#[derive(Debug, Clone, PartialEq)]
pub struct RecommendationRequest {
    pub meta: MessageMeta,
    pub payload: Vec<u8>,
}

impl WireMessage for RecommendationRequest {
    fn encode(&self) -> Vec<u8> {
        let mut w = WireWriter::new();
        self.meta.write_to(&mut w);
        w.put_bytes(&self.payload);
        w.into_bytes()
    }

    fn decode(bytes: &[u8]) -> Result<Self> {
        let mut r = WireReader::new(bytes);
        let meta = MessageMeta::read_from(&mut r)?;
        let payload = r.take_bytes()?;
        r.finish()?;
        Ok(RecommendationRequest { meta, payload })
    }

    impl_meta_accessors!();
}

/// Reply to a recommendation request, matched by `request_id`.
#[derive(Debug, Clone, PartialEq)]
pub struct RecommendationResponse {
    pub meta: MessageMeta,
    pub request_id: String,
    pub payload: Vec<u8>,
}

impl WireMessage for RecommendationResponse {
    fn encode(&self) -> Vec<u8> {
        let mut w = WireWriter::new();
        self.meta.write_to(&mut w);
        w.put_str(&self.request_id);
        w.put_bytes(&self.payload);
        w.into_bytes()
    }

    fn decode(bytes: &[u8]) -> Result<Self> {
        let mut r = WireReader::new(bytes);
        let meta = MessageMeta::read_from(&mut r)?;
        let request_id = r.take_str("request_id")?;
        let payload = r.take_bytes()?;
        r.finish()?;
        Ok(RecommendationResponse {
            meta,
            request_id,
            payload,
        })
    }

    impl_meta_accessors!();
}

/// Signed intelligence request, carried inside `IntelligenceEnvelope`.
#[derive(Debug, Clone, PartialEq)]
pub struct IntelligenceRequest {
    pub meta: MessageMeta,
    pub payload: Vec<u8>,
}

impl WireMessage for IntelligenceRequest {
    fn encode(&self) -> Vec<u8> {
        let mut w = WireWriter::new();
        self.meta.write_to(&mut w);
        w.put_bytes(&self.payload);
        w.into_bytes()
    }

    fn decode(bytes: &[u8]) -> Result<Self> {
        let mut r = WireReader::new(bytes);
        let meta = MessageMeta::read_from(&mut r)?;
        let payload = r.take_bytes()?;
        r.finish()?;
        Ok(IntelligenceRequest { meta, payload })
    }

    impl_meta_accessors!();
}

/// Hop-mutable wrapper around an intelligence request. Forwarders
/// decrement `ttl` and `parent_timeout`; the inner request and its
/// signature are never touched.
#[derive(Debug, Clone, PartialEq)]
pub struct IntelligenceEnvelope {
    pub ttl: u32,
    /// Human-readable duration (e.g. "5s") the upstream node will wait.
    pub parent_timeout: String,
    pub request: IntelligenceRequest,
}

impl IntelligenceEnvelope {
    pub fn encode(&self) -> Vec<u8> {
        let mut w = WireWriter::new();
        w.put_u32(self.ttl);
        w.put_str(&self.parent_timeout);
        w.put_bytes(&self.request.encode());
        w.into_bytes()
    }

    pub fn decode(bytes: &[u8]) -> Result<Self> {
        let mut r = WireReader::new(bytes);
        let ttl = r.take_u32()?;
        let parent_timeout = r.take_str("parent_timeout")?;
        let inner = r.take_bytes()?;
        r.finish()?;
        let request = IntelligenceRequest::decode(&inner)?;
        Ok(IntelligenceEnvelope {
            ttl,
            parent_timeout,
            request,
        })
    }
}

/// Aggregated intelligence answers travelling back upstream.
///
/// `processed == false` signals "duplicate, not answering" so the
/// upstream aggregator is not left waiting. Each entry in `responses`
/// is a `SingleEntityResponse` encrypted to the original requester.
#[derive(Debug, Clone, PartialEq)]
pub struct IntelligenceResponse {
    pub meta: MessageMeta,
    pub request_id: String,
    pub processed: bool,
    pub responses: Vec<Vec<u8>>,
}

impl WireMessage for IntelligenceResponse {
    fn encode(&self) -> Vec<u8> {
        let mut w = WireWriter::new();
        self.meta.write_to(&mut w);
        w.put_str(&self.request_id);
        w.put_u8(self.processed as u8);
        put_bytes_list(&mut w, &self.responses);
        w.into_bytes()
    }

    fn decode(bytes: &[u8]) -> Result<Self> {
        let mut r = WireReader::new(bytes);
        let meta = MessageMeta::read_from(&mut r)?;
        let request_id = r.take_str("request_id")?;
        let processed = r.take_u8()? != 0;
        let responses = take_bytes_list(&mut r)?;
        r.finish()?;
        Ok(IntelligenceResponse {
            meta,
            request_id,
            processed,
            responses,
        })
    }

    impl_meta_accessors!();
}

/// One TL answer to an intelligence request, signed by the answering
/// node before encryption.
#[derive(Debug, Clone, PartialEq)]
pub struct SingleEntityResponse {
    pub meta: MessageMeta,
    pub payload: Vec<u8>,
}

impl WireMessage for SingleEntityResponse {
    fn encode(&self) -> Vec<u8> {
        let mut w = WireWriter::new();
        self.meta.write_to(&mut w);
        w.put_bytes(&self.payload);
        w.into_bytes()
    }

    fn decode(bytes: &[u8]) -> Result<Self> {
        let mut r = WireReader::new(bytes);
        let meta = MessageMeta::read_from(&mut r)?;
        let payload = r.take_bytes()?;
        r.finish()?;
        Ok(SingleEntityResponse { meta, payload })
    }

    impl_meta_accessors!();
}

/// Gossiped description of a shared file.
#[derive(Debug, Clone, PartialEq)]
pub struct FileMetadata {
    pub meta: MessageMeta,
    /// Content id of the file, hex.
    pub cid: String,
    /// Opaque TL JSON.
    pub description: Vec<u8>,
    /// Organisation ids (hex) allowed to download; empty means public.
    pub rights: Vec<String>,
    pub severity: String,
    /// Unix seconds after which the file should be considered stale.
    pub expired_at: i64,
}

impl WireMessage for FileMetadata {
    fn encode(&self) -> Vec<u8> {
        let mut w = WireWriter::new();
        self.meta.write_to(&mut w);
        w.put_str(&self.cid);
        w.put_bytes(&self.description);
        put_str_list(&mut w, &self.rights);
        w.put_str(&self.severity);
        w.put_i64(self.expired_at);
        w.into_bytes()
    }

    fn decode(bytes: &[u8]) -> Result<Self> {
        let mut r = WireReader::new(bytes);
        let meta = MessageMeta::read_from(&mut r)?;
        let cid = r.take_str("cid")?;
        let description = r.take_bytes()?;
        let rights = take_str_list(&mut r, "rights")?;
        let severity = r.take_str("severity")?;
        let expired_at = r.take_i64()?;
        r.finish()?;
        Ok(FileMetadata {
            meta,
            cid,
            description,
            rights,
            severity,
            expired_at,
        })
    }

    impl_meta_accessors!();
}

/// Request for the bytes of a file by content id.
#[derive(Debug, Clone, PartialEq)]
pub struct FileDownloadRequest {
    pub meta: MessageMeta,
    pub cid: String,
}

impl WireMessage for FileDownloadRequest {
    fn encode(&self) -> Vec<u8> {
        let mut w = WireWriter::new();
        self.meta.write_to(&mut w);
        w.put_str(&self.cid);
        w.into_bytes()
    }

    fn decode(bytes: &[u8]) -> Result<Self> {
        let mut r = WireReader::new(bytes);
        let meta = MessageMeta::read_from(&mut r)?;
        let cid = r.take_str("cid")?;
        r.finish()?;
        Ok(FileDownloadRequest { meta, cid })
    }

    impl_meta_accessors!();
}

/// Reply carrying the file bytes.
#[derive(Debug, Clone, PartialEq)]
pub struct FileDownloadResponse {
    pub meta: MessageMeta,
    pub status: String,
    pub data: Vec<u8>,
}

impl WireMessage for FileDownloadResponse {
    fn encode(&self) -> Vec<u8> {
        let mut w = WireWriter::new();
        self.meta.write_to(&mut w);
        w.put_str(&self.status);
        w.put_bytes(&self.data);
        w.into_bytes()
    }

    fn decode(bytes: &[u8]) -> Result<Self> {
        let mut r = WireReader::new(bytes);
        let meta = MessageMeta::read_from(&mut r)?;
        let status = r.take_str("status")?;
        let data = r.take_bytes()?;
        r.finish()?;
        Ok(FileDownloadResponse { meta, status, data })
    }

    impl_meta_accessors!();
}

/// Reply to a peer query: a sample of the responder's connected peers.
#[derive(Debug, Clone, PartialEq)]
pub struct PeerQueryResponse {
    pub meta: MessageMeta,
    /// Peer ids, hex.
    pub peer_ids: Vec<String>,
}

impl WireMessage for PeerQueryResponse {
    fn encode(&self) -> Vec<u8> {
        let mut w = WireWriter::new();
        self.meta.write_to(&mut w);
        put_str_list(&mut w, &self.peer_ids);
        w.into_bytes()
    }

    fn decode(bytes: &[u8]) -> Result<Self> {
        let mut r = WireReader::new(bytes);
        let meta = MessageMeta::read_from(&mut r)?;
        let peer_ids = take_str_list(&mut r, "peer_ids")?;
        r.finish()?;
        Ok(PeerQueryResponse { meta, peer_ids })
    }

    impl_meta_accessors!();
}

/// One organisation endorsement: the org id and its base64 signature
/// over the raw bytes of the presenting peer's public key.
#[derive(Debug, Clone, PartialEq)]
pub struct OrgEndorsement {
    pub org_id: String,
    pub signature: String,
}

/// A peer's collection of organisation endorsements, sent in reply to
/// an org-signature request.
#[derive(Debug, Clone, PartialEq)]
pub struct OrgSignatures {
    pub meta: MessageMeta,
    pub organisations: Vec<OrgEndorsement>,
}

impl WireMessage for OrgSignatures {
    fn encode(&self) -> Vec<u8> {
        let mut w = WireWriter::new();
        self.meta.write_to(&mut w);
        w.put_u32(self.organisations.len() as u32);
        for org in &self.organisations {
            w.put_str(&org.org_id);
            w.put_str(&org.signature);
        }
        w.into_bytes()
    }

    fn decode(bytes: &[u8]) -> Result<Self> {
        let mut r = WireReader::new(bytes);
        let meta = MessageMeta::read_from(&mut r)?;
        let count = r.take_u32()? as usize;
        let mut organisations = Vec::with_capacity(count.min(1024));
        for _ in 0..count {
            let org_id = r.take_str("org_id")?;
            let signature = r.take_str("org_signature")?;
            organisations.push(OrgEndorsement { org_id, signature });
        }
        r.finish()?;
        Ok(OrgSignatures {
            meta,
            organisations,
        })
    }

    impl_meta_accessors!();
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{PeerId, PEER_ID_SIZE};

    fn meta() -> MessageMeta {
        let peer = PeerId::from_bytes([4u8; PEER_ID_SIZE]);
        let mut m = MessageMeta::new(peer, vec![4u8; PEER_ID_SIZE]);
        m.signature = vec![1u8; 64];
        m
    }

    #[test]
    fn test_alert_roundtrip() {
        let alert = Alert {
            meta: meta(),
            payload: br#"{"k":"v"}"#.to_vec(),
        };
        let back = Alert::decode(&alert.encode()).unwrap();
        assert_eq!(back, alert);
    }

    #[test]
    fn test_intelligence_envelope_roundtrip() {
        let env = IntelligenceEnvelope {
            ttl: 3,
            parent_timeout: "5s".to_string(),
            request: IntelligenceRequest {
                meta: meta(),
                payload: b"payload".to_vec(),
            },
        };
        let back = IntelligenceEnvelope::decode(&env.encode()).unwrap();
        assert_eq!(back, env);
    }

    #[test]
    fn test_envelope_mutation_preserves_inner_bytes() {
        let env = IntelligenceEnvelope {
            ttl: 3,
            parent_timeout: "5s".to_string(),
            request: IntelligenceRequest {
                meta: meta(),
                payload: b"payload".to_vec(),
            },
        };
        let mut hopped = env.clone();
        hopped.ttl = 2;
        hopped.parent_timeout = "4s".to_string();

        // The signed inner request must be bit-identical after the hop.
        assert_eq!(hopped.request.encode(), env.request.encode());
    }

    #[test]
    fn test_intelligence_response_roundtrip() {
        let resp = IntelligenceResponse {
            meta: meta(),
            request_id: "req-1".to_string(),
            processed: true,
            responses: vec![b"blob-a".to_vec(), b"blob-b".to_vec()],
        };
        let back = IntelligenceResponse::decode(&resp.encode()).unwrap();
        assert_eq!(back, resp);

        let unprocessed = IntelligenceResponse {
            processed: false,
            responses: vec![],
            ..resp
        };
        let back = IntelligenceResponse::decode(&unprocessed.encode()).unwrap();
        assert!(!back.processed);
        assert!(back.responses.is_empty());
    }

    #[test]
    fn test_file_metadata_roundtrip() {
        let fm = FileMetadata {
            meta: meta(),
            cid: "aa".repeat(32),
            description: br#"{"about":"sample"}"#.to_vec(),
            rights: vec!["bb".repeat(32), "cc".repeat(32)],
            severity: "CRITICAL".to_string(),
            expired_at: 1_700_000_000,
        };
        let back = FileMetadata::decode(&fm.encode()).unwrap();
        assert_eq!(back, fm);
    }

    #[test]
    fn test_org_signatures_roundtrip() {
        let sigs = OrgSignatures {
            meta: meta(),
            organisations: vec![OrgEndorsement {
                org_id: "dd".repeat(32),
                signature: "c2lnbmF0dXJl".to_string(),
            }],
        };
        let back = OrgSignatures::decode(&sigs.encode()).unwrap();
        assert_eq!(back, sigs);
    }

    #[test]
    fn test_decode_rejects_garbage() {
        assert!(Alert::decode(b"junk").is_err());
        assert!(PeerQueryResponse::decode(&[]).is_err());
    }

    #[test]
    fn test_signature_field_position_is_stable() {
        // Two encodings differing only in signature must agree on every
        // byte before the signature and after it.
        let mut a = Alert {
            meta: meta(),
            payload: b"same".to_vec(),
        };
        let with_sig = a.encode();
        a.meta.signature = Vec::new();
        let without_sig = a.encode();
        assert_ne!(with_sig.len(), without_sig.len());
        assert_eq!(with_sig.len(), without_sig.len() + 64);
    }
}
