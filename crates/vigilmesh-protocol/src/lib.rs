//! Vigilmesh Protocol Module
//!
//! Core identifier types, message metadata and the deterministic wire
//! encoding shared by every overlay protocol.

pub mod error;
pub mod messages;
pub mod meta;
pub mod protocols;
pub mod types;
pub mod wire;

pub use error::{ProtocolError, Result};
pub use messages::{
    Alert, FileDownloadRequest, FileDownloadResponse, FileMetadata, IntelligenceEnvelope,
    IntelligenceRequest, IntelligenceResponse, OrgEndorsement, OrgSignatures, PeerQueryResponse,
    RecommendationRequest, RecommendationResponse, SingleEntityResponse,
};
pub use meta::{MessageMeta, SenderIdentity};
pub use types::{new_message_id, ContentId, OrgId, PeerId, CONTENT_ID_SIZE, PEER_ID_SIZE};
pub use wire::{WireMessage, WireReader, WireWriter, MAX_WIRE_SIZE};
