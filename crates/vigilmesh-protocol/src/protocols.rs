//! Overlay protocol identifiers

pub const ALERT: &str = "/alert/0.0.1";
pub const RECOMMENDATION_REQUEST: &str = "/recommendation-request/0.0.1";
pub const RECOMMENDATION_RESPONSE: &str = "/recommendation-response/0.0.1";
pub const INTELLIGENCE_REQUEST: &str = "/intelligence-request/0.0.1";
pub const INTELLIGENCE_RESPONSE: &str = "/intelligence-response/0.0.1";
pub const FILE_SHARE_METADATA: &str = "/fileShare-metadata/0.0.1";
pub const FILE_SHARE_DOWNLOAD: &str = "/fileShare-download/0.0.1";
pub const PEER_QUERY: &str = "/peer-query/0.0.1";
pub const ORG_SIGNATURE: &str = "/org-signature/0.0.1";
