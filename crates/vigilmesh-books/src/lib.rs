//! Vigilmesh state books
//!
//! Process-local, concurrently mutated maps that back the overlay
//! protocols: message dedup, peer reliability, organisation trust and
//! shared-file metadata. Nothing here is persisted.

pub mod error;
pub mod files;
pub mod orgs;
pub mod reliability;
pub mod seen;

pub use error::{BookError, Result};
pub use files::{FileBook, FileMeta, Severity};
pub use orgs::{MemberLookup, OrgBook};
pub use reliability::{exp_weight, ReliabilityBook, ReliabilityCallback, DEFAULT_RELIABILITY};
pub use seen::SeenCache;
