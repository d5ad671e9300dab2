//! Vigilmesh messaging layer
//!
//! The overlay protocols (alert, recommendation, intelligence, file
//! share, peer query, org signatures), the per-request response
//! aggregator, the spreader and the TL bridge.

pub mod aggregator;
pub mod alert;
pub mod bus;
pub mod core;
pub mod error;
pub mod fileshare;
pub mod intelligence;
pub mod orgsig;
pub mod peerquery;
pub mod recommendation;
pub mod registry;
pub mod reliability;
pub mod spreader;

pub use aggregator::{Completed, ResponseAggregator, WaitMeta};
pub use alert::AlertProtocol;
pub use bus::{MemoryTlBus, TlBus, TlDispatcher, TlEnvelope, TlHandler, ENVELOPE_VERSION};
pub use core::{PeerDescriptor, PeersListPublisher, ProtoCore};
pub use error::{MessagingError, Result};
pub use fileshare::FileShareProtocol;
pub use intelligence::{IntelligenceProtocol, IntelligenceSettings};
pub use orgsig::OrgSigProtocol;
pub use peerquery::{PeerQueryProtocol, RESPONSE_PEERS};
pub use recommendation::RecommendationProtocol;
pub use registry::{ProtocolRegistry, StreamHandler};
pub use reliability::ReliabilityReceiver;
pub use spreader::{default_strategies, SpreadStrategy, Spreader};
