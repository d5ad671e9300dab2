//! Vigilmesh networking layer
//!
//! Abstractions over the secure transport and content routing, the
//! in-process implementations used by tests and the bundled node, and
//! the connection-maintenance machinery (peer selection, connection
//! manager, connecter).

pub mod connecter;
pub mod dht;
pub mod error;
pub mod host;
pub mod manager;
pub mod memory;
pub mod selector;
pub mod shutdown;
pub mod util;

pub use connecter::{Connecter, ConnecterHandle, PeerQueryClient, QUERY_PEERS};
pub use dht::{ContentRouting, DhtHandle, MemoryDhtHub};
pub use error::{NetError, Result};
pub use host::{
    read_message, write_message, ConnectionEvent, Host, IncomingStream, P2pStream, StreamIo,
};
pub use manager::{ConnBand, ConnectionManager, OrgSigExchange, PeersListener};
pub use memory::{MemoryHost, MemoryHub};
pub use selector::PeerSelector;
pub use shutdown::{shutdown_pair, Shutdown, ShutdownTrigger};
