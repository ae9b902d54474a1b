//! fg-agent: the peer side of fieldgrid
//!
//! A [`PeerAgent`] signs with the unit's identity and talks to a directory
//! through a [`DirectoryTransport`]; [`HttpDirectoryClient`] is the network
//! implementation.

pub mod agent;
pub mod checkpoint;
pub mod http;
pub mod retry;
pub mod transport;

pub use agent::{AgentError, MessageHandler, PeerAgent};
pub use checkpoint::{CheckpointError, CheckpointStore, FileCheckpointStore, MemoryCheckpointStore};
pub use http::HttpDirectoryClient;
pub use retry::RetryConfig;
pub use transport::{DirectoryTransport, TransportError};
