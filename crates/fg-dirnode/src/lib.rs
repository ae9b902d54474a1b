//! fg-dirnode: directory node for fieldgrid
//!
//! Accepts signed unit advertisements, routes signed messages into durable
//! per-unit inboxes and serves inbox reads to polling peers.

pub mod adverts;
pub mod api;
pub mod config;
pub mod directory;
pub mod inbox;
pub mod server;
pub mod store;

pub use config::ServerConfig;
pub use directory::{DirectoryError, DirectoryService};
pub use server::DirNodeServer;

#[cfg(test)]
mod inbox_props;
