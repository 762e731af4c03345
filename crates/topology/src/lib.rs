//! Relay topology: links, one-way relays, groups, and prefix relays between
//! channels, plus per-server configuration.
//!
//! [`Topology`] is the pure relation model. [`TopologyStore`] wraps it in a
//! lock, pairs every mutation with a write through a [`TopologyPersistence`]
//! backend, and is the single handle shared by the command layer and the
//! relay dispatcher.

pub mod error;
pub mod layout;
pub mod model;
pub mod persist;
pub mod server_config;
pub mod store;
pub mod store_file;
pub mod store_memory;

pub use {
    error::{Error, Result},
    layout::Relations,
    model::{Detached, Topology, UnlinkSummary},
    persist::TopologyPersistence,
    server_config::{ConfigKey, ServerConfig},
    store::{LoadReport, TopologyStore},
    store_file::FileStore,
    store_memory::InMemoryStore,
};
