//! Persistence seam for the topology store.

use {async_trait::async_trait, relaybot_common::ServerId};

use crate::{Relations, Result, ServerConfig};

/// Backend that durably records relations and per-server configuration.
///
/// Writes must be all-or-nothing from the caller's point of view: a failed
/// `save_relations` leaves the previously saved state readable.
#[async_trait]
pub trait TopologyPersistence: Send + Sync {
    async fn load_relations(&self) -> Result<Relations>;
    async fn save_relations(&self, relations: &Relations) -> Result<()>;
    /// Servers that have a stored configuration.
    async fn list_servers(&self) -> Result<Vec<ServerId>>;
    async fn load_server(&self, server: &ServerId) -> Result<Option<ServerConfig>>;
    async fn save_server(&self, server: &ServerId, config: &ServerConfig) -> Result<()>;
}
