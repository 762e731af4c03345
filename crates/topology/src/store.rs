//! Shared, persisted topology handle.

use std::{
    collections::{BTreeMap, BTreeSet},
    sync::Arc,
};

use {
    relaybot_common::ServerId,
    tokio::sync::RwLock,
    tracing::{debug, info, warn},
};

use crate::{
    ConfigKey, Relations, Result, ServerConfig, Topology, persist::TopologyPersistence,
};

#[derive(Default)]
struct StoreState {
    topology: Topology,
    servers: BTreeMap<ServerId, ServerConfig>,
    /// Servers whose persisted configuration exists but could not be read.
    /// Their files are left alone until an explicit `set_config`.
    unreadable: BTreeSet<ServerId>,
}

/// Outcome of [`TopologyStore::load`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LoadReport {
    /// Persisted entries that violated an invariant and were fixed or dropped.
    pub repaired: usize,
    pub servers: usize,
    /// Servers whose configuration could not be read. They run on defaults.
    pub failed_servers: Vec<ServerId>,
}

/// The topology plus per-server configuration, behind one lock.
///
/// Every mutation is applied to a copy, persisted, and only then made
/// visible. A failed write leaves the in-memory state as it was, so memory
/// never runs ahead of disk.
pub struct TopologyStore {
    state: RwLock<StoreState>,
    persistence: Arc<dyn TopologyPersistence>,
}

impl TopologyStore {
    pub fn new(persistence: Arc<dyn TopologyPersistence>) -> Self {
        Self {
            state: RwLock::new(StoreState::default()),
            persistence,
        }
    }

    /// Replace the in-memory state with what the backend holds.
    ///
    /// Relation files must load; a server configuration that fails to load
    /// is logged and that server falls back to defaults.
    pub async fn load(&self) -> Result<LoadReport> {
        let relations = self.persistence.load_relations().await?;
        let (topology, repaired) = relations.into_topology();
        if repaired > 0 {
            warn!(repaired, "repaired persisted topology");
        }

        let mut report = LoadReport {
            repaired,
            ..LoadReport::default()
        };
        let mut servers = BTreeMap::new();
        for server in self.persistence.list_servers().await? {
            match self.persistence.load_server(&server).await {
                Ok(config) => {
                    servers.insert(server, config.unwrap_or_default());
                    report.servers += 1;
                },
                Err(e) => {
                    warn!(%server, error = %e, "failed to load server config, using defaults");
                    report.failed_servers.push(server);
                },
            }
        }

        let mut state = self.state.write().await;
        state.topology = topology;
        state.servers = servers;
        state.unreadable = report.failed_servers.iter().cloned().collect();
        info!(
            channels = state.topology.channels().len(),
            servers = report.servers,
            "topology loaded"
        );
        Ok(report)
    }

    /// Write relations and every known server configuration.
    pub async fn save(&self) -> Result<()> {
        let state = self.state.read().await;
        self.persistence
            .save_relations(&Relations::from(&state.topology))
            .await?;
        for (server, config) in &state.servers {
            self.persistence.save_server(server, config).await?;
        }
        debug!("topology saved");
        Ok(())
    }

    /// Persist one server's configuration as currently held in memory.
    pub async fn save_server(&self, server: &ServerId) -> Result<()> {
        let config = self.server_config(server).await;
        self.persistence
            .save_server(server, &config)
            .await
            .inspect_err(|e| warn!(%server, error = %e, "failed to save server config"))
    }

    pub async fn read<R>(&self, f: impl FnOnce(&Topology) -> R) -> R {
        f(&self.state.read().await.topology)
    }

    pub async fn snapshot(&self) -> Topology {
        self.state.read().await.topology.clone()
    }

    /// Apply `f` to a copy of the topology and commit it once persisted.
    ///
    /// Writers are serialized. If `f` fails or the write fails, nothing
    /// changes. If `f` leaves the topology unchanged nothing is written.
    pub async fn update<R>(&self, f: impl FnOnce(&mut Topology) -> Result<R>) -> Result<R> {
        let mut state = self.state.write().await;
        let mut next = state.topology.clone();
        let out = f(&mut next)?;
        if next == state.topology {
            return Ok(out);
        }
        self.persistence
            .save_relations(&Relations::from(&next))
            .await
            .inspect_err(|e| warn!(error = %e, "failed to persist topology change"))?;
        state.topology = next;
        Ok(out)
    }

    /// Make sure `server` has a configuration, creating the default one.
    /// Returns whether it was newly created.
    ///
    /// A server whose configuration failed to load counts as known; its
    /// file is never replaced here.
    pub async fn ensure_server(&self, server: &ServerId) -> Result<bool> {
        let mut state = self.state.write().await;
        if state.servers.contains_key(server) || state.unreadable.contains(server) {
            return Ok(false);
        }
        let config = ServerConfig::default();
        self.persistence.save_server(server, &config).await?;
        state.servers.insert(server.clone(), config);
        info!(%server, "created default server config");
        Ok(true)
    }

    pub async fn server_config(&self, server: &ServerId) -> ServerConfig {
        self.state
            .read()
            .await
            .servers
            .get(server)
            .cloned()
            .unwrap_or_default()
    }

    /// Set one configuration key, persisting before the change is visible.
    pub async fn set_config(&self, server: &ServerId, key: &str, value: &str) -> Result<ConfigKey> {
        let mut state = self.state.write().await;
        let mut config = state.servers.get(server).cloned().unwrap_or_default();
        let key = config.set(key, value)?;
        self.persistence.save_server(server, &config).await?;
        state.unreadable.remove(server);
        state.servers.insert(server.clone(), config);
        Ok(key)
    }

    pub async fn control_chars(&self, server: &ServerId) -> String {
        self.server_config(server).await.control_chars().to_string()
    }

    pub async fn servers(&self) -> Vec<ServerId> {
        self.state.read().await.servers.keys().cloned().collect()
    }
}
