//! In-memory persistence for tests and offline tooling.

use std::{
    collections::BTreeMap,
    sync::{
        Mutex,
        atomic::{AtomicBool, AtomicUsize, Ordering},
    },
};

use {async_trait::async_trait, relaybot_common::ServerId};

use crate::{Error, Relations, Result, ServerConfig, persist::TopologyPersistence};

/// Keeps the last saved state in memory. Writes can be made to fail on
/// demand to exercise error paths.
#[derive(Default)]
pub struct InMemoryStore {
    relations: Mutex<Relations>,
    servers: Mutex<BTreeMap<ServerId, ServerConfig>>,
    fail_writes: AtomicBool,
    broken_servers: Mutex<Vec<ServerId>>,
    saves: AtomicUsize,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_relations(relations: Relations) -> Self {
        Self {
            relations: Mutex::new(relations),
            ..Self::default()
        }
    }

    /// Make every subsequent write fail until switched off again.
    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    /// Make loading this server's configuration fail.
    pub fn break_server(&self, server: &ServerId) {
        self.broken_servers
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(server.clone());
    }

    pub fn insert_server(&self, server: &ServerId, config: ServerConfig) {
        self.servers
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(server.clone(), config);
    }

    /// The relations as last saved.
    pub fn saved_relations(&self) -> Relations {
        self.relations
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    /// Number of successful writes so far.
    pub fn save_count(&self) -> usize {
        self.saves.load(Ordering::SeqCst)
    }

    fn check_writable(&self) -> Result<()> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(Error::message("in-memory store is read-only"));
        }
        Ok(())
    }
}

#[async_trait]
impl TopologyPersistence for InMemoryStore {
    async fn load_relations(&self) -> Result<Relations> {
        Ok(self.saved_relations())
    }

    async fn save_relations(&self, relations: &Relations) -> Result<()> {
        self.check_writable()?;
        *self.relations.lock().unwrap_or_else(|e| e.into_inner()) = relations.clone();
        self.saves.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn list_servers(&self) -> Result<Vec<ServerId>> {
        let servers = self.servers.lock().unwrap_or_else(|e| e.into_inner());
        let broken = self.broken_servers.lock().unwrap_or_else(|e| e.into_inner());
        let mut ids: Vec<ServerId> = servers.keys().chain(broken.iter()).cloned().collect();
        ids.sort();
        ids.dedup();
        Ok(ids)
    }

    async fn load_server(&self, server: &ServerId) -> Result<Option<ServerConfig>> {
        let broken = self.broken_servers.lock().unwrap_or_else(|e| e.into_inner());
        if broken.contains(server) {
            return Err(Error::message(format!("config for server {server} is unreadable")));
        }
        drop(broken);
        let servers = self.servers.lock().unwrap_or_else(|e| e.into_inner());
        Ok(servers.get(server).cloned())
    }

    async fn save_server(&self, server: &ServerId, config: &ServerConfig) -> Result<()> {
        self.check_writable()?;
        self.insert_server(server, config.clone());
        self.saves.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}
