//! YAML file-backed persistence with atomic writes.
//!
//! ```text
//! <data_dir>/channels.yml
//! <data_dir>/relays.yml
//! <data_dir>/groups.yml
//! <data_dir>/prefixes.yml
//! <data_dir>/<server_id>/config.yml
//! ```

use std::{
    collections::BTreeMap,
    path::{Path, PathBuf},
};

use {
    async_trait::async_trait,
    relaybot_common::{ChannelId, ServerId},
    serde::{Serialize, de::DeserializeOwned},
    tokio::fs,
    tracing::{debug, warn},
};

use crate::{Relations, Result, ServerConfig, error::Context, persist::TopologyPersistence};

const CHANNELS_FILE: &str = "channels.yml";
const RELAYS_FILE: &str = "relays.yml";
const GROUPS_FILE: &str = "groups.yml";
const PREFIXES_FILE: &str = "prefixes.yml";
const SERVER_CONFIG_FILE: &str = "config.yml";

pub struct FileStore {
    data_dir: PathBuf,
}

impl FileStore {
    pub fn new(data_dir: impl Into<PathBuf>) -> Self {
        Self {
            data_dir: data_dir.into(),
        }
    }

    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }

    fn server_path(&self, server: &ServerId) -> PathBuf {
        self.data_dir.join(server.as_str()).join(SERVER_CONFIG_FILE)
    }

    /// A missing file reads as the empty value.
    async fn read_yaml<T: DeserializeOwned + Default>(&self, path: &Path) -> Result<T> {
        if !fs::try_exists(path).await.unwrap_or(false) {
            return Ok(T::default());
        }
        let data = fs::read_to_string(path).await?;
        if data.trim().is_empty() {
            return Ok(T::default());
        }
        serde_yaml::from_str(&data).with_context(|| format!("failed to parse {}", path.display()))
    }
}

fn tmp_path(path: &Path) -> PathBuf {
    let mut name = path.file_name().map(|n| n.to_os_string()).unwrap_or_default();
    name.push(".tmp");
    path.with_file_name(name)
}

/// Write every file to a temp sibling first and only then rename them into
/// place, so a failure while serializing or writing leaves all targets intact.
async fn atomic_write_all(files: &[(PathBuf, String)]) -> Result<()> {
    for (path, _) in files {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).await?;
        }
    }

    let mut written = Vec::with_capacity(files.len());
    for (path, body) in files {
        let tmp = tmp_path(path);
        if let Err(e) = fs::write(&tmp, body.as_bytes()).await {
            for stale in &written {
                let _ = fs::remove_file(stale).await;
            }
            let _ = fs::remove_file(&tmp).await;
            return Err(e.into());
        }
        written.push(tmp);
    }

    for ((path, _), tmp) in files.iter().zip(&written) {
        fs::rename(tmp, path).await?;
    }
    Ok(())
}

fn to_yaml<T: Serialize>(value: &T) -> Result<String> {
    Ok(serde_yaml::to_string(value)?)
}

#[async_trait]
impl TopologyPersistence for FileStore {
    async fn load_relations(&self) -> Result<Relations> {
        let dir = &self.data_dir;
        Ok(Relations {
            channels: self.read_yaml(&dir.join(CHANNELS_FILE)).await?,
            relays: self.read_yaml(&dir.join(RELAYS_FILE)).await?,
            groups: self.read_yaml(&dir.join(GROUPS_FILE)).await?,
            prefixes: self
                .read_yaml::<BTreeMap<ChannelId, BTreeMap<String, ChannelId>>>(
                    &dir.join(PREFIXES_FILE),
                )
                .await?,
        })
    }

    async fn save_relations(&self, relations: &Relations) -> Result<()> {
        let dir = &self.data_dir;
        let files = vec![
            (dir.join(CHANNELS_FILE), to_yaml(&relations.channels)?),
            (dir.join(RELAYS_FILE), to_yaml(&relations.relays)?),
            (dir.join(GROUPS_FILE), to_yaml(&relations.groups)?),
            (dir.join(PREFIXES_FILE), to_yaml(&relations.prefixes)?),
        ];
        atomic_write_all(&files).await?;
        debug!(dir = %dir.display(), "saved relations");
        Ok(())
    }

    async fn list_servers(&self) -> Result<Vec<ServerId>> {
        if !fs::try_exists(&self.data_dir).await.unwrap_or(false) {
            return Ok(Vec::new());
        }
        let mut entries = fs::read_dir(&self.data_dir).await?;
        let mut servers = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            if !entry.file_type().await?.is_dir() {
                continue;
            }
            let name = entry.file_name();
            let Some(name) = name.to_str() else {
                continue;
            };
            if !name.is_empty() && name.bytes().all(|b| b.is_ascii_digit()) {
                servers.push(ServerId::from(name));
            } else {
                debug!(dir = name, "skipping non-server directory");
            }
        }
        servers.sort();
        Ok(servers)
    }

    async fn load_server(&self, server: &ServerId) -> Result<Option<ServerConfig>> {
        let path = self.server_path(server);
        if !fs::try_exists(&path).await.unwrap_or(false) {
            return Ok(None);
        }
        let config: ServerConfig = self.read_yaml(&path).await?;
        Ok(Some(config))
    }

    async fn save_server(&self, server: &ServerId, config: &ServerConfig) -> Result<()> {
        let path = self.server_path(server);
        atomic_write_all(&[(path, to_yaml(config)?)])
            .await
            .inspect_err(|e| warn!(%server, error = %e, "failed to save server config"))
    }
}
