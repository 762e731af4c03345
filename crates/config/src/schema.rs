/// Bot configuration schema (credentials, storage, relay policy).
use std::path::PathBuf;

use {
    relaybot_common::{ChannelId, UserId},
    secrecy::{ExposeSecret, Secret},
    serde::{Deserialize, Serialize},
};

pub const DEFAULT_ENDPOINT_NAME: &str = "_relay";

/// Root configuration.
#[derive(Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BotConfig {
    /// Bot token used for both the gateway and REST calls.
    #[serde(serialize_with = "serialize_secret")]
    pub token: Secret<String>,

    /// User that may manage relays on every server regardless of permissions.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub owner_id: Option<UserId>,

    /// Channel that receives forwarded log records.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub log_channel: Option<ChannelId>,

    /// Minimum level forwarded to `log_channel`.
    pub log_channel_level: LogLevel,

    /// Directory holding the persisted topology and per-server configs.
    pub data_dir: PathBuf,

    /// Name given to provisioned webhooks so they can be found again.
    pub endpoint_name: String,

    pub relay: RelayConfig,

    /// Replaces the built-in message posted when joining a server.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub welcome_message: Option<String>,

    /// Replaces the built-in `help` reply.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub help_message: Option<String>,
}

impl std::fmt::Debug for BotConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BotConfig")
            .field("token", &"[REDACTED]")
            .field("owner_id", &self.owner_id)
            .field("log_channel", &self.log_channel)
            .field("data_dir", &self.data_dir)
            .field("endpoint_name", &self.endpoint_name)
            .finish_non_exhaustive()
    }
}

impl Default for BotConfig {
    fn default() -> Self {
        Self {
            token: Secret::new(String::new()),
            owner_id: None,
            log_channel: None,
            log_channel_level: LogLevel::default(),
            data_dir: PathBuf::from("data"),
            endpoint_name: DEFAULT_ENDPOINT_NAME.into(),
            relay: RelayConfig::default(),
            welcome_message: None,
            help_message: None,
        }
    }
}

impl BotConfig {
    /// Fail fast on settings the service cannot run without.
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.token.expose_secret().trim().is_empty() {
            anyhow::bail!("bot token is required (set `token` or RELAYBOT_TOKEN)");
        }
        if self.endpoint_name.trim().is_empty() {
            anyhow::bail!("endpoint_name must not be empty");
        }
        Ok(())
    }
}

/// Retry policy for transient upstream failures.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RelayConfig {
    /// Extra attempts after the first transient failure.
    pub transient_retries: u32,
    /// Delay before the first retry; doubles on each further attempt.
    pub retry_backoff_ms: u64,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            transient_retries: 2,
            retry_backoff_ms: 500,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Info,
    #[default]
    Warn,
    Error,
}

fn serialize_secret<S: serde::Serializer>(
    secret: &Secret<String>,
    serializer: S,
) -> Result<S::Ok, S::Error> {
    serializer.serialize_str(secret.expose_secret())
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config() {
        let cfg = BotConfig::default();
        assert_eq!(cfg.endpoint_name, "_relay");
        assert_eq!(cfg.data_dir, PathBuf::from("data"));
        assert_eq!(cfg.log_channel_level, LogLevel::Warn);
        assert_eq!(cfg.relay.transient_retries, 2);
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn deserialize_from_toml() {
        let raw = r#"
            token = "abc.def"
            owner_id = "109"
            log_channel = "555"
            log_channel_level = "error"

            [relay]
            transient_retries = 5
        "#;
        let cfg: BotConfig = toml::from_str(raw).unwrap();
        assert_eq!(cfg.token.expose_secret(), "abc.def");
        assert_eq!(cfg.owner_id, Some(UserId::from("109")));
        assert_eq!(cfg.log_channel, Some(ChannelId::from("555")));
        assert_eq!(cfg.log_channel_level, LogLevel::Error);
        assert_eq!(cfg.relay.transient_retries, 5);
        // defaults for unspecified fields
        assert_eq!(cfg.relay.retry_backoff_ms, 500);
        assert_eq!(cfg.endpoint_name, DEFAULT_ENDPOINT_NAME);
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn debug_redacts_token() {
        let cfg = BotConfig {
            token: Secret::new("super-secret".into()),
            ..Default::default()
        };
        let rendered = format!("{cfg:?}");
        assert!(!rendered.contains("super-secret"));
        assert!(rendered.contains("[REDACTED]"));
    }
}
