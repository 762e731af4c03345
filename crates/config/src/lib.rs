//! Bot configuration loading and env substitution.
//!
//! Config files: `relaybot.toml`, `relaybot.yaml`, or `relaybot.json`
//! Searched in `./` then `~/.config/relaybot/`.
//!
//! Supports `${ENV_VAR}` substitution in all string values.

pub mod env_subst;
pub mod loader;
pub mod schema;

pub use {
    loader::{apply_env_overrides, config_dir, discover_and_load, find_config_file, load_config},
    schema::{BotConfig, LogLevel, RelayConfig},
};
