use std::path::{Path, PathBuf};

use {secrecy::Secret, tracing::debug};

use crate::{env_subst::substitute_env, schema::BotConfig};

/// Standard config file names, checked in order.
const CONFIG_FILENAMES: &[&str] = &[
    "relaybot.toml",
    "relaybot.yaml",
    "relaybot.yml",
    "relaybot.json",
];

/// Load config from the given path (any supported format).
pub fn load_config(path: &Path) -> anyhow::Result<BotConfig> {
    let raw = std::fs::read_to_string(path)
        .map_err(|e| anyhow::anyhow!("failed to read {}: {e}", path.display()))?;
    let raw = substitute_env(&raw);
    parse_config(&raw, path)
}

/// Load config from `explicit`, or else from the first file found in the
/// standard locations.
///
/// Search order when no path is given:
/// 1. `./relaybot.{toml,yaml,yml,json}` (project-local)
/// 2. `~/.config/relaybot/relaybot.{toml,yaml,yml,json}` (user-global)
///
/// Falls back to `BotConfig::default()` only when no file exists; a file
/// that fails to parse is an error. Environment overrides are applied in
/// every case.
pub fn discover_and_load(explicit: Option<&Path>) -> anyhow::Result<BotConfig> {
    let path = explicit.map(Path::to_path_buf).or_else(find_config_file);
    let mut config = match path {
        Some(path) => {
            debug!(path = %path.display(), "loading config");
            load_config(&path)?
        },
        None => {
            debug!("no config file found, using defaults");
            BotConfig::default()
        },
    };
    apply_env_overrides(&mut config);
    Ok(config)
}

/// Apply `RELAYBOT_*` environment variables on top of a loaded config.
pub fn apply_env_overrides(config: &mut BotConfig) {
    apply_env_overrides_with(config, |name| std::env::var(name).ok());
}

fn apply_env_overrides_with(config: &mut BotConfig, lookup: impl Fn(&str) -> Option<String>) {
    if let Some(token) = lookup("RELAYBOT_TOKEN").filter(|t| !t.is_empty()) {
        config.token = Secret::new(token);
    }
    if let Some(dir) = lookup("RELAYBOT_DATA_DIR").filter(|d| !d.is_empty()) {
        config.data_dir = PathBuf::from(dir);
    }
}

/// Find the first config file in standard locations.
pub fn find_config_file() -> Option<PathBuf> {
    // Project-local
    for name in CONFIG_FILENAMES {
        let p = PathBuf::from(name);
        if p.exists() {
            return Some(p);
        }
    }

    // User-global: ~/.config/relaybot/
    if let Some(config_dir) = config_dir() {
        for name in CONFIG_FILENAMES {
            let p = config_dir.join(name);
            if p.exists() {
                return Some(p);
            }
        }
    }

    None
}

/// Returns the user-global config directory (`~/.config/relaybot/`).
pub fn config_dir() -> Option<PathBuf> {
    directories::ProjectDirs::from("", "", "relaybot").map(|d| d.config_dir().to_path_buf())
}

fn parse_config(raw: &str, path: &Path) -> anyhow::Result<BotConfig> {
    let ext = path.extension().and_then(|e| e.to_str()).unwrap_or("toml");

    match ext {
        "toml" => Ok(toml::from_str(raw)?),
        "yaml" | "yml" => Ok(serde_yaml::from_str(raw)?),
        "json" => Ok(serde_json::from_str(raw)?),
        _ => anyhow::bail!("unsupported config format: .{ext}"),
    }
}
