//! Per-server settings with a fixed key schema.

use std::collections::BTreeMap;

use {
    serde::{Deserialize, Serialize},
    tracing::debug,
};

use crate::{Error, Result};

/// Every key a server may configure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConfigKey {
    /// Characters a message must start with to be read as a command.
    ControlChars,
}

impl ConfigKey {
    pub const ALL: &'static [ConfigKey] = &[ConfigKey::ControlChars];

    pub fn name(self) -> &'static str {
        match self {
            Self::ControlChars => "control_chars",
        }
    }

    pub fn description(self) -> &'static str {
        match self {
            Self::ControlChars => {
                "Characters that all commands must be prefixed with. You can always mention me as well instead."
            },
        }
    }

    pub fn default_value(self) -> &'static str {
        match self {
            Self::ControlChars => ";",
        }
    }

    /// Case-insensitive lookup by key name.
    pub fn parse(name: &str) -> Option<Self> {
        let name = name.to_lowercase();
        Self::ALL.iter().copied().find(|key| key.name() == name)
    }

    fn validate(self, value: &str) -> Result<()> {
        match self {
            Self::ControlChars if value.trim().is_empty() => Err(Error::invalid_value(
                self.name(),
                "must contain at least one visible character",
            )),
            Self::ControlChars => Ok(()),
        }
    }
}

/// Configuration of one server. Missing keys read as their defaults.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "BTreeMap<String, String>", into = "BTreeMap<String, String>")]
pub struct ServerConfig {
    values: BTreeMap<ConfigKeyName, String>,
}

/// Keys are stored by name so the on-disk map stays plain text.
type ConfigKeyName = &'static str;

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            values: ConfigKey::ALL
                .iter()
                .map(|key| (key.name(), key.default_value().to_string()))
                .collect(),
        }
    }
}

impl ServerConfig {
    pub fn get(&self, key: ConfigKey) -> &str {
        self.values
            .get(key.name())
            .map(String::as_str)
            .unwrap_or_else(|| key.default_value())
    }

    /// Set a key by its user-facing name. Unknown names are rejected.
    pub fn set(&mut self, name: &str, value: impl Into<String>) -> Result<ConfigKey> {
        let key = ConfigKey::parse(name).ok_or_else(|| Error::unknown_key(name))?;
        let value = value.into();
        key.validate(&value)?;
        self.values.insert(key.name(), value);
        Ok(key)
    }

    pub fn control_chars(&self) -> &str {
        self.get(ConfigKey::ControlChars)
    }

    /// All keys with their current values, in schema order.
    pub fn entries(&self) -> impl Iterator<Item = (ConfigKey, &str)> {
        ConfigKey::ALL.iter().map(|key| (*key, self.get(*key)))
    }
}

impl From<BTreeMap<String, String>> for ServerConfig {
    fn from(raw: BTreeMap<String, String>) -> Self {
        let mut config = Self::default();
        for (name, value) in raw {
            match ConfigKey::parse(&name) {
                Some(key) if key.validate(&value).is_ok() => {
                    config.values.insert(key.name(), value);
                },
                Some(_) => debug!(key = %name, "ignoring invalid stored config value"),
                None => debug!(key = %name, "ignoring unknown stored config key"),
            }
        }
        config
    }
}

impl From<ServerConfig> for BTreeMap<String, String> {
    fn from(config: ServerConfig) -> Self {
        config
            .values
            .into_iter()
            .map(|(name, value)| (name.to_string(), value))
            .collect()
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use {super::*, rstest::rstest};

    #[test]
    fn defaults_to_semicolon() {
        assert_eq!(ServerConfig::default().control_chars(), ";");
    }

    #[rstest]
    #[case("control_chars")]
    #[case("CONTROL_CHARS")]
    #[case("Control_Chars")]
    fn key_names_are_case_insensitive(#[case] name: &str) {
        assert_eq!(ConfigKey::parse(name), Some(ConfigKey::ControlChars));
    }

    #[test]
    fn set_known_key() {
        let mut cfg = ServerConfig::default();
        assert_eq!(cfg.set("control_chars", "!!").unwrap(), ConfigKey::ControlChars);
        assert_eq!(cfg.control_chars(), "!!");
    }

    #[test]
    fn set_unknown_key_fails() {
        let mut cfg = ServerConfig::default();
        let err = cfg.set("colour", "blue").unwrap_err();
        assert!(matches!(err, Error::UnknownKey { key } if key == "colour"));
    }

    #[test]
    fn blank_control_chars_rejected() {
        let mut cfg = ServerConfig::default();
        assert!(cfg.set("control_chars", "  ").is_err());
        assert_eq!(cfg.control_chars(), ";");
    }

    #[test]
    fn yaml_roundtrip_fills_missing_and_drops_unknown() {
        let cfg: ServerConfig = serde_yaml::from_str("legacy: yes\n").unwrap();
        assert_eq!(cfg.control_chars(), ";");

        let mut cfg = ServerConfig::default();
        cfg.set("control_chars", "?").unwrap();
        let yaml = serde_yaml::to_string(&cfg).unwrap();
        assert!(yaml.contains("control_chars"));
        let back: ServerConfig = serde_yaml::from_str(&yaml).unwrap();
        assert_eq!(back, cfg);
    }
}
