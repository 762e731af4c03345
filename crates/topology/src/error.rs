use thiserror::Error;

use relaybot_common::ChannelId;

#[derive(Debug, Error)]
pub enum Error {
    /// A relationship would point a channel at itself.
    #[error("a channel cannot be related to itself ({channel})")]
    SelfReference { channel: ChannelId },

    #[error("{what} already exists")]
    AlreadyExists { what: String },

    #[error("{what} does not exist")]
    NotLinked { what: String },

    #[error("prefix must not be empty")]
    EmptyPrefix,

    #[error("unknown config key: {key}")]
    UnknownKey { key: String },

    #[error("invalid value for {key}: {reason}")]
    InvalidValue { key: String, reason: String },

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Yaml(#[from] serde_yaml::Error),

    #[error("{message}")]
    Message { message: String },

    #[error("{context}: {source}")]
    External {
        context: String,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },
}

impl Error {
    #[must_use]
    pub fn message(message: impl Into<String>) -> Self {
        Self::Message {
            message: message.into(),
        }
    }

    #[must_use]
    pub fn self_reference(channel: &ChannelId) -> Self {
        Self::SelfReference {
            channel: channel.clone(),
        }
    }

    #[must_use]
    pub fn already_exists(what: impl Into<String>) -> Self {
        Self::AlreadyExists { what: what.into() }
    }

    #[must_use]
    pub fn not_linked(what: impl Into<String>) -> Self {
        Self::NotLinked { what: what.into() }
    }

    #[must_use]
    pub fn unknown_key(key: impl Into<String>) -> Self {
        Self::UnknownKey { key: key.into() }
    }

    #[must_use]
    pub fn invalid_value(key: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidValue {
            key: key.into(),
            reason: reason.into(),
        }
    }

    #[must_use]
    pub fn external(
        context: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::External {
            context: context.into(),
            source: Box::new(source),
        }
    }

    /// Whether this error came from the persistence backend rather than
    /// from a rejected mutation.
    pub fn is_storage(&self) -> bool {
        matches!(
            self,
            Self::Io(_) | Self::Yaml(_) | Self::External { .. } | Self::Message { .. }
        )
    }
}

impl relaybot_common::FromMessage for Error {
    fn from_message(message: String) -> Self {
        Self::Message { message }
    }
}

pub type Result<T> = std::result::Result<T, Error>;

relaybot_common::impl_context!();
