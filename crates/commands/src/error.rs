use {
    relaybot_common::{ChannelId, ServerId},
    relaybot_topology::Error as TopologyError,
    thiserror::Error,
};

/// Everything a command can fail with. The display text is what the user
/// sees in the reply.
#[derive(Debug, Error)]
pub enum CommandError {
    #[error("You need the **Manage Server** permission on server `{server}` to do that.")]
    Authorization { server: ServerId },

    #[error("I can't find a server channel with ID `{channel}`.")]
    NotFound { channel: ChannelId },

    #[error("{what} already exists.")]
    AlreadyExists { what: String },

    #[error("{what}")]
    NotLinked { what: String },

    #[error(
        "I do not have permission to manage webhooks in <#{channel}>. Please grant me **Manage \
         Webhooks** there and try again."
    )]
    PermissionDenied { channel: ChannelId },

    #[error("The chat platform is having trouble right now ({message}). Please try again later.")]
    Transient { message: String },

    #[error("I couldn't save that change ({message}), so nothing was changed.")]
    Persistence { message: String },

    #[error("Usage: `{usage}`")]
    Usage { usage: &'static str },

    #[error("{message}")]
    InvalidArgument { message: String },

    #[error("Unknown key: `{key}`")]
    UnknownKey { key: String },

    #[error("Unknown command: `{name}`. Try `help`.")]
    UnknownCommand { name: String },

    #[error("A channel can't be related to itself.")]
    SelfReference,
}

impl CommandError {
    #[must_use]
    pub fn invalid_argument(message: impl Into<String>) -> Self {
        Self::InvalidArgument {
            message: message.into(),
        }
    }

    #[must_use]
    pub fn not_linked(what: impl Into<String>) -> Self {
        Self::NotLinked { what: what.into() }
    }

    #[must_use]
    pub fn already_exists(what: impl Into<String>) -> Self {
        Self::AlreadyExists { what: what.into() }
    }
}

impl From<TopologyError> for CommandError {
    fn from(error: TopologyError) -> Self {
        match error {
            TopologyError::SelfReference { .. } => Self::SelfReference,
            TopologyError::AlreadyExists { what } => Self::AlreadyExists { what },
            TopologyError::NotLinked { what } => Self::NotLinked { what },
            TopologyError::EmptyPrefix => Self::invalid_argument("A prefix can't be empty."),
            TopologyError::UnknownKey { key } => Self::UnknownKey { key },
            TopologyError::InvalidValue { key, reason } => {
                Self::invalid_argument(format!("Invalid value for `{key}`: {reason}."))
            },
            other => Self::Persistence {
                message: other.to_string(),
            },
        }
    }
}

pub type Result<T> = std::result::Result<T, CommandError>;
