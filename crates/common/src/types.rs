//! Identifier newtypes and the platform-neutral inbound message.
//!
//! Identifiers are opaque strings at this boundary. Parsing human input
//! (mentions, numeric strings) into identifiers is the command layer's job.

use std::fmt;

use serde::{Deserialize, Serialize};

macro_rules! id_type {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            pub fn new(id: impl Into<String>) -> Self {
                Self(id.into())
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<&str> for $name {
            fn from(id: &str) -> Self {
                Self(id.to_string())
            }
        }

        impl From<String> for $name {
            fn from(id: String) -> Self {
                Self(id)
            }
        }

        impl From<u64> for $name {
            fn from(id: u64) -> Self {
                Self(id.to_string())
            }
        }
    };
}

id_type!(
    /// Stable key of a channel on the chat platform.
    ChannelId
);
id_type!(
    /// Stable key of a server (guild).
    ServerId
);
id_type!(
    /// Stable key of a user account.
    UserId
);

/// Author identity carried through to relayed copies.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Author {
    pub id: UserId,
    pub name: String,
    #[serde(default)]
    pub discriminator: Option<String>,
    #[serde(default)]
    pub avatar_url: Option<String>,
    #[serde(default)]
    pub bot: bool,
}

impl Author {
    /// `name#discriminator`, or just the name for accounts without one.
    pub fn tag(&self) -> String {
        match self.discriminator.as_deref() {
            Some(d) if !d.is_empty() && d != "0" => format!("{}#{d}", self.name),
            _ => self.name.clone(),
        }
    }

    /// Mention markup that pings the author.
    pub fn mention(&self) -> String {
        format!("<@{}>", self.id)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Attachment {
    pub url: String,
    #[serde(default)]
    pub filename: String,
}

/// A message observed on the platform gateway.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InboundMessage {
    /// `None` for direct messages.
    pub server_id: Option<ServerId>,
    pub channel_id: ChannelId,
    pub author: Author,
    pub content: String,
    #[serde(default)]
    pub attachments: Vec<Attachment>,
    #[serde(default)]
    pub embeds: Vec<serde_json::Value>,
    /// Set when the message was posted through a webhook.
    #[serde(default)]
    pub webhook_id: Option<String>,
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;

    fn author(discriminator: Option<&str>) -> Author {
        Author {
            id: UserId::from(42u64),
            name: "alice".into(),
            discriminator: discriminator.map(String::from),
            avatar_url: None,
            bot: false,
        }
    }

    #[test]
    fn tag_includes_discriminator() {
        assert_eq!(author(Some("5318")).tag(), "alice#5318");
    }

    #[test]
    fn tag_omits_zero_discriminator() {
        assert_eq!(author(Some("0")).tag(), "alice");
        assert_eq!(author(None).tag(), "alice");
    }

    #[test]
    fn ids_serialize_as_plain_strings() {
        let id = ChannelId::from(123u64);
        assert_eq!(serde_json::to_string(&id).unwrap(), "\"123\"");
        let back: ChannelId = serde_json::from_str("\"123\"").unwrap();
        assert_eq!(back, id);
    }

    #[test]
    fn mention_markup() {
        assert_eq!(author(None).mention(), "<@42>");
    }
}
