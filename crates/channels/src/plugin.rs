use std::fmt;

use {
    async_trait::async_trait,
    relaybot_common::{ChannelId, ServerId, UserId},
    secrecy::{ExposeSecret, Secret},
};

use crate::{Embed, Result};

/// A per-channel delivery endpoint (a webhook, on Discord).
#[derive(Clone)]
pub struct Endpoint {
    pub id: String,
    pub name: String,
    pub channel_id: ChannelId,
    pub token: Secret<String>,
}

impl fmt::Debug for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Endpoint")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("channel_id", &self.channel_id)
            .field("token", &"[REDACTED]")
            .finish()
    }
}

impl PartialEq for Endpoint {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
            && self.name == other.name
            && self.channel_id == other.channel_id
            && self.token.expose_secret() == other.token.expose_secret()
    }
}

/// Longest message body a platform accepts, in characters.
pub const MAX_CONTENT_CHARS: usize = 2000;

/// Cut `text` to at most `max` characters.
pub fn truncate_chars(text: &str, max: usize) -> &str {
    match text.char_indices().nth(max) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}

/// One message posted through an endpoint under a borrowed identity.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DeliveryRequest {
    pub content: String,
    pub username: String,
    pub avatar_url: Option<String>,
    pub embeds: Vec<serde_json::Value>,
}

impl DeliveryRequest {
    pub fn is_empty(&self) -> bool {
        self.content.trim().is_empty() && self.embeds.is_empty()
    }
}

/// What the platform reports about a channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelInfo {
    pub id: ChannelId,
    /// `None` for direct-message channels.
    pub server_id: Option<ServerId>,
    pub name: String,
}

/// Manage delivery endpoints of a channel.
#[async_trait]
pub trait EndpointProvider: Send + Sync {
    async fn list_endpoints(&self, channel: &ChannelId) -> Result<Vec<Endpoint>>;
    async fn create_endpoint(&self, channel: &ChannelId, name: &str) -> Result<Endpoint>;
    async fn delete_endpoint(&self, endpoint: &Endpoint) -> Result<()>;
}

/// Post a message through an endpoint.
#[async_trait]
pub trait Delivery: Send + Sync {
    async fn deliver(&self, endpoint: &Endpoint, request: &DeliveryRequest) -> Result<()>;
}

/// Look up channels. Unknown channels resolve to [`crate::Error::NotFound`].
#[async_trait]
pub trait ChannelDirectory: Send + Sync {
    async fn resolve(&self, channel: &ChannelId) -> Result<ChannelInfo>;
}

/// Decide whether a user may manage relays on a server.
#[async_trait]
pub trait Authorizer: Send + Sync {
    async fn can_manage(&self, user: &UserId, server: &ServerId) -> Result<bool>;
}

/// Post as the bot itself.
#[async_trait]
pub trait ChannelOutbound: Send + Sync {
    async fn send_text(&self, channel: &ChannelId, text: &str) -> Result<()>;
    async fn send_embed(&self, channel: &ChannelId, embed: &Embed) -> Result<()>;
}

/// The full platform surface.
pub trait Platform:
    EndpointProvider + Delivery + ChannelDirectory + Authorizer + ChannelOutbound
{
}

impl<T> Platform for T where
    T: EndpointProvider + Delivery + ChannelDirectory + Authorizer + ChannelOutbound
{
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn endpoint_debug_hides_token() {
        let endpoint = Endpoint {
            id: "1".into(),
            name: "_relay".into(),
            channel_id: ChannelId::from("2"),
            token: Secret::new("hunter2".into()),
        };
        let debug = format!("{endpoint:?}");
        assert!(!debug.contains("hunter2"));
        assert!(debug.contains("_relay"));
    }

    #[test]
    fn whitespace_only_request_is_empty() {
        let mut request = DeliveryRequest {
            content: "  \n".into(),
            ..Default::default()
        };
        assert!(request.is_empty());
        request.embeds.push(serde_json::json!({"title": "x"}));
        assert!(!request.is_empty());
    }
}
