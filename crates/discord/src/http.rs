//! REST side of the Discord integration.

use std::sync::Arc;

use {
    async_trait::async_trait,
    relaybot_channels::{
        Authorizer, ChannelDirectory, ChannelInfo, ChannelOutbound, Delivery, DeliveryRequest,
        Embed, Endpoint, EndpointProvider, Error, MAX_CONTENT_CHARS, Result,
        truncate_chars,
    },
    relaybot_common::{ChannelId, ServerId, UserId},
    secrecy::{ExposeSecret, Secret},
    serenity::all::{
        self as discord, CreateAllowedMentions, CreateEmbed, CreateEmbedFooter, CreateMessage,
        CreateWebhook, GuildId, Http, Permissions, Timestamp, Webhook, WebhookId,
    },
    serde_json::json,
    tracing::debug,
};

const MAX_USERNAME: usize = 80;
const MAX_EMBEDS: usize = 10;

/// Substrings Discord refuses in webhook usernames.
const RESERVED_NAMES: &[&str] = &["discord", "clyde"];

pub struct DiscordHttp {
    http: Arc<Http>,
}

impl DiscordHttp {
    pub fn new(http: Arc<Http>) -> Self {
        Self { http }
    }
}

/// Parse a stored identifier into a Discord snowflake.
///
/// Anything that is not a non-zero integer cannot name a Discord object.
fn snowflake(kind: &str, id: &str) -> Result<u64> {
    match id.parse::<u64>() {
        Ok(n) if n != 0 => Ok(n),
        _ => Err(Error::not_found(format!("{kind} {id}"))),
    }
}

fn channel_id(channel: &ChannelId) -> Result<discord::ChannelId> {
    snowflake("channel", channel.as_str()).map(discord::ChannelId::new)
}

/// Map a serenity failure onto an error class.
///
/// Network failures never include the request URL, which carries webhook
/// tokens.
fn classify(what: &str, err: serenity::Error) -> Error {
    match err {
        serenity::Error::Http(http) => match http.status_code() {
            Some(status) => Error::from_status(status.as_u16(), &http.to_string()),
            None => Error::transient(format!("{what}: request failed")),
        },
        other => Error::Rejected {
            status: 0,
            message: format!("{what}: {other}"),
        },
    }
}

/// Webhooks created by other integrations carry no token and cannot be
/// executed by the bot.
fn to_endpoint(hook: &Webhook, channel: &ChannelId) -> Option<Endpoint> {
    let url = hook.url().ok()?;
    let token = url.rsplit('/').next().filter(|t| !t.is_empty())?;
    Some(Endpoint {
        id: hook.id.get().to_string(),
        name: hook.name.clone().unwrap_or_default(),
        channel_id: hook
            .channel_id
            .map_or_else(|| channel.clone(), |c| ChannelId::from(c.get())),
        token: Secret::new(token.to_string()),
    })
}

/// Make a display name acceptable as a webhook username.
fn webhook_username(name: &str) -> Option<String> {
    let mut cleaned = name.to_string();
    for reserved in RESERVED_NAMES {
        while let Some(pos) = cleaned.to_ascii_lowercase().find(reserved) {
            cleaned.replace_range(pos..pos + reserved.len(), "");
        }
    }
    let cleaned = truncate_chars(cleaned.trim(), MAX_USERNAME).trim();
    (!cleaned.is_empty()).then(|| cleaned.to_string())
}

/// Execute-webhook body. Relayed copies never ping anyone.
fn webhook_body(request: &DeliveryRequest) -> serde_json::Value {
    let mut body = json!({
        "allowed_mentions": CreateAllowedMentions::new(),
    });
    if let Some(obj) = body.as_object_mut() {
        if !request.content.is_empty() {
            obj.insert(
                "content".into(),
                truncate_chars(&request.content, MAX_CONTENT_CHARS).into(),
            );
        }
        if let Some(username) = webhook_username(&request.username) {
            obj.insert("username".into(), username.into());
        }
        if let Some(avatar) = &request.avatar_url {
            obj.insert("avatar_url".into(), avatar.as_str().into());
        }
        if !request.embeds.is_empty() {
            let embeds: Vec<_> = request.embeds.iter().take(MAX_EMBEDS).cloned().collect();
            obj.insert("embeds".into(), embeds.into());
        }
    }
    body
}

fn create_embed(embed: &Embed) -> CreateEmbed {
    let mut out = CreateEmbed::new();
    if let Some(title) = &embed.title {
        out = out.title(title.as_str());
    }
    if let Some(description) = &embed.description {
        out = out.description(description.as_str());
    }
    if let Some(color) = embed.color {
        out = out.colour(color);
    }
    if let Some(footer) = &embed.footer {
        out = out.footer(CreateEmbedFooter::new(footer.text.as_str()));
    }
    if let Some(at) = embed
        .timestamp
        .as_deref()
        .and_then(|t| Timestamp::parse(t).ok())
    {
        out = out.timestamp(at);
    }
    out
}

#[async_trait]
impl EndpointProvider for DiscordHttp {
    async fn list_endpoints(&self, channel: &ChannelId) -> Result<Vec<Endpoint>> {
        let hooks = channel_id(channel)?
            .webhooks(&self.http)
            .await
            .map_err(|e| classify("list webhooks", e))?;
        Ok(hooks
            .iter()
            .filter_map(|hook| to_endpoint(hook, channel))
            .collect())
    }

    async fn create_endpoint(&self, channel: &ChannelId, name: &str) -> Result<Endpoint> {
        let hook = channel_id(channel)?
            .create_webhook(&self.http, CreateWebhook::new(name))
            .await
            .map_err(|e| classify("create webhook", e))?;
        debug!(%channel, webhook_id = %hook.id, "created webhook");
        to_endpoint(&hook, channel).ok_or_else(|| Error::Rejected {
            status: 200,
            message: "created webhook has no token".into(),
        })
    }

    async fn delete_endpoint(&self, endpoint: &Endpoint) -> Result<()> {
        let id = WebhookId::new(snowflake("webhook", &endpoint.id)?);
        self.http
            .delete_webhook_with_token(id, endpoint.token.expose_secret(), None)
            .await
            .map_err(|e| classify("delete webhook", e))
    }
}

#[async_trait]
impl Delivery for DiscordHttp {
    async fn deliver(&self, endpoint: &Endpoint, request: &DeliveryRequest) -> Result<()> {
        let id = WebhookId::new(snowflake("webhook", &endpoint.id)?);
        self.http
            .execute_webhook(
                id,
                None,
                endpoint.token.expose_secret(),
                true,
                Vec::new(),
                &webhook_body(request),
            )
            .await
            .map_err(|e| classify("execute webhook", e))?;
        Ok(())
    }
}

#[async_trait]
impl ChannelDirectory for DiscordHttp {
    async fn resolve(&self, channel: &ChannelId) -> Result<ChannelInfo> {
        let found = self
            .http
            .get_channel(channel_id(channel)?)
            .await
            .map_err(|e| classify("get channel", e))?;
        Ok(match found.guild() {
            Some(guild_channel) => ChannelInfo {
                id: channel.clone(),
                server_id: Some(ServerId::from(guild_channel.guild_id.get())),
                name: guild_channel.name,
            },
            None => ChannelInfo {
                id: channel.clone(),
                server_id: None,
                name: String::new(),
            },
        })
    }
}

#[async_trait]
impl Authorizer for DiscordHttp {
    async fn can_manage(&self, user: &UserId, server: &ServerId) -> Result<bool> {
        let guild_id = GuildId::new(snowflake("server", server.as_str())?);
        let user_id = discord::UserId::new(snowflake("user", user.as_str())?);
        let guild = self
            .http
            .get_guild(guild_id)
            .await
            .map_err(|e| classify("get guild", e))?;
        if guild.owner_id == user_id {
            return Ok(true);
        }
        let member = match self.http.get_member(guild_id, user_id).await {
            Ok(member) => member,
            Err(e) => {
                return match classify("get member", e) {
                    Error::NotFound { .. } => Ok(false),
                    other => Err(other),
                };
            },
        };
        Ok(guild
            .member_permissions(&member)
            .intersects(Permissions::ADMINISTRATOR | Permissions::MANAGE_GUILD))
    }
}

#[async_trait]
impl ChannelOutbound for DiscordHttp {
    async fn send_text(&self, channel: &ChannelId, text: &str) -> Result<()> {
        let message = CreateMessage::new()
            .content(truncate_chars(text, MAX_CONTENT_CHARS))
            .allowed_mentions(CreateAllowedMentions::new().all_users(true));
        channel_id(channel)?
            .send_message(&self.http, message)
            .await
            .map_err(|e| classify("send message", e))?;
        Ok(())
    }

    async fn send_embed(&self, channel: &ChannelId, embed: &Embed) -> Result<()> {
        channel_id(channel)?
            .send_message(&self.http, CreateMessage::new().embed(create_embed(embed)))
            .await
            .map_err(|e| classify("send embed", e))?;
        Ok(())
    }
}
