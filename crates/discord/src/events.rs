//! The typed events relaybot reacts to, and their conversion from serenity
//! models.

use {
    relaybot_common::{Attachment, Author, ChannelId, InboundMessage, ServerId, UserId},
    serenity::all::{Message, User},
};

#[derive(Debug, Clone)]
pub enum GatewayEvent {
    /// The session is established.
    Ready {
        bot_id: UserId,
        servers: Vec<ServerId>,
    },
    /// A server the bot was already in became available.
    ServerAvailable { server_id: ServerId },
    /// The bot was added to a server.
    ServerJoined {
        server_id: ServerId,
        name: Option<String>,
        system_channel: Option<ChannelId>,
    },
    Message(InboundMessage),
}

/// Classify a `GUILD_CREATE`.
///
/// The gateway sends one for every server listed in `READY`, again when a
/// server recovers from an outage, and when the bot is added somewhere new.
/// Only the last case has `is_new` set by the cache.
pub fn server_event(
    server_id: ServerId,
    name: &str,
    system_channel: Option<ChannelId>,
    is_new: Option<bool>,
) -> GatewayEvent {
    if is_new == Some(true) {
        GatewayEvent::ServerJoined {
            server_id,
            name: (!name.is_empty()).then(|| name.to_string()),
            system_channel,
        }
    } else {
        GatewayEvent::ServerAvailable { server_id }
    }
}

/// Identity shown on relayed copies: the global display name when set,
/// the account's avatar or its default one.
pub fn author_of(user: &User) -> Author {
    let name = user
        .global_name
        .as_deref()
        .filter(|n| !n.is_empty())
        .unwrap_or(&user.name);
    Author {
        id: UserId::from(user.id.get()),
        name: name.to_string(),
        discriminator: user.discriminator.map(|d| format!("{d:04}")),
        avatar_url: Some(user.face()),
        bot: user.bot,
    }
}

pub fn inbound_message(message: &Message) -> InboundMessage {
    InboundMessage {
        server_id: message.guild_id.map(|g| ServerId::from(g.get())),
        channel_id: ChannelId::from(message.channel_id.get()),
        author: author_of(&message.author),
        content: message.content.clone(),
        attachments: message
            .attachments
            .iter()
            .map(|a| Attachment {
                url: a.url.clone(),
                filename: a.filename.clone(),
            })
            .collect(),
        embeds: message
            .embeds
            .iter()
            .filter_map(|e| serde_json::to_value(e).ok())
            .collect(),
        webhook_id: message.webhook_id.map(|w| w.get().to_string()),
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use {super::*, serde_json::json};

    fn user(global_name: Option<&str>) -> User {
        serde_json::from_value(json!({
            "id": "7",
            "username": "alice",
            "global_name": global_name,
            "discriminator": "0001",
            "avatar": null,
            "bot": false,
        }))
        .unwrap()
    }

    #[test]
    fn author_prefers_global_name() {
        let author = author_of(&user(Some("Alice A.")));
        assert_eq!(author.id, UserId::from("7"));
        assert_eq!(author.name, "Alice A.");
        assert_eq!(author.tag(), "Alice A.#0001");
        assert!(
            author
                .avatar_url
                .unwrap()
                .starts_with("https://cdn.discordapp.com/embed/avatars/")
        );
    }

    #[test]
    fn author_falls_back_to_username() {
        assert_eq!(author_of(&user(None)).name, "alice");
        assert_eq!(author_of(&user(Some(""))).name, "alice");
    }

    #[test]
    fn only_new_servers_are_joins() {
        let joined = server_event(
            ServerId::from("11"),
            "new place",
            Some(ChannelId::from("500")),
            Some(true),
        );
        let GatewayEvent::ServerJoined {
            name,
            system_channel,
            ..
        } = joined
        else {
            panic!("expected join");
        };
        assert_eq!(name.as_deref(), Some("new place"));
        assert_eq!(system_channel, Some(ChannelId::from("500")));

        // Listed in READY, or back after an outage.
        for is_new in [Some(false), None] {
            let event = server_event(ServerId::from("10"), "home", None, is_new);
            assert!(matches!(event, GatewayEvent::ServerAvailable { .. }));
        }
    }
}
