//! Discord event handler for serenity.
//!
//! Forwards the gateway events relaybot cares about onto an mpsc channel.
//! All decisions are made by the receiver.

use {
    relaybot_common::{ChannelId, ServerId, UserId},
    serenity::{
        all::{Context, EventHandler, GatewayIntents, Guild, Message, Ready},
        async_trait,
    },
    tokio::sync::mpsc,
    tracing::{debug, info},
};

use crate::events::{GatewayEvent, inbound_message, server_event};

pub struct RelayHandler {
    events: mpsc::UnboundedSender<GatewayEvent>,
}

impl RelayHandler {
    pub fn new(events: mpsc::UnboundedSender<GatewayEvent>) -> Self {
        Self { events }
    }

    /// Required gateway intents for the bot.
    pub fn intents() -> GatewayIntents {
        GatewayIntents::GUILDS | GatewayIntents::GUILD_MESSAGES | GatewayIntents::MESSAGE_CONTENT
    }

    fn forward(&self, event: GatewayEvent) {
        if self.events.send(event).is_err() {
            debug!("event receiver gone, dropping gateway event");
        }
    }
}

#[async_trait]
impl EventHandler for RelayHandler {
    async fn ready(&self, _ctx: Context, ready: Ready) {
        info!(
            bot_name = %ready.user.name,
            guilds = ready.guilds.len(),
            "discord bot ready"
        );
        self.forward(GatewayEvent::Ready {
            bot_id: UserId::from(ready.user.id.get()),
            servers: ready
                .guilds
                .iter()
                .map(|g| ServerId::from(g.id.get()))
                .collect(),
        });
    }

    async fn guild_create(&self, _ctx: Context, guild: Guild, is_new: Option<bool>) {
        debug!(server_id = %guild.id, is_new = ?is_new, "guild create");
        self.forward(server_event(
            ServerId::from(guild.id.get()),
            &guild.name,
            guild.system_channel_id.map(|c| ChannelId::from(c.get())),
            is_new,
        ));
    }

    async fn message(&self, _ctx: Context, msg: Message) {
        self.forward(GatewayEvent::Message(inbound_message(&msg)));
    }
}
