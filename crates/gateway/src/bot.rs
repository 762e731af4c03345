//! Gateway event handling.

use std::sync::{Arc, RwLock};

use {
    relaybot_channels::ChannelOutbound,
    relaybot_commands::{CommandHandler, Invocation, WELCOME_MESSAGE, command_text},
    relaybot_common::{ChannelId, InboundMessage, ServerId, UserId},
    relaybot_discord::GatewayEvent,
    relaybot_relay::{HookOutcome, WebhookRegistry},
    relaybot_topology::TopologyStore,
    tracing::{debug, error, info, warn},
};

use crate::lanes::RelayLanes;

/// What the warm-up did to one channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WarmUp {
    Ready,
    /// The channel is gone and was dropped from every relation.
    Forgotten,
    /// The bot may not manage webhooks there; the channel was unlinked.
    Unlinked,
    Skipped,
}

pub struct RelayBot {
    store: Arc<TopologyStore>,
    registry: Arc<WebhookRegistry>,
    commands: Arc<CommandHandler>,
    outbound: Arc<dyn ChannelOutbound>,
    lanes: RelayLanes,
    bot_id: RwLock<Option<UserId>>,
    welcome_message: String,
}

impl RelayBot {
    pub fn new(
        store: Arc<TopologyStore>,
        lanes: RelayLanes,
        commands: Arc<CommandHandler>,
        outbound: Arc<dyn ChannelOutbound>,
    ) -> Self {
        let registry = Arc::clone(lanes.dispatcher().registry());
        Self {
            store,
            registry,
            commands,
            outbound,
            lanes,
            bot_id: RwLock::new(None),
            welcome_message: WELCOME_MESSAGE.to_string(),
        }
    }

    #[must_use]
    pub fn with_welcome_message(mut self, message: impl Into<String>) -> Self {
        self.welcome_message = message.into();
        self
    }

    pub fn bot_id(&self) -> Option<UserId> {
        self.bot_id
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    /// React to one gateway event.
    ///
    /// Returns quickly: slow work (warm-up, commands, relaying) runs on
    /// background tasks, and relays keep per-channel order.
    pub async fn handle(self: &Arc<Self>, event: GatewayEvent) {
        match event {
            GatewayEvent::Ready { bot_id, servers } => {
                self.on_ready(bot_id, &servers).await;
                let bot = Arc::clone(self);
                tokio::spawn(async move {
                    bot.warm_up().await;
                });
            },
            GatewayEvent::ServerAvailable { server_id } => {
                self.add_server(&server_id).await;
            },
            GatewayEvent::ServerJoined {
                server_id,
                name,
                system_channel,
            } => {
                info!(server = %server_id, name = name.as_deref().unwrap_or(""), "joined server");
                let bot = Arc::clone(self);
                tokio::spawn(async move {
                    bot.on_server_join(&server_id, system_channel.as_ref()).await;
                });
            },
            GatewayEvent::Message(message) => self.on_message(message).await,
        }
    }

    pub async fn on_ready(&self, bot_id: UserId, servers: &[ServerId]) {
        info!(%bot_id, servers = servers.len(), "ready");
        *self.bot_id.write().unwrap_or_else(|e| e.into_inner()) = Some(bot_id);
        for server in servers {
            self.add_server(server).await;
        }
    }

    /// Returns whether the server was unknown until now.
    async fn add_server(&self, server: &ServerId) -> bool {
        self.store
            .ensure_server(server)
            .await
            .inspect_err(|e| error!(%server, error = %e, "failed to store default server config"))
            .unwrap_or(false)
    }

    /// Make sure every channel that receives relayed messages has a working
    /// endpoint.
    pub async fn warm_up(&self) -> Vec<(ChannelId, WarmUp)> {
        let channels: Vec<ChannelId> = self
            .store
            .read(|t| {
                t.channels()
                    .into_iter()
                    .filter(|c| t.has_incoming(c))
                    .collect()
            })
            .await;
        info!(channels = channels.len(), "preparing relay endpoints");
        let mut report = Vec::with_capacity(channels.len());
        for channel in channels {
            let outcome = self.warm_up_channel(&channel).await;
            report.push((channel, outcome));
        }
        report
    }

    async fn warm_up_channel(&self, channel: &ChannelId) -> WarmUp {
        match self.registry.ensure_hook(channel).await {
            HookOutcome::Ready(_) => WarmUp::Ready,
            HookOutcome::NotFound => {
                match self.store.update(|t| Ok(t.forget_channel(channel))).await {
                    Ok(_) => info!(%channel, "removed deleted channel from topology"),
                    Err(e) => error!(%channel, error = %e, "failed to remove deleted channel"),
                }
                WarmUp::Forgotten
            },
            HookOutcome::PermissionDenied => {
                if let Err(e) = self.store.update(|t| Ok(t.forget_channel(channel))).await {
                    error!(%channel, error = %e, "failed to unlink channel");
                    return WarmUp::Skipped;
                }
                warn!(%channel, "missing webhook permission, channel unlinked");
                let notice = "**Error**: I do not have permission to manage webhooks on this \
                              channel, so I cannot relay messages into it. I have unlinked \
                              this channel; set it up again once the permission is granted.";
                if let Err(e) = self.outbound.send_text(channel, notice).await {
                    debug!(%channel, error = %e, "could not notify channel");
                }
                WarmUp::Unlinked
            },
            HookOutcome::Transient(message) => {
                warn!(%channel, error = %message, "could not prepare relay endpoint");
                WarmUp::Skipped
            },
        }
    }

    /// Greet a server the first time the bot is added to it. A server with
    /// a stored configuration has seen the welcome already.
    pub async fn on_server_join(&self, server: &ServerId, system_channel: Option<&ChannelId>) {
        if !self.add_server(server).await {
            debug!(%server, "known server, not greeting");
            return;
        }
        let Some(channel) = system_channel else {
            return;
        };
        if let Err(e) = self.outbound.send_text(channel, &self.welcome_message).await {
            warn!(%server, %channel, error = %e, "failed to post welcome message");
        }
    }

    pub async fn on_message(self: &Arc<Self>, message: InboundMessage) {
        let Some(server) = message.server_id.clone() else {
            return;
        };
        let bot_id = self.bot_id();
        if bot_id.as_ref() == Some(&message.author.id) {
            return;
        }
        if let Some(hook) = &message.webhook_id
            && self.registry.is_relay_endpoint(hook)
        {
            return;
        }

        let tag = message.author.tag();
        for line in message.content.lines() {
            debug!(%server, channel = %message.channel_id, author = %tag, "{line}");
        }

        let control_chars = self.store.control_chars(&server).await;
        let bot_ref = bot_id.as_ref().map(UserId::as_str);
        if !message.author.bot
            && message.webhook_id.is_none()
            && let Some(text) = command_text(&message.content, &control_chars, bot_ref)
        {
            let invocation = Invocation {
                server_id: server,
                channel_id: message.channel_id.clone(),
                author: message.author.clone(),
            };
            let text = text.to_string();
            let bot = Arc::clone(self);
            tokio::spawn(async move {
                bot.run_command(&invocation, &text).await;
            });
            return;
        }

        self.lanes.submit(message).await;
    }

    async fn run_command(&self, invocation: &Invocation, text: &str) {
        let reply = self.commands.execute(invocation, text).await;
        if let Err(e) = self
            .outbound
            .send_text(&invocation.channel_id, &reply)
            .await
        {
            warn!(channel = %invocation.channel_id, error = %e, "failed to post command reply");
        }
    }

    /// Let queued relays finish.
    pub async fn shutdown(&self) {
        self.lanes.close().await;
    }
}
