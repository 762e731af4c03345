//! Gateway session lifecycle.

use std::sync::Arc;

use {
    secrecy::{ExposeSecret, Secret},
    serenity::{Client, gateway::ShardManager},
    tokio::{sync::mpsc, task::JoinHandle},
    tracing::info,
};

use crate::{DiscordHttp, GatewayEvent, RelayHandler, Result};

/// A logged-in serenity client that has not started its session yet.
///
/// Serenity reconnects on its own; [`spawn`](Self::spawn) only returns
/// once the shards are shut down or the session fails for good (bad token,
/// disallowed intents).
pub struct GatewayClient {
    client: Client,
}

impl GatewayClient {
    pub async fn new(
        token: &Secret<String>,
        events: mpsc::UnboundedSender<GatewayEvent>,
    ) -> Result<Self> {
        let client = Client::builder(token.expose_secret(), RelayHandler::intents())
            .event_handler(RelayHandler::new(events))
            .await?;
        Ok(Self { client })
    }

    /// REST client sharing the session's rate limiter.
    pub fn http(&self) -> DiscordHttp {
        DiscordHttp::new(Arc::clone(&self.client.http))
    }

    /// Handle used to stop the session from outside.
    pub fn shard_manager(&self) -> Arc<ShardManager> {
        Arc::clone(&self.client.shard_manager)
    }

    pub fn spawn(mut self) -> JoinHandle<Result<()>> {
        tokio::spawn(async move {
            self.client.start().await?;
            info!("discord session closed");
            Ok(())
        })
    }
}
