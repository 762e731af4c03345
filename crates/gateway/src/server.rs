//! Service startup and shutdown.

use std::sync::Arc;

use {
    anyhow::Context as _,
    relaybot_channels::Platform,
    relaybot_commands::CommandHandler,
    relaybot_config::BotConfig,
    relaybot_discord::{GatewayClient, GatewayEvent},
    relaybot_relay::{Dispatcher, RetryPolicy, WebhookRegistry},
    relaybot_topology::{FileStore, TopologyStore},
    tokio::sync::mpsc,
    tracing::{error, info, warn},
};

use crate::{
    bot::RelayBot,
    lanes::RelayLanes,
    logs::{LogReceiver, spawn_forwarder},
};

/// Open the file-backed topology under `config.data_dir` and load it.
pub async fn open_store(config: &BotConfig) -> anyhow::Result<Arc<TopologyStore>> {
    let store = Arc::new(TopologyStore::new(Arc::new(FileStore::new(
        &config.data_dir,
    ))));
    let report = store
        .load()
        .await
        .with_context(|| format!("loading topology from {}", config.data_dir.display()))?;
    info!(
        data_dir = %config.data_dir.display(),
        servers = report.servers,
        repaired = report.repaired,
        "loaded topology"
    );
    for server in &report.failed_servers {
        warn!(%server, "server config unreadable, using defaults");
    }
    Ok(store)
}

/// Build the bot on top of any platform implementation.
pub fn build_bot<P: Platform + 'static>(
    config: &BotConfig,
    store: Arc<TopologyStore>,
    platform: Arc<P>,
) -> RelayBot {
    let registry = Arc::new(WebhookRegistry::new(
        platform.clone(),
        config.endpoint_name.clone(),
    ));
    let dispatcher = Arc::new(Dispatcher::new(
        store.clone(),
        registry.clone(),
        platform.clone(),
        platform.clone(),
        RetryPolicy::from(&config.relay),
    ));

    let mut commands =
        CommandHandler::new(store.clone(), registry, platform.clone(), platform.clone())
            .with_owner(config.owner_id.clone());
    if let Some(help) = &config.help_message {
        commands = commands.with_help_message(help.as_str());
    }

    let bot = RelayBot::new(store, RelayLanes::new(dispatcher), Arc::new(commands), platform);
    match &config.welcome_message {
        Some(welcome) => bot.with_welcome_message(welcome.as_str()),
        None => bot,
    }
}

/// Connect to Discord and relay until Ctrl-C or a fatal gateway error.
/// The topology is saved on the way out either way.
pub async fn start(config: BotConfig, log_rx: Option<LogReceiver>) -> anyhow::Result<()> {
    config.validate()?;
    let store = open_store(&config).await?;

    let (event_tx, mut event_rx) = mpsc::unbounded_channel::<GatewayEvent>();
    let gateway = GatewayClient::new(&config.token, event_tx)
        .await
        .context("creating discord client")?;
    let http = Arc::new(gateway.http());

    if let Some(rx) = log_rx {
        match &config.log_channel {
            Some(channel) => {
                spawn_forwarder(rx, channel.clone(), http.clone());
            },
            None => drop(rx),
        }
    }

    let bot = Arc::new(build_bot(&config, store.clone(), http));

    let shards = gateway.shard_manager();
    let session = gateway.spawn();

    let shutdown = tokio::signal::ctrl_c();
    tokio::pin!(shutdown);
    loop {
        tokio::select! {
            signal = &mut shutdown => {
                if let Err(e) = signal {
                    warn!(error = %e, "could not listen for Ctrl-C");
                }
                info!("shutting down");
                shards.shutdown_all().await;
                break;
            },
            event = event_rx.recv() => match event {
                Some(event) => bot.handle(event).await,
                None => break,
            },
        }
    }

    bot.shutdown().await;
    let saved = store.save().await;
    if let Err(e) = &saved {
        error!(error = %e, "failed to save topology on shutdown");
    }

    let session = session.await.context("gateway task panicked")?;
    session.context("gateway session ended")?;
    saved.context("saving topology")?;
    info!("stopped");
    Ok(())
}
