#![allow(clippy::unwrap_used, clippy::expect_used)]

use std::{sync::Arc, time::Duration};

use {
    relaybot_channels::MemoryPlatform,
    relaybot_common::{Author, ChannelId, InboundMessage, ServerId},
    relaybot_config::{BotConfig, RelayConfig},
    relaybot_discord::GatewayEvent,
    relaybot_gateway::{
        RelayBot,
        bot::WarmUp,
        server::{build_bot, open_store},
    },
    relaybot_topology::{InMemoryStore, TopologyStore},
};

fn ch(id: &str) -> ChannelId {
    ChannelId::from(id)
}

fn config() -> BotConfig {
    BotConfig {
        relay: RelayConfig {
            transient_retries: 0,
            retry_backoff_ms: 1,
        },
        ..BotConfig::default()
    }
}

fn post(channel: &str, content: &str) -> InboundMessage {
    InboundMessage {
        server_id: Some("10".into()),
        channel_id: ch(channel),
        author: Author {
            id: "7".into(),
            name: "alice".into(),
            discriminator: Some("0001".into()),
            avatar_url: None,
            bot: false,
        },
        content: content.into(),
        attachments: Vec::new(),
        embeds: Vec::new(),
        webhook_id: None,
    }
}

async fn setup() -> (Arc<MemoryPlatform>, Arc<TopologyStore>, Arc<RelayBot>) {
    let platform = Arc::new(MemoryPlatform::new());
    platform.add_channel("1", "10");
    platform.add_channel("2", "10");
    platform.add_channel("3", "10");
    platform.grant_manage("7", "10");
    let store = Arc::new(TopologyStore::new(Arc::new(InMemoryStore::new())));
    let bot = Arc::new(build_bot(&config(), store.clone(), platform.clone()));
    bot.on_ready("99".into(), &[ServerId::from("10")]).await;
    (platform, store, bot)
}

/// Wait for background work that posts into `channel`.
async fn replies(platform: &MemoryPlatform, channel: &str, count: usize) -> Vec<String> {
    for _ in 0..200 {
        let got = platform.messages_to(&ch(channel));
        if got.len() >= count {
            return got;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("expected {count} message(s) in channel {channel}");
}

#[tokio::test]
async fn command_then_relay() {
    let (platform, store, bot) = setup().await;

    bot.handle(GatewayEvent::Message(post("1", ";link 1 2"))).await;
    let reply = replies(&platform, "1", 1).await;
    assert!(reply[0].starts_with("<@7> Linked"), "{reply:?}");
    assert!(store.read(|t| t.has_link(&ch("1"), &ch("2"))).await);

    bot.handle(GatewayEvent::Message(post("1", "hello"))).await;
    bot.shutdown().await;
    let copies = platform.deliveries_to(&ch("2"));
    assert_eq!(copies.len(), 1);
    assert_eq!(copies[0].content, "hello");
    assert_eq!(copies[0].username, "alice");
}

#[tokio::test]
async fn commands_are_not_relayed() {
    let (platform, store, bot) = setup().await;
    store
        .update(|t| t.add_link(&ch("1"), &ch("2")))
        .await
        .unwrap();

    bot.handle(GatewayEvent::Message(post("1", "<@99> help"))).await;
    let reply = replies(&platform, "1", 1).await;
    assert!(reply[0].contains("link"));
    bot.shutdown().await;
    assert!(platform.deliveries_to(&ch("2")).is_empty());
}

#[tokio::test]
async fn own_copies_and_direct_messages_are_ignored() {
    let (platform, store, bot) = setup().await;
    store
        .update(|t| t.add_link(&ch("1"), &ch("2")))
        .await
        .unwrap();
    bot.handle(GatewayEvent::Message(post("1", "hi"))).await;
    bot.shutdown().await;
    let hook = platform.endpoints_of(&ch("2"))[0].id.clone();

    let mut echo = post("2", "hi");
    echo.webhook_id = Some(hook);
    bot.handle(GatewayEvent::Message(echo)).await;

    let mut own = post("1", "status");
    own.author.id = "99".into();
    bot.handle(GatewayEvent::Message(own)).await;

    let mut direct = post("1", "psst");
    direct.server_id = None;
    bot.handle(GatewayEvent::Message(direct)).await;

    bot.shutdown().await;
    assert!(platform.deliveries_to(&ch("1")).is_empty());
    assert_eq!(platform.deliveries_to(&ch("2")).len(), 1);
}

#[tokio::test]
async fn warm_up_heals_broken_channels() {
    let (platform, store, bot) = setup().await;
    store
        .update(|t| {
            t.add_link(&ch("1"), &ch("2"))?;
            t.add_relay(&ch("1"), &ch("3"))
        })
        .await
        .unwrap();
    platform.remove_channel(&ch("2"));
    platform.deny_endpoints(&ch("3"));

    let report = bot.warm_up().await;
    assert!(report.contains(&(ch("2"), WarmUp::Forgotten)));
    assert!(report.contains(&(ch("3"), WarmUp::Unlinked)));
    assert!(store.snapshot().await.is_empty());

    let notice = platform.messages_to(&ch("3"));
    assert_eq!(notice.len(), 1);
    assert!(notice[0].contains("permission to manage webhooks"));
}

#[tokio::test]
async fn joining_a_server_greets_it() {
    let (platform, store, bot) = setup().await;
    platform.add_channel("500", "30");

    bot.handle(GatewayEvent::ServerJoined {
        server_id: "30".into(),
        name: Some("new place".into()),
        system_channel: Some(ch("500")),
    })
    .await;
    let welcome = replies(&platform, "500", 1).await;
    assert!(welcome[0].contains("help"));
    assert!(store.servers().await.contains(&ServerId::from("30")));
}

#[tokio::test]
async fn rejoining_a_known_server_does_not_greet() {
    let (platform, _store, bot) = setup().await;
    platform.add_channel("501", "10");

    bot.on_server_join(&ServerId::from("10"), Some(&ch("501"))).await;
    assert!(platform.messages_to(&ch("501")).is_empty());
}

#[tokio::test]
async fn file_store_survives_restart() {
    let dir = tempfile::tempdir().unwrap();
    let config = BotConfig {
        data_dir: dir.path().to_path_buf(),
        ..BotConfig::default()
    };

    let store = open_store(&config).await.unwrap();
    store
        .update(|t| t.add_link(&ch("1"), &ch("2")))
        .await
        .unwrap();
    store.ensure_server(&ServerId::from("10")).await.unwrap();
    store
        .set_config(&ServerId::from("10"), "control_chars", "!")
        .await
        .unwrap();
    drop(store);

    let reopened = open_store(&config).await.unwrap();
    assert!(reopened.read(|t| t.has_link(&ch("2"), &ch("1"))).await);
    assert_eq!(reopened.control_chars(&ServerId::from("10")).await, "!");
}
