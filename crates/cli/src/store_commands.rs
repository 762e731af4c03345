//! `relaybot check` and `relaybot links`: inspect the persisted topology
//! without connecting to Discord.

use {
    anyhow::Result,
    relaybot_common::ChannelId,
    relaybot_config::BotConfig,
    relaybot_gateway::server::open_store,
    relaybot_topology::Topology,
};

/// Relation counts across the whole topology.
#[derive(Debug, Default, PartialEq, Eq)]
struct Summary {
    channels: usize,
    links: usize,
    relays: usize,
    groups: usize,
    prefixes: usize,
}

fn summarize(topology: &Topology) -> Summary {
    let channels = topology.channels();
    let mut summary = Summary {
        channels: channels.len(),
        groups: topology.group_names().count(),
        ..Summary::default()
    };
    let mut link_ends = 0;
    for channel in &channels {
        link_ends += topology.links_of(channel).len();
        summary.relays += topology.relays_of(channel).len();
        summary.prefixes += topology.prefixes_of(channel).len();
    }
    // Every link is stored on both ends.
    summary.links = link_ends / 2;
    summary
}

fn join<T: std::fmt::Display>(items: impl IntoIterator<Item = T>) -> String {
    items
        .into_iter()
        .map(|item| item.to_string())
        .collect::<Vec<_>>()
        .join(", ")
}

fn describe_channel(topology: &Topology, channel: &ChannelId) -> Vec<String> {
    let mut lines = Vec::new();
    let links = topology.links_of(channel);
    if !links.is_empty() {
        lines.push(format!("linked with:   {}", join(&links)));
    }
    let relays = topology.relays_of(channel);
    if !relays.is_empty() {
        lines.push(format!("relays to:     {}", join(&relays)));
    }
    let sources = topology.relay_sources(channel);
    if !sources.is_empty() {
        lines.push(format!("relayed from:  {}", join(&sources)));
    }
    let groups = topology.groups_of(channel);
    if !groups.is_empty() {
        lines.push(format!("groups:        {}", join(&groups)));
    }
    for (prefix, target) in topology.prefixes_of(channel) {
        lines.push(format!("prefix {prefix:<7} -> {target}"));
    }
    for (origin, prefix) in topology.prefix_sources(channel) {
        lines.push(format!("prefix {prefix:<7} <- {origin}"));
    }
    lines
}

pub async fn handle_check(config: &BotConfig) -> Result<()> {
    let validation = config.validate();
    match &validation {
        Ok(()) => println!("[ok]   configuration"),
        Err(e) => println!("[fail] configuration: {e}"),
    }
    match &config.owner_id {
        Some(owner) => println!("[ok]   owner {owner}"),
        None => println!("[info] no owner configured"),
    }
    if let Some(channel) = &config.log_channel {
        println!(
            "[ok]   logging {:?} and above to channel {channel}",
            config.log_channel_level
        );
    }

    let store = open_store(config).await?;
    let servers = store.servers().await;
    let summary = store.read(summarize).await;
    println!("[ok]   data directory {}", config.data_dir.display());
    println!("       servers:  {}", servers.len());
    println!("       channels: {}", summary.channels);
    println!("       links:    {}", summary.links);
    println!("       relays:   {}", summary.relays);
    println!("       groups:   {}", summary.groups);
    println!("       prefixes: {}", summary.prefixes);

    validation
}

pub async fn handle_links(config: &BotConfig, channel: &str) -> Result<()> {
    let store = open_store(config).await?;
    let channel = ChannelId::from(channel);
    let lines = store.read(|t| describe_channel(t, &channel)).await;
    if lines.is_empty() {
        println!("Channel {channel} has no relations.");
    } else {
        println!("Channel {channel}:");
        for line in lines {
            println!("  {line}");
        }
    }
    Ok(())
}
