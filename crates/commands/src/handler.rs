//! Command execution against the topology store.
//!
//! Every mutating command follows the same order: parse arguments, resolve
//! the channels involved, authorize the author on every affected server,
//! provision the endpoints the new relationship will deliver through, and
//! finally mutate and persist in one step. A failure at any stage leaves
//! the topology untouched.

use std::{collections::BTreeSet, fmt::Write as _, sync::Arc};

use {
    dashmap::DashMap,
    relaybot_channels::{Authorizer, ChannelDirectory, Error as ProviderError},
    relaybot_common::{Author, ChannelId, ServerId, UserId},
    relaybot_relay::{HookOutcome, WebhookRegistry},
    relaybot_topology::{ConfigKey, Topology, TopologyStore},
    tokio::sync::{Mutex, OwnedMutexGuard},
    tracing::{debug, info, warn},
};

use crate::{
    CommandError, Result,
    args::{parse_channel, parse_channels},
    command::{Command, ParsedCommand, parse},
    text::HELP_MESSAGE,
};

/// Who ran a command, and where.
#[derive(Debug, Clone)]
pub struct Invocation {
    pub server_id: ServerId,
    pub channel_id: ChannelId,
    pub author: Author,
}

pub struct CommandHandler {
    store: Arc<TopologyStore>,
    registry: Arc<WebhookRegistry>,
    directory: Arc<dyn ChannelDirectory>,
    authorizer: Arc<dyn Authorizer>,
    owner_id: Option<UserId>,
    help_message: String,
    /// Held while a channel is being attached as a destination or while its
    /// endpoint is being released, so a release never races a new relation.
    destinations: DashMap<ChannelId, Arc<Mutex<()>>>,
}

impl CommandHandler {
    pub fn new(
        store: Arc<TopologyStore>,
        registry: Arc<WebhookRegistry>,
        directory: Arc<dyn ChannelDirectory>,
        authorizer: Arc<dyn Authorizer>,
    ) -> Self {
        Self {
            store,
            registry,
            directory,
            authorizer,
            owner_id: None,
            help_message: HELP_MESSAGE.to_string(),
            destinations: DashMap::new(),
        }
    }

    /// A user allowed to manage every server.
    #[must_use]
    pub fn with_owner(mut self, owner_id: Option<UserId>) -> Self {
        self.owner_id = owner_id;
        self
    }

    #[must_use]
    pub fn with_help_message(mut self, help_message: impl Into<String>) -> Self {
        self.help_message = help_message.into();
        self
    }

    /// Run command text and build the reply, addressed to the author.
    pub async fn execute(&self, inv: &Invocation, text: &str) -> String {
        let mention = inv.author.mention();
        let result = match parse(text) {
            Ok(parsed) => self.run(inv, parsed).await,
            Err(e) => Err(e),
        };
        match result {
            Ok(body) => format!("{mention} {body}"),
            Err(e) => {
                match &e {
                    CommandError::Persistence { .. } | CommandError::Transient { .. } => {
                        warn!(channel = %inv.channel_id, user = %inv.author.id, error = %e, "command failed");
                    },
                    _ => debug!(channel = %inv.channel_id, user = %inv.author.id, error = %e, "command rejected"),
                }
                format!("{mention} **Error**: {e}")
            },
        }
    }

    pub async fn run(&self, inv: &Invocation, parsed: ParsedCommand) -> Result<String> {
        let args = parsed.args.as_slice();
        debug!(command = parsed.command.name(), ?args, "running command");
        match parsed.command {
            Command::Help => Ok(format!("\n\n{}", self.help_message)),
            Command::Link => self.link(inv, args).await,
            Command::Unlink => self.unlink(inv, args).await,
            Command::UnlinkAll => self.unlink_all(inv, args).await,
            Command::Relay => self.relay(inv, args).await,
            Command::Unrelay => self.unrelay(inv, args).await,
            Command::Group => self.group(inv, args).await,
            Command::Ungroup => self.ungroup(inv, args).await,
            Command::Prefix => self.prefix(inv, args).await,
            Command::Unprefix => self.unprefix(inv, args).await,
            Command::Links => self.links(inv, args).await,
            Command::Config => self.config(inv, args).await,
        }
    }

    // ── Links ───────────────────────────────────────────────────────────────

    async fn link(&self, inv: &Invocation, args: &[String]) -> Result<String> {
        let (a, b) = channel_pair(inv, args, Command::Link)?;
        let servers = [self.server_of(&a).await?, self.server_of(&b).await?];
        self.authorize(inv, servers).await?;

        if self.store.read(|t| t.has_link(&a, &b)).await {
            return Err(CommandError::already_exists(format!(
                "A link between <#{a}> and <#{b}>"
            )));
        }
        let _held = self.hold([a.clone(), b.clone()]).await;
        self.provision(&a).await?;
        self.provision(&b).await?;
        if !self.store.update(|t| t.add_link(&a, &b)).await? {
            return Err(CommandError::already_exists(format!(
                "A link between <#{a}> and <#{b}>"
            )));
        }

        info!(%a, %b, user = %inv.author.id, "linked channels");
        Ok(format!("Linked <#{a}> and <#{b}>. Messages now flow both ways."))
    }

    async fn unlink(&self, inv: &Invocation, args: &[String]) -> Result<String> {
        let (a, b) = channel_pair(inv, args, Command::Unlink)?;
        let servers = self.touched_servers(inv, [&a, &b]).await?;
        self.authorize(inv, servers).await?;

        if !self.store.update(|t| Ok(t.remove_link(&a, &b))).await? {
            return Err(CommandError::not_linked(format!(
                "<#{a}> and <#{b}> are not linked."
            )));
        }

        info!(%a, %b, user = %inv.author.id, "unlinked channels");
        self.release_orphans([a.clone(), b.clone()]).await;
        Ok(format!("Unlinked <#{a}> and <#{b}>."))
    }

    async fn unlink_all(&self, inv: &Invocation, args: &[String]) -> Result<String> {
        let channel = match args {
            [] => inv.channel_id.clone(),
            [arg] => parse_channel(arg)?,
            _ => return usage(Command::UnlinkAll),
        };
        let servers = self.touched_servers(inv, [&channel]).await?;
        self.authorize(inv, servers).await?;

        let peers = self.store.read(|t| t.all_destinations(&channel)).await;
        let summary = self.store.update(|t| Ok(t.unlink_all(&channel))).await?;
        if summary.is_empty() {
            return Err(CommandError::not_linked(format!(
                "<#{channel}> has no links, relays or groups."
            )));
        }

        info!(%channel, user = %inv.author.id, ?summary, "unlinked channel from everything");
        self.release_orphans(peers.into_iter().chain([channel.clone()]))
            .await;
        Ok(format!(
            "Removed {} link(s), {} relay(s) and {} group membership(s) from <#{channel}>.",
            summary.links.len(),
            summary.relays.len(),
            summary.groups.len()
        ))
    }

    // ── Relays ──────────────────────────────────────────────────────────────

    async fn relay(&self, inv: &Invocation, args: &[String]) -> Result<String> {
        let (from, to) = channel_pair(inv, args, Command::Relay)?;
        let servers = [self.server_of(&from).await?, self.server_of(&to).await?];
        self.authorize(inv, servers).await?;

        if self.store.read(|t| t.has_relay(&from, &to)).await {
            return Err(CommandError::already_exists(format!(
                "A relay from <#{from}> to <#{to}>"
            )));
        }
        let _held = self.hold([to.clone()]).await;
        self.provision(&to).await?;
        if !self.store.update(|t| t.add_relay(&from, &to)).await? {
            return Err(CommandError::already_exists(format!(
                "A relay from <#{from}> to <#{to}>"
            )));
        }

        info!(%from, %to, user = %inv.author.id, "added relay");
        Ok(format!("Messages from <#{from}> are now relayed to <#{to}>."))
    }

    async fn unrelay(&self, inv: &Invocation, args: &[String]) -> Result<String> {
        let (from, to) = channel_pair(inv, args, Command::Unrelay)?;
        let servers = self.touched_servers(inv, [&from, &to]).await?;
        self.authorize(inv, servers).await?;

        if !self.store.update(|t| Ok(t.remove_relay(&from, &to))).await? {
            return Err(CommandError::not_linked(format!(
                "There is no relay from <#{from}> to <#{to}>."
            )));
        }

        info!(%from, %to, user = %inv.author.id, "removed relay");
        self.release_orphans([to.clone()]).await;
        Ok(format!("Messages from <#{from}> are no longer relayed to <#{to}>."))
    }

    // ── Groups ──────────────────────────────────────────────────────────────

    async fn group(&self, inv: &Invocation, args: &[String]) -> Result<String> {
        let (name, channels) = group_args(inv, args, Command::Group)?;
        let members = self.store.read(|t| t.members_of(&name)).await;
        let joining: Vec<ChannelId> = channels
            .into_iter()
            .filter(|c| !members.contains(c))
            .collect();
        if joining.is_empty() {
            return Err(CommandError::already_exists(format!(
                "Membership of group `{name}` for those channels"
            )));
        }

        let mut servers = BTreeSet::new();
        for channel in &joining {
            servers.insert(self.server_of(channel).await?);
        }
        servers.extend(self.touched_servers(inv, members.iter()).await?);
        self.authorize(inv, servers).await?;

        let _held = self
            .hold(joining.iter().chain(members.iter()).cloned())
            .await;
        for channel in &joining {
            self.provision(channel).await?;
        }
        let size = self
            .store
            .update(|t| {
                for channel in &joining {
                    t.group_channel(&name, channel);
                }
                Ok(t.members_of(&name).len())
            })
            .await?;

        info!(group = %name, joined = joining.len(), user = %inv.author.id, "grouped channels");
        Ok(format!(
            "Added {} to group `{name}`. It now has {size} member(s).",
            mention_list(&joining)
        ))
    }

    async fn ungroup(&self, inv: &Invocation, args: &[String]) -> Result<String> {
        let (name, channels) = group_args(inv, args, Command::Ungroup)?;
        let members = self.store.read(|t| t.members_of(&name)).await;
        let leaving: Vec<ChannelId> = channels
            .into_iter()
            .filter(|c| members.contains(c))
            .collect();
        if leaving.is_empty() {
            return Err(CommandError::not_linked(format!(
                "None of those channels are in group `{name}`."
            )));
        }

        let servers = self.touched_servers(inv, members.iter()).await?;
        self.authorize(inv, servers).await?;

        self.store
            .update(|t| {
                for channel in &leaving {
                    t.ungroup_channel(&name, channel);
                }
                Ok(())
            })
            .await?;

        info!(group = %name, left = leaving.len(), user = %inv.author.id, "ungrouped channels");
        self.release_orphans(members).await;
        Ok(format!(
            "Removed {} from group `{name}`.",
            mention_list(&leaving)
        ))
    }

    // ── Prefixes ────────────────────────────────────────────────────────────

    async fn prefix(&self, inv: &Invocation, args: &[String]) -> Result<String> {
        let (prefix, target, origin) = match args {
            [prefix, target] => (prefix, parse_channel(target)?, inv.channel_id.clone()),
            [prefix, target, origin] => (prefix, parse_channel(target)?, parse_channel(origin)?),
            _ => return usage(Command::Prefix),
        };
        if prefix.is_empty() {
            return Err(CommandError::invalid_argument("A prefix can't be empty."));
        }
        if origin == target {
            return Err(CommandError::SelfReference);
        }
        let servers = [
            self.server_of(&origin).await?,
            self.server_of(&target).await?,
        ];
        self.authorize(inv, servers).await?;

        if self.store.read(|t| t.has_prefix(&origin, prefix)).await {
            return Err(CommandError::already_exists(format!(
                "The prefix `{prefix}` on <#{origin}>"
            )));
        }
        let _held = self.hold([target.clone()]).await;
        self.provision(&target).await?;
        self.store
            .update(|t| t.set_prefix(&origin, prefix, &target))
            .await?;

        info!(%origin, %target, prefix = %prefix, user = %inv.author.id, "added prefix relay");
        Ok(format!(
            "Messages in <#{origin}> starting with `{prefix}` are now relayed to <#{target}> \
             without the prefix."
        ))
    }

    async fn unprefix(&self, inv: &Invocation, args: &[String]) -> Result<String> {
        let (prefix, origin) = match args {
            [prefix] => (prefix, inv.channel_id.clone()),
            [prefix, origin] => (prefix, parse_channel(origin)?),
            _ => return usage(Command::Unprefix),
        };
        let missing = || CommandError::not_linked(format!("<#{origin}> has no prefix `{prefix}`."));
        let Some(target) = self
            .store
            .read(|t| t.target_for_prefix(&origin, prefix).cloned())
            .await
        else {
            return Err(missing());
        };
        let servers = self.touched_servers(inv, [&origin, &target]).await?;
        self.authorize(inv, servers).await?;

        if self
            .store
            .update(|t| Ok(t.remove_prefix(&origin, prefix)))
            .await?
            .is_none()
        {
            return Err(missing());
        }

        info!(%origin, %target, prefix = %prefix, user = %inv.author.id, "removed prefix relay");
        self.release_orphans([target.clone()]).await;
        Ok(format!(
            "Messages in <#{origin}> starting with `{prefix}` are no longer relayed to <#{target}>."
        ))
    }

    // ── Queries and configuration ───────────────────────────────────────────

    async fn links(&self, inv: &Invocation, args: &[String]) -> Result<String> {
        let channel = match args {
            [] => inv.channel_id.clone(),
            [arg] => parse_channel(arg)?,
            _ => return usage(Command::Links),
        };
        let servers = self.touched_servers(inv, [&channel]).await?;
        self.authorize(inv, servers).await?;

        let report = self.store.read(|t| describe_channel(t, &channel)).await;
        Ok(report)
    }

    async fn config(&self, inv: &Invocation, args: &[String]) -> Result<String> {
        let server = &inv.server_id;
        self.authorize(inv, [server.clone()]).await?;

        match args {
            [] => {
                let config = self.store.server_config(server).await;
                let mut out = String::from("\n\n__**Current configuration**__\n\n");
                for (key, value) in config.entries() {
                    let _ = writeln!(out, "**{}**: `{value}`", key.name());
                }
                Ok(out)
            },
            [key] => {
                let key = ConfigKey::parse(key)
                    .ok_or_else(|| CommandError::UnknownKey { key: key.clone() })?;
                let config = self.store.server_config(server).await;
                Ok(format!(
                    "**{}** is set to `{}`\n\n**Info**: {}",
                    key.name(),
                    config.get(key),
                    key.description()
                ))
            },
            [key, value] => {
                let key = self.store.set_config(server, key, value).await?;
                info!(%server, key = key.name(), value = %value, user = %inv.author.id, "updated server config");
                Ok(format!("**{}** is now set to `{value}`", key.name()))
            },
            _ => usage(Command::Config),
        }
    }

    // ── Shared steps ────────────────────────────────────────────────────────

    /// Resolve the server a channel belongs to. The channel must exist and
    /// belong to a server.
    async fn server_of(&self, channel: &ChannelId) -> Result<ServerId> {
        match self.directory.resolve(channel).await {
            Ok(info) => info.server_id.ok_or_else(|| CommandError::NotFound {
                channel: channel.clone(),
            }),
            Err(ProviderError::NotFound { .. } | ProviderError::PermissionDenied { .. }) => {
                Err(CommandError::NotFound {
                    channel: channel.clone(),
                })
            },
            Err(e) => Err(CommandError::Transient {
                message: e.to_string(),
            }),
        }
    }

    /// Servers affected by a removal: the invoking server plus the server of
    /// every channel that still exists. Deleted channels have no server left
    /// to protect.
    async fn touched_servers<'c>(
        &self,
        inv: &Invocation,
        channels: impl IntoIterator<Item = &'c ChannelId>,
    ) -> Result<BTreeSet<ServerId>> {
        let mut servers = BTreeSet::from([inv.server_id.clone()]);
        for channel in channels {
            match self.server_of(channel).await {
                Ok(server) => {
                    servers.insert(server);
                },
                Err(CommandError::NotFound { .. }) => {
                    debug!(%channel, "channel no longer resolves, skipping its server");
                },
                Err(e) => return Err(e),
            }
        }
        Ok(servers)
    }

    async fn authorize(
        &self,
        inv: &Invocation,
        servers: impl IntoIterator<Item = ServerId>,
    ) -> Result<()> {
        let user = &inv.author.id;
        if self.owner_id.as_ref() == Some(user) {
            return Ok(());
        }
        let servers: BTreeSet<ServerId> = servers.into_iter().collect();
        for server in servers {
            let allowed = self
                .authorizer
                .can_manage(user, &server)
                .await
                .map_err(|e| match e {
                    ProviderError::NotFound { .. } | ProviderError::PermissionDenied { .. } => {
                        CommandError::Authorization {
                            server: server.clone(),
                        }
                    },
                    e => CommandError::Transient {
                        message: e.to_string(),
                    },
                })?;
            if !allowed {
                debug!(%user, %server, "permission denied");
                return Err(CommandError::Authorization { server });
            }
        }
        Ok(())
    }

    /// Make sure `channel` can receive relayed messages.
    async fn provision(&self, channel: &ChannelId) -> Result<()> {
        match self.registry.ensure_hook(channel).await {
            HookOutcome::Ready(_) => Ok(()),
            HookOutcome::NotFound => Err(CommandError::NotFound {
                channel: channel.clone(),
            }),
            HookOutcome::PermissionDenied => Err(CommandError::PermissionDenied {
                channel: channel.clone(),
            }),
            HookOutcome::Transient(message) => Err(CommandError::Transient { message }),
        }
    }

    /// Lock `channels` as destinations, in a fixed order.
    async fn hold(&self, channels: impl IntoIterator<Item = ChannelId>) -> Vec<OwnedMutexGuard<()>> {
        let channels: BTreeSet<ChannelId> = channels.into_iter().collect();
        let mut guards = Vec::with_capacity(channels.len());
        for channel in channels {
            let lock = Arc::clone(&self.destinations.entry(channel).or_default());
            guards.push(lock.lock_owned().await);
        }
        guards
    }

    /// Delete endpoints of channels nothing delivers into anymore.
    ///
    /// Each channel is re-checked while held, so a relation committed by a
    /// concurrent command keeps its endpoint.
    async fn release_orphans(&self, candidates: impl IntoIterator<Item = ChannelId>) {
        let candidates: BTreeSet<ChannelId> = candidates.into_iter().collect();
        for channel in candidates {
            let _held = self.hold([channel.clone()]).await;
            if self.store.read(|t| t.has_incoming(&channel)).await {
                continue;
            }
            self.registry.release(&channel).await;
        }
    }
}

fn usage<T>(command: Command) -> Result<T> {
    Err(CommandError::Usage {
        usage: command.usage(),
    })
}

/// `[a] <b>`: a single argument pairs the invoking channel with it.
fn channel_pair(inv: &Invocation, args: &[String], command: Command) -> Result<(ChannelId, ChannelId)> {
    let (a, b) = match args {
        [b] => (inv.channel_id.clone(), parse_channel(b)?),
        [a, b] => (parse_channel(a)?, parse_channel(b)?),
        _ => return usage(command),
    };
    if a == b {
        return Err(CommandError::SelfReference);
    }
    Ok((a, b))
}

/// `<name> [channel ...]`, defaulting to the invoking channel.
fn group_args(inv: &Invocation, args: &[String], command: Command) -> Result<(String, Vec<ChannelId>)> {
    let Some((name, rest)) = args.split_first() else {
        return usage(command);
    };
    let mut channels = if rest.is_empty() {
        vec![inv.channel_id.clone()]
    } else {
        parse_channels(rest)?
    };
    let mut seen = BTreeSet::new();
    channels.retain(|c| seen.insert(c.clone()));
    Ok((name.clone(), channels))
}

fn mention_list<'a>(channels: impl IntoIterator<Item = &'a ChannelId>) -> String {
    channels
        .into_iter()
        .map(|c| format!("<#{c}>"))
        .collect::<Vec<_>>()
        .join(", ")
}

fn describe_channel(t: &Topology, channel: &ChannelId) -> String {
    let links = t.links_of(channel);
    let relays_out = t.relays_of(channel);
    let relays_in = t.relay_sources(channel);
    let groups = t.groups_of(channel);
    let prefixes = t.prefixes_of(channel);
    let prefixes_in = t.prefix_sources(channel);

    if links.is_empty()
        && relays_out.is_empty()
        && relays_in.is_empty()
        && groups.is_empty()
        && prefixes.is_empty()
        && prefixes_in.is_empty()
    {
        return format!("<#{channel}> isn't connected to anything.");
    }

    let mut out = format!("\n\n__**Connections of <#{channel}>**__\n");
    if !links.is_empty() {
        let _ = write!(out, "\n**Linked with**: {}", mention_list(&links));
    }
    if !relays_out.is_empty() {
        let _ = write!(out, "\n**Relays to**: {}", mention_list(&relays_out));
    }
    if !relays_in.is_empty() {
        let _ = write!(out, "\n**Receives relays from**: {}", mention_list(&relays_in));
    }
    for group in &groups {
        let others: Vec<ChannelId> = t
            .members_of(group)
            .into_iter()
            .filter(|c| c != channel)
            .collect();
        let _ = write!(out, "\n**Group `{group}`**: {}", if others.is_empty() {
            "no other members".to_string()
        } else {
            mention_list(&others)
        });
    }
    for (prefix, target) in &prefixes {
        let _ = write!(out, "\n**Prefix `{prefix}`** relays to <#{target}>");
    }
    for (origin, prefix) in &prefixes_in {
        let _ = write!(out, "\n**Receives prefix `{prefix}`** from <#{origin}>");
    }
    out
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use {
        super::*,
        relaybot_channels::MemoryPlatform,
        relaybot_topology::InMemoryStore,
    };

    fn ch(id: &str) -> ChannelId {
        ChannelId::from(id)
    }

    struct Fixture {
        platform: Arc<MemoryPlatform>,
        backend: Arc<InMemoryStore>,
        store: Arc<TopologyStore>,
        handler: CommandHandler,
    }

    fn fixture() -> Fixture {
        let platform = Arc::new(MemoryPlatform::new());
        platform.add_channel("1", "100");
        platform.add_channel("2", "100");
        platform.add_channel("3", "200");
        platform.grant_manage("7", "100");
        let backend = Arc::new(InMemoryStore::new());
        let store = Arc::new(TopologyStore::new(backend.clone()));
        let registry = Arc::new(WebhookRegistry::new(platform.clone(), "_relay"));
        let handler = CommandHandler::new(store.clone(), registry, platform.clone(), platform.clone())
            .with_owner(Some(UserId::from("1000")));
        Fixture {
            platform,
            backend,
            store,
            handler,
        }
    }

    fn inv(user: &str) -> Invocation {
        Invocation {
            server_id: ServerId::from("100"),
            channel_id: ch("1"),
            author: Author {
                id: user.into(),
                name: "dave".into(),
                discriminator: None,
                avatar_url: None,
                bot: false,
            },
        }
    }

    async fn run(f: &Fixture, user: &str, text: &str) -> Result<String> {
        let parsed = parse(text)?;
        f.handler.run(&inv(user), parsed).await
    }

    #[tokio::test]
    async fn link_provisions_both_sides_then_persists() {
        let f = fixture();
        run(&f, "7", "link 2").await.unwrap();
        assert!(f.store.read(|t| t.has_link(&ch("2"), &ch("1"))).await);
        assert_eq!(f.platform.endpoints_of(&ch("1")).len(), 1);
        assert_eq!(f.platform.endpoints_of(&ch("2")).len(), 1);
        assert_eq!(f.backend.save_count(), 1);

        let err = run(&f, "7", "link <#1> <#2>").await.unwrap_err();
        assert!(matches!(err, CommandError::AlreadyExists { .. }));
    }

    #[tokio::test]
    async fn link_across_servers_needs_both() {
        let f = fixture();
        let err = run(&f, "7", "link 3").await.unwrap_err();
        assert!(matches!(err, CommandError::Authorization { server } if server.as_str() == "200"));
        assert!(f.store.snapshot().await.is_empty());
        assert!(f.platform.endpoints_of(&ch("1")).is_empty());

        f.platform.grant_manage("7", "200");
        run(&f, "7", "link 3").await.unwrap();
    }

    #[tokio::test]
    async fn owner_bypasses_authorization() {
        let f = fixture();
        run(&f, "1000", "relay 1 3").await.unwrap();
        assert!(f.store.read(|t| t.has_relay(&ch("1"), &ch("3"))).await);
    }

    #[tokio::test]
    async fn denied_webhooks_leave_no_relationship() {
        let f = fixture();
        f.platform.deny_endpoints(&ch("2"));
        let err = run(&f, "7", "link 1 2").await.unwrap_err();
        assert!(matches!(err, CommandError::PermissionDenied { channel } if channel == ch("2")));
        assert!(f.store.snapshot().await.is_empty());
        // The first endpoint stays provisioned.
        assert_eq!(f.platform.endpoints_of(&ch("1")).len(), 1);
    }

    #[tokio::test]
    async fn persistence_failure_is_reported() {
        let f = fixture();
        f.backend.set_fail_writes(true);
        let err = run(&f, "7", "relay 2").await.unwrap_err();
        assert!(matches!(err, CommandError::Persistence { .. }));
        assert!(f.store.snapshot().await.is_empty());
    }

    #[tokio::test]
    async fn unknown_channel_is_not_found() {
        let f = fixture();
        let err = run(&f, "7", "relay 999").await.unwrap_err();
        assert!(matches!(err, CommandError::NotFound { channel } if channel == ch("999")));
    }

    #[tokio::test]
    async fn self_reference_is_rejected() {
        let f = fixture();
        assert!(matches!(
            run(&f, "7", "link 1").await.unwrap_err(),
            CommandError::SelfReference
        ));
        assert!(matches!(
            run(&f, "7", "prefix bot: 1").await.unwrap_err(),
            CommandError::SelfReference
        ));
    }

    #[tokio::test]
    async fn unlink_reports_missing_link() {
        let f = fixture();
        let err = run(&f, "7", "unlink 2").await.unwrap_err();
        assert!(matches!(err, CommandError::NotLinked { .. }));
    }

    #[tokio::test]
    async fn unlink_all_releases_orphaned_endpoints() {
        let f = fixture();
        run(&f, "7", "link 2").await.unwrap();
        let reply = run(&f, "7", "unlink-all").await.unwrap();
        assert!(reply.contains("1 link(s)"));
        assert!(f.store.snapshot().await.is_empty());
        assert_eq!(f.platform.deleted_endpoints().len(), 2);

        let err = run(&f, "7", "unlink_all").await.unwrap_err();
        assert!(matches!(err, CommandError::NotLinked { .. }));
    }

    #[tokio::test]
    async fn release_waits_for_a_concurrent_attach() {
        let f = fixture();
        run(&f, "7", "relay 2").await.unwrap();

        // Another command has provisioned channel 2 and is about to commit.
        let held = f.handler.hold([ch("2")]).await;
        let attach = async {
            f.store
                .update(|t| t.add_relay(&ch("3"), &ch("2")))
                .await
                .unwrap();
            drop(held);
        };
        let (unrelay, ()) = tokio::join!(run(&f, "7", "unrelay 2"), attach);
        unrelay.unwrap();

        assert!(f.platform.deleted_endpoints().is_empty());
        assert!(f.handler.registry.cached(&ch("2")).is_some());
    }

    #[tokio::test]
    async fn group_and_ungroup() {
        let f = fixture();
        run(&f, "7", "group lobby 1 2").await.unwrap();
        assert!(f.store.read(|t| t.all_destinations(&ch("1")).contains(&ch("2"))).await);

        let err = run(&f, "7", "group lobby 2").await.unwrap_err();
        assert!(matches!(err, CommandError::AlreadyExists { .. }));

        run(&f, "7", "ungroup lobby 2").await.unwrap();
        assert_eq!(
            f.store.read(|t| t.members_of("lobby")).await.into_iter().collect::<Vec<_>>(),
            vec![ch("1")]
        );
    }

    #[tokio::test]
    async fn joining_a_cross_server_group_needs_every_server() {
        let f = fixture();
        run(&f, "1000", "group mixed 3").await.unwrap();
        let err = run(&f, "7", "group mixed 2").await.unwrap_err();
        assert!(matches!(err, CommandError::Authorization { .. }));
    }

    #[tokio::test]
    async fn prefix_lifecycle() {
        let f = fixture();
        run(&f, "7", "prefix bot: 2").await.unwrap();
        assert_eq!(
            f.store.read(|t| t.target_for_prefix(&ch("1"), "bot:").cloned()).await,
            Some(ch("2"))
        );
        let err = run(&f, "7", "prefix BOT: 2").await.unwrap_err();
        assert!(matches!(err, CommandError::AlreadyExists { .. }));

        run(&f, "7", "unprefix bot:").await.unwrap();
        let err = run(&f, "7", "unprefix bot:").await.unwrap_err();
        assert!(matches!(err, CommandError::NotLinked { .. }));
    }

    #[tokio::test]
    async fn links_lists_connections() {
        let f = fixture();
        assert!(run(&f, "7", "links").await.unwrap().contains("isn't connected"));
        run(&f, "7", "link 2").await.unwrap();
        run(&f, "7", "prefix bot: 2").await.unwrap();
        let report = run(&f, "7", "links").await.unwrap();
        assert!(report.contains("**Linked with**: <#2>"));
        assert!(report.contains("**Prefix `bot:`** relays to <#2>"));
    }

    #[tokio::test]
    async fn config_get_and_set() {
        let f = fixture();
        let reply = run(&f, "7", "config control_chars").await.unwrap();
        assert!(reply.contains("`;`"));
        assert!(reply.contains("mention me"));

        run(&f, "7", "config control_chars !").await.unwrap();
        assert_eq!(f.store.control_chars(&ServerId::from("100")).await, "!");

        let err = run(&f, "7", "config colour red").await.unwrap_err();
        assert!(matches!(err, CommandError::UnknownKey { .. }));
    }

    #[tokio::test]
    async fn config_requires_manage_server() {
        let f = fixture();
        let err = run(&f, "8", "config control_chars !").await.unwrap_err();
        assert!(matches!(err, CommandError::Authorization { .. }));
        assert_eq!(f.store.control_chars(&ServerId::from("100")).await, ";");
    }

    #[tokio::test]
    async fn execute_formats_replies() {
        let f = fixture();
        let reply = f.handler.execute(&inv("7"), "help").await;
        assert!(reply.starts_with("<@7> "));
        let reply = f.handler.execute(&inv("7"), "frobnicate").await;
        assert!(reply.contains("**Error**: Unknown command: `frobnicate`"));
        let reply = f.handler.execute(&inv("7"), "link").await;
        assert!(reply.contains("Usage: `link [channel] <channel>`"));
    }
}
