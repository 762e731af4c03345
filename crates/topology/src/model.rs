//! In-memory relation model.
//!
//! Four independent relation kinds share the same channel key space:
//!
//! - **links**: symmetric; every mutation updates both adjacency entries.
//! - **relays**: directional `origin -> target` edges, kept as a set.
//! - **groups**: named member sets; members mutually relay, computed lazily.
//! - **prefixes**: `(origin, prefix) -> target`, at most one target per pair.
//!
//! No relation may reference a channel equal to itself. Empty adjacency
//! entries are removed so the persisted layout never carries dangling keys.

use std::collections::{BTreeMap, BTreeSet};

use relaybot_common::ChannelId;

use crate::{Error, Result};

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Topology {
    pub(crate) links: BTreeMap<ChannelId, BTreeSet<ChannelId>>,
    pub(crate) relays: BTreeMap<ChannelId, BTreeSet<ChannelId>>,
    pub(crate) groups: BTreeMap<String, BTreeSet<ChannelId>>,
    pub(crate) prefixes: BTreeMap<ChannelId, BTreeMap<String, ChannelId>>,
}

/// What `unlink_all` removed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UnlinkSummary {
    pub links: Vec<ChannelId>,
    pub relays: Vec<ChannelId>,
    pub groups: Vec<String>,
}

impl UnlinkSummary {
    pub fn is_empty(&self) -> bool {
        self.links.is_empty() && self.relays.is_empty() && self.groups.is_empty()
    }
}

/// Relationships severed by [`Topology::detach_destination`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Detached {
    pub link: bool,
    pub relay: bool,
    pub groups: Vec<String>,
    pub prefixes: Vec<String>,
}

impl Detached {
    pub fn is_empty(&self) -> bool {
        !self.link && !self.relay && self.groups.is_empty() && self.prefixes.is_empty()
    }
}

fn reject_self(a: &ChannelId, b: &ChannelId) -> Result<()> {
    if a == b {
        return Err(Error::self_reference(a));
    }
    Ok(())
}

fn insert_edge(
    map: &mut BTreeMap<ChannelId, BTreeSet<ChannelId>>,
    from: &ChannelId,
    to: &ChannelId,
) -> bool {
    map.entry(from.clone()).or_default().insert(to.clone())
}

fn remove_edge(
    map: &mut BTreeMap<ChannelId, BTreeSet<ChannelId>>,
    from: &ChannelId,
    to: &ChannelId,
) -> bool {
    let Some(targets) = map.get_mut(from) else {
        return false;
    };
    let removed = targets.remove(to);
    if targets.is_empty() {
        map.remove(from);
    }
    removed
}

impl Topology {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.links.is_empty()
            && self.relays.is_empty()
            && self.groups.is_empty()
            && self.prefixes.is_empty()
    }

    // ── Links ───────────────────────────────────────────────────────────────

    /// Link `a` and `b` in both directions. Returns `false` if the link
    /// already existed (no-op).
    pub fn add_link(&mut self, a: &ChannelId, b: &ChannelId) -> Result<bool> {
        reject_self(a, b)?;
        let forward = insert_edge(&mut self.links, a, b);
        let backward = insert_edge(&mut self.links, b, a);
        Ok(forward || backward)
    }

    pub fn remove_link(&mut self, a: &ChannelId, b: &ChannelId) -> bool {
        let forward = remove_edge(&mut self.links, a, b);
        let backward = remove_edge(&mut self.links, b, a);
        forward || backward
    }

    pub fn has_link(&self, a: &ChannelId, b: &ChannelId) -> bool {
        self.links.get(a).is_some_and(|targets| targets.contains(b))
    }

    pub fn links_of(&self, a: &ChannelId) -> BTreeSet<ChannelId> {
        self.links.get(a).cloned().unwrap_or_default()
    }

    // ── Relays ──────────────────────────────────────────────────────────────

    /// Add a one-way relay. Relays form a set per origin, so repeating an
    /// existing relay is a no-op returning `false`.
    pub fn add_relay(&mut self, origin: &ChannelId, target: &ChannelId) -> Result<bool> {
        reject_self(origin, target)?;
        Ok(insert_edge(&mut self.relays, origin, target))
    }

    pub fn remove_relay(&mut self, origin: &ChannelId, target: &ChannelId) -> bool {
        remove_edge(&mut self.relays, origin, target)
    }

    pub fn has_relay(&self, origin: &ChannelId, target: &ChannelId) -> bool {
        self.relays
            .get(origin)
            .is_some_and(|targets| targets.contains(target))
    }

    pub fn relays_of(&self, origin: &ChannelId) -> BTreeSet<ChannelId> {
        self.relays.get(origin).cloned().unwrap_or_default()
    }

    /// Channels relaying one-way into `target`.
    pub fn relay_sources(&self, target: &ChannelId) -> BTreeSet<ChannelId> {
        self.relays
            .iter()
            .filter(|(_, targets)| targets.contains(target))
            .map(|(origin, _)| origin.clone())
            .collect()
    }

    // ── Groups ──────────────────────────────────────────────────────────────

    /// Add `channel` to `group`, creating the group on first use.
    pub fn group_channel(&mut self, group: &str, channel: &ChannelId) -> bool {
        self.groups
            .entry(group.to_string())
            .or_default()
            .insert(channel.clone())
    }

    /// Remove `channel` from `group`; an emptied group disappears.
    pub fn ungroup_channel(&mut self, group: &str, channel: &ChannelId) -> bool {
        let Some(members) = self.groups.get_mut(group) else {
            return false;
        };
        let removed = members.remove(channel);
        if members.is_empty() {
            self.groups.remove(group);
        }
        removed
    }

    pub fn is_grouped(&self, group: &str, channel: &ChannelId) -> bool {
        self.groups
            .get(group)
            .is_some_and(|members| members.contains(channel))
    }

    pub fn groups_of(&self, channel: &ChannelId) -> BTreeSet<String> {
        self.groups
            .iter()
            .filter(|(_, members)| members.contains(channel))
            .map(|(name, _)| name.clone())
            .collect()
    }

    pub fn members_of(&self, group: &str) -> BTreeSet<ChannelId> {
        self.groups.get(group).cloned().unwrap_or_default()
    }

    pub fn group_names(&self) -> impl Iterator<Item = &str> {
        self.groups.keys().map(String::as_str)
    }

    /// Remove `channel` from every group it belongs to. Other members keep
    /// their memberships. Returns the affected group names.
    pub fn ungroup_entirely(&mut self, channel: &ChannelId) -> Vec<String> {
        let names: Vec<String> = self.groups_of(channel).into_iter().collect();
        for name in &names {
            self.ungroup_channel(name, channel);
        }
        names
    }

    // ── Prefix relays ───────────────────────────────────────────────────────

    /// Stored key of a prefix on `origin`, compared case-insensitively since
    /// matching against message text is case-insensitive.
    fn prefix_key(&self, origin: &ChannelId, prefix: &str) -> Option<&String> {
        let wanted = prefix.to_lowercase();
        self.prefixes
            .get(origin)?
            .keys()
            .find(|key| key.to_lowercase() == wanted)
    }

    /// Register `prefix` on `origin`. Fails with `AlreadyExists` rather than
    /// overwriting an existing target.
    pub fn set_prefix(&mut self, origin: &ChannelId, prefix: &str, target: &ChannelId) -> Result<()> {
        reject_self(origin, target)?;
        if prefix.is_empty() {
            return Err(Error::EmptyPrefix);
        }
        if let Some(existing) = self.prefix_key(origin, prefix) {
            return Err(Error::already_exists(format!(
                "prefix `{existing}` on {origin}"
            )));
        }
        self.prefixes
            .entry(origin.clone())
            .or_default()
            .insert(prefix.to_string(), target.clone());
        Ok(())
    }

    /// Remove a prefix, returning the target it pointed at.
    pub fn remove_prefix(&mut self, origin: &ChannelId, prefix: &str) -> Option<ChannelId> {
        let key = self.prefix_key(origin, prefix)?.clone();
        let entries = self.prefixes.get_mut(origin)?;
        let target = entries.remove(&key);
        if entries.is_empty() {
            self.prefixes.remove(origin);
        }
        target
    }

    pub fn has_prefix(&self, origin: &ChannelId, prefix: &str) -> bool {
        self.prefix_key(origin, prefix).is_some()
    }

    pub fn target_for_prefix(&self, origin: &ChannelId, prefix: &str) -> Option<&ChannelId> {
        let key = self.prefix_key(origin, prefix)?;
        self.prefixes.get(origin)?.get(key)
    }

    pub fn prefixes_of(&self, origin: &ChannelId) -> BTreeMap<String, ChannelId> {
        self.prefixes.get(origin).cloned().unwrap_or_default()
    }

    /// `(origin, prefix)` pairs whose prefix relay lands in `target`.
    pub fn prefix_sources(&self, target: &ChannelId) -> Vec<(ChannelId, String)> {
        self.prefixes
            .iter()
            .flat_map(|(origin, entries)| {
                entries
                    .iter()
                    .filter(|(_, t)| *t == target)
                    .map(|(prefix, _)| (origin.clone(), prefix.clone()))
            })
            .collect()
    }

    // ── Resolution ──────────────────────────────────────────────────────────

    /// Other members of every group `origin` belongs to.
    pub fn group_peers(&self, origin: &ChannelId) -> BTreeSet<ChannelId> {
        self.groups
            .values()
            .filter(|members| members.contains(origin))
            .flatten()
            .filter(|member| *member != origin)
            .cloned()
            .collect()
    }

    /// Union of links, outgoing relays, and group peers of `origin`, never
    /// including `origin` itself. Prefix relays are content-dependent and
    /// not part of this set.
    pub fn all_destinations(&self, origin: &ChannelId) -> BTreeSet<ChannelId> {
        let mut out = self.links_of(origin);
        out.extend(self.relays_of(origin));
        out.extend(self.group_peers(origin));
        out.remove(origin);
        out
    }

    // ── Bulk removal ────────────────────────────────────────────────────────

    /// Sever `origin`'s links (both sides), its outgoing relays, and its group
    /// memberships.
    ///
    /// Incoming relays from other channels are kept: a relay belongs to its
    /// origin and only that side can remove it. Prefix relays are a separate
    /// kind and are left to `remove_prefix`.
    pub fn unlink_all(&mut self, origin: &ChannelId) -> UnlinkSummary {
        let links: Vec<ChannelId> = self.links_of(origin).into_iter().collect();
        for other in &links {
            self.remove_link(origin, other);
        }
        let relays: Vec<ChannelId> = self
            .relays
            .remove(origin)
            .map(|targets| targets.into_iter().collect())
            .unwrap_or_default();
        let groups = self.ungroup_entirely(origin);
        UnlinkSummary {
            links,
            relays,
            groups,
        }
    }

    /// Remove every relationship through which `origin` reaches `destination`.
    /// Used when delivery to `destination` proved impossible.
    pub fn detach_destination(&mut self, origin: &ChannelId, destination: &ChannelId) -> Detached {
        let link = self.remove_link(origin, destination);
        let relay = self.remove_relay(origin, destination);

        let groups: Vec<String> = self
            .groups
            .iter()
            .filter(|(_, members)| members.contains(origin) && members.contains(destination))
            .map(|(name, _)| name.clone())
            .collect();
        for name in &groups {
            self.ungroup_channel(name, destination);
        }

        let prefixes: Vec<String> = self
            .prefixes_of(origin)
            .into_iter()
            .filter(|(_, target)| target == destination)
            .map(|(prefix, _)| prefix)
            .collect();
        for prefix in &prefixes {
            self.remove_prefix(origin, prefix);
        }

        Detached {
            link,
            relay,
            groups,
            prefixes,
        }
    }

    /// Drop a channel that no longer exists from every relation, in both
    /// directions. Returns whether anything was removed.
    pub fn forget_channel(&mut self, channel: &ChannelId) -> bool {
        let before = self.clone();
        self.unlink_all(channel);
        self.prefixes.remove(channel);
        for origin in self.relay_sources(channel) {
            self.remove_relay(&origin, channel);
        }
        for (origin, prefix) in self.prefix_sources(channel) {
            self.remove_prefix(&origin, &prefix);
        }
        *self != before
    }

    /// Whether anything still delivers into `channel`.
    pub fn has_incoming(&self, channel: &ChannelId) -> bool {
        self.links.contains_key(channel)
            || !self.group_peers(channel).is_empty()
            || !self.relay_sources(channel).is_empty()
            || !self.prefix_sources(channel).is_empty()
    }

    /// Every channel mentioned by any relation, as origin or destination.
    pub fn channels(&self) -> BTreeSet<ChannelId> {
        let mut out = BTreeSet::new();
        for (origin, targets) in self.links.iter().chain(self.relays.iter()) {
            out.insert(origin.clone());
            out.extend(targets.iter().cloned());
        }
        for members in self.groups.values() {
            out.extend(members.iter().cloned());
        }
        for (origin, entries) in &self.prefixes {
            out.insert(origin.clone());
            out.extend(entries.values().cloned());
        }
        out
    }
}
