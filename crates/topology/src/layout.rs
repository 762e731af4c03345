//! On-disk shape of the relation files.
//!
//! ```yaml
//! # channels.yml   origin -> [target, ...]   (links, both directions stored)
//! # relays.yml     origin -> [target, ...]
//! # groups.yml     group  -> [channel, ...]
//! # prefixes.yml   origin -> {prefix: target}
//! ```

use std::collections::BTreeMap;

use {
    relaybot_common::ChannelId,
    serde::{Deserialize, Serialize},
    tracing::warn,
};

use crate::model::Topology;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Relations {
    pub channels: BTreeMap<ChannelId, Vec<ChannelId>>,
    pub relays: BTreeMap<ChannelId, Vec<ChannelId>>,
    pub groups: BTreeMap<String, Vec<ChannelId>>,
    pub prefixes: BTreeMap<ChannelId, BTreeMap<String, ChannelId>>,
}

impl From<&Topology> for Relations {
    fn from(topology: &Topology) -> Self {
        fn flatten<K: Clone + Ord>(
            map: &BTreeMap<K, std::collections::BTreeSet<ChannelId>>,
        ) -> BTreeMap<K, Vec<ChannelId>> {
            map.iter()
                .map(|(k, set)| (k.clone(), set.iter().cloned().collect()))
                .collect()
        }

        Self {
            channels: flatten(&topology.links),
            relays: flatten(&topology.relays),
            groups: flatten(&topology.groups),
            prefixes: topology.prefixes.clone(),
        }
    }
}

impl Relations {
    /// Rebuild the model, repairing what the invariants forbid: self
    /// references are dropped and one-sided links gain their reverse edge.
    /// Returns the number of repaired entries alongside the model.
    pub fn into_topology(self) -> (Topology, usize) {
        let mut topology = Topology::new();
        let mut repaired = 0;

        // Every persisted link should be listed from both ends.
        for (origin, targets) in &self.channels {
            for target in targets.iter().filter(|t| *t != origin) {
                let listed_back = self
                    .channels
                    .get(target)
                    .is_some_and(|back| back.contains(origin));
                if !listed_back {
                    warn!(%origin, %target, "restoring one-sided persisted link");
                    repaired += 1;
                }
            }
        }

        for (origin, targets) in self.channels {
            for target in targets {
                if let Err(e) = topology.add_link(&origin, &target) {
                    warn!(%origin, error = %e, "dropping invalid persisted link");
                    repaired += 1;
                }
            }
        }

        for (origin, targets) in self.relays {
            for target in targets {
                match topology.add_relay(&origin, &target) {
                    Ok(true) => {},
                    Ok(false) => repaired += 1,
                    Err(e) => {
                        warn!(%origin, error = %e, "dropping invalid persisted relay");
                        repaired += 1;
                    },
                }
            }
        }

        for (group, members) in self.groups {
            for member in members {
                topology.group_channel(&group, &member);
            }
        }

        for (origin, entries) in self.prefixes {
            for (prefix, target) in entries {
                if let Err(e) = topology.set_prefix(&origin, &prefix, &target) {
                    warn!(%origin, prefix = %prefix, error = %e, "dropping invalid persisted prefix");
                    repaired += 1;
                }
            }
        }

        (topology, repaired)
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;

    fn ch(id: &str) -> ChannelId {
        ChannelId::from(id)
    }

    #[test]
    fn roundtrip_preserves_topology() {
        let mut t = Topology::new();
        t.add_link(&ch("1"), &ch("2")).unwrap();
        t.add_relay(&ch("3"), &ch("1")).unwrap();
        t.group_channel("lobby", &ch("4"));
        t.group_channel("lobby", &ch("5"));
        t.set_prefix(&ch("1"), "bot:", &ch("6")).unwrap();

        let relations = Relations::from(&t);
        assert_eq!(relations.channels.get(&ch("2")), Some(&vec![ch("1")]));

        let (back, repaired) = relations.into_topology();
        assert_eq!(back, t);
        assert_eq!(repaired, 0);
    }

    #[test]
    fn one_sided_link_is_repaired() {
        let relations = Relations {
            channels: [(ch("1"), vec![ch("2")])].into_iter().collect(),
            ..Default::default()
        };
        let (t, repaired) = relations.into_topology();
        assert!(t.has_link(&ch("2"), &ch("1")));
        assert_eq!(repaired, 1);
    }

    #[test]
    fn invalid_entries_are_dropped() {
        let relations = Relations {
            channels: [(ch("1"), vec![ch("1")])].into_iter().collect(),
            relays: [(ch("2"), vec![ch("3"), ch("3")])].into_iter().collect(),
            ..Default::default()
        };
        let (t, repaired) = relations.into_topology();
        assert!(t.links_of(&ch("1")).is_empty());
        assert_eq!(t.relays_of(&ch("2")).len(), 1);
        assert_eq!(repaired, 2);
    }

    #[test]
    fn parses_yaml_layout() {
        let yaml = "channels:\n  '1': ['2']\n  '2': ['1']\nprefixes:\n  '1':\n    'bot:': '3'\n";
        let relations: Relations = serde_yaml::from_str(yaml).unwrap();
        let (t, _) = relations.into_topology();
        assert!(t.has_link(&ch("1"), &ch("2")));
        assert_eq!(t.target_for_prefix(&ch("1"), "bot:"), Some(&ch("3")));
    }
}
