//! Turn an origin channel and message text into delivery routes.

use std::collections::BTreeMap;

use {relaybot_common::ChannelId, relaybot_topology::Topology};

/// One destination and the text it should receive.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Route {
    pub destination: ChannelId,
    pub content: String,
    /// The prefix that selected or rewrote this route, if any.
    pub prefix: Option<String>,
}

/// Strip `prefix` from the front of `text`, comparing case-insensitively.
pub fn strip_prefix_ignore_case<'a>(text: &'a str, prefix: &str) -> Option<&'a str> {
    let mut rest = text.char_indices();
    for expected in prefix.chars() {
        let (_, got) = rest.next()?;
        if !got.to_lowercase().eq(expected.to_lowercase()) {
            return None;
        }
    }
    let offset = rest.next().map_or(text.len(), |(idx, _)| idx);
    Some(&text[offset..])
}

/// Find the registered prefix matching the start of `text`.
///
/// When several prefixes match, the longest one wins so that `!foo` is not
/// shadowed by `!f`.
pub fn match_prefix<'p, 't>(
    prefixes: &'p BTreeMap<String, ChannelId>,
    text: &'t str,
) -> Option<(&'p str, &'p ChannelId, &'t str)> {
    prefixes
        .iter()
        .filter_map(|(prefix, target)| {
            strip_prefix_ignore_case(text, prefix).map(|rest| (prefix.as_str(), target, rest))
        })
        .max_by_key(|(prefix, ..)| prefix.chars().count())
}

/// Compute every route for a message posted in `origin`.
///
/// Links, relays and group peers all receive `text` unchanged. A matching
/// prefix adds its target, which receives the text with the prefix removed;
/// if that target is also reached another way, the stripped text wins. The
/// origin never appears among the routes.
pub fn resolve(topology: &Topology, origin: &ChannelId, text: &str) -> Vec<Route> {
    let mut routes: BTreeMap<ChannelId, Route> = topology
        .all_destinations(origin)
        .into_iter()
        .map(|destination| {
            let route = Route {
                destination: destination.clone(),
                content: text.to_string(),
                prefix: None,
            };
            (destination, route)
        })
        .collect();

    let prefixes = topology.prefixes_of(origin);
    if let Some((prefix, target, rest)) = match_prefix(&prefixes, text) {
        routes.insert(target.clone(), Route {
            destination: target.clone(),
            content: rest.to_string(),
            prefix: Some(prefix.to_string()),
        });
    }

    routes.remove(origin);
    routes.into_values().collect()
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use {super::*, rstest::rstest};

    fn ch(id: &str) -> ChannelId {
        ChannelId::from(id)
    }

    #[rstest]
    #[case("!foo bar", "!foo", Some(" bar"))]
    #[case("BOT:status", "bot:", Some("status"))]
    #[case("bot:", "bot:", Some(""))]
    #[case("bo", "bot:", None)]
    #[case("ÄRGER los", "ärger", Some(" los"))]
    #[case("hello", "", Some("hello"))]
    fn strips_case_insensitively(
        #[case] text: &str,
        #[case] prefix: &str,
        #[case] expected: Option<&str>,
    ) {
        assert_eq!(strip_prefix_ignore_case(text, prefix), expected);
    }

    #[test]
    fn longest_prefix_wins() {
        let prefixes: BTreeMap<String, ChannelId> =
            [("!f".to_string(), ch("2")), ("!foo".to_string(), ch("3"))]
                .into_iter()
                .collect();
        let (prefix, target, rest) = match_prefix(&prefixes, "!foo x").unwrap();
        assert_eq!((prefix, target, rest), ("!foo", &ch("3"), " x"));
    }

    #[test]
    fn prefix_route_adds_to_links() {
        let mut t = Topology::new();
        t.add_link(&ch("1"), &ch("2")).unwrap();
        t.set_prefix(&ch("1"), "!foo", &ch("3")).unwrap();

        let routes = resolve(&t, &ch("1"), "!foo bar");
        assert_eq!(routes, vec![
            Route {
                destination: ch("2"),
                content: "!foo bar".into(),
                prefix: None,
            },
            Route {
                destination: ch("3"),
                content: " bar".into(),
                prefix: Some("!foo".into()),
            },
        ]);
    }

    #[test]
    fn prefix_only_destination() {
        let mut t = Topology::new();
        t.set_prefix(&ch("1"), "bot:", &ch("2")).unwrap();

        let routes = resolve(&t, &ch("1"), "bot:status");
        assert_eq!(routes.len(), 1);
        assert_eq!(routes[0].destination, ch("2"));
        assert_eq!(routes[0].content, "status");

        assert!(resolve(&t, &ch("1"), "plain").is_empty());
    }

    #[test]
    fn stripped_content_wins_for_shared_destination() {
        let mut t = Topology::new();
        t.add_relay(&ch("1"), &ch("2")).unwrap();
        t.set_prefix(&ch("1"), "bot:", &ch("2")).unwrap();

        let routes = resolve(&t, &ch("1"), "bot:ping");
        assert_eq!(routes.len(), 1);
        assert_eq!(routes[0].content, "ping");
    }

    #[test]
    fn group_members_reach_each_other_but_not_self() {
        let mut t = Topology::new();
        t.group_channel("g", &ch("1"));
        t.group_channel("g", &ch("2"));
        t.group_channel("h", &ch("1"));
        t.group_channel("h", &ch("3"));

        let dests: Vec<ChannelId> = resolve(&t, &ch("1"), "hi")
            .into_iter()
            .map(|r| r.destination)
            .collect();
        assert_eq!(dests, vec![ch("2"), ch("3")]);
    }
}
