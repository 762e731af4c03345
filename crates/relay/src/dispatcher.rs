//! Deliver a message to every destination resolved for its origin.

use std::{sync::Arc, time::Duration};

use {
    futures::future::join_all,
    relaybot_channels::{
        ChannelOutbound, Delivery, DeliveryRequest, Error as ProviderError, MAX_CONTENT_CHARS,
        truncate_chars,
    },
    relaybot_common::{ChannelId, InboundMessage},
    relaybot_config::RelayConfig,
    relaybot_topology::{Detached, TopologyStore},
    tracing::{debug, error, info, warn},
};

use crate::{
    error::{RelayError, Result},
    registry::{HookOutcome, WebhookRegistry},
    resolver::{Route, resolve},
};

/// How often and how patiently transient failures are retried.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub retries: u32,
    pub backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from(&RelayConfig::default())
    }
}

impl From<&RelayConfig> for RetryPolicy {
    fn from(config: &RelayConfig) -> Self {
        Self {
            retries: config.transient_retries,
            backoff: Duration::from_millis(config.retry_backoff_ms),
        }
    }
}

impl RetryPolicy {
    /// Delay before retry number `attempt` (1-based), doubling each time.
    fn delay(&self, attempt: u32) -> Duration {
        self.backoff
            .saturating_mul(2u32.saturating_pow(attempt.saturating_sub(1)))
    }
}

/// Why a destination could not be served.
enum Failure {
    Stale(String),
    Transient(String),
    /// The platform refused this particular message.
    Rejected(String),
}

pub struct Dispatcher {
    store: Arc<TopologyStore>,
    registry: Arc<WebhookRegistry>,
    delivery: Arc<dyn Delivery>,
    outbound: Arc<dyn ChannelOutbound>,
    retry: RetryPolicy,
}

impl Dispatcher {
    pub fn new(
        store: Arc<TopologyStore>,
        registry: Arc<WebhookRegistry>,
        delivery: Arc<dyn Delivery>,
        outbound: Arc<dyn ChannelOutbound>,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            store,
            registry,
            delivery,
            outbound,
            retry,
        }
    }

    pub fn registry(&self) -> &Arc<WebhookRegistry> {
        &self.registry
    }

    /// Whether anything could be relayed from `origin` at the moment.
    pub async fn has_routes(&self, origin: &ChannelId) -> bool {
        self.store
            .read(|t| !t.all_destinations(origin).is_empty() || !t.prefixes_of(origin).is_empty())
            .await
    }

    /// Relay `message` to all of its destinations concurrently.
    ///
    /// Returns how many copies were delivered. Unreachable destinations are
    /// detached and the origin is notified before the failure is returned.
    pub async fn relay(&self, message: &InboundMessage) -> Result<usize> {
        let origin = &message.channel_id;
        let routes = self
            .store
            .read(|t| resolve(t, origin, &message.content))
            .await;
        if routes.is_empty() {
            return Ok(0);
        }

        let attachments: Vec<&str> = message.attachments.iter().map(|a| a.url.as_str()).collect();
        let pending: Vec<(Route, DeliveryRequest)> = routes
            .into_iter()
            .filter_map(|route| {
                let request = build_request(message, &route.content, &attachments);
                if request.is_empty() {
                    debug!(%origin, destination = %route.destination, "nothing to relay");
                    return None;
                }
                Some((route, request))
            })
            .collect();

        let total = pending.len();
        let results = join_all(
            pending
                .iter()
                .map(|(route, request)| self.deliver_route(origin, route, request)),
        )
        .await;

        let failures: Vec<RelayError> = results.into_iter().filter_map(|r| r.err()).collect();
        let delivered = total - failures.len();
        if failures.is_empty() {
            debug!(%origin, delivered, "relayed message");
            return Ok(delivered);
        }
        Err(RelayError::Deliveries {
            origin: origin.clone(),
            total,
            failures,
        })
    }

    async fn deliver_route(
        &self,
        origin: &ChannelId,
        route: &Route,
        request: &DeliveryRequest,
    ) -> Result<()> {
        let destination = &route.destination;
        let mut attempt = 0u32;
        loop {
            attempt += 1;
            let failure = match self.try_deliver(destination, request).await {
                Ok(()) => return Ok(()),
                Err(failure) => failure,
            };

            match failure {
                Failure::Stale(reason) => {
                    self.detach(origin, destination, &reason).await;
                    return Err(RelayError::stale(destination, reason));
                },
                Failure::Rejected(message) => {
                    warn!(%origin, %destination, error = %message, "delivery rejected");
                    return Err(RelayError::Rejected {
                        destination: destination.clone(),
                        message,
                    });
                },
                Failure::Transient(message) if attempt > self.retry.retries => {
                    warn!(%origin, %destination, attempt, error = %message, "giving up on delivery");
                    return Err(RelayError::Transient {
                        destination: destination.clone(),
                        attempts: attempt,
                        message,
                    });
                },
                Failure::Transient(message) => {
                    debug!(%destination, attempt, error = %message, "retrying delivery");
                    tokio::time::sleep(self.retry.delay(attempt)).await;
                },
            }
        }
    }

    async fn try_deliver(
        &self,
        destination: &ChannelId,
        request: &DeliveryRequest,
    ) -> std::result::Result<(), Failure> {
        let endpoint = match self.registry.ensure_hook(destination).await {
            HookOutcome::Ready(endpoint) => endpoint,
            HookOutcome::NotFound => return Err(Failure::Stale("the channel no longer exists".into())),
            HookOutcome::PermissionDenied => {
                return Err(Failure::Stale(
                    "I do not have permission to manage webhooks there".into(),
                ));
            },
            HookOutcome::Transient(message) => return Err(Failure::Transient(message)),
        };

        match self.delivery.deliver(&endpoint, request).await {
            Ok(()) => Ok(()),
            Err(e) if e.is_transient() => Err(Failure::Transient(e.to_string())),
            Err(e @ (ProviderError::NotFound { .. } | ProviderError::PermissionDenied { .. })) => {
                self.registry.invalidate(destination);
                Err(Failure::Stale(describe(&e)))
            },
            Err(e) => Err(Failure::Rejected(e.to_string())),
        }
    }

    /// Remove whatever makes `destination` reachable from `origin` and tell
    /// the origin, once. A concurrent failure that finds nothing left to
    /// detach stays silent.
    async fn detach(&self, origin: &ChannelId, destination: &ChannelId, reason: &str) {
        let detached = match self
            .store
            .update(|t| Ok(t.detach_destination(origin, destination)))
            .await
        {
            Ok(detached) => detached,
            Err(e) => {
                error!(%origin, %destination, error = %e, "failed to persist detached destination");
                return;
            },
        };
        if detached.is_empty() {
            return;
        }
        info!(%origin, %destination, ?detached, "detached unreachable destination");

        let notice = failure_notice(destination, reason, &detached);
        if let Err(e) = self.outbound.send_text(origin, &notice).await {
            warn!(%origin, error = %e, "failed to notify origin of detached destination");
        }
    }
}

/// Attachment URLs go on their own lines after the text. Only the text is
/// shortened to fit the platform limit.
fn build_request(message: &InboundMessage, content: &str, attachments: &[&str]) -> DeliveryRequest {
    let reserved: usize = attachments.iter().map(|url| url.chars().count() + 1).sum();
    let budget = MAX_CONTENT_CHARS.saturating_sub(reserved);
    let mut text = truncate_chars(content, budget).to_string();
    for url in attachments {
        if !text.is_empty() {
            text.push('\n');
        }
        text.push_str(url);
    }
    DeliveryRequest {
        content: text,
        username: message.author.name.clone(),
        avatar_url: message.author.avatar_url.clone(),
        embeds: message.embeds.clone(),
    }
}

fn describe(error: &ProviderError) -> String {
    match error {
        ProviderError::NotFound { .. } => "the channel or its webhook no longer exists".into(),
        _ => "I am not allowed to post there".into(),
    }
}

fn failure_notice(destination: &ChannelId, reason: &str, detached: &Detached) -> String {
    let mut what = Vec::new();
    if detached.link {
        what.push("link".to_string());
    }
    if detached.relay {
        what.push("relay".to_string());
    }
    what.extend(detached.groups.iter().map(|g| format!("group `{g}`")));
    what.extend(detached.prefixes.iter().map(|p| format!("prefix `{p}`")));
    format!(
        "**Error**: Unable to relay to <#{destination}>: {reason}.\n\n\
         I have removed it ({}). Please set it up again once this is fixed.",
        what.join(", ")
    )
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use {
        super::*,
        relaybot_channels::{Failure as Injected, MemoryPlatform},
        relaybot_common::{Attachment, Author},
        relaybot_topology::InMemoryStore,
    };

    fn ch(id: &str) -> ChannelId {
        ChannelId::from(id)
    }

    fn message(channel: &str, content: &str) -> InboundMessage {
        InboundMessage {
            server_id: Some("10".into()),
            channel_id: ch(channel),
            author: Author {
                id: "7".into(),
                name: "alice".into(),
                discriminator: Some("0001".into()),
                avatar_url: Some("https://cdn.example/a.png".into()),
                bot: false,
            },
            content: content.into(),
            attachments: Vec::new(),
            embeds: Vec::new(),
            webhook_id: None,
        }
    }

    struct Fixture {
        platform: Arc<MemoryPlatform>,
        store: Arc<TopologyStore>,
        dispatcher: Dispatcher,
    }

    fn fixture(channels: &[&str]) -> Fixture {
        let platform = Arc::new(MemoryPlatform::new());
        for c in channels {
            platform.add_channel(*c, "10");
        }
        let store = Arc::new(TopologyStore::new(Arc::new(InMemoryStore::new())));
        let registry = Arc::new(WebhookRegistry::new(platform.clone(), "_relay"));
        let dispatcher = Dispatcher::new(
            store.clone(),
            registry,
            platform.clone(),
            platform.clone(),
            RetryPolicy {
                retries: 2,
                backoff: Duration::from_millis(1),
            },
        );
        Fixture {
            platform,
            store,
            dispatcher,
        }
    }

    #[tokio::test]
    async fn delivers_with_author_identity() {
        let f = fixture(&["1", "2"]);
        f.store.update(|t| t.add_link(&ch("1"), &ch("2"))).await.unwrap();

        let sent = f.dispatcher.relay(&message("1", "hello")).await.unwrap();
        assert_eq!(sent, 1);
        let got = f.platform.deliveries_to(&ch("2"));
        assert_eq!(got.len(), 1);
        assert_eq!(got[0].content, "hello");
        assert_eq!(got[0].username, "alice");
        assert_eq!(got[0].avatar_url.as_deref(), Some("https://cdn.example/a.png"));
    }

    #[tokio::test]
    async fn attachments_are_appended() {
        let f = fixture(&["1", "2"]);
        f.store.update(|t| t.add_relay(&ch("1"), &ch("2"))).await.unwrap();

        let mut msg = message("1", "look");
        msg.attachments.push(Attachment {
            url: "https://cdn.example/cat.png".into(),
            filename: "cat.png".into(),
        });
        f.dispatcher.relay(&msg).await.unwrap();
        assert_eq!(
            f.platform.deliveries_to(&ch("2"))[0].content,
            "look\nhttps://cdn.example/cat.png"
        );
    }

    #[tokio::test]
    async fn long_text_makes_room_for_attachments() {
        let f = fixture(&["1", "2"]);
        f.store.update(|t| t.add_relay(&ch("1"), &ch("2"))).await.unwrap();

        let mut msg = message("1", &"é".repeat(MAX_CONTENT_CHARS));
        msg.attachments.push(Attachment {
            url: "https://cdn.example/cat.png".into(),
            filename: "cat.png".into(),
        });
        f.dispatcher.relay(&msg).await.unwrap();

        let content = &f.platform.deliveries_to(&ch("2"))[0].content;
        assert!(content.ends_with("\nhttps://cdn.example/cat.png"));
        assert_eq!(content.chars().count(), MAX_CONTENT_CHARS);
    }

    #[tokio::test]
    async fn empty_copies_are_skipped() {
        let f = fixture(&["1", "2"]);
        f.store
            .update(|t| t.set_prefix(&ch("1"), "bot:", &ch("2")))
            .await
            .unwrap();
        assert_eq!(f.dispatcher.relay(&message("1", "bot:")).await.unwrap(), 0);
        assert_eq!(f.platform.delivery_attempts(), 0);
    }

    #[tokio::test]
    async fn transient_failures_are_retried() {
        let f = fixture(&["1", "2"]);
        f.store.update(|t| t.add_relay(&ch("1"), &ch("2"))).await.unwrap();
        f.platform.fail_deliveries(&ch("2"), Injected::Transient(2));

        f.dispatcher.relay(&message("1", "hi")).await.unwrap();
        assert_eq!(f.platform.delivery_attempts(), 3);
        assert!(f.store.read(|t| t.has_relay(&ch("1"), &ch("2"))).await);
    }

    #[tokio::test]
    async fn persistent_transient_failure_keeps_topology() {
        let f = fixture(&["1", "2"]);
        f.store.update(|t| t.add_relay(&ch("1"), &ch("2"))).await.unwrap();
        f.platform.fail_deliveries(&ch("2"), Injected::Transient(10));

        let err = f.dispatcher.relay(&message("1", "hi")).await.unwrap_err();
        let RelayError::Deliveries { failures, .. } = err else {
            panic!("expected aggregated failure");
        };
        assert!(matches!(failures[0], RelayError::Transient { attempts: 3, .. }));
        assert!(f.store.read(|t| t.has_relay(&ch("1"), &ch("2"))).await);
        assert!(f.platform.messages_to(&ch("1")).is_empty());
    }

    #[tokio::test]
    async fn forbidden_destination_is_detached() {
        let f = fixture(&["1", "2", "3"]);
        f.store.update(|t| t.add_link(&ch("1"), &ch("2"))).await.unwrap();
        f.store.update(|t| t.add_link(&ch("1"), &ch("3"))).await.unwrap();
        f.platform.fail_deliveries(&ch("2"), Injected::Forbidden);

        let err = f.dispatcher.relay(&message("1", "hi")).await.unwrap_err();
        assert!(matches!(err, RelayError::Deliveries { total: 2, .. }));
        assert!(!f.store.read(|t| t.has_link(&ch("1"), &ch("2"))).await);
        assert!(f.store.read(|t| t.has_link(&ch("1"), &ch("3"))).await);
        assert_eq!(f.platform.deliveries_to(&ch("3")).len(), 1);
        assert_eq!(f.platform.messages_to(&ch("1")).len(), 1);
    }

    #[tokio::test]
    async fn missing_destination_is_detached_once() {
        let f = fixture(&["1"]);
        f.store.update(|t| t.add_relay(&ch("1"), &ch("2"))).await.unwrap();

        assert!(f.dispatcher.relay(&message("1", "a")).await.is_err());
        assert_eq!(f.dispatcher.relay(&message("1", "b")).await.unwrap(), 0);
        assert!(f.store.snapshot().await.is_empty());
        assert_eq!(f.platform.messages_to(&ch("1")).len(), 1);
    }

    #[tokio::test]
    async fn rejected_message_keeps_destination() {
        let f = fixture(&["1", "2"]);
        f.store.update(|t| t.add_relay(&ch("1"), &ch("2"))).await.unwrap();
        f.platform.fail_deliveries(&ch("2"), Injected::Rejected);

        let err = f.dispatcher.relay(&message("1", "hi")).await.unwrap_err();
        let RelayError::Deliveries { failures, .. } = err else {
            panic!("expected aggregated failure");
        };
        assert!(matches!(failures[0], RelayError::Rejected { .. }));
        assert_eq!(f.platform.delivery_attempts(), 1);
        assert!(f.store.read(|t| t.has_relay(&ch("1"), &ch("2"))).await);
        assert!(f.platform.messages_to(&ch("1")).is_empty());
    }

    #[test]
    fn backoff_doubles() {
        let policy = RetryPolicy {
            retries: 3,
            backoff: Duration::from_millis(100),
        };
        assert_eq!(policy.delay(1), Duration::from_millis(100));
        assert_eq!(policy.delay(3), Duration::from_millis(400));
    }
}
