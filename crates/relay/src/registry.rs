//! Cache of per-channel delivery endpoints.
//!
//! Endpoints are never persisted. They are looked up by name on the platform
//! the first time a channel needs one, created when missing, and dropped from
//! the cache as soon as a delivery shows the cached copy no longer works.

use std::sync::Arc;

use {
    dashmap::DashMap,
    relaybot_channels::{Endpoint, EndpointProvider, Error as ProviderError},
    relaybot_common::ChannelId,
    tokio::sync::Mutex,
    tracing::{debug, info, warn},
};

/// Result of [`WebhookRegistry::ensure_hook`].
#[derive(Debug, Clone, PartialEq)]
pub enum HookOutcome {
    Ready(Endpoint),
    /// The channel no longer exists on the platform.
    NotFound,
    /// The bot may not manage endpoints in the channel.
    PermissionDenied,
    /// The platform could not be reached or answered with a retryable error.
    Transient(String),
}

impl HookOutcome {
    pub fn endpoint(&self) -> Option<&Endpoint> {
        match self {
            Self::Ready(endpoint) => Some(endpoint),
            _ => None,
        }
    }

    fn from_error(channel: &ChannelId, error: ProviderError) -> Self {
        match error {
            ProviderError::NotFound { .. } => Self::NotFound,
            ProviderError::PermissionDenied { .. } => Self::PermissionDenied,
            e if e.is_transient() => Self::Transient(e.to_string()),
            e => {
                warn!(%channel, error = %e, "endpoint provisioning rejected");
                Self::Transient(e.to_string())
            },
        }
    }
}

pub struct WebhookRegistry {
    provider: Arc<dyn EndpointProvider>,
    endpoint_name: String,
    cache: DashMap<ChannelId, Endpoint>,
    /// Ids of every endpoint this registry has handed out, to recognise
    /// messages the relay itself posted.
    owned: DashMap<String, ChannelId>,
    provisioning: DashMap<ChannelId, Arc<Mutex<()>>>,
}

impl WebhookRegistry {
    pub fn new(provider: Arc<dyn EndpointProvider>, endpoint_name: impl Into<String>) -> Self {
        Self {
            provider,
            endpoint_name: endpoint_name.into(),
            cache: DashMap::new(),
            owned: DashMap::new(),
            provisioning: DashMap::new(),
        }
    }

    pub fn endpoint_name(&self) -> &str {
        &self.endpoint_name
    }

    /// Return the channel's relay endpoint, creating it if needed.
    ///
    /// Concurrent calls for one channel are serialized so a channel never
    /// ends up with two endpoints of the same name.
    pub async fn ensure_hook(&self, channel: &ChannelId) -> HookOutcome {
        if let Some(endpoint) = self.cached(channel) {
            return HookOutcome::Ready(endpoint);
        }

        let lock = self
            .provisioning
            .entry(channel.clone())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();
        let _guard = lock.lock().await;

        // Another task may have finished provisioning while we waited.
        if let Some(endpoint) = self.cached(channel) {
            return HookOutcome::Ready(endpoint);
        }

        let outcome = match self.lookup_or_create(channel).await {
            Ok(endpoint) => {
                self.owned.insert(endpoint.id.clone(), channel.clone());
                self.cache.insert(channel.clone(), endpoint.clone());
                HookOutcome::Ready(endpoint)
            },
            Err(e) => HookOutcome::from_error(channel, e),
        };
        debug!(%channel, outcome = outcome_label(&outcome), "ensured relay endpoint");
        outcome
    }

    async fn lookup_or_create(&self, channel: &ChannelId) -> Result<Endpoint, ProviderError> {
        let existing = self.provider.list_endpoints(channel).await?;
        if let Some(endpoint) = existing.into_iter().find(|e| e.name == self.endpoint_name) {
            return Ok(endpoint);
        }
        let endpoint = self
            .provider
            .create_endpoint(channel, &self.endpoint_name)
            .await?;
        info!(%channel, endpoint_id = %endpoint.id, "created relay endpoint");
        Ok(endpoint)
    }

    pub fn cached(&self, channel: &ChannelId) -> Option<Endpoint> {
        self.cache.get(channel).map(|e| e.value().clone())
    }

    /// Forget the cached endpoint. The next `ensure_hook` asks the platform.
    pub fn invalidate(&self, channel: &ChannelId) {
        if self.cache.remove(channel).is_some() {
            debug!(%channel, "invalidated cached endpoint");
        }
    }

    /// Whether `endpoint_id` belongs to an endpoint this registry provisioned.
    pub fn is_relay_endpoint(&self, endpoint_id: &str) -> bool {
        self.owned.contains_key(endpoint_id)
    }

    /// Delete the channel's endpoint on the platform. Best effort.
    pub async fn release(&self, channel: &ChannelId) {
        let Some((_, endpoint)) = self.cache.remove(channel) else {
            return;
        };
        self.owned.remove(&endpoint.id);
        match self.provider.delete_endpoint(&endpoint).await {
            Ok(()) => info!(%channel, endpoint_id = %endpoint.id, "deleted relay endpoint"),
            Err(e) => warn!(%channel, error = %e, "failed to delete relay endpoint"),
        }
    }
}

fn outcome_label(outcome: &HookOutcome) -> &'static str {
    match outcome {
        HookOutcome::Ready(_) => "ready",
        HookOutcome::NotFound => "not_found",
        HookOutcome::PermissionDenied => "permission_denied",
        HookOutcome::Transient(_) => "transient",
    }
}
