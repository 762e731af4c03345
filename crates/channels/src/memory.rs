//! In-memory platform for tests and dry runs.
//!
//! Channels, endpoints and management rights are plain maps. Every call is
//! recorded so callers can assert on what was posted where, and failures can
//! be injected per channel.

use std::{
    collections::{BTreeMap, BTreeSet},
    sync::{
        Mutex,
        atomic::{AtomicUsize, Ordering},
    },
};

use {
    async_trait::async_trait,
    relaybot_common::{ChannelId, ServerId, UserId},
    secrecy::Secret,
};

use crate::{
    Embed, Error, Result,
    plugin::{
        Authorizer, ChannelDirectory, ChannelInfo, ChannelOutbound, Delivery, DeliveryRequest,
        Endpoint, EndpointProvider,
    },
};

/// Injected delivery failure for one channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Failure {
    /// Deliveries report the channel as gone.
    Gone,
    /// Deliveries are refused for lack of rights.
    Forbidden,
    /// The next `n` deliveries fail transiently, later ones succeed.
    Transient(usize),
    /// Deliveries are refused as malformed.
    Rejected,
}

#[derive(Debug)]
struct ChannelState {
    server: Option<ServerId>,
    name: String,
    endpoints: Vec<Endpoint>,
    deny_endpoints: bool,
    failure: Option<Failure>,
}

#[derive(Debug, Default)]
struct State {
    channels: BTreeMap<ChannelId, ChannelState>,
    managers: BTreeSet<(UserId, ServerId)>,
    deliveries: Vec<(ChannelId, DeliveryRequest)>,
    messages: Vec<(ChannelId, String)>,
    deleted_endpoints: Vec<String>,
}

#[derive(Default)]
pub struct MemoryPlatform {
    state: Mutex<State>,
    next_id: AtomicUsize,
    created: AtomicUsize,
    delivery_attempts: AtomicUsize,
}

impl MemoryPlatform {
    pub fn new() -> Self {
        Self::default()
    }

    fn with_state<R>(&self, f: impl FnOnce(&mut State) -> R) -> R {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        f(&mut state)
    }

    pub fn add_channel(&self, channel: impl Into<ChannelId>, server: impl Into<ServerId>) {
        let channel = channel.into();
        let name = format!("channel-{channel}");
        self.with_state(|s| {
            s.channels.insert(channel, ChannelState {
                server: Some(server.into()),
                name,
                endpoints: Vec::new(),
                deny_endpoints: false,
                failure: None,
            });
        });
    }

    /// Simulate the channel being deleted on the platform.
    pub fn remove_channel(&self, channel: &ChannelId) {
        self.with_state(|s| {
            s.channels.remove(channel);
        });
    }

    /// Refuse listing and creating endpoints in `channel`.
    pub fn deny_endpoints(&self, channel: &ChannelId) {
        self.with_state(|s| {
            if let Some(state) = s.channels.get_mut(channel) {
                state.deny_endpoints = true;
            }
        });
    }

    /// Drop the channel's endpoints behind the caller's back, so cached
    /// copies go stale.
    pub fn revoke_endpoints(&self, channel: &ChannelId) {
        self.with_state(|s| {
            if let Some(state) = s.channels.get_mut(channel) {
                state.endpoints.clear();
            }
        });
    }

    pub fn fail_deliveries(&self, channel: &ChannelId, failure: Failure) {
        self.with_state(|s| {
            if let Some(state) = s.channels.get_mut(channel) {
                state.failure = Some(failure);
            }
        });
    }

    pub fn grant_manage(&self, user: impl Into<UserId>, server: impl Into<ServerId>) {
        let key = (user.into(), server.into());
        self.with_state(|s| {
            s.managers.insert(key);
        });
    }

    pub fn deliveries(&self) -> Vec<(ChannelId, DeliveryRequest)> {
        self.with_state(|s| s.deliveries.clone())
    }

    pub fn deliveries_to(&self, channel: &ChannelId) -> Vec<DeliveryRequest> {
        self.with_state(|s| {
            s.deliveries
                .iter()
                .filter(|(c, _)| c == channel)
                .map(|(_, r)| r.clone())
                .collect()
        })
    }

    /// Text and embed descriptions the bot posted into `channel`.
    pub fn messages_to(&self, channel: &ChannelId) -> Vec<String> {
        self.with_state(|s| {
            s.messages
                .iter()
                .filter(|(c, _)| c == channel)
                .map(|(_, m)| m.clone())
                .collect()
        })
    }

    pub fn endpoints_of(&self, channel: &ChannelId) -> Vec<Endpoint> {
        self.with_state(|s| {
            s.channels
                .get(channel)
                .map(|c| c.endpoints.clone())
                .unwrap_or_default()
        })
    }

    pub fn deleted_endpoints(&self) -> Vec<String> {
        self.with_state(|s| s.deleted_endpoints.clone())
    }

    pub fn created_count(&self) -> usize {
        self.created.load(Ordering::SeqCst)
    }

    pub fn delivery_attempts(&self) -> usize {
        self.delivery_attempts.load(Ordering::SeqCst)
    }
}

fn channel_mut<'a>(state: &'a mut State, channel: &ChannelId) -> Result<&'a mut ChannelState> {
    state
        .channels
        .get_mut(channel)
        .ok_or_else(|| Error::not_found(format!("channel {channel}")))
}

#[async_trait]
impl EndpointProvider for MemoryPlatform {
    async fn list_endpoints(&self, channel: &ChannelId) -> Result<Vec<Endpoint>> {
        self.with_state(|s| {
            let state = channel_mut(s, channel)?;
            if state.deny_endpoints {
                return Err(Error::permission_denied(format!("webhooks of {channel}")));
            }
            Ok(state.endpoints.clone())
        })
    }

    async fn create_endpoint(&self, channel: &ChannelId, name: &str) -> Result<Endpoint> {
        let n = self.next_id.fetch_add(1, Ordering::SeqCst);
        let endpoint = self.with_state(|s| {
            let state = channel_mut(s, channel)?;
            if state.deny_endpoints {
                return Err(Error::permission_denied(format!("webhooks of {channel}")));
            }
            let endpoint = Endpoint {
                id: format!("hook-{n}"),
                name: name.to_string(),
                channel_id: channel.clone(),
                token: Secret::new(format!("token-{n}")),
            };
            state.endpoints.push(endpoint.clone());
            Ok(endpoint)
        })?;
        self.created.fetch_add(1, Ordering::SeqCst);
        Ok(endpoint)
    }

    async fn delete_endpoint(&self, endpoint: &Endpoint) -> Result<()> {
        self.with_state(|s| {
            let state = channel_mut(s, &endpoint.channel_id)?;
            let before = state.endpoints.len();
            state.endpoints.retain(|e| e.id != endpoint.id);
            if state.endpoints.len() == before {
                return Err(Error::not_found(format!("webhook {}", endpoint.id)));
            }
            s.deleted_endpoints.push(endpoint.id.clone());
            Ok(())
        })
    }
}

#[async_trait]
impl Delivery for MemoryPlatform {
    async fn deliver(&self, endpoint: &Endpoint, request: &DeliveryRequest) -> Result<()> {
        self.delivery_attempts.fetch_add(1, Ordering::SeqCst);
        self.with_state(|s| {
            let channel = endpoint.channel_id.clone();
            let state = channel_mut(s, &channel)?;
            match state.failure {
                Some(Failure::Gone) => return Err(Error::not_found(format!("channel {channel}"))),
                Some(Failure::Forbidden) => {
                    return Err(Error::permission_denied(format!("channel {channel}")));
                },
                Some(Failure::Rejected) => {
                    return Err(Error::from_status(400, "invalid form body"));
                },
                Some(Failure::Transient(n)) if n > 0 => {
                    state.failure = Some(Failure::Transient(n - 1));
                    return Err(Error::transient("rate limited"));
                },
                _ => {},
            }
            if !state.endpoints.iter().any(|e| e.id == endpoint.id) {
                return Err(Error::not_found(format!("webhook {}", endpoint.id)));
            }
            s.deliveries.push((channel, request.clone()));
            Ok(())
        })
    }
}

#[async_trait]
impl ChannelDirectory for MemoryPlatform {
    async fn resolve(&self, channel: &ChannelId) -> Result<ChannelInfo> {
        self.with_state(|s| {
            let state = channel_mut(s, channel)?;
            Ok(ChannelInfo {
                id: channel.clone(),
                server_id: state.server.clone(),
                name: state.name.clone(),
            })
        })
    }
}

#[async_trait]
impl Authorizer for MemoryPlatform {
    async fn can_manage(&self, user: &UserId, server: &ServerId) -> Result<bool> {
        let key = (user.clone(), server.clone());
        Ok(self.with_state(|s| s.managers.contains(&key)))
    }
}

#[async_trait]
impl ChannelOutbound for MemoryPlatform {
    async fn send_text(&self, channel: &ChannelId, text: &str) -> Result<()> {
        self.with_state(|s| {
            channel_mut(s, channel)?;
            s.messages.push((channel.clone(), text.to_string()));
            Ok(())
        })
    }

    async fn send_embed(&self, channel: &ChannelId, embed: &Embed) -> Result<()> {
        let text = embed
            .description
            .clone()
            .or_else(|| embed.title.clone())
            .unwrap_or_default();
        self.send_text(channel, &text).await
    }
}
