//! Discord implementation of the relaybot platform traits, built on
//! `serenity`.
//!
//! [`DiscordHttp`] covers the REST side (webhooks, channel lookups,
//! permission checks, bot messages). [`GatewayClient`] runs the gateway
//! session and [`RelayHandler`] turns its events into [`GatewayEvent`]s.

pub mod client;
pub mod error;
pub mod events;
pub mod handler;
pub mod http;

pub use {
    client::GatewayClient,
    error::{Error, Result},
    events::GatewayEvent,
    handler::RelayHandler,
    http::DiscordHttp,
};
