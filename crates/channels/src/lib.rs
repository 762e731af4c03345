//! Platform seams used by the relay.
//!
//! A chat platform is reached through a handful of narrow traits: listing
//! and creating per-channel delivery endpoints, posting through them,
//! resolving channels, checking management rights, and posting as the bot.
//! [`Platform`] bundles them for code that needs the whole surface.

pub mod embed;
pub mod error;
pub mod memory;
pub mod plugin;

pub use {
    embed::{Embed, EmbedFooter},
    error::{Error, Result},
    memory::{Failure, MemoryPlatform},
    plugin::{
        Authorizer, ChannelDirectory, ChannelInfo, ChannelOutbound, Delivery, DeliveryRequest,
        Endpoint, EndpointProvider, MAX_CONTENT_CHARS, Platform, truncate_chars,
    },
};
