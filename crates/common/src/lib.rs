//! Shared identifier types, the inbound message model, and the error
//! context helper used across relaybot crates.

pub mod context;
pub mod types;

pub use {
    context::FromMessage,
    types::{Attachment, Author, ChannelId, InboundMessage, ServerId, UserId},
};
