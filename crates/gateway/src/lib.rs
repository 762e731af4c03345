//! Relay bot runtime.
//!
//! [`RelayBot`] reacts to gateway events: it prepares servers and endpoints
//! when the session becomes ready, greets servers it joins, runs commands,
//! and hands every other message to a per-channel [`RelayLanes`] worker.
//! [`server::start`] wires the Discord client, the topology store and the
//! bot together and runs until Ctrl-C.

pub mod bot;
pub mod lanes;
pub mod logs;
pub mod server;

pub use {
    bot::RelayBot,
    lanes::RelayLanes,
    logs::{LogChannelLayer, LogReceiver},
};
