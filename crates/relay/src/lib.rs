//! Relay engine: endpoint cache, destination resolution, and delivery.
//!
//! A message flows through [`resolve`] to get its routes, then through
//! [`Dispatcher::relay`], which fetches each destination's endpoint from the
//! [`WebhookRegistry`] and posts the copy. Destinations that prove
//! unreachable are detached from the topology and the origin is told once.

pub mod dispatcher;
pub mod error;
pub mod registry;
pub mod resolver;

pub use {
    dispatcher::{Dispatcher, RetryPolicy},
    error::{RelayError, Result},
    registry::{HookOutcome, WebhookRegistry},
    resolver::{Route, match_prefix, resolve, strip_prefix_ignore_case},
};
