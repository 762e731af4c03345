use {relaybot_common::ChannelId, thiserror::Error};

/// Relay-time failures, reported after the dispatcher has handled them.
#[derive(Debug, Error)]
pub enum RelayError {
    /// The destination is gone or refuses the bot. It has been detached.
    #[error("destination {destination} is unreachable: {reason}")]
    StaleDestination {
        destination: ChannelId,
        reason: String,
    },

    /// Delivery kept failing for reasons that may clear up. Topology is kept.
    #[error("delivery to {destination} failed after {attempts} attempt(s): {message}")]
    Transient {
        destination: ChannelId,
        attempts: u32,
        message: String,
    },

    /// The platform refused this message. Topology is kept.
    #[error("delivery to {destination} was rejected: {message}")]
    Rejected {
        destination: ChannelId,
        message: String,
    },

    /// Some deliveries of one message failed.
    #[error("{} of {total} deliveries from {origin} failed", .failures.len())]
    Deliveries {
        origin: ChannelId,
        total: usize,
        failures: Vec<RelayError>,
    },
}

impl RelayError {
    #[must_use]
    pub fn stale(destination: &ChannelId, reason: impl std::fmt::Display) -> Self {
        Self::StaleDestination {
            destination: destination.clone(),
            reason: reason.to_string(),
        }
    }

    pub fn is_stale(&self) -> bool {
        matches!(self, Self::StaleDestination { .. })
    }
}

pub type Result<T> = std::result::Result<T, RelayError>;
