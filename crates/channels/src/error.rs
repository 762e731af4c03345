use std::error::Error as StdError;

/// Crate-wide result type for platform operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Platform failures, classified by what the caller should do about them.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The channel, endpoint, or server no longer exists.
    #[error("not found: {what}")]
    NotFound { what: String },

    /// The bot lacks the rights for this operation.
    #[error("permission denied: {what}")]
    PermissionDenied { what: String },

    /// Rate limiting, server errors, or network trouble. Worth retrying.
    #[error("temporarily unavailable: {message}")]
    Transient { message: String },

    /// The platform refused the request for any other reason.
    #[error("rejected ({status}): {message}")]
    Rejected { status: u16, message: String },

    /// Wrapped source error from an external dependency.
    #[error("platform operation failed: {context}: {source}")]
    External {
        context: String,
        #[source]
        source: Box<dyn StdError + Send + Sync>,
    },

    #[error(transparent)]
    SerdeJson(#[from] serde_json::Error),
}

impl Error {
    #[must_use]
    pub fn not_found(what: impl std::fmt::Display) -> Self {
        Self::NotFound {
            what: what.to_string(),
        }
    }

    #[must_use]
    pub fn permission_denied(what: impl std::fmt::Display) -> Self {
        Self::PermissionDenied {
            what: what.to_string(),
        }
    }

    #[must_use]
    pub fn transient(message: impl std::fmt::Display) -> Self {
        Self::Transient {
            message: message.to_string(),
        }
    }

    #[must_use]
    pub fn external(
        context: impl Into<String>,
        source: impl StdError + Send + Sync + 'static,
    ) -> Self {
        Self::External {
            context: context.into(),
            source: Box::new(source),
        }
    }

    /// Map an HTTP status and response body onto an error class.
    #[must_use]
    pub fn from_status(status: u16, body: &str) -> Self {
        let message = if body.is_empty() {
            format!("HTTP {status}")
        } else {
            body.to_string()
        };
        match status {
            404 => Self::NotFound { what: message },
            401 | 403 => Self::PermissionDenied { what: message },
            429 | 500..=599 => Self::Transient { message },
            _ => Self::Rejected { status, message },
        }
    }

    /// Whether retrying the same call later may succeed.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Transient { .. } | Self::External { .. })
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use {super::*, rstest::rstest};

    #[rstest]
    #[case(404, "not_found")]
    #[case(401, "denied")]
    #[case(403, "denied")]
    #[case(429, "transient")]
    #[case(502, "transient")]
    #[case(400, "rejected")]
    fn classifies_status(#[case] status: u16, #[case] class: &str) {
        let err = Error::from_status(status, "");
        let got = match err {
            Error::NotFound { .. } => "not_found",
            Error::PermissionDenied { .. } => "denied",
            Error::Transient { .. } => "transient",
            Error::Rejected { .. } => "rejected",
            _ => "other",
        };
        assert_eq!(got, class);
    }

    #[test]
    fn only_transient_classes_retry() {
        assert!(Error::transient("slow down").is_transient());
        assert!(!Error::not_found("channel 1").is_transient());
        assert!(!Error::from_status(400, "bad").is_transient());
    }
}
