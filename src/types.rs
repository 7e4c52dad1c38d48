//! Error types for confgate
//!
//! Every failure the control plane can return to a caller. Malformed
//! membership-feed records never surface here; they are logged and skipped.

/// Main error type for confgate operations
#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("No resources available: {0}")]
    NoResourcesAvailable(String),

    #[error("Notification channel closed: {0}")]
    ChannelClosed(String),

    #[error("Notification channel full: {0}")]
    ChannelFull(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl GatewayError {
    /// Whether the caller may reasonably retry the same request later.
    ///
    /// The control plane itself never retries; this only informs the
    /// transport layer how to phrase the failure to the agent.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::NoResourcesAvailable(_) | Self::ChannelFull(_)
        )
    }
}

impl From<serde_json::Error> for GatewayError {
    fn from(err: serde_json::Error) -> Self {
        Self::InvalidArgument(format!("JSON error: {}", err))
    }
}

/// Result type alias for confgate operations
pub type Result<T> = std::result::Result<T, GatewayError>;
