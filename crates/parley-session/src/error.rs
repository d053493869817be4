use parley_core::errors::{TimelineError, TransportError};

#[derive(Clone, Debug, thiserror::Error)]
pub enum SessionError {
    #[error("a request is already in flight")]
    Busy,

    #[error("transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("timeline error: {0}")]
    Timeline(#[from] TimelineError),

    #[error("backend reported: {0}")]
    Upstream(String),
}

impl SessionError {
    /// Whether resending the same request could plausibly succeed.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Transport(e) => e.is_retryable(),
            Self::Busy | Self::Timeline(_) | Self::Upstream(_) => false,
        }
    }
}
