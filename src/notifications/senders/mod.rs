use async_trait::async_trait;
use once_cell::sync::Lazy;
use reqwest::Client;
use thiserror::Error;

use super::models::{Channel, FlipMessage};

pub mod telegram;
pub mod webhook;

/// Shared outbound HTTP client. Attempt timeouts are enforced by the
/// dispatcher, not here.
pub(crate) static HTTP_CLIENT: Lazy<Client> = Lazy::new(Client::new);

#[derive(Error, Debug)]
pub enum SenderError {
    #[error("invalid channel configuration: {0}")]
    Misconfigured(String),
    #[error("provider returned status {code}")]
    Rejected { code: u16, permanent: bool },
    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),
    #[error("send timed out")]
    TimedOut,
}

impl SenderError {
    /// Permanent failures abort the retry sequence immediately.
    pub fn is_permanent(&self) -> bool {
        match self {
            SenderError::Misconfigured(_) => true,
            SenderError::Rejected { permanent, .. } => *permanent,
            SenderError::Network(_) => false,
            SenderError::TimedOut => false,
        }
    }
}

/// A delivery transport for one channel kind.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Channel kinds this transport serves, matching `ChannelConfig::kind`.
    fn kind(&self) -> &'static str;

    /// True when the channel has nothing configured for this message, e.g. a
    /// webhook with no URL for the flip direction. No-ops are skipped before
    /// any attempt is recorded.
    fn is_noop(&self, _channel: &Channel, _message: &FlipMessage) -> bool {
        false
    }

    async fn send(&self, channel: &Channel, message: &FlipMessage) -> Result<(), SenderError>;
}

/// Statuses the webhook contract counts as delivered.
pub(crate) fn is_delivered(status: reqwest::StatusCode) -> bool {
    matches!(status.as_u16(), 200 | 201 | 202 | 204)
}
