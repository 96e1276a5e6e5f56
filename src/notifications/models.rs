use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::checks::model::{Check, CheckId, CheckStatus, Flip, FlipReason};

/// Per-channel destination configuration, tagged by transport kind.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ChannelConfig {
    Telegram {
        bot_token: String,
        chat_id: String,
    },
    Webhook {
        /// Hit when a check goes down. Empty disables the direction.
        #[serde(default)]
        url_down: String,
        /// Hit when a check comes back up. Empty disables the direction.
        #[serde(default)]
        url_up: String,
        #[serde(default = "default_method")]
        method: String,
        headers: Option<HashMap<String, String>>,
        body_down: Option<String>,
        body_up: Option<String>,
    },
}

fn default_method() -> String {
    "GET".to_string()
}

impl ChannelConfig {
    /// Transport kind key, matching `Transport::kind`.
    pub fn kind(&self) -> &'static str {
        match self {
            ChannelConfig::Telegram { .. } => "telegram",
            ChannelConfig::Webhook { .. } => "webhook",
        }
    }
}

/// A notification destination plus its check scope.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Channel {
    pub id: Uuid,
    pub name: String,
    pub config: ChannelConfig,
    pub enabled: bool,
    /// Explicit check scope; `None` applies the channel to every check.
    pub checks: Option<Vec<CheckId>>,
}

impl Channel {
    pub fn applies_to(&self, check_id: CheckId) -> bool {
        match &self.checks {
            Some(ids) => ids.contains(&check_id),
            None => true,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum NotificationOutcome {
    /// Attempts are still running or about to run.
    Pending,
    /// The transport accepted the message.
    Sent,
    /// Retries were exhausted or the failure was permanent.
    Failed,
    /// Dropped without delivery: already sent, rate limited, or superseded
    /// by a newer flip.
    SkippedDuplicate,
}

impl NotificationOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            NotificationOutcome::Pending => "pending",
            NotificationOutcome::Sent => "sent",
            NotificationOutcome::Failed => "failed",
            NotificationOutcome::SkippedDuplicate => "skipped-duplicate",
        }
    }
}

impl std::fmt::Display for NotificationOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for NotificationOutcome {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(NotificationOutcome::Pending),
            "sent" => Ok(NotificationOutcome::Sent),
            "failed" => Ok(NotificationOutcome::Failed),
            "skipped-duplicate" => Ok(NotificationOutcome::SkippedDuplicate),
            other => Err(format!("unknown notification outcome: {other}")),
        }
    }
}

/// Delivery record for one (flip, channel) pair. The triple key is what
/// makes redelivery idempotent.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Notification {
    pub check_id: CheckId,
    pub flip_at: DateTime<Utc>,
    pub channel_id: Uuid,
    pub attempts: u32,
    pub last_attempt: Option<DateTime<Utc>>,
    pub outcome: NotificationOutcome,
}

/// Everything a transport needs to render and address one flip, captured
/// from the check at flip time.
#[derive(Debug, Clone, Serialize)]
pub struct FlipMessage {
    pub check_id: CheckId,
    pub check_name: String,
    pub tags: Vec<String>,
    pub status: CheckStatus,
    pub reason: FlipReason,
    pub at: DateTime<Utc>,
}

impl FlipMessage {
    pub fn new(check: &Check, flip: &Flip) -> Self {
        Self {
            check_id: check.id,
            check_name: check.name.clone(),
            tags: check.tags.clone(),
            status: flip.new_status,
            reason: flip.reason,
            at: flip.at,
        }
    }

    /// One-line summary used by text-oriented transports.
    pub fn text(&self) -> String {
        format!(
            "The check \"{}\" is {}.",
            self.check_name,
            self.status.as_str().to_uppercase()
        )
    }
}
