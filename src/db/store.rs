use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;
use uuid::Uuid;

use crate::checks::model::{Check, CheckId, Flip, Ping};
use crate::notifications::models::{Channel, Notification};

pub type StoreResult<T> = Result<T, StoreError>;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("check not found")]
    CheckNotFound,
    #[error("channel not found")]
    ChannelNotFound,
    #[error("stale write: check version changed")]
    Conflict,
    #[error("flip at {at} is not after the last recorded flip")]
    OrderingViolation { at: DateTime<Utc> },
    #[error("storage error: {0}")]
    Backend(String),
}

/// Persistence seam for the whole service. Implementations must make
/// `save_check` atomic on the version comparison and `append_flip` atomic on
/// the ordering check.
#[async_trait]
pub trait Store: Send + Sync {
    async fn create_check(&self, check: Check) -> StoreResult<()>;
    async fn load_check(&self, id: CheckId) -> StoreResult<Check>;
    /// Compare-and-swap on `check.version`; the stored copy ends up one
    /// version ahead of the argument.
    async fn save_check(&self, check: &Check) -> StoreResult<()>;
    async fn delete_check(&self, id: CheckId) -> StoreResult<()>;
    async fn list_checks(&self) -> StoreResult<Vec<Check>>;
    /// Checks that are `up` and past their expiry at `now`.
    async fn due_checks(&self, now: DateTime<Utc>) -> StoreResult<Vec<Check>>;

    /// Appends a ping and returns its per-check sequence number.
    async fn append_ping(&self, ping: Ping) -> StoreResult<u64>;
    /// Most recent pings first, at most `limit` of them.
    async fn list_pings(&self, check_id: CheckId, limit: usize) -> StoreResult<Vec<Ping>>;

    /// Appends to the flip log. Refuses a flip whose timestamp is not
    /// strictly after the latest recorded flip for the same check.
    async fn append_flip(&self, flip: &Flip) -> StoreResult<()>;
    async fn last_flip(&self, check_id: CheckId) -> StoreResult<Option<Flip>>;
    /// Flips at or after `since`, oldest first.
    async fn list_flips_since(&self, check_id: CheckId, since: DateTime<Utc>) -> StoreResult<Vec<Flip>>;

    async fn create_channel(&self, channel: Channel) -> StoreResult<()>;
    async fn load_channel(&self, id: Uuid) -> StoreResult<Channel>;
    async fn list_channels(&self) -> StoreResult<Vec<Channel>>;
    async fn delete_channel(&self, id: Uuid) -> StoreResult<()>;
    /// Enabled channels whose scope covers this check.
    async fn channels_for_check(&self, check_id: CheckId) -> StoreResult<Vec<Channel>>;

    /// Inserts or replaces the record keyed by (check, flip time, channel).
    async fn upsert_notification(&self, notification: &Notification) -> StoreResult<()>;
    async fn find_notification(
        &self,
        check_id: CheckId,
        flip_at: DateTime<Utc>,
        channel_id: Uuid,
    ) -> StoreResult<Option<Notification>>;
    /// Delivered notifications for (channel, check) attempted at or after
    /// `since`. Feeds the dispatcher's rate limit.
    async fn count_sent_since(
        &self,
        channel_id: Uuid,
        check_id: CheckId,
        since: DateTime<Utc>,
    ) -> StoreResult<usize>;
}
