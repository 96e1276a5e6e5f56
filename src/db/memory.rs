//! In-memory store. The default backend when no database is configured, and
//! the double every test drives.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::checks::model::{Check, CheckId, CheckStatus, Flip, Ping};
use crate::notifications::models::{Channel, Notification, NotificationOutcome};

use super::store::{Store, StoreError, StoreResult};

#[derive(Default)]
struct MemoryData {
    checks: HashMap<CheckId, Check>,
    pings: HashMap<CheckId, Vec<Ping>>,
    flips: HashMap<CheckId, Vec<Flip>>,
    channels: HashMap<Uuid, Channel>,
    notifications: HashMap<(CheckId, DateTime<Utc>, Uuid), Notification>,
}

#[derive(Default)]
pub struct MemoryStore {
    data: RwLock<MemoryData>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn create_check(&self, check: Check) -> StoreResult<()> {
        let mut data = self.data.write().await;
        data.checks.insert(check.id, check);
        Ok(())
    }

    async fn load_check(&self, id: CheckId) -> StoreResult<Check> {
        let data = self.data.read().await;
        data.checks.get(&id).cloned().ok_or(StoreError::CheckNotFound)
    }

    async fn save_check(&self, check: &Check) -> StoreResult<()> {
        let mut data = self.data.write().await;
        let current = data.checks.get_mut(&check.id).ok_or(StoreError::CheckNotFound)?;
        if current.version != check.version {
            return Err(StoreError::Conflict);
        }
        let mut updated = check.clone();
        updated.version += 1;
        *current = updated;
        Ok(())
    }

    async fn delete_check(&self, id: CheckId) -> StoreResult<()> {
        let mut data = self.data.write().await;
        data.checks.remove(&id).ok_or(StoreError::CheckNotFound)?;
        data.pings.remove(&id);
        data.flips.remove(&id);
        data.notifications.retain(|(check_id, _, _), _| *check_id != id);
        Ok(())
    }

    async fn list_checks(&self) -> StoreResult<Vec<Check>> {
        let data = self.data.read().await;
        Ok(data.checks.values().cloned().collect())
    }

    async fn due_checks(&self, now: DateTime<Utc>) -> StoreResult<Vec<Check>> {
        let data = self.data.read().await;
        Ok(data
            .checks
            .values()
            .filter(|c| {
                c.status == CheckStatus::Up && c.next_expiry.map(|e| e <= now).unwrap_or(false)
            })
            .cloned()
            .collect())
    }

    async fn append_ping(&self, mut ping: Ping) -> StoreResult<u64> {
        let mut data = self.data.write().await;
        if !data.checks.contains_key(&ping.check_id) {
            return Err(StoreError::CheckNotFound);
        }
        let log = data.pings.entry(ping.check_id).or_default();
        ping.seq = log.last().map(|p| p.seq + 1).unwrap_or(1);
        let seq = ping.seq;
        log.push(ping);
        Ok(seq)
    }

    async fn list_pings(&self, check_id: CheckId, limit: usize) -> StoreResult<Vec<Ping>> {
        let data = self.data.read().await;
        Ok(data
            .pings
            .get(&check_id)
            .map(|log| log.iter().rev().take(limit).cloned().collect())
            .unwrap_or_default())
    }

    async fn append_flip(&self, flip: &Flip) -> StoreResult<()> {
        let mut data = self.data.write().await;
        let log = data.flips.entry(flip.check_id).or_default();
        if let Some(last) = log.last() {
            if flip.at <= last.at {
                return Err(StoreError::OrderingViolation { at: flip.at });
            }
        }
        log.push(flip.clone());
        Ok(())
    }

    async fn last_flip(&self, check_id: CheckId) -> StoreResult<Option<Flip>> {
        let data = self.data.read().await;
        Ok(data.flips.get(&check_id).and_then(|log| log.last().cloned()))
    }

    async fn list_flips_since(&self, check_id: CheckId, since: DateTime<Utc>) -> StoreResult<Vec<Flip>> {
        let data = self.data.read().await;
        Ok(data
            .flips
            .get(&check_id)
            .map(|log| log.iter().filter(|f| f.at >= since).cloned().collect())
            .unwrap_or_default())
    }

    async fn create_channel(&self, channel: Channel) -> StoreResult<()> {
        let mut data = self.data.write().await;
        data.channels.insert(channel.id, channel);
        Ok(())
    }

    async fn load_channel(&self, id: Uuid) -> StoreResult<Channel> {
        let data = self.data.read().await;
        data.channels.get(&id).cloned().ok_or(StoreError::ChannelNotFound)
    }

    async fn list_channels(&self) -> StoreResult<Vec<Channel>> {
        let data = self.data.read().await;
        Ok(data.channels.values().cloned().collect())
    }

    async fn delete_channel(&self, id: Uuid) -> StoreResult<()> {
        let mut data = self.data.write().await;
        data.channels.remove(&id).ok_or(StoreError::ChannelNotFound)?;
        data.notifications.retain(|(_, _, channel_id), _| *channel_id != id);
        Ok(())
    }

    async fn channels_for_check(&self, check_id: CheckId) -> StoreResult<Vec<Channel>> {
        let data = self.data.read().await;
        Ok(data
            .channels
            .values()
            .filter(|ch| ch.enabled && ch.applies_to(check_id))
            .cloned()
            .collect())
    }

    async fn upsert_notification(&self, notification: &Notification) -> StoreResult<()> {
        let mut data = self.data.write().await;
        let key = (notification.check_id, notification.flip_at, notification.channel_id);
        data.notifications.insert(key, notification.clone());
        Ok(())
    }

    async fn find_notification(
        &self,
        check_id: CheckId,
        flip_at: DateTime<Utc>,
        channel_id: Uuid,
    ) -> StoreResult<Option<Notification>> {
        let data = self.data.read().await;
        Ok(data.notifications.get(&(check_id, flip_at, channel_id)).cloned())
    }

    async fn count_sent_since(
        &self,
        channel_id: Uuid,
        check_id: CheckId,
        since: DateTime<Utc>,
    ) -> StoreResult<usize> {
        let data = self.data.read().await;
        Ok(data
            .notifications
            .values()
            .filter(|n| {
                n.channel_id == channel_id
                    && n.check_id == check_id
                    && n.outcome == NotificationOutcome::Sent
                    && n.last_attempt.map(|t| t >= since).unwrap_or(false)
            })
            .count())
    }
}
