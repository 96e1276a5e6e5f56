//! Postgres store. Uses the runtime query API so builds do not need a live
//! database; the schema is applied on connect.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::{PgPool, PgPoolOptions, PgRow};
use sqlx::Row;
use uuid::Uuid;

use crate::checks::model::{Cadence, Check, CheckId, CheckStatus, Flip, FlipReason, Ping, PingKind};
use crate::notifications::models::{Channel, ChannelConfig, Notification, NotificationOutcome};

use super::store::{Store, StoreError, StoreResult};

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS checks (
    id UUID PRIMARY KEY,
    name TEXT NOT NULL,
    tags JSONB NOT NULL DEFAULT '[]',
    cadence JSONB NOT NULL,
    grace_secs BIGINT NOT NULL,
    tz TEXT NOT NULL,
    status TEXT NOT NULL,
    last_ping TIMESTAMPTZ,
    last_flip TIMESTAMPTZ,
    next_deadline TIMESTAMPTZ,
    next_expiry TIMESTAMPTZ,
    n_pings BIGINT NOT NULL DEFAULT 0,
    created_at TIMESTAMPTZ NOT NULL,
    version BIGINT NOT NULL DEFAULT 0
);

CREATE TABLE IF NOT EXISTS pings (
    check_id UUID NOT NULL REFERENCES checks(id) ON DELETE CASCADE,
    seq BIGINT NOT NULL,
    at TIMESTAMPTZ NOT NULL,
    kind TEXT NOT NULL,
    exit_status INTEGER,
    body TEXT,
    PRIMARY KEY (check_id, seq)
);

CREATE TABLE IF NOT EXISTS flips (
    check_id UUID NOT NULL REFERENCES checks(id) ON DELETE CASCADE,
    at TIMESTAMPTZ NOT NULL,
    old_status TEXT NOT NULL,
    new_status TEXT NOT NULL,
    reason TEXT NOT NULL,
    PRIMARY KEY (check_id, at)
);

CREATE TABLE IF NOT EXISTS channels (
    id UUID PRIMARY KEY,
    name TEXT NOT NULL,
    config JSONB NOT NULL,
    enabled BOOLEAN NOT NULL DEFAULT TRUE,
    checks JSONB
);

CREATE TABLE IF NOT EXISTS notifications (
    check_id UUID NOT NULL REFERENCES checks(id) ON DELETE CASCADE,
    flip_at TIMESTAMPTZ NOT NULL,
    channel_id UUID NOT NULL REFERENCES channels(id) ON DELETE CASCADE,
    attempts BIGINT NOT NULL DEFAULT 0,
    last_attempt TIMESTAMPTZ,
    outcome TEXT NOT NULL,
    PRIMARY KEY (check_id, flip_at, channel_id)
);

CREATE INDEX IF NOT EXISTS idx_checks_due ON checks (next_expiry) WHERE status = 'up';
"#;

pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub async fn connect(database_url: &str) -> StoreResult<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(10)
            .connect(database_url)
            .await
            .map_err(backend)?;
        sqlx::raw_sql(SCHEMA).execute(&pool).await.map_err(backend)?;
        Ok(Self { pool })
    }
}

fn backend(e: sqlx::Error) -> StoreError {
    StoreError::Backend(e.to_string())
}

fn decode(e: impl std::fmt::Display) -> StoreError {
    StoreError::Backend(e.to_string())
}

fn row_to_check(row: &PgRow) -> StoreResult<Check> {
    let tags: serde_json::Value = row.try_get("tags").map_err(backend)?;
    let cadence: serde_json::Value = row.try_get("cadence").map_err(backend)?;
    let tz: String = row.try_get("tz").map_err(backend)?;
    let status: String = row.try_get("status").map_err(backend)?;
    let grace_secs: i64 = row.try_get("grace_secs").map_err(backend)?;
    let n_pings: i64 = row.try_get("n_pings").map_err(backend)?;
    let version: i64 = row.try_get("version").map_err(backend)?;

    Ok(Check {
        id: row.try_get("id").map_err(backend)?,
        name: row.try_get("name").map_err(backend)?,
        tags: serde_json::from_value(tags).map_err(decode)?,
        cadence: serde_json::from_value::<Cadence>(cadence).map_err(decode)?,
        grace_secs: u32::try_from(grace_secs).map_err(decode)?,
        tz: tz.parse().map_err(decode)?,
        status: status.parse::<CheckStatus>().map_err(decode)?,
        last_ping: row.try_get("last_ping").map_err(backend)?,
        last_flip: row.try_get("last_flip").map_err(backend)?,
        next_deadline: row.try_get("next_deadline").map_err(backend)?,
        next_expiry: row.try_get("next_expiry").map_err(backend)?,
        n_pings: u64::try_from(n_pings).map_err(decode)?,
        created_at: row.try_get("created_at").map_err(backend)?,
        version: u64::try_from(version).map_err(decode)?,
    })
}

fn row_to_ping(row: &PgRow) -> StoreResult<Ping> {
    let seq: i64 = row.try_get("seq").map_err(backend)?;
    let kind: String = row.try_get("kind").map_err(backend)?;
    Ok(Ping {
        check_id: row.try_get("check_id").map_err(backend)?,
        seq: u64::try_from(seq).map_err(decode)?,
        at: row.try_get("at").map_err(backend)?,
        kind: kind.parse::<PingKind>().map_err(decode)?,
        exit_status: row.try_get("exit_status").map_err(backend)?,
        body: row.try_get("body").map_err(backend)?,
    })
}

fn row_to_flip(row: &PgRow) -> StoreResult<Flip> {
    let old_status: String = row.try_get("old_status").map_err(backend)?;
    let new_status: String = row.try_get("new_status").map_err(backend)?;
    let reason: String = row.try_get("reason").map_err(backend)?;
    Ok(Flip {
        check_id: row.try_get("check_id").map_err(backend)?,
        at: row.try_get("at").map_err(backend)?,
        old_status: old_status.parse::<CheckStatus>().map_err(decode)?,
        new_status: new_status.parse::<CheckStatus>().map_err(decode)?,
        reason: reason.parse::<FlipReason>().map_err(decode)?,
    })
}

fn row_to_channel(row: &PgRow) -> StoreResult<Channel> {
    let config: serde_json::Value = row.try_get("config").map_err(backend)?;
    let checks: Option<serde_json::Value> = row.try_get("checks").map_err(backend)?;
    let checks = match checks {
        Some(value) => Some(serde_json::from_value(value).map_err(decode)?),
        None => None,
    };
    Ok(Channel {
        id: row.try_get("id").map_err(backend)?,
        name: row.try_get("name").map_err(backend)?,
        config: serde_json::from_value::<ChannelConfig>(config).map_err(decode)?,
        enabled: row.try_get("enabled").map_err(backend)?,
        checks,
    })
}

fn row_to_notification(row: &PgRow) -> StoreResult<Notification> {
    let attempts: i64 = row.try_get("attempts").map_err(backend)?;
    let outcome: String = row.try_get("outcome").map_err(backend)?;
    Ok(Notification {
        check_id: row.try_get("check_id").map_err(backend)?,
        flip_at: row.try_get("flip_at").map_err(backend)?,
        channel_id: row.try_get("channel_id").map_err(backend)?,
        attempts: u32::try_from(attempts).map_err(decode)?,
        last_attempt: row.try_get("last_attempt").map_err(backend)?,
        outcome: outcome.parse::<NotificationOutcome>().map_err(decode)?,
    })
}

#[async_trait]
impl Store for PgStore {
    async fn create_check(&self, check: Check) -> StoreResult<()> {
        sqlx::query(
            r#"
            INSERT INTO checks (id, name, tags, cadence, grace_secs, tz, status,
                                last_ping, last_flip, next_deadline, next_expiry,
                                n_pings, created_at, version)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14)
            "#,
        )
        .bind(check.id)
        .bind(&check.name)
        .bind(serde_json::to_value(&check.tags).map_err(decode)?)
        .bind(serde_json::to_value(&check.cadence).map_err(decode)?)
        .bind(i64::from(check.grace_secs))
        .bind(check.tz.name())
        .bind(check.status.as_str())
        .bind(check.last_ping)
        .bind(check.last_flip)
        .bind(check.next_deadline)
        .bind(check.next_expiry)
        .bind(i64::try_from(check.n_pings).map_err(decode)?)
        .bind(check.created_at)
        .bind(i64::try_from(check.version).map_err(decode)?)
        .execute(&self.pool)
        .await
        .map_err(backend)?;
        Ok(())
    }

    async fn load_check(&self, id: CheckId) -> StoreResult<Check> {
        let row = sqlx::query("SELECT * FROM checks WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(backend)?
            .ok_or(StoreError::CheckNotFound)?;
        row_to_check(&row)
    }

    async fn save_check(&self, check: &Check) -> StoreResult<()> {
        let result = sqlx::query(
            r#"
            UPDATE checks
            SET name = $2, tags = $3, cadence = $4, grace_secs = $5, tz = $6,
                status = $7, last_ping = $8, last_flip = $9, next_deadline = $10,
                next_expiry = $11, n_pings = $12, version = version + 1
            WHERE id = $1 AND version = $13
            "#,
        )
        .bind(check.id)
        .bind(&check.name)
        .bind(serde_json::to_value(&check.tags).map_err(decode)?)
        .bind(serde_json::to_value(&check.cadence).map_err(decode)?)
        .bind(i64::from(check.grace_secs))
        .bind(check.tz.name())
        .bind(check.status.as_str())
        .bind(check.last_ping)
        .bind(check.last_flip)
        .bind(check.next_deadline)
        .bind(check.next_expiry)
        .bind(i64::try_from(check.n_pings).map_err(decode)?)
        .bind(i64::try_from(check.version).map_err(decode)?)
        .execute(&self.pool)
        .await
        .map_err(backend)?;

        if result.rows_affected() == 0 {
            let exists: bool =
                sqlx::query_scalar("SELECT EXISTS(SELECT 1 FROM checks WHERE id = $1)")
                    .bind(check.id)
                    .fetch_one(&self.pool)
                    .await
                    .map_err(backend)?;
            return Err(if exists { StoreError::Conflict } else { StoreError::CheckNotFound });
        }
        Ok(())
    }

    async fn delete_check(&self, id: CheckId) -> StoreResult<()> {
        let result = sqlx::query("DELETE FROM checks WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(backend)?;
        if result.rows_affected() == 0 {
            return Err(StoreError::CheckNotFound);
        }
        Ok(())
    }

    async fn list_checks(&self) -> StoreResult<Vec<Check>> {
        let rows = sqlx::query("SELECT * FROM checks ORDER BY created_at")
            .fetch_all(&self.pool)
            .await
            .map_err(backend)?;
        rows.iter().map(row_to_check).collect()
    }

    async fn due_checks(&self, now: DateTime<Utc>) -> StoreResult<Vec<Check>> {
        let rows = sqlx::query(
            "SELECT * FROM checks WHERE status = 'up' AND next_expiry IS NOT NULL AND next_expiry <= $1",
        )
        .bind(now)
        .fetch_all(&self.pool)
        .await
        .map_err(backend)?;
        rows.iter().map(row_to_check).collect()
    }

    async fn append_ping(&self, ping: Ping) -> StoreResult<u64> {
        // Seq assignment for a check serializes on its row lock; a
        // concurrent delete waits until the insert commits.
        let mut tx = self.pool.begin().await.map_err(backend)?;
        let locked = sqlx::query("SELECT 1 FROM checks WHERE id = $1 FOR UPDATE")
            .bind(ping.check_id)
            .fetch_optional(&mut *tx)
            .await
            .map_err(backend)?;
        if locked.is_none() {
            return Err(StoreError::CheckNotFound);
        }

        let seq: i64 = sqlx::query_scalar(
            r#"
            INSERT INTO pings (check_id, seq, at, kind, exit_status, body)
            VALUES ($1, COALESCE((SELECT MAX(seq) FROM pings WHERE check_id = $1), 0) + 1,
                    $2, $3, $4, $5)
            RETURNING seq
            "#,
        )
        .bind(ping.check_id)
        .bind(ping.at)
        .bind(ping.kind.as_str())
        .bind(ping.exit_status)
        .bind(&ping.body)
        .fetch_one(&mut *tx)
        .await
        .map_err(backend)?;
        tx.commit().await.map_err(backend)?;
        u64::try_from(seq).map_err(decode)
    }

    async fn list_pings(&self, check_id: CheckId, limit: usize) -> StoreResult<Vec<Ping>> {
        let rows = sqlx::query("SELECT * FROM pings WHERE check_id = $1 ORDER BY seq DESC LIMIT $2")
            .bind(check_id)
            .bind(i64::try_from(limit).unwrap_or(i64::MAX))
            .fetch_all(&self.pool)
            .await
            .map_err(backend)?;
        rows.iter().map(row_to_ping).collect()
    }

    async fn append_flip(&self, flip: &Flip) -> StoreResult<()> {
        // The guarded insert keeps the ordering check and the append atomic.
        let result = sqlx::query(
            r#"
            INSERT INTO flips (check_id, at, old_status, new_status, reason)
            SELECT $1, $2, $3, $4, $5
            WHERE NOT EXISTS (SELECT 1 FROM flips WHERE check_id = $1 AND at >= $2)
            "#,
        )
        .bind(flip.check_id)
        .bind(flip.at)
        .bind(flip.old_status.as_str())
        .bind(flip.new_status.as_str())
        .bind(flip.reason.as_str())
        .execute(&self.pool)
        .await
        .map_err(backend)?;

        if result.rows_affected() == 0 {
            return Err(StoreError::OrderingViolation { at: flip.at });
        }
        Ok(())
    }

    async fn last_flip(&self, check_id: CheckId) -> StoreResult<Option<Flip>> {
        let row = sqlx::query("SELECT * FROM flips WHERE check_id = $1 ORDER BY at DESC LIMIT 1")
            .bind(check_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(backend)?;
        row.as_ref().map(row_to_flip).transpose()
    }

    async fn list_flips_since(&self, check_id: CheckId, since: DateTime<Utc>) -> StoreResult<Vec<Flip>> {
        let rows = sqlx::query("SELECT * FROM flips WHERE check_id = $1 AND at >= $2 ORDER BY at")
            .bind(check_id)
            .bind(since)
            .fetch_all(&self.pool)
            .await
            .map_err(backend)?;
        rows.iter().map(row_to_flip).collect()
    }

    async fn create_channel(&self, channel: Channel) -> StoreResult<()> {
        let checks = match &channel.checks {
            Some(ids) => Some(serde_json::to_value(ids).map_err(decode)?),
            None => None,
        };
        sqlx::query("INSERT INTO channels (id, name, config, enabled, checks) VALUES ($1, $2, $3, $4, $5)")
            .bind(channel.id)
            .bind(&channel.name)
            .bind(serde_json::to_value(&channel.config).map_err(decode)?)
            .bind(channel.enabled)
            .bind(checks)
            .execute(&self.pool)
            .await
            .map_err(backend)?;
        Ok(())
    }

    async fn load_channel(&self, id: Uuid) -> StoreResult<Channel> {
        let row = sqlx::query("SELECT * FROM channels WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(backend)?
            .ok_or(StoreError::ChannelNotFound)?;
        row_to_channel(&row)
    }

    async fn list_channels(&self) -> StoreResult<Vec<Channel>> {
        let rows = sqlx::query("SELECT * FROM channels ORDER BY name")
            .fetch_all(&self.pool)
            .await
            .map_err(backend)?;
        rows.iter().map(row_to_channel).collect()
    }

    async fn delete_channel(&self, id: Uuid) -> StoreResult<()> {
        let result = sqlx::query("DELETE FROM channels WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(backend)?;
        if result.rows_affected() == 0 {
            return Err(StoreError::ChannelNotFound);
        }
        Ok(())
    }

    async fn channels_for_check(&self, check_id: CheckId) -> StoreResult<Vec<Channel>> {
        // Scope filtering happens in code, not in SQL.
        let rows = sqlx::query("SELECT * FROM channels WHERE enabled = TRUE")
            .fetch_all(&self.pool)
            .await
            .map_err(backend)?;
        let channels: StoreResult<Vec<Channel>> = rows.iter().map(row_to_channel).collect();
        Ok(channels?.into_iter().filter(|ch| ch.applies_to(check_id)).collect())
    }

    async fn upsert_notification(&self, notification: &Notification) -> StoreResult<()> {
        sqlx::query(
            r#"
            INSERT INTO notifications (check_id, flip_at, channel_id, attempts, last_attempt, outcome)
            VALUES ($1, $2, $3, $4, $5, $6)
            ON CONFLICT (check_id, flip_at, channel_id)
            DO UPDATE SET attempts = $4, last_attempt = $5, outcome = $6
            "#,
        )
        .bind(notification.check_id)
        .bind(notification.flip_at)
        .bind(notification.channel_id)
        .bind(i64::from(notification.attempts))
        .bind(notification.last_attempt)
        .bind(notification.outcome.as_str())
        .execute(&self.pool)
        .await
        .map_err(backend)?;
        Ok(())
    }

    async fn find_notification(
        &self,
        check_id: CheckId,
        flip_at: DateTime<Utc>,
        channel_id: Uuid,
    ) -> StoreResult<Option<Notification>> {
        let row = sqlx::query(
            "SELECT * FROM notifications WHERE check_id = $1 AND flip_at = $2 AND channel_id = $3",
        )
        .bind(check_id)
        .bind(flip_at)
        .bind(channel_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(backend)?;
        row.as_ref().map(row_to_notification).transpose()
    }

    async fn count_sent_since(
        &self,
        channel_id: Uuid,
        check_id: CheckId,
        since: DateTime<Utc>,
    ) -> StoreResult<usize> {
        let count: i64 = sqlx::query_scalar(
            r#"
            SELECT COUNT(*) FROM notifications
            WHERE channel_id = $1 AND check_id = $2 AND outcome = 'sent' AND last_attempt >= $3
            "#,
        )
        .bind(channel_id)
        .bind(check_id)
        .bind(since)
        .fetch_one(&self.pool)
        .await
        .map_err(backend)?;
        Ok(usize::try_from(count).unwrap_or(0))
    }
}
