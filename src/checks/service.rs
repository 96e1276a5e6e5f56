//! The single write path for checks. Every mutation of one check runs under
//! that check's lock, decisions are made on a freshly loaded copy, and saves
//! are optimistic against the stored version.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use dashmap::DashMap;
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::{error, info, warn};

use crate::clock::Clock;
use crate::db::store::{Store, StoreError};
use crate::notifications::service::NotificationService;

use super::machine;
use super::model::{Cadence, Check, CheckId, CheckStatus, Flip, FlipReason, Ping, PingKind};
use super::schedule::{self, ScheduleError};

/// Optimistic save retries before giving up on a mutation.
const MAX_SAVE_RETRIES: u32 = 3;

/// Ping bodies beyond this many bytes are truncated before storage.
pub const MAX_BODY_BYTES: usize = 10 * 1024;

#[derive(Debug, Error)]
pub enum CheckError {
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Schedule(#[from] ScheduleError),
}

/// Outcome of one ingested ping.
#[derive(Debug, Clone)]
pub struct PingOutcome {
    pub status: CheckStatus,
    pub flip: Option<Flip>,
}

pub struct CheckService {
    store: Arc<dyn Store>,
    clock: Arc<dyn Clock>,
    notifier: Option<Arc<NotificationService>>,
    locks: DashMap<CheckId, Arc<Mutex<()>>>,
}

impl CheckService {
    pub fn new(
        store: Arc<dyn Store>,
        clock: Arc<dyn Clock>,
        notifier: Option<Arc<NotificationService>>,
    ) -> Self {
        Self {
            store,
            clock,
            notifier,
            locks: DashMap::new(),
        }
    }

    /// Validates and persists a brand new check in status `new`.
    pub async fn create_check(
        &self,
        name: String,
        tags: Vec<String>,
        cadence: Cadence,
        grace_secs: u32,
        tz: Tz,
    ) -> Result<Check, CheckError> {
        let now = self.clock.now();
        schedule::validate(&cadence, tz, grace_secs, now)?;
        let check = Check::new(name, tags, cadence, grace_secs, tz, now);
        self.store.create_check(check.clone()).await?;
        info!(check_id = %check.id, name = %check.name, "Check created.");
        Ok(check)
    }

    pub async fn delete_check(&self, check_id: CheckId) -> Result<(), CheckError> {
        self.store.delete_check(check_id).await?;
        self.locks.remove(&check_id);
        info!(check_id = %check_id, "Check deleted.");
        Ok(())
    }

    /// Ingests one ping. The ping is always recorded; whether it flips the
    /// check follows the transition rules for its kind.
    pub async fn record_ping(
        &self,
        check_id: CheckId,
        kind: PingKind,
        exit_status: Option<i32>,
        body: Option<String>,
    ) -> Result<PingOutcome, CheckError> {
        let ping = Ping {
            check_id,
            seq: 0,
            at: self.clock.now(),
            kind,
            exit_status,
            body: body.map(truncate_body),
        };
        self.store.append_ping(ping).await?;

        let (check, flip) = self
            .mutate(check_id, move |check, now| {
                if kind.is_signal() {
                    check.last_ping = Some(now);
                    check.n_pings += 1;
                }
                match machine::on_ping(check.status, kind) {
                    Some(transition) => settle(check, Some(transition), now),
                    None if kind == PingKind::Success && check.status == CheckStatus::Up => {
                        // The dominant path: an on-time ping just pushes the
                        // deadline forward.
                        match refresh_deadline(check, now) {
                            Ok(()) => None,
                            Err(e) => park_unschedulable(check, &e, now),
                        }
                    }
                    None => None,
                }
            })
            .await?;

        Ok(PingOutcome { status: check.status, flip })
    }

    /// Drives one overdue check down. Re-validates the due condition under
    /// the check lock, so a ping that lands after the due query wins the
    /// race and the sweep backs off without a flip.
    pub async fn expire(&self, check_id: CheckId) -> Result<Option<Flip>, CheckError> {
        let (_, flip) = self
            .mutate(check_id, |check, now| {
                let still_due = check.status == CheckStatus::Up
                    && check.next_expiry.map(|e| e <= now).unwrap_or(false);
                if !still_due {
                    return None;
                }
                settle(check, machine::on_expiry(check.status), now)
            })
            .await?;
        Ok(flip)
    }

    /// Operator pause. History stays, deadlines clear, the sweep ignores the
    /// check until it is resumed or pinged.
    pub async fn pause(&self, check_id: CheckId) -> Result<Check, CheckError> {
        let (check, _) = self
            .mutate(check_id, |check, now| {
                settle(check, machine::on_pause(check.status), now)
            })
            .await?;
        Ok(check)
    }

    /// Operator resume. Lands on `new` when the check has never pinged,
    /// otherwise back on `up` with a deadline computed from the resume time.
    pub async fn resume(&self, check_id: CheckId) -> Result<Check, CheckError> {
        let (check, _) = self
            .mutate(check_id, |check, now| {
                let has_pinged = check.last_ping.is_some();
                settle(check, machine::on_resume(check.status, has_pinged), now)
            })
            .await?;
        Ok(check)
    }

    /// Loads, decides, and saves one check under its lock, retrying the save
    /// a bounded number of times on version conflicts. The decision closure
    /// runs on a freshly loaded copy each try.
    async fn mutate<F>(&self, check_id: CheckId, mut decide: F) -> Result<(Check, Option<Flip>), CheckError>
    where
        F: FnMut(&mut Check, DateTime<Utc>) -> Option<Flip>,
    {
        let lock = self.lock_for(check_id);
        let _guard = lock.lock().await;

        let mut tries = 0;
        loop {
            let now = self.clock.now();
            let mut check = self.store.load_check(check_id).await?;
            let flip = decide(&mut check, now);

            match self.store.save_check(&check).await {
                Ok(()) => {
                    if let Some(flip) = &flip {
                        self.commit_flip(&check, flip).await?;
                    }
                    return Ok((check, flip));
                }
                Err(StoreError::Conflict) if tries < MAX_SAVE_RETRIES => {
                    tries += 1;
                    warn!(check_id = %check_id, tries, "Optimistic save conflict, retrying.");
                }
                Err(e) => return Err(e.into()),
            }
        }
    }

    /// Appends the flip to the log and hands it to the dispatcher. An
    /// out-of-order append is logged and refused without unwinding the
    /// check; the newer history stands.
    async fn commit_flip(&self, check: &Check, flip: &Flip) -> Result<(), CheckError> {
        match self.store.append_flip(flip).await {
            Ok(()) => {
                info!(
                    check_id = %flip.check_id,
                    old_status = %flip.old_status,
                    new_status = %flip.new_status,
                    reason = %flip.reason,
                    "Status flip recorded."
                );
                if flip.notifies() {
                    if let Some(notifier) = &self.notifier {
                        notifier.on_flip(check, flip);
                    }
                }
                Ok(())
            }
            Err(StoreError::OrderingViolation { at }) => {
                error!(check_id = %flip.check_id, at = %at, "Flip append out of order, refused.");
                Ok(())
            }
            Err(e) => Err(e.into()),
        }
    }

    fn lock_for(&self, check_id: CheckId) -> Arc<Mutex<()>> {
        self.locks
            .entry(check_id)
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }
}

/// Applies a transition to the check, computing fresh schedule fields first
/// so a failure leaves the check untouched. Only `up` carries deadlines.
fn apply_transition(
    check: &mut Check,
    new_status: CheckStatus,
    reason: FlipReason,
    now: DateTime<Utc>,
) -> Result<Flip, ScheduleError> {
    let (deadline, expiry) = if new_status == CheckStatus::Up {
        (
            Some(schedule::next_deadline(&check.cadence, check.tz, now)?),
            Some(schedule::next_expiry(&check.cadence, check.tz, now, check.grace_secs)?),
        )
    } else {
        (None, None)
    };

    let flip = Flip {
        check_id: check.id,
        at: now,
        old_status: check.status,
        new_status,
        reason,
    };
    check.status = new_status;
    check.last_flip = Some(now);
    check.next_deadline = deadline;
    check.next_expiry = expiry;
    Ok(flip)
}

fn settle(check: &mut Check, transition: Option<machine::Transition>, now: DateTime<Utc>) -> Option<Flip> {
    let (new_status, reason) = transition?;
    match apply_transition(check, new_status, reason, now) {
        Ok(flip) => Some(flip),
        Err(e) => park_unschedulable(check, &e, now),
    }
}

fn refresh_deadline(check: &mut Check, from: DateTime<Utc>) -> Result<(), ScheduleError> {
    check.next_deadline = Some(schedule::next_deadline(&check.cadence, check.tz, from)?);
    check.next_expiry = Some(schedule::next_expiry(&check.cadence, check.tz, from, check.grace_secs)?);
    Ok(())
}

/// A check whose stored cadence can no longer be evaluated is parked in
/// `paused` with its deadlines cleared, so the sweep and the ping path stop
/// tripping over it.
fn park_unschedulable(check: &mut Check, err: &ScheduleError, now: DateTime<Utc>) -> Option<Flip> {
    error!(check_id = %check.id, error = %err, "Cadence can no longer be evaluated, pausing check.");
    let flip = machine::on_pause(check.status).map(|(new_status, reason)| Flip {
        check_id: check.id,
        at: now,
        old_status: check.status,
        new_status,
        reason,
    });
    if flip.is_some() {
        check.status = CheckStatus::Paused;
        check.last_flip = Some(now);
    }
    check.next_deadline = None;
    check.next_expiry = None;
    flip
}

fn truncate_body(body: String) -> String {
    if body.len() <= MAX_BODY_BYTES {
        return body;
    }
    let mut end = MAX_BODY_BYTES;
    while end > 0 && !body.is_char_boundary(end) {
        end -= 1;
    }
    body[..end].to_string()
}
