//! End-to-end engine scenarios over the in-memory store: ping ingestion,
//! sweeps, pause/resume, and the flip log they produce.

use std::sync::Arc;

use chrono::{DateTime, Duration, TimeZone, Utc};

use pingmon::checks::model::{Cadence, Check, CheckStatus, FlipReason, PingKind};
use pingmon::checks::service::{CheckError, CheckService};
use pingmon::clock::{Clock, ManualClock};
use pingmon::db::memory::MemoryStore;
use pingmon::db::store::{Store, StoreError};
use pingmon::sweeper::sweep_service::SweepService;

fn t0() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 1, 5, 12, 0, 0).unwrap()
}

struct Harness {
    store: Arc<MemoryStore>,
    clock: Arc<ManualClock>,
    checks: Arc<CheckService>,
    sweeper: SweepService,
}

fn harness() -> Harness {
    let store = Arc::new(MemoryStore::new());
    let clock = Arc::new(ManualClock::new(t0()));
    let checks = Arc::new(CheckService::new(store.clone(), clock.clone(), None));
    let sweeper = SweepService::new(store.clone(), clock.clone(), checks.clone());
    Harness { store, clock, checks, sweeper }
}

impl Harness {
    /// Interval check: 60s period, 30s grace, UTC.
    async fn interval_check(&self) -> Check {
        self.checks
            .create_check(
                "backup".to_string(),
                vec!["prod".to_string()],
                Cadence::Interval { period_secs: 60 },
                30,
                chrono_tz::UTC,
            )
            .await
            .unwrap()
    }

    async fn success_ping(&self, check: &Check) -> Option<pingmon::checks::model::Flip> {
        self.checks
            .record_ping(check.id, PingKind::Success, None, None)
            .await
            .unwrap()
            .flip
    }

    async fn fail_ping(&self, check: &Check) -> Option<pingmon::checks::model::Flip> {
        self.checks
            .record_ping(check.id, PingKind::Fail, None, None)
            .await
            .unwrap()
            .flip
    }

    async fn status(&self, check: &Check) -> CheckStatus {
        self.store.load_check(check.id).await.unwrap().status
    }

    async fn flips(&self, check: &Check) -> Vec<pingmon::checks::model::Flip> {
        self.store
            .list_flips_since(check.id, DateTime::<Utc>::MIN_UTC)
            .await
            .unwrap()
    }
}

#[tokio::test]
async fn a_check_that_never_pings_stays_new() {
    let h = harness();
    let check = h.interval_check().await;

    h.clock.advance(Duration::days(1));
    assert_eq!(h.sweeper.sweep_once().await.unwrap(), 0);

    assert_eq!(h.status(&check).await, CheckStatus::New);
    assert!(h.flips(&check).await.is_empty());
}

#[tokio::test]
async fn first_success_ping_raises_the_check() {
    let h = harness();
    let check = h.interval_check().await;

    let flip = h.success_ping(&check).await.expect("first ping should flip");
    assert_eq!(flip.old_status, CheckStatus::New);
    assert_eq!(flip.new_status, CheckStatus::Up);
    assert_eq!(flip.reason, FlipReason::Resumed);
    assert!(!flip.notifies());

    let stored = h.store.load_check(check.id).await.unwrap();
    assert_eq!(stored.status, CheckStatus::Up);
    assert_eq!(stored.next_deadline, Some(t0() + Duration::seconds(60)));
    assert_eq!(stored.next_expiry, Some(t0() + Duration::seconds(90)));
    assert_eq!(stored.n_pings, 1);
    assert_eq!(stored.last_ping, Some(t0()));
}

#[tokio::test]
async fn on_time_success_pings_only_push_the_deadline() {
    let h = harness();
    let check = h.interval_check().await;
    h.success_ping(&check).await;

    h.clock.advance(Duration::seconds(30));
    let flip = h.success_ping(&check).await;
    assert!(flip.is_none());

    let stored = h.store.load_check(check.id).await.unwrap();
    assert_eq!(stored.status, CheckStatus::Up);
    assert_eq!(stored.n_pings, 2);
    let second_ping_at = t0() + Duration::seconds(30);
    assert_eq!(stored.next_deadline, Some(second_ping_at + Duration::seconds(60)));
    assert_eq!(stored.next_expiry, Some(second_ping_at + Duration::seconds(90)));
    assert_eq!(h.flips(&check).await.len(), 1);
}

#[tokio::test]
async fn fail_pings_flip_down_exactly_once() {
    let h = harness();
    let check = h.interval_check().await;
    h.success_ping(&check).await;

    h.clock.advance(Duration::seconds(10));
    let flip = h.fail_ping(&check).await.expect("fail ping should flip");
    assert_eq!(flip.old_status, CheckStatus::Up);
    assert_eq!(flip.new_status, CheckStatus::Down);
    assert_eq!(flip.reason, FlipReason::FailureSignal);
    assert!(flip.notifies());

    // Repeated failure signals while already down change nothing.
    h.clock.advance(Duration::seconds(10));
    assert!(h.fail_ping(&check).await.is_none());
    assert_eq!(h.status(&check).await, CheckStatus::Down);
    assert_eq!(h.flips(&check).await.len(), 2);

    let stored = h.store.load_check(check.id).await.unwrap();
    assert_eq!(stored.next_deadline, None);
    assert_eq!(stored.next_expiry, None);
    assert_eq!(stored.n_pings, 3);
}

#[tokio::test]
async fn the_sweep_respects_the_grace_period() {
    // Interval 60s, grace 30s, success ping at T0: the check expires at
    // T0+90, so a sweep at T0+89 must not flip and one at T0+91 must.
    let h = harness();
    let check = h.interval_check().await;
    h.success_ping(&check).await;

    h.clock.set(t0() + Duration::seconds(89));
    assert_eq!(h.sweeper.sweep_once().await.unwrap(), 0);
    assert_eq!(h.status(&check).await, CheckStatus::Up);

    h.clock.set(t0() + Duration::seconds(91));
    assert_eq!(h.sweeper.sweep_once().await.unwrap(), 1);
    assert_eq!(h.status(&check).await, CheckStatus::Down);

    let flips = h.flips(&check).await;
    assert_eq!(flips.len(), 2);
    assert_eq!(flips[1].reason, FlipReason::Timeout);
    assert_eq!(flips[1].at, t0() + Duration::seconds(91));
    assert!(flips[1].notifies());
}

#[tokio::test]
async fn consecutive_sweeps_produce_one_flip() {
    let h = harness();
    let check = h.interval_check().await;
    h.success_ping(&check).await;

    h.clock.set(t0() + Duration::seconds(120));
    assert_eq!(h.sweeper.sweep_once().await.unwrap(), 1);
    assert_eq!(h.sweeper.sweep_once().await.unwrap(), 0);
    assert_eq!(h.sweeper.sweep_once().await.unwrap(), 0);

    assert_eq!(h.flips(&check).await.len(), 2);
    assert_eq!(h.status(&check).await, CheckStatus::Down);
}

#[tokio::test]
async fn a_recovery_ping_raises_the_check_again() {
    let h = harness();
    let check = h.interval_check().await;
    h.success_ping(&check).await;

    h.clock.set(t0() + Duration::seconds(120));
    h.sweeper.sweep_once().await.unwrap();
    assert_eq!(h.status(&check).await, CheckStatus::Down);

    let recovery_at = t0() + Duration::seconds(200);
    h.clock.set(recovery_at);
    let flip = h.success_ping(&check).await.expect("recovery should flip");
    assert_eq!(flip.old_status, CheckStatus::Down);
    assert_eq!(flip.new_status, CheckStatus::Up);
    assert_eq!(flip.reason, FlipReason::Resumed);
    assert!(flip.notifies());

    let stored = h.store.load_check(check.id).await.unwrap();
    assert_eq!(stored.next_deadline, Some(recovery_at + Duration::seconds(60)));
    assert_eq!(stored.next_expiry, Some(recovery_at + Duration::seconds(90)));
}

#[tokio::test]
async fn a_ping_processed_first_rescues_the_check_from_the_sweep() {
    let h = harness();
    let check = h.interval_check().await;
    h.success_ping(&check).await;

    // Past expiry, but the ping lands before the sweep runs.
    h.clock.set(t0() + Duration::seconds(120));
    assert!(h.success_ping(&check).await.is_none());
    assert_eq!(h.sweeper.sweep_once().await.unwrap(), 0);

    assert_eq!(h.status(&check).await, CheckStatus::Up);
    assert_eq!(h.flips(&check).await.len(), 1);
}

#[tokio::test]
async fn expire_revalidates_the_due_condition() {
    let h = harness();
    let check = h.interval_check().await;
    h.success_ping(&check).await;

    h.clock.set(t0() + Duration::seconds(120));

    // The sweep's due query selects the check...
    let due = h.store.due_checks(h.clock.now()).await.unwrap();
    assert_eq!(due.len(), 1);

    // ...but a ping lands before the expiry is applied.
    h.success_ping(&check).await;

    let flip = h.checks.expire(check.id).await.unwrap();
    assert!(flip.is_none());
    assert_eq!(h.status(&check).await, CheckStatus::Up);
}

#[tokio::test]
async fn pause_and_resume_with_history() {
    let h = harness();
    let check = h.interval_check().await;
    h.success_ping(&check).await;

    h.clock.advance(Duration::seconds(10));
    let paused = h.checks.pause(check.id).await.unwrap();
    assert_eq!(paused.status, CheckStatus::Paused);
    assert_eq!(paused.next_deadline, None);
    assert_eq!(paused.next_expiry, None);

    // Paused checks are invisible to the sweep.
    h.clock.advance(Duration::days(1));
    assert_eq!(h.sweeper.sweep_once().await.unwrap(), 0);

    // This check has pinged before, so resume lands on up with a deadline
    // computed from the resume instant.
    let resume_at = h.clock.now();
    let resumed = h.checks.resume(check.id).await.unwrap();
    assert_eq!(resumed.status, CheckStatus::Up);
    assert_eq!(resumed.next_deadline, Some(resume_at + Duration::seconds(60)));

    let flips = h.flips(&check).await;
    assert_eq!(flips.len(), 3);
    assert_eq!(flips[1].reason, FlipReason::Manual);
    assert_eq!(flips[2].reason, FlipReason::Manual);
    // None of new->up, up->paused, paused->up is an alertable edge.
    assert!(flips.iter().all(|f| !f.notifies()));
}

#[tokio::test]
async fn resume_of_a_never_pinged_check_lands_on_new() {
    let h = harness();
    let check = h.interval_check().await;

    h.clock.advance(Duration::seconds(5));
    h.checks.pause(check.id).await.unwrap();

    h.clock.advance(Duration::seconds(5));
    let resumed = h.checks.resume(check.id).await.unwrap();
    assert_eq!(resumed.status, CheckStatus::New);
    assert_eq!(resumed.next_deadline, None);

    // Resuming twice is a no-op.
    h.clock.advance(Duration::seconds(5));
    let again = h.checks.resume(check.id).await.unwrap();
    assert_eq!(again.status, CheckStatus::New);
    assert_eq!(h.flips(&check).await.len(), 2);
}

#[tokio::test]
async fn success_ping_on_a_paused_check_is_an_implicit_resume() {
    let h = harness();
    let check = h.interval_check().await;
    h.success_ping(&check).await;

    h.clock.advance(Duration::seconds(10));
    h.checks.pause(check.id).await.unwrap();

    h.clock.advance(Duration::seconds(10));
    let flip = h.success_ping(&check).await.expect("ping should resume");
    assert_eq!(flip.old_status, CheckStatus::Paused);
    assert_eq!(flip.new_status, CheckStatus::Up);
    assert_eq!(flip.reason, FlipReason::Resumed);
    assert!(!flip.notifies());
}

#[tokio::test]
async fn fail_ping_on_a_paused_check_goes_down_quietly() {
    let h = harness();
    let check = h.interval_check().await;
    h.success_ping(&check).await;

    h.clock.advance(Duration::seconds(10));
    h.checks.pause(check.id).await.unwrap();

    h.clock.advance(Duration::seconds(10));
    let flip = h.fail_ping(&check).await.expect("fail ping should flip");
    assert_eq!(flip.old_status, CheckStatus::Paused);
    assert_eq!(flip.new_status, CheckStatus::Down);
    assert_eq!(flip.reason, FlipReason::FailureSignal);
    assert!(!flip.notifies());
}

#[tokio::test]
async fn pings_for_unknown_checks_are_rejected() {
    let h = harness();
    let err = h
        .checks
        .record_ping(uuid::Uuid::new_v4(), PingKind::Success, None, None)
        .await
        .unwrap_err();
    assert!(matches!(err, CheckError::Store(StoreError::CheckNotFound)));
}

#[tokio::test]
async fn passive_ping_kinds_are_recorded_but_change_nothing() {
    let h = harness();
    let check = h.interval_check().await;
    h.success_ping(&check).await;
    let deadline_before = h.store.load_check(check.id).await.unwrap().next_deadline;

    h.clock.advance(Duration::seconds(10));
    for kind in [PingKind::Start, PingKind::Log, PingKind::Ignored] {
        let outcome = h.checks.record_ping(check.id, kind, None, None).await.unwrap();
        assert!(outcome.flip.is_none());
        assert_eq!(outcome.status, CheckStatus::Up);
    }

    let stored = h.store.load_check(check.id).await.unwrap();
    // Passive kinds neither count as pings nor move the deadline.
    assert_eq!(stored.n_pings, 1);
    assert_eq!(stored.last_ping, Some(t0()));
    assert_eq!(stored.next_deadline, deadline_before);

    let pings = h.store.list_pings(check.id, 10).await.unwrap();
    assert_eq!(pings.len(), 4);
}

#[tokio::test]
async fn the_flip_log_is_strictly_ordered() {
    let h = harness();
    let check = h.interval_check().await;

    h.success_ping(&check).await;
    h.clock.advance(Duration::seconds(10));
    h.fail_ping(&check).await;
    h.clock.advance(Duration::seconds(10));
    h.success_ping(&check).await;
    h.clock.advance(Duration::seconds(10));
    h.checks.pause(check.id).await.unwrap();
    h.clock.advance(Duration::seconds(10));
    h.checks.resume(check.id).await.unwrap();

    let flips = h.flips(&check).await;
    assert_eq!(flips.len(), 5);
    for pair in flips.windows(2) {
        assert!(pair[0].at < pair[1].at);
    }

    // list_flips_since slices the same ordered log.
    let since = flips[2].at;
    let tail = h.store.list_flips_since(check.id, since).await.unwrap();
    assert_eq!(tail.len(), 3);
    assert_eq!(tail[0].at, since);
}

#[tokio::test]
async fn zero_grace_expires_at_the_deadline() {
    let h = harness();
    let check = h
        .checks
        .create_check(
            "tight".to_string(),
            vec![],
            Cadence::Interval { period_secs: 60 },
            0,
            chrono_tz::UTC,
        )
        .await
        .unwrap();
    h.checks.record_ping(check.id, PingKind::Success, None, None).await.unwrap();

    let stored = h.store.load_check(check.id).await.unwrap();
    assert_eq!(stored.next_deadline, stored.next_expiry);

    h.clock.set(t0() + Duration::seconds(60));
    assert_eq!(h.sweeper.sweep_once().await.unwrap(), 1);
    assert_eq!(h.status(&check).await, CheckStatus::Down);
}

#[tokio::test]
async fn ping_bodies_are_captured_and_capped() {
    let h = harness();
    let check = h.interval_check().await;

    let body = "x".repeat(20 * 1024);
    h.checks
        .record_ping(check.id, PingKind::Success, None, Some(body))
        .await
        .unwrap();

    let pings = h.store.list_pings(check.id, 1).await.unwrap();
    let stored_body = pings[0].body.as_ref().unwrap();
    assert_eq!(stored_body.len(), pingmon::checks::service::MAX_BODY_BYTES);
}

#[tokio::test]
async fn exit_status_pings_carry_the_code() {
    let h = harness();
    let check = h.interval_check().await;

    let outcome = h
        .checks
        .record_ping(check.id, PingKind::Fail, Some(3), None)
        .await
        .unwrap();
    assert_eq!(outcome.status, CheckStatus::Down);

    let pings = h.store.list_pings(check.id, 1).await.unwrap();
    assert_eq!(pings[0].exit_status, Some(3));
    assert_eq!(pings[0].kind, PingKind::Fail);
}
