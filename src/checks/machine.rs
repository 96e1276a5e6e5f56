//! Pure status transition rules. Nothing here touches storage or the clock;
//! callers feed in the current status and an event, and get back the flip to
//! apply, if any.

use super::model::{CheckStatus, FlipReason, PingKind};

/// The status to move to and the reason to record for it.
pub type Transition = (CheckStatus, FlipReason);

/// Effect of a ping. `None` is the no-flip path; for an on-time success ping
/// on an `up` check it is also the hot path.
pub fn on_ping(status: CheckStatus, kind: PingKind) -> Option<Transition> {
    match (status, kind) {
        (CheckStatus::Up, PingKind::Success) => None,
        (_, PingKind::Success) => Some((CheckStatus::Up, FlipReason::Resumed)),
        (CheckStatus::Down, PingKind::Fail) => None,
        (_, PingKind::Fail) => Some((CheckStatus::Down, FlipReason::FailureSignal)),
        // Start, log, and ignored pings never move the status.
        _ => None,
    }
}

/// Effect of a passed expiry, as detected by the sweep. Only `up` checks
/// have an expiry to pass.
pub fn on_expiry(status: CheckStatus) -> Option<Transition> {
    match status {
        CheckStatus::Up => Some((CheckStatus::Down, FlipReason::Timeout)),
        _ => None,
    }
}

pub fn on_pause(status: CheckStatus) -> Option<Transition> {
    match status {
        CheckStatus::Paused => None,
        _ => Some((CheckStatus::Paused, FlipReason::Manual)),
    }
}

/// A resumed check starts over as `new` unless it has pinged before, in
/// which case it goes straight back to `up` with a fresh deadline.
pub fn on_resume(status: CheckStatus, has_pinged: bool) -> Option<Transition> {
    match status {
        CheckStatus::Paused => {
            let target = if has_pinged { CheckStatus::Up } else { CheckStatus::New };
            Some((target, FlipReason::Manual))
        }
        _ => None,
    }
}
