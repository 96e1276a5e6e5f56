use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::schedule::CalendarRule;

pub type CheckId = Uuid;

/// How a check is expected to report in.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Cadence {
    /// A ping is expected within `period_secs` of the previous one.
    Interval { period_secs: u32 },
    /// Pings are expected at instants matching a crontab expression,
    /// evaluated in the check's timezone.
    Cron { expr: String },
    /// Pings are expected at instants matching a structured calendar rule,
    /// evaluated in the check's timezone.
    Calendar { rule: CalendarRule },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CheckStatus {
    /// Created but never pinged. Never swept.
    New,
    /// Healthy and expected to keep reporting in.
    Up,
    /// Missed its schedule or reported a failure.
    Down,
    /// Muted by an operator. Never swept.
    Paused,
}

impl CheckStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            CheckStatus::New => "new",
            CheckStatus::Up => "up",
            CheckStatus::Down => "down",
            CheckStatus::Paused => "paused",
        }
    }
}

impl std::fmt::Display for CheckStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for CheckStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "new" => Ok(CheckStatus::New),
            "up" => Ok(CheckStatus::Up),
            "down" => Ok(CheckStatus::Down),
            "paused" => Ok(CheckStatus::Paused),
            other => Err(format!("unknown check status: {other}")),
        }
    }
}

/// A monitored job. The schedule fields (`next_deadline`, `next_expiry`) are
/// populated only while the check is `up`; every other status clears them.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Check {
    pub id: CheckId,
    pub name: String,
    #[serde(default)]
    pub tags: Vec<String>,
    pub cadence: Cadence,
    pub grace_secs: u32,
    pub tz: Tz,
    pub status: CheckStatus,
    pub last_ping: Option<DateTime<Utc>>,
    pub last_flip: Option<DateTime<Utc>>,
    pub next_deadline: Option<DateTime<Utc>>,
    pub next_expiry: Option<DateTime<Utc>>,
    pub n_pings: u64,
    pub created_at: DateTime<Utc>,
    /// Bumped by the store on every successful save.
    #[serde(default)]
    pub version: u64,
}

impl Check {
    pub fn new(
        name: String,
        tags: Vec<String>,
        cadence: Cadence,
        grace_secs: u32,
        tz: Tz,
        created_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            name,
            tags,
            cadence,
            grace_secs,
            tz,
            status: CheckStatus::New,
            last_ping: None,
            last_flip: None,
            next_deadline: None,
            next_expiry: None,
            n_pings: 0,
            created_at,
            version: 0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PingKind {
    Success,
    Fail,
    Start,
    Log,
    Ignored,
}

impl PingKind {
    /// Whether this ping refreshes the liveness bookkeeping on the check.
    /// Start, log, and ignored pings are recorded but change nothing.
    pub fn is_signal(&self) -> bool {
        matches!(self, PingKind::Success | PingKind::Fail)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            PingKind::Success => "success",
            PingKind::Fail => "fail",
            PingKind::Start => "start",
            PingKind::Log => "log",
            PingKind::Ignored => "ignored",
        }
    }
}

impl std::fmt::Display for PingKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for PingKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "success" => Ok(PingKind::Success),
            "fail" => Ok(PingKind::Fail),
            "start" => Ok(PingKind::Start),
            "log" => Ok(PingKind::Log),
            "ignored" => Ok(PingKind::Ignored),
            other => Err(format!("unknown ping kind: {other}")),
        }
    }
}

/// One received ping. `seq` is assigned by the store, per check, starting
/// at 1.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Ping {
    pub check_id: CheckId,
    pub seq: u64,
    pub at: DateTime<Utc>,
    pub kind: PingKind,
    pub exit_status: Option<i32>,
    pub body: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum FlipReason {
    /// The sweep found the check past its expiry.
    Timeout,
    /// A fail ping or nonzero exit status arrived.
    FailureSignal,
    /// An operator paused or resumed the check.
    Manual,
    /// A success ping brought the check (back) up.
    Resumed,
}

impl FlipReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            FlipReason::Timeout => "timeout",
            FlipReason::FailureSignal => "failure-signal",
            FlipReason::Manual => "manual",
            FlipReason::Resumed => "resumed",
        }
    }
}

impl std::fmt::Display for FlipReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for FlipReason {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "timeout" => Ok(FlipReason::Timeout),
            "failure-signal" => Ok(FlipReason::FailureSignal),
            "manual" => Ok(FlipReason::Manual),
            "resumed" => Ok(FlipReason::Resumed),
            other => Err(format!("unknown flip reason: {other}")),
        }
    }
}

/// One status transition, appended to the per-check flip log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Flip {
    pub check_id: CheckId,
    pub at: DateTime<Utc>,
    pub old_status: CheckStatus,
    pub new_status: CheckStatus,
    pub reason: FlipReason,
}

impl Flip {
    /// Only genuine up/down movements start a notification cycle. Edges in
    /// and out of `new` and `paused` are history only.
    pub fn notifies(&self) -> bool {
        matches!(
            (self.old_status, self.new_status),
            (CheckStatus::Up, CheckStatus::Down) | (CheckStatus::Down, CheckStatus::Up)
        )
    }
}
