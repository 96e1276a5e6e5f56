//! Cadence arithmetic: when is the next ping expected, and when does a
//! missing ping become an outage. All three cadence kinds resolve to UTC
//! instants; cron and calendar rules are evaluated in the check's timezone.

use std::str::FromStr;

use chrono::{DateTime, Datelike, Duration, LocalResult, NaiveDate, NaiveTime, TimeZone, Utc, Weekday};
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::model::Cadence;

/// Upper bound on interval periods and grace windows, one year in seconds.
pub const MAX_PERIOD_SECS: u32 = 31_536_000;

/// Calendar rules must produce an occurrence within this many days of the
/// starting point. Four years covers every month/day/weekday combination
/// that can fire at all, leap days included.
const SCAN_HORIZON_DAYS: i64 = 1461;

#[derive(Debug, Error)]
pub enum ScheduleError {
    #[error("invalid cron expression: {0}")]
    Cron(String),
    #[error("invalid calendar rule: {0}")]
    Calendar(String),
    #[error("period must be between 1 and {MAX_PERIOD_SECS} seconds")]
    InvalidPeriod,
    #[error("grace must be at most {MAX_PERIOD_SECS} seconds")]
    InvalidGrace,
    #[error("cadence has no occurrence after {0}")]
    NoOccurrence(DateTime<Utc>),
}

/// Calendar recurrence: a day selector plus a local time of day, optionally
/// restricted to a set of months (empty means every month).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CalendarRule {
    #[serde(default)]
    pub months: Vec<u32>,
    pub day: CalendarDay,
    pub at: NaiveTime,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "on", rename_all = "snake_case")]
pub enum CalendarDay {
    /// A fixed day of the month, 1 to 31. Months without that day (day 30
    /// in February) simply do not fire.
    DayOfMonth { day: u32 },
    /// The nth weekday of the month, e.g. the 2nd Tuesday. `nth` is 1 to 5;
    /// months without a 5th such weekday do not fire.
    NthWeekday { nth: u32, weekday: Weekday },
    /// The last calendar day of the month.
    LastDay,
}

impl CalendarDay {
    fn matches(&self, date: NaiveDate) -> bool {
        match self {
            CalendarDay::DayOfMonth { day } => date.day() == *day,
            CalendarDay::NthWeekday { nth, weekday } => {
                date.weekday() == *weekday && (date.day() - 1) / 7 + 1 == *nth
            }
            CalendarDay::LastDay => date
                .succ_opt()
                .map(|next| next.month() != date.month())
                .unwrap_or(true),
        }
    }
}

/// Validates a cadence and grace window. Runs at check creation and update
/// time so the compute paths can assume well-formed input.
pub fn validate(cadence: &Cadence, tz: Tz, grace_secs: u32, now: DateTime<Utc>) -> Result<(), ScheduleError> {
    if grace_secs > MAX_PERIOD_SECS {
        return Err(ScheduleError::InvalidGrace);
    }
    match cadence {
        Cadence::Interval { period_secs } => {
            if *period_secs == 0 || *period_secs > MAX_PERIOD_SECS {
                return Err(ScheduleError::InvalidPeriod);
            }
            Ok(())
        }
        Cadence::Cron { expr } => {
            parse_cron(expr)?;
            Ok(())
        }
        Cadence::Calendar { rule } => {
            validate_rule(rule)?;
            // Field-valid rules can still never fire, e.g. day 30 of February.
            next_calendar(rule, tz, now)?;
            Ok(())
        }
    }
}

/// Next instant at which a ping is expected, strictly after `from`.
pub fn next_deadline(cadence: &Cadence, tz: Tz, from: DateTime<Utc>) -> Result<DateTime<Utc>, ScheduleError> {
    let deadline = match cadence {
        Cadence::Interval { period_secs } => from + Duration::seconds(i64::from(*period_secs)),
        Cadence::Cron { expr } => parse_cron(expr)?
            .after(&from.with_timezone(&tz))
            .next()
            .map(|t| t.with_timezone(&Utc))
            .ok_or(ScheduleError::NoOccurrence(from))?,
        Cadence::Calendar { rule } => next_calendar(rule, tz, from)?,
    };
    if deadline <= from {
        return Err(ScheduleError::NoOccurrence(from));
    }
    Ok(deadline)
}

/// Deadline plus grace: the instant after which the check counts as down.
pub fn next_expiry(
    cadence: &Cadence,
    tz: Tz,
    from: DateTime<Utc>,
    grace_secs: u32,
) -> Result<DateTime<Utc>, ScheduleError> {
    Ok(next_deadline(cadence, tz, from)? + Duration::seconds(i64::from(grace_secs)))
}

fn parse_cron(expr: &str) -> Result<cron::Schedule, ScheduleError> {
    // The cron crate wants a seconds field; plain five-field crontab
    // expressions get a literal zero prepended and their day-of-week field
    // rewritten to the crate's numbering.
    let fields: Vec<&str> = expr.split_whitespace().collect();
    let normalized = if let [min, hour, dom, month, dow] = fields[..] {
        format!("0 {min} {hour} {dom} {month} {}", normalize_dow(dow)?)
    } else {
        expr.to_string()
    };
    cron::Schedule::from_str(&normalized).map_err(|e| ScheduleError::Cron(e.to_string()))
}

/// Crontab numbers weekdays 0 to 7 with Sunday at both ends; the cron crate
/// numbers them 1 (Sunday) through 7 (Saturday). Numeric tokens are shifted
/// to the crate's numbering, with ranges expanded value by value so a span
/// like `5-7` stays Fri,Sat,Sun instead of turning into an inverted range.
/// Weekday names and `*` mean the same thing on both sides and pass through
/// untouched.
fn normalize_dow(field: &str) -> Result<String, ScheduleError> {
    let mut out: Vec<String> = Vec::new();
    let mut seen = [false; 8];
    for element in field.split(',') {
        let (base, step) = match element.split_once('/') {
            Some((base, step)) => match step.parse::<usize>() {
                Ok(step) if step >= 1 => (base, Some(step)),
                _ => {
                    out.push(element.to_string());
                    continue;
                }
            },
            None => (element, None),
        };
        let values: Vec<u32> = if let Ok(day) = base.parse::<u32>() {
            ensure_dow(day)?;
            match step {
                None => vec![day],
                // A bare value with a step runs to the end of the week.
                Some(step) => (day..=7).step_by(step).collect(),
            }
        } else if let Some((start, end)) = numeric_range(base) {
            ensure_dow(start)?;
            ensure_dow(end)?;
            let step = step.unwrap_or(1);
            if start <= end {
                (start..=end).step_by(step).collect()
            } else {
                // Wrapping span, e.g. 5-1 for Friday through Monday.
                (start..=7).chain(0..=end).step_by(step).collect()
            }
        } else {
            out.push(element.to_string());
            continue;
        };
        for day in values {
            let shifted = day % 7 + 1;
            if !seen[shifted as usize] {
                seen[shifted as usize] = true;
                out.push(shifted.to_string());
            }
        }
    }
    Ok(out.join(","))
}

fn numeric_range(base: &str) -> Option<(u32, u32)> {
    let (start, end) = base.split_once('-')?;
    Some((start.parse().ok()?, end.parse().ok()?))
}

fn ensure_dow(day: u32) -> Result<(), ScheduleError> {
    if day > 7 {
        return Err(ScheduleError::Cron(format!("day of week {day} out of range")));
    }
    Ok(())
}

fn validate_rule(rule: &CalendarRule) -> Result<(), ScheduleError> {
    for month in &rule.months {
        if !(1..=12).contains(month) {
            return Err(ScheduleError::Calendar(format!("month {month} out of range")));
        }
    }
    match rule.day {
        CalendarDay::DayOfMonth { day } if !(1..=31).contains(&day) => {
            Err(ScheduleError::Calendar(format!("day {day} out of range")))
        }
        CalendarDay::NthWeekday { nth, .. } if !(1..=5).contains(&nth) => {
            Err(ScheduleError::Calendar(format!("nth {nth} out of range")))
        }
        _ => Ok(()),
    }
}

/// Day-by-day scan for the next matching local instant. A local time erased
/// by a spring-forward gap yields nothing for that day; a time repeated by a
/// fall-back counts once, at the earlier offset.
fn next_calendar(rule: &CalendarRule, tz: Tz, from: DateTime<Utc>) -> Result<DateTime<Utc>, ScheduleError> {
    let mut date = from.with_timezone(&tz).date_naive();
    for _ in 0..SCAN_HORIZON_DAYS {
        if month_allowed(rule, date) && rule.day.matches(date) {
            let candidate = match tz.from_local_datetime(&date.and_time(rule.at)) {
                LocalResult::Single(t) => Some(t),
                LocalResult::Ambiguous(earliest, _) => Some(earliest),
                LocalResult::None => None,
            };
            if let Some(t) = candidate {
                let utc = t.with_timezone(&Utc);
                if utc > from {
                    return Ok(utc);
                }
            }
        }
        date = date.succ_opt().ok_or(ScheduleError::NoOccurrence(from))?;
    }
    Err(ScheduleError::NoOccurrence(from))
}

fn month_allowed(rule: &CalendarRule, date: NaiveDate) -> bool {
    rule.months.is_empty() || rule.months.contains(&date.month())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono_tz::Europe::Berlin;
    use chrono_tz::UTC;
    use proptest::prelude::*;

    fn utc(y: i32, mo: u32, d: u32, h: u32, mi: u32, s: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, mo, d, h, mi, s).unwrap()
    }

    fn local_time(h: u32, m: u32) -> NaiveTime {
        NaiveTime::from_hms_opt(h, m, 0).unwrap()
    }

    #[test]
    fn interval_deadline_adds_period() {
        let cadence = Cadence::Interval { period_secs: 60 };
        let from = utc(2026, 1, 5, 12, 0, 0);
        assert_eq!(next_deadline(&cadence, UTC, from).unwrap(), from + Duration::seconds(60));
        assert_eq!(
            next_expiry(&cadence, UTC, from, 30).unwrap(),
            from + Duration::seconds(90)
        );
    }

    #[test]
    fn five_field_cron_is_accepted() {
        let cadence = Cadence::Cron { expr: "*/15 * * * *".to_string() };
        let from = utc(2026, 1, 5, 12, 1, 0);
        assert_eq!(next_deadline(&cadence, UTC, from).unwrap(), utc(2026, 1, 5, 12, 15, 0));
    }

    #[test]
    fn cron_deadline_is_strictly_after_from() {
        // `from` sits exactly on a match; the next one must be strictly later.
        let cadence = Cadence::Cron { expr: "0 * * * *".to_string() };
        let from = utc(2026, 1, 5, 12, 0, 0);
        assert_eq!(next_deadline(&cadence, UTC, from).unwrap(), utc(2026, 1, 5, 13, 0, 0));
    }

    #[test]
    fn cron_respects_the_timezone_across_dst() {
        // Berlin enters DST on 2026-03-29: 09:00 local is 08:00 UTC before
        // and 07:00 UTC after.
        let cadence = Cadence::Cron { expr: "0 9 * * *".to_string() };

        let before = utc(2026, 3, 28, 10, 0, 0);
        assert_eq!(next_deadline(&cadence, Berlin, before).unwrap(), utc(2026, 3, 29, 7, 0, 0));

        let after = utc(2026, 3, 29, 10, 0, 0);
        assert_eq!(next_deadline(&cadence, Berlin, after).unwrap(), utc(2026, 3, 30, 7, 0, 0));
    }

    #[test]
    fn invalid_cron_is_rejected() {
        let cadence = Cadence::Cron { expr: "not a cron line".to_string() };
        assert!(matches!(
            validate(&cadence, UTC, 0, utc(2026, 1, 1, 0, 0, 0)),
            Err(ScheduleError::Cron(_))
        ));
    }

    #[test]
    fn numeric_weekdays_follow_crontab_numbering() {
        // 2026-01-07 is a Wednesday. Crontab numbers Sunday 0 (or 7) and
        // Monday 1.
        let from = utc(2026, 1, 7, 12, 0, 0);

        let sunday = Cadence::Cron { expr: "30 8 * * 0".to_string() };
        let next = next_deadline(&sunday, UTC, from).unwrap();
        assert_eq!(next, utc(2026, 1, 11, 8, 30, 0));
        assert_eq!(next.weekday(), Weekday::Sun);

        let monday = Cadence::Cron { expr: "30 8 * * 1".to_string() };
        let next = next_deadline(&monday, UTC, from).unwrap();
        assert_eq!(next, utc(2026, 1, 12, 8, 30, 0));
        assert_eq!(next.weekday(), Weekday::Mon);

        let also_sunday = Cadence::Cron { expr: "30 8 * * 7".to_string() };
        assert_eq!(next_deadline(&also_sunday, UTC, from).unwrap(), utc(2026, 1, 11, 8, 30, 0));
    }

    #[test]
    fn weekday_lists_ranges_and_steps_are_shifted() {
        let from = utc(2026, 1, 7, 12, 0, 0);

        // Monday through Friday: Thursday the 8th comes first.
        let weekdays = Cadence::Cron { expr: "0 9 * * 1-5".to_string() };
        assert_eq!(next_deadline(&weekdays, UTC, from).unwrap(), utc(2026, 1, 8, 9, 0, 0));

        // The weekend list lands on Saturday the 10th.
        let weekend = Cadence::Cron { expr: "0 9 * * 0,6".to_string() };
        let next = next_deadline(&weekend, UTC, from).unwrap();
        assert_eq!(next, utc(2026, 1, 10, 9, 0, 0));
        assert_eq!(next.weekday(), Weekday::Sat);

        // Monday, Wednesday, Friday: Wednesday 09:00 already passed at noon.
        let stepped = Cadence::Cron { expr: "0 9 * * 1-5/2".to_string() };
        assert_eq!(next_deadline(&stepped, UTC, from).unwrap(), utc(2026, 1, 9, 9, 0, 0));
    }

    #[test]
    fn weekday_numbers_above_seven_are_rejected() {
        let cadence = Cadence::Cron { expr: "0 9 * * 8".to_string() };
        assert!(matches!(
            validate(&cadence, UTC, 0, utc(2026, 1, 1, 0, 0, 0)),
            Err(ScheduleError::Cron(_))
        ));
    }

    #[test]
    fn period_bounds_are_enforced() {
        let now = utc(2026, 1, 1, 0, 0, 0);
        assert!(matches!(
            validate(&Cadence::Interval { period_secs: 0 }, UTC, 0, now),
            Err(ScheduleError::InvalidPeriod)
        ));
        assert!(matches!(
            validate(&Cadence::Interval { period_secs: MAX_PERIOD_SECS + 1 }, UTC, 0, now),
            Err(ScheduleError::InvalidPeriod)
        ));
        assert!(matches!(
            validate(&Cadence::Interval { period_secs: 60 }, UTC, MAX_PERIOD_SECS + 1, now),
            Err(ScheduleError::InvalidGrace)
        ));
        assert!(validate(&Cadence::Interval { period_secs: 60 }, UTC, 30, now).is_ok());
    }

    #[test]
    fn calendar_day_of_month() {
        let rule = CalendarRule {
            months: vec![],
            day: CalendarDay::DayOfMonth { day: 15 },
            at: local_time(9, 0),
        };
        let cadence = Cadence::Calendar { rule };
        let from = utc(2026, 1, 20, 0, 0, 0);
        assert_eq!(next_deadline(&cadence, UTC, from).unwrap(), utc(2026, 2, 15, 9, 0, 0));
    }

    #[test]
    fn calendar_nth_weekday() {
        // First Monday of February 2026 is the 2nd.
        let rule = CalendarRule {
            months: vec![],
            day: CalendarDay::NthWeekday { nth: 1, weekday: Weekday::Mon },
            at: local_time(8, 30),
        };
        let cadence = Cadence::Calendar { rule };
        let from = utc(2026, 1, 6, 0, 0, 0);
        // First Monday after Jan 6 within January: Jan 5 already passed, so
        // the next first-Monday is Feb 2.
        assert_eq!(next_deadline(&cadence, UTC, from).unwrap(), utc(2026, 2, 2, 8, 30, 0));
    }

    #[test]
    fn calendar_last_day_of_month() {
        let rule = CalendarRule {
            months: vec![2],
            day: CalendarDay::LastDay,
            at: local_time(23, 0),
        };
        let cadence = Cadence::Calendar { rule };
        let from = utc(2026, 1, 1, 0, 0, 0);
        assert_eq!(next_deadline(&cadence, UTC, from).unwrap(), utc(2026, 2, 28, 23, 0, 0));
    }

    #[test]
    fn calendar_skips_nonexistent_local_times() {
        // 02:30 on 2026-03-29 does not exist in Berlin (clocks jump 02:00 to
        // 03:00), so the occurrence moves to the next matching day.
        let rule = CalendarRule {
            months: vec![],
            day: CalendarDay::DayOfMonth { day: 29 },
            at: local_time(2, 30),
        };
        let cadence = Cadence::Calendar { rule };
        let from = utc(2026, 3, 28, 0, 0, 0);
        // April 29, 02:30 CEST = 00:30 UTC.
        assert_eq!(next_deadline(&cadence, Berlin, from).unwrap(), utc(2026, 4, 29, 0, 30, 0));
    }

    #[test]
    fn calendar_counts_ambiguous_local_times_once() {
        // 02:30 on 2026-10-25 happens twice in Berlin; the earlier offset
        // (CEST, +02:00) wins, i.e. 00:30 UTC.
        let rule = CalendarRule {
            months: vec![],
            day: CalendarDay::DayOfMonth { day: 25 },
            at: local_time(2, 30),
        };
        let cadence = Cadence::Calendar { rule };
        let from = utc(2026, 10, 24, 0, 0, 0);
        assert_eq!(next_deadline(&cadence, Berlin, from).unwrap(), utc(2026, 10, 25, 0, 30, 0));
    }

    #[test]
    fn impossible_calendar_rule_is_rejected() {
        // Day 30 of February never exists.
        let rule = CalendarRule {
            months: vec![2],
            day: CalendarDay::DayOfMonth { day: 30 },
            at: local_time(12, 0),
        };
        let cadence = Cadence::Calendar { rule };
        assert!(matches!(
            validate(&cadence, UTC, 0, utc(2026, 1, 1, 0, 0, 0)),
            Err(ScheduleError::NoOccurrence(_))
        ));
    }

    #[test]
    fn out_of_range_calendar_fields_are_rejected() {
        let now = utc(2026, 1, 1, 0, 0, 0);
        let bad_day = CalendarRule {
            months: vec![],
            day: CalendarDay::DayOfMonth { day: 32 },
            at: local_time(0, 0),
        };
        assert!(matches!(
            validate(&Cadence::Calendar { rule: bad_day }, UTC, 0, now),
            Err(ScheduleError::Calendar(_))
        ));

        let bad_month = CalendarRule {
            months: vec![13],
            day: CalendarDay::LastDay,
            at: local_time(0, 0),
        };
        assert!(matches!(
            validate(&Cadence::Calendar { rule: bad_month }, UTC, 0, now),
            Err(ScheduleError::Calendar(_))
        ));

        let bad_nth = CalendarRule {
            months: vec![],
            day: CalendarDay::NthWeekday { nth: 6, weekday: Weekday::Fri },
            at: local_time(0, 0),
        };
        assert!(matches!(
            validate(&Cadence::Calendar { rule: bad_nth }, UTC, 0, now),
            Err(ScheduleError::Calendar(_))
        ));
    }

    proptest! {
        #[test]
        fn interval_deadlines_are_strictly_future(
            period in 1u32..=MAX_PERIOD_SECS,
            secs in 0i64..=3_600_000_000i64,
        ) {
            let from = DateTime::from_timestamp(secs, 0).unwrap();
            let cadence = Cadence::Interval { period_secs: period };
            let deadline = next_deadline(&cadence, UTC, from).unwrap();
            prop_assert!(deadline > from);
            let expiry = next_expiry(&cadence, UTC, from, 60).unwrap();
            prop_assert!(expiry > deadline);
        }

        #[test]
        fn cron_deadlines_are_strictly_future(
            secs in 0i64..=3_600_000_000i64,
            idx in 0usize..5,
        ) {
            let exprs = ["* * * * *", "*/5 * * * *", "0 9 * * MON", "30 2 1 * *", "0 9 * * 0,6"];
            let cadence = Cadence::Cron { expr: exprs[idx].to_string() };
            let from = DateTime::from_timestamp(secs, 0).unwrap();
            let deadline = next_deadline(&cadence, Berlin, from).unwrap();
            prop_assert!(deadline > from);
        }

        #[test]
        fn calendar_deadlines_are_strictly_future(
            secs in 0i64..=3_600_000_000i64,
            day in 1u32..=28,
            hour in 0u32..24,
        ) {
            let rule = CalendarRule {
                months: vec![],
                day: CalendarDay::DayOfMonth { day },
                at: NaiveTime::from_hms_opt(hour, 0, 0).unwrap(),
            };
            let cadence = Cadence::Calendar { rule };
            let from = DateTime::from_timestamp(secs, 0).unwrap();
            let deadline = next_deadline(&cadence, Berlin, from).unwrap();
            prop_assert!(deadline > from);
        }
    }
}
