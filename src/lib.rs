//! Dead man's switch monitoring: checks ping on a cadence, silence past the
//! grace period flips them down, and flips fan out to notification channels.

pub mod checks;
pub mod clock;
pub mod config;
pub mod db;
pub mod notifications;
pub mod sweeper;
pub mod web;
