//! Periodic sweep. Each tick queries the due set (checks that are `up` and
//! past expiry) and drives them down concurrently through the check service,
//! which re-validates each one under its lock.

use std::sync::Arc;

use futures::stream::{self, StreamExt};
use thiserror::Error;
use tokio::time::{interval, Duration as TokioDuration};
use tracing::{debug, error, info};

use crate::checks::service::CheckService;
use crate::clock::Clock;
use crate::db::store::{Store, StoreError};

/// Upper bound on checks expired concurrently within one tick.
const SWEEP_CONCURRENCY: usize = 16;

#[derive(Debug, Error)]
pub enum SweepError {
    #[error("due-check query failed: {0}")]
    Store(#[from] StoreError),
}

pub struct SweepService {
    store: Arc<dyn Store>,
    clock: Arc<dyn Clock>,
    checks: Arc<CheckService>,
}

impl SweepService {
    pub fn new(store: Arc<dyn Store>, clock: Arc<dyn Clock>, checks: Arc<CheckService>) -> Self {
        Self { store, clock, checks }
    }

    pub async fn start_periodic_sweep(self: Arc<Self>, period_seconds: u64) {
        info!(interval_seconds = period_seconds, "Sweep service started.");
        let mut interval = interval(TokioDuration::from_secs(period_seconds));
        loop {
            interval.tick().await;
            debug!("Running sweep cycle...");
            match self.sweep_once().await {
                Ok(flipped) if flipped > 0 => {
                    info!(count = flipped, "Sweep flipped overdue checks down.");
                }
                Ok(_) => {}
                Err(e) => {
                    error!(error = %e, "Error during sweep cycle.");
                }
            }
        }
    }

    /// One pass over the due set. Returns how many checks actually flipped;
    /// checks that were rescued by a ping between the query and the expiry
    /// re-validation do not count.
    pub async fn sweep_once(&self) -> Result<usize, SweepError> {
        let now = self.clock.now();
        let due = self.store.due_checks(now).await?;
        if due.is_empty() {
            return Ok(0);
        }
        debug!(count = due.len(), "Found overdue checks.");

        let flipped = stream::iter(due)
            .map(|check| {
                let checks = self.checks.clone();
                async move {
                    match checks.expire(check.id).await {
                        Ok(Some(_)) => 1usize,
                        Ok(None) => 0,
                        Err(e) => {
                            error!(check_id = %check.id, error = %e, "Failed to expire overdue check.");
                            0
                        }
                    }
                }
            })
            .buffer_unordered(SWEEP_CONCURRENCY)
            .fold(0usize, |acc, n| async move { acc + n })
            .await;

        Ok(flipped)
    }
}
