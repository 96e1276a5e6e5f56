//! Notification dispatcher. Flips arrive on a bounded queue, fan out to the
//! channels scoped to the check, and each (flip, channel) pair runs its own
//! retry sequence. Delivery records make redelivery idempotent.

use std::collections::HashMap;
use std::sync::Arc;

use rand::Rng;
use tokio::sync::mpsc;
use tokio::time::{sleep, timeout, Duration as TokioDuration};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::checks::model::{Check, CheckStatus, Flip, FlipReason};
use crate::clock::Clock;
use crate::config::NotifyConfig;
use crate::db::store::Store;

use super::models::{Channel, FlipMessage, Notification, NotificationOutcome};
use super::senders::telegram::TelegramSender;
use super::senders::webhook::WebhookSender;
use super::senders::{SenderError, Transport};

/// One unit of dispatch work: a flip plus the message rendered from the
/// check as it looked at flip time.
#[derive(Debug, Clone)]
pub struct DispatchRequest {
    pub flip: Flip,
    pub message: FlipMessage,
}

pub struct NotificationService {
    store: Arc<dyn Store>,
    clock: Arc<dyn Clock>,
    config: NotifyConfig,
    transports: HashMap<&'static str, Arc<dyn Transport>>,
    tx: mpsc::Sender<DispatchRequest>,
}

impl NotificationService {
    /// Builds the service with the stock transports. The returned receiver
    /// must be passed back into [`run`](Self::run) on a spawned task.
    pub fn new(
        store: Arc<dyn Store>,
        clock: Arc<dyn Clock>,
        config: NotifyConfig,
    ) -> (Arc<Self>, mpsc::Receiver<DispatchRequest>) {
        let senders: Vec<Arc<dyn Transport>> = vec![
            Arc::new(WebhookSender::new()),
            Arc::new(TelegramSender::new()),
        ];
        Self::with_transports(store, clock, config, senders)
    }

    pub fn with_transports(
        store: Arc<dyn Store>,
        clock: Arc<dyn Clock>,
        config: NotifyConfig,
        senders: Vec<Arc<dyn Transport>>,
    ) -> (Arc<Self>, mpsc::Receiver<DispatchRequest>) {
        let (tx, rx) = mpsc::channel(config.queue_capacity.max(1));
        let mut transports: HashMap<&'static str, Arc<dyn Transport>> = HashMap::new();
        for sender in senders {
            transports.insert(sender.kind(), sender);
        }
        (Arc::new(Self { store, clock, config, transports, tx }), rx)
    }

    /// Queues a notification cycle for a flip. Never blocks; when the queue
    /// is full the request is dropped and logged.
    pub fn on_flip(&self, check: &Check, flip: &Flip) {
        let request = DispatchRequest {
            flip: flip.clone(),
            message: FlipMessage::new(check, flip),
        };
        if let Err(e) = self.tx.try_send(request) {
            error!(check_id = %flip.check_id, error = %e, "Dispatch queue full, dropping notification request.");
        }
    }

    /// Drains the dispatch queue. Runs until every sender handle is dropped.
    pub async fn run(self: Arc<Self>, mut rx: mpsc::Receiver<DispatchRequest>) {
        info!(queue_capacity = self.config.queue_capacity, "Notification dispatcher started.");
        while let Some(request) = rx.recv().await {
            let channels = match self.store.channels_for_check(request.flip.check_id).await {
                Ok(channels) => channels,
                Err(e) => {
                    error!(check_id = %request.flip.check_id, error = %e, "Failed to resolve channels for flip.");
                    continue;
                }
            };
            debug!(
                check_id = %request.flip.check_id,
                channel_count = channels.len(),
                "Fanning out flip."
            );
            for channel in channels {
                let service = self.clone();
                let request = request.clone();
                tokio::spawn(async move {
                    service.dispatch_to_channel(request, channel).await;
                });
            }
        }
        info!("Notification dispatcher stopped.");
    }

    /// Full delivery sequence for one (flip, channel) pair: dedup, rate
    /// limit, then bounded attempts with backoff. A newer flip for the same
    /// check cancels whatever is still pending here.
    async fn dispatch_to_channel(&self, request: DispatchRequest, channel: Channel) {
        let flip = &request.flip;
        let Some(transport) = self.transports.get(channel.config.kind()).cloned() else {
            error!(channel_id = %channel.id, kind = channel.config.kind(), "No transport registered for channel kind.");
            return;
        };

        if transport.is_noop(&channel, &request.message) {
            debug!(channel_id = %channel.id, check_id = %flip.check_id, "Channel has nothing to send for this transition.");
            return;
        }

        match self.store.find_notification(flip.check_id, flip.at, channel.id).await {
            Ok(Some(existing)) if existing.outcome == NotificationOutcome::Sent => {
                debug!(channel_id = %channel.id, check_id = %flip.check_id, "Flip already delivered to this channel.");
                return;
            }
            Ok(_) => {}
            Err(e) => {
                error!(channel_id = %channel.id, check_id = %flip.check_id, error = %e, "Could not read delivery history.");
                return;
            }
        }

        let mut record = Notification {
            check_id: flip.check_id,
            flip_at: flip.at,
            channel_id: channel.id,
            attempts: 0,
            last_attempt: None,
            outcome: NotificationOutcome::Pending,
        };

        let window_start =
            self.clock.now() - chrono::Duration::seconds(self.config.rate_window_secs as i64);
        match self.store.count_sent_since(channel.id, flip.check_id, window_start).await {
            Ok(sent) if sent >= self.config.rate_limit => {
                warn!(
                    channel_id = %channel.id,
                    check_id = %flip.check_id,
                    sent_in_window = sent,
                    "Rate limit reached, skipping notification."
                );
                record.outcome = NotificationOutcome::SkippedDuplicate;
                self.save(&record).await;
                return;
            }
            Ok(_) => {}
            Err(e) => {
                error!(channel_id = %channel.id, error = %e, "Rate limit query failed, sending anyway.");
            }
        }

        self.save(&record).await;

        while record.attempts < self.config.max_attempts {
            if self.is_superseded(flip).await {
                info!(check_id = %flip.check_id, channel_id = %channel.id, "Flip superseded by a newer one, cancelling delivery.");
                record.outcome = NotificationOutcome::SkippedDuplicate;
                self.save(&record).await;
                return;
            }

            record.attempts += 1;
            record.last_attempt = Some(self.clock.now());

            let attempt = timeout(
                TokioDuration::from_secs(self.config.send_timeout_secs),
                transport.send(&channel, &request.message),
            )
            .await;

            match attempt {
                Ok(Ok(())) => {
                    info!(
                        check_id = %flip.check_id,
                        channel_id = %channel.id,
                        attempts = record.attempts,
                        "Notification delivered."
                    );
                    record.outcome = NotificationOutcome::Sent;
                    self.save(&record).await;
                    return;
                }
                Ok(Err(e)) if e.is_permanent() => {
                    error!(
                        check_id = %flip.check_id,
                        channel_id = %channel.id,
                        error = %e,
                        "Permanent delivery failure."
                    );
                    record.outcome = NotificationOutcome::Failed;
                    self.save(&record).await;
                    return;
                }
                Ok(Err(e)) => {
                    warn!(
                        check_id = %flip.check_id,
                        channel_id = %channel.id,
                        attempt = record.attempts,
                        error = %e,
                        "Delivery attempt failed."
                    );
                }
                Err(_) => {
                    warn!(
                        check_id = %flip.check_id,
                        channel_id = %channel.id,
                        attempt = record.attempts,
                        timeout_secs = self.config.send_timeout_secs,
                        "Delivery attempt timed out."
                    );
                }
            }

            if record.attempts < self.config.max_attempts {
                self.save(&record).await;
                sleep(self.backoff(record.attempts)).await;
            }
        }

        error!(
            check_id = %flip.check_id,
            channel_id = %channel.id,
            attempts = record.attempts,
            "Notification failed after exhausting retries."
        );
        record.outcome = NotificationOutcome::Failed;
        self.save(&record).await;
    }

    /// Sends a synthetic down message through a channel's real transport.
    /// Used by the channel test endpoint; bypasses the queue, the retry
    /// machinery, and the delivery records.
    pub async fn send_test(&self, channel: &Channel) -> Result<(), SenderError> {
        let message = FlipMessage {
            check_id: Uuid::new_v4(),
            check_name: format!("test notification for {}", channel.name),
            tags: Vec::new(),
            status: CheckStatus::Down,
            reason: FlipReason::Manual,
            at: self.clock.now(),
        };
        let Some(transport) = self.transports.get(channel.config.kind()) else {
            return Err(SenderError::Misconfigured(format!(
                "no transport for channel kind {}",
                channel.config.kind()
            )));
        };
        if transport.is_noop(channel, &message) {
            return Err(SenderError::Misconfigured(
                "channel has no destination configured for the down direction".to_string(),
            ));
        }
        match timeout(
            TokioDuration::from_secs(self.config.send_timeout_secs),
            transport.send(channel, &message),
        )
        .await
        {
            Ok(result) => result,
            Err(_) => Err(SenderError::TimedOut),
        }
    }

    /// Exponential backoff with a small jitter, capped.
    fn backoff(&self, attempt: u32) -> TokioDuration {
        let exp = self
            .config
            .base_delay_secs
            .saturating_mul(2u64.saturating_pow(attempt.saturating_sub(1)));
        let capped = exp.min(self.config.max_delay_secs);
        let jitter_ms = rand::rng().random_range(0..250);
        TokioDuration::from_secs(capped) + TokioDuration::from_millis(jitter_ms)
    }

    async fn is_superseded(&self, flip: &Flip) -> bool {
        match self.store.last_flip(flip.check_id).await {
            Ok(Some(last)) => last.at > flip.at,
            Ok(None) => false,
            Err(e) => {
                warn!(check_id = %flip.check_id, error = %e, "Could not check for newer flips.");
                false
            }
        }
    }

    async fn save(&self, record: &Notification) {
        if let Err(e) = self.store.upsert_notification(record).await {
            error!(
                check_id = %record.check_id,
                channel_id = %record.channel_id,
                error = %e,
                "Failed to persist notification record."
            );
        }
    }
}
