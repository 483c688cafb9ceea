use crate::client::{Outcome, Upstream, UpstreamRequest};
use crate::config::DispatcherConfig;
use crate::limiter::{Acquisition, SendRateLimiter};
use crate::renderer;
use chrono::Utc;
use common::{
    ClaimOutcome, Core, CounterEvent, CounterField, Delivery, ErrorKind, LastError,
    OutboundCommand,
};
use futures::future::join_all;
use rand::Rng;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Pool of symmetric, stateless workers draining the outbound queue.
///
/// Each worker repeats the same loop: dequeue a command, claim its message
/// row, clear the rate limiter, render, send, and apply the classified
/// outcome. Crash recovery relies on the queue's visibility timeout plus
/// the row claim: a redelivered command whose row already advanced is
/// dropped without a second upstream call.
pub struct Dispatcher<U: Upstream> {
    core: Arc<Core>,
    upstream: Arc<U>,
    limiter: Arc<SendRateLimiter>,
    config: DispatcherConfig,
}

/// Running pool handle; used for graceful shutdown.
pub struct DispatcherHandle {
    shutdown_tx: watch::Sender<bool>,
    workers: Vec<JoinHandle<()>>,
    drain_timeout: Duration,
}

impl DispatcherHandle {
    /// Stop dequeuing and wait up to the drain timeout for in-flight
    /// commands to finish. Commands still running after that stay SENDING
    /// with an expired deadline and are reclaimed by the next claim.
    pub async fn shutdown(self) {
        info!("dispatcher shutting down, draining workers");
        let _ = self.shutdown_tx.send(true);

        let drain = join_all(self.workers);
        if tokio::time::timeout(self.drain_timeout, drain).await.is_err() {
            warn!("drain timeout elapsed with workers still in flight");
        }
    }
}

impl<U: Upstream + 'static> Dispatcher<U> {
    pub fn new(
        core: Arc<Core>,
        upstream: Arc<U>,
        limiter: Arc<SendRateLimiter>,
        config: DispatcherConfig,
    ) -> Self {
        Self {
            core,
            upstream,
            limiter,
            config,
        }
    }

    /// Start the worker pool.
    pub fn spawn(self) -> DispatcherHandle {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let drain_timeout = self.config.drain_timeout();
        let worker_count = self.config.worker_count.max(1);
        let dispatcher = Arc::new(self);

        info!(workers = worker_count, "starting dispatcher pool");

        let workers = (0..worker_count)
            .map(|index| {
                let dispatcher = dispatcher.clone();
                let shutdown_rx = shutdown_rx.clone();
                tokio::spawn(async move {
                    dispatcher
                        .worker_loop(format!("worker-{index}"), shutdown_rx)
                        .await;
                })
            })
            .collect();

        DispatcherHandle {
            shutdown_tx,
            workers,
            drain_timeout,
        }
    }

    async fn worker_loop(&self, worker_id: String, mut shutdown_rx: watch::Receiver<bool>) {
        debug!(worker = %worker_id, "worker loop starting");
        loop {
            if *shutdown_rx.borrow() {
                break;
            }

            tokio::select! {
                changed = shutdown_rx.changed() => {
                    if changed.is_err() || *shutdown_rx.borrow() {
                        break;
                    }
                }
                delivery = self.core.queues.outbound.dequeue(
                    self.config.visibility_timeout(),
                    self.config.dequeue_wait(),
                ) => {
                    if let Some(delivery) = delivery {
                        self.handle_delivery(&worker_id, delivery).await;
                    }
                }
            }
        }
        debug!(worker = %worker_id, "worker loop stopped");
    }

    /// One full pass over a dequeued command.
    pub(crate) async fn handle_delivery(
        &self,
        worker_id: &str,
        delivery: Delivery<OutboundCommand>,
    ) {
        let command = delivery.payload.clone();
        let message_id = command.message_id;

        // Cancelled campaigns drop their commands before any upstream work.
        if let Some(campaign_id) = command.campaign_id {
            if self.core.campaigns.is_cancelled(&campaign_id) {
                debug!(message = %message_id, campaign = %campaign_id, "dropping command of cancelled campaign");
                let _ = self.core.messages.fail(
                    &message_id,
                    LastError::new(ErrorKind::Cancelled, "campaign cancelled"),
                );
                self.emit_counter(&command, CounterField::Failed);
                self.core.queues.outbound.ack(delivery.receipt);
                return;
            }
        }

        let visibility = self.config.visibility_timeout();
        let deadline = Utc::now()
            + chrono::Duration::from_std(visibility).unwrap_or(chrono::Duration::seconds(60));

        let attempt = match self
            .core
            .messages
            .claim_for_sending(&message_id, worker_id, deadline)
        {
            Ok(ClaimOutcome::Claimed { attempt }) => attempt,
            Ok(ClaimOutcome::AlreadyHandled { status }) => {
                // Duplicate delivery or a crashed worker's finished row.
                debug!(message = %message_id, %status, "dropping duplicate delivery");
                self.core.queues.outbound.ack(delivery.receipt);
                return;
            }
            Err(err) => {
                warn!(message = %message_id, %err, "command without a message row, dropping");
                self.core.queues.outbound.ack(delivery.receipt);
                return;
            }
        };

        // Quality downgrades ingested by the webhook pipeline land on the
        // number's row; re-derive the bucket rate before spending from it.
        self.limiter
            .sync_number_rate(&self.core.phone_numbers, &command.phone_number_id);

        // Clear the rate limiter within the visibility budget; hand the
        // command back for delayed redelivery when the wait is too long.
        let claim_started = tokio::time::Instant::now();
        loop {
            match self.limiter.acquire(
                &command.phone_number_id,
                &command.workspace_id,
                command.priority,
            ) {
                Acquisition::Ready => break,
                Acquisition::Wait(hint) => {
                    let remaining = visibility.saturating_sub(claim_started.elapsed());
                    if hint >= remaining {
                        debug!(message = %message_id, ?hint, "releasing claim, limiter wait exceeds visibility");
                        let _ = self.core.messages.release_claim(&message_id);
                        self.core.queues.outbound.nack(delivery.receipt, hint);
                        return;
                    }
                    tokio::time::sleep(hint).await;
                }
            }
        }

        let rendered = match renderer::render(&command) {
            Ok(rendered) => rendered,
            Err(err) => {
                warn!(message = %message_id, %err, "command failed rendering");
                let _ = self.core.messages.fail(
                    &message_id,
                    LastError::new(ErrorKind::InvalidCommand, err.to_string()),
                );
                self.emit_counter(&command, CounterField::Failed);
                self.core.queues.outbound.ack(delivery.receipt);
                return;
            }
        };

        let outcome = self
            .upstream
            .send(UpstreamRequest {
                rendered,
                idempotency_key: message_id.to_string(),
                access_token: command.access_token.clone(),
            })
            .await;

        self.apply_outcome(&command, delivery, attempt, outcome);
    }

    fn apply_outcome(
        &self,
        command: &OutboundCommand,
        delivery: Delivery<OutboundCommand>,
        attempt: u32,
        outcome: Outcome,
    ) {
        let message_id = command.message_id;
        match outcome {
            Outcome::Accepted {
                upstream_message_id,
            } => {
                match self
                    .core
                    .messages
                    .complete_sent(&message_id, &upstream_message_id)
                {
                    Ok(()) => {
                        info!(message = %message_id, upstream = %upstream_message_id, "message sent");
                        self.emit_counter(command, CounterField::Sent);
                    }
                    Err(err) => {
                        // The row advanced elsewhere; the upstream call was
                        // still idempotent, so just log it.
                        error!(message = %message_id, %err, "accepted send found row in unexpected state");
                    }
                }
                self.core.queues.outbound.ack(delivery.receipt);
            }

            Outcome::PermanentFailure { code, reason, auth } => {
                let kind = if auth {
                    ErrorKind::AuthExpired
                } else {
                    ErrorKind::PermanentUpstream
                };
                if auth {
                    warn!(number = %command.phone_number_id, "upstream rejected credentials, flagging token refresh");
                    self.core
                        .phone_numbers
                        .flag_token_refresh(&command.phone_number_id);
                }
                warn!(message = %message_id, %kind, %reason, "message failed permanently");
                let mut last_error = LastError::new(kind, reason);
                last_error.upstream_code = code;
                let _ = self.core.messages.fail(&message_id, last_error);
                self.emit_counter(command, CounterField::Failed);
                self.core.queues.outbound.ack(delivery.receipt);
            }

            Outcome::TransientFailure {
                retry_after,
                reason,
            } => {
                if attempt < self.config.retry_max_attempts {
                    let delay = retry_after.unwrap_or_else(|| backoff_delay(&self.config, attempt));
                    debug!(message = %message_id, attempt, ?delay, %reason, "transient failure, requeueing");
                    let _ = self.core.messages.requeue_after_failure(&message_id);
                    self.core.queues.outbound.ack(delivery.receipt);
                    self.core
                        .queues
                        .outbound
                        .enqueue_delayed(command.clone(), delay);
                } else {
                    warn!(message = %message_id, attempt, %reason, "retry budget exhausted");
                    let _ = self.core.messages.fail(
                        &message_id,
                        LastError::new(
                            ErrorKind::TransientUpstream,
                            format!("retries exhausted after {} attempts: {}", attempt, reason),
                        ),
                    );
                    self.emit_counter(command, CounterField::Failed);
                    self.core.queues.outbound.ack(delivery.receipt);
                }
            }

            Outcome::RateLimited { retry_after } => {
                debug!(message = %message_id, ?retry_after, "upstream rate limited, penalizing bucket");
                self.limiter
                    .penalize(&command.phone_number_id, retry_after);
                let _ = self.core.messages.requeue_after_failure(&message_id);
                self.core.queues.outbound.ack(delivery.receipt);
                self.core
                    .queues
                    .outbound
                    .enqueue_delayed(command.clone(), retry_after);
            }
        }
    }

    fn emit_counter(&self, command: &OutboundCommand, field: CounterField) {
        if let Some(campaign_id) = command.campaign_id {
            self.core
                .queues
                .campaign_counters
                .enqueue(CounterEvent::new(campaign_id, field));
        }
    }
}

/// Exponential backoff with jitter for transient retries.
///
/// `attempt` is the attempt that just failed (1-based): the first retry
/// waits the base delay, doubling per attempt up to the cap, with the
/// configured jitter fraction applied either way.
pub fn backoff_delay(config: &DispatcherConfig, attempt: u32) -> Duration {
    let exponent = attempt.saturating_sub(1).min(16);
    let raw = config
        .retry_backoff_base_ms
        .saturating_mul((config.retry_backoff_factor as u64).saturating_pow(exponent));
    let capped = raw.min(config.retry_backoff_cap_ms) as f64;

    let jitter = config.retry_jitter.clamp(0.0, 1.0);
    let factor = if jitter > 0.0 {
        1.0 + rand::rng().random_range(-jitter..=jitter)
    } else {
        1.0
    };

    Duration::from_millis((capped * factor).max(0.0) as u64)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::MockUpstream;
    use crate::config::tests::test_config;
    use common::{
        Campaign, CampaignStatus, CommandContent, CounterField, MessageStatus, submit,
    };
    use uuid::Uuid;

    const VIS: Duration = Duration::from_secs(60);
    const WAIT: Duration = Duration::from_millis(200);

    fn accepted(id: &str) -> Outcome {
        Outcome::Accepted {
            upstream_message_id: id.to_string(),
        }
    }

    fn fast_config() -> DispatcherConfig {
        let mut config = test_config();
        config.retry_backoff_base_ms = 10;
        config.retry_backoff_cap_ms = 50;
        config.retry_jitter = 0.0;
        config
    }

    fn dispatcher(core: &Arc<Core>, upstream: MockUpstream) -> Dispatcher<MockUpstream> {
        let config = fast_config();
        let limiter = Arc::new(SendRateLimiter::new(
            config.limiter_per_number_rate,
            config.limiter_workspace_rate,
            config.limiter_global_rate,
        ));
        Dispatcher::new(core.clone(), Arc::new(upstream), limiter, config)
    }

    fn text_command(campaign_id: Option<Uuid>) -> OutboundCommand {
        let mut command = OutboundCommand::new(
            Uuid::new_v4(),
            "ws-1",
            "1029384756",
            "tok",
            "15551234567",
            CommandContent::Text {
                body: "Hi".to_string(),
                preview_url: None,
            },
        )
        .unwrap();
        if let Some(campaign_id) = campaign_id {
            command = command.with_campaign(campaign_id);
        }
        command
    }

    /// Happy path: queued text command ends SENT with the upstream id.
    #[tokio::test]
    async fn test_happy_text_send() {
        let core = Core::new(Duration::from_secs(60));
        let mut upstream = MockUpstream::new();
        upstream
            .expect_send()
            .times(1)
            .withf(|req| {
                req.rendered.path == "1029384756/messages"
                    && req.rendered.body["text"]["body"] == "Hi"
            })
            .returning(|_| accepted("wamid.FOO"));

        let dispatcher = dispatcher(&core, upstream);
        let id = submit(&core, text_command(None)).unwrap();

        let delivery = core.queues.outbound.dequeue(VIS, WAIT).await.unwrap();
        dispatcher.handle_delivery("worker-0", delivery).await;

        let row = core.messages.get(&id).unwrap();
        assert_eq!(row.status, MessageStatus::Sent);
        assert_eq!(row.upstream_message_id.as_deref(), Some("wamid.FOO"));
        assert_eq!(row.attempt_count, 1);
        assert!(row.sent_at.is_some());
        assert!(core.queues.outbound.is_empty());
    }

    /// The idempotency key on the wire is the message id.
    #[tokio::test]
    async fn test_send_carries_message_id_as_idempotency_key() {
        let core = Core::new(Duration::from_secs(60));
        let command = text_command(None);
        let expected_key = command.message_id.to_string();

        let mut upstream = MockUpstream::new();
        upstream
            .expect_send()
            .times(1)
            .withf(move |req| req.idempotency_key == expected_key)
            .returning(|_| accepted("wamid.KEY"));

        let dispatcher = dispatcher(&core, upstream);
        submit(&core, command).unwrap();

        let delivery = core.queues.outbound.dequeue(VIS, WAIT).await.unwrap();
        dispatcher.handle_delivery("worker-0", delivery).await;
    }

    /// 503 then 200: final state SENT, two attempts, one acceptance.
    #[tokio::test]
    async fn test_transient_then_success() {
        let core = Core::new(Duration::from_secs(60));
        let mut upstream = MockUpstream::new();
        upstream
            .expect_send()
            .times(1)
            .returning(|_| Outcome::TransientFailure {
                retry_after: None,
                reason: "upstream server error (HTTP 503)".to_string(),
            });
        upstream
            .expect_send()
            .times(1)
            .returning(|_| accepted("wamid.RETRY"));

        let dispatcher = dispatcher(&core, upstream);
        let id = submit(&core, text_command(None)).unwrap();

        let delivery = core.queues.outbound.dequeue(VIS, WAIT).await.unwrap();
        dispatcher.handle_delivery("worker-0", delivery).await;
        assert_eq!(core.messages.get(&id).unwrap().status, MessageStatus::Queued);

        // The retry is enqueued with the (test-sized) backoff delay.
        let delivery = core.queues.outbound.dequeue(VIS, WAIT).await.unwrap();
        assert_eq!(delivery.delivery_count, 1);
        dispatcher.handle_delivery("worker-0", delivery).await;

        let row = core.messages.get(&id).unwrap();
        assert_eq!(row.status, MessageStatus::Sent);
        assert_eq!(row.attempt_count, 2);
    }

    /// A 400 fails terminally with no retry.
    #[tokio::test]
    async fn test_permanent_failure_no_retry() {
        let core = Core::new(Duration::from_secs(60));
        let mut upstream = MockUpstream::new();
        upstream
            .expect_send()
            .times(1)
            .returning(|_| Outcome::PermanentFailure {
                code: Some(131030),
                reason: "Recipient phone number not in allowed list".to_string(),
                auth: false,
            });

        let dispatcher = dispatcher(&core, upstream);
        let id = submit(&core, text_command(None)).unwrap();

        let delivery = core.queues.outbound.dequeue(VIS, WAIT).await.unwrap();
        dispatcher.handle_delivery("worker-0", delivery).await;

        let row = core.messages.get(&id).unwrap();
        assert_eq!(row.status, MessageStatus::Failed);
        let last_error = row.last_error.unwrap();
        assert_eq!(last_error.kind, ErrorKind::PermanentUpstream);
        assert_eq!(last_error.upstream_code, Some(131030));
        assert!(core.queues.outbound.is_empty());
    }

    /// Redelivery of a command whose row is already SENT makes no second
    /// upstream call (crash after send, before ack).
    #[tokio::test]
    async fn test_redelivered_sent_command_is_dropped() {
        let core = Core::new(Duration::from_secs(60));
        let command = text_command(None);
        let id = submit(&core, command).unwrap();

        // Worker A's history: claimed, sent, crashed before ack.
        core.messages
            .claim_for_sending(&id, "worker-a", Utc::now() - chrono::Duration::seconds(1))
            .unwrap();
        core.messages.complete_sent(&id, "wamid.DONE").unwrap();

        // Worker B gets the redelivery; the upstream must stay silent.
        let upstream = MockUpstream::new();
        let dispatcher = dispatcher(&core, upstream);

        let delivery = core.queues.outbound.dequeue(VIS, WAIT).await.unwrap();
        dispatcher.handle_delivery("worker-b", delivery).await;

        let row = core.messages.get(&id).unwrap();
        assert_eq!(row.status, MessageStatus::Sent);
        assert_eq!(row.upstream_message_id.as_deref(), Some("wamid.DONE"));
        assert!(core.queues.outbound.is_empty());
    }

    /// Retry budget exhaustion fails the message with the transient kind.
    #[tokio::test]
    async fn test_retries_exhausted() {
        let core = Core::new(Duration::from_secs(60));
        let mut upstream = MockUpstream::new();
        upstream.expect_send().returning(|_| Outcome::TransientFailure {
            retry_after: None,
            reason: "HTTP 502".to_string(),
        });

        let dispatcher = dispatcher(&core, upstream);
        let id = submit(&core, text_command(None)).unwrap();

        for _ in 0..dispatcher.config.retry_max_attempts {
            let delivery = core.queues.outbound.dequeue(VIS, WAIT).await.unwrap();
            dispatcher.handle_delivery("worker-0", delivery).await;
        }

        let row = core.messages.get(&id).unwrap();
        assert_eq!(row.status, MessageStatus::Failed);
        assert_eq!(row.attempt_count, dispatcher.config.retry_max_attempts);
        assert_eq!(
            row.last_error.unwrap().kind,
            ErrorKind::TransientUpstream
        );
        assert!(core.queues.outbound.is_empty());
    }

    /// Upstream 429 penalizes the number's bucket and requeues with the
    /// advertised delay.
    #[tokio::test]
    async fn test_rate_limited_penalizes_and_requeues() {
        let core = Core::new(Duration::from_secs(60));
        let mut upstream = MockUpstream::new();
        upstream
            .expect_send()
            .times(1)
            .returning(|_| Outcome::RateLimited {
                retry_after: Duration::from_millis(50),
            });

        let dispatcher = dispatcher(&core, upstream);
        let id = submit(&core, text_command(None)).unwrap();

        let delivery = core.queues.outbound.dequeue(VIS, WAIT).await.unwrap();
        dispatcher.handle_delivery("worker-0", delivery).await;

        assert_eq!(core.messages.get(&id).unwrap().status, MessageStatus::Queued);
        // The command is back on the queue for later redelivery.
        assert_eq!(core.queues.outbound.len(), 1);
    }

    /// A RED-quality, reduced-cap number throttles its own bucket: the
    /// dispatcher re-derives the rate from the row before each send.
    #[tokio::test]
    async fn test_quality_downgrade_throttles_number() {
        let core = Core::new(Duration::from_secs(60));
        let mut number = common::PhoneNumber::new("pn-1", "ws-1", "1029384756", "tok");
        number.quality_rating = common::QualityRating::Red;
        number.daily_message_cap = 50; // derives to one message per second
        core.phone_numbers.insert(number);

        let mut upstream = MockUpstream::new();
        upstream
            .expect_send()
            .times(1)
            .returning(|_| accepted("wamid.SLOW"));

        let dispatcher = dispatcher(&core, upstream);
        let id = submit(&core, text_command(None)).unwrap();

        let delivery = core.queues.outbound.dequeue(VIS, WAIT).await.unwrap();
        dispatcher.handle_delivery("worker-0", delivery).await;
        assert_eq!(core.messages.get(&id).unwrap().status, MessageStatus::Sent);

        // The send spent the only token the downgraded bucket grants.
        assert!(
            !dispatcher
                .limiter
                .acquire("1029384756", "ws-1", common::Priority::Normal)
                .is_ready()
        );
        // Other numbers still run at the configured rate.
        assert!(
            dispatcher
                .limiter
                .acquire("5550001111", "ws-1", common::Priority::Normal)
                .is_ready()
        );
    }

    /// Auth rejection fails the message and raises the refresh flag.
    #[tokio::test]
    async fn test_auth_failure_flags_refresh() {
        let core = Core::new(Duration::from_secs(60));
        core.phone_numbers.insert(common::PhoneNumber::new(
            "pn-1",
            "ws-1",
            "1029384756",
            "tok",
        ));

        let mut upstream = MockUpstream::new();
        upstream
            .expect_send()
            .times(1)
            .returning(|_| Outcome::PermanentFailure {
                code: Some(190),
                reason: "token expired".to_string(),
                auth: true,
            });

        let dispatcher = dispatcher(&core, upstream);
        let id = submit(&core, text_command(None)).unwrap();

        let delivery = core.queues.outbound.dequeue(VIS, WAIT).await.unwrap();
        dispatcher.handle_delivery("worker-0", delivery).await;

        let row = core.messages.get(&id).unwrap();
        assert_eq!(row.status, MessageStatus::Failed);
        assert_eq!(row.last_error.unwrap().kind, ErrorKind::AuthExpired);
        assert!(
            core.phone_numbers
                .get("1029384756")
                .unwrap()
                .token_refresh_required
        );
    }

    /// Commands of a cancelled campaign fail before any upstream call and
    /// emit a failed-counter event.
    #[tokio::test]
    async fn test_cancelled_campaign_tombstone() {
        let core = Core::new(Duration::from_secs(60));
        let campaign = Campaign::new("ws-1", "pn-1", "promo", "en_US", vec!["a".to_string()]);
        let campaign_id = campaign.id;
        core.campaigns.insert(campaign).unwrap();
        core.campaigns
            .transition(&campaign_id, CampaignStatus::Scheduled)
            .unwrap();
        core.campaigns
            .transition(&campaign_id, CampaignStatus::Sending)
            .unwrap();
        core.campaigns
            .transition(&campaign_id, CampaignStatus::Cancelled)
            .unwrap();

        let upstream = MockUpstream::new(); // no calls expected
        let dispatcher = dispatcher(&core, upstream);
        let id = submit(&core, text_command(Some(campaign_id))).unwrap();

        let delivery = core.queues.outbound.dequeue(VIS, WAIT).await.unwrap();
        dispatcher.handle_delivery("worker-0", delivery).await;

        let row = core.messages.get(&id).unwrap();
        assert_eq!(row.status, MessageStatus::Failed);
        assert_eq!(row.last_error.unwrap().kind, ErrorKind::Cancelled);

        let counter = core
            .queues
            .campaign_counters
            .dequeue(VIS, WAIT)
            .await
            .unwrap();
        assert_eq!(counter.payload.field, CounterField::Failed);
        assert_eq!(counter.payload.campaign_id, campaign_id);
    }

    /// The whole pool: spawn workers, submit, observe SENT, drain.
    #[tokio::test]
    async fn test_pool_end_to_end() {
        let core = Core::new(Duration::from_secs(60));
        let mut upstream = MockUpstream::new();
        upstream
            .expect_send()
            .times(1)
            .returning(|_| accepted("wamid.POOL"));

        let mut config = fast_config();
        config.worker_count = 2;
        config.dequeue_wait_secs = 1;
        let limiter = Arc::new(SendRateLimiter::new(80, 200, 500));
        let handle =
            Dispatcher::new(core.clone(), Arc::new(upstream), limiter, config).spawn();

        let id = submit(&core, text_command(None)).unwrap();

        let mut sent = false;
        for _ in 0..100 {
            if core.messages.get(&id).unwrap().status == MessageStatus::Sent {
                sent = true;
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert!(sent, "pool should have dispatched the command");

        handle.shutdown().await;
    }

    #[test]
    fn test_backoff_doubles_and_caps() {
        let mut config = test_config();
        config.retry_jitter = 0.0;

        assert_eq!(backoff_delay(&config, 1), Duration::from_millis(1000));
        assert_eq!(backoff_delay(&config, 2), Duration::from_millis(2000));
        assert_eq!(backoff_delay(&config, 3), Duration::from_millis(4000));
        // Far past the cap.
        assert_eq!(backoff_delay(&config, 30), Duration::from_millis(300_000));
    }

    #[test]
    fn test_backoff_jitter_stays_in_band() {
        let config = test_config(); // 25% jitter
        for attempt in 1..=5 {
            let base = 1000u64 * 2u64.pow(attempt - 1);
            let delay = backoff_delay(&config, attempt).as_millis() as u64;
            assert!(delay >= base * 3 / 4, "delay {} below band for {}", delay, base);
            assert!(delay <= base * 5 / 4 + 1, "delay {} above band for {}", delay, base);
        }
    }
}
