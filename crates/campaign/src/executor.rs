use common::{
    CampaignId, CampaignStatus, CommandContent, Core, CounterEvent, CounterField, MessageId,
    OutboundCommand, StoreError, submit,
};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info, warn};
use uuid::Uuid;

#[derive(Debug, Clone)]
pub struct ExecutorConfig {
    /// Contacts materialized per batch; bounds executor memory and the
    /// latency of pause/cancel taking effect.
    pub batch_size: usize,
    /// How often the executor re-reads campaign and message state.
    pub poll_interval: Duration,
}

impl ExecutorConfig {
    pub fn from_env() -> Self {
        dotenv::dotenv().ok();
        Self {
            batch_size: std::env::var("CAMPAIGN_BATCH_SIZE")
                .unwrap_or_else(|_| "500".to_string())
                .parse()
                .expect("CAMPAIGN_BATCH_SIZE must be a valid number"),
            poll_interval: Duration::from_millis(
                std::env::var("CAMPAIGN_POLL_INTERVAL_MS")
                    .unwrap_or_else(|_| "200".to_string())
                    .parse()
                    .expect("CAMPAIGN_POLL_INTERVAL_MS must be a valid number"),
            ),
        }
    }
}

#[derive(Error, Debug)]
pub enum ExecutorError {
    #[error("campaign not found: {0}")]
    NotFound(CampaignId),

    #[error("phone number {0} is not registered")]
    UnknownPhoneNumber(String),

    #[error("store error: {0}")]
    Store(#[from] StoreError),
}

/// Drives campaigns through `SCHEDULED → SENDING → terminal`.
///
/// Execution proceeds in batches over the campaign's contact list in
/// stable order: materialize commands for the next batch, wait until each
/// reaches a dispatch-terminal state, then continue. Pause and cancel are
/// observed between polls, so they take effect within one batch.
pub struct CampaignExecutor {
    core: Arc<Core>,
    config: ExecutorConfig,
}

impl CampaignExecutor {
    pub fn new(core: Arc<Core>, config: ExecutorConfig) -> Self {
        Self { core, config }
    }

    /// DRAFT → SCHEDULED.
    pub fn schedule(&self, id: &CampaignId) -> Result<(), StoreError> {
        self.core.campaigns.transition(id, CampaignStatus::Scheduled)
    }

    /// SENDING → PAUSED. Stops enqueueing; in-flight commands complete.
    pub fn pause(&self, id: &CampaignId) -> Result<(), StoreError> {
        self.core.campaigns.transition(id, CampaignStatus::Paused)
    }

    /// PAUSED → SENDING.
    pub fn resume(&self, id: &CampaignId) -> Result<(), StoreError> {
        self.core.campaigns.transition(id, CampaignStatus::Sending)
    }

    /// Any active state → CANCELLED. Sets the tombstone the dispatcher
    /// checks before sending.
    pub fn cancel(&self, id: &CampaignId) -> Result<(), StoreError> {
        self.core.campaigns.transition(id, CampaignStatus::Cancelled)
    }

    /// Trigger a scheduled campaign and drive it to a terminal state.
    pub async fn run(&self, id: CampaignId) -> Result<CampaignStatus, ExecutorError> {
        let campaign = self
            .core
            .campaigns
            .get(&id)
            .ok_or(ExecutorError::NotFound(id))?;

        self.core.campaigns.transition(&id, CampaignStatus::Sending)?;
        info!(campaign = %id, contacts = campaign.contact_ids.len(), "campaign sending");

        // Business-initiated sends require an approved template.
        if !self.core.templates.is_approved(
            &campaign.workspace_id,
            &campaign.template_name,
            &campaign.template_language,
        ) {
            warn!(campaign = %id, template = %campaign.template_name, "template not approved");
            self.core.campaigns.transition(&id, CampaignStatus::Failed)?;
            return Ok(CampaignStatus::Failed);
        }

        let phone_number = self
            .core
            .phone_numbers
            .get(&campaign.phone_number_id)
            .ok_or_else(|| ExecutorError::UnknownPhoneNumber(campaign.phone_number_id.clone()))?;

        loop {
            let Some(current) = self.core.campaigns.get(&id) else {
                return Err(ExecutorError::NotFound(id));
            };

            match current.status {
                CampaignStatus::Paused => {
                    tokio::time::sleep(self.config.poll_interval).await;
                    continue;
                }
                CampaignStatus::Cancelled => {
                    info!(campaign = %id, "campaign cancelled");
                    return Ok(CampaignStatus::Cancelled);
                }
                CampaignStatus::Sending => {}
                terminal => return Ok(terminal),
            }

            let cursor = current.cursor;
            if cursor >= current.contact_ids.len() {
                self.core.campaigns.transition(&id, CampaignStatus::Completed)?;
                info!(campaign = %id, "campaign completed");
                return Ok(CampaignStatus::Completed);
            }

            let end = (cursor + self.config.batch_size).min(current.contact_ids.len());
            let batch = &current.contact_ids[cursor..end];
            debug!(campaign = %id, from = cursor, to = end, "materializing batch");

            let mut batch_message_ids = Vec::with_capacity(batch.len());
            for contact_id in batch {
                match self.materialize(&current, &phone_number.access_token, contact_id) {
                    Ok(message_id) => batch_message_ids.push(message_id),
                    Err(err) => {
                        // Count unsendable contacts as failed so the
                        // counters still add up to the contact total.
                        warn!(campaign = %id, contact = %contact_id, %err, "contact skipped");
                        self.core
                            .queues
                            .campaign_counters
                            .enqueue(CounterEvent::new(id, CounterField::Failed));
                    }
                }
            }
            self.core.campaigns.advance_cursor(&id, end)?;

            self.await_batch(&id, &batch_message_ids).await;
        }
    }

    fn materialize(
        &self,
        campaign: &common::Campaign,
        access_token: &str,
        contact_id: &str,
    ) -> Result<MessageId, common::SubmitError> {
        let command = OutboundCommand::new(
            Uuid::new_v4(),
            campaign.workspace_id.clone(),
            campaign.phone_number_id.clone(),
            access_token,
            contact_id,
            CommandContent::Template {
                name: campaign.template_name.clone(),
                language: campaign.template_language.clone(),
                body_parameters: vec![],
            },
        )?
        .with_campaign(campaign.id);

        submit(&self.core, command)
    }

    /// Wait until every message of the batch reached a dispatch-terminal
    /// state. Cancelled campaigns drain fast (the dispatcher tombstones
    /// their commands), so waiting stays correct across cancel.
    async fn await_batch(&self, campaign_id: &CampaignId, message_ids: &[MessageId]) {
        loop {
            let all_terminal = message_ids.iter().all(|message_id| {
                self.core
                    .messages
                    .get(message_id)
                    .map(|m| m.status.is_dispatch_terminal())
                    .unwrap_or(true)
            });
            if all_terminal {
                return;
            }

            debug!(campaign = %campaign_id, "waiting for batch to settle");
            tokio::time::sleep(self.config.poll_interval).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reducer::apply_counter_event;
    use chrono::Utc;
    use common::{Campaign, ErrorKind, LastError, PhoneNumber, TemplateStatus, Workspace};
    use tokio::task::JoinHandle;

    const VIS: Duration = Duration::from_secs(30);
    const WAIT: Duration = Duration::from_millis(50);

    fn test_core() -> Arc<Core> {
        let core = Core::new(Duration::from_secs(60));
        core.workspaces.register(Workspace::new("ws-1", "secret"));
        core.phone_numbers
            .insert(PhoneNumber::new("pn-1", "ws-1", "1029384756", "tok"));
        core.templates
            .set_status("ws-1", "promo", "en_US", TemplateStatus::Approved);
        core
    }

    fn executor(core: &Arc<Core>, batch_size: usize) -> CampaignExecutor {
        CampaignExecutor::new(
            core.clone(),
            ExecutorConfig {
                batch_size,
                poll_interval: Duration::from_millis(5),
            },
        )
    }

    fn campaign(core: &Arc<Core>, contacts: &[&str]) -> CampaignId {
        let campaign = Campaign::new(
            "ws-1",
            "1029384756",
            "promo",
            "en_US",
            contacts.iter().map(|c| c.to_string()).collect(),
        );
        let id = campaign.id;
        core.campaigns.insert(campaign).unwrap();
        id
    }

    /// Stand-in for the dispatcher: drains the outbound queue, honoring
    /// the cancel tombstone, marking rows SENT and emitting counters.
    fn stub_dispatcher(core: Arc<Core>, delay: Duration) -> JoinHandle<()> {
        tokio::spawn(async move {
            loop {
                let Some(delivery) = core.queues.outbound.dequeue(VIS, WAIT).await else {
                    continue;
                };
                tokio::time::sleep(delay).await;
                let command = delivery.payload;
                let campaign_cancelled = command
                    .campaign_id
                    .map(|cid| core.campaigns.is_cancelled(&cid))
                    .unwrap_or(false);

                if campaign_cancelled {
                    let _ = core.messages.fail(
                        &command.message_id,
                        LastError::new(ErrorKind::Cancelled, "campaign cancelled"),
                    );
                    if let Some(cid) = command.campaign_id {
                        core.queues
                            .campaign_counters
                            .enqueue(CounterEvent::new(cid, CounterField::Failed));
                    }
                } else {
                    core.messages
                        .claim_for_sending(
                            &command.message_id,
                            "stub",
                            Utc::now() + chrono::Duration::seconds(60),
                        )
                        .unwrap();
                    core.messages
                        .complete_sent(
                            &command.message_id,
                            &format!("wamid.{}", command.message_id.simple()),
                        )
                        .unwrap();
                    if let Some(cid) = command.campaign_id {
                        core.queues
                            .campaign_counters
                            .enqueue(CounterEvent::new(cid, CounterField::Sent));
                    }
                }
                core.queues.outbound.ack(delivery.receipt);
            }
        })
    }

    async fn drain_counters(core: &Core) {
        while let Some(delivery) = core.queues.campaign_counters.dequeue(VIS, WAIT).await {
            apply_counter_event(core, &delivery.payload);
            core.queues.campaign_counters.ack(delivery.receipt);
        }
    }

    #[tokio::test]
    async fn test_campaign_runs_to_completion() {
        let core = test_core();
        let executor = executor(&core, 2);
        let id = campaign(&core, &["15551230001", "15551230002", "15551230003"]);

        executor.schedule(&id).unwrap();
        let dispatcher = stub_dispatcher(core.clone(), Duration::ZERO);

        let status = executor.run(id).await.unwrap();
        assert_eq!(status, CampaignStatus::Completed);
        dispatcher.abort();

        drain_counters(&core).await;
        let finished = core.campaigns.get(&id).unwrap();
        assert_eq!(finished.counters.total, 3);
        assert_eq!(finished.counters.sent, 3);
        assert_eq!(finished.counters.failed, 0);
        assert_eq!(finished.counters.dispatched(), finished.counters.total);
    }

    #[tokio::test]
    async fn test_unapproved_template_fails_campaign() {
        let core = test_core();
        core.templates
            .set_status("ws-1", "promo", "en_US", TemplateStatus::Rejected);
        let executor = executor(&core, 10);
        let id = campaign(&core, &["15551230001"]);

        executor.schedule(&id).unwrap();
        let status = executor.run(id).await.unwrap();
        assert_eq!(status, CampaignStatus::Failed);
        assert!(core.queues.outbound.is_empty());
    }

    #[tokio::test]
    async fn test_pause_parks_and_resume_continues() {
        let core = test_core();
        let executor = Arc::new(executor(&core, 1));
        let id = campaign(&core, &["15551230001", "15551230002", "15551230003"]);

        executor.schedule(&id).unwrap();
        let dispatcher = stub_dispatcher(core.clone(), Duration::from_millis(20));

        let runner = {
            let executor = executor.clone();
            tokio::spawn(async move { executor.run(id).await })
        };

        // Wait until the first contact was materialized, then pause.
        let mut paused = false;
        for _ in 0..200 {
            if core.campaigns.get(&id).unwrap().cursor >= 1 {
                if executor.pause(&id).is_ok() {
                    paused = true;
                }
                break;
            }
            tokio::time::sleep(Duration::from_millis(2)).await;
        }
        assert!(paused, "campaign should have started before pausing");

        // Parked: the cursor stops advancing past the batch in flight.
        tokio::time::sleep(Duration::from_millis(100)).await;
        let cursor_while_paused = core.campaigns.get(&id).unwrap().cursor;
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(core.campaigns.get(&id).unwrap().cursor, cursor_while_paused);
        assert_eq!(
            core.campaigns.get(&id).unwrap().status,
            CampaignStatus::Paused
        );

        executor.resume(&id).unwrap();
        let status = runner.await.unwrap().unwrap();
        assert_eq!(status, CampaignStatus::Completed);
        dispatcher.abort();
    }

    #[tokio::test]
    async fn test_cancel_stops_enqueueing_and_tombstones() {
        let core = test_core();
        let executor = Arc::new(executor(&core, 1));
        let contacts: Vec<String> = (0..10).map(|i| format!("1555123{:04}", i)).collect();
        let contact_refs: Vec<&str> = contacts.iter().map(String::as_str).collect();
        let id = campaign(&core, &contact_refs);

        executor.schedule(&id).unwrap();
        let dispatcher = stub_dispatcher(core.clone(), Duration::from_millis(10));

        let runner = {
            let executor = executor.clone();
            tokio::spawn(async move { executor.run(id).await })
        };

        // Cancel once the campaign is moving.
        for _ in 0..200 {
            if core.campaigns.get(&id).unwrap().cursor >= 1 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(2)).await;
        }
        executor.cancel(&id).unwrap();

        let status = runner.await.unwrap().unwrap();
        assert_eq!(status, CampaignStatus::Cancelled);
        dispatcher.abort();

        // Far fewer than all contacts were materialized.
        let cancelled = core.campaigns.get(&id).unwrap();
        assert!(cancelled.cursor < contacts.len());
    }

    /// sent + failed never exceeds total, and reaches it on completion
    /// even when some contacts are unsendable.
    #[tokio::test]
    async fn test_counter_conservation_with_bad_contacts() {
        let core = test_core();
        let executor = executor(&core, 2);
        let id = campaign(
            &core,
            &["15551230001", "not-a-number", "15551230003"],
        );

        executor.schedule(&id).unwrap();
        let dispatcher = stub_dispatcher(core.clone(), Duration::ZERO);

        let status = executor.run(id).await.unwrap();
        assert_eq!(status, CampaignStatus::Completed);
        dispatcher.abort();

        drain_counters(&core).await;
        let finished = core.campaigns.get(&id).unwrap();
        assert_eq!(finished.counters.total, 3);
        assert_eq!(finished.counters.sent, 2);
        assert_eq!(finished.counters.failed, 1);
        assert_eq!(finished.counters.dispatched(), finished.counters.total);
    }
}
