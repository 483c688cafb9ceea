use crate::campaign::{Campaign, CampaignCounters, CampaignId, CampaignStatus};
use crate::errors::{LastError, StoreError};
use crate::message::{Message, MessageId, MessageStatus};
use crate::tenancy::{Contact, PhoneNumber, QualityRating, TemplateStatus, Workspace};
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::RwLock;
use std::time::{Duration, Instant};

/// Outcome of a worker claiming a queued message for sending.
#[derive(Debug, Clone, PartialEq)]
pub enum ClaimOutcome {
    /// The row moved to SENDING; the attempt count after the claim.
    Claimed { attempt: u32 },
    /// The row is already being handled or finished; drop the command.
    AlreadyHandled { status: MessageStatus },
}

/// Outcome of applying a delivery receipt to a message row.
#[derive(Debug, Clone, PartialEq)]
pub enum AdvanceOutcome {
    /// The row advanced; carries the campaign id for counter emission and
    /// whether the receipt skipped over a SENT the row never recorded.
    Advanced {
        campaign_id: Option<CampaignId>,
        implied_send: bool,
    },
    /// The receipt's rank is not above the current one; no-op.
    Stale,
    /// The row is FAILED; nothing advances out of it.
    Terminal,
    /// The receipt arrived before the row reached SENT (out-of-order).
    Early,
    NotFound,
}

/// Message rows plus the secondary index by upstream message id.
///
/// All mutations go through compare-and-swap style methods; concurrent
/// workers and webhook handlers serialize on these, which is what makes
/// duplicate queue deliveries safe.
#[derive(Default)]
pub struct MessageStore {
    rows: RwLock<HashMap<MessageId, Message>>,
    by_upstream_id: RwLock<HashMap<String, MessageId>>,
}

impl MessageStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, message: Message) -> Result<(), StoreError> {
        let mut rows = self.rows.write().expect("message store poisoned");
        if rows.contains_key(&message.id) {
            return Err(StoreError::Duplicate(message.id.to_string()));
        }
        if let Some(upstream_id) = &message.upstream_message_id {
            self.by_upstream_id
                .write()
                .expect("message index poisoned")
                .insert(upstream_id.clone(), message.id);
        }
        rows.insert(message.id, message);
        Ok(())
    }

    pub fn get(&self, id: &MessageId) -> Option<Message> {
        self.rows
            .read()
            .expect("message store poisoned")
            .get(id)
            .cloned()
    }

    pub fn get_by_upstream_id(&self, upstream_id: &str) -> Option<Message> {
        let id = *self
            .by_upstream_id
            .read()
            .expect("message index poisoned")
            .get(upstream_id)?;
        self.get(&id)
    }

    /// PENDING → QUEUED, stamping the queue time.
    pub fn mark_queued(&self, id: &MessageId) -> Result<(), StoreError> {
        self.mutate(id, |row| {
            if row.status != MessageStatus::Pending {
                return Err(StoreError::Conflict {
                    expected: MessageStatus::Pending.to_string(),
                    actual: row.status.to_string(),
                });
            }
            row.status = MessageStatus::Queued;
            row.stamp(MessageStatus::Queued, Utc::now());
            Ok(())
        })?
    }

    /// Claim a queued row for sending.
    ///
    /// Succeeds from QUEUED, and from SENDING whose deadline has expired
    /// (a crashed worker's leftovers). Everything else means another worker
    /// owns or already finished the row, so the caller drops its delivery.
    pub fn claim_for_sending(
        &self,
        id: &MessageId,
        worker_id: &str,
        deadline: DateTime<Utc>,
    ) -> Result<ClaimOutcome, StoreError> {
        self.mutate(id, |row| {
            let claimable = match row.status {
                MessageStatus::Queued => true,
                MessageStatus::Sending => row
                    .sending_deadline
                    .map(|d| d <= Utc::now())
                    .unwrap_or(true),
                _ => false,
            };

            if !claimable {
                return Ok(ClaimOutcome::AlreadyHandled { status: row.status });
            }

            row.status = MessageStatus::Sending;
            row.attempt_count += 1;
            row.worker_id = Some(worker_id.to_string());
            row.sending_deadline = Some(deadline);
            Ok(ClaimOutcome::Claimed {
                attempt: row.attempt_count,
            })
        })?
    }

    /// SENDING → QUEUED, releasing a claim without an upstream attempt
    /// (rate-limiter wait exceeded the visibility window). The attempt
    /// count is rolled back since no send happened.
    pub fn release_claim(&self, id: &MessageId) -> Result<(), StoreError> {
        self.mutate(id, |row| {
            if row.status != MessageStatus::Sending {
                return Err(StoreError::Conflict {
                    expected: MessageStatus::Sending.to_string(),
                    actual: row.status.to_string(),
                });
            }
            row.status = MessageStatus::Queued;
            row.attempt_count = row.attempt_count.saturating_sub(1);
            row.worker_id = None;
            row.sending_deadline = None;
            Ok(())
        })?
    }

    /// SENDING → QUEUED after a retryable failure, keeping the attempt.
    pub fn requeue_after_failure(&self, id: &MessageId) -> Result<(), StoreError> {
        self.mutate(id, |row| {
            if row.status != MessageStatus::Sending {
                return Err(StoreError::Conflict {
                    expected: MessageStatus::Sending.to_string(),
                    actual: row.status.to_string(),
                });
            }
            row.status = MessageStatus::Queued;
            row.worker_id = None;
            row.sending_deadline = None;
            Ok(())
        })?
    }

    /// SENDING → SENT, recording the upstream id and indexing it.
    pub fn complete_sent(&self, id: &MessageId, upstream_id: &str) -> Result<(), StoreError> {
        let result = self.mutate(id, |row| {
            if row.status != MessageStatus::Sending {
                return Err(StoreError::Conflict {
                    expected: MessageStatus::Sending.to_string(),
                    actual: row.status.to_string(),
                });
            }
            row.status = MessageStatus::Sent;
            row.upstream_message_id = Some(upstream_id.to_string());
            row.worker_id = None;
            row.sending_deadline = None;
            row.stamp(MessageStatus::Sent, Utc::now());
            Ok(())
        })?;

        if result.is_ok() {
            self.by_upstream_id
                .write()
                .expect("message index poisoned")
                .insert(upstream_id.to_string(), *id);
        }
        result
    }

    /// Any non-FAILED state → FAILED with the classified error.
    /// A row already FAILED stays untouched.
    pub fn fail(&self, id: &MessageId, error: LastError) -> Result<(), StoreError> {
        self.mutate(id, |row| {
            if row.status == MessageStatus::Failed {
                return Ok(());
            }
            row.status = MessageStatus::Failed;
            row.last_error = Some(error);
            row.worker_id = None;
            row.sending_deadline = None;
            row.stamp(MessageStatus::Failed, Utc::now());
            Ok(())
        })?
    }

    /// Apply a delivery receipt by rank: only transitions that increase
    /// rank (or reach FAILED) take effect.
    ///
    /// `imply_earlier` accepts receipts that arrive before the row reached
    /// SENT, advancing it directly; without it such receipts report
    /// [`AdvanceOutcome::Early`] so the caller can buffer and retry.
    pub fn advance_by_receipt(
        &self,
        upstream_id: &str,
        target: MessageStatus,
        at: DateTime<Utc>,
        error: Option<LastError>,
        imply_earlier: bool,
    ) -> AdvanceOutcome {
        let Some(id) = self
            .by_upstream_id
            .read()
            .expect("message index poisoned")
            .get(upstream_id)
            .copied()
        else {
            return AdvanceOutcome::NotFound;
        };

        let mut rows = self.rows.write().expect("message store poisoned");
        let Some(row) = rows.get_mut(&id) else {
            return AdvanceOutcome::NotFound;
        };

        if row.status == MessageStatus::Failed {
            return AdvanceOutcome::Terminal;
        }

        if target == MessageStatus::Failed {
            row.status = MessageStatus::Failed;
            row.last_error = error;
            row.stamp(MessageStatus::Failed, at);
            return AdvanceOutcome::Advanced {
                campaign_id: row.campaign_id,
                implied_send: false,
            };
        }

        let (Some(current_rank), Some(target_rank)) = (row.status.rank(), target.rank()) else {
            return AdvanceOutcome::Stale;
        };

        if target_rank <= current_rank {
            return AdvanceOutcome::Stale;
        }

        // Receipts can only land on rows that completed the upstream send;
        // anything earlier means the receipt overtook our own SENT write.
        let sent_rank = MessageStatus::Sent.rank().unwrap_or(u8::MAX);
        let implied_send = current_rank < sent_rank && target_rank >= sent_rank;
        if current_rank < sent_rank && !imply_earlier {
            return AdvanceOutcome::Early;
        }

        row.status = target;
        row.stamp(target, at);
        AdvanceOutcome::Advanced {
            campaign_id: row.campaign_id,
            implied_send,
        }
    }

    fn mutate<R>(
        &self,
        id: &MessageId,
        f: impl FnOnce(&mut Message) -> R,
    ) -> Result<R, StoreError> {
        let mut rows = self.rows.write().expect("message store poisoned");
        let row = rows
            .get_mut(id)
            .ok_or_else(|| StoreError::NotFound(id.to_string()))?;
        Ok(f(row))
    }
}

/// Campaign rows with state-machine-checked transitions.
#[derive(Default)]
pub struct CampaignStore {
    rows: RwLock<HashMap<CampaignId, Campaign>>,
}

impl CampaignStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, campaign: Campaign) -> Result<(), StoreError> {
        let mut rows = self.rows.write().expect("campaign store poisoned");
        if rows.contains_key(&campaign.id) {
            return Err(StoreError::Duplicate(campaign.id.to_string()));
        }
        rows.insert(campaign.id, campaign);
        Ok(())
    }

    pub fn get(&self, id: &CampaignId) -> Option<Campaign> {
        self.rows
            .read()
            .expect("campaign store poisoned")
            .get(id)
            .cloned()
    }

    pub fn status(&self, id: &CampaignId) -> Option<CampaignStatus> {
        self.rows
            .read()
            .expect("campaign store poisoned")
            .get(id)
            .map(|c| c.status)
    }

    /// The tombstone the dispatcher checks before any upstream call.
    pub fn is_cancelled(&self, id: &CampaignId) -> bool {
        self.status(id) == Some(CampaignStatus::Cancelled)
    }

    /// Transition the campaign, enforcing the state machine.
    pub fn transition(
        &self,
        id: &CampaignId,
        next: CampaignStatus,
    ) -> Result<(), StoreError> {
        let mut rows = self.rows.write().expect("campaign store poisoned");
        let row = rows
            .get_mut(id)
            .ok_or_else(|| StoreError::NotFound(id.to_string()))?;

        if !row.status.can_transition_to(next) {
            return Err(StoreError::Conflict {
                expected: format!("state admitting {}", next),
                actual: row.status.to_string(),
            });
        }

        row.status = next;
        let now = Utc::now();
        match next {
            CampaignStatus::Sending if row.started_at.is_none() => row.started_at = Some(now),
            CampaignStatus::Paused => row.paused_at = Some(now),
            CampaignStatus::Completed | CampaignStatus::Cancelled | CampaignStatus::Failed => {
                row.finished_at = Some(now)
            }
            _ => {}
        }
        Ok(())
    }

    pub fn advance_cursor(&self, id: &CampaignId, new_cursor: usize) -> Result<(), StoreError> {
        let mut rows = self.rows.write().expect("campaign store poisoned");
        let row = rows
            .get_mut(id)
            .ok_or_else(|| StoreError::NotFound(id.to_string()))?;
        row.cursor = new_cursor;
        Ok(())
    }

    pub fn update_counters(
        &self,
        id: &CampaignId,
        f: impl FnOnce(&mut CampaignCounters),
    ) -> Result<CampaignCounters, StoreError> {
        let mut rows = self.rows.write().expect("campaign store poisoned");
        let row = rows
            .get_mut(id)
            .ok_or_else(|| StoreError::NotFound(id.to_string()))?;
        f(&mut row.counters);
        Ok(row.counters)
    }
}

/// Contacts, keyed by (workspace, wa_id).
#[derive(Default)]
pub struct ContactStore {
    rows: RwLock<HashMap<(String, String), Contact>>,
}

impl ContactStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Look up a contact by WhatsApp id, creating it on first sight.
    pub fn resolve_or_create(
        &self,
        workspace_id: &str,
        wa_id: &str,
        phone: &str,
        display_name: Option<&str>,
    ) -> Contact {
        let mut rows = self.rows.write().expect("contact store poisoned");
        let key = (workspace_id.to_string(), wa_id.to_string());
        let contact = rows.entry(key).or_insert_with(|| {
            let mut contact = Contact::new(workspace_id, wa_id, phone);
            contact.display_name = display_name.map(str::to_string);
            contact
        });
        if contact.display_name.is_none() {
            contact.display_name = display_name.map(str::to_string);
        }
        contact.clone()
    }

    pub fn get(&self, workspace_id: &str, wa_id: &str) -> Option<Contact> {
        self.rows
            .read()
            .expect("contact store poisoned")
            .get(&(workspace_id.to_string(), wa_id.to_string()))
            .cloned()
    }

    pub fn len(&self) -> usize {
        self.rows.read().expect("contact store poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Registered business numbers, indexed by upstream phone-number-id.
#[derive(Default)]
pub struct PhoneNumberStore {
    rows: RwLock<HashMap<String, PhoneNumber>>,
}

impl PhoneNumberStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, number: PhoneNumber) {
        self.rows
            .write()
            .expect("phone store poisoned")
            .insert(number.upstream_id.clone(), number);
    }

    pub fn get(&self, upstream_id: &str) -> Option<PhoneNumber> {
        self.rows
            .read()
            .expect("phone store poisoned")
            .get(upstream_id)
            .cloned()
    }

    /// Apply a quality/limit update from a phone-number webhook event.
    pub fn apply_update(
        &self,
        upstream_id: &str,
        quality: Option<QualityRating>,
        daily_cap: Option<u64>,
    ) -> Result<(), StoreError> {
        let mut rows = self.rows.write().expect("phone store poisoned");
        let row = rows
            .get_mut(upstream_id)
            .ok_or_else(|| StoreError::NotFound(upstream_id.to_string()))?;
        if let Some(quality) = quality {
            row.quality_rating = quality;
        }
        if let Some(cap) = daily_cap {
            row.daily_message_cap = cap;
        }
        row.updated_at = Utc::now();
        Ok(())
    }

    /// Raise the out-of-band credential-refresh signal.
    pub fn flag_token_refresh(&self, upstream_id: &str) {
        let mut rows = self.rows.write().expect("phone store poisoned");
        if let Some(row) = rows.get_mut(upstream_id) {
            row.token_refresh_required = true;
            row.updated_at = Utc::now();
        }
    }
}

/// Workspace registry; resolves webhook secrets at intake.
#[derive(Default)]
pub struct WorkspaceStore {
    rows: RwLock<HashMap<String, Workspace>>,
}

impl WorkspaceStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, workspace: Workspace) {
        self.rows
            .write()
            .expect("workspace store poisoned")
            .insert(workspace.id.clone(), workspace);
    }

    pub fn get(&self, id: &str) -> Option<Workspace> {
        self.rows
            .read()
            .expect("workspace store poisoned")
            .get(id)
            .cloned()
    }

    pub fn webhook_secret(&self, id: &str) -> Option<String> {
        self.get(id).map(|w| w.webhook_secret)
    }
}

/// Per-workspace template approval registry, fed by template events.
#[derive(Default)]
pub struct TemplateStore {
    rows: RwLock<HashMap<(String, String, String), TemplateStatus>>,
}

impl TemplateStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_status(
        &self,
        workspace_id: &str,
        name: &str,
        language: &str,
        status: TemplateStatus,
    ) {
        self.rows.write().expect("template store poisoned").insert(
            (
                workspace_id.to_string(),
                name.to_string(),
                language.to_string(),
            ),
            status,
        );
    }

    pub fn status(&self, workspace_id: &str, name: &str, language: &str) -> Option<TemplateStatus> {
        self.rows
            .read()
            .expect("template store poisoned")
            .get(&(
                workspace_id.to_string(),
                name.to_string(),
                language.to_string(),
            ))
            .copied()
    }

    pub fn is_approved(&self, workspace_id: &str, name: &str, language: &str) -> bool {
        self.status(workspace_id, name, language) == Some(TemplateStatus::Approved)
    }
}

/// Webhook event dedupe set with TTL.
///
/// An event id is unique per workspace; inserting an id already present
/// within the TTL window reports a replay. Expired entries are purged
/// lazily on insert.
pub struct DedupeStore {
    ttl: Duration,
    seen: RwLock<HashMap<(String, String), Instant>>,
}

impl DedupeStore {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            seen: RwLock::new(HashMap::new()),
        }
    }

    /// Record (workspace, event id); returns false when the pair was
    /// already present inside the TTL window.
    pub fn insert_if_absent(&self, workspace_id: &str, event_id: &str) -> bool {
        let now = Instant::now();
        let mut seen = self.seen.write().expect("dedupe store poisoned");
        seen.retain(|_, inserted_at| now.duration_since(*inserted_at) < self.ttl);

        let key = (workspace_id.to_string(), event_id.to_string());
        if seen.contains_key(&key) {
            return false;
        }
        seen.insert(key, now);
        true
    }

    pub fn len(&self) -> usize {
        self.seen.read().expect("dedupe store poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
