use crate::command::OutboundCommand;
use crate::events::{CounterEvent, InboundEvent, PhoneNumberEvent, StatusEvent, TemplateEvent};
use crate::queue::InMemoryQueue;
use crate::store::{
    CampaignStore, ContactStore, DedupeStore, MessageStore, PhoneNumberStore, TemplateStore,
    WorkspaceStore,
};
use std::sync::Arc;
use std::time::Duration;

/// The internal queues every service coordinates through.
pub struct Queues {
    pub outbound: InMemoryQueue<OutboundCommand>,
    pub status_updates: InMemoryQueue<StatusEvent>,
    pub inbound_messages: InMemoryQueue<InboundEvent>,
    pub template_updates: InMemoryQueue<TemplateEvent>,
    pub phone_number_updates: InMemoryQueue<PhoneNumberEvent>,
    pub campaign_counters: InMemoryQueue<CounterEvent>,
}

impl Queues {
    fn new() -> Self {
        Self {
            outbound: InMemoryQueue::new(),
            status_updates: InMemoryQueue::new(),
            inbound_messages: InMemoryQueue::new(),
            template_updates: InMemoryQueue::new(),
            phone_number_updates: InMemoryQueue::new(),
            campaign_counters: InMemoryQueue::new(),
        }
    }
}

/// Shared handle over every opened resource of the messaging core.
///
/// Constructed once at startup and passed through explicitly; there is no
/// ambient global state. Services clone the `Arc` and reach the stores and
/// queues through it.
pub struct Core {
    pub queues: Queues,
    pub messages: MessageStore,
    pub campaigns: CampaignStore,
    pub contacts: ContactStore,
    pub phone_numbers: PhoneNumberStore,
    pub workspaces: WorkspaceStore,
    pub templates: TemplateStore,
    pub webhook_dedupe: DedupeStore,
}

impl Core {
    pub fn new(dedupe_ttl: Duration) -> Arc<Self> {
        Arc::new(Self {
            queues: Queues::new(),
            messages: MessageStore::new(),
            campaigns: CampaignStore::new(),
            contacts: ContactStore::new(),
            phone_numbers: PhoneNumberStore::new(),
            workspaces: WorkspaceStore::new(),
            templates: TemplateStore::new(),
            webhook_dedupe: DedupeStore::new(dedupe_ttl),
        })
    }
}
