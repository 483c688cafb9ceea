use common::{Core, CounterEvent, CounterField};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

const QUEUE_VISIBILITY: Duration = Duration::from_secs(60);
const POLL_WAIT: Duration = Duration::from_secs(5);

/// Apply one counter increment to its campaign.
///
/// Emitters (dispatcher and status handler) only produce an event when the
/// message row actually advanced, so each message bumps each counter at
/// most once and the counters converge on the row states.
pub fn apply_counter_event(core: &Core, event: &CounterEvent) {
    let result = core.campaigns.update_counters(&event.campaign_id, |counters| {
        match event.field {
            CounterField::Sent => counters.sent += 1,
            CounterField::Delivered => counters.delivered += 1,
            CounterField::Read => counters.read += 1,
            CounterField::Failed => counters.failed += 1,
        }
    });

    match result {
        Ok(counters) => {
            debug!(campaign = %event.campaign_id, ?event.field, ?counters, "counter applied")
        }
        Err(err) => {
            warn!(campaign = %event.campaign_id, %err, "counter event for unknown campaign")
        }
    }
}

/// Long-running reducer over the campaign counter queue.
pub fn spawn_reducer(core: Arc<Core>, mut shutdown: watch::Receiver<bool>) -> JoinHandle<()> {
    tokio::spawn(async move {
        debug!("campaign counter reducer starting");
        loop {
            if *shutdown.borrow() {
                break;
            }

            tokio::select! {
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
                delivery = core.queues.campaign_counters.dequeue(QUEUE_VISIBILITY, POLL_WAIT) => {
                    if let Some(delivery) = delivery {
                        apply_counter_event(&core, &delivery.payload);
                        core.queues.campaign_counters.ack(delivery.receipt);
                    }
                }
            }
        }
        debug!("campaign counter reducer stopped");
    })
}
