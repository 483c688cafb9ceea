pub mod inbound;
pub mod phone;
pub mod status;
pub mod template;

use crate::config::GatewayConfig;
use common::{Core, Delivery, InMemoryQueue};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info};

// Queue lease granted to a consumer per delivery, and the idle poll bound.
const QUEUE_VISIBILITY: Duration = Duration::from_secs(60);
const POLL_WAIT: Duration = Duration::from_secs(5);

/// What a consumer decided about one delivery.
pub(crate) enum Disposition {
    Ack,
    Retry(Duration),
}

/// Shared dequeue/ack/nack loop around a per-event handler.
pub(crate) async fn run_consumer<T, F>(
    name: &str,
    queue: &InMemoryQueue<T>,
    mut shutdown: watch::Receiver<bool>,
    mut handler: F,
) where
    T: Clone + Send,
    F: FnMut(&Delivery<T>) -> Disposition,
{
    debug!(consumer = name, "consumer starting");
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
            delivery = queue.dequeue(QUEUE_VISIBILITY, POLL_WAIT) => {
                if let Some(delivery) = delivery {
                    match handler(&delivery) {
                        Disposition::Ack => {
                            queue.ack(delivery.receipt);
                        }
                        Disposition::Retry(delay) => {
                            queue.nack(delivery.receipt, delay);
                        }
                    }
                }
            }
        }
    }
    debug!(consumer = name, "consumer stopped");
}

/// The gateway's asynchronous consumers, one per typed queue.
pub struct ConsumerSet {
    shutdown_tx: watch::Sender<bool>,
    tasks: Vec<JoinHandle<()>>,
}

impl ConsumerSet {
    pub async fn shutdown(self) {
        info!("stopping webhook consumers");
        let _ = self.shutdown_tx.send(true);
        for task in self.tasks {
            let _ = task.await;
        }
    }
}

pub fn spawn_consumers(core: Arc<Core>, config: &GatewayConfig) -> ConsumerSet {
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let grace = config.status_grace();

    let status_task = tokio::spawn({
        let core = core.clone();
        let shutdown = shutdown_rx.clone();
        async move {
            let handler_core = core.clone();
            run_consumer("status", &core.queues.status_updates, shutdown, move |delivery| {
                status::apply_status_event(
                    &handler_core,
                    &delivery.payload,
                    delivery.delivery_count,
                    grace,
                )
            })
            .await;
        }
    });

    let inbound_task = tokio::spawn({
        let core = core.clone();
        let shutdown = shutdown_rx.clone();
        async move {
            let handler_core = core.clone();
            run_consumer("inbound", &core.queues.inbound_messages, shutdown, move |delivery| {
                inbound::apply_inbound_event(&handler_core, &delivery.payload)
            })
            .await;
        }
    });

    let template_task = tokio::spawn({
        let core = core.clone();
        let shutdown = shutdown_rx.clone();
        async move {
            let handler_core = core.clone();
            run_consumer("template", &core.queues.template_updates, shutdown, move |delivery| {
                template::apply_template_event(&handler_core, &delivery.payload)
            })
            .await;
        }
    });

    let phone_task = tokio::spawn({
        let core = core.clone();
        let shutdown = shutdown_rx.clone();
        async move {
            let handler_core = core.clone();
            run_consumer("phone", &core.queues.phone_number_updates, shutdown, move |delivery| {
                phone::apply_phone_event(&handler_core, &delivery.payload)
            })
            .await;
        }
    });

    ConsumerSet {
        shutdown_tx,
        tasks: vec![status_task, inbound_task, template_task, phone_task],
    }
}
