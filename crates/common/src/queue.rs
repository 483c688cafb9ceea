use serde::{Serialize, de::DeserializeOwned};
use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap};
use std::fmt;
use std::sync::Mutex;
use std::time::Duration;
use tokio::sync::Notify;
use tokio::time::Instant;

/// An item that travels over one of the internal queues.
///
/// Every payload declares which logical queue it belongs to, which keeps
/// queue names in one place and lets a broker-backed implementation map them
/// onto topics without touching call sites.
pub trait QueueItem:
    Serialize + DeserializeOwned + Send + Sync + Clone + fmt::Debug + 'static
{
    const QUEUE: &'static str;

    /// Optional grouping key; a partitioned backend uses it to keep related
    /// items on one partition. The in-process queue ignores it.
    fn ordering_key(&self) -> Option<String> {
        None
    }
}

/// Handle identifying one in-flight delivery, needed to ack or nack it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Receipt(u64);

/// One dequeued item plus its redelivery bookkeeping.
#[derive(Debug)]
pub struct Delivery<T> {
    pub payload: T,
    pub receipt: Receipt,
    /// 1 on first delivery, incremented on every redelivery.
    pub delivery_count: u32,
}

struct Scheduled<T> {
    available_at: Instant,
    seq: u64,
    delivery_count: u32,
    payload: T,
}

impl<T> PartialEq for Scheduled<T> {
    fn eq(&self, other: &Self) -> bool {
        self.available_at == other.available_at && self.seq == other.seq
    }
}

impl<T> Eq for Scheduled<T> {}

impl<T> PartialOrd for Scheduled<T> {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl<T> Ord for Scheduled<T> {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.available_at
            .cmp(&other.available_at)
            .then(self.seq.cmp(&other.seq))
    }
}

struct InFlight<T> {
    deadline: Instant,
    delivery_count: u32,
    payload: T,
}

struct Inner<T> {
    ready: BinaryHeap<Reverse<Scheduled<T>>>,
    in_flight: HashMap<u64, InFlight<T>>,
    next_seq: u64,
    next_receipt: u64,
}

/// In-process durable queue with at-least-once delivery.
///
/// Semantics: a dequeued item stays invisible for the caller's visibility
/// timeout; if it is not acked within that window it is redelivered.
/// `nack` reschedules explicitly with a delay, which is how retries with
/// backoff are expressed. Delivery order follows availability time, so a
/// delayed redelivery does not starve newer items.
pub struct InMemoryQueue<T> {
    inner: Mutex<Inner<T>>,
    notify: Notify,
}

impl<T: Clone + Send> Default for InMemoryQueue<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Clone + Send> InMemoryQueue<T> {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Inner {
                ready: BinaryHeap::new(),
                in_flight: HashMap::new(),
                next_seq: 0,
                next_receipt: 0,
            }),
            notify: Notify::new(),
        }
    }

    /// Enqueue an item, visible immediately.
    pub fn enqueue(&self, payload: T) {
        self.enqueue_delayed(payload, Duration::ZERO);
    }

    /// Enqueue an item that becomes visible only after `delay`.
    pub fn enqueue_delayed(&self, payload: T, delay: Duration) {
        {
            let mut inner = self.inner.lock().expect("queue mutex poisoned");
            let seq = inner.next_seq;
            inner.next_seq += 1;
            inner.ready.push(Reverse(Scheduled {
                available_at: Instant::now() + delay,
                seq,
                delivery_count: 0,
                payload,
            }));
        }
        self.notify.notify_waiters();
    }

    /// Dequeue one item, waiting up to `wait` for something to become
    /// visible. Returns `None` when the wait budget elapses empty-handed.
    pub async fn dequeue(&self, visibility: Duration, wait: Duration) -> Option<Delivery<T>> {
        let wait_deadline = Instant::now() + wait;
        loop {
            let now = Instant::now();
            let next_wake = {
                let mut inner = self.inner.lock().expect("queue mutex poisoned");
                Self::reap_expired(&mut inner, now);

                if let Some(delivery) = Self::pop_ready(&mut inner, now, visibility) {
                    return Some(delivery);
                }

                Self::next_event_at(&inner)
            };

            if now >= wait_deadline {
                return None;
            }

            let wake_at = match next_wake {
                Some(at) if at < wait_deadline => at,
                _ => wait_deadline,
            };

            tokio::select! {
                _ = self.notify.notified() => {}
                _ = tokio::time::sleep_until(wake_at) => {
                    if wake_at >= wait_deadline {
                        return None;
                    }
                }
            }
        }
    }

    /// Acknowledge a delivery, removing it permanently.
    /// Returns false when the receipt already expired and was redelivered.
    pub fn ack(&self, receipt: Receipt) -> bool {
        let mut inner = self.inner.lock().expect("queue mutex poisoned");
        inner.in_flight.remove(&receipt.0).is_some()
    }

    /// Return a delivery to the queue, visible again after `delay`.
    pub fn nack(&self, receipt: Receipt, delay: Duration) -> bool {
        let requeued = {
            let mut inner = self.inner.lock().expect("queue mutex poisoned");
            match inner.in_flight.remove(&receipt.0) {
                Some(item) => {
                    let seq = inner.next_seq;
                    inner.next_seq += 1;
                    inner.ready.push(Reverse(Scheduled {
                        available_at: Instant::now() + delay,
                        seq,
                        delivery_count: item.delivery_count,
                        payload: item.payload,
                    }));
                    true
                }
                None => false,
            }
        };
        if requeued {
            self.notify.notify_waiters();
        }
        requeued
    }

    /// Total items held (ready plus in flight).
    pub fn len(&self) -> usize {
        let inner = self.inner.lock().expect("queue mutex poisoned");
        inner.ready.len() + inner.in_flight.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn reap_expired(inner: &mut Inner<T>, now: Instant) {
        let expired: Vec<u64> = inner
            .in_flight
            .iter()
            .filter(|(_, item)| item.deadline <= now)
            .map(|(receipt, _)| *receipt)
            .collect();

        for receipt in expired {
            if let Some(item) = inner.in_flight.remove(&receipt) {
                tracing::debug!(
                    delivery_count = item.delivery_count,
                    "visibility timeout expired, redelivering"
                );
                let seq = inner.next_seq;
                inner.next_seq += 1;
                inner.ready.push(Reverse(Scheduled {
                    available_at: now,
                    seq,
                    delivery_count: item.delivery_count,
                    payload: item.payload,
                }));
            }
        }
    }

    fn pop_ready(inner: &mut Inner<T>, now: Instant, visibility: Duration) -> Option<Delivery<T>> {
        let head_ready = inner
            .ready
            .peek()
            .map(|Reverse(s)| s.available_at <= now)
            .unwrap_or(false);
        if !head_ready {
            return None;
        }

        let Reverse(scheduled) = inner.ready.pop().expect("peeked head vanished");
        let receipt = inner.next_receipt;
        inner.next_receipt += 1;
        let delivery_count = scheduled.delivery_count + 1;
        inner.in_flight.insert(
            receipt,
            InFlight {
                deadline: now + visibility,
                delivery_count,
                payload: scheduled.payload.clone(),
            },
        );

        Some(Delivery {
            payload: scheduled.payload,
            receipt: Receipt(receipt),
            delivery_count,
        })
    }

    fn next_event_at(inner: &Inner<T>) -> Option<Instant> {
        let next_ready = inner.ready.peek().map(|Reverse(s)| s.available_at);
        let next_expiry = inner.in_flight.values().map(|item| item.deadline).min();
        match (next_ready, next_expiry) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (Some(a), None) => Some(a),
            (None, Some(b)) => Some(b),
            (None, None) => None,
        }
    }
}
