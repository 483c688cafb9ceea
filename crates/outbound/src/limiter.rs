use common::{PhoneNumberStore, Priority, QualityRating};
use governor::{
    Quota, RateLimiter,
    clock::{Clock, DefaultClock},
    state::keyed::DefaultKeyedStateStore,
    state::{InMemoryState, NotKeyed},
};
use nonzero_ext::nonzero;
use std::collections::HashMap;
use std::num::NonZeroU32;
use std::sync::Mutex;
use std::time::{Duration, Instant};

/// Result of asking the limiter for a send slot.
///
/// The limiter never fails: it either grants the slot or tells the caller
/// how long to sleep before asking again. Callers sleep and retry, or hand
/// the work back to the queue when the hint exceeds their budget.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Acquisition {
    Ready,
    Wait(Duration),
}

impl Acquisition {
    pub fn is_ready(&self) -> bool {
        matches!(self, Acquisition::Ready)
    }
}

/// Classic token bucket with lazy refill on a monotonic clock.
///
/// A penalty empties the bucket and suspends refill until the penalty
/// horizon; upstream 429 feedback lands here.
struct TokenBucket {
    tokens: f64,
    capacity: f64,
    refill_per_sec: f64,
    last_refill: Instant,
    penalty_until: Option<Instant>,
}

impl TokenBucket {
    fn new(rate: u32, now: Instant) -> Self {
        let capacity = rate.max(1) as f64;
        Self {
            tokens: capacity,
            capacity,
            refill_per_sec: capacity,
            last_refill: now,
            penalty_until: None,
        }
    }

    fn set_rate(&mut self, rate: u32, now: Instant) {
        self.refill(now);
        let capacity = rate.max(1) as f64;
        self.capacity = capacity;
        self.refill_per_sec = capacity;
        self.tokens = self.tokens.min(capacity);
    }

    fn refill(&mut self, now: Instant) {
        let elapsed = now.duration_since(self.last_refill).as_secs_f64();
        self.tokens = (self.tokens + elapsed * self.refill_per_sec).min(self.capacity);
        self.last_refill = now;
    }

    /// Take one token, or report how long until one is available.
    fn try_take(&mut self, now: Instant) -> Option<Duration> {
        if let Some(until) = self.penalty_until {
            if now < until {
                return Some(until - now);
            }
            // Penalty elapsed: restart refill from the horizon, empty-handed.
            self.penalty_until = None;
            self.tokens = 0.0;
            self.last_refill = now;
        }

        self.refill(now);
        if self.tokens >= 1.0 {
            self.tokens -= 1.0;
            None
        } else {
            let deficit = 1.0 - self.tokens;
            Some(Duration::from_secs_f64(deficit / self.refill_per_sec))
        }
    }

    fn penalize(&mut self, duration: Duration, now: Instant) {
        self.tokens = 0.0;
        let horizon = now + duration;
        self.penalty_until = Some(match self.penalty_until {
            Some(existing) if existing > horizon => existing,
            _ => horizon,
        });
    }
}

/// Send-rate gate for the dispatcher.
///
/// Three layers, all of which a caller must clear: a per-number token
/// bucket (penalty-aware), a per-workspace bucket for noisy tenants, and a
/// process-wide bucket. Buckets are process-local; the same interface
/// fronts a shared-store implementation in multi-node deployments.
pub struct SendRateLimiter {
    per_number_rate: u32,
    per_number: Mutex<HashMap<String, TokenBucket>>,
    per_workspace: RateLimiter<String, DefaultKeyedStateStore<String>, DefaultClock>,
    global: RateLimiter<NotKeyed, InMemoryState, DefaultClock>,
    clock: DefaultClock,
}

impl SendRateLimiter {
    pub fn new(per_number_rate: u32, workspace_rate: u32, global_rate: u32) -> Self {
        let workspace_quota = Quota::per_second(nonzero_rate(workspace_rate));
        let global_quota = Quota::per_second(nonzero_rate(global_rate));

        Self {
            per_number_rate,
            per_number: Mutex::new(HashMap::new()),
            per_workspace: RateLimiter::keyed(workspace_quota),
            global: RateLimiter::direct(global_quota),
            clock: DefaultClock::default(),
        }
    }

    /// Ask for a send slot for (phone number, workspace).
    ///
    /// All three buckets are consulted; the returned hint is the largest of
    /// the individual hints. Priority shades the hint so urgent work wakes
    /// earlier under contention; capacity is unaffected.
    pub fn acquire(
        &self,
        phone_number_id: &str,
        workspace_id: &str,
        priority: Priority,
    ) -> Acquisition {
        let now = Instant::now();
        let mut hint: Option<Duration> = None;

        {
            let mut buckets = self.per_number.lock().expect("limiter mutex poisoned");
            let bucket = buckets
                .entry(phone_number_id.to_string())
                .or_insert_with(|| TokenBucket::new(self.per_number_rate, now));
            if let Some(wait) = bucket.try_take(now) {
                hint = Some(wait);
            }
        }

        if let Err(not_until) = self.per_workspace.check_key(&workspace_id.to_string()) {
            let wait = not_until.wait_time_from(self.clock.now());
            hint = Some(hint.map_or(wait, |h| h.max(wait)));
        }

        if let Err(not_until) = self.global.check() {
            let wait = not_until.wait_time_from(self.clock.now());
            hint = Some(hint.map_or(wait, |h| h.max(wait)));
        }

        match hint {
            None => Acquisition::Ready,
            Some(wait) => Acquisition::Wait(shade_by_priority(wait, priority)),
        }
    }

    /// Feed an upstream 429 back into the number's bucket: no sends to this
    /// number until the advertised horizon.
    pub fn penalize(&self, phone_number_id: &str, duration: Duration) {
        let now = Instant::now();
        let mut buckets = self.per_number.lock().expect("limiter mutex poisoned");
        let bucket = buckets
            .entry(phone_number_id.to_string())
            .or_insert_with(|| TokenBucket::new(self.per_number_rate, now));
        bucket.penalize(duration, now);
    }

    /// Adjust one number's refill rate, e.g. when its effective daily cap
    /// changes with its quality rating.
    pub fn set_number_rate(&self, phone_number_id: &str, rate: u32) {
        let now = Instant::now();
        let mut buckets = self.per_number.lock().expect("limiter mutex poisoned");
        let bucket = buckets
            .entry(phone_number_id.to_string())
            .or_insert_with(|| TokenBucket::new(rate, now));
        bucket.set_rate(rate, now);
    }

    /// Re-derive one number's bucket rate from its stored quality rating
    /// and daily cap. The dispatcher runs this before acquiring, so a
    /// downgrade ingested by the webhook pipeline throttles the very next
    /// send to that number. Unregistered numbers keep the configured rate.
    pub fn sync_number_rate(&self, numbers: &PhoneNumberStore, phone_number_id: &str) {
        if let Some(number) = numbers.get(phone_number_id) {
            let rate = effective_number_rate(
                self.per_number_rate,
                number.quality_rating,
                number.daily_message_cap,
            );
            self.set_number_rate(phone_number_id, rate);
        }
    }
}

/// Seconds over which a number's daily cap is spread into a steady rate.
const CAP_SPREAD_SECS: u64 = 3600;

/// Effective per-second rate for a number: the daily cap spread over
/// [`CAP_SPREAD_SECS`] of continuous sending, shaded by quality rating
/// (full / half / quarter for green, yellow, red), floored at one message
/// per second and bounded by the configured ceiling.
pub fn effective_number_rate(ceiling: u32, quality: QualityRating, daily_cap: u64) -> u32 {
    let ceiling = ceiling.max(1);
    let cap_rate = (daily_cap / CAP_SPREAD_SECS).min(ceiling as u64).max(1) as u32;
    match quality {
        QualityRating::Green | QualityRating::Unknown => cap_rate,
        QualityRating::Yellow => (cap_rate / 2).max(1),
        QualityRating::Red => (cap_rate / 4).max(1),
    }
}

fn nonzero_rate(rate: u32) -> NonZeroU32 {
    NonZeroU32::new(rate).unwrap_or(nonzero!(1u32))
}

fn shade_by_priority(wait: Duration, priority: Priority) -> Duration {
    match priority {
        Priority::Urgent => wait.mul_f64(0.9),
        Priority::Normal => wait,
        Priority::Low => wait.mul_f64(1.1),
    }
}
