use std::{
    collections::HashMap,
    time::{Duration, Instant},
};

use crate::domain::UserId;

// ============== Authorization ==============

/// Admin allow-list check. Unknown senders and an empty list never pass.
pub fn is_authorized(user_id: Option<UserId>, admin_ids: &[i64]) -> bool {
    let Some(user_id) = user_id else {
        return false;
    };
    admin_ids.contains(&user_id.0)
}

// ============== Delivery rate limit (token bucket) ==============

#[derive(Clone, Debug)]
struct Bucket {
    tokens: f64,
    last_update: Instant,
}

/// Per-recipient token bucket in front of category deliveries.
#[derive(Clone, Debug)]
pub struct RateLimiter {
    enabled: bool,
    max_tokens: f64,
    refill_per_sec: f64,
    window: Duration,
    last_prune: Option<Instant>,
    buckets: HashMap<UserId, Bucket>,
}

impl RateLimiter {
    pub fn new(enabled: bool, max_tokens: u32, window: Duration) -> Self {
        let max_tokens_f = f64::from(max_tokens.max(1));
        let window_secs = window.as_secs_f64().max(1e-9);

        Self {
            enabled,
            max_tokens: max_tokens_f,
            refill_per_sec: max_tokens_f / window_secs,
            window,
            last_prune: None,
            buckets: HashMap::new(),
        }
    }

    /// `(allowed, retry_after)`.
    pub fn check(&mut self, user_id: UserId) -> (bool, Option<Duration>) {
        self.check_at(user_id, Instant::now())
    }

    pub fn check_at(&mut self, user_id: UserId, now: Instant) -> (bool, Option<Duration>) {
        if !self.enabled {
            return (true, None);
        }
        self.prune_idle(now);

        let bucket = self.buckets.entry(user_id).or_insert_with(|| Bucket {
            tokens: self.max_tokens,
            last_update: now,
        });

        let elapsed = now.duration_since(bucket.last_update).as_secs_f64();
        bucket.tokens = (bucket.tokens + elapsed * self.refill_per_sec).min(self.max_tokens);
        bucket.last_update = now;

        if bucket.tokens >= 1.0 {
            bucket.tokens -= 1.0;
            return (true, None);
        }

        let secs = (1.0 - bucket.tokens) / self.refill_per_sec;
        (false, Some(Duration::from_secs_f64(secs.max(0.0))))
    }

    /// At most once per window, drop buckets that have refilled completely.
    fn prune_idle(&mut self, now: Instant) {
        if self
            .last_prune
            .is_some_and(|at| now.saturating_duration_since(at) < self.window)
        {
            return;
        }
        self.last_prune = Some(now);

        let (max, rate) = (self.max_tokens, self.refill_per_sec);
        self.buckets.retain(|_, b| {
            let elapsed = now.saturating_duration_since(b.last_update).as_secs_f64();
            b.tokens + elapsed * rate < max
        });
    }
}
