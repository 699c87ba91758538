//! Delivery-expiry scheduler.
//!
//! One session per recipient: a countdown that rewrites the status message every
//! tick and, at zero, deletes everything that was delivered. Starting a new session
//! for the same recipient cancels the old one, which leaves its messages in place.

use std::{
    collections::HashMap,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
    time::Duration,
};

use chrono::{DateTime, Utc};
use tokio::{
    sync::Mutex,
    task::JoinHandle,
    time::{sleep_until, Instant},
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::{
    domain::{ChatId, MessageId, MessageRef, UserId},
    messaging::port::MessagingPort,
};

/// What to track once files have been delivered.
#[derive(Clone, Debug)]
pub struct DeliveryRequest {
    pub recipient: UserId,
    pub chat_id: ChatId,
    /// Delivered file messages.
    pub messages: Vec<MessageId>,
    /// Countdown message; rewritten on every tick and deleted last.
    pub status: MessageId,
    pub ttl_seconds: u64,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SessionStatus {
    pub remaining_seconds: u64,
    pub expires_at: DateTime<Utc>,
}

#[derive(Clone)]
pub struct DeliveryScheduler {
    inner: Arc<SchedulerInner>,
}

struct SchedulerInner {
    messenger: Arc<dyn MessagingPort>,
    tick: u64,
    next_generation: AtomicU64,
    sessions: Mutex<HashMap<UserId, SessionEntry>>,
}

struct SessionEntry {
    generation: u64,
    cancel: CancellationToken,
    handle: JoinHandle<()>,
    expires_at: DateTime<Utc>,
    remaining: Arc<AtomicU64>,
}

impl DeliveryScheduler {
    pub fn new(messenger: Arc<dyn MessagingPort>, tick_seconds: u64) -> Self {
        Self {
            inner: Arc::new(SchedulerInner {
                messenger,
                tick: tick_seconds.max(1),
                next_generation: AtomicU64::new(1),
                sessions: Mutex::new(HashMap::new()),
            }),
        }
    }

    /// Start (or replace) the recipient's session. A zero TTL starts nothing.
    pub async fn start(&self, req: DeliveryRequest) -> bool {
        if req.ttl_seconds == 0 {
            return false;
        }

        let generation = self.inner.next_generation.fetch_add(1, Ordering::SeqCst);
        let cancel = CancellationToken::new();
        let remaining = Arc::new(AtomicU64::new(req.ttl_seconds));
        let expires_at = i64::try_from(req.ttl_seconds)
            .ok()
            .and_then(chrono::Duration::try_seconds)
            .and_then(|d| Utc::now().checked_add_signed(d))
            .unwrap_or(DateTime::<Utc>::MAX_UTC);
        let recipient = req.recipient;

        // Hold the map while spawning so a very short session cannot finish before
        // its own entry exists.
        let mut sessions = self.inner.sessions.lock().await;
        if let Some(old) = sessions.remove(&recipient) {
            old.cancel.cancel();
            info!(recipient = recipient.0, "delivery session replaced");
        }

        let handle = tokio::spawn(run_session(
            self.inner.clone(),
            generation,
            req,
            cancel.clone(),
            remaining.clone(),
        ));

        sessions.insert(
            recipient,
            SessionEntry {
                generation,
                cancel,
                handle,
                expires_at,
                remaining,
            },
        );
        true
    }

    /// Stop the countdown without deleting anything. Safe to call repeatedly.
    pub async fn cancel(&self, recipient: UserId) -> bool {
        let entry = self.inner.sessions.lock().await.remove(&recipient);
        match entry {
            Some(entry) => {
                entry.cancel.cancel();
                info!(recipient = recipient.0, "delivery session cancelled");
                true
            }
            None => false,
        }
    }

    pub async fn status(&self, recipient: UserId) -> Option<SessionStatus> {
        let sessions = self.inner.sessions.lock().await;
        let entry = sessions.get(&recipient)?;
        Some(SessionStatus {
            remaining_seconds: entry.remaining.load(Ordering::SeqCst),
            expires_at: entry.expires_at,
        })
    }

    pub async fn active_count(&self) -> usize {
        self.inner.sessions.lock().await.len()
    }

    /// Cancel every session (shutdown).
    pub async fn stop(&self) {
        let mut sessions = self.inner.sessions.lock().await;
        for (_, entry) in sessions.drain() {
            entry.cancel.cancel();
            entry.handle.abort();
        }
    }
}

async fn run_session(
    inner: Arc<SchedulerInner>,
    generation: u64,
    req: DeliveryRequest,
    cancel: CancellationToken,
    remaining: Arc<AtomicU64>,
) {
    let recipient = req.recipient;
    let status = MessageRef {
        chat_id: req.chat_id,
        message_id: req.status,
    };

    let mut left = req.ttl_seconds;
    let mut deadline = Instant::now();
    while left > 0 {
        let step = left.min(inner.tick);
        deadline += Duration::from_secs(step);

        tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                debug!(recipient = recipient.0, left, "session stopped before expiry");
                return;
            }
            _ = sleep_until(deadline) => {}
        }

        left -= step;
        remaining.store(left, Ordering::SeqCst);
        if left > 0 {
            if let Err(e) = inner.messenger.edit_text(status, &expiry_notice(left)).await {
                debug!(recipient = recipient.0, error = %e, "status update failed");
            }
        }
    }

    if cancel.is_cancelled() {
        return;
    }

    let mut failed = 0usize;
    for id in req.messages.iter().chain(std::iter::once(&req.status)) {
        let msg = MessageRef {
            chat_id: req.chat_id,
            message_id: *id,
        };
        if let Err(e) = inner.messenger.delete_message(msg).await {
            failed += 1;
            warn!(
                recipient = recipient.0,
                message_id = id.0,
                error = %e,
                "failed to delete delivered message"
            );
        }
    }
    info!(
        recipient = recipient.0,
        deleted = req.messages.len() + 1 - failed,
        failed,
        "delivery expired"
    );

    let mut sessions = inner.sessions.lock().await;
    if sessions
        .get(&recipient)
        .is_some_and(|e| e.generation == generation)
    {
        sessions.remove(&recipient);
    }
}

/// Countdown text for the status message.
pub fn expiry_notice(remaining_seconds: u64) -> String {
    format!(
        "⚠️ These files will be deleted automatically in {}.\nTime left: {remaining_seconds} seconds",
        format_duration(remaining_seconds)
    )
}

/// `1h 2m 5s`, dropping leading zero units.
pub fn format_duration(seconds: u64) -> String {
    let h = seconds / 3600;
    let m = (seconds % 3600) / 60;
    let s = seconds % 60;
    if h > 0 {
        format!("{h}h {m}m {s}s")
    } else if m > 0 {
        format!("{m}m {s}s")
    } else {
        format!("{s}s")
    }
}
