use std::time::Duration;

use async_trait::async_trait;
use tokio::time::sleep;
use tracing::warn;

use crate::{
    domain::{ChannelId, UserId},
    Result,
};

/// Answers "is this user a member of that channel".
///
/// `Ok(false)` is a definitive answer; `Err` is a transient failure worth retrying.
#[async_trait]
pub trait MembershipGate: Send + Sync {
    async fn is_member(&self, channel: &ChannelId, user: UserId) -> Result<bool>;
}

#[derive(Clone, Copy, Debug)]
pub struct RetryPolicy {
    pub attempts: u32,
    pub delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            attempts: 3,
            delay: Duration::from_secs(2),
        }
    }
}

/// Bounded retry on transient errors; exhaustion counts as "not a member".
pub async fn is_member_with_retry(
    gate: &dyn MembershipGate,
    channel: &ChannelId,
    user: UserId,
    policy: RetryPolicy,
) -> bool {
    let attempts = policy.attempts.max(1);
    for attempt in 1..=attempts {
        match gate.is_member(channel, user).await {
            Ok(member) => return member,
            Err(e) => {
                warn!(
                    channel = %channel,
                    user = user.0,
                    attempt,
                    error = %e,
                    "membership check failed"
                );
                if attempt < attempts {
                    sleep(policy.delay).await;
                }
            }
        }
    }
    false
}

/// Channels from `required` the user has not joined, in configured order.
pub async fn missing_channels(
    gate: &dyn MembershipGate,
    required: &[ChannelId],
    user: UserId,
    policy: RetryPolicy,
) -> Vec<ChannelId> {
    let mut missing = Vec::new();
    for channel in required {
        if !is_member_with_retry(gate, channel, user, policy).await {
            missing.push(channel.clone());
        }
    }
    missing
}

#[cfg(test)]
mod tests {
    use std::{collections::HashMap, sync::Mutex};

    use tokio::time::Instant;

    use super::*;
    use crate::errors::Error;

    /// Scripted answers per channel, consumed front to back; the last one repeats.
    #[derive(Default)]
    struct ScriptedGate {
        script: Mutex<HashMap<ChannelId, Vec<Option<bool>>>>,
        calls: Mutex<usize>,
    }

    impl ScriptedGate {
        fn with(self, channel: &str, answers: Vec<Option<bool>>) -> Self {
            self.script
                .lock()
                .unwrap()
                .insert(ChannelId::new(channel), answers);
            self
        }

        fn calls(&self) -> usize {
            *self.calls.lock().unwrap()
        }
    }

    #[async_trait]
    impl MembershipGate for ScriptedGate {
        async fn is_member(&self, channel: &ChannelId, _user: UserId) -> Result<bool> {
            *self.calls.lock().unwrap() += 1;
            let mut script = self.script.lock().unwrap();
            let answers = script.get_mut(channel).expect("unscripted channel");
            let next = if answers.len() > 1 {
                answers.remove(0)
            } else {
                answers[0]
            };
            next.ok_or_else(|| Error::External("Bad Gateway".to_string()))
        }
    }

    #[tokio::test(start_paused = true)]
    async fn transient_errors_are_retried_until_an_answer() {
        let gate = ScriptedGate::default().with("@a", vec![None, Some(true)]);
        let start = Instant::now();

        assert!(is_member_with_retry(&gate, &ChannelId::new("@a"), UserId(1), RetryPolicy::default()).await);
        assert_eq!(gate.calls(), 2);
        assert_eq!(start.elapsed(), Duration::from_secs(2));
    }

    #[tokio::test(start_paused = true)]
    async fn exhausted_retries_mean_not_a_member() {
        let gate = ScriptedGate::default().with("@a", vec![None]);
        let start = Instant::now();

        assert!(!is_member_with_retry(&gate, &ChannelId::new("@a"), UserId(1), RetryPolicy::default()).await);
        assert_eq!(gate.calls(), 3);
        assert_eq!(start.elapsed(), Duration::from_secs(4));
    }

    #[tokio::test(start_paused = true)]
    async fn definitive_no_is_not_retried() {
        let gate = ScriptedGate::default().with("@a", vec![Some(false)]);
        assert!(!is_member_with_retry(&gate, &ChannelId::new("@a"), UserId(1), RetryPolicy::default()).await);
        assert_eq!(gate.calls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn missing_channels_keeps_configured_order() {
        let gate = ScriptedGate::default()
            .with("@a", vec![Some(false)])
            .with("@b", vec![Some(true)])
            .with("@c", vec![None]);
        let required = [
            ChannelId::new("@a"),
            ChannelId::new("@b"),
            ChannelId::new("@c"),
        ];

        let missing = missing_channels(&gate, &required, UserId(1), RetryPolicy::default()).await;
        assert_eq!(missing, vec![ChannelId::new("@a"), ChannelId::new("@c")]);
    }
}
