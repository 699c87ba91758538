use std::{collections::HashMap, sync::RwLock, time::Duration};

use async_trait::async_trait;
use teloxide::{prelude::*, types::Recipient, ApiError, RequestError};
use tokio::time::sleep;
use tracing::{debug, info, warn};

use ftb_core::{
    backend::{text_len, ChannelBackend, MemoryBackend, StoredMessage},
    domain::{ChannelId, MessageId},
    errors::Error,
    Result,
};

use crate::{tg_msg_id, with_retry};

/// Posted (and deleted right away) to learn a channel's newest message id.
const SYNC_MARKER: &str = "ftb: journal sync";
const BACKFILL_PAUSE: Duration = Duration::from_millis(50);

/// Storage channels over the Bot API.
///
/// The Bot API cannot list a chat's history, so every storage message this process
/// writes or sees (channel posts and their edits) is mirrored into a bounded
/// journal, and `history` answers from it. At startup [`rebuild_journal`] refills
/// the journal from the channels themselves.
///
/// [`rebuild_journal`]: TelegramBackend::rebuild_journal
pub struct TelegramBackend {
    bot: Bot,
    channels: Vec<ChannelId>,
    limit: usize,
    depth: usize,
    journal: MemoryBackend,
    /// Numeric chat id -> configured channel, learned from sends and posts.
    resolved: RwLock<HashMap<i64, ChannelId>>,
}

impl TelegramBackend {
    pub fn new(bot: Bot, channels: Vec<ChannelId>, history_limit: usize, limit: usize) -> Self {
        let resolved = channels
            .iter()
            .filter_map(|c| c.numeric().map(|id| (id, c.clone())))
            .collect();
        Self {
            bot,
            channels,
            limit,
            depth: history_limit,
            journal: MemoryBackend::new(limit, history_limit),
            resolved: RwLock::new(resolved),
        }
    }

    pub(crate) fn recipient(channel: &ChannelId) -> Recipient {
        match channel.numeric() {
            Some(id) => Recipient::Id(teloxide::types::ChatId(id)),
            None => {
                let name = channel.as_str().trim();
                let name = if name.starts_with('@') {
                    name.to_string()
                } else {
                    format!("@{name}")
                };
                Recipient::ChannelUsername(name)
            }
        }
    }

    fn remember_chat(&self, chat_id: i64, channel: &ChannelId) {
        let mut map = self.resolved.write().unwrap_or_else(|e| e.into_inner());
        map.entry(chat_id).or_insert_with(|| channel.clone());
    }

    /// Configured storage channel a chat belongs to, if any.
    pub fn channel_for(&self, chat_id: i64, username: Option<&str>) -> Option<ChannelId> {
        if let Some(c) = self
            .resolved
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(&chat_id)
        {
            return Some(c.clone());
        }
        let username = username?;
        let channel = self.channels.iter().find(|c| {
            c.as_str()
                .trim()
                .trim_start_matches('@')
                .eq_ignore_ascii_case(username)
        })?;
        self.remember_chat(chat_id, channel);
        Some(channel.clone())
    }

    /// Mirror a channel post (new or edited) into the journal.
    ///
    /// Returns the body when the post belongs to a storage channel.
    pub fn observe(&self, msg: &Message) -> Option<String> {
        let channel = self.channel_for(msg.chat.id.0, msg.chat.username())?;
        let text = msg.text()?;
        if is_sync_noise(text, msg.forward().is_some()) {
            return None;
        }
        self.journal.upsert(&channel, MessageId(msg.id.0), text);
        debug!(channel = %channel, message_id = msg.id.0, "storage post observed");
        Some(text.to_string())
    }

    /// Recover the most recent `history_limit` messages of every storage channel.
    ///
    /// A marker post reveals the newest id; each earlier id is then forwarded into
    /// the same channel to read its text, and the copy is deleted again. Ids that
    /// no longer exist are skipped.
    pub async fn rebuild_journal(&self) {
        for channel in &self.channels {
            match self.backfill(channel).await {
                Ok(recovered) => info!(channel = %channel, recovered, "storage journal rebuilt"),
                Err(e) => warn!(channel = %channel, error = %e, "storage journal rebuild failed"),
            }
        }
    }

    async fn backfill(&self, channel: &ChannelId) -> Result<usize> {
        let to = Self::recipient(channel);
        let marker = with_retry(|| self.bot.send_message(to.clone(), SYNC_MARKER))
            .await
            .map_err(|e| Self::map_err("sync", e))?;
        self.remember_chat(marker.chat.id.0, channel);
        self.discard(&to, marker.id).await;

        let mut recovered = 0usize;
        for raw in backfill_ids(marker.id.0, self.depth) {
            sleep(BACKFILL_PAUSE).await;
            let id = teloxide::types::MessageId(raw);
            let copy = match with_retry(|| self.bot.forward_message(to.clone(), to.clone(), id)).await {
                Ok(copy) => copy,
                Err(e) => {
                    debug!(channel = %channel, message_id = raw, error = %e, "nothing to recover");
                    continue;
                }
            };
            if let Some(text) = copy.text() {
                self.journal.upsert(channel, MessageId(raw), text);
                recovered += 1;
            }
            self.discard(&to, copy.id).await;
        }
        Ok(recovered)
    }

    async fn discard(&self, to: &Recipient, id: teloxide::types::MessageId) {
        if let Err(e) = with_retry(|| self.bot.delete_message(to.clone(), id)).await {
            warn!(message_id = id.0, error = %e, "failed to delete sync message");
        }
    }

    fn map_err(op: &'static str, e: RequestError) -> Error {
        Error::backend(op, e.to_string())
    }
}

#[async_trait]
impl ChannelBackend for TelegramBackend {
    fn max_message_len(&self) -> usize {
        self.limit
    }

    async fn send(&self, channel: &ChannelId, text: &str) -> Result<MessageId> {
        let len = text_len(text);
        if len > self.limit {
            return Err(Error::Capacity {
                len,
                limit: self.limit,
            });
        }

        let msg = with_retry(|| {
            self.bot
                .send_message(Self::recipient(channel), text.to_string())
        })
        .await
        .map_err(|e| Self::map_err("send", e))?;

        let id = MessageId(msg.id.0);
        self.remember_chat(msg.chat.id.0, channel);
        self.journal.upsert(channel, id, text);
        info!(channel = %channel, message_id = id.0, "storage message sent");
        Ok(id)
    }

    async fn edit(&self, channel: &ChannelId, id: MessageId, text: &str) -> Result<()> {
        let len = text_len(text);
        if len > self.limit {
            return Err(Error::Capacity {
                len,
                limit: self.limit,
            });
        }

        let res = with_retry(|| {
            self.bot
                .edit_message_text(Self::recipient(channel), tg_msg_id(id), text.to_string())
        })
        .await;
        match res {
            Ok(_) | Err(RequestError::Api(ApiError::MessageNotModified)) => {}
            Err(e) => return Err(Self::map_err("edit", e)),
        }

        self.journal.upsert(channel, id, text);
        Ok(())
    }

    async fn delete(&self, channel: &ChannelId, id: MessageId) -> Result<()> {
        let res = with_retry(|| {
            self.bot
                .delete_message(Self::recipient(channel), tg_msg_id(id))
        })
        .await;
        match res {
            Ok(_) | Err(RequestError::Api(ApiError::MessageToDeleteNotFound)) => {}
            Err(e) => return Err(Self::map_err("delete", e)),
        }

        self.journal.remove(channel, id);
        Ok(())
    }

    async fn history(&self, channel: &ChannelId, limit: usize) -> Result<Vec<StoredMessage>> {
        self.journal.history(channel, limit).await
    }
}

/// Ids below `newest` worth probing, most recent first.
fn backfill_ids(newest: i32, depth: usize) -> impl Iterator<Item = i32> {
    let depth = i32::try_from(depth).unwrap_or(i32::MAX);
    (newest.saturating_sub(depth).max(1)..newest).rev()
}

/// Posts produced by the journal rebuild itself.
fn is_sync_noise(text: &str, forwarded: bool) -> bool {
    forwarded || text == SYNC_MARKER
}

#[cfg(test)]
mod tests {
    use super::*;

    fn backend(channels: &[&str]) -> TelegramBackend {
        TelegramBackend::new(
            Bot::new("123:TEST"),
            channels.iter().map(|c| ChannelId::new(*c)).collect(),
            100,
            4096,
        )
    }

    #[test]
    fn channels_are_addressed_by_id_or_username() {
        assert_eq!(
            TelegramBackend::recipient(&ChannelId::new("-100123")),
            Recipient::Id(teloxide::types::ChatId(-100123))
        );
        assert_eq!(
            TelegramBackend::recipient(&ChannelId::new("store")),
            Recipient::ChannelUsername("@store".to_string())
        );
    }

    #[test]
    fn posts_resolve_to_configured_channels() {
        let b = backend(&["@Store", "-100777"]);
        assert_eq!(b.channel_for(-100777, None), Some(ChannelId::new("-100777")));
        assert_eq!(b.channel_for(-100555, Some("store")), Some(ChannelId::new("@Store")));
        // Learned: the username is no longer needed for this chat.
        assert_eq!(b.channel_for(-100555, None), Some(ChannelId::new("@Store")));
        assert_eq!(b.channel_for(-100999, Some("other")), None);
    }

    #[test]
    fn backfill_walks_down_from_the_marker() {
        assert_eq!(backfill_ids(10, 3).collect::<Vec<_>>(), vec![9, 8, 7]);
        assert_eq!(backfill_ids(4, 100).collect::<Vec<_>>(), vec![3, 2, 1]);
        assert_eq!(backfill_ids(1, 100).count(), 0);
    }

    #[test]
    fn rebuild_posts_are_not_journaled() {
        assert!(is_sync_noise(SYNC_MARKER, false));
        assert!(is_sync_noise("CATEGORIES_BLOCK:\nCATEGORY:c1", true));
        assert!(!is_sync_noise("CATEGORIES_BLOCK:\nCATEGORY:c1", false));
    }

    #[tokio::test]
    async fn oversized_writes_never_reach_the_api() {
        let b = backend(&["@store"]);
        let err = b
            .send(&ChannelId::new("@store"), &"x".repeat(4097))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Capacity { len: 4097, limit: 4096 }));
    }
}
