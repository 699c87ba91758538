use std::{
    collections::HashMap,
    sync::{
        atomic::{AtomicBool, AtomicI32, Ordering},
        Mutex,
    },
};

use async_trait::async_trait;

use crate::{
    backend::{text_len, ChannelBackend, StoredMessage, MAX_MESSAGE_LEN},
    domain::{ChannelId, MessageId},
    errors::Error,
    Result,
};

/// In-process channel backend.
///
/// Keeps each channel's messages in id order, capped at `retain` entries (oldest
/// dropped first). The Telegram adapter uses it as a journal of the storage
/// channels it observes; tests use it as the whole backend.
pub struct MemoryBackend {
    limit: usize,
    retain: usize,
    next_id: AtomicI32,
    offline: AtomicBool,
    channels: Mutex<HashMap<ChannelId, Vec<StoredMessage>>>,
}

impl Default for MemoryBackend {
    fn default() -> Self {
        Self::new(MAX_MESSAGE_LEN, usize::MAX)
    }
}

impl MemoryBackend {
    pub fn new(limit: usize, retain: usize) -> Self {
        Self {
            limit,
            retain: retain.max(1),
            next_id: AtomicI32::new(1),
            offline: AtomicBool::new(false),
            channels: Mutex::new(HashMap::new()),
        }
    }

    /// Insert or replace a message observed elsewhere (keeps its position on edit).
    pub fn upsert(&self, channel: &ChannelId, id: MessageId, text: &str) {
        let mut map = self.channels.lock().unwrap_or_else(|e| e.into_inner());
        let msgs = map.entry(channel.clone()).or_default();
        match msgs.binary_search_by_key(&id, |m| m.id) {
            Ok(pos) => msgs[pos].text = text.to_string(),
            Err(pos) => {
                msgs.insert(
                    pos,
                    StoredMessage {
                        id,
                        text: text.to_string(),
                    },
                );
                if msgs.len() > self.retain {
                    let excess = msgs.len() - self.retain;
                    msgs.drain(..excess);
                }
            }
        }
        self.next_id.fetch_max(id.0 + 1, Ordering::SeqCst);
    }

    pub fn remove(&self, channel: &ChannelId, id: MessageId) -> bool {
        let mut map = self.channels.lock().unwrap_or_else(|e| e.into_inner());
        let Some(msgs) = map.get_mut(channel) else {
            return false;
        };
        match msgs.binary_search_by_key(&id, |m| m.id) {
            Ok(pos) => {
                msgs.remove(pos);
                true
            }
            Err(_) => false,
        }
    }

    pub fn get(&self, channel: &ChannelId, id: MessageId) -> Option<String> {
        let map = self.channels.lock().unwrap_or_else(|e| e.into_inner());
        let msgs = map.get(channel)?;
        let pos = msgs.binary_search_by_key(&id, |m| m.id).ok()?;
        Some(msgs[pos].text.clone())
    }

    /// Number of messages currently held for `channel`.
    pub fn len(&self, channel: &ChannelId) -> usize {
        let map = self.channels.lock().unwrap_or_else(|e| e.into_inner());
        map.get(channel).map(|m| m.len()).unwrap_or(0)
    }

    pub fn is_empty(&self, channel: &ChannelId) -> bool {
        self.len(channel) == 0
    }

    /// Simulate a transport outage: every call fails until cleared.
    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    fn check_online(&self, op: &'static str) -> Result<()> {
        if self.offline.load(Ordering::SeqCst) {
            return Err(Error::backend(op, "backend offline"));
        }
        Ok(())
    }

    fn check_len(&self, text: &str) -> Result<()> {
        let len = text_len(text);
        if len > self.limit {
            return Err(Error::Capacity {
                len,
                limit: self.limit,
            });
        }
        Ok(())
    }
}

#[async_trait]
impl ChannelBackend for MemoryBackend {
    fn max_message_len(&self) -> usize {
        self.limit
    }

    async fn send(&self, channel: &ChannelId, text: &str) -> Result<MessageId> {
        self.check_online("send")?;
        self.check_len(text)?;
        let id = MessageId(self.next_id.fetch_add(1, Ordering::SeqCst));
        self.upsert(channel, id, text);
        Ok(id)
    }

    async fn edit(&self, channel: &ChannelId, id: MessageId, text: &str) -> Result<()> {
        self.check_online("edit")?;
        self.check_len(text)?;
        if self.get(channel, id).is_none() {
            return Err(Error::backend("edit", format!("message {} not found", id.0)));
        }
        self.upsert(channel, id, text);
        Ok(())
    }

    async fn delete(&self, channel: &ChannelId, id: MessageId) -> Result<()> {
        self.check_online("delete")?;
        if !self.remove(channel, id) {
            return Err(Error::backend("delete", format!("message {} not found", id.0)));
        }
        Ok(())
    }

    async fn history(&self, channel: &ChannelId, limit: usize) -> Result<Vec<StoredMessage>> {
        self.check_online("history")?;
        let map = self.channels.lock().unwrap_or_else(|e| e.into_inner());
        Ok(map
            .get(channel)
            .map(|msgs| msgs.iter().rev().take(limit).cloned().collect())
            .unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chan() -> ChannelId {
        ChannelId::new("@store")
    }

    #[tokio::test]
    async fn history_is_most_recent_first_and_bounded() {
        let b = MemoryBackend::default();
        for i in 0..5 {
            b.send(&chan(), &format!("m{i}")).await.unwrap();
        }
        let h = b.history(&chan(), 3).await.unwrap();
        let texts: Vec<_> = h.iter().map(|m| m.text.as_str()).collect();
        assert_eq!(texts, vec!["m4", "m3", "m2"]);
    }

    #[tokio::test]
    async fn rejects_oversized_bodies() {
        let b = MemoryBackend::new(10, usize::MAX);
        let err = b.send(&chan(), "01234567890").await.unwrap_err();
        assert!(matches!(err, Error::Capacity { len: 11, limit: 10 }));

        let id = b.send(&chan(), "ok").await.unwrap();
        assert!(b.edit(&chan(), id, "way too long text").await.is_err());
        assert_eq!(b.get(&chan(), id).as_deref(), Some("ok"));
    }

    #[tokio::test]
    async fn edits_keep_position_and_retain_drops_oldest() {
        let b = MemoryBackend::new(MAX_MESSAGE_LEN, 2);
        let a = b.send(&chan(), "a").await.unwrap();
        let _ = b.send(&chan(), "b").await.unwrap();
        b.edit(&chan(), a, "a2").await.unwrap();
        let h = b.history(&chan(), 10).await.unwrap();
        assert_eq!(h.last().map(|m| m.text.as_str()), Some("a2"));

        b.send(&chan(), "c").await.unwrap();
        assert_eq!(b.len(&chan()), 2);
        assert_eq!(b.get(&chan(), a), None);
    }

    #[tokio::test]
    async fn observed_ids_advance_the_allocator() {
        let b = MemoryBackend::default();
        b.upsert(&chan(), MessageId(40), "seen");
        let id = b.send(&chan(), "new").await.unwrap();
        assert_eq!(id, MessageId(41));
    }
}
