//! Storage-channel backend port.
//!
//! The record store only ever talks to this trait: whole-message send/edit/delete
//! plus a bounded, most-recent-first history listing.

pub mod memory;

use async_trait::async_trait;

use crate::{
    domain::{ChannelId, MessageId},
    Result,
};

pub use memory::MemoryBackend;

/// Telegram's hard cap on a message body.
pub const MAX_MESSAGE_LEN: usize = 4096;

/// A message as listed by [`ChannelBackend::history`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StoredMessage {
    pub id: MessageId,
    pub text: String,
}

#[async_trait]
pub trait ChannelBackend: Send + Sync {
    /// Maximum body length in characters; longer sends/edits are rejected.
    fn max_message_len(&self) -> usize;

    async fn send(&self, channel: &ChannelId, text: &str) -> Result<MessageId>;
    async fn edit(&self, channel: &ChannelId, id: MessageId, text: &str) -> Result<()>;
    async fn delete(&self, channel: &ChannelId, id: MessageId) -> Result<()>;

    /// Most recent first, at most `limit` entries.
    async fn history(&self, channel: &ChannelId, limit: usize) -> Result<Vec<StoredMessage>>;
}

/// Message length as the backend counts it.
pub fn text_len(text: &str) -> usize {
    text.chars().count()
}
