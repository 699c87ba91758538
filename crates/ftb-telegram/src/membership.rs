use async_trait::async_trait;
use teloxide::prelude::*;

use ftb_core::{
    domain::{ChannelId, UserId},
    errors::Error,
    membership::MembershipGate,
    Result,
};

use crate::{backend::TelegramBackend, with_retry};

/// Membership checks via `getChatMember`. The bot must be an admin of each channel.
#[derive(Clone)]
pub struct TelegramMembership {
    bot: Bot,
}

impl TelegramMembership {
    pub fn new(bot: Bot) -> Self {
        Self { bot }
    }
}

#[async_trait]
impl MembershipGate for TelegramMembership {
    async fn is_member(&self, channel: &ChannelId, user: UserId) -> Result<bool> {
        let Ok(raw) = u64::try_from(user.0) else {
            return Ok(false);
        };
        let member = with_retry(|| {
            self.bot
                .get_chat_member(TelegramBackend::recipient(channel), teloxide::types::UserId(raw))
        })
        .await
        .map_err(|e| Error::External(format!("getChatMember {channel}: {e}")))?;
        Ok(member.kind.is_present())
    }
}
