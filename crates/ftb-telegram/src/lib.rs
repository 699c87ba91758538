//! Telegram adapter (teloxide).
//!
//! Implements the `ftb-core` ports over the Bot API: the storage-channel backend,
//! the recipient messenger and the membership gate, plus the update dispatcher.

use async_trait::async_trait;

use teloxide::{
    prelude::*,
    types::{InlineKeyboardButton, InlineKeyboardMarkup, InputFile},
};

use tokio::time::sleep;
use tracing::warn;

pub mod backend;
pub mod handlers;
pub mod membership;
pub mod router;

use ftb_core::{
    domain::{ChatId, MessageId, MessageRef},
    errors::Error,
    messaging::{
        port::MessagingPort,
        types::{ButtonAction, InlineKeyboard, MessagingCapabilities},
    },
    store::{FileRecord, FileType, MAX_CAPTION_LEN},
    Result,
};

pub use backend::TelegramBackend;
pub use membership::TelegramMembership;

pub(crate) fn tg_chat(chat_id: ChatId) -> teloxide::types::ChatId {
    teloxide::types::ChatId(chat_id.0)
}

pub(crate) fn tg_msg_id(message_id: MessageId) -> teloxide::types::MessageId {
    teloxide::types::MessageId(message_id.0)
}

/// Run a Bot API request, honouring one `RetryAfter` before giving up.
pub(crate) async fn with_retry<T, Fut>(
    mut op: impl FnMut() -> Fut,
) -> std::result::Result<T, teloxide::RequestError>
where
    Fut: std::future::IntoFuture<Output = std::result::Result<T, teloxide::RequestError>>,
    Fut::IntoFuture: Send,
{
    const MAX_RETRIES: usize = 1;
    let mut attempts = 0usize;
    loop {
        match op().await {
            Ok(v) => return Ok(v),
            Err(teloxide::RequestError::RetryAfter(d)) if attempts < MAX_RETRIES => {
                attempts += 1;
                warn!(wait = ?d, "telegram flood control, retrying");
                sleep(d).await;
            }
            Err(e) => return Err(e),
        }
    }
}

#[derive(Clone)]
pub struct TelegramMessenger {
    bot: Bot,
}

impl TelegramMessenger {
    pub fn new(bot: Bot) -> Self {
        Self { bot }
    }

    fn map_err(e: teloxide::RequestError) -> Error {
        Error::External(format!("telegram error: {e}"))
    }

    fn markup(keyboard: InlineKeyboard) -> InlineKeyboardMarkup {
        let rows: Vec<Vec<InlineKeyboardButton>> = keyboard
            .buttons
            .into_iter()
            .filter_map(|b| match b.action {
                ButtonAction::Callback(data) => {
                    Some(vec![InlineKeyboardButton::callback(b.label, data)])
                }
                ButtonAction::Url(raw) => match reqwest::Url::parse(&raw) {
                    Ok(url) => Some(vec![InlineKeyboardButton::url(b.label, url)]),
                    Err(e) => {
                        warn!(url = %raw, error = %e, "dropping button with invalid url");
                        None
                    }
                },
            })
            .collect();
        InlineKeyboardMarkup::new(rows)
    }

    fn message_ref(chat_id: ChatId, msg: &Message) -> MessageRef {
        MessageRef {
            chat_id,
            message_id: MessageId(msg.id.0),
        }
    }
}

#[async_trait]
impl MessagingPort for TelegramMessenger {
    fn capabilities(&self) -> MessagingCapabilities {
        MessagingCapabilities {
            supports_edit: true,
            supports_inline_keyboards: true,
            max_message_len: 4096,
            max_caption_len: MAX_CAPTION_LEN,
        }
    }

    async fn send_text(&self, chat_id: ChatId, text: &str) -> Result<MessageRef> {
        let msg = with_retry(|| self.bot.send_message(tg_chat(chat_id), text.to_string()))
            .await
            .map_err(Self::map_err)?;
        Ok(Self::message_ref(chat_id, &msg))
    }

    async fn edit_text(&self, msg: MessageRef, text: &str) -> Result<()> {
        with_retry(|| {
            self.bot.edit_message_text(
                tg_chat(msg.chat_id),
                tg_msg_id(msg.message_id),
                text.to_string(),
            )
        })
        .await
        .map_err(Self::map_err)?;
        Ok(())
    }

    async fn delete_message(&self, msg: MessageRef) -> Result<()> {
        with_retry(|| {
            self.bot
                .delete_message(tg_chat(msg.chat_id), tg_msg_id(msg.message_id))
        })
        .await
        .map_err(Self::map_err)?;
        Ok(())
    }

    async fn send_file(
        &self,
        chat_id: ChatId,
        file: &FileRecord,
        caption: &str,
    ) -> Result<MessageRef> {
        let chat = tg_chat(chat_id);
        let input = InputFile::file_id(file.file_id.clone());
        let caption = caption.to_string();

        let sent = match file.file_type {
            FileType::Document => {
                with_retry(|| {
                    self.bot
                        .send_document(chat, input.clone())
                        .caption(caption.clone())
                })
                .await
            }
            FileType::Photo => {
                with_retry(|| {
                    self.bot
                        .send_photo(chat, input.clone())
                        .caption(caption.clone())
                })
                .await
            }
            FileType::Video => {
                with_retry(|| {
                    self.bot
                        .send_video(chat, input.clone())
                        .caption(caption.clone())
                })
                .await
            }
            FileType::Audio => {
                with_retry(|| {
                    self.bot
                        .send_audio(chat, input.clone())
                        .caption(caption.clone())
                })
                .await
            }
        };

        let msg = sent.map_err(Self::map_err)?;
        Ok(Self::message_ref(chat_id, &msg))
    }

    async fn send_inline_keyboard(
        &self,
        chat_id: ChatId,
        text: &str,
        keyboard: InlineKeyboard,
    ) -> Result<MessageRef> {
        let markup = Self::markup(keyboard);
        let msg = with_retry(|| {
            self.bot
                .send_message(tg_chat(chat_id), text.to_string())
                .reply_markup(markup.clone())
        })
        .await
        .map_err(Self::map_err)?;
        Ok(Self::message_ref(chat_id, &msg))
    }

    async fn answer_callback_query(&self, callback_id: &str, text: Option<&str>) -> Result<()> {
        with_retry(|| {
            let mut req = self.bot.answer_callback_query(callback_id.to_string());
            if let Some(t) = text {
                req = req.text(t.to_string());
            }
            req
        })
        .await
        .map_err(Self::map_err)?;
        Ok(())
    }
}
