use async_trait::async_trait;

use crate::{
    domain::{ChatId, MessageRef},
    messaging::types::{InlineKeyboard, MessagingCapabilities},
    store::FileRecord,
    Result,
};

/// Outbound messenger port used by delivery and the bot handlers.
///
/// Text is always sent as plain text: category names and captions are user
/// content and must not be interpreted as markup.
#[async_trait]
pub trait MessagingPort: Send + Sync {
    fn capabilities(&self) -> MessagingCapabilities;

    async fn send_text(&self, chat_id: ChatId, text: &str) -> Result<MessageRef>;
    async fn edit_text(&self, msg: MessageRef, text: &str) -> Result<()>;
    async fn delete_message(&self, msg: MessageRef) -> Result<()>;

    /// Re-send a stored file by its platform file id.
    async fn send_file(&self, chat_id: ChatId, file: &FileRecord, caption: &str)
        -> Result<MessageRef>;

    async fn send_inline_keyboard(
        &self,
        chat_id: ChatId,
        text: &str,
        keyboard: InlineKeyboard,
    ) -> Result<MessageRef>;

    async fn answer_callback_query(&self, callback_id: &str, text: Option<&str>) -> Result<()>;
}
