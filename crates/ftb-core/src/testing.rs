//! Test doubles shared by the unit tests of this crate.

use std::{
    collections::HashSet,
    sync::{
        atomic::{AtomicBool, Ordering},
        Mutex,
    },
};

use async_trait::async_trait;

use crate::{
    domain::{ChatId, MessageId, MessageRef},
    errors::Error,
    messaging::{
        port::MessagingPort,
        types::{InlineKeyboard, MessagingCapabilities},
    },
    store::FileRecord,
    Result,
};

/// Records every outbound call; ids are allocated from one counter.
#[derive(Default)]
pub(crate) struct FakeMessenger {
    next_id: Mutex<i32>,
    sends: Mutex<Vec<(MessageRef, String)>>,
    files: Mutex<Vec<(MessageRef, String, String)>>,
    edits: Mutex<Vec<(MessageRef, String)>>,
    deletes: Mutex<Vec<MessageRef>>,
    failing_deletes: Mutex<HashSet<MessageId>>,
    fail_files: AtomicBool,
}

impl FakeMessenger {
    fn alloc(&self, chat_id: ChatId) -> MessageRef {
        let mut guard = self.next_id.lock().unwrap();
        if *guard == 0 {
            *guard = 1;
        }
        let id = *guard;
        *guard += 1;
        MessageRef {
            chat_id,
            message_id: MessageId(id),
        }
    }

    pub(crate) fn sent_texts(&self) -> Vec<String> {
        self.sends
            .lock()
            .unwrap()
            .iter()
            .map(|(_, t)| t.clone())
            .collect()
    }

    pub(crate) fn sent(&self) -> Vec<(MessageRef, String)> {
        self.sends.lock().unwrap().clone()
    }

    /// `(message, file_id, caption)` per delivered file.
    pub(crate) fn sent_files(&self) -> Vec<(MessageRef, String, String)> {
        self.files.lock().unwrap().clone()
    }

    pub(crate) fn edits(&self) -> Vec<(MessageRef, String)> {
        self.edits.lock().unwrap().clone()
    }

    pub(crate) fn deletes(&self) -> Vec<MessageRef> {
        self.deletes.lock().unwrap().clone()
    }

    pub(crate) fn fail_delete_of(&self, id: MessageId) {
        self.failing_deletes.lock().unwrap().insert(id);
    }

    pub(crate) fn fail_file_sends(&self, fail: bool) {
        self.fail_files.store(fail, Ordering::SeqCst);
    }
}

#[async_trait]
impl MessagingPort for FakeMessenger {
    fn capabilities(&self) -> MessagingCapabilities {
        MessagingCapabilities {
            supports_edit: true,
            supports_inline_keyboards: true,
            max_message_len: 4096,
            max_caption_len: 1024,
        }
    }

    async fn send_text(&self, chat_id: ChatId, text: &str) -> Result<MessageRef> {
        let msg = self.alloc(chat_id);
        self.sends.lock().unwrap().push((msg, text.to_string()));
        Ok(msg)
    }

    async fn edit_text(&self, msg: MessageRef, text: &str) -> Result<()> {
        self.edits.lock().unwrap().push((msg, text.to_string()));
        Ok(())
    }

    async fn delete_message(&self, msg: MessageRef) -> Result<()> {
        if self.failing_deletes.lock().unwrap().contains(&msg.message_id) {
            return Err(Error::External("message can't be deleted".to_string()));
        }
        self.deletes.lock().unwrap().push(msg);
        Ok(())
    }

    async fn send_file(
        &self,
        chat_id: ChatId,
        file: &FileRecord,
        caption: &str,
    ) -> Result<MessageRef> {
        if self.fail_files.load(Ordering::SeqCst) {
            return Err(Error::External("wrong file identifier".to_string()));
        }
        let msg = self.alloc(chat_id);
        self.files
            .lock()
            .unwrap()
            .push((msg, file.file_id.clone(), caption.to_string()));
        Ok(msg)
    }

    async fn send_inline_keyboard(
        &self,
        chat_id: ChatId,
        text: &str,
        _keyboard: InlineKeyboard,
    ) -> Result<MessageRef> {
        let msg = self.alloc(chat_id);
        self.sends.lock().unwrap().push((msg, text.to_string()));
        Ok(msg)
    }

    async fn answer_callback_query(&self, _callback_id: &str, _text: Option<&str>) -> Result<()> {
        Ok(())
    }
}
