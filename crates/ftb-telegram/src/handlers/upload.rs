use std::sync::Arc;

use teloxide::prelude::*;
use tracing::debug;

use ftb_core::{
    domain::{ChatId, UserId},
    store::{FileRecord, FileType},
};

use crate::router::AppState;

use super::reply;

/// The storable part of an incoming media message. Photos keep the largest size.
pub(crate) fn extract_file(msg: &Message) -> Option<FileRecord> {
    let (file_id, file_type) = if let Some(doc) = msg.document() {
        (doc.file.id.clone(), FileType::Document)
    } else if let Some(photo) = msg.photo().and_then(|sizes| sizes.last()) {
        (photo.file.id.clone(), FileType::Photo)
    } else if let Some(video) = msg.video() {
        (video.file.id.clone(), FileType::Video)
    } else if let Some(audio) = msg.audio() {
        (audio.file.id.clone(), FileType::Audio)
    } else {
        return None;
    };
    Some(FileRecord::new(
        file_id,
        file_type,
        msg.caption().unwrap_or_default(),
    ))
}

pub async fn handle_media(msg: Message, state: Arc<AppState>) -> ResponseResult<()> {
    let Some(user) = msg.from() else {
        return Ok(());
    };
    let Some(file) = extract_file(&msg) else {
        return Ok(());
    };
    let user_id = UserId(user.id.0 as i64);
    let chat_id = ChatId(msg.chat.id.0);

    let file_type = file.file_type;
    match state.pending.push_file(user_id, file) {
        Some(count) => {
            debug!(admin = user_id.0, %file_type, count, "file buffered");
            reply(&state, chat_id, &format!("✅ File received (total: {count})")).await;
        }
        None => {
            reply(
                &state,
                chat_id,
                "❌ No upload in progress. Start one with /upload <id>.",
            )
            .await;
        }
    }
    Ok(())
}
