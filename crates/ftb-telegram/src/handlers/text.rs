use std::sync::Arc;

use teloxide::prelude::*;
use tracing::error;

use ftb_core::{
    domain::{ChatId, UserId},
    store::MutationOutcome,
    timers::parse_seconds,
};

use crate::router::AppState;

use super::{reply, timer_label};

/// Plain admin text: only meaningful while a category timer is awaited.
pub async fn handle_text(msg: Message, state: Arc<AppState>) -> ResponseResult<()> {
    let Some(user) = msg.from() else {
        return Ok(());
    };
    let Some(text) = msg.text() else {
        return Ok(());
    };
    let user_id = UserId(user.id.0 as i64);
    let chat_id = ChatId(msg.chat.id.0);

    let Some(id) = state.pending.timer_target(user_id) else {
        let hint = if state.pending.upload_in_progress(user_id) {
            "📤 Upload in progress: send files, then /finish_upload."
        } else {
            "Send /start for the list of commands."
        };
        reply(&state, chat_id, hint).await;
        return Ok(());
    };

    let Some(seconds) = parse_seconds(text) else {
        reply(&state, chat_id, "❌ Please send a whole number of seconds.").await;
        return Ok(());
    };
    state.pending.take_timer(user_id);

    match state.store.save_category_timer(&id, seconds).await {
        Ok(MutationOutcome::Applied) => {
            let name = state
                .store
                .get_category(&id)
                .await
                .map(|c| c.name)
                .unwrap_or_else(|| id.to_string());
            let body = format!(
                "✅ Timer for '{name}' set to {}.\nIt applies to this category only.",
                timer_label(seconds)
            );
            reply(&state, chat_id, &body).await;
        }
        Ok(MutationOutcome::NotFound) => {
            reply(&state, chat_id, "❌ Category not found.").await;
        }
        Ok(MutationOutcome::TooLarge) => {
            reply(
                &state,
                chat_id,
                "❌ The category's storage message is full; the timer was not saved.",
            )
            .await;
        }
        Err(e) => {
            error!(category = %id, seconds, error = %e, "saving category timer failed");
            reply(&state, chat_id, "❌ Saving the timer failed.").await;
        }
    }
    Ok(())
}
