use std::sync::Arc;

use teloxide::prelude::*;
use tracing::{debug, error, info};

use ftb_core::{
    domain::{ChatId, MessageId, MessageRef, UserId},
    messaging::types::CallbackAction,
};

use crate::router::AppState;

use super::{is_admin, reply, serve_category, timer_label};

pub async fn handle_callback(q: CallbackQuery, state: Arc<AppState>) -> ResponseResult<()> {
    let cb_id = q.id.clone();
    let origin = q.message.as_ref().map(|m| MessageRef {
        chat_id: ChatId(m.chat.id.0),
        message_id: MessageId(m.id.0),
    });
    let action = q.data.as_deref().and_then(CallbackAction::parse);

    // Always answer the callback query, even when nothing else happens.
    let _ = state.messenger.answer_callback_query(&cb_id, None).await;

    let (Some(origin), Some(action)) = (origin, action) else {
        debug!(data = ?q.data, "ignoring callback without message or known action");
        return Ok(());
    };
    let user_id = UserId(q.from.id.0 as i64);

    if action.requires_admin() && !is_admin(&state, user_id) {
        edit_or_reply(&state, origin, "❌ Access denied.").await;
        return Ok(());
    }
    debug!(user = user_id.0, category = %action.category(), data = ?q.data, "callback");

    match action {
        CallbackAction::CheckMembership(id) => {
            serve_category(&state, origin.chat_id, user_id, &id).await;
        }
        CallbackAction::View(id) => {
            serve_admin_view(&state, origin.chat_id, user_id, &id).await;
        }
        CallbackAction::AddFiles(id) => {
            state.pending.begin_upload(user_id, id);
            edit_or_reply(
                &state,
                origin,
                "📤 Send the files.\nTo finish: /finish_upload\nTo cancel: /cancel",
            )
            .await;
        }
        CallbackAction::SetTimer(id) => {
            let timers = state.store.timers();
            let body = format!(
                "⏱ Send the timer for this category in seconds (0 = permanent).\nCurrent: {}\nGlobal: {}",
                timer_label(timers.resolve(&id)),
                timer_label(timers.global()),
            );
            state.pending.await_timer(user_id, id);
            edit_or_reply(&state, origin, &body).await;
        }
        CallbackAction::Delete(id) => match state.store.delete_category(&id).await {
            Ok(true) => {
                info!(category = %id, admin = user_id.0, "category deleted via menu");
                edit_or_reply(&state, origin, "✅ Category deleted.").await;
            }
            Ok(false) => edit_or_reply(&state, origin, "❌ Category not found.").await,
            Err(e) => {
                error!(category = %id, error = %e, "category deletion failed");
                edit_or_reply(&state, origin, "❌ Deleting the category failed.").await;
            }
        },
    }
    Ok(())
}

/// "View files" sends the category to the admin exactly as a recipient gets it.
async fn serve_admin_view(
    state: &AppState,
    chat_id: ChatId,
    user_id: UserId,
    id: &ftb_core::domain::CategoryId,
) {
    match state.distributor.deliver(chat_id, user_id, id).await {
        Ok(ftb_core::distribute::DeliveryOutcome::Empty) => {
            reply(state, chat_id, "❌ There are no files to show.").await;
        }
        Ok(_) => {}
        Err(e) => {
            error!(category = %id, error = %e, "admin view failed");
            reply(state, chat_id, "❌ Something went wrong while sending the files.").await;
        }
    }
}

async fn edit_or_reply(state: &AppState, origin: MessageRef, text: &str) {
    if state.messenger.edit_text(origin, text).await.is_err() {
        reply(state, origin.chat_id, text).await;
    }
}
