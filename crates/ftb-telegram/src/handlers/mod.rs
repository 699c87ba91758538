//! Telegram update handlers.
//!
//! Each handler is a small adapter that:
//! - checks who is asking (admin allow-list, rate limit, channel membership)
//! - calls into `ftb-core` (record store, distributor, pending actions)
//! - reports the outcome through the throttled messenger

use std::sync::Arc;

use teloxide::{
    prelude::*,
    types::{CallbackQuery, Message},
};
use tracing::{debug, error};

use ftb_core::{
    deeplink::category_link,
    distribute::DeliveryOutcome,
    domain::{CategoryId, ChatId, UserId},
    membership::missing_channels,
    messaging::types::{CallbackAction, InlineButton, InlineKeyboard},
    security::is_authorized,
};

use crate::router::AppState;

mod callback;
mod channel;
mod commands;
mod text;
mod upload;

pub async fn handle_callback(q: CallbackQuery, state: Arc<AppState>) -> ResponseResult<()> {
    callback::handle_callback(q, state).await
}

pub async fn handle_channel_post(msg: Message, state: Arc<AppState>) -> ResponseResult<()> {
    channel::handle_channel_post(msg, state).await
}

pub async fn handle_message(msg: Message, state: Arc<AppState>) -> ResponseResult<()> {
    if !msg.chat.is_private() {
        return Ok(());
    }
    let Some(user) = msg.from() else {
        return Ok(());
    };
    let user_id = UserId(user.id.0 as i64);
    let chat_id = ChatId(msg.chat.id.0);

    if let Some(text) = msg.text() {
        if text.starts_with('/') {
            return commands::handle_command(msg.clone(), state).await;
        }
    }

    if !is_admin(&state, user_id) {
        reply(&state, chat_id, "👋 Use a category link to receive files.").await;
        return Ok(());
    }

    if upload::extract_file(&msg).is_some() {
        return upload::handle_media(msg, state).await;
    }
    if msg.text().is_some() {
        return text::handle_text(msg, state).await;
    }

    debug!(user = user_id.0, "unsupported admin message ignored");
    Ok(())
}

pub(crate) fn is_admin(state: &AppState, user: UserId) -> bool {
    is_authorized(Some(user), &state.cfg.admin_ids)
}

/// Fire-and-forget reply; failures are only logged.
pub(crate) async fn reply(state: &AppState, chat_id: ChatId, text: &str) {
    for chunk in split_message(text, state.messenger.capabilities().max_message_len) {
        if let Err(e) = state.messenger.send_text(chat_id, &chunk).await {
            error!(chat = chat_id.0, error = %e, "reply failed");
            return;
        }
    }
}

pub(crate) fn link_for(state: &AppState, id: &CategoryId) -> String {
    category_link(state.bot_username.as_deref(), state.cfg.bot_id(), id)
}

pub(crate) fn timer_label(seconds: u64) -> String {
    if seconds == 0 {
        "off (files are permanent)".to_string()
    } else {
        format!("{seconds} seconds")
    }
}

/// Admin view of one category: summary plus the action keyboard.
pub(crate) async fn show_admin_menu(state: &AppState, chat_id: ChatId, id: &CategoryId) {
    let Some(category) = state.store.get_category(id).await else {
        reply(state, chat_id, "❌ Category not found.").await;
        return;
    };

    let timer = state.store.timers().resolve(id);
    let text = format!(
        "📂 Category: {}\n📦 Files: {}\n⏱ Timer: {}\n🔗 {}\n\nChoose an action:",
        category.name,
        category.files.len(),
        timer_label(timer),
        link_for(state, id),
    );
    if let Err(e) = state
        .messenger
        .send_inline_keyboard(chat_id, &text, InlineKeyboard::category_admin(id))
        .await
    {
        error!(category = %id, error = %e, "failed to show admin menu");
    }
}

/// Recipient path of a category link: rate limit, membership gate, delivery.
pub(crate) async fn serve_category(
    state: &AppState,
    chat_id: ChatId,
    user_id: UserId,
    id: &CategoryId,
) {
    if is_admin(state, user_id) {
        show_admin_menu(state, chat_id, id).await;
        return;
    }

    let (allowed, retry_after) = state.rate_limiter.lock().await.check(user_id);
    if !allowed {
        let wait = retry_after.map(|d| d.as_secs().max(1)).unwrap_or(1);
        reply(
            state,
            chat_id,
            &format!("⏳ Too many requests. Try again in {wait} seconds."),
        )
        .await;
        return;
    }

    let missing = missing_channels(
        &*state.membership,
        &state.cfg.follow_channels,
        user_id,
        state.retry_policy(),
    )
    .await;
    if !missing.is_empty() {
        prompt_to_join(state, chat_id, id, &missing).await;
        return;
    }

    match state.distributor.deliver(chat_id, user_id, id).await {
        Ok(DeliveryOutcome::Empty) => {
            reply(state, chat_id, "❌ There are no files to show.").await;
        }
        Ok(_) => {}
        Err(e) => {
            error!(category = %id, user = user_id.0, error = %e, "delivery failed");
            reply(state, chat_id, "❌ Something went wrong while sending the files.").await;
        }
    }
}

async fn prompt_to_join(
    state: &AppState,
    chat_id: ChatId,
    id: &CategoryId,
    missing: &[ftb_core::domain::ChannelId],
) {
    let mut keyboard = InlineKeyboard::default();
    let mut text = String::from("🔒 Join these channels first, then tap the check button:\n");
    for channel in missing {
        text.push_str(&format!("\n• {channel}"));
        if let Some(url) = channel.public_link() {
            keyboard.push(InlineButton::url(format!("Join {channel}"), url));
        }
    }
    keyboard.push(InlineButton::callback(
        "✅ I've joined",
        CallbackAction::CheckMembership(id.clone()),
    ));

    if let Err(e) = state
        .messenger
        .send_inline_keyboard(chat_id, &text, keyboard)
        .await
    {
        error!(chat = chat_id.0, error = %e, "failed to send join prompt");
    }
}

/// Split on line boundaries so each chunk fits in one message.
pub(crate) fn split_message(text: &str, limit: usize) -> Vec<String> {
    let limit = limit.max(1);
    if text.chars().count() <= limit {
        return vec![text.to_string()];
    }

    let mut out = Vec::new();
    let mut chunk = String::new();
    let mut chunk_len = 0usize;
    for line in text.split('\n') {
        let mut line_chars: Vec<char> = line.chars().collect();
        // Hard-wrap lines that are longer than a whole message.
        while line_chars.len() > limit {
            if !chunk.is_empty() {
                out.push(std::mem::take(&mut chunk));
                chunk_len = 0;
            }
            let rest = line_chars.split_off(limit);
            out.push(line_chars.into_iter().collect());
            line_chars = rest;
        }

        let len = line_chars.len();
        let sep = usize::from(!chunk.is_empty());
        if chunk_len + sep + len > limit {
            out.push(std::mem::take(&mut chunk));
            chunk_len = 0;
        }
        if !chunk.is_empty() {
            chunk.push('\n');
            chunk_len += 1;
        }
        chunk.extend(line_chars);
        chunk_len += len;
    }
    if !chunk.is_empty() {
        out.push(chunk);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn short_messages_are_not_split() {
        assert_eq!(split_message("a\nb", 10), vec!["a\nb".to_string()]);
    }

    #[test]
    fn long_messages_split_on_lines_within_limit() {
        let text = ["aaaa", "bbbb", "cccc"].join("\n");
        let chunks = split_message(&text, 9);
        assert_eq!(chunks, vec!["aaaa\nbbbb".to_string(), "cccc".to_string()]);

        let long = "x".repeat(25);
        let chunks = split_message(&long, 10);
        assert_eq!(chunks.len(), 3);
        assert!(chunks.iter().all(|c| c.chars().count() <= 10));
        assert_eq!(chunks.concat(), long);
    }

    #[test]
    fn zero_timer_reads_as_permanent() {
        assert_eq!(timer_label(0), "off (files are permanent)");
        assert_eq!(timer_label(90), "90 seconds");
    }
}
