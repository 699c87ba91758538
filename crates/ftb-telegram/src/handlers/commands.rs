use std::sync::Arc;

use teloxide::prelude::*;
use tracing::{error, info};

use ftb_core::{
    deeplink::parse_start_payload,
    delivery::format_duration,
    domain::{CategoryId, ChatId, UserId},
    timers::parse_seconds,
};

use crate::router::AppState;

use super::{is_admin, link_for, reply, serve_category, timer_label};

fn parse_command(text: &str) -> (String, String) {
    // Telegram may send `/cmd@botname arg1 ...`
    let mut parts = text.trim().splitn(2, char::is_whitespace);
    let first = parts.next().unwrap_or("").trim();
    let rest = parts.next().unwrap_or("").trim().to_string();

    let cmd = first
        .trim_start_matches('/')
        .split('@')
        .next()
        .unwrap_or("")
        .to_lowercase();

    (cmd, rest)
}

pub async fn handle_command(msg: Message, state: Arc<AppState>) -> ResponseResult<()> {
    let Some(user) = msg.from() else {
        return Ok(());
    };
    let Some(text) = msg.text() else {
        return Ok(());
    };

    let user_id = UserId(user.id.0 as i64);
    let chat_id = ChatId(msg.chat.id.0);
    let (cmd, arg) = parse_command(text);

    if cmd == "start" {
        start(&state, chat_id, user_id, &arg).await;
        return Ok(());
    }

    if !is_admin(&state, user_id) {
        reply(&state, chat_id, "❌ Access denied.").await;
        return Ok(());
    }

    match cmd.as_str() {
        "new_category" => new_category(&state, chat_id, user_id, &arg).await,
        "upload" => upload(&state, chat_id, user_id, &arg).await,
        "finish_upload" => finish_upload(&state, chat_id, user_id).await,
        "categories" => categories(&state, chat_id).await,
        "timer" => global_timer(&state, chat_id, &arg).await,
        "cancel" => cancel(&state, chat_id, user_id).await,
        "status" => status(&state, chat_id, user_id).await,
        _ => reply(&state, chat_id, "Unknown command. Send /start for help.").await,
    }
    Ok(())
}

async fn start(state: &AppState, chat_id: ChatId, user_id: UserId, arg: &str) {
    if let Some(id) = parse_start_payload(arg) {
        serve_category(state, chat_id, user_id, &id).await;
        return;
    }

    if !is_admin(state, user_id) {
        reply(state, chat_id, "👋 Hi! Use a category link to receive files.").await;
        return;
    }

    let global = state.store.timers().global();
    let body = format!(
        "👋 Hello admin!\n\n\
Commands:\n\
/new_category <name> - create a category\n\
/upload <id> - start adding files to a category\n\
/finish_upload - save the files sent since /upload\n\
/categories - list categories and their links\n\
/timer <seconds> - set the global deletion timer (current: {})\n\
/status - delivery and storage status\n\
/cancel - abort the current operation",
        timer_label(global)
    );
    reply(state, chat_id, &body).await;
}

async fn new_category(state: &AppState, chat_id: ChatId, user_id: UserId, name: &str) {
    if name.is_empty() {
        reply(
            state,
            chat_id,
            "Please give the category a name.\nExample: /new_category Lecture notes",
        )
        .await;
        return;
    }

    match state.store.add_category(name, user_id).await {
        Ok(id) => {
            info!(category = %id, admin = user_id.0, "category created");
            let body = format!(
                "✅ Category '{name}' created!\n\n🔗 Link:\n{}\n\nCurrent timer: {}\nTo add files:\n/upload {id}",
                link_for(state, &id),
                timer_label(state.store.timers().resolve(&id)),
            );
            reply(state, chat_id, &body).await;
        }
        Err(e) => {
            error!(admin = user_id.0, error = %e, "category creation failed");
            reply(state, chat_id, "❌ Could not create the category.").await;
        }
    }
}

async fn upload(state: &AppState, chat_id: ChatId, user_id: UserId, arg: &str) {
    let Some(raw) = arg.split_whitespace().next() else {
        reply(
            state,
            chat_id,
            "Please give the category id.\nExample: /upload a1b2c3d4",
        )
        .await;
        return;
    };
    let id = CategoryId::from(raw);
    if state.store.get_category(&id).await.is_none() {
        reply(state, chat_id, "❌ Category not found.").await;
        return;
    }

    state.pending.begin_upload(user_id, id);
    reply(
        state,
        chat_id,
        "📤 Upload mode is on. Send the files.\nTo finish: /finish_upload\nTo cancel: /cancel",
    )
    .await;
}

async fn finish_upload(state: &AppState, chat_id: ChatId, user_id: UserId) {
    let Some(upload) = state.pending.take_upload(user_id) else {
        reply(state, chat_id, "❌ No upload in progress.").await;
        return;
    };
    if upload.files.is_empty() {
        reply(state, chat_id, "❌ No files were received.").await;
        return;
    }

    let report = match upload.commit(state.store.as_ref()).await {
        Ok(r) => r,
        Err(e) => {
            error!(category = %upload.category, error = %e, "upload commit failed");
            reply(state, chat_id, "❌ Saving the files failed.").await;
            return;
        }
    };
    if report.category_missing {
        reply(state, chat_id, "❌ The category no longer exists.").await;
        return;
    }

    let id = &upload.category;
    let name = state
        .store
        .get_category(id)
        .await
        .map(|c| c.name)
        .unwrap_or_else(|| id.to_string());
    let mut body = format!(
        "✅ {} file(s) saved!\n\n🔗 Link:\n{}\n📂 Category: {name}\n⏱ Timer: {}",
        report.added,
        link_for(state, id),
        timer_label(state.store.timers().resolve(id)),
    );
    if report.rejected > 0 {
        body.push_str(&format!(
            "\n\n⚠️ {} file(s) did not fit into the category's storage message.",
            report.rejected
        ));
    }
    reply(state, chat_id, &body).await;
}

async fn categories(state: &AppState, chat_id: ChatId) {
    let list = state.store.get_categories().await;
    if list.is_empty() {
        reply(state, chat_id, "📂 There are no categories yet.").await;
        return;
    }

    let timers = state.store.timers();
    let mut body = String::from("📁 Categories:\n");
    for c in &list {
        body.push_str(&format!(
            "\n• {} [ID: {}] - ⏱ {}\n  {}\n",
            c.name,
            c.id,
            timer_label(timers.resolve(&c.id)),
            link_for(state, &c.id),
        ));
    }
    body.push_str(&format!("\n⏱ Global timer: {}", timer_label(timers.global())));
    reply(state, chat_id, &body).await;
}

async fn global_timer(state: &AppState, chat_id: ChatId, arg: &str) {
    let Some(seconds) = parse_seconds(arg) else {
        reply(
            state,
            chat_id,
            "❌ Please give the time in seconds.\nExample: /timer 3600",
        )
        .await;
        return;
    };

    match state.store.save_global_timer(seconds).await {
        Ok(()) => {
            let body = format!(
                "✅ Global timer set to {}.\nIt applies to every category without its own timer.",
                timer_label(seconds)
            );
            reply(state, chat_id, &body).await;
        }
        Err(e) => {
            error!(seconds, error = %e, "saving global timer failed");
            reply(
                state,
                chat_id,
                "⚠️ The timer is active now but could not be saved to storage.",
            )
            .await;
        }
    }
}

async fn cancel(state: &AppState, chat_id: ChatId, user_id: UserId) {
    state.pending.clear(user_id);
    state.scheduler().cancel(user_id).await;
    reply(state, chat_id, "❌ Operation cancelled.").await;
}

async fn status(state: &AppState, chat_id: ChatId, user_id: UserId) {
    let categories = state.store.get_categories().await.len();
    let sessions = state.scheduler().active_count().await;
    let mut body = format!(
        "📊 Status\n\nCategories reachable: {categories}\nStorage channels: {}\nActive delivery timers: {sessions}\nGlobal timer: {}",
        state.store.channels().len(),
        timer_label(state.store.timers().global()),
    );
    if let Some(own) = state.scheduler().status(user_id).await {
        body.push_str(&format!(
            "\n\nYour delivered files expire in {} ({} UTC).",
            format_duration(own.remaining_seconds),
            own.expires_at.format("%Y-%m-%d %H:%M:%S"),
        ));
    }
    reply(state, chat_id, &body).await;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn commands_strip_bot_suffix_and_split_args() {
        assert_eq!(
            parse_command("/new_category@files_bot  Lecture notes "),
            ("new_category".to_string(), "Lecture notes".to_string())
        );
        assert_eq!(
            parse_command("/start cat_a1b2c3d4"),
            ("start".to_string(), "cat_a1b2c3d4".to_string())
        );
        assert_eq!(parse_command("/Cancel"), ("cancel".to_string(), String::new()));
    }
}
