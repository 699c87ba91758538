use std::sync::Arc;

use teloxide::prelude::*;

use crate::router::AppState;

/// Storage channel posts keep the history journal and the timer registry current.
pub async fn handle_channel_post(msg: Message, state: Arc<AppState>) -> ResponseResult<()> {
    if let Some(body) = state.backend.observe(&msg) {
        state.store.observe_record(&body);
    }
    Ok(())
}
