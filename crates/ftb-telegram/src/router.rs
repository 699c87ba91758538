use std::sync::Arc;

use teloxide::{dispatching::Dispatcher, dptree, prelude::*};

use tokio::sync::Mutex;
use tracing::{info, warn};

use ftb_core::messaging::throttled::{ThrottleConfig, ThrottledMessenger};
use ftb_core::{
    config::Config,
    delivery::DeliveryScheduler,
    distribute::Distributor,
    membership::{MembershipGate, RetryPolicy},
    messaging::port::MessagingPort,
    pending::PendingActions,
    security::RateLimiter,
    store::RecordStore,
    timers::TimerRegistry,
};

use crate::handlers;
use crate::{TelegramBackend, TelegramMembership, TelegramMessenger};

#[derive(Clone)]
pub struct AppState {
    pub cfg: Arc<Config>,
    pub bot_username: Option<String>,
    pub backend: Arc<TelegramBackend>,
    pub store: Arc<RecordStore>,
    pub messenger: Arc<dyn MessagingPort>,
    pub distributor: Arc<Distributor>,
    pub pending: Arc<PendingActions>,
    pub membership: Arc<dyn MembershipGate>,
    pub rate_limiter: Arc<Mutex<RateLimiter>>,
}

impl AppState {
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            attempts: self.cfg.membership_retries,
            delay: self.cfg.membership_retry_delay,
        }
    }

    pub fn scheduler(&self) -> &DeliveryScheduler {
        self.distributor.scheduler()
    }
}

pub async fn run_polling(cfg: Arc<Config>) -> anyhow::Result<()> {
    let bot = Bot::new(cfg.bot_token.clone());

    let bot_username = match bot.get_me().await {
        Ok(me) => {
            info!(username = %me.username(), "ftb started");
            me.username.clone()
        }
        Err(e) => {
            warn!(error = %e, "getMe failed; links will use the numeric bot id");
            None
        }
    };
    info!(
        storage_channels = cfg.storage_channels.len(),
        admins = cfg.admin_ids.len(),
        follow_channels = cfg.follow_channels.len(),
        "configuration loaded"
    );

    let backend = Arc::new(TelegramBackend::new(
        bot.clone(),
        cfg.storage_channels.clone(),
        cfg.history_limit,
        cfg.message_limit,
    ));
    if cfg.rebuild_journal {
        backend.rebuild_journal().await;
    }
    let timers = Arc::new(TimerRegistry::new(cfg.default_timer_seconds));
    let store = Arc::new(RecordStore::new(
        backend.clone(),
        timers.clone(),
        cfg.storage_channels.clone(),
        cfg.history_limit,
    ));
    store.load_timers().await;

    // Deliveries and countdown edits share one rate budget; RetryAfter is still
    // handled in the adapter.
    let raw_messenger: Arc<dyn MessagingPort> = Arc::new(TelegramMessenger::new(bot.clone()));
    let messenger: Arc<dyn MessagingPort> = Arc::new(ThrottledMessenger::new(
        raw_messenger,
        ThrottleConfig::default(),
    ));
    let scheduler = DeliveryScheduler::new(messenger.clone(), cfg.delivery_tick_seconds);
    let distributor = Arc::new(Distributor::new(
        store.clone(),
        timers,
        messenger.clone(),
        scheduler.clone(),
        cfg.file_send_delay,
    ));

    let state = Arc::new(AppState {
        cfg: cfg.clone(),
        bot_username,
        backend,
        store,
        messenger,
        distributor,
        pending: Arc::new(PendingActions::default()),
        membership: Arc::new(TelegramMembership::new(bot.clone())),
        rate_limiter: Arc::new(Mutex::new(RateLimiter::new(
            cfg.rate_limit_enabled,
            cfg.rate_limit_requests,
            cfg.rate_limit_window,
        ))),
    });

    let handler = dptree::entry()
        .branch(Update::filter_callback_query().endpoint(handlers::handle_callback))
        .branch(Update::filter_channel_post().endpoint(handlers::handle_channel_post))
        .branch(Update::filter_edited_channel_post().endpoint(handlers::handle_channel_post))
        .branch(Update::filter_message().endpoint(handlers::handle_message));

    Dispatcher::builder(bot, handler)
        .dependencies(dptree::deps![state])
        .enable_ctrlc_handler()
        .build()
        .dispatch()
        .await;

    scheduler.stop().await;
    info!("ftb stopped");
    Ok(())
}
