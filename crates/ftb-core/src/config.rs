use std::{env, fs, path::Path, time::Duration};

use crate::{domain::ChannelId, errors::Error, Result};

/// Typed startup configuration.
///
/// Read once at startup; nothing in the bot re-reads it afterwards.
#[derive(Clone, Debug)]
pub struct Config {
    // Core
    pub bot_token: String,
    pub admin_ids: Vec<i64>,

    // Storage
    pub storage_channels: Vec<ChannelId>,
    pub history_limit: usize,
    pub message_limit: usize,
    /// Re-read the storage channels at startup (see the Telegram backend).
    pub rebuild_journal: bool,

    // Timers
    pub default_timer_seconds: u64,
    pub delivery_tick_seconds: u64,
    pub file_send_delay: Duration,

    // Membership gate
    pub follow_channels: Vec<ChannelId>,
    pub membership_retries: u32,
    pub membership_retry_delay: Duration,

    // Delivery rate limit (non-admin recipients)
    pub rate_limit_enabled: bool,
    pub rate_limit_requests: u32,
    pub rate_limit_window: Duration,
}

impl Config {
    pub fn load() -> Result<Self> {
        load_dotenv_if_present(Path::new(".env"));

        // Required env vars
        let bot_token = env_str("BOT_TOKEN").unwrap_or_default();
        let admin_ids = parse_csv_i64(env_str("ADMIN_IDS"));
        let storage_channels = parse_csv_channels(env_str("STORAGE_CHANNELS"));

        if bot_token.trim().is_empty() {
            return Err(Error::Config(
                "BOT_TOKEN environment variable is required".to_string(),
            ));
        }
        if admin_ids.is_empty() {
            return Err(Error::Config(
                "ADMIN_IDS environment variable is required".to_string(),
            ));
        }
        if storage_channels.is_empty() {
            return Err(Error::Config(
                "STORAGE_CHANNELS environment variable is required".to_string(),
            ));
        }

        let history_limit = env_usize("HISTORY_LIMIT").unwrap_or(100).max(1);
        let message_limit = env_usize("MESSAGE_LIMIT").unwrap_or(4096).min(4096);
        let rebuild_journal = env_bool("REBUILD_JOURNAL").unwrap_or(true);

        let default_timer_seconds = env_u64("DEFAULT_TIMER").unwrap_or(3600);
        let delivery_tick_seconds = env_u64("DELIVERY_TICK_SECONDS").unwrap_or(10).max(1);
        let file_send_delay = Duration::from_millis(env_u64("FILE_SEND_DELAY_MS").unwrap_or(500));

        let follow_channels = parse_csv_channels(env_str("FOLLOW_CHANNELS"));
        let membership_retries = env_u32("MEMBERSHIP_RETRIES").unwrap_or(3).max(1);
        let membership_retry_delay =
            Duration::from_millis(env_u64("MEMBERSHIP_RETRY_DELAY_MS").unwrap_or(2000));

        let rate_limit_enabled = env_bool("RATE_LIMIT_ENABLED").unwrap_or(true);
        let rate_limit_requests = env_u32("RATE_LIMIT_REQUESTS").unwrap_or(5);
        let rate_limit_window = Duration::from_secs(env_u64("RATE_LIMIT_WINDOW").unwrap_or(60));

        Ok(Self {
            bot_token,
            admin_ids,
            storage_channels,
            history_limit,
            message_limit,
            rebuild_journal,
            default_timer_seconds,
            delivery_tick_seconds,
            file_send_delay,
            follow_channels,
            membership_retries,
            membership_retry_delay,
            rate_limit_enabled,
            rate_limit_requests,
            rate_limit_window,
        })
    }

    /// Numeric bot id (token prefix), used for links when the username is unknown.
    pub fn bot_id(&self) -> &str {
        self.bot_token.split(':').next().unwrap_or_default()
    }
}

fn env_str(key: &str) -> Option<String> {
    env::var(key).ok()
}

fn load_dotenv_if_present(path: &Path) {
    let Ok(contents) = fs::read_to_string(path) else {
        return;
    };

    for raw in contents.lines() {
        let line = raw.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }

        let Some((k, v)) = line.split_once('=') else {
            continue;
        };

        let key = k.trim();
        if key.is_empty() {
            continue;
        }
        if env::var_os(key).is_some() {
            continue; // do not override existing env
        }

        let mut val = v.trim().to_string();
        // Strip optional surrounding quotes.
        if val.len() >= 2
            && ((val.starts_with('"') && val.ends_with('"'))
                || (val.starts_with('\'') && val.ends_with('\'')))
        {
            val = val[1..val.len() - 1].to_string();
        }

        env::set_var(key, val);
    }
}

fn env_bool(key: &str) -> Option<bool> {
    env_str(key).and_then(|s| match s.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    })
}

fn env_u64(key: &str) -> Option<u64> {
    env_str(key).and_then(|s| s.trim().parse::<u64>().ok())
}

fn env_u32(key: &str) -> Option<u32> {
    env_str(key).and_then(|s| s.trim().parse::<u32>().ok())
}

fn env_usize(key: &str) -> Option<usize> {
    env_str(key).and_then(|s| s.trim().parse::<usize>().ok())
}

fn parse_csv_i64(v: Option<String>) -> Vec<i64> {
    v.unwrap_or_default()
        .split(',')
        .map(|s| s.trim())
        .filter(|s| !s.is_empty())
        .filter_map(|s| s.parse::<i64>().ok())
        .collect()
}

fn parse_csv_channels(v: Option<String>) -> Vec<ChannelId> {
    v.unwrap_or_default()
        .split(',')
        .map(|s| s.trim())
        .filter(|s| !s.is_empty())
        .map(ChannelId::new)
        .collect()
}
