//! Recipient-facing messenger abstraction (Telegram today).

pub mod port;
pub mod throttled;
pub mod types;
