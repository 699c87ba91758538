//! Core domain + application logic for the file distribution bot.
//!
//! This crate is framework-agnostic. The storage channels, the recipient-facing
//! messenger and the membership checks live behind ports (traits) implemented in
//! adapter crates.

pub mod backend;
pub mod config;
pub mod deeplink;
pub mod delivery;
pub mod distribute;
pub mod domain;
pub mod errors;
pub mod logging;
pub mod membership;
pub mod messaging;
pub mod pending;
pub mod security;
pub mod store;
pub mod timers;

#[cfg(test)]
pub(crate) mod testing;

pub use errors::{Error, Result};
