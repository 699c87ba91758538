/// Core error type.
///
/// Adapter crates map their transport errors into this type so the store and the
/// scheduler can decide what to absorb (logged, typed outcome) and what to surface.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("config error: {0}")]
    Config(String),

    #[error("backend {op} failed: {reason}")]
    Backend { op: &'static str, reason: String },

    #[error("message too long: {len} chars (limit {limit})")]
    Capacity { len: usize, limit: usize },

    #[error("external error: {0}")]
    External(String),
}

impl Error {
    pub fn backend(op: &'static str, reason: impl Into<String>) -> Self {
        Self::Backend {
            op,
            reason: reason.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
