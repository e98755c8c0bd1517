use thiserror::Error;

#[derive(Error, Debug)]
pub enum AutoSaveError {
    #[error("autosave: disabled")]
    Disabled,

    #[error("autosave: local store unavailable")]
    Unavailable,

    #[error("autosave: manager destroyed")]
    Destroyed,

    #[error("autosave: no tokio runtime to drive debounce timers")]
    NoRuntime,

    #[error("autosave: invalid config: {0}")]
    InvalidConfig(String),

    #[error("autosave: quota exceeded for {key}: {source}")]
    QuotaExceeded {
        key: String,
        #[source]
        source: draftcache_kv::KVError,
    },

    #[error("autosave: kv error: {0}")]
    KV(#[from] draftcache_kv::KVError),

    #[error("autosave: serialization error: {0}")]
    Serialization(String),
}

impl AutoSaveError {
    /// Reports whether the failure came from running out of storage.
    pub fn is_quota_exceeded(&self) -> bool {
        match self {
            AutoSaveError::QuotaExceeded { .. } => true,
            AutoSaveError::KV(e) => e.is_quota_exceeded(),
            _ => false,
        }
    }
}

pub type Result<T> = std::result::Result<T, AutoSaveError>;
