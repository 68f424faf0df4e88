use thiserror::Error;

#[derive(Error, Debug)]
pub enum OccamError {
    #[error("key/value store error: {0}")]
    Kv(#[from] redis::RedisError),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("invalid pattern: {0}")]
    Pattern(#[from] regex::Error),

    #[error("internal error: {0}")]
    Internal(String),
}

pub type Result<T> = std::result::Result<T, OccamError>;
