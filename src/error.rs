use redis::RedisError;
use thiserror::Error;

/// 存储访问失败
///
/// 锁被占用不是错误，acquire 返回 `Ok(false)`；
/// 只有存储不可达或返回异常时才会出现在这里。
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("redis error: {0}")]
    Redis(#[from] RedisError),

    #[error("store unavailable: {0}")]
    Unavailable(String),

    #[error("invalid lease ttl: {0:?}")]
    InvalidTtl(std::time::Duration),
}

pub type StoreResult<T> = std::result::Result<T, StoreError>;
