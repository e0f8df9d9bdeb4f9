pub mod memory;
pub mod redis;

use crate::error::{StoreError, StoreResult};
use async_trait::async_trait;
use std::time::Duration;

/// The atomic primitives a lease lock needs from a shared key-value store.
#[async_trait]
pub trait LeaseStore: Send + Sync {
    /// 仅当 key 不存在（或已过期）时创建 key=value，并设置过期时间
    async fn create_if_absent(&self, key: &str, value: &str, ttl: Duration) -> StoreResult<bool>;

    /// 仅当当前值等于 expected 时删除 key，必须是一次原子操作
    async fn delete_if_matches(&self, key: &str, expected: &str) -> StoreResult<bool>;

    /// 无条件删除，仅用于运行前重置
    async fn delete(&self, keys: &[String]) -> StoreResult<u64>;

    /// 读取当前值
    async fn get(&self, key: &str) -> StoreResult<Option<String>>;

    /// 连通性检查
    async fn ping(&self) -> StoreResult<()>;
}

/// 租约时长按毫秒计，不足 1ms 或超出范围的都拒绝
pub(crate) fn ttl_millis(ttl: Duration) -> StoreResult<u64> {
    match u64::try_from(ttl.as_millis()) {
        Ok(0) | Err(_) => Err(StoreError::InvalidTtl(ttl)),
        Ok(ms) => Ok(ms),
    }
}
