//! 基于租约的分布式互斥锁

use crate::error::StoreResult;
use crate::storage::LeaseStore;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

pub const KEY_PREFIX: &str = "lock:";

pub fn lock_key(resource: &str) -> String {
    format!("{}{}", KEY_PREFIX, resource)
}

/// 重试策略：固定次数、固定间隔，只重试"锁被占用"
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub delay: Duration,
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, delay: Duration) -> Self {
        Self {
            max_attempts,
            delay,
        }
    }

    /// 最坏情况下的等待时间
    pub fn budget(&self) -> Duration {
        self.delay * self.max_attempts
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(15, Duration::from_millis(500))
    }
}

/// 某个资源上的租约锁
///
/// 每个实例都会生成新的 owner token，存储中的 token 是唯一的所有权凭证，
/// 因此只能删除自己创建的记录。租约不会续期，`ttl` 到期后记录自动消失。
pub struct LeaseLock {
    store: Arc<dyn LeaseStore>,
    key: String,
    token: String,
    ttl: Duration,
}

impl LeaseLock {
    pub fn new(store: Arc<dyn LeaseStore>, resource: &str, ttl: Duration) -> Self {
        Self {
            store,
            key: lock_key(resource),
            token: Uuid::new_v4().to_string(),
            ttl,
        }
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn token(&self) -> &str {
        &self.token
    }

    /// 日志里使用的短 token
    pub fn short_token(&self) -> &str {
        &self.token[..8]
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// 尝试一次获取锁，`Ok(false)` 表示锁被占用
    pub async fn acquire(&self) -> StoreResult<bool> {
        let acquired = self
            .store
            .create_if_absent(&self.key, &self.token, self.ttl)
            .await?;
        if acquired {
            log::debug!(
                "[ACQUIRE SUCCESS] key: {}, owner: {}, ttl: {:?}",
                self.key,
                self.short_token(),
                self.ttl
            );
        }
        Ok(acquired)
    }

    /// 按策略重试获取锁
    ///
    /// 存储错误不重试，第一次出错立即返回；重试次数耗尽返回 `Ok(false)`。
    pub async fn acquire_with_retry(&self, policy: &RetryPolicy) -> StoreResult<bool> {
        for attempt in 1..=policy.max_attempts {
            if self.acquire().await? {
                return Ok(true);
            }
            log::info!(
                "[BUSY] [{}] waiting for [{}] - lock busy, retrying... ({}/{})",
                self.short_token(),
                self.key,
                attempt,
                policy.max_attempts
            );
            tokio::time::sleep(policy.delay).await;
        }
        Ok(false)
    }

    /// 原子地比较并删除；租约已不属于自己时静默忽略
    pub async fn release(&self) -> StoreResult<()> {
        let deleted = self.store.delete_if_matches(&self.key, &self.token).await?;
        if deleted {
            log::debug!("[RELEASE] key: {}, owner: {}", self.key, self.short_token());
        } else {
            log::debug!(
                "[RELEASE] lease not held (expired or released) - key: {}, owner: {}",
                self.key,
                self.short_token()
            );
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::StoreError;
    use crate::storage::memory::MemoryStore;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::Instant;

    fn memory_store() -> Arc<dyn LeaseStore> {
        Arc::new(MemoryStore::new())
    }

    /// 统计调用次数，可选择每次都返回错误
    struct CountingStore {
        inner: MemoryStore,
        creates: AtomicU32,
        fail: bool,
    }

    impl CountingStore {
        fn new(fail: bool) -> Self {
            Self {
                inner: MemoryStore::new(),
                creates: AtomicU32::new(0),
                fail,
            }
        }
    }

    #[async_trait]
    impl LeaseStore for CountingStore {
        async fn create_if_absent(&self, key: &str, value: &str, ttl: Duration) -> StoreResult<bool> {
            self.creates.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                return Err(StoreError::Unavailable("connection reset".to_string()));
            }
            self.inner.create_if_absent(key, value, ttl).await
        }

        async fn delete_if_matches(&self, key: &str, expected: &str) -> StoreResult<bool> {
            if self.fail {
                return Err(StoreError::Unavailable("connection reset".to_string()));
            }
            self.inner.delete_if_matches(key, expected).await
        }

        async fn delete(&self, keys: &[String]) -> StoreResult<u64> {
            self.inner.delete(keys).await
        }

        async fn get(&self, key: &str) -> StoreResult<Option<String>> {
            self.inner.get(key).await
        }

        async fn ping(&self) -> StoreResult<()> {
            Ok(())
        }
    }

    #[test]
    fn key_is_namespaced() {
        assert_eq!(lock_key("inventory"), "lock:inventory");
        let lock = LeaseLock::new(memory_store(), "orders", Duration::from_secs(1));
        assert_eq!(lock.key(), "lock:orders");
    }

    #[test]
    fn tokens_are_unique_per_instance() {
        let store = memory_store();
        let a = LeaseLock::new(store.clone(), "inventory", Duration::from_secs(1));
        let b = LeaseLock::new(store, "inventory", Duration::from_secs(1));
        assert_ne!(a.token(), b.token());
        assert_eq!(a.short_token().len(), 8);
    }

    #[tokio::test]
    async fn second_lock_is_busy_until_release() {
        let store = memory_store();
        let first = LeaseLock::new(store.clone(), "inventory", Duration::from_secs(10));
        let second = LeaseLock::new(store.clone(), "inventory", Duration::from_secs(10));

        assert!(first.acquire().await.unwrap());
        assert!(!second.acquire().await.unwrap());

        first.release().await.unwrap();
        assert!(second.acquire().await.unwrap());
        assert_eq!(
            store.get("lock:inventory").await.unwrap().as_deref(),
            Some(second.token())
        );
    }

    #[tokio::test]
    async fn no_reentrancy() {
        let lock = LeaseLock::new(memory_store(), "inventory", Duration::from_secs(10));
        assert!(lock.acquire().await.unwrap());
        assert!(!lock.acquire().await.unwrap());
    }

    #[tokio::test]
    async fn release_with_foreign_token_keeps_lease() {
        let store = memory_store();
        let owner = LeaseLock::new(store.clone(), "inventory", Duration::from_secs(10));
        let intruder = LeaseLock::new(store.clone(), "inventory", Duration::from_secs(10));

        assert!(owner.acquire().await.unwrap());
        intruder.release().await.unwrap();

        assert_eq!(
            store.get("lock:inventory").await.unwrap().as_deref(),
            Some(owner.token())
        );
    }

    #[tokio::test]
    async fn release_is_idempotent() {
        let store = memory_store();
        let never_acquired = LeaseLock::new(store.clone(), "orders", Duration::from_secs(10));
        never_acquired.release().await.unwrap();

        let lock = LeaseLock::new(store.clone(), "orders", Duration::from_secs(10));
        assert!(lock.acquire().await.unwrap());
        lock.release().await.unwrap();
        lock.release().await.unwrap();
        assert_eq!(store.get("lock:orders").await.unwrap(), None);
    }

    #[tokio::test]
    async fn lease_expires_without_release() {
        let store = memory_store();
        let crashed = LeaseLock::new(store.clone(), "inventory", Duration::from_millis(50));
        let next = LeaseLock::new(store.clone(), "inventory", Duration::from_secs(10));

        assert!(crashed.acquire().await.unwrap());
        assert!(!next.acquire().await.unwrap());

        tokio::time::sleep(Duration::from_millis(80)).await;
        assert!(next.acquire().await.unwrap());

        // 过期的持有者不能删除新租约
        crashed.release().await.unwrap();
        assert_eq!(
            store.get("lock:inventory").await.unwrap().as_deref(),
            Some(next.token())
        );
    }

    #[tokio::test]
    async fn retry_gives_up_after_max_attempts() {
        let store = Arc::new(CountingStore::new(false));
        let holder = LeaseLock::new(store.clone(), "inventory", Duration::from_secs(30));
        assert!(holder.acquire().await.unwrap());

        let waiter = LeaseLock::new(store.clone(), "inventory", Duration::from_secs(30));
        let policy = RetryPolicy::new(4, Duration::from_millis(25));

        let started = Instant::now();
        let acquired = waiter.acquire_with_retry(&policy).await.unwrap();
        let elapsed = started.elapsed();

        assert!(!acquired);
        // holder 一次 + waiter 四次
        assert_eq!(store.creates.load(Ordering::SeqCst), 5);
        assert!(elapsed >= policy.budget());
        assert!(elapsed < Duration::from_secs(2));
    }

    #[tokio::test]
    async fn retry_succeeds_once_holder_releases() {
        let store = memory_store();
        let holder = Arc::new(LeaseLock::new(store.clone(), "orders", Duration::from_secs(30)));
        assert!(holder.acquire().await.unwrap());

        let releaser = holder.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(60)).await;
            releaser.release().await.unwrap();
        });

        let waiter = LeaseLock::new(store.clone(), "orders", Duration::from_secs(30));
        let policy = RetryPolicy::new(50, Duration::from_millis(10));
        assert!(waiter.acquire_with_retry(&policy).await.unwrap());
    }

    #[tokio::test]
    async fn store_errors_are_not_retried() {
        let store = Arc::new(CountingStore::new(true));
        let lock = LeaseLock::new(store.clone(), "inventory", Duration::from_secs(10));
        let policy = RetryPolicy::new(15, Duration::from_millis(500));

        let started = Instant::now();
        let result = lock.acquire_with_retry(&policy).await;

        assert!(matches!(result, Err(StoreError::Unavailable(_))));
        assert_eq!(store.creates.load(Ordering::SeqCst), 1);
        assert!(started.elapsed() < Duration::from_millis(500));
    }

    #[tokio::test]
    async fn release_surfaces_store_errors() {
        let store = Arc::new(CountingStore::new(true));
        let lock = LeaseLock::new(store, "inventory", Duration::from_secs(10));
        assert!(lock.release().await.is_err());
    }

    #[tokio::test]
    async fn zero_attempts_never_touch_the_store() {
        let store = Arc::new(CountingStore::new(false));
        let lock = LeaseLock::new(store.clone(), "inventory", Duration::from_secs(10));
        let policy = RetryPolicy::new(0, Duration::from_millis(10));

        assert!(!lock.acquire_with_retry(&policy).await.unwrap());
        assert_eq!(store.creates.load(Ordering::SeqCst), 0);
    }
}
