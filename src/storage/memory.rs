use crate::error::{StoreError, StoreResult};
use crate::storage::{ttl_millis, LeaseStore};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::time::Duration;

/// 租约记录
#[derive(Debug, Clone)]
pub struct LeaseRecord {
    pub value: String,
    pub acquired_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl LeaseRecord {
    fn new(value: &str, ttl: Duration) -> StoreResult<Self> {
        ttl_millis(ttl)?;
        let lease = chrono::Duration::from_std(ttl).map_err(|_| StoreError::InvalidTtl(ttl))?;
        let now = Utc::now();
        let expires_at = now
            .checked_add_signed(lease)
            .ok_or(StoreError::InvalidTtl(ttl))?;
        Ok(Self {
            value: value.to_string(),
            acquired_at: now,
            expires_at,
        })
    }

    pub fn is_expired(&self) -> bool {
        Utc::now() >= self.expires_at
    }
}

/// 进程内租约存储
///
/// 条件创建和条件删除都只操作一个 entry，并在持有该分片锁期间完成，
/// 对共享同一个 `MemoryStore` 的所有调用方都是原子的。
#[derive(Default)]
pub struct MemoryStore {
    leases: DashMap<String, LeaseRecord>, // key -> record
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// 当前仍然有效的记录
    pub fn record(&self, key: &str) -> Option<LeaseRecord> {
        self.leases
            .get(key)
            .filter(|entry| !entry.is_expired())
            .map(|entry| entry.value().clone())
    }

    /// 清理过期租约
    pub fn purge_expired(&self) -> usize {
        let before = self.leases.len();
        self.leases.retain(|key, record| {
            if record.is_expired() {
                log::debug!(
                    "[EXPIRED CLEANUP] Removed expired lease - key: {}, owner: {}, acquired_at: {}",
                    key, record.value, record.acquired_at
                );
                false
            } else {
                true
            }
        });
        let removed = before.saturating_sub(self.leases.len());
        if removed > 0 {
            log::info!("[CLEANUP] Purged {} expired leases", removed);
        }
        removed
    }
}

#[async_trait]
impl LeaseStore for MemoryStore {
    async fn create_if_absent(&self, key: &str, value: &str, ttl: Duration) -> StoreResult<bool> {
        let record = LeaseRecord::new(value, ttl)?;

        match self.leases.entry(key.to_string()) {
            Entry::Occupied(mut existing) => {
                if !existing.get().is_expired() {
                    return Ok(false);
                }
                log::debug!(
                    "[EXPIRED] Lease expired - key: {}, previous owner: {}",
                    key, existing.get().value
                );
                existing.insert(record);
                Ok(true)
            }
            Entry::Vacant(slot) => {
                slot.insert(record);
                Ok(true)
            }
        }
    }

    async fn delete_if_matches(&self, key: &str, expected: &str) -> StoreResult<bool> {
        // 过期记录视为不存在，不能被任何人删除
        let removed = self
            .leases
            .remove_if(key, |_, record| !record.is_expired() && record.value == expected);
        Ok(removed.is_some())
    }

    async fn delete(&self, keys: &[String]) -> StoreResult<u64> {
        let removed = keys
            .iter()
            .filter(|key| self.leases.remove(key.as_str()).is_some())
            .count();
        Ok(removed as u64)
    }

    async fn get(&self, key: &str) -> StoreResult<Option<String>> {
        Ok(self.record(key).map(|record| record.value))
    }

    async fn ping(&self) -> StoreResult<()> {
        Ok(())
    }
}
