//! 争用测试：多个 worker 同时争抢两把锁，验证计数器的读-改-写被串行化

use crate::error::StoreResult;
use crate::lock::{lock_key, LeaseLock, RetryPolicy};
use crate::report::{GroupReport, HarnessReport, WorkerOutcome, WorkerReport};
use crate::storage::LeaseStore;
use log::{error, info, warn};
use serde::Serialize;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::watch;

/// 一组争抢同一资源的 worker
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct WorkerGroup {
    pub resource: String,
    pub workers: usize,
    pub increment: i64,
}

impl WorkerGroup {
    pub fn new(resource: impl Into<String>, workers: usize, increment: i64) -> Self {
        Self {
            resource: resource.into(),
            workers,
            increment,
        }
    }

    pub fn expected_total(&self) -> i64 {
        self.workers as i64 * self.increment
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HarnessConfig {
    pub groups: Vec<WorkerGroup>,
    pub lease_ttl: Duration,
    pub retry: RetryPolicy,
    /// 临界区内模拟处理的耗时
    pub work_duration: Duration,
}

impl Default for HarnessConfig {
    fn default() -> Self {
        Self {
            groups: vec![
                WorkerGroup::new("inventory", 3, 10),
                WorkerGroup::new("orders", 2, 1),
            ],
            lease_ttl: Duration::from_secs(10),
            retry: RetryPolicy::default(),
            work_duration: Duration::from_secs(2),
        }
    }
}

impl HarnessConfig {
    pub fn lock_keys(&self) -> Vec<String> {
        self.groups
            .iter()
            .map(|group| lock_key(&group.resource))
            .collect()
    }

    pub fn total_workers(&self) -> usize {
        self.groups.iter().map(|group| group.workers).sum()
    }
}

/// 只受租约保护的共享计数器
///
/// 读和写是两次独立操作，没有被租约串行化的 worker 会丢失更新。
#[derive(Debug, Clone, Default)]
pub struct Counter(Arc<AtomicI64>);

impl Counter {
    pub fn read(&self) -> i64 {
        self.0.load(Ordering::SeqCst)
    }

    pub fn write(&self, value: i64) {
        self.0.store(value, Ordering::SeqCst);
    }
}

/// 一次性起跑闸门：Armed -> Released
pub struct StartGate {
    tx: watch::Sender<bool>,
}

pub struct GateWaiter {
    rx: watch::Receiver<bool>,
}

impl StartGate {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(false);
        Self { tx }
    }

    pub fn waiter(&self) -> GateWaiter {
        GateWaiter {
            rx: self.tx.subscribe(),
        }
    }

    pub fn is_released(&self) -> bool {
        *self.tx.borrow()
    }

    /// 放行所有等待者，之后的等待立即返回
    pub fn release(&self) {
        self.tx.send_replace(true);
    }
}

impl Default for StartGate {
    fn default() -> Self {
        Self::new()
    }
}

impl GateWaiter {
    pub async fn wait(mut self) {
        // 闸门被丢弃时同样放行，避免 worker 永久挂起
        let _ = self.rx.wait_for(|released| *released).await;
    }
}

struct Worker {
    id: usize,
    store: Arc<dyn LeaseStore>,
    group: WorkerGroup,
    counter: Counter,
    lease_ttl: Duration,
    retry: RetryPolicy,
    work_duration: Duration,
    origin: Instant,
}

impl Worker {
    async fn run(self, gate: GateWaiter) -> WorkerReport {
        gate.wait().await;

        let lock = LeaseLock::new(self.store.clone(), &self.group.resource, self.lease_ttl);
        info!(
            "[ACQUIRE] Worker {} trying to acquire [{}] with id [{}]",
            self.id,
            lock.key(),
            lock.short_token()
        );

        let outcome = match lock.acquire_with_retry(&self.retry).await {
            Err(e) => {
                error!("[FAULT] Worker {} store error on [{}]: {}", self.id, lock.key(), e);
                WorkerOutcome::Fault { error: e.to_string() }
            }
            Ok(false) => {
                warn!("[EXHAUSTED] Worker {} could not acquire [{}]", self.id, lock.key());
                WorkerOutcome::Exhausted
            }
            Ok(true) => {
                info!(
                    "[ACQUIRE SUCCESS] Worker {} holds [{}] as [{}]",
                    self.id,
                    lock.key(),
                    lock.short_token()
                );
                self.critical_section(&lock).await
            }
        };

        WorkerReport {
            worker_id: self.id,
            resource: self.group.resource,
            token: lock.token().to_string(),
            outcome,
        }
    }

    async fn critical_section(&self, lock: &LeaseLock) -> WorkerOutcome {
        let entered = self.origin.elapsed();
        let read = self.counter.read();
        info!("Worker {}: read {} = {}", self.id, self.group.resource, read);

        tokio::time::sleep(self.work_duration).await;

        let written = read + self.group.increment;
        self.counter.write(written);
        let left = self.origin.elapsed();
        info!("Worker {}: updated {} to {}", self.id, self.group.resource, written);

        // 释放失败不回滚已写入的值
        let release_error = match lock.release().await {
            Ok(()) => {
                info!(
                    "[RELEASE] Worker {} released [{}] by [{}]",
                    self.id,
                    lock.key(),
                    lock.short_token()
                );
                None
            }
            Err(e) => {
                warn!("[RELEASE] Worker {} failed to release [{}]: {}", self.id, lock.key(), e);
                Some(e.to_string())
            }
        };

        WorkerOutcome::Completed {
            read,
            written,
            entered,
            left,
            release_error,
        }
    }
}

/// 删除上一次运行残留的锁
pub async fn reset(store: &dyn LeaseStore, config: &HarnessConfig) -> StoreResult<u64> {
    let removed = store.delete(&config.lock_keys()).await?;
    if removed > 0 {
        info!("[RESET] Removed {} stale lock(s)", removed);
    }
    Ok(removed)
}

/// 启动所有 worker，同时放行，等待全部结束后汇总
pub async fn run(store: Arc<dyn LeaseStore>, config: &HarnessConfig) -> HarnessReport {
    let gate = StartGate::new();
    let origin = Instant::now();
    let counters: Vec<Counter> = config.groups.iter().map(|_| Counter::default()).collect();

    let mut handles = Vec::with_capacity(config.total_workers());
    let mut next_id = 1;
    for (group, counter) in config.groups.iter().zip(&counters) {
        for _ in 0..group.workers {
            let worker = Worker {
                id: next_id,
                store: store.clone(),
                group: group.clone(),
                counter: counter.clone(),
                lease_ttl: config.lease_ttl,
                retry: config.retry,
                work_duration: config.work_duration,
                origin,
            };
            handles.push((next_id, group.resource.clone(), tokio::spawn(worker.run(gate.waiter()))));
            next_id += 1;
        }
    }

    info!("[START] Releasing {} workers simultaneously", handles.len());
    gate.release();

    let mut workers = Vec::with_capacity(handles.len());
    for (worker_id, resource, handle) in handles {
        let report = match handle.await {
            Ok(report) => report,
            Err(e) => {
                error!("[FAULT] Worker {} panicked: {}", worker_id, e);
                WorkerReport {
                    worker_id,
                    resource,
                    token: String::new(),
                    outcome: WorkerOutcome::Fault { error: e.to_string() },
                }
            }
        };
        workers.push(report);
    }

    let groups = config
        .groups
        .iter()
        .zip(&counters)
        .map(|(group, counter)| GroupReport {
            resource: group.resource.clone(),
            workers: group.workers,
            increment: group.increment,
            expected: group.expected_total(),
            actual: counter.read(),
        })
        .collect();

    HarnessReport {
        config: config.clone(),
        groups,
        workers,
        elapsed: origin.elapsed(),
    }
}
