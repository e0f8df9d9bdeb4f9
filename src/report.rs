use crate::harness::HarnessConfig;
use log::{info, warn};
use serde::Serialize;
use std::time::Duration;

/// 单个 worker 的结果
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum WorkerOutcome {
    /// 执行完临界区；时间是相对于起跑的偏移
    Completed {
        read: i64,
        written: i64,
        entered: Duration,
        left: Duration,
        release_error: Option<String>,
    },
    /// 重试次数耗尽，未获取到锁
    Exhausted,
    Fault {
        error: String,
    },
}

impl WorkerOutcome {
    pub fn interval(&self) -> Option<(Duration, Duration)> {
        match self {
            WorkerOutcome::Completed { entered, left, .. } => Some((*entered, *left)),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct WorkerReport {
    pub worker_id: usize,
    pub resource: String,
    pub token: String,
    pub outcome: WorkerOutcome,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct GroupReport {
    pub resource: String,
    pub workers: usize,
    pub increment: i64,
    pub expected: i64,
    pub actual: i64,
}

impl GroupReport {
    pub fn is_consistent(&self) -> bool {
        self.expected == self.actual
    }
}

/// 两个 worker 在同一资源上的临界区发生了重叠
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Overlap {
    pub resource: String,
    pub first: usize,
    pub second: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct HarnessReport {
    /// 本次运行使用的场景参数
    pub config: HarnessConfig,
    pub groups: Vec<GroupReport>,
    pub workers: Vec<WorkerReport>,
    pub elapsed: Duration,
}

impl HarnessReport {
    pub fn group(&self, resource: &str) -> Option<&GroupReport> {
        self.groups.iter().find(|group| group.resource == resource)
    }

    pub fn is_consistent(&self) -> bool {
        self.groups.iter().all(GroupReport::is_consistent)
    }

    pub fn completed(&self) -> usize {
        self.count(|outcome| matches!(outcome, WorkerOutcome::Completed { .. }))
    }

    pub fn exhausted(&self) -> usize {
        self.count(|outcome| matches!(outcome, WorkerOutcome::Exhausted))
    }

    pub fn faults(&self) -> usize {
        self.count(|outcome| matches!(outcome, WorkerOutcome::Fault { .. }))
    }

    fn count(&self, pred: impl Fn(&WorkerOutcome) -> bool) -> usize {
        self.workers.iter().filter(|worker| pred(&worker.outcome)).count()
    }

    /// 同一资源上时间区间相交的临界区
    pub fn overlaps(&self) -> Vec<Overlap> {
        let mut found = Vec::new();
        for (i, a) in self.workers.iter().enumerate() {
            let Some((a_in, a_out)) = a.outcome.interval() else {
                continue;
            };
            for b in &self.workers[i + 1..] {
                if a.resource != b.resource {
                    continue;
                }
                if let Some((b_in, b_out)) = b.outcome.interval() {
                    if a_in < b_out && b_in < a_out {
                        found.push(Overlap {
                            resource: a.resource.clone(),
                            first: a.worker_id,
                            second: b.worker_id,
                        });
                    }
                }
            }
        }
        found
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }

    pub fn log_summary(&self) {
        info!("================================================================");
        info!("  RESULTS ({:.1}s)", self.elapsed.as_secs_f64());
        info!("================================================================");
        for group in &self.groups {
            info!(
                "  {:<10} final: {:>4} (expected: {} = {} workers x {}) {}",
                group.resource,
                group.actual,
                group.expected,
                group.workers,
                group.increment,
                if group.is_consistent() { "OK" } else { "MISMATCH" }
            );
        }
        info!(
            "  workers: {} completed, {} exhausted, {} faulted",
            self.completed(),
            self.exhausted(),
            self.faults()
        );
        for overlap in self.overlaps() {
            warn!(
                "[OVERLAP] workers {} and {} were inside [{}] at the same time",
                overlap.first, overlap.second, overlap.resource
            );
        }
        info!("================================================================");
    }
}
