pub mod config;
pub mod error;
pub mod harness;
pub mod lock;
pub mod report;
pub mod storage;

pub use error::{StoreError, StoreResult};
pub use harness::{HarnessConfig, WorkerGroup};
pub use lock::{LeaseLock, RetryPolicy};
pub use report::{HarnessReport, WorkerOutcome};
pub use storage::LeaseStore;
