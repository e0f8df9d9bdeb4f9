use crate::harness::HarnessConfig;
use crate::lock::RetryPolicy;
use anyhow::{Context, Result};
use serde::Deserialize;
use std::env;
use std::time::Duration;

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub store_type: StoreType,
    pub redis_url: Option<String>,
    pub redis_username: Option<String>,
    pub redis_password: Option<String>,
    pub redis_db: Option<i64>,
    pub lease_ttl_ms: u64,
    pub retry_attempts: u32,
    pub retry_delay_ms: u64,
    pub work_duration_ms: u64,
    pub report_json: bool,
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(rename_all = "lowercase")]
pub enum StoreType {
    Memory,
    Redis,
}

fn var_or<T>(name: &str, default: T) -> Result<T>
where
    T: std::str::FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match env::var(name) {
        Ok(raw) => raw
            .trim()
            .parse()
            .with_context(|| format!("invalid value for {}: {:?}", name, raw)),
        Err(_) => Ok(default),
    }
}

impl Config {
    pub fn from_env() -> Result<Self> {
        let store_type = env::var("STORE_TYPE")
            .unwrap_or_else(|_| "memory".to_string())
            .to_lowercase();

        let store_type = match store_type.as_str() {
            "redis" => StoreType::Redis,
            "memory" => StoreType::Memory,
            other => anyhow::bail!("unknown STORE_TYPE: {}", other),
        };

        let redis_url = if store_type == StoreType::Redis {
            Some(env::var("REDIS_URL").unwrap_or_else(|_| "redis://127.0.0.1:6379".to_string()))
        } else {
            None
        };

        let redis_username = env::var("REDIS_USERNAME").ok();
        let redis_password = env::var("REDIS_PASSWORD").ok();
        let redis_db = env::var("REDIS_DB")
            .ok()
            .map(|s| s.parse::<i64>())
            .transpose()
            .context("invalid value for REDIS_DB")?;

        let config = Self {
            store_type,
            redis_url,
            redis_username,
            redis_password,
            redis_db,
            lease_ttl_ms: var_or("LEASE_TTL_MS", 10_000)?,
            retry_attempts: var_or("RETRY_ATTEMPTS", 15)?,
            retry_delay_ms: var_or("RETRY_DELAY_MS", 500)?,
            work_duration_ms: var_or("WORK_DURATION_MS", 2_000)?,
            report_json: var_or("REPORT_JSON", false)?,
        };

        if config.lease_ttl_ms == 0 {
            anyhow::bail!("LEASE_TTL_MS must be greater than zero");
        }
        Ok(config)
    }

    /// 标准场景（inventory 3 x 10，orders 2 x 1），时间参数取自配置
    pub fn harness(&self) -> HarnessConfig {
        HarnessConfig {
            lease_ttl: Duration::from_millis(self.lease_ttl_ms),
            retry: RetryPolicy::new(self.retry_attempts, Duration::from_millis(self.retry_delay_ms)),
            work_duration: Duration::from_millis(self.work_duration_ms),
            ..HarnessConfig::default()
        }
    }
}
