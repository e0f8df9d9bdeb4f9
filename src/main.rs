use anyhow::{Context, Result};
use lease_lock::config::{Config, StoreType};
use lease_lock::harness;
use lease_lock::storage::memory::MemoryStore;
use lease_lock::storage::redis::RedisStore;
use lease_lock::storage::LeaseStore;
use log::info;
use std::sync::Arc;
use std::time::Duration;

#[tokio::main]
async fn main() -> Result<()> {
    // 初始化日志
    env_logger::init_from_env(env_logger::Env::new().default_filter_or("info"));

    // 加载配置
    let config = Config::from_env()?;
    info!("Starting lease-lock contention run with config: {:?}", config);

    // 创建存储
    let store: Arc<dyn LeaseStore> = match config.store_type {
        StoreType::Memory => {
            info!("Using memory store");
            let memory_store = Arc::new(MemoryStore::new());

            // 后台清理过期租约
            let sweeper = memory_store.clone();
            tokio::spawn(async move {
                let mut interval = tokio::time::interval(Duration::from_secs(60));
                loop {
                    interval.tick().await;
                    sweeper.purge_expired();
                }
            });

            memory_store as Arc<dyn LeaseStore>
        }
        StoreType::Redis => {
            let redis_url = config
                .redis_url
                .as_deref()
                .context("Redis URL not configured")?;
            info!("Using Redis store at {}", redis_url);
            let redis_store = RedisStore::new(
                redis_url,
                config.redis_username.clone(),
                config.redis_password.clone(),
                config.redis_db,
            )
            .await
            .context("Failed to connect to Redis")?;
            Arc::new(redis_store) as Arc<dyn LeaseStore>
        }
    };

    store.ping().await.context("Store connectivity check failed")?;

    let scenario = config.harness();
    harness::reset(store.as_ref(), &scenario)
        .await
        .context("Failed to clear existing locks")?;

    info!("================================================================");
    info!(
        "  Distributed lock demo: {} resources, {} workers",
        scenario.groups.len(),
        scenario.total_workers()
    );
    for group in &scenario.groups {
        info!("  [{}] lock: {} workers competing", group.resource, group.workers);
    }
    info!("================================================================");

    let report = harness::run(store, &scenario).await;
    report.log_summary();

    if config.report_json {
        println!("{}", report.to_json()?);
    }

    if !report.is_consistent() {
        anyhow::bail!("final counter values do not match expected totals");
    }
    Ok(())
}
