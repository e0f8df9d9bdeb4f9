use crate::error::{StoreError, StoreResult};
use crate::storage::{ttl_millis, LeaseStore};
use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::Script;
use std::str::FromStr;
use std::time::Duration;

// 只有持有者本人才能删除，GET 和 DEL 在服务端一次执行完成
const RELEASE_SCRIPT: &str = r#"
if redis.call("GET", KEYS[1]) == ARGV[1] then
    return redis.call("DEL", KEYS[1])
else
    return 0
end
"#;

pub struct RedisStore {
    client: ConnectionManager,
    release_script: Script,
}

impl RedisStore {
    pub async fn new(
        redis_url: &str,
        username: Option<String>,
        password: Option<String>,
        db: Option<i64>,
    ) -> StoreResult<Self> {
        // 构建连接信息
        let mut connection_info = redis::ConnectionInfo::from_str(redis_url)?;

        // 设置认证信息
        if let Some(pwd) = password {
            connection_info.redis.password = Some(pwd);
        }
        if let Some(user) = username {
            connection_info.redis.username = Some(user);
        }
        if let Some(database) = db {
            connection_info.redis.db = database;
        }

        let client = redis::Client::open(connection_info)?;
        let connection = ConnectionManager::new(client).await?;
        Ok(Self {
            client: connection,
            release_script: Script::new(RELEASE_SCRIPT),
        })
    }
}

#[async_trait]
impl LeaseStore for RedisStore {
    async fn create_if_absent(&self, key: &str, value: &str, ttl: Duration) -> StoreResult<bool> {
        let ttl_ms = ttl_millis(ttl)?;
        let mut conn = self.client.clone();

        // SET NX PX：创建和设置过期时间是同一条命令
        let reply: Option<String> = redis::cmd("SET")
            .arg(key)
            .arg(value)
            .arg("NX")
            .arg("PX")
            .arg(ttl_ms)
            .query_async(&mut conn)
            .await?;

        Ok(reply.is_some())
    }

    async fn delete_if_matches(&self, key: &str, expected: &str) -> StoreResult<bool> {
        let mut conn = self.client.clone();
        let deleted: i64 = self
            .release_script
            .key(key)
            .arg(expected)
            .invoke_async(&mut conn)
            .await?;
        Ok(deleted == 1)
    }

    async fn delete(&self, keys: &[String]) -> StoreResult<u64> {
        if keys.is_empty() {
            return Ok(0);
        }
        let mut conn = self.client.clone();
        let removed: u64 = redis::cmd("DEL").arg(keys).query_async(&mut conn).await?;
        Ok(removed)
    }

    async fn get(&self, key: &str) -> StoreResult<Option<String>> {
        let mut conn = self.client.clone();
        let value: Option<String> = redis::cmd("GET").arg(key).query_async(&mut conn).await?;
        Ok(value)
    }

    async fn ping(&self) -> StoreResult<()> {
        let mut conn = self.client.clone();
        let pong: String = redis::cmd("PING").query_async(&mut conn).await?;
        if pong == "PONG" {
            Ok(())
        } else {
            Err(StoreError::Unavailable(format!("unexpected PING reply: {}", pong)))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ttl_is_sent_in_milliseconds() {
        assert_eq!(ttl_millis(Duration::from_secs(10)).unwrap(), 10_000);
        assert_eq!(ttl_millis(Duration::from_millis(1500)).unwrap(), 1500);
    }

    #[test]
    fn sub_millisecond_ttl_is_rejected() {
        assert!(matches!(
            ttl_millis(Duration::from_micros(500)),
            Err(StoreError::InvalidTtl(_))
        ));
    }
}
