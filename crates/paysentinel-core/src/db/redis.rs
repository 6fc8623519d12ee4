//! Redis connection and windowed counter scanning

use async_trait::async_trait;
use deadpool_redis::{Config as RedisConfig, Pool, PoolConfig, Runtime};
use redis::AsyncCommands;
use tracing::{debug, warn};

use crate::alerting::CounterSource;
use crate::config::RedisConfig as AppRedisConfig;
use crate::error::{Error, Result};

/// Keys fetched per MGET round trip
const MGET_BATCH: usize = 500;

/// Redis connection pool
#[derive(Clone)]
pub struct RedisPool {
    pool: Pool,
}

impl RedisPool {
    /// Create a new Redis connection pool
    pub async fn new(config: &AppRedisConfig) -> Result<Self> {
        let mut cfg = RedisConfig::from_url(&config.url);
        cfg.pool = Some(PoolConfig::new(config.max_connections as usize));
        let pool = cfg
            .create_pool(Some(Runtime::Tokio1))
            .map_err(|e| Error::Pool(e.to_string()))?;

        Ok(Self { pool })
    }

    /// Health check
    pub async fn health_check(&self) -> Result<()> {
        let mut conn = self.pool.get().await?;
        let _: String = redis::cmd("PING").query_async(&mut conn).await?;
        Ok(())
    }

    /// Get the underlying pool
    pub fn pool(&self) -> &Pool {
        &self.pool
    }
}

/// Reader of the `{prefix}:*` outcome counters written by the ingestor
#[derive(Clone)]
pub struct RedisCounterStore {
    pool: Pool,
    pattern: String,
}

impl RedisCounterStore {
    /// Create a counter store scanning keys under `key_prefix`
    pub fn new(pool: &RedisPool, key_prefix: &str) -> Self {
        Self {
            pool: pool.pool.clone(),
            pattern: format!("{key_prefix}:*"),
        }
    }
}

#[async_trait]
impl CounterSource for RedisCounterStore {
    async fn scan_counters(&self) -> Result<Vec<(String, i64)>> {
        let mut conn = self.pool.get().await?;

        let keys: Vec<String> = {
            let mut iter = conn.scan_match::<_, String>(&self.pattern).await?;
            let mut keys = Vec::new();
            while let Some(key) = iter.next_item().await {
                keys.push(key);
            }
            keys
        };

        let mut counters = Vec::with_capacity(keys.len());
        for chunk in keys.chunks(MGET_BATCH) {
            let values: Vec<Option<String>> = redis::cmd("MGET").arg(chunk).query_async(&mut conn).await?;

            for (key, value) in chunk.iter().zip(values) {
                // expired between SCAN and MGET
                let Some(raw) = value else { continue };
                match raw.parse::<i64>() {
                    Ok(count) => counters.push((key.clone(), count)),
                    Err(_) => warn!(key = %key, value = %raw, "Skipping non-integer counter"),
                }
            }
        }

        debug!(keys = counters.len(), "Scanned outcome counters");
        Ok(counters)
    }
}
