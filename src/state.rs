use std::time::Duration;

use moka::future::Cache;
use serde_json::Value;
use sqlx::PgPool;

use crate::config::AppConfig;
use crate::db;

#[derive(Clone)]
pub struct AppState {
    pub config: AppConfig,
    pub db_pool: Option<PgPool>,
    /// Response cache for arrears summaries, keyed by tenant id (or
    /// `"roster"` for the full report). The ledger engine itself is pure
    /// per call; staleness is bounded by the configured TTL and entries
    /// are invalidated on payment/credit writes.
    pub arrears_cache: Cache<String, Value>,
}

impl AppState {
    pub fn build(config: AppConfig) -> Result<Self, Box<dyn std::error::Error>> {
        let db_pool = db::build_pool(&config);
        if db_pool.is_none() {
            tracing::warn!("DATABASE_URL is not set — all data endpoints will fail");
        }

        let arrears_cache = Cache::builder()
            .max_capacity(config.arrears_cache_max_entries)
            .time_to_live(Duration::from_secs(config.arrears_cache_ttl_seconds))
            .build();

        Ok(Self {
            config,
            db_pool,
            arrears_cache,
        })
    }

    pub async fn invalidate_arrears_for(&self, tenant_id: &str) {
        self.arrears_cache.invalidate(tenant_id).await;
        self.arrears_cache.invalidate("roster").await;
    }
}
