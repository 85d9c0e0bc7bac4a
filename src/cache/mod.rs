pub mod keys;

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use serde_json::Value;
use sqlx::PgPool;
use uuid::Uuid;

use crate::kv::KvClient;

/// 某类响应的缓存策略：热层 TTL 短，持久层按写入时间判断新鲜度
#[derive(Debug, Clone, Copy)]
pub struct CachePolicy {
    pub cache_type: &'static str,
    pub hot_ttl_secs: u64,
    pub max_age_secs: i64,
}

pub const LAYOUT_POLICY: CachePolicy = CachePolicy {
    cache_type: "dashboard-layout",
    hot_ttl_secs: 1800,
    max_age_secs: 21600,
};

pub const FORECAST_POLICY: CachePolicy = CachePolicy {
    cache_type: "forecast",
    hot_ttl_secs: 900,
    max_age_secs: 3600,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheSource {
    Redis,
    Database,
}

impl CacheSource {
    pub fn as_str(self) -> &'static str {
        match self {
            CacheSource::Redis => "redis",
            CacheSource::Database => "database",
        }
    }
}

#[derive(Debug, Clone)]
pub struct CacheHit {
    pub data: Value,
    pub source: CacheSource,
    pub ttl_secs: i64,
}

#[derive(Debug, sqlx::FromRow)]
struct CacheRow {
    response_data: Value,
    created_at: DateTime<Utc>,
}

/// 新鲜度始终由读取方按时间判断，行存在不代表可用
pub fn is_fresh(created_at: DateTime<Utc>, max_age_secs: i64, now: DateTime<Utc>) -> bool {
    now.signed_duration_since(created_at).num_seconds() <= max_age_secs
}

/// 读路径：热层优先，未命中回退持久层，持久层命中后回填热层
pub async fn cache_get(
    pool: &PgPool,
    kv: &KvClient,
    key: &str,
    policy: CachePolicy,
) -> Option<CacheHit> {
    if let Some(data) = kv.get_json::<Value>(key).await {
        let ttl = kv.ttl(key).await.unwrap_or(policy.hot_ttl_secs as i64);
        tracing::debug!("cache hit (redis): {}", key);
        return Some(CacheHit {
            data,
            source: CacheSource::Redis,
            ttl_secs: ttl.max(0),
        });
    }

    let row = match sqlx::query_as::<_, CacheRow>(
        "SELECT response_data, created_at FROM ai_response_cache WHERE cache_key = $1",
    )
    .bind(key)
    .fetch_optional(pool)
    .await
    {
        Ok(row) => row?,
        Err(e) => {
            tracing::warn!("durable cache read failed for {}: {}", key, e);
            return None;
        }
    };

    let now = Utc::now();
    let age_secs = now.signed_duration_since(row.created_at).num_seconds();
    if !is_fresh(row.created_at, policy.max_age_secs, now) {
        return None;
    }

    // 持久层命中后回填热层，后续请求走快路径
    kv.set_json(key, &row.response_data, Some(policy.hot_ttl_secs))
        .await;
    tracing::debug!("cache hit (database): {}", key);
    Some(CacheHit {
        data: row.response_data,
        source: CacheSource::Database,
        ttl_secs: (policy.max_age_secs - age_secs).max(0),
    })
}

/// 写路径：两层并发写入，持久层按 cache_key 幂等覆盖
///
/// 写失败只降级性能不影响结果，记日志后吞掉。
pub async fn cache_put(
    pool: &PgPool,
    kv: &KvClient,
    key: &str,
    user_id: Option<Uuid>,
    data: &Value,
    policy: CachePolicy,
) {
    let expires_at = Utc::now() + Duration::seconds(policy.max_age_secs);
    let hot = kv.set_json(key, data, Some(policy.hot_ttl_secs));
    let durable = async {
        let result = sqlx::query(
            r#"
            INSERT INTO ai_response_cache
                (cache_key, cache_type, user_id, response_data, created_at, expires_at)
            VALUES ($1, $2, $3, $4, NOW(), $5)
            ON CONFLICT (cache_key) DO UPDATE
            SET cache_type = EXCLUDED.cache_type,
                user_id = EXCLUDED.user_id,
                response_data = EXCLUDED.response_data,
                created_at = EXCLUDED.created_at,
                expires_at = EXCLUDED.expires_at
            "#,
        )
        .bind(key)
        .bind(policy.cache_type)
        .bind(user_id)
        .bind(data)
        .bind(expires_at)
        .execute(pool)
        .await;
        if let Err(e) = result {
            tracing::warn!("durable cache write failed for {}: {}", key, e);
        }
    };
    let _ = tokio::join!(hot, durable);
}

/// 持久层按类型的统计，供缓存指标接口使用
#[derive(Debug, Serialize, sqlx::FromRow)]
pub struct CacheTypeStats {
    pub cache_type: String,
    pub total: i64,
    pub fresh: i64,
    pub expired: i64,
}

pub async fn cache_stats(pool: &PgPool) -> Result<Vec<CacheTypeStats>, sqlx::Error> {
    sqlx::query_as::<_, CacheTypeStats>(
        r#"
        SELECT cache_type,
               COUNT(*) AS total,
               COUNT(*) FILTER (WHERE expires_at > NOW()) AS fresh,
               COUNT(*) FILTER (WHERE expires_at <= NOW()) AS expired
        FROM ai_response_cache
        GROUP BY cache_type
        ORDER BY cache_type
        "#,
    )
    .fetch_all(pool)
    .await
}
