use axum::{
    Json,
    extract::{Extension, State},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
};
use serde_json::json;

use crate::{AppState, cache, error::AppError, ratelimit, utils::Claims};

use super::model::{CacheMetricsResponse, HotTierStatus};

/// 缓存指标：两层各报各的状态，本身不缓存
#[axum::debug_handler]
pub async fn cache_metrics(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
) -> Response {
    let decision = ratelimit::check_rate_limit(&state.kv, &claims.sub, "cache-metrics").await;
    if !decision.allowed {
        return ratelimit::rate_limited_response(&decision);
    }
    let mut headers = HeaderMap::new();
    ratelimit::attach_headers(&mut headers, &decision);

    let durable = match cache::cache_stats(&state.pool).await {
        Ok(stats) => stats,
        Err(e) => {
            tracing::error!("Failed to read cache stats: {}", e);
            return AppError::Database("读取缓存统计失败".to_string()).into_response();
        }
    };

    // 热层用 DBSIZE 探测，拿不到就报不可达
    let keys = state
        .kv
        .execute(&[json!("DBSIZE")])
        .await
        .and_then(|v| v.as_i64());

    let body = CacheMetricsResponse {
        enabled: state.kv.enabled(),
        hot: HotTierStatus {
            reachable: keys.is_some(),
            keys,
        },
        durable,
    };

    (StatusCode::OK, headers, Json(body)).into_response()
}
