use axum::{
    Json,
    extract::{Extension, Query, State},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
};
use chrono::Utc;
use serde_json::{Value, json};
use uuid::Uuid;

use crate::{
    AppState, cache,
    error::AppError,
    ratelimit,
    utils::{Claims, cache_hit_headers, cache_miss_headers},
};

use super::model::{ForecastQuery, TransactionRecord, compute_forecast, load_total_balance};

/// 现金流预测：纯计算接口，限流 + 双层缓存
#[axum::debug_handler]
pub async fn get_forecast(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Query(query): Query<ForecastQuery>,
) -> Response {
    let days = query.days.unwrap_or(30).clamp(1, 90);
    let force_refresh = query.force_refresh.unwrap_or(false);

    // 限流
    let decision = ratelimit::check_rate_limit(&state.kv, &claims.sub, "forecast").await;
    if !decision.allowed {
        return ratelimit::rate_limited_response(&decision);
    }
    let mut headers = HeaderMap::new();
    ratelimit::attach_headers(&mut headers, &decision);

    // 查缓存，force_refresh 时跳过读取
    let key = cache::keys::forecast_key(&claims.sub, days);
    if !force_refresh {
        if let Some(hit) = cache::cache_get(&state.pool, &state.kv, &key, cache::FORECAST_POLICY).await
        {
            cache_hit_headers(&mut headers, &hit);
            return (StatusCode::OK, headers, Json(annotate(hit.data, true))).into_response();
        }
    }
    cache_miss_headers(&mut headers);

    let user_id = match Uuid::parse_str(&claims.sub) {
        Ok(id) => id,
        Err(_) => return AppError::Unauthorized.into_response(),
    };

    let transactions = match TransactionRecord::load_recent(&state.pool, user_id).await {
        Ok(transactions) => transactions,
        Err(e) => {
            tracing::error!("Failed to load transactions: {}", e);
            return AppError::Database("读取交易记录失败".to_string()).into_response();
        }
    };
    let balance = match load_total_balance(&state.pool, user_id).await {
        Ok(balance) => balance,
        Err(e) => {
            tracing::error!("Failed to load account balance: {}", e);
            return AppError::Database("读取账户余额失败".to_string()).into_response();
        }
    };

    let today = Utc::now().date_naive();
    match compute_forecast(&transactions, balance, days, today) {
        Some(points) => {
            let body = json!({
                "forecast": points,
                "generated_at": Utc::now(),
            });
            cache::cache_put(
                &state.pool,
                &state.kv,
                &key,
                Some(user_id),
                &body,
                cache::FORECAST_POLICY,
            )
            .await;
            (StatusCode::OK, headers, Json(annotate(body, false))).into_response()
        }
        None => {
            // 历史数据不足是降级成功而不是错误，也不写缓存
            tracing::debug!("insufficient history for forecast, user {}", user_id);
            let body = json!({
                "forecast": [],
                "generated_at": Utc::now(),
                "message": "历史交易数据不足，暂时无法生成现金流预测",
            });
            (StatusCode::OK, headers, Json(annotate(body, false))).into_response()
        }
    }
}

/// 在响应体上补 cached 标记，缓存里存的是不带标记的原始结果
fn annotate(mut body: Value, cached: bool) -> Value {
    if let Value::Object(map) = &mut body {
        map.insert("cached".to_string(), json!(cached));
    }
    body
}
