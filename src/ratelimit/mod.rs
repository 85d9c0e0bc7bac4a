use axum::{
    Json,
    http::{HeaderMap, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
};
use chrono::Utc;
use serde_json::{Value, json};
use uuid::Uuid;

use crate::kv::KvClient;

/// 单个接口的滑动窗口限流规则
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimitRule {
    pub max_requests: u32,
    pub window_secs: u64,
}

/// 限流判定，窗口内计数已包含当前请求
#[derive(Debug, Clone)]
pub struct RateLimitDecision {
    pub allowed: bool,
    pub limit: u32,
    pub remaining: u32,
    pub reset_secs: u64,
    pub total: u64,
}

/// 按接口名查找限流规则，未配置的接口退回 default
///
/// 调用模型的接口预算收紧，高频低成本的接口放宽。
pub fn rule_for(endpoint: &str) -> RateLimitRule {
    match endpoint {
        "ai-agent" => RateLimitRule {
            max_requests: 10,
            window_secs: 60,
        },
        "forecast" => RateLimitRule {
            max_requests: 20,
            window_secs: 60,
        },
        "cache-metrics" => RateLimitRule {
            max_requests: 30,
            window_secs: 60,
        },
        _ => RateLimitRule {
            max_requests: 60,
            window_secs: 60,
        },
    }
}

pub async fn check_rate_limit(
    kv: &KvClient,
    identifier: &str,
    endpoint: &str,
) -> RateLimitDecision {
    check_with_rule(kv, identifier, endpoint, rule_for(endpoint)).await
}

/// 对 (identifier, endpoint) 做一次滑动窗口准入
///
/// 四条命令走同一条原子管线：清掉窗口外的旧记录、写入本次请求、
/// 数窗口内总量、刷新键的过期时间让废弃窗口自清理。
pub async fn check_with_rule(
    kv: &KvClient,
    identifier: &str,
    endpoint: &str,
    rule: RateLimitRule,
) -> RateLimitDecision {
    let now_ms = Utc::now().timestamp_millis();
    let window_start = now_ms - rule.window_secs as i64 * 1000;
    let key = format!("rate_limit:{}:{}", endpoint, identifier);
    // 同一毫秒的并发请求靠随机后缀区分成员
    let member = format!("{}-{}", now_ms, Uuid::new_v4().simple());

    let commands = vec![
        vec![
            json!("ZREMRANGEBYSCORE"),
            json!(key),
            json!("0"),
            json!(window_start.to_string()),
        ],
        vec![
            json!("ZADD"),
            json!(key),
            json!(now_ms.to_string()),
            json!(member),
        ],
        vec![json!("ZCARD"), json!(key)],
        vec![
            json!("EXPIRE"),
            json!(key),
            json!((rule.window_secs + 1).to_string()),
        ],
    ];

    let count = kv
        .pipeline(&commands)
        .await
        .and_then(|results| results.get(2).and_then(Value::as_u64));

    match count {
        Some(total) => decision(rule, total),
        None => {
            // 限流只是侧路优化，存储不可用时一律放行
            tracing::warn!("rate limiter unavailable, failing open for {}", endpoint);
            fail_open(rule)
        }
    }
}

/// 由窗口内计数推导判定
pub fn decision(rule: RateLimitRule, total: u64) -> RateLimitDecision {
    let allowed = total <= rule.max_requests as u64;
    let remaining = u64::from(rule.max_requests).saturating_sub(total) as u32;
    RateLimitDecision {
        allowed,
        limit: rule.max_requests,
        remaining,
        reset_secs: rule.window_secs,
        total,
    }
}

/// 存储不可用时的放行判定，报告满额剩余
pub fn fail_open(rule: RateLimitRule) -> RateLimitDecision {
    RateLimitDecision {
        allowed: true,
        limit: rule.max_requests,
        remaining: rule.max_requests,
        reset_secs: rule.window_secs,
        total: 0,
    }
}

/// 每个响应都带限流头，客户端可以据此主动退避
pub fn attach_headers(headers: &mut HeaderMap, decision: &RateLimitDecision) {
    headers.insert("X-RateLimit-Limit", HeaderValue::from(decision.limit));
    headers.insert("X-RateLimit-Remaining", HeaderValue::from(decision.remaining));
    headers.insert("X-RateLimit-Reset", HeaderValue::from(decision.reset_secs));
}

/// 超限时的 429 响应
pub fn rate_limited_response(decision: &RateLimitDecision) -> Response {
    let mut headers = HeaderMap::new();
    attach_headers(&mut headers, decision);
    headers.insert("Retry-After", HeaderValue::from(decision.reset_secs));
    let body = json!({
        "error": "Rate limit exceeded",
        "retryAfter": decision.reset_secs,
        "remaining": decision.remaining,
    });
    (StatusCode::TOO_MANY_REQUESTS, headers, Json(body)).into_response()
}

#[cfg(test)]
mod tests {
    use super::*;

    const RULE: RateLimitRule = RateLimitRule {
        max_requests: 3,
        window_secs: 60,
    };

    #[test]
    fn test_remaining_decreases_per_request() {
        // 窗口内第 1..=3 个请求依次放行，剩余量 2,1,0
        for (total, remaining) in [(1, 2), (2, 1), (3, 0)] {
            let d = decision(RULE, total);
            assert!(d.allowed, "request {total} within budget should be allowed");
            assert_eq!(d.remaining, remaining);
        }
    }

    #[test]
    fn test_over_budget_is_rejected() {
        let d = decision(RULE, 4);
        assert!(!d.allowed);
        assert_eq!(d.remaining, 0);
        assert_eq!(d.total, 4);
    }

    #[test]
    fn test_example_scenario_sequence() {
        // 10 秒内到达的 4 个请求：放行、放行、放行、拒绝
        let decisions: Vec<_> = (1..=4).map(|total| decision(RULE, total)).collect();
        let allowed: Vec<_> = decisions.iter().map(|d| d.allowed).collect();
        let remaining: Vec<_> = decisions.iter().map(|d| d.remaining).collect();
        assert_eq!(allowed, [true, true, true, false]);
        assert_eq!(remaining, [2, 1, 0, 0]);
    }

    #[test]
    fn test_rule_lookup_falls_back_to_default() {
        assert_eq!(rule_for("no-such-endpoint"), rule_for("default"));
        assert_ne!(rule_for("ai-agent"), rule_for("default"));
    }

    #[test]
    fn test_ai_endpoints_have_tighter_budgets() {
        assert!(rule_for("ai-agent").max_requests < rule_for("cache-metrics").max_requests);
    }

    #[tokio::test]
    async fn test_fails_open_when_store_unreachable() {
        let kv = KvClient::new(None, None);
        for _ in 0..100 {
            let d = check_with_rule(&kv, "u1", "ai-agent", RULE).await;
            assert!(d.allowed, "limiter must fail open without a store");
            assert_eq!(d.remaining, RULE.max_requests);
        }
    }
}
