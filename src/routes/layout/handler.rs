use std::convert::Infallible;

use axum::{
    Json,
    extract::{Extension, State},
    http::{HeaderMap, StatusCode},
    response::sse::{Event, Sse},
    response::{IntoResponse, Response},
};
use futures_util::StreamExt;
use serde_json::{Value, json};
use tokio::sync::mpsc;
use tokio_stream::wrappers::UnboundedReceiverStream;
use uuid::Uuid;

use crate::{
    AppState, cache,
    error::AppError,
    llm::{ChatMessage, aggregator::StreamAggregator},
    ratelimit,
    utils::{Claims, cache_hit_headers, cache_miss_headers},
};

use super::model::{FinancialSnapshot, LAYOUT_SYSTEM_PROMPT, LayoutRequest, layout_prompt};

/// 仪表盘布局生成：模型驱动，支持流式与缓冲两种返回
///
/// 两条路径共用同一套事件语义，缓存命中时流式路径直接给 complete。
#[axum::debug_handler]
pub async fn generate_layout(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Json(req): Json<LayoutRequest>,
) -> Response {
    // 限流
    let decision = ratelimit::check_rate_limit(&state.kv, &claims.sub, "ai-agent").await;
    if !decision.allowed {
        return ratelimit::rate_limited_response(&decision);
    }
    let mut headers = HeaderMap::new();
    ratelimit::attach_headers(&mut headers, &decision);

    let key = cache::keys::layout_key(&claims.sub, req.focus.as_deref());
    let force_refresh = req.force_refresh.unwrap_or(false);
    let streaming = req.stream.unwrap_or(false);

    // 查缓存，force_refresh 跳过读取但完成后仍写回
    let hit = if force_refresh {
        None
    } else {
        cache::cache_get(&state.pool, &state.kv, &key, cache::LAYOUT_POLICY).await
    };
    match &hit {
        Some(hit) => cache_hit_headers(&mut headers, hit),
        None => cache_miss_headers(&mut headers),
    }

    if streaming {
        return stream_response(state, claims, headers, key, req.focus, hit);
    }

    if let Some(hit) = hit {
        let source = hit.source;
        return (
            StatusCode::OK,
            headers,
            Json(annotate(hit.data, true, Some(source))),
        )
            .into_response();
    }

    match generate(&state, &claims, &key, req.focus.as_deref(), None).await {
        Ok(body) => (StatusCode::OK, headers, Json(annotate(body, false, None))).into_response(),
        Err(e) => e.into_response(),
    }
}

/// 流式路径：叙述文本实时下发，结束时统一收口到 [DONE]
fn stream_response(
    state: AppState,
    claims: Claims,
    headers: HeaderMap,
    key: String,
    focus: Option<String>,
    hit: Option<cache::CacheHit>,
) -> Response {
    let (tx, rx) = mpsc::unbounded_channel::<Event>();

    tokio::spawn(async move {
        match hit {
            Some(hit) => {
                let _ = tx.send(sse_event(&json!({
                    "type": "complete",
                    "layout": hit.data["layout"].clone(),
                    "cached": true,
                })));
            }
            None => {
                let result = generate(&state, &claims, &key, focus.as_deref(), Some(&tx)).await;
                match result {
                    Ok(body) => {
                        let _ = tx.send(sse_event(&json!({
                            "type": "complete",
                            "layout": body["layout"].clone(),
                            "cached": false,
                        })));
                    }
                    Err(e) => {
                        let _ = tx.send(sse_event(&json!({
                            "type": "error",
                            "message": error_message(&e),
                        })));
                    }
                }
            }
        }
        let _ = tx.send(Event::default().data("[DONE]"));
    });

    let stream = UnboundedReceiverStream::new(rx).map(Ok::<_, Infallible>);
    (headers, Sse::new(stream)).into_response()
}

/// 读取财务快照、驱动模型、解析布局并写穿两层缓存
///
/// forward 为 Some 时叙述增量实时下发，为 None 时整段缓冲后处理，
/// 两条路径产出同一个文档。
async fn generate(
    state: &AppState,
    claims: &Claims,
    key: &str,
    focus: Option<&str>,
    forward: Option<&mpsc::UnboundedSender<Event>>,
) -> Result<Value, AppError> {
    let user_id =
        Uuid::parse_str(&claims.sub).map_err(|_| AppError::Unauthorized)?;
    let snapshot = FinancialSnapshot::load(&state.pool, user_id)
        .await
        .map_err(|e| {
            tracing::error!("Failed to load financial snapshot: {}", e);
            AppError::Database("读取财务数据失败".to_string())
        })?;

    let messages = [
        ChatMessage::system(LAYOUT_SYSTEM_PROMPT),
        ChatMessage::user(layout_prompt(&snapshot, focus)),
    ];

    let mut agg = StreamAggregator::new();
    match forward {
        Some(tx) => {
            let result = state
                .llm
                .stream_chat(&messages, |delta| {
                    if let Some(text) = agg.push(delta) {
                        let _ = tx.send(sse_event(&json!({
                            "type": "streaming_text",
                            "content": text,
                        })));
                    }
                })
                .await;
            if let Err(e) = result {
                tracing::error!("LLM stream failed: {}", e);
                return Err(AppError::UpstreamProvider("生成布局失败".to_string()));
            }
        }
        None => {
            let text = state.llm.chat(&messages).await.map_err(|e| {
                tracing::error!("LLM call failed: {}", e);
                AppError::UpstreamProvider("生成布局失败".to_string())
            })?;
            agg.push(&text);
        }
    }

    let layout = agg.finish().map_err(|e| {
        tracing::error!("Layout aggregation failed: {}", e);
        AppError::UpstreamProvider("模型未返回有效布局".to_string())
    })?;

    let body = json!({ "layout": layout });
    cache::cache_put(
        &state.pool,
        &state.kv,
        key,
        Some(user_id),
        &body,
        cache::LAYOUT_POLICY,
    )
    .await;
    Ok(body)
}

fn sse_event(value: &Value) -> Event {
    Event::default().data(value.to_string())
}

fn error_message(error: &AppError) -> &'static str {
    match error {
        AppError::Unauthorized => "未授权访问",
        AppError::UpstreamProvider(_) => "生成布局失败",
        AppError::Database(_) => "读取财务数据失败",
    }
}

/// 在响应体上补 cached / source 标记，缓存里存的是原始文档
fn annotate(mut body: Value, cached: bool, source: Option<cache::CacheSource>) -> Value {
    if let Value::Object(map) = &mut body {
        map.insert("cached".to_string(), json!(cached));
        if let Some(source) = source {
            map.insert("source".to_string(), json!(source.as_str()));
        }
    }
    body
}
