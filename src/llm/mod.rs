pub mod aggregator;

use futures_util::StreamExt;
use serde::Serialize;
use serde_json::{Value, json};
use thiserror::Error;

use crate::config::Config;

#[derive(Debug, Error)]
pub enum LlmError {
    #[error("模型请求失败: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("模型服务返回 {status}: {body}")]
    Api { status: u16, body: String },
    #[error("模型响应缺少内容")]
    MissingContent,
}

#[derive(Debug, Clone, Serialize)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: "system".to_string(),
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: "user".to_string(),
            content: content.into(),
        }
    }
}

/// 模型服务客户端，走 chat completions 协议
#[derive(Clone)]
pub struct LlmClient {
    http: reqwest::Client,
    api_url: String,
    api_key: String,
    model: String,
}

enum SseLine {
    Data(Value),
    Done,
    Ignore,
}

/// 解析一行上游 SSE：data: <json>、结束哨兵 data: [DONE]，其余忽略
fn parse_sse_line(line: &str) -> SseLine {
    let Some(rest) = line.strip_prefix("data:") else {
        return SseLine::Ignore;
    };
    let rest = rest.trim();
    if rest == "[DONE]" {
        return SseLine::Done;
    }
    match serde_json::from_str(rest) {
        Ok(event) => SseLine::Data(event),
        Err(e) => {
            tracing::warn!("unparseable stream event: {}", e);
            SseLine::Ignore
        }
    }
}

/// 从一个流事件里取文本增量
fn extract_delta(event: &Value) -> Option<&str> {
    event["choices"][0]["delta"]["content"].as_str()
}

impl LlmClient {
    pub fn from_config(config: &Config) -> Self {
        Self {
            http: reqwest::Client::new(),
            api_url: config.llm_api_url.clone(),
            api_key: config.llm_api_key.clone(),
            model: config.llm_model.clone(),
        }
    }

    async fn send(&self, messages: &[ChatMessage], stream: bool) -> Result<reqwest::Response, LlmError> {
        let resp = self
            .http
            .post(&self.api_url)
            .bearer_auth(&self.api_key)
            .json(&json!({
                "model": self.model,
                "messages": messages,
                "stream": stream,
            }))
            .send()
            .await?;
        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(LlmError::Api {
                status: status.as_u16(),
                body,
            });
        }
        Ok(resp)
    }

    /// 非流式调用，返回完整文本
    pub async fn chat(&self, messages: &[ChatMessage]) -> Result<String, LlmError> {
        let body: Value = self.send(messages, false).await?.json().await?;
        body["choices"][0]["message"]["content"]
            .as_str()
            .map(|s| s.to_string())
            .ok_or(LlmError::MissingContent)
    }

    /// 流式调用：每个文本增量回调一次，返回完整拼接结果
    ///
    /// 上游流按行切分，跨 chunk 的半行留在缓冲里等下一个 chunk。
    pub async fn stream_chat<F>(
        &self,
        messages: &[ChatMessage],
        mut on_delta: F,
    ) -> Result<String, LlmError>
    where
        F: FnMut(&str),
    {
        let resp = self.send(messages, true).await?;
        let mut upstream = resp.bytes_stream();
        let mut pending = String::new();
        let mut full = String::new();

        'outer: while let Some(chunk) = upstream.next().await {
            let chunk = chunk?;
            pending.push_str(&String::from_utf8_lossy(&chunk));
            while let Some(pos) = pending.find('\n') {
                let line = pending[..pos].trim_end_matches('\r').to_string();
                pending.drain(..=pos);
                match parse_sse_line(&line) {
                    SseLine::Done => break 'outer,
                    SseLine::Data(event) => {
                        if let Some(delta) = extract_delta(&event) {
                            full.push_str(delta);
                            on_delta(delta);
                        }
                    }
                    SseLine::Ignore => {}
                }
            }
        }

        Ok(full)
    }
}
