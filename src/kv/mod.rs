use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::{Value, json};

use crate::config::Config;

/// KV 存储的 REST 客户端，命令以 JSON 数组提交
///
/// 存储只是性能优化，任何失败都按"未命中"处理，调用方拿到 None 继续走原路径。
#[derive(Clone)]
pub struct KvClient {
    http: reqwest::Client,
    base_url: Option<String>,
    token: Option<String>,
}

#[derive(serde::Deserialize)]
struct CommandResult {
    result: Value,
}

impl KvClient {
    pub fn new(base_url: Option<String>, token: Option<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url,
            token,
        }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(
            config.kv_rest_api_url.clone(),
            config.kv_rest_api_token.clone(),
        )
    }

    /// 两个凭证都配置了才启用
    pub fn enabled(&self) -> bool {
        self.base_url.is_some() && self.token.is_some()
    }

    fn credentials(&self) -> Option<(&str, &str)> {
        match (self.base_url.as_deref(), self.token.as_deref()) {
            (Some(url), Some(token)) => Some((url, token)),
            _ => None,
        }
    }

    /// 执行单条命令，存储不可用或出错时返回 None
    pub async fn execute(&self, command: &[Value]) -> Option<Value> {
        let (url, token) = self.credentials()?;
        let resp = match self
            .http
            .post(url)
            .bearer_auth(token)
            .json(command)
            .send()
            .await
        {
            Ok(resp) => resp,
            Err(e) => {
                tracing::warn!("KV command failed: {}", e);
                return None;
            }
        };
        if !resp.status().is_success() {
            tracing::warn!("KV store returned {}", resp.status());
            return None;
        }
        match resp.json::<CommandResult>().await {
            Ok(body) => Some(body.result),
            Err(e) => {
                tracing::warn!("KV response parse error: {}", e);
                None
            }
        }
    }

    /// 以原子管线执行一组命令，按提交顺序返回各命令结果
    pub async fn pipeline(&self, commands: &[Vec<Value>]) -> Option<Vec<Value>> {
        let (url, token) = self.credentials()?;
        let pipeline_url = format!("{}/pipeline", url.trim_end_matches('/'));
        let resp = match self
            .http
            .post(&pipeline_url)
            .bearer_auth(token)
            .json(commands)
            .send()
            .await
        {
            Ok(resp) => resp,
            Err(e) => {
                tracing::warn!("KV pipeline failed: {}", e);
                return None;
            }
        };
        if !resp.status().is_success() {
            tracing::warn!("KV store returned {}", resp.status());
            return None;
        }
        match resp.json::<Vec<CommandResult>>().await {
            Ok(results) => Some(results.into_iter().map(|r| r.result).collect()),
            Err(e) => {
                tracing::warn!("KV pipeline response parse error: {}", e);
                None
            }
        }
    }

    pub async fn get(&self, key: &str) -> Option<String> {
        match self.execute(&[json!("GET"), json!(key)]).await? {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    pub async fn set(&self, key: &str, value: &str, ttl_secs: Option<u64>) -> bool {
        let mut command = vec![json!("SET"), json!(key), json!(value)];
        if let Some(ttl) = ttl_secs {
            command.push(json!("EX"));
            command.push(json!(ttl.to_string()));
        }
        self.execute(&command).await.is_some()
    }

    /// 取出并反序列化 JSON 值，内容损坏时当作未命中
    pub async fn get_json<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        let raw = self.get(key).await?;
        match serde_json::from_str(&raw) {
            Ok(value) => Some(value),
            Err(e) => {
                tracing::warn!("cached JSON for {} is corrupt: {}", key, e);
                None
            }
        }
    }

    pub async fn set_json<T: Serialize>(&self, key: &str, value: &T, ttl_secs: Option<u64>) -> bool {
        let raw = match serde_json::to_string(value) {
            Ok(raw) => raw,
            Err(e) => {
                tracing::warn!("failed to serialize value for {}: {}", key, e);
                return false;
            }
        };
        self.set(key, &raw, ttl_secs).await
    }

    pub async fn incr(&self, key: &str) -> Option<i64> {
        self.execute(&[json!("INCR"), json!(key)]).await?.as_i64()
    }

    pub async fn expire(&self, key: &str, ttl_secs: u64) -> bool {
        self.execute(&[json!("EXPIRE"), json!(key), json!(ttl_secs.to_string())])
            .await
            .and_then(|v| v.as_i64())
            == Some(1)
    }

    pub async fn del(&self, key: &str) -> bool {
        self.execute(&[json!("DEL"), json!(key)]).await.is_some()
    }

    pub async fn exists(&self, key: &str) -> bool {
        self.execute(&[json!("EXISTS"), json!(key)])
            .await
            .and_then(|v| v.as_i64())
            == Some(1)
    }

    pub async fn ttl(&self, key: &str) -> Option<i64> {
        self.execute(&[json!("TTL"), json!(key)]).await?.as_i64()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn disabled_client() -> KvClient {
        KvClient::new(None, None)
    }

    #[test]
    fn test_enabled_requires_both_credentials() {
        assert!(!KvClient::new(None, None).enabled());
        assert!(!KvClient::new(Some("https://kv.example".into()), None).enabled());
        assert!(!KvClient::new(None, Some("token".into())).enabled());
        assert!(
            KvClient::new(Some("https://kv.example".into()), Some("token".into())).enabled()
        );
    }

    #[tokio::test]
    async fn test_disabled_client_is_a_no_op() {
        let kv = disabled_client();
        assert!(kv.execute(&[json!("PING")]).await.is_none());
        assert!(kv.pipeline(&[vec![json!("PING")]]).await.is_none());
        assert!(kv.get("k").await.is_none());
        assert!(!kv.set("k", "v", Some(60)).await);
        assert!(kv.get_json::<Value>("k").await.is_none());
        assert!(!kv.set_json("k", &json!({"a": 1}), None).await);
        assert!(kv.incr("k").await.is_none());
        assert!(!kv.expire("k", 60).await);
        assert!(!kv.del("k").await);
        assert!(!kv.exists("k").await);
        assert!(kv.ttl("k").await.is_none());
    }
}
