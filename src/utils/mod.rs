use axum::http::{HeaderMap, HeaderValue};
use chrono::{Duration, Utc};
use jsonwebtoken::{DecodingKey, EncodingKey, Header, Validation, decode, encode};
use serde::{Deserialize, Serialize};

use crate::cache::CacheHit;
use crate::config::Config;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    pub sub: String, // 用户ID
    pub exp: i64,    // 过期时间
    pub iat: i64,    // 签发时间
}

pub fn generate_token(
    user_id: &str,
    config: &Config,
) -> Result<(String, i64), jsonwebtoken::errors::Error> {
    let expiration = Utc::now()
        .checked_add_signed(Duration::seconds(config.jwt_expiration().as_secs() as i64))
        .expect("valid timestamp")
        .timestamp();

    let claims = Claims {
        sub: user_id.to_string(),
        exp: expiration,
        iat: Utc::now().timestamp(),
    };

    let token = encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(config.jwt_secret.as_bytes()),
    )?;

    Ok((token, expiration))
}

pub fn verify_token(token: &str, config: &Config) -> Result<Claims, jsonwebtoken::errors::Error> {
    let token_data = decode::<Claims>(
        token,
        &DecodingKey::from_secret(config.jwt_secret.as_bytes()),
        &Validation::default(),
    )?;

    Ok(token_data.claims)
}

/// 命中时标注来源层和剩余可用时间
pub fn cache_hit_headers(headers: &mut HeaderMap, hit: &CacheHit) {
    headers.insert("X-Cache", HeaderValue::from_static("HIT"));
    headers.insert(
        "X-Cache-Source",
        HeaderValue::from_static(hit.source.as_str()),
    );
    headers.insert("X-Cache-TTL", HeaderValue::from(hit.ttl_secs.max(0)));
}

pub fn cache_miss_headers(headers: &mut HeaderMap) {
    headers.insert("X-Cache", HeaderValue::from_static("MISS"));
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::CacheSource;

    fn test_config() -> Config {
        Config {
            database_url: "postgres://localhost/test".into(),
            jwt_secret: "test-secret".into(),
            jwt_expiration_secs: 3600,
            server_host: "127.0.0.1".into(),
            server_port: 3000,
            api_base_uri: "/api".into(),
            kv_rest_api_url: None,
            kv_rest_api_token: None,
            llm_api_url: "https://api.openai.com/v1/chat/completions".into(),
            llm_api_key: "test-key".into(),
            llm_model: "gpt-4o-mini".into(),
        }
    }

    #[test]
    fn test_token_round_trip() {
        let config = test_config();
        let (token, _) = generate_token("u1", &config).unwrap();
        let claims = verify_token(&token, &config).unwrap();
        assert_eq!(claims.sub, "u1");
    }

    #[test]
    fn test_token_rejects_wrong_secret() {
        let config = test_config();
        let (token, _) = generate_token("u1", &config).unwrap();
        let mut other = test_config();
        other.jwt_secret = "different-secret".into();
        assert!(verify_token(&token, &other).is_err());
    }

    #[test]
    fn test_cache_headers() {
        let mut headers = HeaderMap::new();
        cache_hit_headers(
            &mut headers,
            &CacheHit {
                data: serde_json::json!({}),
                source: CacheSource::Database,
                ttl_secs: 120,
            },
        );
        assert_eq!(headers["X-Cache"], "HIT");
        assert_eq!(headers["X-Cache-Source"], "database");
        assert_eq!(headers["X-Cache-TTL"], "120");

        let mut headers = HeaderMap::new();
        cache_miss_headers(&mut headers);
        assert_eq!(headers["X-Cache"], "MISS");
    }
}
