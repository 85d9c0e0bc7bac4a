use std::sync::Arc;

use config::Config;
use kv::KvClient;
use llm::LlmClient;
use sqlx::PgPool;

pub mod cache;
pub mod config;
pub mod error;
pub mod kv;
pub mod llm;
pub mod middleware;
pub mod ratelimit;
pub mod routes;
pub mod utils;

#[derive(Clone)]
pub struct AppState {
    pub pool: PgPool,
    pub config: Config,
    pub kv: Arc<KvClient>,
    pub llm: Arc<LlmClient>,
}
