use serde::Serialize;

use crate::cache::CacheTypeStats;

/// 热层探测结果，keys 取自 DBSIZE
#[derive(Debug, Serialize)]
pub struct HotTierStatus {
    pub reachable: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub keys: Option<i64>,
}

#[derive(Debug, Serialize)]
pub struct CacheMetricsResponse {
    pub enabled: bool,
    pub hot: HotTierStatus,
    pub durable: Vec<CacheTypeStats>,
}
