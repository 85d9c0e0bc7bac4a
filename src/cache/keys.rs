use sha2::{Digest, Sha256};

/// 宽输入先做摘要，缓存键长度保持稳定
pub fn digest(input: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(input.as_bytes());
    let hex = format!("{:x}", hasher.finalize());
    hex[..16].to_string()
}

/// 仪表盘布局：按用户和关注主题区分
pub fn layout_key(user_id: &str, focus: Option<&str>) -> String {
    format!(
        "ai:dashboard-layout:{}:{}",
        user_id,
        digest(focus.unwrap_or("general"))
    )
}

/// 现金流预测：按用户和预测天数区分
pub fn forecast_key(user_id: &str, days: u32) -> String {
    format!("forecast:{}:{}", user_id, days)
}
