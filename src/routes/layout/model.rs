use serde::{Deserialize, Serialize};
use sqlx::{FromRow, PgPool};
use uuid::Uuid;

#[derive(Debug, Deserialize)]
pub struct LayoutRequest {
    /// 用户想突出的主题，如 "saving"、"debt"
    pub focus: Option<String>,
    pub stream: Option<bool>,
    pub force_refresh: Option<bool>,
}

/// 提供给模型的财务快照
#[derive(Debug, Serialize)]
pub struct FinancialSnapshot {
    pub total_balance: f64,
    pub monthly_income: f64,
    pub monthly_expenses: f64,
    pub top_categories: Vec<CategorySpend>,
}

#[derive(Debug, Serialize, FromRow)]
pub struct CategorySpend {
    pub category: String,
    pub total: f64,
}

impl FinancialSnapshot {
    pub async fn load(pool: &PgPool, user_id: Uuid) -> Result<Self, sqlx::Error> {
        let total_balance = sqlx::query_scalar::<_, f64>(
            "SELECT COALESCE(SUM(balance), 0)::FLOAT8 FROM accounts WHERE user_id = $1",
        )
        .bind(user_id)
        .fetch_one(pool)
        .await?;

        let (monthly_income, monthly_expenses) = sqlx::query_as::<_, (f64, f64)>(
            r#"
            SELECT COALESCE(SUM(amount) FILTER (WHERE amount > 0), 0)::FLOAT8,
                   COALESCE(-SUM(amount) FILTER (WHERE amount < 0), 0)::FLOAT8
            FROM transactions
            WHERE user_id = $1 AND occurred_on >= CURRENT_DATE - 30
            "#,
        )
        .bind(user_id)
        .fetch_one(pool)
        .await?;

        let top_categories = sqlx::query_as::<_, CategorySpend>(
            r#"
            SELECT category, (-SUM(amount))::FLOAT8 AS total
            FROM transactions
            WHERE user_id = $1 AND amount < 0 AND occurred_on >= CURRENT_DATE - 30
            GROUP BY category
            ORDER BY total DESC
            LIMIT 5
            "#,
        )
        .bind(user_id)
        .fetch_all(pool)
        .await?;

        Ok(Self {
            total_balance,
            monthly_income,
            monthly_expenses,
            top_categories,
        })
    }
}

pub const LAYOUT_SYSTEM_PROMPT: &str = "You are a financial dashboard designer. \
Given a user's financial snapshot, briefly explain in one or two plain-text \
sentences what you will emphasize, then output exactly one JSON object with a \
`widgets` array. Each widget has `kind`, `title` and `size` fields. Do not \
wrap the JSON in code fences.";

/// 拼装用户侧提示词，快照以 JSON 附在后面
pub fn layout_prompt(snapshot: &FinancialSnapshot, focus: Option<&str>) -> String {
    let snapshot_json =
        serde_json::to_string(snapshot).unwrap_or_else(|_| "{}".to_string());
    format!(
        "Design a personal-finance dashboard layout focused on \"{}\".\nFinancial snapshot: {}",
        focus.unwrap_or("general"),
        snapshot_json
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_snapshot() -> FinancialSnapshot {
        FinancialSnapshot {
            total_balance: 5230.5,
            monthly_income: 4200.0,
            monthly_expenses: 3100.0,
            top_categories: vec![CategorySpend {
                category: "groceries".into(),
                total: 640.0,
            }],
        }
    }

    #[test]
    fn test_prompt_carries_focus_and_snapshot() {
        let prompt = layout_prompt(&sample_snapshot(), Some("saving"));
        assert!(prompt.contains("\"saving\""));
        assert!(prompt.contains("groceries"));
        assert!(prompt.contains("5230.5"));
    }

    #[test]
    fn test_prompt_defaults_to_general_focus() {
        let prompt = layout_prompt(&sample_snapshot(), None);
        assert!(prompt.contains("\"general\""));
    }
}
