use chrono::{Duration, NaiveDate};
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, PgPool};
use uuid::Uuid;

/// 预测只需要金额和日期，正数收入负数支出
#[derive(Debug, Clone, FromRow)]
pub struct TransactionRecord {
    pub amount: f64,
    pub occurred_on: NaiveDate,
}

#[derive(Debug, Deserialize)]
pub struct ForecastQuery {
    pub days: Option<u32>,
    pub force_refresh: Option<bool>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ForecastPoint {
    pub date: NaiveDate,
    pub projected_balance: f64,
    pub projected_income: f64,
    pub projected_expenses: f64,
    pub confidence: f64,
}

/// 取多长的历史窗口做推导
pub const HISTORY_DAYS: i32 = 90;
/// 历史跨度低于这个天数就放弃预测
pub const MIN_HISTORY_DAYS: i64 = 7;

impl TransactionRecord {
    pub async fn load_recent(pool: &PgPool, user_id: Uuid) -> Result<Vec<Self>, sqlx::Error> {
        sqlx::query_as::<_, TransactionRecord>(
            r#"
            SELECT amount::FLOAT8 AS amount, occurred_on
            FROM transactions
            WHERE user_id = $1 AND occurred_on >= CURRENT_DATE - $2
            ORDER BY occurred_on
            "#,
        )
        .bind(user_id)
        .bind(HISTORY_DAYS)
        .fetch_all(pool)
        .await
    }
}

pub async fn load_total_balance(pool: &PgPool, user_id: Uuid) -> Result<f64, sqlx::Error> {
    sqlx::query_scalar::<_, f64>(
        "SELECT COALESCE(SUM(balance), 0)::FLOAT8 FROM accounts WHERE user_id = $1",
    )
    .bind(user_id)
    .fetch_one(pool)
    .await
}

/// 由历史流水线性外推逐日现金流；历史不足时返回 None 走降级响应
///
/// 同样的输入必须给出同样的预测，缓存命中与重算的结果才对得上。
pub fn compute_forecast(
    transactions: &[TransactionRecord],
    current_balance: f64,
    days: u32,
    today: NaiveDate,
) -> Option<Vec<ForecastPoint>> {
    let first = transactions.iter().map(|t| t.occurred_on).min()?;
    let last = transactions.iter().map(|t| t.occurred_on).max()?;
    let span_days = (last - first).num_days() + 1;
    if span_days < MIN_HISTORY_DAYS {
        return None;
    }

    let income: f64 = transactions
        .iter()
        .filter(|t| t.amount > 0.0)
        .map(|t| t.amount)
        .sum();
    let expenses: f64 = transactions
        .iter()
        .filter(|t| t.amount < 0.0)
        .map(|t| -t.amount)
        .sum();
    let daily_income = income / span_days as f64;
    let daily_expenses = expenses / span_days as f64;

    let mut balance = current_balance;
    let mut points = Vec::with_capacity(days as usize);
    for i in 1..=i64::from(days) {
        balance += daily_income - daily_expenses;
        // 预测期越长置信度越低
        let confidence = (1.0 - i as f64 / 180.0).max(0.3);
        points.push(ForecastPoint {
            date: today + Duration::days(i),
            projected_balance: round2(balance),
            projected_income: round2(daily_income),
            projected_expenses: round2(daily_expenses),
            confidence: round2(confidence),
        });
    }
    Some(points)
}

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

#[cfg(test)]
mod tests {
    use super::*;

    fn day(offset: i64) -> NaiveDate {
        NaiveDate::from_ymd_opt(2026, 1, 1).unwrap() + Duration::days(offset)
    }

    fn sample_history() -> Vec<TransactionRecord> {
        // 30 天跨度：第 0 天发薪，每隔一天一笔支出
        let mut records = vec![TransactionRecord {
            amount: 3000.0,
            occurred_on: day(0),
        }];
        for i in 0..15 {
            records.push(TransactionRecord {
                amount: -80.0,
                occurred_on: day(i * 2),
            });
        }
        records.push(TransactionRecord {
            amount: -50.0,
            occurred_on: day(29),
        });
        records
    }

    #[test]
    fn test_forecast_has_requested_length() {
        let points = compute_forecast(&sample_history(), 1000.0, 30, day(30)).unwrap();
        assert_eq!(points.len(), 30);
        let points = compute_forecast(&sample_history(), 1000.0, 7, day(30)).unwrap();
        assert_eq!(points.len(), 7);
    }

    #[test]
    fn test_forecast_is_deterministic() {
        let a = compute_forecast(&sample_history(), 1000.0, 30, day(30)).unwrap();
        let b = compute_forecast(&sample_history(), 1000.0, 30, day(30)).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_forecast_dates_start_tomorrow() {
        let today = day(30);
        let points = compute_forecast(&sample_history(), 1000.0, 3, today).unwrap();
        assert_eq!(points[0].date, today + Duration::days(1));
        assert_eq!(points[2].date, today + Duration::days(3));
    }

    #[test]
    fn test_confidence_never_increases_with_horizon() {
        let points = compute_forecast(&sample_history(), 1000.0, 90, day(30)).unwrap();
        for pair in points.windows(2) {
            assert!(pair[1].confidence <= pair[0].confidence);
        }
        assert!(points.last().unwrap().confidence >= 0.3);
    }

    #[test]
    fn test_balance_follows_net_flow() {
        let points = compute_forecast(&sample_history(), 1000.0, 2, day(30)).unwrap();
        // 净流入为正，余额应逐日上升
        assert!(points[0].projected_balance > 1000.0);
        assert!(points[1].projected_balance > points[0].projected_balance);
    }

    #[test]
    fn test_empty_history_degrades() {
        assert!(compute_forecast(&[], 1000.0, 30, day(0)).is_none());
    }

    #[test]
    fn test_short_history_degrades() {
        let records = vec![
            TransactionRecord {
                amount: 100.0,
                occurred_on: day(0),
            },
            TransactionRecord {
                amount: -20.0,
                occurred_on: day(3),
            },
        ];
        // 只有 4 天跨度，不足以外推
        assert!(compute_forecast(&records, 1000.0, 30, day(4)).is_none());
    }
}
