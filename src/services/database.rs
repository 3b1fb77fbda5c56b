use anyhow::Result;
use chrono::{DateTime, Utc};
use sqlx::{postgres::PgPoolOptions, PgPool, Row};

use crate::models::{Meal, UsageCounter};

use super::quota::QuotaStore;

/// Persistence for validated estimations. Called by the caller, never by the pipeline.
#[async_trait::async_trait]
pub trait MealStore: Send + Sync {
    async fn save_meal(&self, meal: &Meal) -> Result<i64>;
}

pub struct Database {
    pool: PgPool,
}

impl Database {
    pub async fn new(database_url: &str) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(5)
            .connect(database_url)
            .await?;

        let db = Database { pool };
        db.init_tables().await?;
        Ok(db)
    }

    async fn init_tables(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS users (
                user_id TEXT PRIMARY KEY,
                created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
                is_unlimited BOOLEAN NOT NULL DEFAULT FALSE,
                monthly_estimates INTEGER NOT NULL DEFAULT 0,
                usage_month TEXT
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS meals (
                id SERIAL PRIMARY KEY,
                user_id TEXT NOT NULL REFERENCES users(user_id),
                calories DOUBLE PRECISION NOT NULL,
                protein DOUBLE PRECISION NOT NULL,
                carbs DOUBLE PRECISION NOT NULL,
                fat DOUBLE PRECISION NOT NULL,
                water DOUBLE PRECISION NOT NULL,
                explanation TEXT NOT NULL,
                description TEXT,
                image_ref TEXT,
                created_at TIMESTAMPTZ NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    pub async fn ensure_user_exists(&self, user_id: &str) -> Result<()> {
        sqlx::query(
            "INSERT INTO users (user_id, created_at) VALUES ($1, $2) ON CONFLICT (user_id) DO NOTHING",
        )
        .bind(user_id)
        .bind(Utc::now())
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}

/// `YYYY-MM` bucket the monthly counter belongs to.
pub fn usage_month(at: DateTime<Utc>) -> String {
    at.format("%Y-%m").to_string()
}

/// A counter stored for an earlier month does not count against this one.
fn effective_count(stored_month: Option<&str>, stored_count: i32, current_month: &str) -> i64 {
    match stored_month {
        Some(month) if month == current_month => stored_count as i64,
        _ => 0,
    }
}

#[async_trait::async_trait]
impl QuotaStore for Database {
    async fn get_usage(&self, user_id: &str) -> Result<UsageCounter> {
        let row = sqlx::query(
            "SELECT is_unlimited, monthly_estimates, usage_month FROM users WHERE user_id = $1",
        )
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await?;

        let current_month = usage_month(Utc::now());
        let usage = match row {
            Some(row) => {
                let is_unlimited: bool = row.get(0);
                let count: i32 = row.get(1);
                let month: Option<String> = row.get(2);
                UsageCounter {
                    count: effective_count(month.as_deref(), count, &current_month),
                    is_unlimited,
                }
            }
            None => UsageCounter {
                count: 0,
                is_unlimited: false,
            },
        };

        Ok(usage)
    }

    async fn increment(&self, user_id: &str) -> Result<()> {
        // Single statement so concurrent commits never lose an update
        sqlx::query(
            r#"
            INSERT INTO users (user_id, created_at, monthly_estimates, usage_month)
            VALUES ($1, $2, 1, $3)
            ON CONFLICT (user_id) DO UPDATE SET
                monthly_estimates = CASE
                    WHEN users.usage_month = EXCLUDED.usage_month THEN users.monthly_estimates + 1
                    ELSE 1
                END,
                usage_month = EXCLUDED.usage_month
            "#,
        )
        .bind(user_id)
        .bind(Utc::now())
        .bind(usage_month(Utc::now()))
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}

#[async_trait::async_trait]
impl MealStore for Database {
    async fn save_meal(&self, meal: &Meal) -> Result<i64> {
        self.ensure_user_exists(&meal.user_id).await?;
        let explanation = serde_json::to_string(&meal.explanation)?;

        let result = sqlx::query(
            r#"
            INSERT INTO meals (user_id, calories, protein, carbs, fat, water, explanation, description, image_ref, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            RETURNING id
            "#,
        )
        .bind(&meal.user_id)
        .bind(meal.macros.calories)
        .bind(meal.macros.protein)
        .bind(meal.macros.carbs)
        .bind(meal.macros.fat)
        .bind(meal.macros.water)
        .bind(explanation)
        .bind(&meal.description)
        .bind(&meal.image_ref)
        .bind(meal.created_at)
        .fetch_one(&self.pool)
        .await?;

        let id: i32 = result.get(0);
        Ok(id as i64)
    }
}
