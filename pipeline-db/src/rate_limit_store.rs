//! Postgres-backed [`RateLimitStore`], using `UPDATE ... RETURNING` so the
//! increment is a single atomic round-trip regardless of how many workers
//! race on the same key (spec §4.2, §5 "never via read-modify-write").

use async_trait::async_trait;
use pipeline_core::{RateLimitStore, WindowCounter};

pub struct PgRateLimitStore {
    pool: sqlx::PgPool,
}

impl PgRateLimitStore {
    pub fn new(pool: sqlx::PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl RateLimitStore for PgRateLimitStore {
    async fn increment(&self, key: &str, window_end_millis: u64) -> Option<WindowCounter> {
        let result: Result<(i32, i64), sqlx::Error> = sqlx::query_as(
            r#"
            insert into rate_limits (key, count, window_end_millis, max_requests)
            values ($1, 1, $2, 0)
            on conflict (key) do update set
                count = case
                    when rate_limits.window_end_millis < $3 then 1
                    else rate_limits.count + 1
                end,
                window_end_millis = case
                    when rate_limits.window_end_millis < $3 then $2
                    else rate_limits.window_end_millis
                end
            returning count, window_end_millis
            "#,
        )
        .bind(key)
        .bind(window_end_millis as i64)
        .bind(window_end_millis as i64)
        .fetch_one(&self.pool)
        .await;

        match result {
            Ok((count, window_end)) => {
                Some(WindowCounter { count: count as u32, window_end_millis: window_end as u64 })
            }
            Err(err) => {
                tracing::error!(%key, error = %err, "rate limit store increment failed");
                None
            }
        }
    }

    async fn reset(&self, key: &str, new_window_end_millis: u64) {
        let result = sqlx::query(
            r#"
            insert into rate_limits (key, count, window_end_millis, max_requests)
            values ($1, 0, $2, 0)
            on conflict (key) do update set count = 0, window_end_millis = $2
            "#,
        )
        .bind(key)
        .bind(new_window_end_millis as i64)
        .execute(&self.pool)
        .await;

        if let Err(err) = result {
            tracing::error!(%key, error = %err, "rate limit store reset failed");
        }
    }

    async fn peek(&self, key: &str) -> Option<WindowCounter> {
        let result: Result<(i32, i64), sqlx::Error> =
            sqlx::query_as("select count, window_end_millis from rate_limits where key = $1")
                .bind(key)
                .fetch_one(&self.pool)
                .await;

        result.ok().map(|(count, window_end)| WindowCounter {
            count: count as u32,
            window_end_millis: window_end as u64,
        })
    }
}
