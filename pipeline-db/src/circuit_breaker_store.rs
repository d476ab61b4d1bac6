//! Postgres-backed [`CircuitBreakerStore`], mirroring in-memory atomic state
//! to the `circuit_breakers` table so a breaker tripped by one worker process
//! is observed as open by every other process polling the same queue.

use async_trait::async_trait;
use pipeline_core::{CircuitBreakerSnapshot, CircuitBreakerStore, CircuitState};

pub struct PgCircuitBreakerStore {
    pool: sqlx::PgPool,
}

impl PgCircuitBreakerStore {
    pub fn new(pool: sqlx::PgPool) -> Self {
        Self { pool }
    }
}

fn state_to_i16(state: CircuitState) -> i16 {
    match state {
        CircuitState::Closed => 0,
        CircuitState::Open => 1,
        CircuitState::HalfOpen => 2,
    }
}

fn state_from_i16(raw: i16) -> CircuitState {
    match raw {
        1 => CircuitState::Open,
        2 => CircuitState::HalfOpen,
        _ => CircuitState::Closed,
    }
}

#[async_trait]
impl CircuitBreakerStore for PgCircuitBreakerStore {
    async fn load(&self, name: &str) -> Option<CircuitBreakerSnapshot> {
        #[derive(sqlx::FromRow)]
        struct Row {
            state: i16,
            failure_count: i32,
            success_count: i32,
            last_failure_time_millis: Option<i64>,
            reset_timeout_ms: i64,
        }

        let row: Result<Row, sqlx::Error> = sqlx::query_as(
            "select state, failure_count, success_count, last_failure_time_millis, reset_timeout_ms \
             from circuit_breakers where name = $1",
        )
        .bind(name)
        .fetch_one(&self.pool)
        .await;

        match row {
            Ok(row) => Some(CircuitBreakerSnapshot {
                name: name.to_string(),
                state: state_from_i16(row.state),
                failure_count: row.failure_count.max(0) as usize,
                success_count: row.success_count.max(0) as usize,
                last_failure_time_millis: row.last_failure_time_millis.map(|v| v.max(0) as u64),
                effective_reset_timeout_millis: row.reset_timeout_ms.max(0) as u64,
            }),
            Err(err) => {
                if !matches!(err, sqlx::Error::RowNotFound) {
                    tracing::error!(%name, error = %err, "circuit breaker store load failed");
                }
                None
            }
        }
    }

    async fn persist(&self, snapshot: CircuitBreakerSnapshot) {
        let result = sqlx::query(
            r#"
            insert into circuit_breakers
                (name, state, failure_count, success_count, last_failure_time_millis,
                 last_state_change, failure_threshold, reset_timeout_ms)
            values ($1, $2, $3, $4, $5, now(), 0, $6)
            on conflict (name) do update set
                state = excluded.state,
                failure_count = excluded.failure_count,
                success_count = excluded.success_count,
                last_failure_time_millis = excluded.last_failure_time_millis,
                last_state_change = now(),
                reset_timeout_ms = excluded.reset_timeout_ms
            "#,
        )
        .bind(&snapshot.name)
        .bind(state_to_i16(snapshot.state))
        .bind(snapshot.failure_count as i32)
        .bind(snapshot.success_count as i32)
        .bind(snapshot.last_failure_time_millis.map(|v| v as i64))
        .bind(snapshot.effective_reset_timeout_millis as i64)
        .execute(&self.pool)
        .await;

        if let Err(err) = result {
            tracing::error!(name = %snapshot.name, error = %err, "circuit breaker store persist failed");
        }
    }
}
