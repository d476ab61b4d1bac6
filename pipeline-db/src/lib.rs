//! Postgres persistence for the pipeline runtime: queue primitives built on
//! `pgmq`, durable rate-limit and circuit-breaker stores for `pipeline-core`'s
//! shared-state traits, DB helpers (safe upsert, retry, transactions), the
//! domain entity models, and typed access to the admin/maintenance views.

mod circuit_breaker_store;
mod error;
mod helpers;
pub mod metrics;
pub mod models;
mod queue;
mod rate_limit_store;
pub mod views;

pub use circuit_breaker_store::PgCircuitBreakerStore;
pub use error::DbError;
pub use helpers::{safe_upsert, with_db_retry, with_transaction};
pub use queue::{PgQueueStore, QueueMessage, QueueStore};
pub use rate_limit_store::PgRateLimitStore;

#[cfg(any(test, feature = "test-util"))]
pub use queue::testing::InMemoryQueueStore;
