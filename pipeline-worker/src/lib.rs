//! `WorkerBase` poll/validate/dispatch/ack runtime, span propagation across
//! stage boundaries, and the stalled-message maintenance loop. Stage handlers
//! (in `pipeline-stages`) implement [`WorkerHandler`] against this crate's
//! traits; this crate never depends on stage domain logic (spec §9's "invert
//! the cyclic reference" note).

mod error;
mod maintenance;
mod metrics;
mod trace;
mod worker;

pub use error::{IntoWorkerError, WorkerError};
pub use maintenance::{run_maintenance, MaintenanceReport, DEFAULT_STALLED_AFTER_SECS};
pub use metrics::MetricsRecorder;
#[cfg(any(test, feature = "test-util"))]
pub use metrics::testing::InMemoryMetricsRecorder;
pub use trace::{current_span, trace_operation, TraceContext};
pub use worker::{PollSummary, WorkerBase, WorkerConfig, WorkerContext, WorkerHandler};
