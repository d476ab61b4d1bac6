//! Stalled-message recovery loop (spec §4.7 "Stalled recovery"): a task separate
//! from `WorkerBase::run_once`, invoked periodically across all queues, clearing
//! leases lapsed for more than `stalled_after_secs` and rolling up per-queue
//! pending counts.

use std::sync::Arc;

use pipeline_db::QueueStore;

use crate::error::WorkerError;

/// Messages whose visibility timeout lapsed more than 30 minutes ago indicate a
/// worker crashed mid-processing (spec §4.7).
pub const DEFAULT_STALLED_AFTER_SECS: i64 = 30 * 60;

#[derive(Debug, Clone, Default, PartialEq)]
pub struct MaintenanceReport {
    pub stalled_recovered: i64,
    pub queue_pending_counts: Vec<(String, i64)>,
}

/// Run one maintenance pass over `queues`: recover stalled leases on each, then
/// snapshot pending counts, writing a `maintenance_logs` row and one
/// `queue_health_logs` row per queue.
pub async fn run_maintenance(
    pool: &sqlx::PgPool,
    queue_store: &Arc<dyn QueueStore>,
    queues: &[&str],
    stalled_after_secs: i64,
) -> Result<MaintenanceReport, WorkerError> {
    let mut report = MaintenanceReport::default();

    for &queue in queues {
        let recovered = queue_store.recover_stalled(queue, stalled_after_secs).await?;
        report.stalled_recovered += recovered as i64;

        let pending = queue_store.pending_count(queue).await?;
        report.queue_pending_counts.push((queue.to_string(), pending));

        if let Err(e) = pipeline_db::metrics::record_queue_health(pool, queue, pending).await {
            tracing::error!(queue, error = %e, "failed to record queue health");
        }
    }

    let queue_health = serde_json::json!(report
        .queue_pending_counts
        .iter()
        .map(|(q, count)| (q.clone(), *count))
        .collect::<std::collections::HashMap<_, _>>());

    if let Err(e) =
        pipeline_db::metrics::record_maintenance_log(pool, report.stalled_recovered as i32, queue_health).await
    {
        tracing::error!(error = %e, "failed to record maintenance log");
    }

    tracing::info!(
        stalled_recovered = report.stalled_recovered,
        queues = queues.len(),
        "maintenance pass complete"
    );

    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pipeline_db::InMemoryQueueStore;

    #[tokio::test]
    async fn recovers_stalled_messages_across_queues() {
        let store: Arc<dyn QueueStore> = Arc::new(InMemoryQueueStore::new());
        store.send("queue_a", &serde_json::json!({})).await.unwrap();
        store.read("queue_a", 1, 10).await.unwrap();

        // `pool` is never touched by the in-memory store paths under test; the
        // metrics/logging calls below would need a live database, so this test
        // only exercises the recovery counting via the store directly.
        let recovered = store.recover_stalled("queue_a", 0).await.unwrap();
        assert_eq!(recovered, 1);
    }
}
