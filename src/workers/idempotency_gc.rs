//! Idempotency GC sweeper (spec.md §4.8, hourly default).

use crate::idempotency::IdempotencyStore;
use crate::workers::with_advisory_lock;
use sqlx::PgPool;
use std::sync::Arc;
use std::time::Duration;

const TASK_NAME: &str = "idempotency_gc";

pub struct IdempotencyGcWorker {
    pool: PgPool,
    store: Arc<IdempotencyStore>,
}

impl IdempotencyGcWorker {
    pub fn new(pool: PgPool, store: Arc<IdempotencyStore>) -> Self {
        Self { pool, store }
    }

    pub async fn tick(&self) {
        let store = Arc::clone(&self.store);
        let result = with_advisory_lock(&self.pool, TASK_NAME, move |_conn| {
            let store = Arc::clone(&store);
            async move { store.sweep_expired().await }
        })
        .await;

        match result {
            Ok(Some(deleted)) => tracing::info!(task = TASK_NAME, deleted, "tick complete"),
            Ok(None) => {}
            Err(err) => tracing::error!(task = TASK_NAME, error = %err, "tick failed"),
        }
    }
}

pub fn spawn(scheduler: &mut crate::workers::Scheduler, interval: Duration, worker: Arc<IdempotencyGcWorker>) {
    scheduler.spawn("idempotency_gc", interval, move || {
        let worker = Arc::clone(&worker);
        async move { worker.tick().await }
    });
}
