//! Bid-window expiry sweeper (spec.md §4.8, every 2 min by default).

use crate::decision::DecisionEngine;
use crate::order_state::OrderState;
use crate::workers::with_advisory_lock;
use sqlx::{PgPool, Row};
use std::sync::Arc;
use std::time::Duration;

const TASK_NAME: &str = "bid_window_expiry";

pub struct BidWindowExpiryWorker {
    pool: PgPool,
    decision_engine: Arc<DecisionEngine>,
    batch_size: i64,
}

impl BidWindowExpiryWorker {
    pub fn new(pool: PgPool, decision_engine: Arc<DecisionEngine>) -> Self {
        Self { pool, decision_engine, batch_size: 100 }
    }

    pub async fn tick(&self) {
        if let Err(err) = self.scan_and_decide().await {
            tracing::error!(task = TASK_NAME, error = %err, "tick failed");
        }
    }

    async fn scan_and_decide(&self) -> Result<(), crate::error::EngineError> {
        let pool = self.pool.clone();
        let decision_engine = Arc::clone(&self.decision_engine);
        let batch_size = self.batch_size;

        with_advisory_lock(&pool, TASK_NAME, move |conn| {
            let decision_engine = Arc::clone(&decision_engine);
            async move {
                let rows = sqlx::query(
                    "SELECT id FROM orders WHERE state = $1 AND expires_at <= NOW() \
                     AND final_wholesaler_id IS NULL ORDER BY expires_at ASC LIMIT $2",
                )
                .bind(OrderState::PendingBids.id())
                .bind(batch_size)
                .fetch_all(&mut *conn)
                .await?;

                let mut advanced = 0u32;
                for row in &rows {
                    let order_id: i64 = row.get("id");
                    match decision_engine.decide(order_id.into(), &[], None).await {
                        Ok(_) => advanced += 1,
                        Err(err) => {
                            tracing::warn!(order_id, error = %err, "bid-window expiry decision failed");
                        }
                    }
                }
                tracing::info!(task = TASK_NAME, scanned = rows.len(), advanced, "tick complete");
                Ok(())
            }
        })
        .await?;
        Ok(())
    }
}

pub fn spawn(scheduler: &mut crate::workers::Scheduler, interval: Duration, worker: Arc<BidWindowExpiryWorker>) {
    scheduler.spawn("bid_window_expiry", interval, move || {
        let worker = Arc::clone(&worker);
        async move { worker.tick().await }
    });
}
