//! Pending-order expiry sweeper (spec.md §4.8, every 6 h default, 24 h age
//! threshold).

use crate::order_state::OrderState;
use crate::txn::TransactionRunner;
use crate::workers::with_advisory_lock;
use sqlx::{PgPool, Row};
use std::time::Duration;

const TASK_NAME: &str = "pending_order_expiry";

pub struct PendingOrderExpiryWorker {
    pool: PgPool,
    runner: TransactionRunner,
    max_age: Duration,
    batch_size: i64,
}

impl PendingOrderExpiryWorker {
    pub fn new(pool: PgPool, runner: TransactionRunner, max_age: Duration) -> Self {
        Self { pool, runner, max_age, batch_size: 200 }
    }

    pub async fn tick(&self) {
        if let Err(err) = self.scan_and_expire().await {
            tracing::error!(task = TASK_NAME, error = %err, "tick failed");
        }
    }

    async fn scan_and_expire(&self) -> Result<(), crate::error::EngineError> {
        let pool = self.pool.clone();
        let max_age_secs = self.max_age.as_secs() as i64;
        let batch_size = self.batch_size;

        let stale_ids: Option<Vec<i64>> = with_advisory_lock(&pool, TASK_NAME, move |conn| async move {
            let rows = sqlx::query(
                "SELECT id FROM orders WHERE state IN ($1, $2) \
                 AND created_at < NOW() - INTERVAL '1 second' * $3 LIMIT $4",
            )
            .bind(OrderState::Created.id())
            .bind(OrderState::PendingBids.id())
            .bind(max_age_secs)
            .bind(batch_size)
            .fetch_all(&mut *conn)
            .await?;
            Ok(rows.into_iter().map(|r| r.get("id")).collect())
        })
        .await?;

        let Some(stale_ids) = stale_ids else { return Ok(()) };
        let mut expired = 0u32;

        for id in stale_ids {
            let order_id: crate::core_types::OrderId = id.into();
            let result = self
                .runner
                .run("pending_order_expire", move |tx| {
                    Box::pin(async move {
                        let row = sqlx::query("SELECT state FROM orders WHERE id = $1 FOR UPDATE")
                            .bind(order_id.get())
                            .fetch_optional(&mut **tx)
                            .await?;
                        let Some(row) = row else { return Ok(()) };
                        let state = OrderState::from_id(row.get::<i16, _>("state"))?;
                        state.validate_transition(OrderState::Failed)?;

                        sqlx::query("UPDATE orders SET state = $1 WHERE id = $2")
                            .bind(OrderState::Failed.id())
                            .bind(order_id.get())
                            .execute(&mut **tx)
                            .await?;
                        sqlx::query(
                            "INSERT INTO transition_log (order_id, from_state, to_state, actor, reason) \
                             VALUES ($1, $2, $3, 'pending_order_expiry_worker', 'pending_order_expired')",
                        )
                        .bind(order_id.get())
                        .bind(state.as_str())
                        .bind(OrderState::Failed.as_str())
                        .execute(&mut **tx)
                        .await?;
                        Ok(())
                    })
                })
                .await;

            match result {
                Ok(()) => expired += 1,
                Err(err) => tracing::warn!(order_id = order_id.get(), error = %err, "failed to expire pending order"),
            }
        }

        tracing::info!(task = TASK_NAME, expired, "tick complete");
        Ok(())
    }
}

pub fn spawn(
    scheduler: &mut crate::workers::Scheduler,
    interval: Duration,
    worker: std::sync::Arc<PendingOrderExpiryWorker>,
) {
    scheduler.spawn("pending_order_expiry", interval, move || {
        let worker = std::sync::Arc::clone(&worker);
        async move { worker.tick().await }
    });
}
