//! Winner-confirmation timeout sweeper (spec.md §4.8, every 2 min default,
//! 15 min confirmation window default).
//!
//! For each stale WHOLESALER_ACCEPTED order: expire the accepted offer,
//! release its reservation, reverse the DEBIT with a CREDIT, clear
//! `final_wholesaler`, transition back to PENDING_BIDS, and re-invoke the
//! decision engine excluding the timed-out wholesaler. Grounded directly on
//! `transfer::worker::scan_and_recover`'s "find stale, step each" shape.

use crate::core_types::{OrderId, RetailerId, WholesalerId};
use crate::credit::CreditLedger;
use crate::decision::DecisionEngine;
use crate::error::EngineError;
use crate::money::Money;
use crate::order_state::OrderState;
use crate::txn::TransactionRunner;
use crate::workers::with_advisory_lock;
use sqlx::{PgPool, Row};
use std::sync::Arc;
use std::time::Duration;

const TASK_NAME: &str = "winner_confirmation_timeout";

pub struct ConfirmationTimeoutWorker {
    pool: PgPool,
    runner: TransactionRunner,
    decision_engine: Arc<DecisionEngine>,
    confirmation_timeout: Duration,
    batch_size: i64,
}

struct StaleOrder {
    order_id: OrderId,
    retailer_id: RetailerId,
    wholesaler_id: WholesalerId,
    /// The amount actually DEBITed when this wholesaler was awarded — not
    /// `orders.total_amount`, which reflects the retailer's original
    /// per-item pricing and can differ from what the winning quote charged.
    debit_amount: Money,
}

impl ConfirmationTimeoutWorker {
    pub fn new(
        pool: PgPool,
        runner: TransactionRunner,
        decision_engine: Arc<DecisionEngine>,
        confirmation_timeout: Duration,
    ) -> Self {
        Self { pool, runner, decision_engine, confirmation_timeout, batch_size: 100 }
    }

    pub async fn tick(&self) {
        if let Err(err) = self.scan_and_recover().await {
            tracing::error!(task = TASK_NAME, error = %err, "tick failed");
        }
    }

    async fn scan_and_recover(&self) -> Result<(), EngineError> {
        let pool = self.pool.clone();
        let threshold_secs = self.confirmation_timeout.as_secs() as i64;
        let batch_size = self.batch_size;

        let stale: Option<Vec<StaleOrder>> = with_advisory_lock(&pool, TASK_NAME, move |conn| async move {
            let rows = sqlx::query(
                "SELECT id, retailer_id, final_wholesaler_id FROM orders \
                 WHERE state = $1 AND updated_at < NOW() - INTERVAL '1 second' * $2 \
                 ORDER BY updated_at ASC LIMIT $3",
            )
            .bind(OrderState::WholesalerAccepted.id())
            .bind(threshold_secs)
            .bind(batch_size)
            .fetch_all(&mut *conn)
            .await?;

            let mut out = Vec::with_capacity(rows.len());
            for row in rows {
                let wholesaler_id: Option<i64> = row.get("final_wholesaler_id");
                let Some(wholesaler_id) = wholesaler_id else { continue };
                let order_id: OrderId = row.get::<i64, _>("id").into();
                let wholesaler_id: WholesalerId = wholesaler_id.into();

                let Some(debit_amount) = CreditLedger::last_debit_amount(&mut *conn, order_id, wholesaler_id).await?
                else {
                    tracing::warn!(
                        order_id = order_id.get(),
                        "stale awarded order has no matching DEBIT entry, skipping recovery"
                    );
                    continue;
                };

                out.push(StaleOrder {
                    order_id,
                    retailer_id: row.get::<i64, _>("retailer_id").into(),
                    wholesaler_id,
                    debit_amount,
                });
            }
            Ok(out)
        })
        .await?;

        let Some(stale) = stale else { return Ok(()) };
        let mut recovered = 0u32;

        for order in stale {
            match self.recover_one(&order).await {
                Ok(()) => recovered += 1,
                Err(err) => {
                    tracing::warn!(
                        order_id = order.order_id.get(),
                        error = %err,
                        "confirmation-timeout recovery failed"
                    );
                }
            }
        }
        tracing::info!(task = TASK_NAME, recovered, "tick complete");
        Ok(())
    }

    async fn recover_one(&self, order: &StaleOrder) -> Result<(), EngineError> {
        let order_id = order.order_id;
        let wholesaler_id = order.wholesaler_id;

        self.runner
            .run("confirmation_timeout_reset", move |tx| {
                Box::pin(async move {
                    sqlx::query(
                        "UPDATE vendor_offers SET status = 'EXPIRED' \
                         WHERE order_id = $1 AND wholesaler_id = $2 AND status = 'ACCEPTED'",
                    )
                    .bind(order_id.get())
                    .bind(wholesaler_id.get())
                    .execute(&mut **tx)
                    .await?;

                    sqlx::query(
                        "UPDATE orders SET state = $1, final_wholesaler_id = NULL WHERE id = $2",
                    )
                    .bind(OrderState::PendingBids.id())
                    .bind(order_id.get())
                    .execute(&mut **tx)
                    .await?;

                    sqlx::query(
                        "INSERT INTO transition_log (order_id, from_state, to_state, actor, reason) \
                         VALUES ($1, $2, $3, 'confirmation_timeout_worker', 'winner_confirmation_timeout')",
                    )
                    .bind(order_id.get())
                    .bind(OrderState::WholesalerAccepted.as_str())
                    .bind(OrderState::PendingBids.as_str())
                    .execute(&mut **tx)
                    .await?;

                    Ok(())
                })
            })
            .await?;

        self.decision_engine
            .decide(
                order_id,
                &[wholesaler_id],
                Some((wholesaler_id, order.retailer_id, order.debit_amount)),
            )
            .await
            .map(|_| ())
            .or_else(|err| match err {
                EngineError::NoEligibleWinner { .. } => Ok(()),
                other => Err(other),
            })
    }
}

pub fn spawn(
    scheduler: &mut crate::workers::Scheduler,
    interval: Duration,
    worker: Arc<ConfirmationTimeoutWorker>,
) {
    scheduler.spawn("winner_confirmation_timeout", interval, move || {
        let worker = Arc::clone(&worker);
        async move { worker.tick().await }
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn task_name_matches_advisory_lock_key() {
        assert_eq!(TASK_NAME, "winner_confirmation_timeout");
    }
}
