//! Ledger reconciliation sweeper (spec.md §4.8, daily default).
//!
//! For each (retailer, wholesaler) pair, recompute the balance from the
//! hash-chained ledger and verify it matches the last stored `balance_after`.
//! Mismatches are reported, never auto-corrected: correcting a ledger
//! automatically would be exactly the kind of silent mutation §4.5's
//! immutability invariant exists to prevent.

use crate::credit::CreditLedger;
use crate::workers::with_advisory_lock;
use sqlx::{PgPool, Row};
use std::time::Duration;

const TASK_NAME: &str = "ledger_reconciliation";

pub struct ReconciliationWorker {
    pool: PgPool,
}

impl ReconciliationWorker {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn tick(&self) {
        if let Err(err) = self.scan_and_verify().await {
            tracing::error!(task = TASK_NAME, error = %err, "tick failed");
        }
    }

    async fn scan_and_verify(&self) -> Result<(), crate::error::EngineError> {
        let pool = self.pool.clone();

        with_advisory_lock(&pool, TASK_NAME, move |conn| async move {
            let pairs = sqlx::query(
                "SELECT DISTINCT retailer_id, wholesaler_id FROM ledger_entries",
            )
            .fetch_all(&mut *conn)
            .await?;

            let mut mismatches = 0u32;
            for pair in &pairs {
                let retailer_id: i64 = pair.get("retailer_id");
                let wholesaler_id: i64 = pair.get("wholesaler_id");
                let ok = CreditLedger::verify_chain(conn, retailer_id.into(), wholesaler_id.into()).await?;
                if !ok {
                    mismatches += 1;
                    tracing::error!(
                        task = TASK_NAME,
                        retailer_id,
                        wholesaler_id,
                        "ledger chain verification failed"
                    );
                }
            }
            tracing::info!(task = TASK_NAME, pairs = pairs.len(), mismatches, "tick complete");
            Ok(())
        })
        .await?;
        Ok(())
    }
}

pub fn spawn(
    scheduler: &mut crate::workers::Scheduler,
    interval: Duration,
    worker: std::sync::Arc<ReconciliationWorker>,
) {
    scheduler.spawn("ledger_reconciliation", interval, move || {
        let worker = std::sync::Arc::clone(&worker);
        async move { worker.tick().await }
    });
}
