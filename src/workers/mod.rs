//! Timeout/Recovery Workers (C8, spec.md §4.8).
//!
//! Generalizes `transfer::worker::RecoveryWorker`'s single hardcoded
//! scan-and-sleep loop into a small registry of named, independently
//! configurable periodic tasks. Each task acquires a short-lived Postgres
//! advisory lock keyed by its own name before ticking, so only one instance
//! runs cluster-wide even when several processes share the same database.

pub mod bidding;
pub mod confirmation;
pub mod idempotency_gc;
pub mod pending;
pub mod reconciliation;

use sqlx::{PgConnection, PgPool, Row};
use std::future::Future;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::error::EngineError;

/// Attempt a tick under a cluster-wide advisory lock named after the task.
/// Returns `Ok(None)` without running `f` if another instance already holds
/// the lock — this is a best-effort single-instance guarantee, not a
/// correctness one: every operation `f` performs must itself be safe to
/// retry if two instances somehow do race.
pub async fn with_advisory_lock<F, Fut, T>(
    pool: &PgPool,
    task_name: &str,
    f: F,
) -> Result<Option<T>, EngineError>
where
    F: FnOnce(&mut PgConnection) -> Fut,
    Fut: Future<Output = Result<T, EngineError>>,
{
    let mut conn = pool.acquire().await?;

    let row = sqlx::query("SELECT pg_try_advisory_lock(hashtext($1))")
        .bind(task_name)
        .fetch_one(&mut *conn)
        .await?;
    let acquired: bool = row.get(0);
    if !acquired {
        tracing::debug!(task_name, "advisory lock held elsewhere, skipping tick");
        return Ok(None);
    }

    let result = f(&mut conn).await;

    if let Err(unlock_err) = sqlx::query("SELECT pg_advisory_unlock(hashtext($1))")
        .bind(task_name)
        .execute(&mut *conn)
        .await
    {
        tracing::error!(task_name, error = %unlock_err, "failed to release advisory lock");
    }

    result.map(Some)
}

/// Owns the background task set. Construct after config is loaded, `spawn`
/// each periodic task, and `shutdown` drains in-flight ticks before
/// returning — no task is killed mid-transaction.
pub struct Scheduler {
    shutdown_tx: watch::Sender<bool>,
    handles: Vec<(&'static str, JoinHandle<()>)>,
}

impl Scheduler {
    pub fn new() -> Self {
        let (shutdown_tx, _) = watch::channel(false);
        Self { shutdown_tx, handles: Vec::new() }
    }

    /// Register and start a periodic task. `tick` is invoked once per
    /// interval; it should itself be idempotent and cheap to skip (e.g. via
    /// `with_advisory_lock`) since overlapping invocations across cluster
    /// instances are expected, not exceptional.
    pub fn spawn<F, Fut>(&mut self, name: &'static str, interval: Duration, mut tick: F)
    where
        F: FnMut() -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send,
    {
        let mut shutdown_rx = self.shutdown_tx.subscribe();
        let handle = tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = tokio::time::sleep(interval) => {
                        tick().await;
                    }
                    _ = shutdown_rx.changed() => {
                        tracing::info!(task = name, "worker received shutdown signal");
                        break;
                    }
                }
            }
        });
        self.handles.push((name, handle));
    }

    /// Signal shutdown and wait for every task to finish its current tick.
    pub async fn shutdown(self) {
        let _ = self.shutdown_tx.send(true);
        for (name, handle) in self.handles {
            if let Err(err) = handle.await {
                tracing::error!(task = name, error = %err, "worker task panicked");
            }
        }
    }
}

impl Default for Scheduler {
    fn default() -> Self {
        Self::new()
    }
}
