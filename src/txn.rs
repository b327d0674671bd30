//! Transaction Runner (C1, spec.md §4.1).
//!
//! Executes a closure against a serializable Postgres transaction with
//! bounded retry on deadlock/serialization failures and a per-attempt
//! timeout. Grounded on `transfer::coordinator`'s per-call
//! `pool.begin()`/commit discipline, generalized from that module's fixed
//! step sequence into an arbitrary closure, the way spec.md §9's "exceptions
//! for control flow" redesign flag asks for: every step returns
//! `Result<T, EngineError>` and an `Err` is the only way to abort.

use crate::error::EngineError;
use backoff::ExponentialBackoffBuilder;
use futures::future::BoxFuture;
use sqlx::{PgPool, Postgres, Transaction};
use std::time::Duration;

#[derive(Debug, Clone, Copy)]
pub struct RunnerConfig {
    pub max_retries: u32,
    pub per_attempt_timeout: Duration,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            per_attempt_timeout: Duration::from_secs(10),
        }
    }
}

/// Executes closures under serializable isolation with bounded retry.
///
/// Cloned cheaply (wraps a `PgPool`, which is itself an `Arc`-backed handle).
#[derive(Clone)]
pub struct TransactionRunner {
    pool: PgPool,
    config: RunnerConfig,
}

impl TransactionRunner {
    pub fn new(pool: PgPool, config: RunnerConfig) -> Self {
        Self { pool, config }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Run `f` to completion inside a serializable transaction. All effects
    /// are committed together or not at all — `f` never observes a partial
    /// commit and neither does the caller.
    pub async fn run<T, F>(&self, operation: &str, mut f: F) -> Result<T, EngineError>
    where
        T: Send + 'static,
        F: for<'c> FnMut(&'c mut Transaction<'_, Postgres>) -> BoxFuture<'c, Result<T, EngineError>>
            + Send,
    {
        let backoff = ExponentialBackoffBuilder::new()
            .with_initial_interval(Duration::from_millis(50))
            .with_max_interval(Duration::from_secs(1))
            .with_randomization_factor(0.1)
            .with_max_elapsed_time(None)
            .build();
        let mut backoff_iter = backoff;

        let mut attempt: u32 = 0;
        loop {
            attempt += 1;
            let result = self.run_once(&mut f).await;

            match result {
                Ok(value) => return Ok(value),
                Err(err) if err.is_transient() && attempt <= self.config.max_retries => {
                    let delay = backoff::backoff::Backoff::next_backoff(&mut backoff_iter)
                        .unwrap_or(Duration::from_millis(100));
                    tracing::warn!(
                        operation,
                        attempt,
                        error = %err,
                        delay_ms = delay.as_millis() as u64,
                        "transient transaction failure, retrying"
                    );
                    tokio::time::sleep(delay).await;
                    continue;
                }
                Err(err) => {
                    self.log_failure(operation, attempt, &err).await;
                    return Err(if err.is_transient() {
                        EngineError::Timeout { attempt }
                    } else {
                        err
                    });
                }
            }
        }
    }

    async fn run_once<T, F>(&self, f: &mut F) -> Result<T, EngineError>
    where
        T: Send + 'static,
        F: for<'c> FnMut(&'c mut Transaction<'_, Postgres>) -> BoxFuture<'c, Result<T, EngineError>>
            + Send,
    {
        let mut tx = self.pool.begin().await?;
        sqlx::query("SET TRANSACTION ISOLATION LEVEL SERIALIZABLE")
            .execute(&mut *tx)
            .await?;

        let attempt_body = async {
            let value = f(&mut tx).await?;
            tx.commit().await?;
            Ok(value)
        };

        match tokio::time::timeout(self.config.per_attempt_timeout, attempt_body).await {
            Ok(result) => result,
            Err(_elapsed) => Err(EngineError::TransientTx("per-attempt deadline exceeded".into())),
        }
    }

    /// Persist a failure record in an independent, lower-isolation
    /// transaction so failure visibility survives the outer rollback.
    /// Best-effort: a logging failure is traced but never escalated, since it
    /// must not mask the original error.
    async fn log_failure(&self, operation: &str, attempt: u32, err: &EngineError) {
        let result = sqlx::query(
            "INSERT INTO webhook_failure_log (operation, entity_ref, error_snapshot, retry_count, next_retry_at) \
             VALUES ($1, $2, $3, $4, NULL)",
        )
        .bind(operation)
        .bind("")
        .bind(err.to_string())
        .bind(attempt as i32)
        .execute(&self.pool)
        .await;

        if let Err(log_err) = result {
            tracing::error!(operation, %log_err, original_error = %err, "failed to persist failure log");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_matches_spec_defaults() {
        let cfg = RunnerConfig::default();
        assert_eq!(cfg.max_retries, 3);
        assert_eq!(cfg.per_attempt_timeout, Duration::from_secs(10));
    }
}
