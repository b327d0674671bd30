//! Process entry point.
//!
//! Loads configuration, connects to Postgres, wires the Command API and the
//! Timeout/Recovery worker scheduler, then blocks until a shutdown signal
//! arrives. No HTTP server lives here (out of scope per spec.md §1) — this
//! binary only proves the wiring: a real deployment embeds [`CommandApi`]
//! behind whatever transport receives webhooks.

use std::sync::Arc;

use order_fulfillment_engine::command::CommandApi;
use order_fulfillment_engine::config::AppConfig;
use order_fulfillment_engine::db::Database;
use order_fulfillment_engine::decision::DecisionEngine;
use order_fulfillment_engine::events::{EventPublisher, InlinePublisher, RedisPublisher};
use order_fulfillment_engine::flags;
use order_fulfillment_engine::idempotency::IdempotencyStore;
use order_fulfillment_engine::logging;
use order_fulfillment_engine::txn::{RunnerConfig, TransactionRunner};
use order_fulfillment_engine::workers::{bidding, confirmation, idempotency_gc, pending, reconciliation, Scheduler};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = AppConfig::from_env()?;
    let _log_guard = logging::init_logging(&config);

    tracing::info!(git_hash = env!("GIT_HASH"), "starting order fulfillment engine");

    let database = Database::connect_with_pool_size(&config.db_url, config.pg_pool_size).await?;
    database.health_check().await?;

    let runner = TransactionRunner::new(
        database.pool().clone(),
        RunnerConfig {
            max_retries: config.transaction_max_retries,
            per_attempt_timeout: config.transaction_timeout,
        },
    );
    let idempotency = Arc::new(IdempotencyStore::new(database.pool().clone(), config.idempotency_ttl));
    let decision_engine = Arc::new(DecisionEngine::new(runner.clone()));

    let publisher: Arc<dyn EventPublisher> = match &config.redis_url {
        Some(url) => Arc::new(RedisPublisher::new(url.clone())),
        None => {
            tracing::warn!("REDIS_URL not set, outbound notification fan-out degraded to inline");
            Arc::new(InlinePublisher::new())
        }
    };

    let launch_flags = flags::watch_flags(database.pool().clone(), std::time::Duration::from_secs(30)).await;

    let command_api = CommandApi::new(
        runner.clone(),
        Arc::clone(&idempotency),
        Arc::clone(&decision_engine),
        Arc::clone(&publisher),
        launch_flags,
    );
    // Held for the process lifetime: a real transport layer would share this
    // handle across request handlers instead of constructing its own.
    let _command_api = Arc::new(command_api);

    let mut scheduler = Scheduler::new();

    let bidding_worker = Arc::new(bidding::BidWindowExpiryWorker::new(
        database.pool().clone(),
        Arc::clone(&decision_engine),
    ));
    bidding::spawn(&mut scheduler, config.worker_tick_bidding, bidding_worker);

    let confirmation_worker = Arc::new(confirmation::ConfirmationTimeoutWorker::new(
        database.pool().clone(),
        runner.clone(),
        Arc::clone(&decision_engine),
        config.confirmation_timeout,
    ));
    confirmation::spawn(&mut scheduler, config.worker_tick_confirmation, confirmation_worker);

    let pending_worker = Arc::new(pending::PendingOrderExpiryWorker::new(
        database.pool().clone(),
        runner.clone(),
        config.pending_order_ttl,
    ));
    pending::spawn(&mut scheduler, config.worker_tick_pending, pending_worker);

    let gc_worker = Arc::new(idempotency_gc::IdempotencyGcWorker::new(database.pool().clone(), Arc::clone(&idempotency)));
    idempotency_gc::spawn(&mut scheduler, config.worker_tick_idempotency_gc, gc_worker);

    let reconciliation_worker = Arc::new(reconciliation::ReconciliationWorker::new(database.pool().clone()));
    reconciliation::spawn(&mut scheduler, config.worker_tick_reconciliation, reconciliation_worker);

    tracing::info!("all workers scheduled, engine is ready");

    tokio::signal::ctrl_c().await?;
    tracing::info!("shutdown signal received, draining workers");
    scheduler.shutdown().await;

    Ok(())
}
