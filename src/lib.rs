//! B2B wholesale Order Fulfillment Engine — core library.
//!
//! The coupled subsystem at the heart of a wholesale ordering backend:
//! the order state machine, the bidding/decision engine that awards one
//! winning wholesaler per order, the stock reservation ledger, the
//! hash-chained credit ledger, the idempotent transactional wrapper that
//! binds them, and the scheduled timeout/recovery workers. HTTP routing,
//! the messaging-provider wire format, and admin UI are out of scope: this
//! crate exposes a framework-agnostic command API and a worker scheduler;
//! callers wire both into whatever transport they use.
//!
//! # Modules
//!
//! - [`core_types`] - identifier newtypes (`OrderId`, `WholesalerId`, ...)
//! - [`config`] - environment-driven process configuration
//! - [`flags`] - live-reloadable launch-control flags
//! - [`money`] - fixed-point monetary amounts
//! - [`models`] - entity types (`Order`, `VendorOffer`, `LedgerEntry`, ...)
//! - [`order_state`] - the order state machine (C5)
//! - [`stock`] - the stock reservation ledger (C3)
//! - [`credit`] - the hash-chained credit ledger (C4)
//! - [`scoring`] - pure bid-scoring function (C6)
//! - [`decision`] - the award decision engine (C7)
//! - [`idempotency`] - inbound webhook deduplication (C2)
//! - [`txn`] - the serializable transaction runner (C1)
//! - [`command`] - the command API / webhook ingress (C9)
//! - [`workers`] - timeout/recovery sweepers (C8)
//! - [`events`] - outbound order-state event publishing
//! - [`db`] - Postgres connection pool wrapper
//! - [`logging`] - structured logging setup
//! - [`error`] - crate-wide error taxonomy

pub mod command;
pub mod config;
pub mod core_types;
pub mod credit;
pub mod db;
pub mod decision;
pub mod error;
pub mod events;
pub mod flags;
pub mod idempotency;
pub mod logging;
pub mod models;
pub mod money;
pub mod order_state;
pub mod scoring;
pub mod stock;
pub mod txn;
pub mod workers;

// Convenient re-exports at crate root
pub use command::{Command, CommandApi, CommandOutcome};
pub use config::AppConfig;
pub use core_types::{OfferId, OrderId, ProductId, RetailerId, WholesalerId};
pub use credit::CreditLedger;
pub use db::Database;
pub use decision::DecisionEngine;
pub use error::EngineError;
pub use idempotency::IdempotencyStore;
pub use money::Money;
pub use order_state::OrderState;
pub use stock::StockLedger;
pub use txn::TransactionRunner;
