//! Crate-wide error taxonomy.
//!
//! Every fallible operation in the engine returns `Result<T, EngineError>`.
//! Variants map 1:1 onto the error taxonomy: validation/state errors are
//! surfaced to the caller as-is, `TransientTx`/`Timeout` are retried
//! internally by the transaction runner ([`crate::txn`]) and only escape to a
//! caller once retries are exhausted.

use std::fmt;

#[derive(Debug, Clone, thiserror::Error)]
pub enum EngineError {
    // === Validation errors ===
    #[error("invalid input: {0}")]
    InvalidInput(String),

    // === Order state machine errors (C5) ===
    #[error("invalid transition: {from} -> {to}")]
    InvalidTransition { from: String, to: String },
    #[error("order is in a terminal state")]
    TerminalState,

    // === Stock ledger errors (C3) ===
    #[error("insufficient stock for product {product_id} at wholesaler {wholesaler_id}: requested {requested}, available {available}")]
    InsufficientStock {
        product_id: i64,
        wholesaler_id: i64,
        requested: i64,
        available: i64,
    },

    // === Credit ledger errors (C4) ===
    #[error("credit limit exceeded: balance {balance} would exceed limit {limit}")]
    CreditLimitExceeded {
        balance: String,
        limit: String,
    },
    #[error("credit is paused for this pair: {reason}")]
    CreditPaused { reason: String },

    // === Decision engine errors (C7) ===
    #[error("decision preconditions no longer hold for order {order_id}")]
    DecisionConflict { order_id: i64 },
    #[error("no eligible winner among {candidates} candidate offers")]
    NoEligibleWinner { candidates: usize },

    // === Idempotency errors (C2) ===
    #[error("idempotency key failed validation: {0}")]
    InvalidIdempotencyKey(String),

    // === Transaction runner errors (C1) ===
    #[error("transient transaction failure: {0}")]
    TransientTx(String),
    #[error("operation timed out after {attempt} attempt(s)")]
    Timeout { attempt: u32 },

    // === System errors ===
    #[error("database error: {0}")]
    Database(String),
    #[error("internal error: {0}")]
    Internal(String),
}

impl EngineError {
    /// Stable, machine-readable error code — matches spec.md §7 verbatim.
    pub fn code(&self) -> &'static str {
        match self {
            EngineError::InvalidInput(_) => "INVALID_INPUT",
            EngineError::InvalidTransition { .. } => "INVALID_TRANSITION",
            EngineError::TerminalState => "TERMINAL_STATE",
            EngineError::InsufficientStock { .. } => "INSUFFICIENT_STOCK",
            EngineError::CreditLimitExceeded { .. } => "CREDIT_LIMIT_EXCEEDED",
            EngineError::CreditPaused { .. } => "CREDIT_PAUSED",
            EngineError::DecisionConflict { .. } => "DECISION_CONFLICT",
            EngineError::NoEligibleWinner { .. } => "NO_ELIGIBLE_WINNER",
            EngineError::InvalidIdempotencyKey(_) => "INVALID_INPUT",
            EngineError::TransientTx(_) => "TRANSIENT_TX",
            EngineError::Timeout { .. } => "TIMEOUT",
            EngineError::Database(_) | EngineError::Internal(_) => "INTERNAL",
        }
    }

    /// True for errors the transaction runner should retry internally rather
    /// than surface to the caller.
    pub fn is_transient(&self) -> bool {
        matches!(self, EngineError::TransientTx(_) | EngineError::Timeout { .. })
    }

    pub fn invalid_transition(from: impl fmt::Display, to: impl fmt::Display) -> Self {
        EngineError::InvalidTransition {
            from: from.to_string(),
            to: to.to_string(),
        }
    }
}

impl From<sqlx::Error> for EngineError {
    fn from(e: sqlx::Error) -> Self {
        if let Some(db_err) = e.as_database_error() {
            let code = db_err.code().map(|c| c.to_string()).unwrap_or_default();
            // Postgres: 40001 serialization_failure, 40P01 deadlock_detected
            if code == "40001" || code == "40P01" {
                return EngineError::TransientTx(db_err.message().to_string());
            }
            let msg = db_err.message().to_lowercase();
            if msg.contains("deadlock") || msg.contains("serialization") {
                return EngineError::TransientTx(db_err.message().to_string());
            }
        }
        EngineError::Database(e.to_string())
    }
}

impl From<anyhow::Error> for EngineError {
    fn from(e: anyhow::Error) -> Self {
        EngineError::Internal(e.to_string())
    }
}

impl From<crate::money::MoneyError> for EngineError {
    fn from(e: crate::money::MoneyError) -> Self {
        EngineError::InvalidInput(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codes_match_taxonomy() {
        assert_eq!(EngineError::TerminalState.code(), "TERMINAL_STATE");
        assert_eq!(
            EngineError::NoEligibleWinner { candidates: 0 }.code(),
            "NO_ELIGIBLE_WINNER"
        );
    }

    #[test]
    fn transient_classification() {
        assert!(EngineError::TransientTx("x".into()).is_transient());
        assert!(EngineError::Timeout { attempt: 3 }.is_transient());
        assert!(!EngineError::TerminalState.is_transient());
    }
}
