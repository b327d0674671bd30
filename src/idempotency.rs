//! Idempotency Store (C2, spec.md §4.2).
//!
//! Backs inbound webhook deduplication with a unique-key insert-if-absent
//! race: two concurrent first-time requests for the same key both attempt
//! the insert, exactly one wins, and the loser polls the winner's row until
//! it flips from in-flight (`response_status IS NULL`) to complete.

use crate::error::EngineError;
use chrono::{DateTime, Utc};
use serde_json::Value;
use sqlx::{PgPool, Row};
use std::time::Duration;

pub enum LookupResult {
    Miss,
    Hit { status: i32, body: Value },
}

#[derive(Debug, Clone)]
pub struct IdempotencyStore {
    pool: PgPool,
    ttl: Duration,
}

/// Opaque caller-supplied token: ≤255 chars, alphanumeric plus `-`/`_`.
pub fn validate_key(key: &str) -> Result<(), EngineError> {
    if key.is_empty() || key.len() > 255 {
        return Err(EngineError::InvalidIdempotencyKey(format!(
            "key length {} out of bounds (1-255)",
            key.len()
        )));
    }
    if !key.chars().all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_') {
        return Err(EngineError::InvalidIdempotencyKey(
            "key must be alphanumeric, '-' or '_' only".into(),
        ));
    }
    Ok(())
}

impl IdempotencyStore {
    pub fn new(pool: PgPool, ttl: Duration) -> Self {
        Self { pool, ttl }
    }

    /// MISS / HIT lookup per spec.md §4.2. A HIT with a null response means a
    /// concurrent first-time request is still in flight; this call blocks
    /// (bounded, polling) until that request commits its response.
    pub async fn lookup(&self, key: &str) -> Result<LookupResult, EngineError> {
        validate_key(key)?;

        let row = sqlx::query(
            "SELECT response_status, response_body FROM idempotency_records WHERE key = $1",
        )
        .bind(key)
        .fetch_optional(&self.pool)
        .await?;

        let Some(row) = row else {
            return Ok(LookupResult::Miss);
        };

        let status: Option<i32> = row.try_get("response_status").ok();
        match status {
            Some(status) => {
                let body: Value = row.try_get("response_body").unwrap_or(Value::Null);
                Ok(LookupResult::Hit { status, body })
            }
            None => self.wait_for_completion(key).await,
        }
    }

    /// Reserve a key before executing the handler. Returns `Ok(true)` if this
    /// caller won the race and must now run the handler and call
    /// [`Self::store`]; `Ok(false)` means another caller is already in
    /// flight (the caller should loop back to `lookup`/`wait_for_completion`).
    pub async fn reserve(&self, key: &str, webhook_type: &str, request: &Value) -> Result<bool, EngineError> {
        validate_key(key)?;
        let expires_at = Utc::now() + chrono::Duration::from_std(self.ttl).unwrap_or(chrono::Duration::hours(24));

        let result = sqlx::query(
            "INSERT INTO idempotency_records (key, webhook_type, request_snapshot, expires_at) \
             VALUES ($1, $2, $3, $4) ON CONFLICT (key) DO NOTHING",
        )
        .bind(key)
        .bind(webhook_type)
        .bind(request)
        .bind(expires_at)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    pub async fn store(&self, key: &str, status: i32, body: &Value) -> Result<(), EngineError> {
        sqlx::query(
            "UPDATE idempotency_records SET response_status = $1, response_body = $2 WHERE key = $3",
        )
        .bind(status)
        .bind(body)
        .bind(key)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn wait_for_completion(&self, key: &str) -> Result<LookupResult, EngineError> {
        const MAX_POLLS: u32 = 50;
        for _ in 0..MAX_POLLS {
            tokio::time::sleep(Duration::from_millis(100)).await;
            let row = sqlx::query(
                "SELECT response_status, response_body FROM idempotency_records WHERE key = $1",
            )
            .bind(key)
            .fetch_optional(&self.pool)
            .await?;
            if let Some(row) = row {
                let status: Option<i32> = row.try_get("response_status").ok();
                if let Some(status) = status {
                    let body: Value = row.try_get("response_body").unwrap_or(Value::Null);
                    return Ok(LookupResult::Hit { status, body });
                }
            }
        }
        Err(EngineError::Timeout { attempt: MAX_POLLS })
    }

    /// Periodic GC sweep (spec.md §4.8): delete rows past expiry.
    pub async fn sweep_expired(&self) -> Result<u64, EngineError> {
        let result = sqlx::query("DELETE FROM idempotency_records WHERE expires_at < NOW()")
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }

    #[allow(dead_code)]
    async fn peek(&self, key: &str) -> Result<Option<DateTime<Utc>>, EngineError> {
        let row = sqlx::query("SELECT expires_at FROM idempotency_records WHERE key = $1")
            .bind(key)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(|r| r.get("expires_at")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_well_formed_keys() {
        assert!(validate_key("order-123_ABC").is_ok());
    }

    #[test]
    fn rejects_empty_key() {
        assert!(validate_key("").is_err());
    }

    #[test]
    fn rejects_oversize_key() {
        let key = "a".repeat(256);
        assert!(validate_key(&key).is_err());
    }

    #[test]
    fn rejects_bad_characters() {
        assert!(validate_key("order/123").is_err());
        assert!(validate_key("order 123").is_err());
    }

    #[test]
    fn boundary_length_is_accepted() {
        let key = "a".repeat(255);
        assert!(validate_key(&key).is_ok());
    }
}
