//! Credit Ledger (C4, spec.md §4.5).
//!
//! Append-only, hash-chained per-(retailer,wholesaler) ledger. The content
//! hash is computed with `sha2::Sha256`, the way the wider example corpus
//! hashes audit-log content; nothing here ever issues `UPDATE`/`DELETE`
//! against `ledger_entries` — that is additionally enforced by a
//! database-level trigger (see `migrations`/DESIGN.md) as defence in depth.

use crate::core_types::{OrderId, RetailerId, WholesalerId};
use crate::error::EngineError;
use crate::models::{LedgerCreator, LedgerEntry, LedgerEntryType};
use crate::money::Money;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sha2::{Digest, Sha256};
use sqlx::{PgConnection, Row};

pub struct CreditLedger;

fn content_hash(
    entry_type: LedgerEntryType,
    amount: Money,
    order_id: Option<OrderId>,
    previous_hash: Option<&str>,
    created_at: DateTime<Utc>,
) -> String {
    let mut hasher = Sha256::new();
    hasher.update(type_str(entry_type).as_bytes());
    hasher.update(b"|");
    hasher.update(amount.as_decimal().to_string().as_bytes());
    hasher.update(b"|");
    hasher.update(order_id.map(|o| o.get().to_string()).unwrap_or_default().as_bytes());
    hasher.update(b"|");
    hasher.update(previous_hash.unwrap_or("").as_bytes());
    hasher.update(b"|");
    hasher.update(created_at.to_rfc3339().as_bytes());
    hex::encode(hasher.finalize())
}

fn type_str(t: LedgerEntryType) -> &'static str {
    match t {
        LedgerEntryType::Debit => "DEBIT",
        LedgerEntryType::Credit => "CREDIT",
        LedgerEntryType::Adjustment => "ADJUSTMENT",
        LedgerEntryType::Reversal => "REVERSAL",
    }
}

fn signed_delta(entry_type: LedgerEntryType, amount: Decimal) -> Decimal {
    match entry_type {
        LedgerEntryType::Debit => amount,
        LedgerEntryType::Credit => -amount,
        LedgerEntryType::Adjustment => amount,
        LedgerEntryType::Reversal => -amount,
    }
}

struct ChainTail {
    balance_after: Decimal,
    content_hash: Option<String>,
}

impl CreditLedger {
    pub async fn current_balance(
        conn: &mut PgConnection,
        retailer_id: RetailerId,
        wholesaler_id: WholesalerId,
    ) -> Result<Decimal, EngineError> {
        Ok(Self::tail(conn, retailer_id, wholesaler_id).await?.balance_after)
    }

    async fn tail(
        conn: &mut PgConnection,
        retailer_id: RetailerId,
        wholesaler_id: WholesalerId,
    ) -> Result<ChainTail, EngineError> {
        let row = sqlx::query(
            "SELECT balance_after, content_hash FROM ledger_entries \
             WHERE retailer_id = $1 AND wholesaler_id = $2 \
             ORDER BY created_at DESC, id DESC LIMIT 1 FOR UPDATE",
        )
        .bind(retailer_id.get())
        .bind(wholesaler_id.get())
        .fetch_optional(&mut *conn)
        .await?;

        Ok(match row {
            Some(r) => ChainTail {
                balance_after: r.get("balance_after"),
                content_hash: Some(r.get("content_hash")),
            },
            None => ChainTail { balance_after: Decimal::ZERO, content_hash: None },
        })
    }

    /// Effective credit limit for a (retailer, wholesaler) pair: the
    /// per-pair override if one is active, else the retailer's account-wide
    /// `CreditAccount.credit_limit`.
    async fn effective_limit(
        conn: &mut PgConnection,
        retailer_id: RetailerId,
        wholesaler_id: WholesalerId,
    ) -> Result<Decimal, EngineError> {
        let pair = sqlx::query(
            "SELECT limit_override, active, block_reason FROM retailer_wholesaler_credit \
             WHERE retailer_id = $1 AND wholesaler_id = $2",
        )
        .bind(retailer_id.get())
        .bind(wholesaler_id.get())
        .fetch_optional(&mut *conn)
        .await?;

        if let Some(row) = &pair {
            let active: bool = row.get("active");
            if !active {
                let reason: Option<String> = row.get("block_reason");
                return Err(EngineError::CreditPaused {
                    reason: reason.unwrap_or_else(|| "blocked".to_string()),
                });
            }
            let limit_override: Option<Decimal> = row.get("limit_override");
            if let Some(limit) = limit_override {
                return Ok(limit);
            }
        }

        let account = sqlx::query("SELECT credit_limit FROM credit_accounts WHERE retailer_id = $1")
            .bind(retailer_id.get())
            .fetch_one(&mut *conn)
            .await?;
        Ok(account.get("credit_limit"))
    }

    /// Amount of the most recent DEBIT entry recorded against `order_id` for
    /// `wholesaler_id`. Used to reverse exactly what was charged when an
    /// award is undone (re-award on timeout, cancellation) instead of
    /// recomputing from order/offer data that may have since changed.
    pub async fn last_debit_amount(
        conn: &mut PgConnection,
        order_id: OrderId,
        wholesaler_id: WholesalerId,
    ) -> Result<Option<Money>, EngineError> {
        let row = sqlx::query(
            "SELECT amount FROM ledger_entries \
             WHERE order_id = $1 AND wholesaler_id = $2 AND entry_type = 'DEBIT' \
             ORDER BY created_at DESC, id DESC LIMIT 1",
        )
        .bind(order_id.get())
        .bind(wholesaler_id.get())
        .fetch_optional(&mut *conn)
        .await?;

        row.map(|r| Money::new(r.get::<Decimal, _>("amount"))).transpose().map_err(EngineError::from)
    }

    /// Append a new ledger entry under a row lock on the (retailer,
    /// wholesaler) chain. Fails `CreditLimitExceeded` if the resulting
    /// balance would exceed the effective limit; DEBIT/ADJUSTMENT-positive
    /// entries are the only ones that can trip this, since CREDIT/REVERSAL
    /// only ever move the balance down.
    pub async fn append(
        conn: &mut PgConnection,
        retailer_id: RetailerId,
        wholesaler_id: WholesalerId,
        entry_type: LedgerEntryType,
        amount: Money,
        order_id: Option<OrderId>,
        due_date: Option<DateTime<Utc>>,
        creator: LedgerCreator,
    ) -> Result<LedgerEntry, EngineError> {
        let tail = Self::tail(conn, retailer_id, wholesaler_id).await?;
        let new_balance = tail.balance_after + signed_delta(entry_type, amount.as_decimal());

        if matches!(entry_type, LedgerEntryType::Debit | LedgerEntryType::Adjustment) {
            let limit = Self::effective_limit(conn, retailer_id, wholesaler_id).await?;
            if new_balance > limit {
                return Err(EngineError::CreditLimitExceeded {
                    balance: new_balance.to_string(),
                    limit: limit.to_string(),
                });
            }
        }

        let created_at = Utc::now();
        let hash = content_hash(entry_type, amount, order_id, tail.content_hash.as_deref(), created_at);

        let id: i64 = sqlx::query(
            "INSERT INTO ledger_entries \
             (retailer_id, wholesaler_id, entry_type, amount, balance_after, order_id, due_date, creator, content_hash, previous_hash, created_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11) RETURNING id",
        )
        .bind(retailer_id.get())
        .bind(wholesaler_id.get())
        .bind(type_str(entry_type))
        .bind(amount.as_decimal())
        .bind(new_balance)
        .bind(order_id.map(|o| o.get()))
        .bind(due_date)
        .bind(match creator { LedgerCreator::System => "SYSTEM", LedgerCreator::Admin => "ADMIN" })
        .bind(&hash)
        .bind(tail.content_hash.as_deref())
        .bind(created_at)
        .fetch_one(&mut *conn)
        .await?
        .get("id");

        Ok(LedgerEntry {
            id: id.into(),
            retailer_id,
            wholesaler_id,
            entry_type,
            amount,
            balance_after: new_balance,
            order_id,
            due_date,
            creator,
            content_hash: hash,
            previous_hash: tail.content_hash,
            created_at,
        })
    }

    /// Walk the chain in insertion order and confirm every `previous_hash`
    /// matches the prior entry's `content_hash`, and the final
    /// `balance_after` equals the running signed sum.
    pub async fn verify_chain(
        conn: &mut PgConnection,
        retailer_id: RetailerId,
        wholesaler_id: WholesalerId,
    ) -> Result<bool, EngineError> {
        let rows = sqlx::query(
            "SELECT entry_type, amount, balance_after, content_hash, previous_hash FROM ledger_entries \
             WHERE retailer_id = $1 AND wholesaler_id = $2 ORDER BY created_at ASC, id ASC",
        )
        .bind(retailer_id.get())
        .bind(wholesaler_id.get())
        .fetch_all(&mut *conn)
        .await?;

        let mut running = Decimal::ZERO;
        let mut expected_prev: Option<String> = None;

        for row in &rows {
            let prev_hash: Option<String> = row.get("previous_hash");
            if prev_hash != expected_prev {
                return Ok(false);
            }
            let entry_type_str: String = row.get("entry_type");
            let amount: Decimal = row.get("amount");
            let entry_type = match entry_type_str.as_str() {
                "DEBIT" => LedgerEntryType::Debit,
                "CREDIT" => LedgerEntryType::Credit,
                "ADJUSTMENT" => LedgerEntryType::Adjustment,
                _ => LedgerEntryType::Reversal,
            };
            running += signed_delta(entry_type, amount);

            let balance_after: Decimal = row.get("balance_after");
            if balance_after != running {
                return Ok(false);
            }
            expected_prev = Some(row.get("content_hash"));
        }

        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hash_changes_with_previous_hash() {
        let now = Utc::now();
        let amount = Money::new_positive(Decimal::new(950_00, 2)).unwrap();
        let h1 = content_hash(LedgerEntryType::Debit, amount, Some(OrderId(1)), None, now);
        let h2 = content_hash(LedgerEntryType::Debit, amount, Some(OrderId(1)), Some(&h1), now);
        assert_ne!(h1, h2);
    }

    #[test]
    fn signed_delta_matches_spec_signs() {
        let amount = Decimal::new(100_00, 2);
        assert_eq!(signed_delta(LedgerEntryType::Debit, amount), amount);
        assert_eq!(signed_delta(LedgerEntryType::Credit, amount), -amount);
        assert_eq!(signed_delta(LedgerEntryType::Reversal, amount), -amount);
    }
}
