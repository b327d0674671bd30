//! Decision Engine (C7, spec.md §4.7).
//!
//! Grounded on `transfer::coordinator::TransferCoordinator::step`/`execute`:
//! a loop that re-reads authoritative state before each attempt and commits
//! one candidate per transaction. Unlike the teacher's FSM — which tolerates
//! `OpResult::Pending` and retries the same step indefinitely — C3/C4 here
//! resolve synchronously inside the transaction, so a candidate either wins
//! outright or is discarded in favor of the next-ranked offer.

use crate::core_types::{OrderId, RetailerId, WholesalerId};
use crate::credit::CreditLedger;
use crate::error::EngineError;
use crate::models::{LedgerCreator, LedgerEntryType, OfferStatus, VendorOffer};
use crate::money::Money;
use crate::order_state::OrderState;
use crate::scoring;
use crate::stock::{StockItem, StockLedger};
use crate::txn::TransactionRunner;
use sqlx::Row;

pub struct DecisionEngine {
    runner: TransactionRunner,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DecisionOutcome {
    pub order_id: OrderId,
    pub winning_wholesaler: WholesalerId,
}

impl DecisionEngine {
    pub fn new(runner: TransactionRunner) -> Self {
        Self { runner }
    }

    /// Award a winner for `order_id`, excluding any wholesaler in
    /// `exclude` (used by the retry/re-award path). If `reversing_prior` is
    /// set, a CREDIT reversing that wholesaler's prior DEBIT and a RELEASE of
    /// its reservation are applied before the candidate loop begins — this is
    /// the re-award path described in spec.md §4.7.
    pub async fn decide(
        &self,
        order_id: OrderId,
        exclude: &[WholesalerId],
        reversing_prior: Option<(WholesalerId, RetailerId, Money)>,
    ) -> Result<DecisionOutcome, EngineError> {
        if let Some((prior_wholesaler, retailer_id, total)) = reversing_prior {
            self.reverse_prior_award(order_id, retailer_id, prior_wholesaler, total).await?;
        }

        let candidates = self.load_ranked_candidates(order_id, exclude).await?;
        if candidates.is_empty() {
            self.mark_failed(order_id).await?;
            return Err(EngineError::NoEligibleWinner { candidates: 0 });
        }

        let total_candidates = candidates.len();
        for candidate in &candidates {
            match self.try_award(order_id, candidate).await {
                Ok(outcome) => {
                    tracing::info!(
                        order_id = order_id.get(),
                        wholesaler_id = outcome.winning_wholesaler.get(),
                        "order awarded"
                    );
                    return Ok(outcome);
                }
                Err(err) if Self::is_candidate_level_failure(&err) => {
                    tracing::warn!(
                        order_id = order_id.get(),
                        wholesaler_id = candidate.wholesaler_id.get(),
                        error = %err,
                        "candidate rejected, trying next"
                    );
                    continue;
                }
                Err(err) => return Err(err),
            }
        }

        self.mark_failed(order_id).await?;
        Err(EngineError::NoEligibleWinner { candidates: total_candidates })
    }

    fn is_candidate_level_failure(err: &EngineError) -> bool {
        matches!(
            err,
            EngineError::InsufficientStock { .. }
                | EngineError::CreditLimitExceeded { .. }
                | EngineError::CreditPaused { .. }
        )
    }

    async fn reverse_prior_award(
        &self,
        order_id: OrderId,
        retailer_id: RetailerId,
        prior_wholesaler: WholesalerId,
        total: Money,
    ) -> Result<(), EngineError> {
        self.runner
            .run("decision_reverse_prior_award", move |tx| {
                Box::pin(async move {
                    crate::stock::StockLedger::release(tx, order_id).await?;
                    crate::credit::CreditLedger::append(
                        tx,
                        retailer_id,
                        prior_wholesaler,
                        LedgerEntryType::Credit,
                        total,
                        Some(order_id),
                        None,
                        LedgerCreator::System,
                    )
                    .await?;
                    Ok(())
                })
            })
            .await
    }

    /// Re-verifies the order is still awardable, loads eligible offers
    /// (excluding EXPIRED/REJECTED and any wholesaler in `exclude`), and
    /// ranks them with C6. Runs in its own read-only-ish pass outside the
    /// award transaction — the award attempt below re-verifies order state
    /// again under `FOR UPDATE` before committing.
    async fn load_ranked_candidates(
        &self,
        order_id: OrderId,
        exclude: &[WholesalerId],
    ) -> Result<Vec<VendorOffer>, EngineError> {
        let pool = self.runner.pool();

        let order_row = sqlx::query(
            "SELECT state, final_wholesaler_id FROM orders WHERE id = $1",
        )
        .bind(order_id.get())
        .fetch_optional(pool)
        .await?
        .ok_or_else(|| EngineError::DecisionConflict { order_id: order_id.get() })?;

        let state = OrderState::from_id(order_row.get::<i16, _>("state"))?;
        let final_wholesaler: Option<i64> = order_row.get("final_wholesaler_id");
        if !state.is_pre_award() || final_wholesaler.is_some() {
            return Err(EngineError::DecisionConflict { order_id: order_id.get() });
        }

        let rows = sqlx::query(
            "SELECT o.id, o.order_id, o.wholesaler_id, o.price_quote, o.delivery_eta, \
                    o.stock_confirmed, o.status, o.created_at, \
                    w.reliability_score, w.average_rating, w.active \
             FROM vendor_offers o JOIN wholesalers w ON w.id = o.wholesaler_id \
             WHERE o.order_id = $1 AND o.status NOT IN ('EXPIRED', 'REJECTED')",
        )
        .bind(order_id.get())
        .fetch_all(pool)
        .await?;

        let offers: Vec<VendorOffer> = rows
            .into_iter()
            .filter_map(|r| {
                let wholesaler_id: i64 = r.get("wholesaler_id");
                if exclude.iter().any(|w| w.get() == wholesaler_id) {
                    return None;
                }
                let active: bool = r.get("active");
                if !active {
                    return None;
                }
                let status_str: String = r.get("status");
                let status = match status_str.as_str() {
                    "ACCEPTED" => OfferStatus::Accepted,
                    "REJECTED" => OfferStatus::Rejected,
                    "EXPIRED" => OfferStatus::Expired,
                    _ => OfferStatus::Pending,
                };
                let price_quote: rust_decimal::Decimal = r.get("price_quote");
                let rating: rust_decimal::Decimal = r.get("average_rating");
                Some(VendorOffer {
                    id: r.get::<i64, _>("id").into(),
                    order_id,
                    wholesaler_id: wholesaler_id.into(),
                    price_quote: Money::new(price_quote).ok()?,
                    delivery_eta: r.get("delivery_eta"),
                    stock_confirmed: r.get("stock_confirmed"),
                    status,
                    created_at: r.get("created_at"),
                    wholesaler_reliability_score: r.get("reliability_score"),
                    wholesaler_average_rating: Money::new(rating).ok()?,
                    wholesaler_active: active,
                })
            })
            .collect();

        Ok(scoring::rank(&offers).into_iter().cloned().collect())
    }

    /// Attempt to award `candidate` inside one transaction: reserve stock,
    /// debit the order total — `price_quote` times the summed item
    /// quantities, not the bare per-unit quote — mark the offer ACCEPTED and
    /// all sibling offers REJECTED, set `final_wholesaler`, and transition
    /// the order to WHOLESALER_ACCEPTED. Any failure aborts the whole
    /// attempt.
    async fn try_award(
        &self,
        order_id: OrderId,
        candidate: &VendorOffer,
    ) -> Result<DecisionOutcome, EngineError> {
        let wholesaler_id = candidate.wholesaler_id;
        let price_quote = candidate.price_quote;

        self.runner
            .run("decision_try_award", move |tx| {
                Box::pin(async move {
                    let order_row = sqlx::query(
                        "SELECT retailer_id, state, final_wholesaler_id FROM orders WHERE id = $1 FOR UPDATE",
                    )
                    .bind(order_id.get())
                    .fetch_optional(&mut **tx)
                    .await?
                    .ok_or(EngineError::DecisionConflict { order_id: order_id.get() })?;

                    let retailer_id: i64 = order_row.get("retailer_id");
                    let retailer_id = RetailerId(retailer_id);
                    let state = OrderState::from_id(order_row.get::<i16, _>("state"))?;
                    let final_wholesaler: Option<i64> = order_row.get("final_wholesaler_id");
                    if !state.is_pre_award() || final_wholesaler.is_some() {
                        return Err(EngineError::DecisionConflict { order_id: order_id.get() });
                    }

                    let items = sqlx::query(
                        "SELECT product_id, quantity FROM order_items WHERE order_id = $1",
                    )
                    .bind(order_id.get())
                    .fetch_all(&mut **tx)
                    .await?
                    .into_iter()
                    .map(|r| StockItem {
                        product_id: r.get::<i64, _>("product_id").into(),
                        quantity: r.get("quantity"),
                    })
                    .collect::<Vec<_>>();

                    StockLedger::reserve(tx, order_id, wholesaler_id, &items).await?;

                    let total_quantity: i64 = items.iter().map(|i| i.quantity).sum();
                    let order_total = Money::new(
                        price_quote.as_decimal() * rust_decimal::Decimal::from(total_quantity),
                    )?;

                    CreditLedger::append(
                        tx,
                        retailer_id,
                        wholesaler_id,
                        LedgerEntryType::Debit,
                        order_total,
                        Some(order_id),
                        None,
                        LedgerCreator::System,
                    )
                    .await?;

                    sqlx::query(
                        "UPDATE vendor_offers SET status = 'ACCEPTED' \
                         WHERE order_id = $1 AND wholesaler_id = $2",
                    )
                    .bind(order_id.get())
                    .bind(wholesaler_id.get())
                    .execute(&mut **tx)
                    .await?;

                    sqlx::query(
                        "UPDATE vendor_offers SET status = 'REJECTED' \
                         WHERE order_id = $1 AND wholesaler_id != $2 AND status NOT IN ('EXPIRED', 'REJECTED')",
                    )
                    .bind(order_id.get())
                    .bind(wholesaler_id.get())
                    .execute(&mut **tx)
                    .await?;

                    state.validate_transition(OrderState::WholesalerAccepted)?;
                    sqlx::query(
                        "UPDATE orders SET state = $1, final_wholesaler_id = $2 WHERE id = $3",
                    )
                    .bind(OrderState::WholesalerAccepted.id())
                    .bind(wholesaler_id.get())
                    .bind(order_id.get())
                    .execute(&mut **tx)
                    .await?;

                    sqlx::query(
                        "INSERT INTO transition_log (order_id, from_state, to_state, actor, reason) \
                         VALUES ($1, $2, $3, 'decision_engine', 'awarded')",
                    )
                    .bind(order_id.get())
                    .bind(state.as_str())
                    .bind(OrderState::WholesalerAccepted.as_str())
                    .execute(&mut **tx)
                    .await?;

                    Ok(DecisionOutcome { order_id, winning_wholesaler: wholesaler_id })
                })
            })
            .await
    }

    /// Admin override (`adminForceAwardWinner`, spec.md §6): bypass C6
    /// ranking and award a specific wholesaler's existing offer directly.
    /// Still runs through the same single-transaction `try_award` path as
    /// the ranked loop, so the stock/credit/state invariants hold identically
    /// — only candidate *selection* is skipped, not the award itself.
    pub async fn force_award(
        &self,
        order_id: OrderId,
        wholesaler_id: WholesalerId,
    ) -> Result<DecisionOutcome, EngineError> {
        let candidates = self.load_ranked_candidates(order_id, &[]).await?;
        let candidate = candidates
            .into_iter()
            .find(|c| c.wholesaler_id == wholesaler_id)
            .ok_or(EngineError::DecisionConflict { order_id: order_id.get() })?;
        self.try_award(order_id, &candidate).await
    }

    async fn mark_failed(&self, order_id: OrderId) -> Result<(), EngineError> {
        self.runner
            .run("decision_mark_failed", move |tx| {
                Box::pin(async move {
                    let row = sqlx::query("SELECT state FROM orders WHERE id = $1 FOR UPDATE")
                        .bind(order_id.get())
                        .fetch_optional(&mut **tx)
                        .await?;
                    let Some(row) = row else { return Ok(()) };
                    let state = OrderState::from_id(row.get::<i16, _>("state"))?;
                    if state.validate_transition(OrderState::Failed).is_err() {
                        return Ok(());
                    }
                    sqlx::query("UPDATE orders SET state = $1 WHERE id = $2")
                        .bind(OrderState::Failed.id())
                        .bind(order_id.get())
                        .execute(&mut **tx)
                        .await?;
                    sqlx::query(
                        "INSERT INTO transition_log (order_id, from_state, to_state, actor, reason) \
                         VALUES ($1, $2, $3, 'decision_engine', 'no_eligible_winner')",
                    )
                    .bind(order_id.get())
                    .bind(state.as_str())
                    .bind(OrderState::Failed.as_str())
                    .execute(&mut **tx)
                    .await?;
                    Ok(())
                })
            })
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn candidate_level_failures_are_classified() {
        assert!(DecisionEngine::is_candidate_level_failure(&EngineError::InsufficientStock {
            product_id: 1,
            wholesaler_id: 1,
            requested: 1,
            available: 0,
        }));
        assert!(DecisionEngine::is_candidate_level_failure(&EngineError::CreditLimitExceeded {
            balance: "1".into(),
            limit: "0".into(),
        }));
        assert!(!DecisionEngine::is_candidate_level_failure(&EngineError::DecisionConflict {
            order_id: 1,
        }));
    }
}
