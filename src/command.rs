//! Webhook Ingress / Command API (C9, spec.md §4.9 and §6).
//!
//! spec.md §9 calls for "a closed tagged-union of command variants with
//! static field validation at the boundary" in place of the source's
//! loosely-typed inbound payloads — [`Command`] is that union. This module
//! has no HTTP framework and no wire parsing (both out of scope per
//! spec.md §1): the caller turns a provider payload into a `Command` before
//! calling [`CommandApi::dispatch`], which owns idempotency, transactional
//! dispatch, and outbound event emission end to end.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sqlx::Row;
use std::sync::Arc;

use crate::core_types::{OrderId, ProductId, RetailerId, WholesalerId};
use crate::credit::CreditLedger;
use crate::decision::DecisionEngine;
use crate::error::EngineError;
use crate::events::{EventPublisher, OrderStateEvent};
use crate::flags::FlagsHandle;
use crate::idempotency::{IdempotencyStore, LookupResult};
use crate::models::{LedgerCreator, LedgerEntryType, PaymentMode};
use crate::money::Money;
use crate::order_state::OrderState;
use crate::txn::TransactionRunner;

#[derive(Debug, Clone, Deserialize)]
pub struct NewOrderItem {
    pub product_id: ProductId,
    pub quantity: i64,
    pub price: Money,
}

/// Closed tagged union of every inbound command spec.md §6 names.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Command {
    CreateOrder {
        retailer_id: RetailerId,
        items: Vec<NewOrderItem>,
        payment_mode: PaymentMode,
        bidding_window_secs: i64,
    },
    AddItem {
        order_id: OrderId,
        item: NewOrderItem,
    },
    SubmitOffer {
        order_id: OrderId,
        wholesaler_id: WholesalerId,
        price_quote: Money,
        delivery_eta: String,
        stock_confirmed: bool,
    },
    ConfirmOrder {
        order_id: OrderId,
    },
    CancelOrder {
        order_id: OrderId,
        reason: String,
    },
    MarkDelivered {
        order_id: OrderId,
    },
    AdminForceAwardWinner {
        order_id: OrderId,
        wholesaler_id: WholesalerId,
    },
}

impl Command {
    fn webhook_type(&self) -> &'static str {
        match self {
            Command::CreateOrder { .. } => "create_order",
            Command::AddItem { .. } => "add_item",
            Command::SubmitOffer { .. } => "submit_offer",
            Command::ConfirmOrder { .. } => "confirm_order",
            Command::CancelOrder { .. } => "cancel_order",
            Command::MarkDelivered { .. } => "mark_delivered",
            Command::AdminForceAwardWinner { .. } => "admin_force_award_winner",
        }
    }

    fn is_admin(&self) -> bool {
        matches!(self, Command::AdminForceAwardWinner { .. })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommandOutcome {
    pub order_id: i64,
    pub state: String,
    pub message: String,
}

pub struct CommandApi {
    runner: TransactionRunner,
    idempotency: Arc<IdempotencyStore>,
    decision_engine: Arc<DecisionEngine>,
    publisher: Arc<dyn EventPublisher>,
    flags: FlagsHandle,
}

impl CommandApi {
    pub fn new(
        runner: TransactionRunner,
        idempotency: Arc<IdempotencyStore>,
        decision_engine: Arc<DecisionEngine>,
        publisher: Arc<dyn EventPublisher>,
        flags: FlagsHandle,
    ) -> Self {
        Self { runner, idempotency, decision_engine, publisher, flags }
    }

    /// Entry point for every inbound command. Implements spec.md §4.9's flow:
    /// check launch-control flags, validate the key, dedupe via C2, dispatch
    /// through C1 exactly once, cache the response, and — only on a freshly
    /// executed (non-replayed) command — emit the outbound state-change event.
    pub async fn dispatch(
        &self,
        command: Command,
        idempotency_key: &str,
    ) -> Result<CommandOutcome, EngineError> {
        self.flags.snapshot().await.check_command_allowed(command.is_admin())?;

        let request_snapshot = Value::String(command.webhook_type().to_string());

        if self.idempotency.reserve(idempotency_key, command.webhook_type(), &request_snapshot).await? {
            let (outcome, event) = match self.execute(command).await {
                Ok((outcome, event)) => (outcome, event),
                Err(err) => {
                    // Cache failures too: a retried webhook for a permanently
                    // rejected command (e.g. INVALID_TRANSITION) must replay
                    // the same rejection, not re-attempt and diverge.
                    let body = serde_json::json!({ "error": err.code(), "message": err.to_string() });
                    self.idempotency.store(idempotency_key, 400, &body).await?;
                    return Err(err);
                }
            };

            let body = serde_json::to_value(&outcome).unwrap_or(Value::Null);
            self.idempotency.store(idempotency_key, 200, &body).await?;

            if let Some(event) = event {
                self.publisher.publish(event).await;
            }
            return Ok(outcome);
        }

        match self.idempotency.lookup(idempotency_key).await? {
            LookupResult::Hit { status, body } if status < 400 => {
                serde_json::from_value(body).map_err(|e| EngineError::Internal(e.to_string()))
            }
            LookupResult::Hit { body, .. } => {
                let message = body.get("message").and_then(|m| m.as_str()).unwrap_or("cached failure").to_string();
                Err(EngineError::InvalidInput(message))
            }
            LookupResult::Miss => Err(EngineError::Internal(
                "idempotency record vanished after reservation".into(),
            )),
        }
    }

    async fn execute(
        &self,
        command: Command,
    ) -> Result<(CommandOutcome, Option<OrderStateEvent>), EngineError> {
        match command {
            Command::CreateOrder { retailer_id, items, payment_mode, bidding_window_secs } => {
                self.create_order(retailer_id, items, payment_mode, bidding_window_secs).await
            }
            Command::AddItem { order_id, item } => self.add_item(order_id, item).await,
            Command::SubmitOffer { order_id, wholesaler_id, price_quote, delivery_eta, stock_confirmed } => {
                self.submit_offer(order_id, wholesaler_id, price_quote, delivery_eta, stock_confirmed).await
            }
            Command::ConfirmOrder { order_id } => self.confirm_order(order_id).await,
            Command::CancelOrder { order_id, reason } => self.cancel_order(order_id, reason).await,
            Command::MarkDelivered { order_id } => self.mark_delivered(order_id).await,
            Command::AdminForceAwardWinner { order_id, wholesaler_id } => {
                self.admin_force_award(order_id, wholesaler_id).await
            }
        }
    }

    async fn create_order(
        &self,
        retailer_id: RetailerId,
        items: Vec<NewOrderItem>,
        payment_mode: PaymentMode,
        bidding_window_secs: i64,
    ) -> Result<(CommandOutcome, Option<OrderStateEvent>), EngineError> {
        if items.is_empty() {
            return Err(EngineError::InvalidInput("order must have at least one item".into()));
        }

        let total = items
            .iter()
            .try_fold(Money::ZERO, |acc, item| {
                let line_total = item.price.as_decimal() * rust_decimal::Decimal::from(item.quantity);
                acc.checked_add(Money::new(line_total).ok()?)
            })
            .ok_or_else(|| EngineError::InvalidInput("order total overflow".into()))?;

        let payment_mode_str = payment_mode_str(payment_mode);

        let order_id = self
            .runner
            .run("create_order", move |tx| {
                let items = items.clone();
                Box::pin(async move {
                    let created_at = Utc::now();
                    let expires_at = created_at + chrono::Duration::seconds(bidding_window_secs);

                    let order_id: i64 = sqlx::query(
                        "INSERT INTO orders (retailer_id, total_amount, payment_mode, state, created_at, expires_at) \
                         VALUES ($1, $2, $3, $4, $5, $6) RETURNING id",
                    )
                    .bind(retailer_id.get())
                    .bind(total.as_decimal())
                    .bind(payment_mode_str)
                    .bind(OrderState::PendingBids.id())
                    .bind(created_at)
                    .bind(expires_at)
                    .fetch_one(&mut **tx)
                    .await?
                    .get("id");

                    for item in &items {
                        sqlx::query(
                            "INSERT INTO order_items (order_id, product_id, quantity, price_at_order_time) \
                             VALUES ($1, $2, $3, $4)",
                        )
                        .bind(order_id)
                        .bind(item.product_id.get())
                        .bind(item.quantity)
                        .bind(item.price.as_decimal())
                        .execute(&mut **tx)
                        .await?;
                    }

                    sqlx::query(
                        "INSERT INTO transition_log (order_id, from_state, to_state, actor, reason) \
                         VALUES ($1, $2, $3, 'retailer', 'order_created')",
                    )
                    .bind(order_id)
                    .bind(OrderState::Created.as_str())
                    .bind(OrderState::PendingBids.as_str())
                    .execute(&mut **tx)
                    .await?;

                    Ok(OrderId(order_id))
                })
            })
            .await?;

        Ok(self.outcome(order_id, OrderState::PendingBids, "order created and open for bids"))
    }

    async fn add_item(
        &self,
        order_id: OrderId,
        item: NewOrderItem,
    ) -> Result<(CommandOutcome, Option<OrderStateEvent>), EngineError> {
        let state = self
            .runner
            .run("add_item", move |tx| {
                let item = item.clone();
                Box::pin(async move {
                    let row = sqlx::query("SELECT state FROM orders WHERE id = $1 FOR UPDATE")
                        .bind(order_id.get())
                        .fetch_optional(&mut **tx)
                        .await?
                        .ok_or_else(|| EngineError::InvalidInput(format!("order {order_id} not found")))?;
                    let state = OrderState::from_id(row.get::<i16, _>("state"))?;
                    if !state.is_pre_award() {
                        return Err(EngineError::invalid_transition(state, state));
                    }

                    sqlx::query(
                        "INSERT INTO order_items (order_id, product_id, quantity, price_at_order_time) \
                         VALUES ($1, $2, $3, $4)",
                    )
                    .bind(order_id.get())
                    .bind(item.product_id.get())
                    .bind(item.quantity)
                    .bind(item.price.as_decimal())
                    .execute(&mut **tx)
                    .await?;

                    let added_total = item.price.as_decimal() * rust_decimal::Decimal::from(item.quantity);
                    sqlx::query("UPDATE orders SET total_amount = total_amount + $1 WHERE id = $2")
                        .bind(added_total)
                        .bind(order_id.get())
                        .execute(&mut **tx)
                        .await?;

                    Ok(state)
                })
            })
            .await?;

        Ok(self.outcome(order_id, state, "item added"))
    }

    async fn submit_offer(
        &self,
        order_id: OrderId,
        wholesaler_id: WholesalerId,
        price_quote: Money,
        delivery_eta: String,
        stock_confirmed: bool,
    ) -> Result<(CommandOutcome, Option<OrderStateEvent>), EngineError> {
        let state = self
            .runner
            .run("submit_offer", move |tx| {
                let delivery_eta = delivery_eta.clone();
                Box::pin(async move {
                    let row = sqlx::query("SELECT state FROM orders WHERE id = $1 FOR UPDATE")
                        .bind(order_id.get())
                        .fetch_optional(&mut **tx)
                        .await?
                        .ok_or_else(|| EngineError::InvalidInput(format!("order {order_id} not found")))?;
                    let state = OrderState::from_id(row.get::<i16, _>("state"))?;
                    if !state.is_pre_award() {
                        return Err(EngineError::InvalidInput(
                            "bidding window is closed for this order".into(),
                        ));
                    }

                    sqlx::query(
                        "INSERT INTO vendor_offers \
                            (order_id, wholesaler_id, price_quote, delivery_eta, stock_confirmed, status, created_at) \
                         VALUES ($1, $2, $3, $4, $5, 'PENDING', NOW()) \
                         ON CONFLICT (order_id, wholesaler_id) DO UPDATE SET \
                            price_quote = EXCLUDED.price_quote, \
                            delivery_eta = EXCLUDED.delivery_eta, \
                            stock_confirmed = EXCLUDED.stock_confirmed",
                    )
                    .bind(order_id.get())
                    .bind(wholesaler_id.get())
                    .bind(price_quote.as_decimal())
                    .bind(&delivery_eta)
                    .bind(stock_confirmed)
                    .execute(&mut **tx)
                    .await?;

                    Ok(state)
                })
            })
            .await?;

        Ok(self.outcome(order_id, state, "offer recorded"))
    }

    async fn confirm_order(
        &self,
        order_id: OrderId,
    ) -> Result<(CommandOutcome, Option<OrderStateEvent>), EngineError> {
        let confirmed_at = Utc::now();
        self.runner
            .run("confirm_order", move |tx| {
                Box::pin(async move {
                    let row = sqlx::query("SELECT state FROM orders WHERE id = $1 FOR UPDATE")
                        .bind(order_id.get())
                        .fetch_optional(&mut **tx)
                        .await?
                        .ok_or_else(|| EngineError::InvalidInput(format!("order {order_id} not found")))?;
                    let state = OrderState::from_id(row.get::<i16, _>("state"))?;
                    state.validate_transition(OrderState::Confirmed)?;

                    sqlx::query("UPDATE orders SET state = $1, confirmed_at = $2 WHERE id = $3")
                        .bind(OrderState::Confirmed.id())
                        .bind(confirmed_at)
                        .bind(order_id.get())
                        .execute(&mut **tx)
                        .await?;
                    sqlx::query(
                        "INSERT INTO transition_log (order_id, from_state, to_state, actor, reason) \
                         VALUES ($1, $2, $3, 'wholesaler', 'order_confirmed')",
                    )
                    .bind(order_id.get())
                    .bind(state.as_str())
                    .bind(OrderState::Confirmed.as_str())
                    .execute(&mut **tx)
                    .await?;
                    Ok(())
                })
            })
            .await?;

        Ok(self.outcome(order_id, OrderState::Confirmed, "order confirmed by wholesaler"))
    }

    async fn cancel_order(
        &self,
        order_id: OrderId,
        reason: String,
    ) -> Result<(CommandOutcome, Option<OrderStateEvent>), EngineError> {
        let reverse: Option<(RetailerId, WholesalerId, Money)> = self
            .runner
            .run("cancel_order", move |tx| {
                let reason = reason.clone();
                Box::pin(async move {
                    let row = sqlx::query(
                        "SELECT state, retailer_id, final_wholesaler_id FROM orders \
                         WHERE id = $1 FOR UPDATE",
                    )
                    .bind(order_id.get())
                    .fetch_optional(&mut **tx)
                    .await?
                    .ok_or_else(|| EngineError::InvalidInput(format!("order {order_id} not found")))?;

                    let state = OrderState::from_id(row.get::<i16, _>("state"))?;
                    state.validate_transition(OrderState::Cancelled)?;

                    let final_wholesaler: Option<i64> = row.get("final_wholesaler_id");
                    let reverse = if let Some(wholesaler_id) = final_wholesaler {
                        let retailer_id: i64 = row.get("retailer_id");
                        let wholesaler_id = WholesalerId(wholesaler_id);
                        crate::stock::StockLedger::release(tx, order_id).await?;
                        // Reverse exactly what was debited for this wholesaler, not the
                        // order's original total_amount — they diverge whenever the
                        // winning quote differs from the retailer's listed item prices.
                        CreditLedger::last_debit_amount(tx, order_id, wholesaler_id)
                            .await?
                            .map(|amount| (RetailerId(retailer_id), wholesaler_id, amount))
                    } else {
                        None
                    };

                    sqlx::query("UPDATE orders SET state = $1 WHERE id = $2")
                        .bind(OrderState::Cancelled.id())
                        .bind(order_id.get())
                        .execute(&mut **tx)
                        .await?;
                    sqlx::query(
                        "INSERT INTO transition_log (order_id, from_state, to_state, actor, reason) \
                         VALUES ($1, $2, $3, 'retailer', $4)",
                    )
                    .bind(order_id.get())
                    .bind(state.as_str())
                    .bind(OrderState::Cancelled.as_str())
                    .bind(&reason)
                    .execute(&mut **tx)
                    .await?;

                    Ok(reverse)
                })
            })
            .await?;

        if let Some((retailer_id, wholesaler_id, total)) = reverse {
            self.runner
                .run("cancel_order_reverse_credit", move |tx| {
                    Box::pin(async move {
                        CreditLedger::append(
                            tx,
                            retailer_id,
                            wholesaler_id,
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
                .await?;
        }

        Ok(self.outcome(order_id, OrderState::Cancelled, "order cancelled"))
    }

    async fn mark_delivered(
        &self,
        order_id: OrderId,
    ) -> Result<(CommandOutcome, Option<OrderStateEvent>), EngineError> {
        let delivered_at = Utc::now();
        self.runner
            .run("mark_delivered", move |tx| {
                Box::pin(async move {
                    let row = sqlx::query("SELECT state FROM orders WHERE id = $1 FOR UPDATE")
                        .bind(order_id.get())
                        .fetch_optional(&mut **tx)
                        .await?
                        .ok_or_else(|| EngineError::InvalidInput(format!("order {order_id} not found")))?;
                    let state = OrderState::from_id(row.get::<i16, _>("state"))?;
                    state.validate_transition(OrderState::Delivered)?;

                    crate::stock::StockLedger::fulfil(tx, order_id).await?;

                    sqlx::query("UPDATE orders SET state = $1, delivered_at = $2 WHERE id = $3")
                        .bind(OrderState::Delivered.id())
                        .bind(delivered_at)
                        .bind(order_id.get())
                        .execute(&mut **tx)
                        .await?;
                    sqlx::query(
                        "INSERT INTO transition_log (order_id, from_state, to_state, actor, reason) \
                         VALUES ($1, $2, $3, 'wholesaler', 'marked_delivered')",
                    )
                    .bind(order_id.get())
                    .bind(state.as_str())
                    .bind(OrderState::Delivered.as_str())
                    .execute(&mut **tx)
                    .await?;
                    Ok(())
                })
            })
            .await?;

        Ok(self.outcome(order_id, OrderState::Delivered, "order marked delivered"))
    }

    async fn admin_force_award(
        &self,
        order_id: OrderId,
        wholesaler_id: WholesalerId,
    ) -> Result<(CommandOutcome, Option<OrderStateEvent>), EngineError> {
        let outcome = self.decision_engine.force_award(order_id, wholesaler_id).await?;
        Ok(self.outcome(
            outcome.order_id,
            OrderState::WholesalerAccepted,
            "winner force-awarded by admin",
        ))
    }

    fn outcome(
        &self,
        order_id: OrderId,
        state: OrderState,
        message: &str,
    ) -> (CommandOutcome, Option<OrderStateEvent>) {
        let outcome = CommandOutcome {
            order_id: order_id.get(),
            state: state.as_str().to_string(),
            message: message.to_string(),
        };
        let event = OrderStateEvent::new(order_id, state.as_str());
        (outcome, Some(event))
    }
}

fn payment_mode_str(mode: PaymentMode) -> &'static str {
    match mode {
        PaymentMode::CashOnDelivery => "CASH_ON_DELIVERY",
        PaymentMode::CreditTerms => "CREDIT_TERMS",
        PaymentMode::Prepaid => "PREPAID",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn webhook_types_are_stable_strings() {
        let cmd = Command::ConfirmOrder { order_id: OrderId(1) };
        assert_eq!(cmd.webhook_type(), "confirm_order");
        assert!(!cmd.is_admin());

        let admin_cmd = Command::AdminForceAwardWinner { order_id: OrderId(1), wholesaler_id: WholesalerId(2) };
        assert!(admin_cmd.is_admin());
    }
}
