//! Entity types for the order fulfillment domain (spec.md §3).
//!
//! These are plain value structs, not ORM-managed objects: every load goes
//! through an explicit repository call inside a transaction (see `crate::txn`
//! and the per-component modules), and traversals between Order/OrderItem/
//! VendorOffer go through the database rather than in-memory references.

use crate::core_types::{OfferId, OrderId, ProductId, RetailerId, WholesalerId};
use crate::money::Money;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PaymentMode {
    CashOnDelivery,
    CreditTerms,
    Prepaid,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Order {
    pub id: OrderId,
    pub retailer_id: RetailerId,
    pub wholesaler_id: Option<WholesalerId>,
    pub final_wholesaler_id: Option<WholesalerId>,
}

/// Owned/sortable fields split out since `Order` above captures only the
/// identity/award surface most often pattern-matched on; this is the full
/// row as persisted.
#[derive(Debug, Clone, Serialize)]
pub struct OrderRecord {
    pub id: OrderId,
    pub retailer_id: RetailerId,
    pub wholesaler_id: Option<WholesalerId>,
    pub final_wholesaler_id: Option<WholesalerId>,
    pub total_amount: Money,
    pub payment_mode: PaymentMode,
    pub state: crate::order_state::OrderState,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub confirmed_at: Option<DateTime<Utc>>,
    pub delivered_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize)]
pub struct OrderItem {
    pub id: i64,
    pub order_id: OrderId,
    pub product_id: ProductId,
    pub quantity: i64,
    pub price_at_order_time: Money,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum OfferStatus {
    Pending,
    Accepted,
    Rejected,
    Expired,
}

#[derive(Debug, Clone, Serialize)]
pub struct VendorOffer {
    pub id: OfferId,
    pub order_id: OrderId,
    pub wholesaler_id: WholesalerId,
    pub price_quote: Money,
    pub delivery_eta: String,
    pub stock_confirmed: bool,
    pub status: OfferStatus,
    pub created_at: DateTime<Utc>,
    /// Embedded wholesaler scoring metadata (spec.md §4.6), loaded alongside
    /// the offer row rather than joined at score time.
    pub wholesaler_reliability_score: i32,
    pub wholesaler_average_rating: Money,
    pub wholesaler_active: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct WholesalerProduct {
    pub wholesaler_id: WholesalerId,
    pub product_id: ProductId,
    pub stock: i64,
    pub reserved: i64,
    pub price: Money,
    pub min_order: i64,
    pub lead_time_hours: i64,
    pub available: bool,
}

impl WholesalerProduct {
    pub fn available_qty(&self) -> i64 {
        self.stock - self.reserved
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ReservationStatus {
    Active,
    Released,
    Fulfilled,
    Expired,
}

#[derive(Debug, Clone, Serialize)]
pub struct StockReservation {
    pub id: crate::core_types::ReservationId,
    pub order_id: OrderId,
    pub wholesaler_id: WholesalerId,
    pub product_id: ProductId,
    pub quantity: i64,
    pub status: ReservationStatus,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum LedgerEntryType {
    Debit,
    Credit,
    Adjustment,
    Reversal,
}

#[derive(Debug, Clone, Serialize)]
pub struct LedgerEntry {
    pub id: crate::core_types::LedgerEntryId,
    pub retailer_id: RetailerId,
    pub wholesaler_id: WholesalerId,
    pub entry_type: LedgerEntryType,
    pub amount: Money,
    pub balance_after: rust_decimal::Decimal,
    pub order_id: Option<OrderId>,
    pub due_date: Option<DateTime<Utc>>,
    pub creator: LedgerCreator,
    pub content_hash: String,
    pub previous_hash: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum LedgerCreator {
    System,
    Admin,
}

#[derive(Debug, Clone, Serialize)]
pub struct CreditAccount {
    pub retailer_id: RetailerId,
    pub credit_limit: Money,
    pub used_credit: Money,
    pub max_order_value: Money,
    pub max_outstanding_days: i32,
}

#[derive(Debug, Clone, Serialize)]
pub struct RetailerWholesalerCredit {
    pub retailer_id: RetailerId,
    pub wholesaler_id: WholesalerId,
    pub limit_override: Option<Money>,
    pub terms_override: Option<String>,
    pub active: bool,
    pub block_reason: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct IdempotencyRecord {
    pub key: String,
    pub webhook_type: String,
    pub request_snapshot: serde_json::Value,
    pub response_status: Option<i32>,
    pub response_body: Option<serde_json::Value>,
    pub expires_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize)]
pub struct TransitionLog {
    pub id: i64,
    pub order_id: OrderId,
    pub from_state: String,
    pub to_state: String,
    pub actor: String,
    pub reason: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize)]
pub struct WebhookFailureLog {
    pub id: i64,
    pub operation: String,
    pub entity_ref: String,
    pub error_snapshot: String,
    pub retry_count: i32,
    pub next_retry_at: Option<DateTime<Utc>>,
}
