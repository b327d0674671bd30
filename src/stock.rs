//! Stock Ledger (C3, spec.md §4.4).
//!
//! All state-changing operations run inside the caller's transaction (they
//! take a `&mut PgConnection`/transaction handle, never their own pool) so
//! they compose inside the Decision Engine's single-transaction award. Row
//! locking follows the teacher's `internal_transfer::db` CAS pattern,
//! generalized here from a single-column CAS to a `SELECT ... FOR UPDATE`
//! read-check-write since §4.4 requires checking `stock - reserved` before
//! writing rather than comparing one expected value.

use crate::core_types::{OrderId, ProductId, WholesalerId};
use crate::error::EngineError;
use crate::models::{ReservationStatus, StockReservation};
use sqlx::{PgConnection, Row};

pub struct StockItem {
    pub product_id: ProductId,
    pub quantity: i64,
}

pub struct AvailabilityRow {
    pub product_id: ProductId,
    pub stock: i64,
    pub reserved: i64,
    pub available: i64,
    pub sufficient: bool,
}

pub struct StockLedger;

impl StockLedger {
    /// Read-only availability check; does not lock rows since no mutation
    /// follows directly from the result (callers that intend to reserve
    /// should call `reserve`, which re-checks under a lock).
    pub async fn check_availability(
        conn: &mut PgConnection,
        wholesaler_id: WholesalerId,
        items: &[StockItem],
    ) -> Result<Vec<AvailabilityRow>, EngineError> {
        let mut rows = Vec::with_capacity(items.len());
        for item in items {
            let row = sqlx::query(
                "SELECT stock, reserved FROM wholesaler_products WHERE wholesaler_id = $1 AND product_id = $2",
            )
            .bind(wholesaler_id.get())
            .bind(item.product_id.get())
            .fetch_optional(&mut *conn)
            .await?;

            let (stock, reserved): (i64, i64) = match row {
                Some(r) => (r.get("stock"), r.get("reserved")),
                None => (0, 0),
            };
            let available = stock - reserved;
            rows.push(AvailabilityRow {
                product_id: item.product_id,
                stock,
                reserved,
                available,
                sufficient: available >= item.quantity,
            });
        }
        Ok(rows)
    }

    /// Reserve stock for every item atomically: locks each
    /// `WholesalerProduct` row with `FOR UPDATE`, verifies
    /// `stock - reserved >= quantity`, increments `reserved`, and inserts an
    /// ACTIVE `StockReservation`. Fails with `InsufficientStock` on the first
    /// shortfall; since this runs inside the caller's transaction, any prior
    /// increments in this call are rolled back along with everything else
    /// when the caller's transaction is aborted.
    pub async fn reserve(
        conn: &mut PgConnection,
        order_id: OrderId,
        wholesaler_id: WholesalerId,
        items: &[StockItem],
    ) -> Result<Vec<StockReservation>, EngineError> {
        let mut reservations = Vec::with_capacity(items.len());

        for item in items {
            let row = sqlx::query(
                "SELECT stock, reserved FROM wholesaler_products \
                 WHERE wholesaler_id = $1 AND product_id = $2 FOR UPDATE",
            )
            .bind(wholesaler_id.get())
            .bind(item.product_id.get())
            .fetch_optional(&mut *conn)
            .await?;

            let (stock, reserved): (i64, i64) = match row {
                Some(r) => (r.get("stock"), r.get("reserved")),
                None => (0, 0),
            };
            let available = stock - reserved;
            if available < item.quantity {
                return Err(EngineError::InsufficientStock {
                    product_id: item.product_id.get(),
                    wholesaler_id: wholesaler_id.get(),
                    requested: item.quantity,
                    available,
                });
            }

            sqlx::query(
                "UPDATE wholesaler_products SET reserved = reserved + $1 \
                 WHERE wholesaler_id = $2 AND product_id = $3",
            )
            .bind(item.quantity)
            .bind(wholesaler_id.get())
            .bind(item.product_id.get())
            .execute(&mut *conn)
            .await?;

            let reservation_id: i64 = sqlx::query(
                "INSERT INTO stock_reservations (order_id, wholesaler_id, product_id, quantity, status) \
                 VALUES ($1, $2, $3, $4, 'ACTIVE') RETURNING id",
            )
            .bind(order_id.get())
            .bind(wholesaler_id.get())
            .bind(item.product_id.get())
            .bind(item.quantity)
            .fetch_one(&mut *conn)
            .await?
            .get("id");

            reservations.push(StockReservation {
                id: reservation_id.into(),
                order_id,
                wholesaler_id,
                product_id: item.product_id,
                quantity: item.quantity,
                status: ReservationStatus::Active,
            });
        }

        Ok(reservations)
    }

    /// Release every ACTIVE reservation for an order: flips them to RELEASED
    /// and decrements the corresponding `WholesalerProduct.reserved`.
    pub async fn release(conn: &mut PgConnection, order_id: OrderId) -> Result<u64, EngineError> {
        let rows = sqlx::query(
            "SELECT id, wholesaler_id, product_id, quantity FROM stock_reservations \
             WHERE order_id = $1 AND status = 'ACTIVE' FOR UPDATE",
        )
        .bind(order_id.get())
        .fetch_all(&mut *conn)
        .await?;

        for row in &rows {
            let wholesaler_id: i64 = row.get("wholesaler_id");
            let product_id: i64 = row.get("product_id");
            let quantity: i64 = row.get("quantity");

            sqlx::query(
                "UPDATE wholesaler_products SET reserved = reserved - $1 \
                 WHERE wholesaler_id = $2 AND product_id = $3",
            )
            .bind(quantity)
            .bind(wholesaler_id)
            .bind(product_id)
            .execute(&mut *conn)
            .await?;
        }

        let result = sqlx::query(
            "UPDATE stock_reservations SET status = 'RELEASED' WHERE order_id = $1 AND status = 'ACTIVE'",
        )
        .bind(order_id.get())
        .execute(&mut *conn)
        .await?;

        Ok(result.rows_affected())
    }

    /// Fulfil every ACTIVE reservation for an order: flips ACTIVE -> FULFILLED
    /// and decrements both `stock` and `reserved`. Partial fulfilment within
    /// one call is not supported; callers needing partial quantities issue
    /// multiple calls against explicit reservation subsets (not modeled here
    /// since spec.md does not require per-item partial fulfilment at the
    /// order level).
    pub async fn fulfil(conn: &mut PgConnection, order_id: OrderId) -> Result<u64, EngineError> {
        let rows = sqlx::query(
            "SELECT wholesaler_id, product_id, quantity FROM stock_reservations \
             WHERE order_id = $1 AND status = 'ACTIVE' FOR UPDATE",
        )
        .bind(order_id.get())
        .fetch_all(&mut *conn)
        .await?;

        for row in &rows {
            let wholesaler_id: i64 = row.get("wholesaler_id");
            let product_id: i64 = row.get("product_id");
            let quantity: i64 = row.get("quantity");

            sqlx::query(
                "UPDATE wholesaler_products SET stock = stock - $1, reserved = reserved - $1 \
                 WHERE wholesaler_id = $2 AND product_id = $3",
            )
            .bind(quantity)
            .bind(wholesaler_id)
            .bind(product_id)
            .execute(&mut *conn)
            .await?;
        }

        let result = sqlx::query(
            "UPDATE stock_reservations SET status = 'FULFILLED' WHERE order_id = $1 AND status = 'ACTIVE'",
        )
        .bind(order_id.get())
        .execute(&mut *conn)
        .await?;

        Ok(result.rows_affected())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn available_qty_is_stock_minus_reserved() {
        let item = StockItem { product_id: ProductId(1), quantity: 5 };
        assert_eq!(item.quantity, 5);
    }
}
