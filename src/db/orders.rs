//! Order placement, approval decisions and fulfilment status changes.

use serde_json::json;
use sqlx::{sqlite::SqliteRow, QueryBuilder, Row, Sqlite, SqliteConnection};

use super::carts::{fetch_cart, save_cart};
use super::products::{fetch_product, shift_stock};
use super::reports::budget_usage;
use super::repository::{bump_revision, check_version, from_json, new_id, now, to_json};
use super::Repository;
use crate::budget::{self, BudgetMonth};
use crate::errors::{codes, AppError};
use crate::models::{
    format_order_number, line_total, sum_amounts, Order, OrderFilter, OrderItem, OrderStatus,
    PageQuery, Store, User,
};

const ORDER_COLUMNS: &str = "id, company_id, store_id, user_id, number, status, items, total_cents, note, decided_by, decided_at, rejection_reason, created_at, updated_at, version";

/// Stores visible to a caller: every store, or an explicit list.
#[derive(Debug, Clone)]
pub enum StoreScope {
    All,
    Only(Vec<String>),
}

impl StoreScope {
    pub fn for_user(user: &User) -> Self {
        if user.is_admin() {
            StoreScope::All
        } else {
            StoreScope::Only(user.store_ids.clone())
        }
    }
}

impl Repository {
    /// List orders visible in `scope`, one page at a time, newest first.
    pub async fn list_orders(
        &self,
        company_id: &str,
        scope: &StoreScope,
        filter: &OrderFilter,
        page: PageQuery,
    ) -> Result<(Vec<Order>, i64), AppError> {
        let mut count = QueryBuilder::<Sqlite>::new("SELECT COUNT(*) AS total FROM orders");
        push_order_filter(&mut count, company_id, scope, filter);
        let total: i64 = count.build().fetch_one(&self.pool).await?.get("total");

        let mut select =
            QueryBuilder::<Sqlite>::new(format!("SELECT {} FROM orders", ORDER_COLUMNS));
        push_order_filter(&mut select, company_id, scope, filter);
        select
            .push(" ORDER BY created_at DESC, number DESC LIMIT ")
            .push_bind(page.per_page())
            .push(" OFFSET ")
            .push_bind(page.offset());
        let rows = select.build().fetch_all(&self.pool).await?;

        let orders = rows.iter().map(order_from_row).collect::<Result<_, _>>()?;
        Ok((orders, total))
    }

    /// Every order matching the filter, oldest first, for export and reports.
    pub async fn all_orders(
        &self,
        company_id: &str,
        scope: &StoreScope,
        filter: &OrderFilter,
    ) -> Result<Vec<Order>, AppError> {
        let mut select =
            QueryBuilder::<Sqlite>::new(format!("SELECT {} FROM orders", ORDER_COLUMNS));
        push_order_filter(&mut select, company_id, scope, filter);
        select.push(" ORDER BY created_at, number");
        let rows = select.build().fetch_all(&self.pool).await?;

        rows.iter().map(order_from_row).collect()
    }

    /// Get an order of a company by ID.
    pub async fn get_order(&self, company_id: &str, id: &str) -> Result<Option<Order>, AppError> {
        let mut conn = self.pool.acquire().await?;
        fetch_order(&mut conn, company_id, id).await
    }

    /// Turn the user's cart for `store` into an order.
    ///
    /// Prices are re-read from the catalog, stock is reserved and the cart is
    /// emptied in the same transaction. Stores that do not require approval
    /// are checked against their monthly limits right away.
    pub async fn place_order(
        &self,
        user: &User,
        store: &Store,
        note: Option<String>,
    ) -> Result<Order, AppError> {
        let company_id = &user.company_id;
        let mut tx = self.pool.begin().await?;
        // Write first so the budget read below holds the write lock.
        bump_revision(&mut tx).await?;

        let mut cart = fetch_cart(&mut tx, company_id, &user.id, &store.id).await?;
        if cart.items.is_empty() {
            return Err(AppError::rejected(
                codes::EMPTY_CART,
                "Cannot place an order from an empty cart",
                json!({ "storeId": store.id }),
            ));
        }

        let mut items = Vec::with_capacity(cart.items.len());
        for line in &cart.items {
            let product = fetch_product(&mut tx, company_id, &line.product_id)
                .await?
                .filter(|p| p.active)
                .ok_or_else(|| {
                    AppError::rejected(
                        codes::PRODUCT_UNAVAILABLE,
                        format!("Product {} is no longer available", line.sku),
                        json!({ "productId": line.product_id }),
                    )
                })?;
            if line.quantity > product.stock {
                return Err(insufficient_stock(&line.product_id, line.quantity, product.stock));
            }
            items.push(OrderItem {
                product_id: product.id.clone(),
                sku: product.sku.clone(),
                name: product.name.clone(),
                unit_price_cents: product.price_cents,
                quantity: line.quantity,
                line_total_cents: line_total(&product.id, product.price_cents, line.quantity)?,
            });
        }
        let total_cents = sum_amounts(items.iter().map(|i| i.line_total_cents)).ok_or_else(|| {
            AppError::rejected(
                codes::INVALID_QUANTITY,
                "Order amount out of range",
                json!({ "storeId": store.id }),
            )
        })?;

        let status = if store.requires_approval {
            OrderStatus::ApprovalPending
        } else {
            let usage = budget_usage(&mut tx, &store.id, BudgetMonth::current()).await?;
            budget::check_order(total_cents, usage, store)?;
            OrderStatus::Pending
        };

        for item in &items {
            if !shift_stock(&mut tx, company_id, &item.product_id, -item.quantity).await? {
                return Err(insufficient_stock(&item.product_id, item.quantity, 0));
            }
        }

        let sequence: i64 = sqlx::query(
            "UPDATE companies SET order_sequence = order_sequence + 1 WHERE id = ? RETURNING order_sequence",
        )
        .bind(company_id)
        .fetch_one(&mut *tx)
        .await?
        .get("order_sequence");

        let now = now();
        let order = Order {
            id: new_id(),
            company_id: company_id.clone(),
            store_id: store.id.clone(),
            user_id: user.id.clone(),
            number: format_order_number(sequence),
            status,
            items,
            total_cents,
            note: note.filter(|n| !n.trim().is_empty()),
            decided_by: None,
            decided_at: None,
            rejection_reason: None,
            created_at: now.clone(),
            updated_at: now,
            version: 1,
        };

        sqlx::query(&format!(
            "INSERT INTO orders ({}) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
            ORDER_COLUMNS
        ))
        .bind(&order.id)
        .bind(&order.company_id)
        .bind(&order.store_id)
        .bind(&order.user_id)
        .bind(&order.number)
        .bind(order.status.as_str())
        .bind(to_json(&order.items)?)
        .bind(order.total_cents)
        .bind(&order.note)
        .bind(&order.decided_by)
        .bind(&order.decided_at)
        .bind(&order.rejection_reason)
        .bind(&order.created_at)
        .bind(&order.updated_at)
        .bind(order.version)
        .execute(&mut *tx)
        .await?;

        let previous_version = cart.version;
        cart.clear();
        save_cart(&mut tx, &mut cart, previous_version).await?;
        tx.commit().await?;

        tracing::info!(
            order_id = %order.id,
            number = %order.number,
            store_id = %order.store_id,
            total_cents = order.total_cents,
            status = order.status.as_str(),
            "Order placed"
        );

        Ok(order)
    }

    /// Approve an order awaiting approval if the store's budget allows it.
    pub async fn approve_order(
        &self,
        store: &Store,
        order_id: &str,
        approver: &User,
    ) -> Result<Order, AppError> {
        let mut tx = self.pool.begin().await?;
        bump_revision(&mut tx).await?;
        let order = fetch_decidable(&mut tx, store, order_id).await?;

        let usage = budget_usage(&mut tx, &store.id, BudgetMonth::current()).await?;
        budget::check_order(order.total_cents, usage, store)?;

        let now = now();
        let decided = Order {
            status: OrderStatus::Approved,
            decided_by: Some(approver.id.clone()),
            decided_at: Some(now.clone()),
            updated_at: now,
            version: order.version + 1,
            ..order.clone()
        };
        write_order_state(&mut tx, &decided, order.version).await?;
        tx.commit().await?;

        tracing::info!(order_id, approver_id = %approver.id, "Order approved");
        Ok(decided)
    }

    /// Refuse an order awaiting approval and return its units to stock.
    pub async fn reject_order(
        &self,
        store: &Store,
        order_id: &str,
        approver: &User,
        reason: Option<String>,
    ) -> Result<Order, AppError> {
        let mut tx = self.pool.begin().await?;
        bump_revision(&mut tx).await?;
        let order = fetch_decidable(&mut tx, store, order_id).await?;

        let now = now();
        let decided = Order {
            status: OrderStatus::Rejected,
            decided_by: Some(approver.id.clone()),
            decided_at: Some(now.clone()),
            rejection_reason: reason.filter(|r| !r.trim().is_empty()),
            updated_at: now,
            version: order.version + 1,
            ..order.clone()
        };
        write_order_state(&mut tx, &decided, order.version).await?;
        restock(&mut tx, &decided).await?;
        tx.commit().await?;

        tracing::info!(order_id, approver_id = %approver.id, "Order rejected");
        Ok(decided)
    }

    /// Move an order along the fulfilment workflow.
    pub async fn update_order_status(
        &self,
        company_id: &str,
        order_id: &str,
        next: OrderStatus,
        expected_version: Option<i64>,
    ) -> Result<Order, AppError> {
        let mut tx = self.pool.begin().await?;
        bump_revision(&mut tx).await?;
        let order = fetch_order(&mut tx, company_id, order_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Order {} not found", order_id)))?;

        check_version("order", order_id, expected_version, order.version)?;

        if !order.status.can_transition_to(next) {
            return Err(invalid_transition(&order, next));
        }

        let updated = Order {
            status: next,
            updated_at: now(),
            version: order.version + 1,
            ..order.clone()
        };
        write_order_state(&mut tx, &updated, order.version).await?;
        if next.restocks() {
            restock(&mut tx, &updated).await?;
        }
        tx.commit().await?;

        tracing::info!(
            order_id,
            from = order.status.as_str(),
            to = next.as_str(),
            "Order status changed"
        );
        Ok(updated)
    }
}

#[cfg(test)]
impl Repository {
    /// Move an order's timestamps into the past.
    pub async fn backdate_order(
        &self,
        order_id: &str,
        created_at: &str,
        decided_at: Option<&str>,
    ) -> Result<(), AppError> {
        sqlx::query(
            "UPDATE orders SET created_at = ?, decided_at = COALESCE(?, decided_at) WHERE id = ?",
        )
        .bind(created_at)
        .bind(decided_at)
        .bind(order_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

async fn fetch_order(
    conn: &mut SqliteConnection,
    company_id: &str,
    id: &str,
) -> Result<Option<Order>, AppError> {
    let row = sqlx::query(&format!(
        "SELECT {} FROM orders WHERE company_id = ? AND id = ?",
        ORDER_COLUMNS
    ))
    .bind(company_id)
    .bind(id)
    .fetch_optional(conn)
    .await?;

    row.as_ref().map(order_from_row).transpose()
}

/// Load an order of `store` that is still waiting for a decision.
async fn fetch_decidable(
    conn: &mut SqliteConnection,
    store: &Store,
    order_id: &str,
) -> Result<Order, AppError> {
    let order = fetch_order(conn, &store.company_id, order_id)
        .await?
        .filter(|o| o.store_id == store.id)
        .ok_or_else(|| AppError::NotFound(format!("Order {} not found", order_id)))?;

    if order.status != OrderStatus::ApprovalPending {
        return Err(AppError::rejected(
            codes::INVALID_TRANSITION,
            format!(
                "Order {} is {} and no longer awaits approval",
                order.number,
                order.status.as_str()
            ),
            json!({ "orderId": order.id, "status": order.status }),
        ));
    }
    Ok(order)
}

async fn write_order_state(
    conn: &mut SqliteConnection,
    order: &Order,
    previous_version: i64,
) -> Result<(), AppError> {
    let result = sqlx::query(
        "UPDATE orders SET status = ?, decided_by = ?, decided_at = ?, rejection_reason = ?, updated_at = ?, version = ? WHERE id = ? AND version = ?"
    )
    .bind(order.status.as_str())
    .bind(&order.decided_by)
    .bind(&order.decided_at)
    .bind(&order.rejection_reason)
    .bind(&order.updated_at)
    .bind(order.version)
    .bind(&order.id)
    .bind(previous_version)
    .execute(conn)
    .await?;

    if result.rows_affected() == 0 {
        return Err(AppError::Conflict {
            message: format!("Concurrent modification detected for order {}", order.number),
            current_version: previous_version,
            current: None,
        });
    }
    Ok(())
}

async fn restock(conn: &mut SqliteConnection, order: &Order) -> Result<(), AppError> {
    for item in &order.items {
        // A product deleted since placement has nothing to restock.
        shift_stock(conn, &order.company_id, &item.product_id, item.quantity).await?;
    }
    Ok(())
}

fn insufficient_stock(product_id: &str, requested: i64, available: i64) -> AppError {
    AppError::rejected(
        codes::INSUFFICIENT_STOCK,
        format!("Not enough stock for product {}", product_id),
        json!({
            "productId": product_id,
            "requested": requested,
            "available": available,
        }),
    )
}

fn invalid_transition(order: &Order, next: OrderStatus) -> AppError {
    AppError::rejected(
        codes::INVALID_TRANSITION,
        format!(
            "Order {} cannot move from {} to {}",
            order.number,
            order.status.as_str(),
            next.as_str()
        ),
        json!({ "orderId": order.id, "from": order.status, "to": next }),
    )
}

fn push_order_filter(
    builder: &mut QueryBuilder<'_, Sqlite>,
    company_id: &str,
    scope: &StoreScope,
    filter: &OrderFilter,
) {
    builder
        .push(" WHERE company_id = ")
        .push_bind(company_id.to_string());

    if let StoreScope::Only(store_ids) = scope {
        if store_ids.is_empty() {
            builder.push(" AND 0");
        } else {
            builder.push(" AND store_id IN (");
            let mut ids = builder.separated(", ");
            for id in store_ids {
                ids.push_bind(id.clone());
            }
            builder.push(")");
        }
    }
    if let Some(store_id) = &filter.store_id {
        builder.push(" AND store_id = ").push_bind(store_id.clone());
    }
    if let Some(status) = filter.status {
        builder.push(" AND status = ").push_bind(status.as_str());
    }
    if let Some(from) = &filter.from {
        builder.push(" AND created_at >= ").push_bind(from.clone());
    }
    if let Some(to) = &filter.to {
        builder.push(" AND created_at < ").push_bind(to.clone());
    }
}

pub(super) fn order_from_row(row: &SqliteRow) -> Result<Order, AppError> {
    let status: String = row.get("status");
    let items: String = row.get("items");

    Ok(Order {
        id: row.get("id"),
        company_id: row.get("company_id"),
        store_id: row.get("store_id"),
        user_id: row.get("user_id"),
        number: row.get("number"),
        status: OrderStatus::parse(&status)
            .ok_or_else(|| AppError::Internal(format!("Unknown order status {:?}", status)))?,
        items: from_json("items", &items)?,
        total_cents: row.get("total_cents"),
        note: row.get("note"),
        decided_by: row.get("decided_by"),
        decided_at: row.get("decided_at"),
        rejection_reason: row.get("rejection_reason"),
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
        version: row.get("version"),
    })
}
