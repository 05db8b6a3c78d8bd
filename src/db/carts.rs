//! Cart persistence and the atomic quantity change.

use sqlx::{sqlite::SqliteRow, Row, SqliteConnection};

use super::products::fetch_product;
use super::repository::{bump_revision, check_version, from_json, new_id, now, to_json};
use super::Repository;
use crate::errors::AppError;
use crate::models::{resolve_adjustment, resolve_quantity, Cart};

/// A requested change to one cart line.
#[derive(Debug, Clone, Copy)]
pub enum CartChange {
    /// Absolute quantity; zero removes the line
    Set(i64),
    /// Signed delta against the stored quantity
    Adjust(i64),
}

impl Repository {
    /// Get the caller's cart for a store, empty if never written.
    pub async fn get_cart(
        &self,
        company_id: &str,
        user_id: &str,
        store_id: &str,
    ) -> Result<Cart, AppError> {
        let mut conn = self.pool.acquire().await?;
        fetch_cart(&mut conn, company_id, user_id, store_id).await
    }

    /// Apply a quantity change all-or-nothing.
    ///
    /// On any refusal nothing is written and the error carries the stored
    /// cart under `details.cart`, which the client restores its local
    /// quantities from.
    pub async fn change_cart_item(
        &self,
        company_id: &str,
        user_id: &str,
        store_id: &str,
        product_id: &str,
        change: CartChange,
        expected_version: Option<i64>,
    ) -> Result<Cart, AppError> {
        let mut tx = self.pool.begin().await?;
        bump_revision(&mut tx).await?;

        let stored = fetch_cart(&mut tx, company_id, user_id, store_id).await?;
        let snapshot = serde_json::to_value(&stored)?;

        let result: Result<Cart, AppError> = async {
            check_version("cart", &stored.id, expected_version, stored.version)?;

            let product = fetch_product(&mut tx, company_id, product_id)
                .await?
                .ok_or_else(|| AppError::NotFound(format!("Product {} not found", product_id)))?;

            let current = stored.quantity_of(product_id);
            let quantity = match change {
                CartChange::Set(quantity) => resolve_quantity(current, quantity, &product)?,
                CartChange::Adjust(delta) => resolve_adjustment(current, delta, &product)?,
            };

            let mut cart = stored.clone();
            cart.set_quantity(&product, quantity)?;
            save_cart(&mut tx, &mut cart, stored.version).await?;
            Ok(cart)
        }
        .await;

        match result {
            Ok(cart) => {
                tx.commit().await?;
                Ok(cart)
            }
            Err(err) => {
                tx.rollback().await?;
                tracing::warn!(
                    user_id,
                    store_id,
                    product_id,
                    code = err.error_code(),
                    "Cart change refused"
                );
                Err(err.with_current("cart", snapshot))
            }
        }
    }

    /// Remove every line from the caller's cart.
    pub async fn clear_cart(
        &self,
        company_id: &str,
        user_id: &str,
        store_id: &str,
    ) -> Result<Cart, AppError> {
        let mut tx = self.pool.begin().await?;
        let stored = fetch_cart(&mut tx, company_id, user_id, store_id).await?;
        if stored.items.is_empty() {
            return Ok(stored);
        }

        let mut cart = stored.clone();
        cart.clear();
        save_cart(&mut tx, &mut cart, stored.version).await?;
        bump_revision(&mut tx).await?;
        tx.commit().await?;
        Ok(cart)
    }
}

pub(super) async fn fetch_cart(
    conn: &mut SqliteConnection,
    company_id: &str,
    user_id: &str,
    store_id: &str,
) -> Result<Cart, AppError> {
    let row = sqlx::query(
        "SELECT id, company_id, user_id, store_id, items, total_cents, updated_at, version FROM carts WHERE company_id = ? AND user_id = ? AND store_id = ?"
    )
    .bind(company_id)
    .bind(user_id)
    .bind(store_id)
    .fetch_optional(conn)
    .await?;

    match row {
        Some(row) => cart_from_row(&row),
        None => Ok(Cart::empty(new_id(), company_id, user_id, store_id)),
    }
}

/// Persist `cart`, bumping its version. A cart at version 0 is inserted.
pub(super) async fn save_cart(
    conn: &mut SqliteConnection,
    cart: &mut Cart,
    previous_version: i64,
) -> Result<(), AppError> {
    cart.updated_at = now();
    cart.version = previous_version + 1;
    let items = to_json(&cart.items)?;

    let written = if previous_version == 0 {
        sqlx::query(
            "INSERT INTO carts (id, company_id, user_id, store_id, items, total_cents, updated_at, version) VALUES (?, ?, ?, ?, ?, ?, ?, ?) ON CONFLICT (user_id, store_id) DO NOTHING"
        )
        .bind(&cart.id)
        .bind(&cart.company_id)
        .bind(&cart.user_id)
        .bind(&cart.store_id)
        .bind(&items)
        .bind(cart.total_cents)
        .bind(&cart.updated_at)
        .bind(cart.version)
        .execute(conn)
        .await?
        .rows_affected()
    } else {
        sqlx::query(
            "UPDATE carts SET items = ?, total_cents = ?, updated_at = ?, version = ? WHERE id = ? AND version = ?"
        )
        .bind(&items)
        .bind(cart.total_cents)
        .bind(&cart.updated_at)
        .bind(cart.version)
        .bind(&cart.id)
        .bind(previous_version)
        .execute(conn)
        .await?
        .rows_affected()
    };

    if written == 0 {
        return Err(AppError::Conflict {
            message: format!("Concurrent modification detected for cart {}", cart.id),
            current_version: previous_version,
            current: None,
        });
    }
    Ok(())
}

fn cart_from_row(row: &SqliteRow) -> Result<Cart, AppError> {
    let items: String = row.get("items");
    Ok(Cart {
        id: row.get("id"),
        company_id: row.get("company_id"),
        user_id: row.get("user_id"),
        store_id: row.get("store_id"),
        items: from_json("items", &items)?,
        total_cents: row.get("total_cents"),
        updated_at: row.get("updated_at"),
        version: row.get("version"),
    })
}
