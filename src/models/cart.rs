//! Cart model and quantity reconciliation rules.
//!
//! Clients apply quantity changes optimistically. The server either accepts
//! the whole change or refuses it and hands back the authoritative cart, so
//! a refused change never leaves a partially written cart behind.

use serde::{Deserialize, Serialize};
use serde_json::json;

use super::Product;
use crate::errors::{codes, AppError};

/// One product line in a cart.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct CartItem {
    pub product_id: String,
    pub sku: String,
    pub name: String,
    pub unit_price_cents: i64,
    pub quantity: i64,
    pub line_total_cents: i64,
}

/// A user's cart for one store.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Cart {
    pub id: String,
    pub company_id: String,
    pub user_id: String,
    pub store_id: String,
    pub items: Vec<CartItem>,
    pub total_cents: i64,
    pub updated_at: String,
    /// 0 until the cart is first written
    #[serde(default)]
    pub version: i64,
}

impl Cart {
    pub fn empty(id: String, company_id: &str, user_id: &str, store_id: &str) -> Self {
        Self {
            id,
            company_id: company_id.to_string(),
            user_id: user_id.to_string(),
            store_id: store_id.to_string(),
            items: Vec::new(),
            total_cents: 0,
            updated_at: String::new(),
            version: 0,
        }
    }

    pub fn quantity_of(&self, product_id: &str) -> i64 {
        self.items
            .iter()
            .find(|i| i.product_id == product_id)
            .map(|i| i.quantity)
            .unwrap_or(0)
    }

    /// Set the line for `product` to `quantity`, removing it at zero.
    ///
    /// The product snapshot (name, sku, price) is refreshed on every write.
    /// Amounts that do not fit in cents leave the cart untouched.
    pub fn set_quantity(&mut self, product: &Product, quantity: i64) -> Result<(), AppError> {
        let others = self.items.iter().filter(|i| i.product_id != product.id);
        if quantity <= 0 {
            let total_cents = sum_amounts(others.map(|i| i.line_total_cents))
                .ok_or_else(|| amount_out_of_range(&product.id, quantity))?;
            self.items.retain(|i| i.product_id != product.id);
            self.total_cents = total_cents;
            return Ok(());
        }

        let line_total_cents = line_total(&product.id, product.price_cents, quantity)?;
        let total_cents = sum_amounts(others.map(|i| i.line_total_cents))
            .and_then(|sum| sum.checked_add(line_total_cents))
            .ok_or_else(|| amount_out_of_range(&product.id, quantity))?;

        if let Some(item) = self.items.iter_mut().find(|i| i.product_id == product.id) {
            item.quantity = quantity;
            item.sku = product.sku.clone();
            item.name = product.name.clone();
            item.unit_price_cents = product.price_cents;
            item.line_total_cents = line_total_cents;
        } else {
            self.items.push(CartItem {
                product_id: product.id.clone(),
                sku: product.sku.clone(),
                name: product.name.clone(),
                unit_price_cents: product.price_cents,
                quantity,
                line_total_cents,
            });
        }
        self.total_cents = total_cents;
        Ok(())
    }

    pub fn clear(&mut self) {
        self.items.clear();
        self.total_cents = 0;
    }
}

/// `unit_price_cents * quantity`, refused when it overflows.
pub fn line_total(product_id: &str, unit_price_cents: i64, quantity: i64) -> Result<i64, AppError> {
    unit_price_cents
        .checked_mul(quantity)
        .ok_or_else(|| amount_out_of_range(product_id, quantity))
}

/// Sum of amounts in cents, `None` on overflow.
pub fn sum_amounts(amounts: impl IntoIterator<Item = i64>) -> Option<i64> {
    amounts
        .into_iter()
        .try_fold(0i64, |total, amount| total.checked_add(amount))
}

fn amount_out_of_range(product_id: &str, quantity: i64) -> AppError {
    AppError::rejected(
        codes::INVALID_QUANTITY,
        "Order amount out of range",
        json!({ "productId": product_id, "quantity": quantity }),
    )
}

/// Decide the new quantity for a signed `delta` against the current line.
pub fn resolve_adjustment(current: i64, delta: i64, product: &Product) -> Result<i64, AppError> {
    if delta == 0 {
        return Err(AppError::rejected(
            codes::INVALID_QUANTITY,
            "Quantity change must not be zero",
            json!({ "productId": product.id, "delta": delta }),
        ));
    }
    let requested = current.checked_add(delta).ok_or_else(|| {
        AppError::rejected(
            codes::INVALID_QUANTITY,
            "Quantity out of range",
            json!({ "productId": product.id, "delta": delta }),
        )
    })?;
    resolve_quantity(current, requested, product)
}

/// Validate an absolute target quantity against the current line.
///
/// Decreases are always allowed (down to zero) so a cart can shed lines
/// after stock drops. Increases need an active product with enough stock.
pub fn resolve_quantity(current: i64, requested: i64, product: &Product) -> Result<i64, AppError> {
    if requested < 0 {
        return Err(AppError::rejected(
            codes::INVALID_QUANTITY,
            format!("Quantity for {} cannot be negative", product.sku),
            json!({ "productId": product.id, "requested": requested, "current": current }),
        ));
    }
    if requested <= current {
        return Ok(requested);
    }
    if !product.active {
        return Err(AppError::rejected(
            codes::PRODUCT_UNAVAILABLE,
            format!("Product {} is not available", product.sku),
            json!({ "productId": product.id }),
        ));
    }
    if requested > product.stock {
        return Err(AppError::rejected(
            codes::INSUFFICIENT_STOCK,
            format!(
                "Only {} units of {} in stock, {} requested",
                product.stock, product.sku, requested
            ),
            json!({
                "productId": product.id,
                "requested": requested,
                "available": product.stock,
                "current": current,
            }),
        ));
    }
    Ok(requested)
}

/// Request body for setting an absolute quantity.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SetQuantityRequest {
    pub quantity: i64,
    #[serde(default)]
    pub expected_version: Option<i64>,
}

/// Request body for applying a signed quantity delta.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AdjustQuantityRequest {
    pub delta: i64,
    #[serde(default)]
    pub expected_version: Option<i64>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn product(stock: i64, active: bool) -> Product {
        Product {
            id: "p1".to_string(),
            company_id: "c1".to_string(),
            sku: "SKU-1".to_string(),
            name: "Paper towels".to_string(),
            description: None,
            category: None,
            price_cents: 250,
            stock,
            image_urls: Vec::new(),
            active,
            updated_at: String::new(),
            version: 1,
        }
    }

    #[test]
    fn test_adjustment_within_stock() {
        assert_eq!(resolve_adjustment(2, 3, &product(5, true)).unwrap(), 5);
        assert_eq!(resolve_adjustment(2, -2, &product(5, true)).unwrap(), 0);
    }

    #[test]
    fn test_adjustment_rejections() {
        let p = product(5, true);
        assert_eq!(
            resolve_adjustment(1, 0, &p).unwrap_err().error_code(),
            "INVALID_QUANTITY"
        );
        assert_eq!(
            resolve_adjustment(1, -2, &p).unwrap_err().error_code(),
            "INVALID_QUANTITY"
        );
        assert_eq!(
            resolve_adjustment(4, 2, &p).unwrap_err().error_code(),
            "INSUFFICIENT_STOCK"
        );
        assert_eq!(
            resolve_adjustment(0, 1, &product(5, false))
                .unwrap_err()
                .error_code(),
            "PRODUCT_UNAVAILABLE"
        );
    }

    #[test]
    fn test_decrease_allowed_above_stock() {
        // Stock dropped below what the cart already holds.
        assert_eq!(resolve_quantity(8, 6, &product(2, false)).unwrap(), 6);
    }

    #[test]
    fn test_set_quantity_maintains_totals() {
        let p = product(10, true);
        let mut cart = Cart::empty("c".to_string(), "c1", "u1", "s1");
        cart.set_quantity(&p, 3).unwrap();
        assert_eq!(cart.total_cents, 750);
        assert_eq!(cart.quantity_of("p1"), 3);

        cart.set_quantity(&p, 1).unwrap();
        assert_eq!(cart.items.len(), 1);
        assert_eq!(cart.total_cents, 250);

        cart.set_quantity(&p, 0).unwrap();
        assert!(cart.items.is_empty());
        assert_eq!(cart.total_cents, 0);
    }

    #[test]
    fn test_overflowing_amounts_are_refused() {
        let mut p = product(100_000_000, true);
        p.price_cents = 1_000_000_000_000;
        let quantity = resolve_adjustment(0, 100_000_000, &p).unwrap();

        let mut cart = Cart::empty("c".to_string(), "c1", "u1", "s1");
        let err = cart.set_quantity(&p, quantity).unwrap_err();
        assert_eq!(err.error_code(), "INVALID_QUANTITY");
        assert!(cart.items.is_empty());
        assert_eq!(cart.total_cents, 0);

        // Two lines that fit alone but not together
        let mut big = product(2, true);
        big.price_cents = i64::MAX / 2 + 1;
        let mut other = big.clone();
        other.id = "p2".to_string();
        cart.set_quantity(&big, 1).unwrap();
        let err = cart.set_quantity(&other, 1).unwrap_err();
        assert_eq!(err.error_code(), "INVALID_QUANTITY");
        assert_eq!(cart.items.len(), 1);
        assert_eq!(cart.total_cents, i64::MAX / 2 + 1);

        assert_eq!(sum_amounts([1, 2, 3]), Some(6));
        assert_eq!(sum_amounts([i64::MAX, 1]), None);
    }
}
