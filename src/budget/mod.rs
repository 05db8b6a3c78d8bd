//! Monthly budget and order-count limits for stores.
//!
//! An order may be accepted for a store only while the store stays within
//! both of its monthly limits:
//!
//! - spend: `order total + amount already ordered this month <= expense limit`
//! - count: `orders already placed this month < order limit`
//!
//! A missing limit disables that check.

use chrono::{DateTime, Datelike, NaiveDate, TimeZone, Utc};
use serde_json::json;

use crate::errors::{codes, AppError};
use crate::models::{Store, StoreBudget};

/// Orders and spend already counted for a store in a month.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BudgetUsage {
    pub amount_cents: i64,
    pub orders: i64,
}

/// A calendar month in UTC.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BudgetMonth {
    year: i32,
    month: u32,
}

impl BudgetMonth {
    pub fn containing(at: DateTime<Utc>) -> Self {
        Self {
            year: at.year(),
            month: at.month(),
        }
    }

    pub fn current() -> Self {
        Self::containing(Utc::now())
    }

    /// Parse `YYYY-MM`.
    pub fn parse(s: &str) -> Option<Self> {
        let (year, month) = s.trim().split_once('-')?;
        if year.len() != 4 || month.len() != 2 {
            return None;
        }
        let year: i32 = year.parse().ok()?;
        let month: u32 = month.parse().ok()?;
        NaiveDate::from_ymd_opt(year, month, 1)?;
        Some(Self { year, month })
    }

    /// Month from an optional query value, defaulting to the current one.
    pub fn from_query(raw: Option<&str>) -> Result<Self, AppError> {
        match raw {
            Some(s) => Self::parse(s)
                .ok_or_else(|| AppError::Validation(format!("Invalid month {:?}, expected YYYY-MM", s))),
            None => Ok(Self::current()),
        }
    }

    fn next(&self) -> Self {
        if self.month == 12 {
            Self {
                year: self.year + 1,
                month: 1,
            }
        } else {
            Self {
                year: self.year,
                month: self.month + 1,
            }
        }
    }

    fn first_instant(&self) -> String {
        Utc.with_ymd_and_hms(self.year, self.month, 1, 0, 0, 0)
            .single()
            .map(|dt| dt.to_rfc3339())
            .unwrap_or_default()
    }

    /// Half-open `[start, end)` bounds comparable with stored RFC 3339 timestamps.
    pub fn bounds(&self) -> (String, String) {
        (self.first_instant(), self.next().first_instant())
    }

    pub fn label(&self) -> String {
        format!("{:04}-{:02}", self.year, self.month)
    }
}

/// Normalize a `from`/`to` query bound to a UTC RFC 3339 timestamp.
///
/// Accepts RFC 3339 with any offset, or `YYYY-MM-DD` meaning midnight UTC.
pub fn parse_instant(field: &str, raw: &str) -> Result<String, AppError> {
    let raw = raw.trim();
    if let Ok(at) = DateTime::parse_from_rfc3339(raw) {
        return Ok(at.with_timezone(&Utc).to_rfc3339());
    }
    NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .ok()
        .and_then(|date| date.and_hms_opt(0, 0, 0))
        .map(|midnight| Utc.from_utc_datetime(&midnight).to_rfc3339())
        .ok_or_else(|| {
            AppError::Validation(format!(
                "Invalid {} {:?}, expected RFC 3339 or YYYY-MM-DD",
                field, raw
            ))
        })
}

/// Refuse an order of `order_total_cents` that would break a store limit.
///
/// The spend limit is reported first when both limits fail.
pub fn check_order(
    order_total_cents: i64,
    usage: BudgetUsage,
    store: &Store,
) -> Result<(), AppError> {
    if let Some(limit) = store.monthly_expense_limit_cents {
        let projected = order_total_cents.saturating_add(usage.amount_cents);
        if projected > limit {
            return Err(AppError::rejected(
                codes::BUDGET_EXCEEDED,
                format!(
                    "Order total {} plus {} already ordered this month exceeds the monthly limit of {} for store {}",
                    order_total_cents, usage.amount_cents, limit, store.code
                ),
                json!({
                    "storeId": store.id,
                    "orderTotalCents": order_total_cents,
                    "currentMonthAmountCents": usage.amount_cents,
                    "monthlyExpenseLimitCents": limit,
                }),
            ));
        }
    }

    if let Some(limit) = store.monthly_order_limit {
        if usage.orders >= limit {
            return Err(AppError::rejected(
                codes::ORDER_LIMIT_REACHED,
                format!(
                    "Store {} already has {} orders this month (limit {})",
                    store.code, usage.orders, limit
                ),
                json!({
                    "storeId": store.id,
                    "currentMonthOrders": usage.orders,
                    "monthlyOrderLimit": limit,
                }),
            ));
        }
    }

    Ok(())
}

/// Budget view of a store for `month`.
pub fn store_budget(store: &Store, month: BudgetMonth, usage: BudgetUsage) -> StoreBudget {
    StoreBudget {
        store_id: store.id.clone(),
        month: month.label(),
        current_month_amount_cents: usage.amount_cents,
        current_month_orders: usage.orders,
        monthly_expense_limit_cents: store.monthly_expense_limit_cents,
        monthly_order_limit: store.monthly_order_limit,
        remaining_amount_cents: store
            .monthly_expense_limit_cents
            .map(|limit| (limit - usage.amount_cents).max(0)),
        remaining_orders: store
            .monthly_order_limit
            .map(|limit| (limit - usage.orders).max(0)),
    }
}
