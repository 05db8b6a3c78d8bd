//! Budget and report views.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// A store's consumption of its monthly limits.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct StoreBudget {
    pub store_id: String,
    /// `YYYY-MM`
    pub month: String,
    pub current_month_amount_cents: i64,
    pub current_month_orders: i64,
    pub monthly_expense_limit_cents: Option<i64>,
    pub monthly_order_limit: Option<i64>,
    pub remaining_amount_cents: Option<i64>,
    pub remaining_orders: Option<i64>,
}

/// Query selecting the budget month.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct MonthQuery {
    #[serde(default)]
    pub month: Option<String>,
}

/// Query bounding a report on `createdAt`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RangeQuery {
    #[serde(default)]
    pub from: Option<String>,
    #[serde(default)]
    pub to: Option<String>,
}

/// Count and amount of orders in one status.
#[derive(Debug, Clone, Default, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct StatusTotals {
    pub orders: i64,
    pub total_cents: i64,
}

/// Per-store order summary.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StoreOrderSummary {
    pub store_id: String,
    pub store_name: String,
    pub orders: i64,
    pub total_cents: i64,
    pub by_status: BTreeMap<String, StatusTotals>,
}
