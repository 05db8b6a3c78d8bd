//! Order model and the status workflow.

use serde::{Deserialize, Serialize};

use super::StoreBudget;
use crate::budget;
use crate::errors::AppError;

/// Lifecycle status of an order.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum OrderStatus {
    /// Placed at a store without approval; awaiting confirmation
    Pending,
    ApprovalPending,
    Approved,
    Rejected,
    Confirmed,
    Processing,
    Shipped,
    Delivered,
    /// Refused by the downstream ERP
    SedisRejected,
}

impl OrderStatus {
    pub const ALL: [OrderStatus; 9] = [
        OrderStatus::Pending,
        OrderStatus::ApprovalPending,
        OrderStatus::Approved,
        OrderStatus::Rejected,
        OrderStatus::Confirmed,
        OrderStatus::Processing,
        OrderStatus::Shipped,
        OrderStatus::Delivered,
        OrderStatus::SedisRejected,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            OrderStatus::Pending => "pending",
            OrderStatus::ApprovalPending => "approval_pending",
            OrderStatus::Approved => "approved",
            OrderStatus::Rejected => "rejected",
            OrderStatus::Confirmed => "confirmed",
            OrderStatus::Processing => "processing",
            OrderStatus::Shipped => "shipped",
            OrderStatus::Delivered => "delivered",
            OrderStatus::SedisRejected => "sedis_rejected",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|status| status.as_str() == s)
    }

    /// Statuses whose orders consume the store's monthly budget.
    pub fn counts_toward_budget(&self) -> bool {
        matches!(
            self,
            OrderStatus::Pending
                | OrderStatus::Approved
                | OrderStatus::Confirmed
                | OrderStatus::Processing
                | OrderStatus::Shipped
                | OrderStatus::Delivered
        )
    }

    /// Statuses that return the ordered units to stock.
    pub fn restocks(&self) -> bool {
        matches!(self, OrderStatus::Rejected | OrderStatus::SedisRejected)
    }

    /// Fulfilment transitions. Approval decisions go through their own
    /// operations and are not reachable here.
    pub fn can_transition_to(&self, next: OrderStatus) -> bool {
        use OrderStatus::*;
        matches!(
            (self, next),
            (Pending | Approved, Confirmed | SedisRejected)
                | (Confirmed, Processing | SedisRejected)
                | (Processing, Shipped)
                | (Shipped, Delivered)
        )
    }
}

/// A line of a placed order, priced at placement time.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct OrderItem {
    pub product_id: String,
    pub sku: String,
    pub name: String,
    pub unit_price_cents: i64,
    pub quantity: i64,
    pub line_total_cents: i64,
}

/// An order placed for a store.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Order {
    pub id: String,
    pub company_id: String,
    pub store_id: String,
    pub user_id: String,
    /// Per-company sequential number, e.g. `ORD-000042`
    pub number: String,
    pub status: OrderStatus,
    pub items: Vec<OrderItem>,
    pub total_cents: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub note: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub decided_by: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub decided_at: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rejection_reason: Option<String>,
    pub created_at: String,
    pub updated_at: String,
    #[serde(default)]
    pub version: i64,
}

pub fn format_order_number(sequence: i64) -> String {
    format!("ORD-{:06}", sequence)
}

/// Request body for placing an order from the caller's cart.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlaceOrderRequest {
    pub store_id: String,
    #[serde(default)]
    pub note: Option<String>,
}

/// Request body for rejecting an order.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RejectOrderRequest {
    #[serde(default)]
    pub reason: Option<String>,
}

/// Request body for a fulfilment status change.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateOrderStatusRequest {
    pub status: OrderStatus,
    #[serde(default)]
    pub expected_version: Option<i64>,
}

/// Query filters for order listing and export.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderFilter {
    #[serde(default)]
    pub store_id: Option<String>,
    #[serde(default)]
    pub status: Option<OrderStatus>,
    /// Inclusive lower bound on `createdAt` (RFC 3339 or `YYYY-MM-DD`)
    #[serde(default)]
    pub from: Option<String>,
    /// Exclusive upper bound on `createdAt`
    #[serde(default)]
    pub to: Option<String>,
}

impl OrderFilter {
    /// Validate the date bounds and rewrite them as UTC timestamps.
    pub fn resolved(self) -> Result<Self, AppError> {
        Ok(Self {
            from: resolve_bound("from", self.from)?,
            to: resolve_bound("to", self.to)?,
            ..self
        })
    }
}

fn resolve_bound(field: &str, raw: Option<String>) -> Result<Option<String>, AppError> {
    raw.filter(|r| !r.trim().is_empty())
        .map(|r| budget::parse_instant(field, &r))
        .transpose()
}

/// Result of an approval decision, with the store budget refetched after it.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderDecision {
    pub order: Order,
    pub budget: StoreBudget,
}
