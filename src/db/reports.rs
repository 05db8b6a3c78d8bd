//! Budget usage and order summaries.

use std::collections::BTreeMap;

use sqlx::{Row, SqliteConnection};

use super::orders::StoreScope;
use super::Repository;
use crate::budget::{self, BudgetMonth, BudgetUsage};
use crate::errors::AppError;
use crate::models::{OrderFilter, OrderStatus, StatusTotals, Store, StoreBudget, StoreOrderSummary};

impl Repository {
    /// Budget view of a store for `month`.
    pub async fn store_budget(
        &self,
        store: &Store,
        month: BudgetMonth,
    ) -> Result<StoreBudget, AppError> {
        let mut conn = self.pool.acquire().await?;
        let usage = budget_usage(&mut conn, &store.id, month).await?;
        Ok(budget::store_budget(store, month, usage))
    }

    /// Per-store order counts and totals grouped by status.
    pub async fn order_summary(
        &self,
        company_id: &str,
        stores: &[Store],
        from: Option<String>,
        to: Option<String>,
    ) -> Result<Vec<StoreOrderSummary>, AppError> {
        let scope = StoreScope::Only(stores.iter().map(|s| s.id.clone()).collect());
        let filter = OrderFilter {
            from,
            to,
            ..OrderFilter::default()
        };
        let orders = self.all_orders(company_id, &scope, &filter).await?;

        let mut summaries: Vec<StoreOrderSummary> = stores
            .iter()
            .map(|store| StoreOrderSummary {
                store_id: store.id.clone(),
                store_name: store.name.clone(),
                orders: 0,
                total_cents: 0,
                by_status: BTreeMap::new(),
            })
            .collect();

        for order in &orders {
            let Some(summary) = summaries.iter_mut().find(|s| s.store_id == order.store_id) else {
                continue;
            };
            summary.orders += 1;
            summary.total_cents = summary.total_cents.saturating_add(order.total_cents);
            let totals = summary
                .by_status
                .entry(order.status.as_str().to_string())
                .or_insert_with(StatusTotals::default);
            totals.orders += 1;
            totals.total_cents = totals.total_cents.saturating_add(order.total_cents);
        }

        Ok(summaries)
    }
}

/// Spend and order count a store has used in `month`.
///
/// Orders are charged to the month they were approved in, or the month they
/// were placed in when no approval happened.
pub(super) async fn budget_usage(
    conn: &mut SqliteConnection,
    store_id: &str,
    month: BudgetMonth,
) -> Result<BudgetUsage, AppError> {
    let (start, end) = month.bounds();
    let counted: Vec<&str> = OrderStatus::ALL
        .iter()
        .filter(|s| s.counts_toward_budget())
        .map(|s| s.as_str())
        .collect();

    let mut query = sqlx::QueryBuilder::<sqlx::Sqlite>::new(
        "SELECT COALESCE(SUM(total_cents), 0) AS amount, COUNT(*) AS orders FROM orders WHERE store_id = ",
    );
    query
        .push_bind(store_id.to_string())
        .push(" AND COALESCE(decided_at, created_at) >= ")
        .push_bind(start)
        .push(" AND COALESCE(decided_at, created_at) < ")
        .push_bind(end)
        .push(" AND status IN (");
    let mut statuses = query.separated(", ");
    for status in counted {
        statuses.push_bind(status);
    }
    query.push(")");

    let row = query.build().fetch_one(conn).await?;
    Ok(BudgetUsage {
        amount_cents: row.get("amount"),
        orders: row.get("orders"),
    })
}
