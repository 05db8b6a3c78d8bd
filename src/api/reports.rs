//! Report endpoints.

use axum::extract::{Query, State};

use super::{error, success, ApiResult};
use crate::budget::BudgetMonth;
use crate::errors::AppError;
use crate::models::{MonthQuery, OrderFilter, RangeQuery, Store, StoreBudget, StoreOrderSummary};
use crate::tenant::Caller;
use crate::AppState;

/// GET /api/reports/budgets?month=YYYY-MM - Budget view of every accessible store.
pub async fn budget_report(
    State(state): State<AppState>,
    caller: Caller,
    Query(query): Query<MonthQuery>,
) -> ApiResult<Vec<StoreBudget>> {
    let revision_id = state.repo.get_revision_id().await.unwrap_or(0);

    let result: Result<Vec<StoreBudget>, AppError> = async {
        let month = BudgetMonth::from_query(query.month.as_deref())?;
        let mut budgets = Vec::new();
        for store in accessible_stores(&state, &caller).await? {
            budgets.push(state.repo.store_budget(&store, month).await?);
        }
        Ok(budgets)
    }
    .await;

    match result {
        Ok(budgets) => success(budgets, revision_id),
        Err(e) => error(e, revision_id),
    }
}

/// GET /api/reports/orders?from=&to= - Order counts and totals per store and status.
pub async fn order_report(
    State(state): State<AppState>,
    caller: Caller,
    Query(range): Query<RangeQuery>,
) -> ApiResult<Vec<StoreOrderSummary>> {
    let revision_id = state.repo.get_revision_id().await.unwrap_or(0);

    let result: Result<Vec<StoreOrderSummary>, AppError> = async {
        let range = OrderFilter {
            from: range.from,
            to: range.to,
            ..OrderFilter::default()
        }
        .resolved()?;
        let stores = accessible_stores(&state, &caller).await?;
        state
            .repo
            .order_summary(&caller.company.id, &stores, range.from, range.to)
            .await
    }
    .await;

    match result {
        Ok(summary) => success(summary, revision_id),
        Err(e) => error(e, revision_id),
    }
}

async fn accessible_stores(state: &AppState, caller: &Caller) -> Result<Vec<Store>, AppError> {
    let stores = state.repo.list_stores(&caller.company.id).await?;
    Ok(stores
        .into_iter()
        .filter(|s| caller.user.can_access_store(&s.id))
        .collect())
}
