//! Store API endpoints.

use axum::{
    extract::{Path, Query, State},
    Json,
};

use super::{accessible_store, error, require_non_negative, require_text, success, written, ApiResult};
use crate::budget::BudgetMonth;
use crate::errors::AppError;
use crate::models::{CreateStoreRequest, MonthQuery, Store, StoreBudget, UpdateStoreRequest};
use crate::tenant::Caller;
use crate::AppState;

/// GET /api/stores - Stores the caller can act on.
pub async fn list_stores(State(state): State<AppState>, caller: Caller) -> ApiResult<Vec<Store>> {
    let revision_id = state.repo.get_revision_id().await.unwrap_or(0);

    match state.repo.list_stores(&caller.company.id).await {
        Ok(stores) => success(
            stores
                .into_iter()
                .filter(|s| caller.user.can_access_store(&s.id))
                .collect(),
            revision_id,
        ),
        Err(e) => error(e, revision_id),
    }
}

/// GET /api/stores/{id} - Get a single store.
pub async fn get_store(
    State(state): State<AppState>,
    caller: Caller,
    Path(id): Path<String>,
) -> ApiResult<Store> {
    let revision_id = state.repo.get_revision_id().await.unwrap_or(0);

    match accessible_store(&state, &caller, &id).await {
        Ok(store) => success(store, revision_id),
        Err(e) => error(e, revision_id),
    }
}

/// POST /api/stores - Create a store.
pub async fn create_store(
    State(state): State<AppState>,
    caller: Caller,
    Json(request): Json<CreateStoreRequest>,
) -> ApiResult<Store> {
    let revision_id = state.repo.get_revision_id().await.unwrap_or(0);

    let checks = caller
        .require_admin()
        .and_then(|_| require_text(&request.name, "Store name"))
        .and_then(|_| require_text(&request.code, "Store code"))
        .and_then(|_| {
            require_non_negative(
                request.monthly_expense_limit_cents,
                "monthlyExpenseLimitCents",
            )
        })
        .and_then(|_| require_non_negative(request.monthly_order_limit, "monthlyOrderLimit"));
    if let Err(e) = checks {
        return error(e, revision_id);
    }

    let result = state.repo.create_store(&caller.company.id, &request).await;
    written(&state, result, revision_id).await
}

/// PUT /api/stores/{id} - Update a store.
pub async fn update_store(
    State(state): State<AppState>,
    caller: Caller,
    Path(id): Path<String>,
    Json(request): Json<UpdateStoreRequest>,
) -> ApiResult<Store> {
    let revision_id = state.repo.get_revision_id().await.unwrap_or(0);

    if let Err(e) = validate_store_update(&caller, &request) {
        return error(e, revision_id);
    }

    let result = state
        .repo
        .update_store(&caller.company.id, &id, &request)
        .await;
    written(&state, result, revision_id).await
}

/// GET /api/stores/{id}/budget?month=YYYY-MM - Monthly budget view.
pub async fn get_store_budget(
    State(state): State<AppState>,
    caller: Caller,
    Path(id): Path<String>,
    Query(query): Query<MonthQuery>,
) -> ApiResult<StoreBudget> {
    let revision_id = state.repo.get_revision_id().await.unwrap_or(0);

    let result: Result<StoreBudget, AppError> = async {
        let month = BudgetMonth::from_query(query.month.as_deref())?;
        let store = accessible_store(&state, &caller, &id).await?;
        state.repo.store_budget(&store, month).await
    }
    .await;

    match result {
        Ok(budget) => success(budget, revision_id),
        Err(e) => error(e, revision_id),
    }
}

fn validate_store_update(caller: &Caller, request: &UpdateStoreRequest) -> Result<(), AppError> {
    caller.require_admin()?;
    if let Some(name) = &request.name {
        require_text(name, "Store name")?;
    }
    if let Some(code) = &request.code {
        require_text(code, "Store code")?;
    }
    require_non_negative(
        request.monthly_expense_limit_cents.flatten(),
        "monthlyExpenseLimitCents",
    )?;
    require_non_negative(request.monthly_order_limit.flatten(), "monthlyOrderLimit")
}
