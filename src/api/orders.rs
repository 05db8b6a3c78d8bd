//! Order API endpoints: placement, approval decisions and fulfilment.

use axum::{
    extract::{Path, Query, State},
    Json,
};

use super::{accessible_store, error, success, written, ApiResult};
use crate::budget::BudgetMonth;
use crate::db::StoreScope;
use crate::errors::AppError;
use crate::models::{
    Order, OrderDecision, OrderFilter, Page, PageQuery, PlaceOrderRequest, RejectOrderRequest,
    Store, UpdateOrderStatusRequest,
};
use crate::tenant::Caller;
use crate::AppState;

/// POST /api/orders - Place the caller's cart for a store.
pub async fn place_order(
    State(state): State<AppState>,
    caller: Caller,
    Json(request): Json<PlaceOrderRequest>,
) -> ApiResult<Order> {
    let revision_id = state.repo.get_revision_id().await.unwrap_or(0);

    let result: Result<Order, AppError> = async {
        let store = accessible_store(&state, &caller, &request.store_id).await?;
        if !store.active {
            return Err(AppError::Forbidden(format!(
                "Store {} is deactivated",
                store.code
            )));
        }
        state
            .repo
            .place_order(&caller.user, &store, request.note.clone())
            .await
    }
    .await;

    if let Err(e) = &result {
        tracing::warn!(
            store_id = %request.store_id,
            user_id = %caller.user.id,
            code = e.error_code(),
            "Order refused"
        );
    }

    written(&state, result, revision_id).await
}

/// GET /api/orders - Orders of the caller's stores (paginated, newest first).
pub async fn list_orders(
    State(state): State<AppState>,
    caller: Caller,
    Query(filter): Query<OrderFilter>,
    Query(page): Query<PageQuery>,
) -> ApiResult<Page<Order>> {
    let revision_id = state.repo.get_revision_id().await.unwrap_or(0);

    let filter = match filter.resolved() {
        Ok(filter) => filter,
        Err(e) => return error(e, revision_id),
    };

    let scope = StoreScope::for_user(&caller.user);
    match state
        .repo
        .list_orders(&caller.company.id, &scope, &filter, page)
        .await
    {
        Ok((orders, total)) => success(Page::new(orders, page, total), revision_id),
        Err(e) => error(e, revision_id),
    }
}

/// GET /api/orders/{id} - Get a single order.
pub async fn get_order(
    State(state): State<AppState>,
    caller: Caller,
    Path(id): Path<String>,
) -> ApiResult<Order> {
    let revision_id = state.repo.get_revision_id().await.unwrap_or(0);

    match visible_order(&state, &caller, &id).await {
        Ok(order) => success(order, revision_id),
        Err(e) => error(e, revision_id),
    }
}

/// POST /api/orders/{id}/approve - Approve an order awaiting approval.
///
/// The store budget is checked first; the response carries the budget
/// refetched after the decision.
pub async fn approve_order(
    State(state): State<AppState>,
    caller: Caller,
    Path(id): Path<String>,
) -> ApiResult<OrderDecision> {
    let revision_id = state.repo.get_revision_id().await.unwrap_or(0);

    let result: Result<OrderDecision, AppError> = async {
        let store = decision_store(&state, &caller, &id).await?;
        let order = state.repo.approve_order(&store, &id, &caller.user).await?;
        let budget = state
            .repo
            .store_budget(&store, BudgetMonth::current())
            .await?;
        Ok(OrderDecision { order, budget })
    }
    .await;

    written(&state, result, revision_id).await
}

/// POST /api/orders/{id}/reject - Refuse an order awaiting approval.
pub async fn reject_order(
    State(state): State<AppState>,
    caller: Caller,
    Path(id): Path<String>,
    body: Option<Json<RejectOrderRequest>>,
) -> ApiResult<OrderDecision> {
    let revision_id = state.repo.get_revision_id().await.unwrap_or(0);
    let request = body.map(|Json(r)| r).unwrap_or_default();

    let result: Result<OrderDecision, AppError> = async {
        let store = decision_store(&state, &caller, &id).await?;
        let order = state
            .repo
            .reject_order(&store, &id, &caller.user, request.reason)
            .await?;
        let budget = state
            .repo
            .store_budget(&store, BudgetMonth::current())
            .await?;
        Ok(OrderDecision { order, budget })
    }
    .await;

    written(&state, result, revision_id).await
}

/// PUT /api/orders/{id}/status - Fulfilment status change (admin).
pub async fn update_order_status(
    State(state): State<AppState>,
    caller: Caller,
    Path(id): Path<String>,
    Json(request): Json<UpdateOrderStatusRequest>,
) -> ApiResult<Order> {
    let revision_id = state.repo.get_revision_id().await.unwrap_or(0);

    let result: Result<Order, AppError> = async {
        caller.require_admin()?;
        state
            .repo
            .update_order_status(
                &caller.company.id,
                &id,
                request.status,
                request.expected_version,
            )
            .await
    }
    .await;

    written(&state, result, revision_id).await
}

async fn visible_order(state: &AppState, caller: &Caller, id: &str) -> Result<Order, AppError> {
    let order = state
        .repo
        .get_order(&caller.company.id, id)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("Order {} not found", id)))?;
    caller.require_store_access(&order.store_id)?;
    Ok(order)
}

/// Store of an order the caller may approve or reject.
async fn decision_store(state: &AppState, caller: &Caller, id: &str) -> Result<Store, AppError> {
    if !caller.user.can_decide_orders() {
        return Err(AppError::Forbidden(
            "Only approvers and admins can decide orders".to_string(),
        ));
    }
    let order = visible_order(state, caller, id).await?;
    accessible_store(state, caller, &order.store_id).await
}
