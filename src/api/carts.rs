//! Cart API endpoints.
//!
//! Quantity changes are applied atomically on the server. A refused change
//! answers with the stored cart in `error.details.cart`; clients replace
//! their optimistic local quantities with it.

use axum::{
    extract::{Path, State},
    Json,
};

use super::{accessible_store, error, success, written, ApiResult};
use crate::db::CartChange;
use crate::errors::AppError;
use crate::models::{AdjustQuantityRequest, Cart, SetQuantityRequest};
use crate::tenant::Caller;
use crate::AppState;

/// GET /api/carts/{storeId} - The caller's cart for a store.
pub async fn get_cart(
    State(state): State<AppState>,
    caller: Caller,
    Path(store_id): Path<String>,
) -> ApiResult<Cart> {
    let revision_id = state.repo.get_revision_id().await.unwrap_or(0);

    let result: Result<Cart, AppError> = async {
        let store = accessible_store(&state, &caller, &store_id).await?;
        state
            .repo
            .get_cart(&caller.company.id, &caller.user.id, &store.id)
            .await
    }
    .await;

    match result {
        Ok(cart) => success(cart, revision_id),
        Err(e) => error(e, revision_id),
    }
}

/// PUT /api/carts/{storeId}/items/{productId} - Set an absolute quantity.
pub async fn set_cart_item(
    State(state): State<AppState>,
    caller: Caller,
    Path((store_id, product_id)): Path<(String, String)>,
    Json(request): Json<SetQuantityRequest>,
) -> ApiResult<Cart> {
    change_item(
        &state,
        &caller,
        &store_id,
        &product_id,
        CartChange::Set(request.quantity),
        request.expected_version,
    )
    .await
}

/// POST /api/carts/{storeId}/items/{productId}/adjust - Apply a signed delta.
pub async fn adjust_cart_item(
    State(state): State<AppState>,
    caller: Caller,
    Path((store_id, product_id)): Path<(String, String)>,
    Json(request): Json<AdjustQuantityRequest>,
) -> ApiResult<Cart> {
    change_item(
        &state,
        &caller,
        &store_id,
        &product_id,
        CartChange::Adjust(request.delta),
        request.expected_version,
    )
    .await
}

/// DELETE /api/carts/{storeId} - Empty the cart.
pub async fn clear_cart(
    State(state): State<AppState>,
    caller: Caller,
    Path(store_id): Path<String>,
) -> ApiResult<Cart> {
    let revision_id = state.repo.get_revision_id().await.unwrap_or(0);

    let result: Result<Cart, AppError> = async {
        let store = accessible_store(&state, &caller, &store_id).await?;
        state
            .repo
            .clear_cart(&caller.company.id, &caller.user.id, &store.id)
            .await
    }
    .await;

    written(&state, result, revision_id).await
}

async fn change_item(
    state: &AppState,
    caller: &Caller,
    store_id: &str,
    product_id: &str,
    change: CartChange,
    expected_version: Option<i64>,
) -> ApiResult<Cart> {
    let revision_id = state.repo.get_revision_id().await.unwrap_or(0);

    let result: Result<Cart, AppError> = async {
        let store = accessible_store(state, caller, store_id).await?;
        state
            .repo
            .change_cart_item(
                &caller.company.id,
                &caller.user.id,
                &store.id,
                product_id,
                change,
                expected_version,
            )
            .await
    }
    .await;

    written(state, result, revision_id).await
}
