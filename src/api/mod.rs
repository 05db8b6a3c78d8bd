//! REST API module.
//!
//! Contains all API routes and handlers of the ordering portal.

mod carts;
mod companies;
mod orders;
mod products;
mod reports;
mod revision;
mod stores;
mod transfer;
mod users;

pub use carts::*;
pub use companies::*;
pub use orders::*;
pub use products::*;
pub use reports::*;
pub use revision::*;
pub use stores::*;
pub use transfer::*;
pub use users::*;

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;

use crate::errors::AppError;
use crate::models::Store;
use crate::tenant::Caller;
use crate::AppState;

/// Success response envelope.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ApiResponse<T: Serialize> {
    pub success: bool,
    pub data: T,
    pub revision_id: i64,
}

impl<T: Serialize> ApiResponse<T> {
    pub fn new(data: T, revision_id: i64) -> Self {
        Self {
            success: true,
            data,
            revision_id,
        }
    }
}

impl<T: Serialize> IntoResponse for ApiResponse<T> {
    fn into_response(self) -> Response {
        (StatusCode::OK, Json(self)).into_response()
    }
}

/// Response type that can be either success or error.
pub type ApiResult<T> = Result<ApiResponse<T>, crate::errors::AppErrorWithRevision>;

/// Create a successful API response.
pub fn success<T: Serialize>(data: T, revision_id: i64) -> ApiResult<T> {
    Ok(ApiResponse::new(data, revision_id))
}

/// Create an error API response.
pub fn error<T: Serialize>(err: AppError, revision_id: i64) -> ApiResult<T> {
    Err(crate::errors::AppErrorWithRevision {
        error: err,
        revision_id,
    })
}

/// Respond to a write: the success envelope carries the revision after it.
async fn written<T: Serialize>(
    state: &AppState,
    result: Result<T, AppError>,
    revision_id: i64,
) -> ApiResult<T> {
    match result {
        Ok(data) => {
            let new_revision = state.repo.get_revision_id().await.unwrap_or(revision_id);
            success(data, new_revision)
        }
        Err(e) => error(e, revision_id),
    }
}

/// Load a store of the caller's company the caller may act on.
async fn accessible_store(
    state: &AppState,
    caller: &Caller,
    store_id: &str,
) -> Result<Store, AppError> {
    let store = state
        .repo
        .get_store(&caller.company.id, store_id)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("Store {} not found", store_id)))?;
    caller.require_store_access(&store.id)?;
    Ok(store)
}

/// Refuse blank required text fields.
fn require_text(value: &str, field: &str) -> Result<(), AppError> {
    if value.trim().is_empty() {
        Err(AppError::Validation(format!("{} is required", field)))
    } else {
        Ok(())
    }
}

fn require_non_negative(value: Option<i64>, field: &str) -> Result<(), AppError> {
    match value {
        Some(v) if v < 0 => Err(AppError::Validation(format!(
            "{} must not be negative",
            field
        ))),
        _ => Ok(()),
    }
}
