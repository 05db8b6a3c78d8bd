//! CSV export and import endpoints.

use axum::{
    extract::{Query, State},
    http::header,
    response::{IntoResponse, Response},
};

use super::{error, written, ApiResult};
use crate::db::StoreScope;
use crate::errors::{AppError, AppErrorWithRevision};
use crate::models::OrderFilter;
use crate::tenant::Caller;
use crate::transfer::{self, ImportReport};
use crate::AppState;

type CsvResult = Result<Response, AppErrorWithRevision>;

/// GET /api/export/orders.csv - Orders of the caller's stores, one row per line.
pub async fn export_orders(
    State(state): State<AppState>,
    caller: Caller,
    Query(filter): Query<OrderFilter>,
) -> CsvResult {
    let result: Result<String, AppError> = async {
        let filter = filter.resolved()?;
        let scope = StoreScope::for_user(&caller.user);
        let orders = state
            .repo
            .all_orders(&caller.company.id, &scope, &filter)
            .await?;
        let stores = state.repo.list_stores(&caller.company.id).await?;
        transfer::orders_csv(&orders, &stores)
    }
    .await;

    csv_response(&state, result, "orders.csv").await
}

/// GET /api/export/users.csv - All users (admin).
pub async fn export_users(State(state): State<AppState>, caller: Caller) -> CsvResult {
    let result: Result<String, AppError> = async {
        caller.require_admin()?;
        let users = state.repo.all_users(&caller.company.id).await?;
        let stores = state.repo.list_stores(&caller.company.id).await?;
        transfer::users_csv(&users, &stores)
    }
    .await;

    csv_response(&state, result, "users.csv").await
}

/// GET /api/export/products.csv - The catalog, in the import layout.
pub async fn export_products(State(state): State<AppState>, caller: Caller) -> CsvResult {
    let result: Result<String, AppError> = async {
        let mut products = state.repo.all_products(&caller.company.id).await?;
        if !caller.user.is_admin() {
            products.retain(|p| p.active);
        }
        transfer::products_csv(&products)
    }
    .await;

    csv_response(&state, result, "products.csv").await
}

/// POST /api/import/products - Upsert products by SKU from a CSV body (admin).
pub async fn import_products(
    State(state): State<AppState>,
    caller: Caller,
    body: String,
) -> ApiResult<ImportReport> {
    let revision_id = state.repo.get_revision_id().await.unwrap_or(0);

    if let Err(e) = caller.require_admin() {
        return error(e, revision_id);
    }

    let result: Result<ImportReport, AppError> = async {
        let (rows, errors) = transfer::parse_products(&body)?;
        let report = ImportReport {
            errors,
            ..ImportReport::default()
        };
        let (report, products) = state
            .repo
            .import_products(&caller.company.id, &rows, report)
            .await?;
        if let Err(e) = state.search.index_products(&products).await {
            tracing::warn!("Failed to index imported products: {}", e);
        }
        Ok(report)
    }
    .await;

    written(&state, result, revision_id).await
}

/// POST /api/import/users - Create or update users by email from a CSV body (admin).
pub async fn import_users(
    State(state): State<AppState>,
    caller: Caller,
    body: String,
) -> ApiResult<ImportReport> {
    let revision_id = state.repo.get_revision_id().await.unwrap_or(0);

    if let Err(e) = caller.require_admin() {
        return error(e, revision_id);
    }

    let result: Result<ImportReport, AppError> = async {
        let stores = state.repo.list_stores(&caller.company.id).await?;
        let (rows, errors) = transfer::parse_users(&body, &stores)?;
        let report = ImportReport {
            errors,
            ..ImportReport::default()
        };
        state
            .repo
            .import_users(&caller.company.id, &caller.user.id, &rows, report)
            .await
    }
    .await;

    written(&state, result, revision_id).await
}

async fn csv_response(
    state: &AppState,
    result: Result<String, AppError>,
    filename: &str,
) -> CsvResult {
    match result {
        Ok(body) => Ok((
            [
                (header::CONTENT_TYPE, "text/csv; charset=utf-8".to_string()),
                (
                    header::CONTENT_DISPOSITION,
                    format!("attachment; filename=\"{}\"", filename),
                ),
            ],
            body,
        )
            .into_response()),
        Err(error) => Err(AppErrorWithRevision {
            error,
            revision_id: state.repo.get_revision_id().await.unwrap_or(0),
        }),
    }
}
