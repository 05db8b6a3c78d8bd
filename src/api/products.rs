//! Product catalog and search endpoints.

use axum::{
    extract::{Path, Query, State},
    Json,
};
use serde::{Deserialize, Serialize};

use super::{error, require_non_negative, require_text, success, written, ApiResult};
use crate::errors::AppError;
use crate::models::{
    CreateProductRequest, Page, PageQuery, Product, ProductFilter, UpdateProductRequest,
};
use crate::tenant::Caller;
use crate::AppState;

/// Maximum number of search results allowed.
const MAX_SEARCH_LIMIT: usize = 100;

/// Search query parameters.
#[derive(Debug, Deserialize)]
pub struct SearchQuery {
    pub q: String,
    #[serde(default = "default_limit")]
    pub limit: usize,
    #[serde(default)]
    pub offset: usize,
}

fn default_limit() -> usize {
    20
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchResponse {
    pub results: Vec<SearchResultItem>,
    pub total: usize,
    pub limit: usize,
    pub offset: usize,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchResultItem {
    pub product: Product,
    pub score: f32,
}

/// GET /api/products - List the catalog (paginated).
///
/// Only admins see inactive products.
pub async fn list_products(
    State(state): State<AppState>,
    caller: Caller,
    Query(mut filter): Query<ProductFilter>,
    Query(page): Query<PageQuery>,
) -> ApiResult<Page<Product>> {
    let revision_id = state.repo.get_revision_id().await.unwrap_or(0);

    if !caller.user.is_admin() {
        filter.active = Some(true);
    }

    match state
        .repo
        .list_products(&caller.company.id, &filter, page)
        .await
    {
        Ok((products, total)) => success(Page::new(products, page, total), revision_id),
        Err(e) => error(e, revision_id),
    }
}

/// GET /api/products/{id} - Get a single product.
pub async fn get_product(
    State(state): State<AppState>,
    caller: Caller,
    Path(id): Path<String>,
) -> ApiResult<Product> {
    let revision_id = state.repo.get_revision_id().await.unwrap_or(0);

    match state.repo.get_product(&caller.company.id, &id).await {
        Ok(Some(product)) => success(product, revision_id),
        Ok(None) => error(
            AppError::NotFound(format!("Product {} not found", id)),
            revision_id,
        ),
        Err(e) => error(e, revision_id),
    }
}

/// POST /api/products - Create a product (admin).
pub async fn create_product(
    State(state): State<AppState>,
    caller: Caller,
    Json(request): Json<CreateProductRequest>,
) -> ApiResult<Product> {
    let revision_id = state.repo.get_revision_id().await.unwrap_or(0);

    let checks = caller
        .require_admin()
        .and_then(|_| require_text(&request.sku, "SKU"))
        .and_then(|_| require_text(&request.name, "Name"))
        .and_then(|_| require_non_negative(Some(request.price_cents), "priceCents"))
        .and_then(|_| require_non_negative(Some(request.stock), "stock"));
    if let Err(e) = checks {
        return error(e, revision_id);
    }

    match state.repo.create_product(&caller.company.id, &request).await {
        Ok(product) => {
            if let Err(e) = state.search.index_products(std::slice::from_ref(&product)).await {
                tracing::warn!("Failed to index product: {}", e);
            }

            let new_revision = state.repo.get_revision_id().await.unwrap_or(revision_id);
            success(product, new_revision)
        }
        Err(e) => error(e, revision_id),
    }
}

/// PUT /api/products/{id} - Update a product (admin).
pub async fn update_product(
    State(state): State<AppState>,
    caller: Caller,
    Path(id): Path<String>,
    Json(request): Json<UpdateProductRequest>,
) -> ApiResult<Product> {
    let revision_id = state.repo.get_revision_id().await.unwrap_or(0);

    let result: Result<Product, AppError> = async {
        caller.require_admin()?;
        if let Some(sku) = &request.sku {
            require_text(sku, "SKU")?;
        }
        if let Some(name) = &request.name {
            require_text(name, "Name")?;
        }
        require_non_negative(request.price_cents, "priceCents")?;
        require_non_negative(request.stock, "stock")?;

        let product = state
            .repo
            .update_product(&caller.company.id, &id, &request)
            .await?;
        if let Err(e) = state.search.index_products(std::slice::from_ref(&product)).await {
            tracing::warn!("Failed to re-index product: {}", e);
        }
        Ok(product)
    }
    .await;

    written(&state, result, revision_id).await
}

/// GET /api/products/search - Full-text search over the company catalog.
pub async fn search_products(
    State(state): State<AppState>,
    caller: Caller,
    Query(params): Query<SearchQuery>,
) -> ApiResult<SearchResponse> {
    let revision_id = state.repo.get_revision_id().await.unwrap_or(0);

    let limit = params.limit.min(MAX_SEARCH_LIMIT);

    let search_results =
        match state
            .search
            .search(&caller.company.id, &params.q, limit, params.offset)
        {
            Ok(results) => results,
            Err(e) => return error(e, revision_id),
        };

    let mut results = Vec::new();
    for sr in search_results {
        if let Ok(Some(product)) = state.repo.get_product(&caller.company.id, &sr.product_id).await {
            if product.active || caller.user.is_admin() {
                results.push(SearchResultItem {
                    product,
                    score: sr.score,
                });
            }
        }
    }

    let total = results.len();

    success(
        SearchResponse {
            results,
            total,
            limit,
            offset: params.offset,
        },
        revision_id,
    )
}
