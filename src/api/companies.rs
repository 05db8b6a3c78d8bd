//! Company API endpoints.
//!
//! Company management is platform scope: it sits behind the API key only,
//! with no tenant resolution.

use axum::{
    extract::{Path, State},
    Json,
};

use super::{error, require_text, success, written, ApiResult};
use crate::errors::AppError;
use crate::models::{
    is_valid_dns_prefix, is_valid_email, is_valid_hex_color, Branding, Company,
    CreateCompanyRequest, CreatedCompany, UpdateCompanyRequest,
};
use crate::tenant::Tenant;
use crate::AppState;

/// GET /api/companies - List all companies.
pub async fn list_companies(State(state): State<AppState>) -> ApiResult<Vec<Company>> {
    let revision_id = state.repo.get_revision_id().await.unwrap_or(0);

    match state.repo.list_companies().await {
        Ok(companies) => success(companies, revision_id),
        Err(e) => error(e, revision_id),
    }
}

/// GET /api/companies/{id} - Get a single company.
pub async fn get_company(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<Company> {
    let revision_id = state.repo.get_revision_id().await.unwrap_or(0);

    match state.repo.get_company(&id).await {
        Ok(Some(company)) => success(company, revision_id),
        Ok(None) => error(
            AppError::NotFound(format!("Company {} not found", id)),
            revision_id,
        ),
        Err(e) => error(e, revision_id),
    }
}

/// POST /api/companies - Create a company and its first admin.
pub async fn create_company(
    State(state): State<AppState>,
    Json(request): Json<CreateCompanyRequest>,
) -> ApiResult<CreatedCompany> {
    let revision_id = state.repo.get_revision_id().await.unwrap_or(0);

    if let Err(e) = validate_new_company(&request) {
        return error(e, revision_id);
    }

    let result = state.repo.create_company(&request).await;
    written(&state, result, revision_id).await
}

/// PUT /api/companies/{id} - Update a company.
pub async fn update_company(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(request): Json<UpdateCompanyRequest>,
) -> ApiResult<Company> {
    let revision_id = state.repo.get_revision_id().await.unwrap_or(0);

    if let Some(name) = &request.name {
        if let Err(e) = require_text(name, "Company name") {
            return error(e, revision_id);
        }
    }
    if let Err(e) = validate_colors(
        request.primary_color.as_deref(),
        request.secondary_color.as_deref(),
    ) {
        return error(e, revision_id);
    }

    let result = state.repo.update_company(&id, &request).await;
    written(&state, result, revision_id).await
}

/// GET /api/company - Branding of the addressed company.
pub async fn get_branding(
    State(state): State<AppState>,
    Tenant(company): Tenant,
) -> ApiResult<Branding> {
    let revision_id = state.repo.get_revision_id().await.unwrap_or(0);
    success(Branding::from(&company), revision_id)
}

fn validate_new_company(request: &CreateCompanyRequest) -> Result<(), AppError> {
    require_text(&request.name, "Company name")?;
    if !is_valid_dns_prefix(&request.dns_prefix.to_ascii_lowercase()) {
        return Err(AppError::Validation(format!(
            "Invalid DNS prefix {:?}: use 1-63 letters, digits or hyphens",
            request.dns_prefix
        )));
    }
    validate_colors(
        request.primary_color.as_deref(),
        request.secondary_color.as_deref(),
    )?;
    require_text(&request.admin.name, "Admin name")?;
    if !is_valid_email(&request.admin.email) {
        return Err(AppError::Validation(format!(
            "Invalid admin email {:?}",
            request.admin.email
        )));
    }
    Ok(())
}

fn validate_colors(primary: Option<&str>, secondary: Option<&str>) -> Result<(), AppError> {
    for color in [primary, secondary].into_iter().flatten() {
        if !is_valid_hex_color(color) {
            return Err(AppError::Validation(format!(
                "Invalid color {:?}: expected #rgb or #rrggbb",
                color
            )));
        }
    }
    Ok(())
}
