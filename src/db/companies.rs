//! Company (tenant) persistence.

use sqlx::{sqlite::SqliteRow, Row};

use super::repository::{
    bump_revision, check_version, concurrent_modification, new_id, now, unique_violation,
};
use super::users::insert_user;
use super::Repository;
use crate::errors::AppError;
use crate::models::{
    Company, CreateCompanyRequest, CreatedCompany, Role, UpdateCompanyRequest, User,
};

const COMPANY_COLUMNS: &str = "id, name, dns_prefix, primary_color, secondary_color, logo_url, active, created_at, updated_at, version";

impl Repository {
    /// List all companies.
    pub async fn list_companies(&self) -> Result<Vec<Company>, AppError> {
        let rows = sqlx::query(&format!(
            "SELECT {} FROM companies ORDER BY name",
            COMPANY_COLUMNS
        ))
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.iter().map(company_from_row).collect())
    }

    /// Get a company by ID.
    pub async fn get_company(&self, id: &str) -> Result<Option<Company>, AppError> {
        let row = sqlx::query(&format!(
            "SELECT {} FROM companies WHERE id = ?",
            COMPANY_COLUMNS
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.as_ref().map(company_from_row))
    }

    /// Resolve a company by its DNS prefix (case-insensitive).
    pub async fn get_company_by_prefix(&self, prefix: &str) -> Result<Option<Company>, AppError> {
        let row = sqlx::query(&format!(
            "SELECT {} FROM companies WHERE dns_prefix = ?",
            COMPANY_COLUMNS
        ))
        .bind(prefix.to_ascii_lowercase())
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.as_ref().map(company_from_row))
    }

    /// Create a company together with its first administrator.
    pub async fn create_company(
        &self,
        request: &CreateCompanyRequest,
    ) -> Result<CreatedCompany, AppError> {
        let now = now();
        let company = Company {
            id: new_id(),
            name: request.name.trim().to_string(),
            dns_prefix: request.dns_prefix.to_ascii_lowercase(),
            primary_color: request.primary_color.clone(),
            secondary_color: request.secondary_color.clone(),
            logo_url: request.logo_url.clone(),
            active: true,
            created_at: now.clone(),
            updated_at: now.clone(),
            version: 1,
        };
        let admin = User {
            id: new_id(),
            company_id: company.id.clone(),
            name: request.admin.name.trim().to_string(),
            email: request.admin.email.trim().to_string(),
            role: Role::Admin,
            store_ids: Vec::new(),
            active: true,
            privacy_consent: false,
            marketing_consent: false,
            created_at: now.clone(),
            updated_at: now,
            version: 1,
        };

        let mut tx = self.pool.begin().await?;

        sqlx::query(
            "INSERT INTO companies (id, name, dns_prefix, primary_color, secondary_color, logo_url, active, order_sequence, created_at, updated_at, version) VALUES (?, ?, ?, ?, ?, ?, 1, 0, ?, ?, 1)"
        )
        .bind(&company.id)
        .bind(&company.name)
        .bind(&company.dns_prefix)
        .bind(&company.primary_color)
        .bind(&company.secondary_color)
        .bind(&company.logo_url)
        .bind(&company.created_at)
        .bind(&company.updated_at)
        .execute(&mut *tx)
        .await
        .map_err(|e| {
            unique_violation(
                e,
                format!("DNS prefix {} is already taken", company.dns_prefix),
            )
        })?;

        insert_user(&mut tx, &admin).await?;
        bump_revision(&mut tx).await?;
        tx.commit().await?;

        tracing::info!(company_id = %company.id, dns_prefix = %company.dns_prefix, "Company created");

        Ok(CreatedCompany { company, admin })
    }

    /// Update a company with optimistic concurrency control.
    pub async fn update_company(
        &self,
        id: &str,
        request: &UpdateCompanyRequest,
    ) -> Result<Company, AppError> {
        let existing = self
            .get_company(id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Company {} not found", id)))?;

        check_version("company", id, request.expected_version, existing.version)?;

        let updated = Company {
            name: request
                .name
                .as_ref()
                .map(|n| n.trim().to_string())
                .unwrap_or(existing.name.clone()),
            primary_color: request.primary_color.clone().or(existing.primary_color.clone()),
            secondary_color: request
                .secondary_color
                .clone()
                .or(existing.secondary_color.clone()),
            logo_url: request.logo_url.clone().or(existing.logo_url.clone()),
            active: request.active.unwrap_or(existing.active),
            updated_at: now(),
            version: existing.version + 1,
            ..existing.clone()
        };

        let result = sqlx::query(
            "UPDATE companies SET name = ?, primary_color = ?, secondary_color = ?, logo_url = ?, active = ?, updated_at = ?, version = ? WHERE id = ? AND version = ?"
        )
        .bind(&updated.name)
        .bind(&updated.primary_color)
        .bind(&updated.secondary_color)
        .bind(&updated.logo_url)
        .bind(updated.active as i32)
        .bind(&updated.updated_at)
        .bind(updated.version)
        .bind(id)
        .bind(existing.version)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            let current = self.get_company(id).await?;
            return Err(concurrent_modification(
                "company",
                id,
                current.map(|c| c.version).unwrap_or(0),
            ));
        }

        self.increment_revision().await?;
        Ok(updated)
    }
}

fn company_from_row(row: &SqliteRow) -> Company {
    let active: i32 = row.get("active");
    Company {
        id: row.get("id"),
        name: row.get("name"),
        dns_prefix: row.get("dns_prefix"),
        primary_color: row.get("primary_color"),
        secondary_color: row.get("secondary_color"),
        logo_url: row.get("logo_url"),
        active: active != 0,
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
        version: row.get("version"),
    }
}
