//! Store persistence.

use sqlx::{sqlite::SqliteRow, Row};

use super::repository::{check_version, concurrent_modification, new_id, now, unique_violation};
use super::Repository;
use crate::errors::AppError;
use crate::models::{CreateStoreRequest, Store, UpdateStoreRequest};

const STORE_COLUMNS: &str = "id, company_id, name, code, address, monthly_expense_limit_cents, monthly_order_limit, requires_approval, active, updated_at, version";

impl Repository {
    /// List the stores of a company.
    pub async fn list_stores(&self, company_id: &str) -> Result<Vec<Store>, AppError> {
        let rows = sqlx::query(&format!(
            "SELECT {} FROM stores WHERE company_id = ? ORDER BY name",
            STORE_COLUMNS
        ))
        .bind(company_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.iter().map(store_from_row).collect())
    }

    /// Get a store of a company by ID.
    pub async fn get_store(&self, company_id: &str, id: &str) -> Result<Option<Store>, AppError> {
        let row = sqlx::query(&format!(
            "SELECT {} FROM stores WHERE company_id = ? AND id = ?",
            STORE_COLUMNS
        ))
        .bind(company_id)
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.as_ref().map(store_from_row))
    }

    /// Create a new store.
    pub async fn create_store(
        &self,
        company_id: &str,
        request: &CreateStoreRequest,
    ) -> Result<Store, AppError> {
        let store = Store {
            id: new_id(),
            company_id: company_id.to_string(),
            name: request.name.trim().to_string(),
            code: request.code.trim().to_string(),
            address: request.address.clone(),
            monthly_expense_limit_cents: request.monthly_expense_limit_cents,
            monthly_order_limit: request.monthly_order_limit,
            requires_approval: request.requires_approval,
            active: true,
            updated_at: now(),
            version: 1,
        };

        sqlx::query(
            "INSERT INTO stores (id, company_id, name, code, address, monthly_expense_limit_cents, monthly_order_limit, requires_approval, active, updated_at, version) VALUES (?, ?, ?, ?, ?, ?, ?, ?, 1, ?, 1)"
        )
        .bind(&store.id)
        .bind(&store.company_id)
        .bind(&store.name)
        .bind(&store.code)
        .bind(&store.address)
        .bind(store.monthly_expense_limit_cents)
        .bind(store.monthly_order_limit)
        .bind(store.requires_approval as i32)
        .bind(&store.updated_at)
        .execute(&self.pool)
        .await
        .map_err(|e| unique_violation(e, format!("Store code {} is already in use", store.code)))?;

        self.increment_revision().await?;
        Ok(store)
    }

    /// Update a store with optimistic concurrency control.
    pub async fn update_store(
        &self,
        company_id: &str,
        id: &str,
        request: &UpdateStoreRequest,
    ) -> Result<Store, AppError> {
        let existing = self
            .get_store(company_id, id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Store {} not found", id)))?;

        check_version("store", id, request.expected_version, existing.version)?;

        let updated = Store {
            name: request
                .name
                .as_ref()
                .map(|n| n.trim().to_string())
                .unwrap_or(existing.name.clone()),
            code: request
                .code
                .as_ref()
                .map(|c| c.trim().to_string())
                .unwrap_or(existing.code.clone()),
            address: request.address.clone().or(existing.address.clone()),
            monthly_expense_limit_cents: request
                .monthly_expense_limit_cents
                .unwrap_or(existing.monthly_expense_limit_cents),
            monthly_order_limit: request
                .monthly_order_limit
                .unwrap_or(existing.monthly_order_limit),
            requires_approval: request
                .requires_approval
                .unwrap_or(existing.requires_approval),
            active: request.active.unwrap_or(existing.active),
            updated_at: now(),
            version: existing.version + 1,
            ..existing.clone()
        };

        let result = sqlx::query(
            "UPDATE stores SET name = ?, code = ?, address = ?, monthly_expense_limit_cents = ?, monthly_order_limit = ?, requires_approval = ?, active = ?, updated_at = ?, version = ? WHERE company_id = ? AND id = ? AND version = ?"
        )
        .bind(&updated.name)
        .bind(&updated.code)
        .bind(&updated.address)
        .bind(updated.monthly_expense_limit_cents)
        .bind(updated.monthly_order_limit)
        .bind(updated.requires_approval as i32)
        .bind(updated.active as i32)
        .bind(&updated.updated_at)
        .bind(updated.version)
        .bind(company_id)
        .bind(id)
        .bind(existing.version)
        .execute(&self.pool)
        .await
        .map_err(|e| unique_violation(e, format!("Store code {} is already in use", updated.code)))?;

        if result.rows_affected() == 0 {
            let current = self.get_store(company_id, id).await?;
            return Err(concurrent_modification(
                "store",
                id,
                current.map(|s| s.version).unwrap_or(0),
            ));
        }

        self.increment_revision().await?;
        Ok(updated)
    }
}

pub(super) fn store_from_row(row: &SqliteRow) -> Store {
    let requires_approval: i32 = row.get("requires_approval");
    let active: i32 = row.get("active");
    Store {
        id: row.get("id"),
        company_id: row.get("company_id"),
        name: row.get("name"),
        code: row.get("code"),
        address: row.get("address"),
        monthly_expense_limit_cents: row.get("monthly_expense_limit_cents"),
        monthly_order_limit: row.get("monthly_order_limit"),
        requires_approval: requires_approval != 0,
        active: active != 0,
        updated_at: row.get("updated_at"),
        version: row.get("version"),
    }
}
