//! Database repository for tenant-scoped CRUD operations.
//!
//! Entity operations live in sibling modules as further `impl Repository`
//! blocks. Every query that touches tenant data filters on `company_id`.

use chrono::Utc;
use serde::de::DeserializeOwned;
use sqlx::{Row, SqliteConnection, SqlitePool};

use crate::errors::AppError;
use crate::models::RevisionInfo;

/// Database repository for all data operations.
#[derive(Clone)]
pub struct Repository {
    pub(super) pool: SqlitePool,
}

impl Repository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Get the current revision ID.
    pub async fn get_revision_id(&self) -> Result<i64, AppError> {
        let row = sqlx::query("SELECT revision_id FROM meta WHERE id = 1")
            .fetch_one(&self.pool)
            .await?;
        Ok(row.get("revision_id"))
    }

    /// Get revision info.
    pub async fn get_revision_info(&self) -> Result<RevisionInfo, AppError> {
        let row = sqlx::query("SELECT revision_id, generated_at FROM meta WHERE id = 1")
            .fetch_one(&self.pool)
            .await?;
        Ok(RevisionInfo {
            revision_id: row.get("revision_id"),
            generated_at: row.get("generated_at"),
        })
    }

    /// Increment the revision ID outside a transaction.
    pub(super) async fn increment_revision(&self) -> Result<(), AppError> {
        let mut conn = self.pool.acquire().await?;
        bump_revision(&mut conn).await
    }
}

/// Increment the revision on the given connection (usually a transaction).
pub(super) async fn bump_revision(conn: &mut SqliteConnection) -> Result<(), AppError> {
    let now = Utc::now().to_rfc3339();
    sqlx::query("UPDATE meta SET revision_id = revision_id + 1, generated_at = ? WHERE id = 1")
        .bind(&now)
        .execute(conn)
        .await?;
    Ok(())
}

/// Refuse a write whose `expected_version` no longer matches.
pub(super) fn check_version(
    entity: &str,
    id: &str,
    expected: Option<i64>,
    current: i64,
) -> Result<(), AppError> {
    match expected {
        Some(expected) if expected != current => Err(AppError::Conflict {
            message: format!(
                "Version mismatch for {} {}: expected {}, current {}",
                entity, id, expected, current
            ),
            current_version: current,
            current: None,
        }),
        _ => Ok(()),
    }
}

/// Conflict raised when a conditional `UPDATE ... AND version = ?` matched no row.
pub(super) fn concurrent_modification(entity: &str, id: &str, current_version: i64) -> AppError {
    AppError::Conflict {
        message: format!("Concurrent modification detected for {} {}", entity, id),
        current_version,
        current: None,
    }
}

/// Map a unique-constraint failure to a validation error, pass others through.
pub(super) fn unique_violation(err: sqlx::Error, message: impl Into<String>) -> AppError {
    match &err {
        sqlx::Error::Database(db) if db.is_unique_violation() => {
            AppError::Validation(message.into())
        }
        _ => AppError::from(err),
    }
}

pub(super) fn to_json<T: serde::Serialize>(value: &T) -> Result<String, AppError> {
    serde_json::to_string(value)
        .map_err(|e| AppError::Internal(format!("Failed to encode column: {}", e)))
}

pub(super) fn from_json<T: DeserializeOwned>(column: &str, raw: &str) -> Result<T, AppError> {
    serde_json::from_str(raw)
        .map_err(|e| AppError::Internal(format!("Corrupt {} column: {}", column, e)))
}

pub(super) fn now() -> String {
    Utc::now().to_rfc3339()
}

pub(super) fn new_id() -> String {
    uuid::Uuid::new_v4().to_string()
}
