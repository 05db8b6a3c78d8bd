//! Bulk CSV imports, each applied in a single transaction.

use super::products::{fetch_product_by_sku, insert_product, write_product};
use super::repository::{bump_revision, new_id, now};
use super::users::{fetch_user_by_email, insert_user, write_user};
use super::Repository;
use crate::errors::AppError;
use crate::models::{Product, Role, User};
use crate::transfer::{ImportError, ImportReport, ProductRow, UserRow};

impl Repository {
    /// Upsert products by SKU.
    ///
    /// Returns the report and every product written, for reindexing.
    pub async fn import_products(
        &self,
        company_id: &str,
        rows: &[ProductRow],
        mut report: ImportReport,
    ) -> Result<(ImportReport, Vec<Product>), AppError> {
        let mut tx = self.pool.begin().await?;
        let mut written = Vec::new();

        for row in rows {
            let result = match fetch_product_by_sku(&mut tx, company_id, &row.sku).await? {
                Some(existing) => {
                    let updated = Product {
                        name: row.name.clone(),
                        description: row.description.clone(),
                        category: row.category.clone(),
                        price_cents: row.price_cents,
                        stock: row.stock,
                        active: row.active,
                        updated_at: now(),
                        version: existing.version + 1,
                        ..existing.clone()
                    };
                    write_product(&mut tx, &updated, existing.version)
                        .await
                        .map(|_| (updated, false))
                }
                None => {
                    let product = Product {
                        id: new_id(),
                        company_id: company_id.to_string(),
                        sku: row.sku.clone(),
                        name: row.name.clone(),
                        description: row.description.clone(),
                        category: row.category.clone(),
                        price_cents: row.price_cents,
                        stock: row.stock,
                        image_urls: Vec::new(),
                        active: row.active,
                        updated_at: now(),
                        version: 1,
                    };
                    insert_product(&mut tx, &product)
                        .await
                        .map(|_| (product, true))
                }
            };

            match result {
                Ok((product, created)) => {
                    if created {
                        report.created += 1;
                    } else {
                        report.updated += 1;
                    }
                    written.push(product);
                }
                Err(AppError::Validation(message)) => report.errors.push(ImportError {
                    row: row.row,
                    message,
                }),
                Err(err) => return Err(err),
            }
        }

        if !written.is_empty() {
            bump_revision(&mut tx).await?;
        }
        tx.commit().await?;

        report.errors.sort_by_key(|e| e.row);
        tracing::info!(
            company_id,
            created = report.created,
            updated = report.updated,
            errors = report.errors.len(),
            "Product import applied"
        );
        Ok((report, written))
    }

    /// Create or update users by email.
    ///
    /// Rows that would demote or deactivate `acting_user_id` are refused.
    pub async fn import_users(
        &self,
        company_id: &str,
        acting_user_id: &str,
        rows: &[UserRow],
        mut report: ImportReport,
    ) -> Result<ImportReport, AppError> {
        let mut tx = self.pool.begin().await?;
        let mut changed = false;

        for row in rows {
            let result = match fetch_user_by_email(&mut tx, company_id, &row.email).await? {
                Some(existing) if existing.id == acting_user_id
                    && (row.role != Role::Admin || !row.active) =>
                {
                    Err(AppError::Validation(
                        "Cannot demote or deactivate your own account".to_string(),
                    ))
                }
                Some(existing) => {
                    let updated = User {
                        name: row.name.clone(),
                        role: row.role,
                        store_ids: row.store_ids.clone(),
                        active: row.active,
                        updated_at: now(),
                        version: existing.version + 1,
                        ..existing.clone()
                    };
                    write_user(&mut tx, &updated, existing.version)
                        .await
                        .map(|_| false)
                }
                None => {
                    let now = now();
                    let user = User {
                        id: new_id(),
                        company_id: company_id.to_string(),
                        name: row.name.clone(),
                        email: row.email.clone(),
                        role: row.role,
                        store_ids: row.store_ids.clone(),
                        active: row.active,
                        privacy_consent: false,
                        marketing_consent: false,
                        created_at: now.clone(),
                        updated_at: now,
                        version: 1,
                    };
                    insert_user(&mut tx, &user).await.map(|_| true)
                }
            };

            match result {
                Ok(true) => {
                    report.created += 1;
                    changed = true;
                }
                Ok(false) => {
                    report.updated += 1;
                    changed = true;
                }
                Err(AppError::Validation(message)) => report.errors.push(ImportError {
                    row: row.row,
                    message,
                }),
                Err(err) => return Err(err),
            }
        }

        if changed {
            bump_revision(&mut tx).await?;
        }
        tx.commit().await?;

        report.errors.sort_by_key(|e| e.row);
        tracing::info!(
            company_id,
            created = report.created,
            updated = report.updated,
            errors = report.errors.len(),
            "User import applied"
        );
        Ok(report)
    }
}
