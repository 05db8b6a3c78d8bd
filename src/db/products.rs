//! Product catalog persistence.

use sqlx::{sqlite::SqliteRow, QueryBuilder, Row, Sqlite, SqliteConnection};

use super::repository::{
    check_version, concurrent_modification, from_json, new_id, now, to_json, unique_violation,
};
use super::Repository;
use crate::errors::AppError;
use crate::models::{
    CreateProductRequest, PageQuery, Product, ProductFilter, UpdateProductRequest,
};

const PRODUCT_COLUMNS: &str = "id, company_id, sku, name, description, category, price_cents, stock, image_urls, active, updated_at, version";

impl Repository {
    /// List products of a company, one page at a time.
    pub async fn list_products(
        &self,
        company_id: &str,
        filter: &ProductFilter,
        page: PageQuery,
    ) -> Result<(Vec<Product>, i64), AppError> {
        let mut count = QueryBuilder::<Sqlite>::new("SELECT COUNT(*) AS total FROM products");
        push_product_filter(&mut count, company_id, filter);
        let total: i64 = count.build().fetch_one(&self.pool).await?.get("total");

        let mut select =
            QueryBuilder::<Sqlite>::new(format!("SELECT {} FROM products", PRODUCT_COLUMNS));
        push_product_filter(&mut select, company_id, filter);
        select
            .push(" ORDER BY name, sku LIMIT ")
            .push_bind(page.per_page())
            .push(" OFFSET ")
            .push_bind(page.offset());
        let rows = select.build().fetch_all(&self.pool).await?;

        let products = rows.iter().map(product_from_row).collect::<Result<_, _>>()?;
        Ok((products, total))
    }

    /// All products of a company, for export.
    pub async fn all_products(&self, company_id: &str) -> Result<Vec<Product>, AppError> {
        let rows = sqlx::query(&format!(
            "SELECT {} FROM products WHERE company_id = ? ORDER BY name, sku",
            PRODUCT_COLUMNS
        ))
        .bind(company_id)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(product_from_row).collect()
    }

    /// Every product of every company, for rebuilding the search index.
    pub async fn all_products_for_index(&self) -> Result<Vec<Product>, AppError> {
        let rows = sqlx::query(&format!("SELECT {} FROM products", PRODUCT_COLUMNS))
            .fetch_all(&self.pool)
            .await?;

        rows.iter().map(product_from_row).collect()
    }

    /// Get a product of a company by ID.
    pub async fn get_product(
        &self,
        company_id: &str,
        id: &str,
    ) -> Result<Option<Product>, AppError> {
        let mut conn = self.pool.acquire().await?;
        fetch_product(&mut conn, company_id, id).await
    }

    /// Create a catalog product.
    pub async fn create_product(
        &self,
        company_id: &str,
        request: &CreateProductRequest,
    ) -> Result<Product, AppError> {
        let product = Product {
            id: new_id(),
            company_id: company_id.to_string(),
            sku: request.sku.trim().to_string(),
            name: request.name.trim().to_string(),
            description: request.description.clone(),
            category: request.category.clone(),
            price_cents: request.price_cents,
            stock: request.stock,
            image_urls: request.image_urls.clone(),
            active: request.active,
            updated_at: now(),
            version: 1,
        };

        let mut conn = self.pool.acquire().await?;
        insert_product(&mut conn, &product).await?;
        drop(conn);

        self.increment_revision().await?;
        Ok(product)
    }

    /// Update a product with optimistic concurrency control.
    pub async fn update_product(
        &self,
        company_id: &str,
        id: &str,
        request: &UpdateProductRequest,
    ) -> Result<Product, AppError> {
        let existing = self
            .get_product(company_id, id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Product {} not found", id)))?;

        check_version("product", id, request.expected_version, existing.version)?;

        let updated = Product {
            sku: request
                .sku
                .as_ref()
                .map(|s| s.trim().to_string())
                .unwrap_or(existing.sku.clone()),
            name: request
                .name
                .as_ref()
                .map(|n| n.trim().to_string())
                .unwrap_or(existing.name.clone()),
            description: request.description.clone().or(existing.description.clone()),
            category: request.category.clone().or(existing.category.clone()),
            price_cents: request.price_cents.unwrap_or(existing.price_cents),
            stock: request.stock.unwrap_or(existing.stock),
            image_urls: request
                .image_urls
                .clone()
                .unwrap_or(existing.image_urls.clone()),
            active: request.active.unwrap_or(existing.active),
            updated_at: now(),
            version: existing.version + 1,
            ..existing.clone()
        };

        let mut conn = self.pool.acquire().await?;
        let written = write_product(&mut conn, &updated, existing.version).await?;
        drop(conn);

        if !written {
            let current = self.get_product(company_id, id).await?;
            return Err(concurrent_modification(
                "product",
                id,
                current.map(|p| p.version).unwrap_or(0),
            ));
        }

        self.increment_revision().await?;
        Ok(updated)
    }
}

pub(super) async fn fetch_product(
    conn: &mut SqliteConnection,
    company_id: &str,
    id: &str,
) -> Result<Option<Product>, AppError> {
    let row = sqlx::query(&format!(
        "SELECT {} FROM products WHERE company_id = ? AND id = ?",
        PRODUCT_COLUMNS
    ))
    .bind(company_id)
    .bind(id)
    .fetch_optional(conn)
    .await?;

    row.as_ref().map(product_from_row).transpose()
}

pub(super) async fn fetch_product_by_sku(
    conn: &mut SqliteConnection,
    company_id: &str,
    sku: &str,
) -> Result<Option<Product>, AppError> {
    let row = sqlx::query(&format!(
        "SELECT {} FROM products WHERE company_id = ? AND sku = ?",
        PRODUCT_COLUMNS
    ))
    .bind(company_id)
    .bind(sku)
    .fetch_optional(conn)
    .await?;

    row.as_ref().map(product_from_row).transpose()
}

pub(super) async fn insert_product(
    conn: &mut SqliteConnection,
    product: &Product,
) -> Result<(), AppError> {
    sqlx::query(
        "INSERT INTO products (id, company_id, sku, name, description, category, price_cents, stock, image_urls, active, updated_at, version) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)"
    )
    .bind(&product.id)
    .bind(&product.company_id)
    .bind(&product.sku)
    .bind(&product.name)
    .bind(&product.description)
    .bind(&product.category)
    .bind(product.price_cents)
    .bind(product.stock)
    .bind(to_json(&product.image_urls)?)
    .bind(product.active as i32)
    .bind(&product.updated_at)
    .bind(product.version)
    .execute(conn)
    .await
    .map_err(|e| unique_violation(e, format!("SKU {} already exists", product.sku)))?;
    Ok(())
}

/// Conditionally write `product` over the row at `previous_version`.
pub(super) async fn write_product(
    conn: &mut SqliteConnection,
    product: &Product,
    previous_version: i64,
) -> Result<bool, AppError> {
    let result = sqlx::query(
        "UPDATE products SET sku = ?, name = ?, description = ?, category = ?, price_cents = ?, stock = ?, image_urls = ?, active = ?, updated_at = ?, version = ? WHERE company_id = ? AND id = ? AND version = ?"
    )
    .bind(&product.sku)
    .bind(&product.name)
    .bind(&product.description)
    .bind(&product.category)
    .bind(product.price_cents)
    .bind(product.stock)
    .bind(to_json(&product.image_urls)?)
    .bind(product.active as i32)
    .bind(&product.updated_at)
    .bind(product.version)
    .bind(&product.company_id)
    .bind(&product.id)
    .bind(previous_version)
    .execute(conn)
    .await
    .map_err(|e| unique_violation(e, format!("SKU {} already exists", product.sku)))?;

    Ok(result.rows_affected() > 0)
}

/// Move stock by `delta`, refusing to go below zero.
///
/// Returns `false` when the product is missing or lacks the units.
pub(super) async fn shift_stock(
    conn: &mut SqliteConnection,
    company_id: &str,
    product_id: &str,
    delta: i64,
) -> Result<bool, AppError> {
    let result = sqlx::query(
        "UPDATE products SET stock = stock + ?, updated_at = ?, version = version + 1 WHERE company_id = ? AND id = ? AND stock + ? >= 0"
    )
    .bind(delta)
    .bind(now())
    .bind(company_id)
    .bind(product_id)
    .bind(delta)
    .execute(conn)
    .await?;

    Ok(result.rows_affected() > 0)
}

fn push_product_filter(
    builder: &mut QueryBuilder<'_, Sqlite>,
    company_id: &str,
    filter: &ProductFilter,
) {
    builder
        .push(" WHERE company_id = ")
        .push_bind(company_id.to_string());
    if let Some(category) = &filter.category {
        builder.push(" AND category = ").push_bind(category.clone());
    }
    if let Some(active) = filter.active {
        builder.push(" AND active = ").push_bind(active as i32);
    }
    match filter.in_stock {
        Some(true) => {
            builder.push(" AND stock > 0");
        }
        Some(false) => {
            builder.push(" AND stock <= 0");
        }
        None => {}
    }
}

pub(super) fn product_from_row(row: &SqliteRow) -> Result<Product, AppError> {
    let image_urls: String = row.get("image_urls");
    let active: i32 = row.get("active");

    Ok(Product {
        id: row.get("id"),
        company_id: row.get("company_id"),
        sku: row.get("sku"),
        name: row.get("name"),
        description: row.get("description"),
        category: row.get("category"),
        price_cents: row.get("price_cents"),
        stock: row.get("stock"),
        image_urls: from_json("image_urls", &image_urls)?,
        active: active != 0,
        updated_at: row.get("updated_at"),
        version: row.get("version"),
    })
}
