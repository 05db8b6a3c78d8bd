//! User persistence.

use sqlx::{sqlite::SqliteRow, QueryBuilder, Row, Sqlite, SqliteConnection};

use super::repository::{
    check_version, concurrent_modification, from_json, new_id, now, to_json, unique_violation,
};
use super::Repository;
use crate::errors::AppError;
use crate::models::{CreateUserRequest, PageQuery, Role, UpdateUserRequest, User, UserFilter};

const USER_COLUMNS: &str = "id, company_id, name, email, role, store_ids, active, privacy_consent, marketing_consent, created_at, updated_at, version";

impl Repository {
    /// List users of a company, one page at a time.
    pub async fn list_users(
        &self,
        company_id: &str,
        filter: &UserFilter,
        page: PageQuery,
    ) -> Result<(Vec<User>, i64), AppError> {
        let mut count = QueryBuilder::<Sqlite>::new("SELECT COUNT(*) AS total FROM users");
        push_user_filter(&mut count, company_id, filter);
        let total: i64 = count.build().fetch_one(&self.pool).await?.get("total");

        let mut select = QueryBuilder::<Sqlite>::new(format!("SELECT {} FROM users", USER_COLUMNS));
        push_user_filter(&mut select, company_id, filter);
        select
            .push(" ORDER BY name, email LIMIT ")
            .push_bind(page.per_page())
            .push(" OFFSET ")
            .push_bind(page.offset());
        let rows = select.build().fetch_all(&self.pool).await?;

        let users = rows.iter().map(user_from_row).collect::<Result<_, _>>()?;
        Ok((users, total))
    }

    /// All users of a company, for export.
    pub async fn all_users(&self, company_id: &str) -> Result<Vec<User>, AppError> {
        let rows = sqlx::query(&format!(
            "SELECT {} FROM users WHERE company_id = ? ORDER BY name, email",
            USER_COLUMNS
        ))
        .bind(company_id)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(user_from_row).collect()
    }

    /// Get a user of a company by ID.
    pub async fn get_user(&self, company_id: &str, id: &str) -> Result<Option<User>, AppError> {
        let row = sqlx::query(&format!(
            "SELECT {} FROM users WHERE company_id = ? AND id = ?",
            USER_COLUMNS
        ))
        .bind(company_id)
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(user_from_row).transpose()
    }

    /// Get a user of a company by email (case-insensitive).
    pub async fn get_user_by_email(
        &self,
        company_id: &str,
        email: &str,
    ) -> Result<Option<User>, AppError> {
        let row = sqlx::query(&format!(
            "SELECT {} FROM users WHERE company_id = ? AND email_key = ?",
            USER_COLUMNS
        ))
        .bind(company_id)
        .bind(email_key(email))
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(user_from_row).transpose()
    }

    /// Register a new user.
    pub async fn create_user(
        &self,
        company_id: &str,
        request: &CreateUserRequest,
    ) -> Result<User, AppError> {
        let now = now();
        let user = User {
            id: new_id(),
            company_id: company_id.to_string(),
            name: request.name.trim().to_string(),
            email: request.email.trim().to_string(),
            role: request.role,
            store_ids: request.store_ids.clone(),
            active: request.active,
            privacy_consent: request.privacy_consent,
            marketing_consent: request.marketing_consent,
            created_at: now.clone(),
            updated_at: now,
            version: 1,
        };

        let mut conn = self.pool.acquire().await?;
        insert_user(&mut conn, &user).await?;
        drop(conn);

        self.increment_revision().await?;
        Ok(user)
    }

    /// Modify a user with optimistic concurrency control.
    pub async fn update_user(
        &self,
        company_id: &str,
        id: &str,
        request: &UpdateUserRequest,
    ) -> Result<User, AppError> {
        let existing = self
            .get_user(company_id, id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("User {} not found", id)))?;

        check_version("user", id, request.expected_version, existing.version)?;

        let updated = apply_user_update(existing.clone(), request);

        let mut conn = self.pool.acquire().await?;
        let written = write_user(&mut conn, &updated, existing.version).await?;
        drop(conn);

        if !written {
            let current = self.get_user(company_id, id).await?;
            return Err(concurrent_modification(
                "user",
                id,
                current.map(|u| u.version).unwrap_or(0),
            ));
        }

        self.increment_revision().await?;
        Ok(updated)
    }
}

/// Merge a partial update into a user, bumping version and timestamp.
pub(super) fn apply_user_update(existing: User, request: &UpdateUserRequest) -> User {
    User {
        name: request
            .name
            .as_ref()
            .map(|n| n.trim().to_string())
            .unwrap_or(existing.name.clone()),
        email: request
            .email
            .as_ref()
            .map(|e| e.trim().to_string())
            .unwrap_or(existing.email.clone()),
        role: request.role.unwrap_or(existing.role),
        store_ids: request
            .store_ids
            .clone()
            .unwrap_or(existing.store_ids.clone()),
        active: request.active.unwrap_or(existing.active),
        privacy_consent: request.privacy_consent.unwrap_or(existing.privacy_consent),
        marketing_consent: request
            .marketing_consent
            .unwrap_or(existing.marketing_consent),
        updated_at: now(),
        version: existing.version + 1,
        ..existing
    }
}

pub(super) async fn fetch_user_by_email(
    conn: &mut SqliteConnection,
    company_id: &str,
    email: &str,
) -> Result<Option<User>, AppError> {
    let row = sqlx::query(&format!(
        "SELECT {} FROM users WHERE company_id = ? AND email_key = ?",
        USER_COLUMNS
    ))
    .bind(company_id)
    .bind(email_key(email))
    .fetch_optional(conn)
    .await?;

    row.as_ref().map(user_from_row).transpose()
}

pub(super) async fn insert_user(conn: &mut SqliteConnection, user: &User) -> Result<(), AppError> {
    sqlx::query(
        "INSERT INTO users (id, company_id, name, email, email_key, role, store_ids, active, privacy_consent, marketing_consent, created_at, updated_at, version) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)"
    )
    .bind(&user.id)
    .bind(&user.company_id)
    .bind(&user.name)
    .bind(&user.email)
    .bind(email_key(&user.email))
    .bind(user.role.as_str())
    .bind(to_json(&user.store_ids)?)
    .bind(user.active as i32)
    .bind(user.privacy_consent as i32)
    .bind(user.marketing_consent as i32)
    .bind(&user.created_at)
    .bind(&user.updated_at)
    .bind(user.version)
    .execute(conn)
    .await
    .map_err(|e| unique_violation(e, format!("Email {} is already registered", user.email)))?;
    Ok(())
}

/// Conditionally write `user` over the row at `previous_version`.
///
/// Returns `false` when the row moved on in the meantime.
pub(super) async fn write_user(
    conn: &mut SqliteConnection,
    user: &User,
    previous_version: i64,
) -> Result<bool, AppError> {
    let result = sqlx::query(
        "UPDATE users SET name = ?, email = ?, email_key = ?, role = ?, store_ids = ?, active = ?, privacy_consent = ?, marketing_consent = ?, updated_at = ?, version = ? WHERE company_id = ? AND id = ? AND version = ?"
    )
    .bind(&user.name)
    .bind(&user.email)
    .bind(email_key(&user.email))
    .bind(user.role.as_str())
    .bind(to_json(&user.store_ids)?)
    .bind(user.active as i32)
    .bind(user.privacy_consent as i32)
    .bind(user.marketing_consent as i32)
    .bind(&user.updated_at)
    .bind(user.version)
    .bind(&user.company_id)
    .bind(&user.id)
    .bind(previous_version)
    .execute(conn)
    .await
    .map_err(|e| unique_violation(e, format!("Email {} is already registered", user.email)))?;

    Ok(result.rows_affected() > 0)
}

fn push_user_filter(builder: &mut QueryBuilder<'_, Sqlite>, company_id: &str, filter: &UserFilter) {
    builder
        .push(" WHERE company_id = ")
        .push_bind(company_id.to_string());
    if let Some(role) = filter.role {
        builder.push(" AND role = ").push_bind(role.as_str());
    }
    if let Some(active) = filter.active {
        builder.push(" AND active = ").push_bind(active as i32);
    }
    if let Some(store_id) = &filter.store_id {
        builder
            .push(" AND EXISTS (SELECT 1 FROM json_each(users.store_ids) WHERE json_each.value = ")
            .push_bind(store_id.clone())
            .push(")");
    }
}

pub(super) fn email_key(email: &str) -> String {
    email.trim().to_lowercase()
}

pub(super) fn user_from_row(row: &SqliteRow) -> Result<User, AppError> {
    let role: String = row.get("role");
    let store_ids: String = row.get("store_ids");
    let active: i32 = row.get("active");
    let privacy_consent: i32 = row.get("privacy_consent");
    let marketing_consent: i32 = row.get("marketing_consent");

    Ok(User {
        id: row.get("id"),
        company_id: row.get("company_id"),
        name: row.get("name"),
        email: row.get("email"),
        role: Role::parse(&role)
            .ok_or_else(|| AppError::Internal(format!("Unknown role {:?} in database", role)))?,
        store_ids: from_json("store_ids", &store_ids)?,
        active: active != 0,
        privacy_consent: privacy_consent != 0,
        marketing_consent: marketing_consent != 0,
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
        version: row.get("version"),
    })
}
