//! CSV export and import of orders, users and products.

use std::collections::{HashMap, HashSet};

use serde::{Deserialize, Serialize};

use crate::errors::AppError;
use crate::models::{is_valid_email, Order, Product, Role, Store, User};

pub const PRODUCT_HEADERS: [&str; 7] = [
    "sku",
    "name",
    "description",
    "category",
    "price_cents",
    "stock",
    "active",
];

pub const USER_HEADERS: [&str; 5] = ["name", "email", "role", "store_codes", "active"];

/// Outcome of an import.
#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ImportReport {
    pub created: usize,
    pub updated: usize,
    pub errors: Vec<ImportError>,
}

/// A refused import row. Rows are numbered from 1, header excluded.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct ImportError {
    pub row: usize,
    pub message: String,
}

/// A validated product row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProductRow {
    pub row: usize,
    pub sku: String,
    pub name: String,
    pub description: Option<String>,
    pub category: Option<String>,
    pub price_cents: i64,
    pub stock: i64,
    pub active: bool,
}

/// A validated user row with store codes already resolved to ids.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserRow {
    pub row: usize,
    pub name: String,
    pub email: String,
    pub role: Role,
    pub store_ids: Vec<String>,
    pub active: bool,
}

#[derive(Debug, Deserialize)]
struct ProductRecord {
    sku: String,
    name: String,
    #[serde(default)]
    description: Option<String>,
    #[serde(default)]
    category: Option<String>,
    price_cents: i64,
    stock: i64,
    #[serde(default)]
    active: Option<String>,
}

#[derive(Debug, Deserialize)]
struct UserRecord {
    name: String,
    email: String,
    role: String,
    #[serde(default)]
    store_codes: Option<String>,
    #[serde(default)]
    active: Option<String>,
}

/// Render cents as a decimal amount, e.g. `1205` → `12.05`.
pub fn format_cents(cents: i64) -> String {
    let sign = if cents < 0 { "-" } else { "" };
    let abs = cents.unsigned_abs();
    format!("{}{}.{:02}", sign, abs / 100, abs % 100)
}

/// One row per order line.
pub fn orders_csv(orders: &[Order], stores: &[Store]) -> Result<String, AppError> {
    let codes: HashMap<&str, &str> = stores
        .iter()
        .map(|s| (s.id.as_str(), s.code.as_str()))
        .collect();

    let mut writer = csv::Writer::from_writer(Vec::new());
    writer.write_record([
        "order_number",
        "created_at",
        "store_code",
        "status",
        "sku",
        "product",
        "quantity",
        "unit_price",
        "line_total",
        "order_total",
        "note",
    ])?;

    for order in orders {
        let store_code = codes.get(order.store_id.as_str()).copied().unwrap_or("");
        for item in &order.items {
            writer.write_record([
                order.number.as_str(),
                order.created_at.as_str(),
                store_code,
                order.status.as_str(),
                item.sku.as_str(),
                item.name.as_str(),
                &item.quantity.to_string(),
                &format_cents(item.unit_price_cents),
                &format_cents(item.line_total_cents),
                &format_cents(order.total_cents),
                order.note.as_deref().unwrap_or(""),
            ])?;
        }
    }

    finish(writer)
}

pub fn users_csv(users: &[User], stores: &[Store]) -> Result<String, AppError> {
    let codes: HashMap<&str, &str> = stores
        .iter()
        .map(|s| (s.id.as_str(), s.code.as_str()))
        .collect();

    let mut writer = csv::Writer::from_writer(Vec::new());
    writer.write_record([
        "name",
        "email",
        "role",
        "store_codes",
        "active",
        "privacy_consent",
        "marketing_consent",
        "created_at",
    ])?;

    for user in users {
        let store_codes: Vec<&str> = user
            .store_ids
            .iter()
            .filter_map(|id| codes.get(id.as_str()).copied())
            .collect();
        writer.write_record([
            user.name.as_str(),
            user.email.as_str(),
            user.role.as_str(),
            &store_codes.join(";"),
            bool_cell(user.active),
            bool_cell(user.privacy_consent),
            bool_cell(user.marketing_consent),
            user.created_at.as_str(),
        ])?;
    }

    finish(writer)
}

/// Same columns as the product import, so an export can be edited and re-imported.
pub fn products_csv(products: &[Product]) -> Result<String, AppError> {
    let mut writer = csv::Writer::from_writer(Vec::new());
    writer.write_record(PRODUCT_HEADERS)?;

    for product in products {
        writer.write_record([
            product.sku.as_str(),
            product.name.as_str(),
            product.description.as_deref().unwrap_or(""),
            product.category.as_deref().unwrap_or(""),
            &product.price_cents.to_string(),
            &product.stock.to_string(),
            bool_cell(product.active),
        ])?;
    }

    finish(writer)
}

/// Parse a product import. Invalid rows are reported, not fatal.
pub fn parse_products(body: &str) -> Result<(Vec<ProductRow>, Vec<ImportError>), AppError> {
    let mut reader = reader(body);
    require_headers(&mut reader, &["sku", "name", "price_cents", "stock"])?;

    let mut rows = Vec::new();
    let mut errors = Vec::new();
    let mut seen = HashSet::new();

    for (index, record) in reader.deserialize::<ProductRecord>().enumerate() {
        let row = index + 1;
        let record = match record {
            Ok(record) => record,
            Err(e) => {
                errors.push(row_error(row, e));
                continue;
            }
        };

        let problem = if record.sku.is_empty() {
            Some("sku is required".to_string())
        } else if record.name.is_empty() {
            Some("name is required".to_string())
        } else if record.price_cents < 0 {
            Some("price_cents must not be negative".to_string())
        } else if record.stock < 0 {
            Some("stock must not be negative".to_string())
        } else if !seen.insert(record.sku.clone()) {
            Some(format!("duplicate sku {}", record.sku))
        } else {
            None
        };
        let active = match parse_flag(record.active.as_deref()) {
            Ok(active) => active,
            Err(message) => {
                errors.push(ImportError { row, message });
                continue;
            }
        };

        match problem {
            Some(message) => errors.push(ImportError { row, message }),
            None => rows.push(ProductRow {
                row,
                sku: record.sku,
                name: record.name,
                description: record.description.filter(|s| !s.is_empty()),
                category: record.category.filter(|s| !s.is_empty()),
                price_cents: record.price_cents,
                stock: record.stock,
                active,
            }),
        }
    }

    Ok((rows, errors))
}

/// Parse a user import, resolving `;`-separated store codes against `stores`.
pub fn parse_users(
    body: &str,
    stores: &[Store],
) -> Result<(Vec<UserRow>, Vec<ImportError>), AppError> {
    let mut reader = reader(body);
    require_headers(&mut reader, &["name", "email", "role"])?;

    let by_code: HashMap<String, &str> = stores
        .iter()
        .map(|s| (s.code.to_lowercase(), s.id.as_str()))
        .collect();

    let mut rows = Vec::new();
    let mut errors = Vec::new();
    let mut seen = HashSet::new();

    for (index, record) in reader.deserialize::<UserRecord>().enumerate() {
        let row = index + 1;
        let record = match record {
            Ok(record) => record,
            Err(e) => {
                errors.push(row_error(row, e));
                continue;
            }
        };

        match validate_user_record(row, record, &by_code, &mut seen) {
            Ok(user) => rows.push(user),
            Err(message) => errors.push(ImportError { row, message }),
        }
    }

    Ok((rows, errors))
}

fn validate_user_record(
    row: usize,
    record: UserRecord,
    by_code: &HashMap<String, &str>,
    seen: &mut HashSet<String>,
) -> Result<UserRow, String> {
    if record.name.is_empty() {
        return Err("name is required".to_string());
    }
    if !is_valid_email(&record.email) {
        return Err(format!("invalid email {:?}", record.email));
    }
    let role = Role::parse(&record.role).ok_or_else(|| format!("unknown role {:?}", record.role))?;
    let active = parse_flag(record.active.as_deref())?;

    let mut store_ids = Vec::new();
    for code in record
        .store_codes
        .as_deref()
        .unwrap_or("")
        .split(';')
        .map(str::trim)
        .filter(|c| !c.is_empty())
    {
        let id = by_code
            .get(&code.to_lowercase())
            .ok_or_else(|| format!("unknown store code {}", code))?;
        if !store_ids.iter().any(|s: &String| s == id) {
            store_ids.push(id.to_string());
        }
    }

    if !seen.insert(record.email.to_lowercase()) {
        return Err(format!("duplicate email {}", record.email));
    }

    Ok(UserRow {
        row,
        name: record.name,
        email: record.email,
        role,
        store_ids,
        active,
    })
}

fn reader(body: &str) -> csv::Reader<&[u8]> {
    csv::ReaderBuilder::new()
        .trim(csv::Trim::All)
        .flexible(false)
        .from_reader(body.trim_start_matches('\u{feff}').as_bytes())
}

fn require_headers(reader: &mut csv::Reader<&[u8]>, required: &[&str]) -> Result<(), AppError> {
    let headers = reader.headers()?;
    let missing: Vec<&str> = required
        .iter()
        .copied()
        .filter(|h| !headers.iter().any(|present| present == *h))
        .collect();
    if missing.is_empty() {
        Ok(())
    } else {
        Err(AppError::Validation(format!(
            "Missing CSV columns: {}",
            missing.join(", ")
        )))
    }
}

/// Empty cells default to `true`.
fn parse_flag(raw: Option<&str>) -> Result<bool, String> {
    match raw.map(|s| s.trim().to_ascii_lowercase()).as_deref() {
        None | Some("") => Ok(true),
        Some("true" | "1" | "yes" | "y") => Ok(true),
        Some("false" | "0" | "no" | "n") => Ok(false),
        Some(other) => Err(format!("invalid boolean {:?}", other)),
    }
}

fn bool_cell(value: bool) -> &'static str {
    if value {
        "true"
    } else {
        "false"
    }
}

fn row_error(row: usize, err: csv::Error) -> ImportError {
    let message = match err.kind() {
        csv::ErrorKind::Deserialize { err, .. } => match err.field() {
            Some(field) => format!("column {}: {}", field + 1, err.kind()),
            None => err.kind().to_string(),
        },
        _ => err.to_string(),
    };
    ImportError { row, message }
}

fn finish(writer: csv::Writer<Vec<u8>>) -> Result<String, AppError> {
    let bytes = writer
        .into_inner()
        .map_err(|e| AppError::Internal(format!("Failed to flush CSV: {}", e)))?;
    String::from_utf8(bytes).map_err(|e| AppError::Internal(format!("CSV is not UTF-8: {}", e)))
}
