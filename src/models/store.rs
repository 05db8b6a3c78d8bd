//! Store model: an account location with its own monthly budget.

use serde::{Deserialize, Serialize};

/// A store under a company.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Store {
    pub id: String,
    pub company_id: String,
    pub name: String,
    pub code: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub address: Option<String>,
    /// Monthly spend cap in cents; absent means unlimited
    pub monthly_expense_limit_cents: Option<i64>,
    /// Monthly order count cap; absent means unlimited
    pub monthly_order_limit: Option<i64>,
    pub requires_approval: bool,
    pub active: bool,
    pub updated_at: String,
    #[serde(default)]
    pub version: i64,
}

/// Request body for creating a store.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateStoreRequest {
    pub name: String,
    pub code: String,
    #[serde(default)]
    pub address: Option<String>,
    #[serde(default)]
    pub monthly_expense_limit_cents: Option<i64>,
    #[serde(default)]
    pub monthly_order_limit: Option<i64>,
    #[serde(default)]
    pub requires_approval: bool,
}

/// Request body for updating a store.
///
/// Limits use a nested `Option` so that `null` clears a limit while an
/// absent field keeps it.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateStoreRequest {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub code: Option<String>,
    #[serde(default)]
    pub address: Option<String>,
    #[serde(default, deserialize_with = "double_option")]
    pub monthly_expense_limit_cents: Option<Option<i64>>,
    #[serde(default, deserialize_with = "double_option")]
    pub monthly_order_limit: Option<Option<i64>>,
    #[serde(default)]
    pub requires_approval: Option<bool>,
    #[serde(default)]
    pub active: Option<bool>,
    #[serde(default)]
    pub expected_version: Option<i64>,
}

fn double_option<'de, D, T>(deserializer: D) -> Result<Option<Option<T>>, D::Error>
where
    D: serde::Deserializer<'de>,
    T: Deserialize<'de>,
{
    Option::<T>::deserialize(deserializer).map(Some)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_update_distinguishes_null_from_absent() {
        let absent: UpdateStoreRequest = serde_json::from_str(r#"{"name": "North"}"#).unwrap();
        assert!(absent.monthly_expense_limit_cents.is_none());

        let cleared: UpdateStoreRequest =
            serde_json::from_str(r#"{"monthlyExpenseLimitCents": null}"#).unwrap();
        assert_eq!(cleared.monthly_expense_limit_cents, Some(None));

        let set: UpdateStoreRequest =
            serde_json::from_str(r#"{"monthlyOrderLimit": 12}"#).unwrap();
        assert_eq!(set.monthly_order_limit, Some(Some(12)));
    }
}
