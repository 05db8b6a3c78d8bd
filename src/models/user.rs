//! Portal user model.

use serde::{Deserialize, Serialize};

/// Role of a portal user within their company.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Admin,
    Approver,
    Buyer,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Admin => "admin",
            Role::Approver => "approver",
            Role::Buyer => "buyer",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "admin" => Some(Role::Admin),
            "approver" => Some(Role::Approver),
            "buyer" => Some(Role::Buyer),
            _ => None,
        }
    }
}

/// A user of the ordering portal.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct User {
    pub id: String,
    pub company_id: String,
    pub name: String,
    pub email: String,
    pub role: Role,
    pub store_ids: Vec<String>,
    /// Activation flag; inactive users cannot act
    pub active: bool,
    pub privacy_consent: bool,
    pub marketing_consent: bool,
    pub created_at: String,
    pub updated_at: String,
    #[serde(default)]
    pub version: i64,
}

impl User {
    pub fn is_admin(&self) -> bool {
        self.role == Role::Admin
    }

    /// Admins reach every store of their company, others only assigned ones.
    pub fn can_access_store(&self, store_id: &str) -> bool {
        self.is_admin() || self.store_ids.iter().any(|s| s == store_id)
    }

    pub fn can_decide_orders(&self) -> bool {
        matches!(self.role, Role::Admin | Role::Approver)
    }
}

/// Request body for registering a user.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateUserRequest {
    pub name: String,
    pub email: String,
    pub role: Role,
    #[serde(default)]
    pub store_ids: Vec<String>,
    #[serde(default = "default_active")]
    pub active: bool,
    #[serde(default)]
    pub privacy_consent: bool,
    #[serde(default)]
    pub marketing_consent: bool,
}

fn default_active() -> bool {
    true
}

/// Request body for modifying a user.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateUserRequest {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub role: Option<Role>,
    #[serde(default)]
    pub store_ids: Option<Vec<String>>,
    #[serde(default)]
    pub active: Option<bool>,
    #[serde(default)]
    pub privacy_consent: Option<bool>,
    #[serde(default)]
    pub marketing_consent: Option<bool>,
    #[serde(default)]
    pub expected_version: Option<i64>,
}

impl UpdateUserRequest {
    /// Whether the request only touches fields a user may change on their own record.
    pub fn is_self_service(&self) -> bool {
        self.email.is_none()
            && self.role.is_none()
            && self.store_ids.is_none()
            && self.active.is_none()
    }
}

/// Request body for the activation switch.
#[derive(Debug, Clone, Deserialize)]
pub struct ActivationRequest {
    pub active: bool,
}

/// Query filters for the user list.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserFilter {
    #[serde(default)]
    pub role: Option<Role>,
    #[serde(default)]
    pub active: Option<bool>,
    #[serde(default)]
    pub store_id: Option<String>,
}

/// Loose email check: something before and after a single `@`.
pub fn is_valid_email(email: &str) -> bool {
    let email = email.trim();
    match email.split_once('@') {
        Some((local, domain)) => {
            !local.is_empty() && !domain.is_empty() && !domain.contains('@') && !email.contains(' ')
        }
        None => false,
    }
}
