//! Company (tenant) model with branding and DNS prefix.

use serde::{Deserialize, Serialize};

use super::User;

/// A branded customer organization resolved by its DNS prefix.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Company {
    pub id: String,
    pub name: String,
    pub dns_prefix: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub primary_color: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub secondary_color: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub logo_url: Option<String>,
    pub active: bool,
    pub created_at: String,
    pub updated_at: String,
    /// Internal version for optimistic concurrency control
    #[serde(default)]
    pub version: i64,
}

/// The first administrator created together with a company.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InitialAdmin {
    pub name: String,
    pub email: String,
}

/// Request body for creating a company.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateCompanyRequest {
    pub name: String,
    pub dns_prefix: String,
    #[serde(default)]
    pub primary_color: Option<String>,
    #[serde(default)]
    pub secondary_color: Option<String>,
    #[serde(default)]
    pub logo_url: Option<String>,
    pub admin: InitialAdmin,
}

/// Request body for updating a company.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateCompanyRequest {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub primary_color: Option<String>,
    #[serde(default)]
    pub secondary_color: Option<String>,
    #[serde(default)]
    pub logo_url: Option<String>,
    #[serde(default)]
    pub active: Option<bool>,
    #[serde(default)]
    pub expected_version: Option<i64>,
}

/// Response of company creation.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CreatedCompany {
    pub company: Company,
    pub admin: User,
}

/// Branding subset exposed to any tenant user.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Branding {
    pub name: String,
    pub dns_prefix: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub primary_color: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub secondary_color: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub logo_url: Option<String>,
}

impl From<&Company> for Branding {
    fn from(company: &Company) -> Self {
        Self {
            name: company.name.clone(),
            dns_prefix: company.dns_prefix.clone(),
            primary_color: company.primary_color.clone(),
            secondary_color: company.secondary_color.clone(),
            logo_url: company.logo_url.clone(),
        }
    }
}

/// Check a DNS label: 1-63 chars of `[a-z0-9-]`, no leading or trailing hyphen.
pub fn is_valid_dns_prefix(prefix: &str) -> bool {
    !prefix.is_empty()
        && prefix.len() <= 63
        && !prefix.starts_with('-')
        && !prefix.ends_with('-')
        && prefix
            .bytes()
            .all(|b| b.is_ascii_lowercase() || b.is_ascii_digit() || b == b'-')
}

/// Check a `#rgb` or `#rrggbb` color.
pub fn is_valid_hex_color(color: &str) -> bool {
    match color.strip_prefix('#') {
        Some(hex) => (hex.len() == 3 || hex.len() == 6) && hex.bytes().all(|b| b.is_ascii_hexdigit()),
        None => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dns_prefix_rules() {
        assert!(is_valid_dns_prefix("acme"));
        assert!(is_valid_dns_prefix("acme-foods-2"));
        assert!(!is_valid_dns_prefix(""));
        assert!(!is_valid_dns_prefix("-acme"));
        assert!(!is_valid_dns_prefix("acme-"));
        assert!(!is_valid_dns_prefix("Acme"));
        assert!(!is_valid_dns_prefix("acme.foods"));
        assert!(!is_valid_dns_prefix(&"a".repeat(64)));
    }

    #[test]
    fn test_hex_color_rules() {
        assert!(is_valid_hex_color("#fff"));
        assert!(is_valid_hex_color("#1A2b3C"));
        assert!(!is_valid_hex_color("fff"));
        assert!(!is_valid_hex_color("#ffff"));
        assert!(!is_valid_hex_color("#ggg"));
    }
}
