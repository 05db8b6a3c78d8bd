//! Tenant resolution and the acting user.
//!
//! A request belongs to the company named by the `x-company` header, or by
//! the first label of its `Host` (`acme.portal.example.com` → `acme`), or
//! by the configured default company. The acting user is named by
//! `x-user-id` and must be an active member of that company.

use axum::{
    extract::FromRequestParts,
    http::{header, request::Parts, HeaderMap},
};

use crate::errors::AppError;
use crate::models::{Company, User};
use crate::AppState;

pub const COMPANY_HEADER: &str = "x-company";
pub const USER_HEADER: &str = "x-user-id";

/// The company a request is addressed to.
pub struct Tenant(pub Company);

/// The company plus the active user acting within it.
pub struct Caller {
    pub company: Company,
    pub user: User,
}

impl Caller {
    pub fn require_admin(&self) -> Result<(), AppError> {
        if self.user.is_admin() {
            Ok(())
        } else {
            Err(AppError::Forbidden(
                "This operation requires the admin role".to_string(),
            ))
        }
    }

    pub fn require_store_access(&self, store_id: &str) -> Result<(), AppError> {
        if self.user.can_access_store(store_id) {
            Ok(())
        } else {
            Err(AppError::Forbidden(format!(
                "No access to store {}",
                store_id
            )))
        }
    }
}

impl FromRequestParts<AppState> for Tenant {
    type Rejection = AppError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let prefix = company_prefix(&parts.headers, state.config.default_company.as_deref())
            .ok_or_else(|| {
                AppError::BadRequest(format!(
                    "Cannot determine company: send {} or use a company subdomain",
                    COMPANY_HEADER
                ))
            })?;

        let company = state
            .repo
            .get_company_by_prefix(&prefix)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Company {} not found", prefix)))?;

        if !company.active {
            return Err(AppError::Forbidden(format!(
                "Company {} is deactivated",
                company.dns_prefix
            )));
        }

        Ok(Tenant(company))
    }
}

impl FromRequestParts<AppState> for Caller {
    type Rejection = AppError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let Tenant(company) = Tenant::from_request_parts(parts, state).await?;

        let user_id = parts
            .headers
            .get(USER_HEADER)
            .and_then(|v| v.to_str().ok())
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .ok_or_else(|| AppError::Unauthorized(format!("Missing {} header", USER_HEADER)))?;

        let user = state
            .repo
            .get_user(&company.id, user_id)
            .await?
            .ok_or_else(|| AppError::Unauthorized(format!("Unknown user {}", user_id)))?;

        if !user.active {
            return Err(AppError::Forbidden(format!(
                "User {} is not activated",
                user.email
            )));
        }

        Ok(Caller { company, user })
    }
}

/// DNS prefix of the addressed company, lowercased.
pub fn company_prefix(headers: &HeaderMap, default: Option<&str>) -> Option<String> {
    let explicit = headers
        .get(COMPANY_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|s| !s.is_empty());

    explicit
        .map(str::to_string)
        .or_else(|| {
            headers
                .get(header::HOST)
                .and_then(|v| v.to_str().ok())
                .and_then(host_prefix)
        })
        .or_else(|| default.map(str::to_string))
        .map(|s| s.to_ascii_lowercase())
}

/// First label of a host with at least three labels, port ignored.
fn host_prefix(host: &str) -> Option<String> {
    let host = host.split(':').next()?;
    if host.parse::<std::net::Ipv4Addr>().is_ok() {
        return None;
    }
    let labels: Vec<&str> = host.split('.').collect();
    if labels.len() < 3 || labels.iter().any(|l| l.is_empty()) {
        return None;
    }
    labels.first().map(|l| l.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    fn headers(pairs: &[(&'static str, &'static str)]) -> HeaderMap {
        let mut map = HeaderMap::new();
        for (name, value) in pairs {
            map.insert(*name, HeaderValue::from_static(value));
        }
        map
    }

    #[test]
    fn test_explicit_header_wins() {
        let h = headers(&[("x-company", "Acme"), ("host", "other.portal.example.com")]);
        assert_eq!(company_prefix(&h, Some("fallback")).as_deref(), Some("acme"));
    }

    #[test]
    fn test_host_subdomain() {
        let h = headers(&[("host", "globex.portal.example.com:8443")]);
        assert_eq!(company_prefix(&h, None).as_deref(), Some("globex"));
    }

    #[test]
    fn test_bare_hosts_fall_back_to_default() {
        for host in ["localhost:8080", "example.com", "127.0.0.1:8080"] {
            let mut h = HeaderMap::new();
            h.insert(header::HOST, HeaderValue::from_str(host).unwrap());
            assert_eq!(company_prefix(&h, Some("demo")).as_deref(), Some("demo"));
            assert_eq!(company_prefix(&h, None), None);
        }
    }

    #[test]
    fn test_blank_header_ignored() {
        let h = headers(&[("x-company", "  ")]);
        assert_eq!(company_prefix(&h, Some("demo")).as_deref(), Some("demo"));
    }
}
