//! Per-request caller identity.
//!
//! Every API request carries `Authorization: Bearer <token>` (checked against
//! the configured API token) plus the identity asserted by the fronting
//! gateway in `X-Subject-Id` / `X-Subject-Role`. Nothing is cached between
//! requests.

use axum::extract::FromRequestParts;
use axum::http::header::AUTHORIZATION;
use axum::http::request::Parts;
use tracing::warn;
use ulid::Ulid;

use crate::http::{ApiError, AppState};

pub const SUBJECT_ID_HEADER: &str = "x-subject-id";
pub const SUBJECT_ROLE_HEADER: &str = "x-subject-role";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Client,
    Staff,
    Admin,
}

impl Role {
    pub fn parse(s: &str) -> Option<Role> {
        match s.trim().to_ascii_lowercase().as_str() {
            "client" => Some(Role::Client),
            "staff" => Some(Role::Staff),
            "admin" => Some(Role::Admin),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Subject {
    /// Client id for clients, staff ULID for staff, free-form for admins.
    pub id: String,
    pub role: Role,
}

impl Subject {
    pub fn new(id: impl Into<String>, role: Role) -> Self {
        Self { id: id.into(), role }
    }

    /// True when this subject is the staff member `staff_id`.
    pub fn is_staff_member(&self, staff_id: Ulid) -> bool {
        self.role == Role::Staff && self.id.parse::<Ulid>().is_ok_and(|id| id == staff_id)
    }
}

/// Byte comparison whose running time does not depend on where inputs differ.
fn tokens_match(given: &[u8], expected: &[u8]) -> bool {
    if given.len() != expected.len() {
        return false;
    }
    given
        .iter()
        .zip(expected)
        .fold(0u8, |acc, (a, b)| acc | (a ^ b))
        == 0
}

fn bearer_token(parts: &Parts) -> Option<&str> {
    parts
        .headers
        .get(AUTHORIZATION)
        .and_then(|h| h.to_str().ok())
        .and_then(|h| h.strip_prefix("Bearer "))
        .map(str::trim)
}

fn header<'a>(parts: &'a Parts, name: &str) -> Option<&'a str> {
    parts
        .headers
        .get(name)
        .and_then(|h| h.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
}

impl FromRequestParts<AppState> for Subject {
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        if let Some(subject) = parts.extensions.get::<Subject>() {
            return Ok(subject.clone());
        }

        let Some(token) = bearer_token(parts) else {
            warn!(uri = %parts.uri, "missing bearer token");
            return Err(ApiError::Unauthorized("missing bearer token".into()));
        };
        if !tokens_match(token.as_bytes(), state.api_token.as_bytes()) {
            warn!(uri = %parts.uri, "invalid bearer token");
            return Err(ApiError::Unauthorized("invalid token".into()));
        }

        let id = header(parts, SUBJECT_ID_HEADER)
            .ok_or_else(|| ApiError::Unauthorized("missing X-Subject-Id".into()))?;
        let role = header(parts, SUBJECT_ROLE_HEADER)
            .and_then(Role::parse)
            .ok_or_else(|| ApiError::Unauthorized("missing or unknown X-Subject-Role".into()))?;

        let subject = Subject::new(id, role);
        parts.extensions.insert(subject.clone());
        Ok(subject)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn role_parsing_is_case_insensitive() {
        assert_eq!(Role::parse("Admin"), Some(Role::Admin));
        assert_eq!(Role::parse(" staff "), Some(Role::Staff));
        assert_eq!(Role::parse("client"), Some(Role::Client));
        assert_eq!(Role::parse("owner"), None);
    }

    #[test]
    fn token_comparison() {
        assert!(tokens_match(b"secret", b"secret"));
        assert!(!tokens_match(b"secret", b"secreT"));
        assert!(!tokens_match(b"secret", b"secret2"));
        assert!(!tokens_match(b"", b"x"));
    }

    #[test]
    fn staff_membership_requires_staff_role() {
        let staff_id = Ulid::new();
        assert!(Subject::new(staff_id.to_string(), Role::Staff).is_staff_member(staff_id));
        assert!(!Subject::new(staff_id.to_string(), Role::Client).is_staff_member(staff_id));
        assert!(!Subject::new("not-a-ulid", Role::Staff).is_staff_member(staff_id));
        assert!(!Subject::new(Ulid::new().to_string(), Role::Staff).is_staff_member(staff_id));
    }
}
