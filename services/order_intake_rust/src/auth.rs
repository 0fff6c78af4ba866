//! Caller identity.
//!
//! Token verification belongs to an external identity service. The shipped
//! resolver trusts the bearer token and uses it as the user id.

use async_trait::async_trait;
use axum::{extract::FromRequestParts, http::request::Parts};

use crate::error::AppError;

#[async_trait]
pub trait IdentityResolver: Send + Sync + 'static {
    /// Map a bearer token to a user id, or `None` if it is not acceptable.
    async fn resolve(&self, token: &str) -> Option<String>;
}

pub struct BearerPassthrough;

#[async_trait]
impl IdentityResolver for BearerPassthrough {
    async fn resolve(&self, token: &str) -> Option<String> {
        let token = token.trim();
        if token.is_empty() {
            None
        } else {
            Some(token.to_string())
        }
    }
}

/// Raw token from `Authorization: Bearer <token>`.
///
/// A missing header is `401`; a header that is not a bearer credential is `400`.
#[derive(Debug, Clone)]
pub struct BearerToken(pub String);

#[axum::async_trait]
impl<S> FromRequestParts<S> for BearerToken
where
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let header = parts
            .headers
            .get(axum::http::header::AUTHORIZATION)
            .ok_or_else(|| AppError::Unauthorized("Missing Authorization header".to_string()))?;
        let value = header
            .to_str()
            .map_err(|_| AppError::BadRequest("Invalid Authorization header".to_string()))?;
        let token = value
            .strip_prefix("Bearer ")
            .ok_or_else(|| AppError::BadRequest("Authorization must use the Bearer scheme".to_string()))?;
        Ok(BearerToken(token.to_string()))
    }
}
