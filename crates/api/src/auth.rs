//! Caller identity.
//!
//! Tokens are verified by the gateway in front of the storefront, which
//! forwards the authenticated username in the `x-username` header.

use axum::extract::FromRequestParts;
use axum::http::request::Parts;

use crate::error::ApiError;

pub const USERNAME_HEADER: &str = "x-username";

/// The authenticated caller. Rejects the request with 401 when the gateway
/// forwarded no identity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthenticatedUser(pub String);

impl<S: Send + Sync> FromRequestParts<S> for AuthenticatedUser {
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .headers
            .get(USERNAME_HEADER)
            .and_then(|value| value.to_str().ok())
            .map(str::trim)
            .filter(|name| !name.is_empty())
            .map(|name| AuthenticatedUser(name.to_string()))
            .ok_or(ApiError::Unauthorized)
    }
}
