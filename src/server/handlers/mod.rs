pub mod generate;
pub mod health;
pub mod moderation;

use axum::async_trait;
use axum::extract::FromRequestParts;
use axum::http::request::Parts;

use crate::error::ApiError;

/// This service trusts an upstream gateway to have already authenticated
/// the caller and to forward their identity in `X-User-Id`; it does not
/// authenticate requests itself.
pub struct AuthenticatedUser(pub String);

#[async_trait]
impl<S> FromRequestParts<S> for AuthenticatedUser
where
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let user_id = parts
            .headers
            .get("x-user-id")
            .and_then(|v| v.to_str().ok())
            .filter(|v| !v.is_empty())
            .ok_or_else(|| ApiError::Validation("missing X-User-Id header".to_string()))?;

        Ok(AuthenticatedUser(user_id.to_string()))
    }
}

pub fn internal(message: impl Into<String>) -> ApiError {
    ApiError::Internal(anyhow::anyhow!(message.into()))
}
