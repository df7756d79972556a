use axum::{
    async_trait,
    extract::FromRequestParts,
    http::request::Parts,
    response::{IntoResponse, Response},
};
use axum_extra::{
    headers::{authorization::Bearer, Authorization},
    TypedHeader,
};
use std::sync::Arc;

use super::AuthContext;
use crate::app::AppState;
use crate::domain::Principal;
use crate::error::ApiError;

/// Extractor that requires a verified bearer token and a recognized account type.
///
/// ```ignore
/// async fn handler(auth: RequireAuth) -> impl IntoResponse {
///     format!("Hello, {}", auth.principal)
/// }
/// ```
#[derive(Debug, Clone)]
pub struct RequireAuth(pub AuthContext);

impl std::ops::Deref for RequireAuth {
    type Target = AuthContext;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

#[derive(Debug)]
pub enum AuthError {
    MissingToken,
    InvalidToken,
    UnknownAccount,
    AccountUnavailable,
    NotAdmin,
}

impl IntoResponse for AuthError {
    fn into_response(self) -> Response {
        let err = match self {
            AuthError::MissingToken => ApiError::unauthorized("Missing authorization token"),
            AuthError::InvalidToken => ApiError::unauthorized("Invalid or expired token"),
            AuthError::UnknownAccount => ApiError::unauthorized("Account type not recognized"),
            AuthError::AccountUnavailable => ApiError::internal("Account provisioning failed"),
            AuthError::NotAdmin => ApiError::forbidden("Admin access required"),
        };
        err.into_response()
    }
}

#[async_trait]
impl FromRequestParts<Arc<AppState>> for RequireAuth {
    type Rejection = AuthError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &Arc<AppState>,
    ) -> Result<Self, Self::Rejection> {
        let TypedHeader(Authorization(bearer)) =
            TypedHeader::<Authorization<Bearer>>::from_request_parts(parts, state)
                .await
                .map_err(|_| AuthError::MissingToken)?;

        let token = bearer.token();
        if token.is_empty() {
            return Err(AuthError::MissingToken);
        }

        let claims = state.jwks_cache.verify_token(token).await.map_err(|e| {
            tracing::warn!(error = %e, "JWT verification failed");
            AuthError::InvalidToken
        })?;

        let context = AuthContext::from_claims(&claims).map_err(|e| {
            tracing::warn!(error = %e, sub = %claims.sub, "Failed to resolve principal");
            AuthError::UnknownAccount
        })?;

        state
            .accounts
            .ensure(&state.db, &context)
            .await
            .map_err(|e| {
                tracing::error!(
                    error = %e,
                    principal = %context.principal,
                    "Failed to provision account"
                );
                AuthError::AccountUnavailable
            })?;

        Ok(RequireAuth(context))
    }
}

/// Extractor for admin-only endpoints
#[derive(Debug, Clone)]
pub struct RequireAdmin(pub Principal);

#[async_trait]
impl FromRequestParts<Arc<AppState>> for RequireAdmin {
    type Rejection = AuthError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &Arc<AppState>,
    ) -> Result<Self, Self::Rejection> {
        let RequireAuth(context) = RequireAuth::from_request_parts(parts, state).await?;
        if !context.principal.is_admin() {
            return Err(AuthError::NotAdmin);
        }
        Ok(RequireAdmin(context.principal))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::StatusCode;

    #[test]
    fn token_failures_are_401_and_role_failures_403() {
        for err in [
            AuthError::MissingToken,
            AuthError::InvalidToken,
            AuthError::UnknownAccount,
        ] {
            assert_eq!(err.into_response().status(), StatusCode::UNAUTHORIZED);
        }
        assert_eq!(
            AuthError::NotAdmin.into_response().status(),
            StatusCode::FORBIDDEN
        );
        assert_eq!(
            AuthError::AccountUnavailable.into_response().status(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }
}
