//! Authentication middleware for axum
//!
//! Resolves the `Authorization: Bearer <token>` header into an
//! [`AuthExtension`]. Anonymous requests pass through with `None`; handlers
//! that need an identity call [`AuthExtension::require`].

use axum::{
    body::Body,
    extract::{Request, State},
    http::{header::AUTHORIZATION, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use std::sync::Arc;

use crate::common::auth::{AuthContext, AuthResult, TokenService};
use crate::common::{Error, Result};

/// Extension type for passing auth context to handlers
#[derive(Clone, Debug)]
pub struct AuthExtension(pub Option<AuthContext>);

impl AuthExtension {
    /// Identity of the caller, or 401
    pub fn require(&self) -> Result<&AuthContext> {
        self.0
            .as_ref()
            .ok_or_else(|| Error::Unauthorized("Authentication credentials were not provided".into()))
    }
}

/// Authentication middleware
/// Validates the Authorization header and adds AuthContext to request extensions
pub async fn auth_middleware(
    State(tokens): State<Arc<TokenService>>,
    mut request: Request<Body>,
    next: Next,
) -> Response {
    let auth_result = match request
        .headers()
        .get(AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
    {
        Some(header) => tokens.authenticate(header),
        None => AuthResult::Missing,
    };

    match auth_result {
        AuthResult::Ok(ctx) => {
            tracing::debug!(user = %ctx.username, "authenticated request");
            request.extensions_mut().insert(AuthExtension(Some(ctx)));
            next.run(request).await
        }
        AuthResult::Missing => {
            request.extensions_mut().insert(AuthExtension(None));
            next.run(request).await
        }
        AuthResult::Invalid(msg) => (
            StatusCode::UNAUTHORIZED,
            Json(json!({
                "detail": "Given token not valid for any token type",
                "message": msg
            })),
        )
            .into_response(),
        AuthResult::Expired => (
            StatusCode::UNAUTHORIZED,
            Json(json!({
                "detail": "Token is expired",
                "hint": "Obtain a new access token from /api/token/refresh"
            })),
        )
            .into_response(),
    }
}
