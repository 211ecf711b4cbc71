//! Admin authorization
//!
//! Administrative routes (create, update, delete, rotate-key) take an
//! [`AdminAccess`] extractor. When `api.admin_token` is configured the
//! request must carry it as `Authorization: Bearer <token>` or in the
//! `X-Admin-Token` header. Without a configured token the routes are closed.

use async_trait::async_trait;
use axum::{extract::FromRequestParts, http::request::Parts};
use std::sync::Arc;

use crate::api::error::ApiError;
use crate::api::state::AppState;
use crate::registry::keys_match;

pub const ADMIN_TOKEN_HEADER: &str = "x-admin-token";

/// Proof that the caller may use administrative routes
#[derive(Debug, Clone, Copy)]
pub struct AdminAccess;

#[async_trait]
impl FromRequestParts<Arc<AppState>> for AdminAccess {
    type Rejection = ApiError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &Arc<AppState>,
    ) -> Result<Self, Self::Rejection> {
        let Some(expected) = state.config.admin_token.as_deref() else {
            tracing::warn!(path = %parts.uri.path(), "Admin route called with no admin token configured");
            return Err(ApiError::Authentication(
                "Administrative routes are disabled; configure api.admin_token".to_string(),
            ));
        };

        match presented_token(parts) {
            Some(token) if keys_match(expected, token) => Ok(AdminAccess),
            Some(_) => {
                tracing::warn!(path = %parts.uri.path(), "Rejected admin token");
                Err(ApiError::Authentication("Invalid admin token".to_string()))
            }
            None => Err(ApiError::Authentication(
                "Missing admin token".to_string(),
            )),
        }
    }
}

fn presented_token(parts: &Parts) -> Option<&str> {
    if let Some(value) = parts.headers.get(axum::http::header::AUTHORIZATION) {
        let value = value.to_str().ok()?;
        return value.strip_prefix("Bearer ").map(str::trim);
    }

    parts
        .headers
        .get(ADMIN_TOKEN_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
}
