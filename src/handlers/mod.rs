//! HTTP request handlers for Huddle Server

pub mod calls;
pub mod health;
pub mod websocket;

use axum::{
    extract::FromRequestParts,
    http::request::Parts,
};
use crate::{error::AppError, AppState};

/// Caller identity established by the upstream auth tier.
///
/// Authentication itself happens before requests reach this server; the
/// resolved user id arrives in the `x-user-id` header.
#[derive(Debug, Clone)]
pub struct CallerIdentity {
    pub user_id: String,
}

#[axum::async_trait]
impl FromRequestParts<AppState> for CallerIdentity {
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, _state: &AppState) -> Result<Self, Self::Rejection> {
        let user_id = parts
            .headers
            .get("x-user-id")
            .and_then(|v| v.to_str().ok())
            .filter(|v| !v.is_empty())
            .ok_or_else(|| AppError::Validation("Missing x-user-id header".to_string()))?;

        Ok(CallerIdentity {
            user_id: user_id.to_string(),
        })
    }
}
