//! Health check handler

use axum::{extract::State, Json};
use serde_json::json;

use crate::AppState;

pub async fn health_check(State(state): State<AppState>) -> Json<serde_json::Value> {
    Json(json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
        "media_configured": state.media.is_configured(),
        "online_users": state.ws_manager.online_user_count(),
    }))
}
