//! Call lifecycle handlers
//!
//! Thin layer over the call controller: extract identity and path, delegate,
//! map the result. All transition rules live in the controller.

use axum::{
    extract::{Path, State},
    Json,
};

use crate::{
    error::Result,
    models::*,
    AppState,
};

use super::CallerIdentity;

/// Start a new voice or video call
pub async fn initiate_call(
    State(state): State<AppState>,
    caller: CallerIdentity,
    Json(req): Json<InitiateCallRequest>,
) -> Result<Json<CallSessionResponse>> {
    let session = state
        .controller
        .initiate(
            &caller.user_id,
            &req.participant_ids,
            req.call_type,
            req.chat_channel,
        )
        .await?;

    Ok(Json(session))
}

pub async fn get_call(
    State(state): State<AppState>,
    _caller: CallerIdentity,
    Path(call_id): Path<String>,
) -> Result<Json<CallDetailsResponse>> {
    let details = state.controller.get_call_details(&call_id).await?;

    Ok(Json(details))
}

/// Accept an incoming call and receive a join credential
pub async fn accept_call(
    State(state): State<AppState>,
    caller: CallerIdentity,
    Path(call_id): Path<String>,
) -> Result<Json<CallSessionResponse>> {
    let session = state.controller.accept(&call_id, &caller.user_id).await?;

    Ok(Json(session))
}

pub async fn decline_call(
    State(state): State<AppState>,
    caller: CallerIdentity,
    Path(call_id): Path<String>,
) -> Result<Json<serde_json::Value>> {
    state.controller.decline(&call_id, &caller.user_id).await?;

    Ok(Json(serde_json::json!({ "declined": true })))
}

pub async fn leave_call(
    State(state): State<AppState>,
    caller: CallerIdentity,
    Path(call_id): Path<String>,
) -> Result<Json<serde_json::Value>> {
    state.controller.leave(&call_id, &caller.user_id).await?;

    Ok(Json(serde_json::json!({ "left": true })))
}

pub async fn end_call(
    State(state): State<AppState>,
    caller: CallerIdentity,
    Path(call_id): Path<String>,
) -> Result<Json<serde_json::Value>> {
    state.controller.end(&call_id, &caller.user_id).await?;

    Ok(Json(serde_json::json!({ "ended": true })))
}

/// Report an unanswered invitation; normally invoked by the sweep, exposed
/// for clients that track their own ring timeout
pub async fn miss_call(
    State(state): State<AppState>,
    caller: CallerIdentity,
    Path(call_id): Path<String>,
) -> Result<Json<serde_json::Value>> {
    state.controller.mark_missed(&call_id, &caller.user_id).await?;

    Ok(Json(serde_json::json!({ "missed": true })))
}

/// Record which media the caller actually used during the session
pub async fn update_media_flags(
    State(state): State<AppState>,
    caller: CallerIdentity,
    Path(call_id): Path<String>,
    Json(req): Json<MediaFlagsRequest>,
) -> Result<Json<serde_json::Value>> {
    state
        .controller
        .update_media_flags(
            &call_id,
            &caller.user_id,
            req.had_video,
            req.had_audio,
            req.shared_screen,
        )
        .await?;

    Ok(Json(serde_json::json!({ "updated": true })))
}

/// Rooms with a live call, as reported by the media provider client
pub async fn list_active_rooms(
    State(state): State<AppState>,
    _caller: CallerIdentity,
) -> Result<Json<ActiveRoomsResponse>> {
    let rooms = state.media.list_active_rooms().await?;

    Ok(Json(ActiveRoomsResponse { rooms }))
}
