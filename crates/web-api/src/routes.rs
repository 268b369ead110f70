use axum::extract::{Path, State};
use axum::routing::get;
use axum::{Json, Router};
use serde::Serialize;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use uuid::Uuid;

use domain::{Timestamp, UserId};

use crate::error::ApiError;
use crate::gateway::ws_handler;
use crate::state::AppState;

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/ws", get(ws_handler))
        .route("/presence/{user_id}", get(presence_lookup))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

async fn health() -> &'static str {
    "ok"
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct PresenceResponse {
    user_id: UserId,
    is_online: bool,
    last_online_at: Option<Timestamp>,
}

/// 在线状态读路径：离线成员错过的状态由客户端在此重新拉取。
async fn presence_lookup(
    State(state): State<AppState>,
    Path(user_id): Path<Uuid>,
) -> Result<Json<PresenceResponse>, ApiError> {
    let user_id = UserId::from(user_id);
    let presence = state
        .presence
        .lookup(user_id)
        .await
        .map_err(application::ApplicationError::from)?;
    let presence = presence.ok_or_else(|| ApiError::not_found(format!("user {user_id}")))?;

    Ok(Json(PresenceResponse {
        user_id: presence.user_id,
        is_online: presence.is_online,
        last_online_at: presence.last_online_at,
    }))
}
