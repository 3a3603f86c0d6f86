use axum::{
    Extension, Json,
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
};
use serde::Deserialize;

use eduflow_gateway::identity::UserIdentity;
use eduflow_types::api::CallSessionResponse;

use crate::auth::AppState;
use crate::messages::MAX_PAGE;

#[derive(Debug, Deserialize)]
pub struct CallQuery {
    #[serde(default = "default_limit")]
    pub limit: u32,
}

fn default_limit() -> u32 {
    50
}

/// Call history for a room, newest first.
pub async fn get_calls(
    State(state): State<AppState>,
    Path(room_id): Path<i64>,
    Query(query): Query<CallQuery>,
    Extension(user): Extension<UserIdentity>,
) -> Result<impl IntoResponse, StatusCode> {
    let limit = query.limit.clamp(1, MAX_PAGE);

    let rows = state
        .storage(move |db| {
            if !db.is_member(user.tenant_id, room_id, user.user_id)? {
                return Ok(Vec::new());
            }
            db.list_calls(user.tenant_id, room_id, limit)
        })
        .await?;

    let calls: Vec<CallSessionResponse> = rows
        .into_iter()
        .map(|call| CallSessionResponse {
            duration: call.duration(),
            id: call.id,
            room_id: call.room_id,
            caller_id: call.caller_id,
            callee_id: call.callee_id,
            status: call.status,
            started_at: call.started_at,
            answered_at: call.answered_at,
            ended_at: call.ended_at,
        })
        .collect();

    Ok(Json(calls))
}
