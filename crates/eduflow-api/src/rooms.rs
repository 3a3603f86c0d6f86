use std::collections::HashMap;

use axum::{Extension, Json, extract::State, http::StatusCode, response::IntoResponse};
use tracing::info;

use eduflow_db::models::{RoomRow, RoomSummaryRow};
use eduflow_gateway::identity::UserIdentity;
use eduflow_types::api::{CreateDmRequest, MessageResponse, OtherUser, RoomResponse};
use eduflow_types::models::RoomKind;

use crate::auth::AppState;
use crate::messages::message_response;

fn room_response(
    room: RoomRow,
    last_message: Option<MessageResponse>,
    unread_count: i64,
    other_user_id: Option<i64>,
) -> RoomResponse {
    let other_user = match room.kind {
        RoomKind::Dm => other_user_id.map(|user_id| OtherUser { user_id }),
        RoomKind::Course => None,
    };

    RoomResponse {
        id: room.id,
        name: room.name,
        kind: room.kind,
        course_id: room.course_id,
        description: room.description,
        last_message,
        unread_count,
        other_user,
        created_at: room.created_at,
    }
}

/// Rooms the caller belongs to in their tenant, newest first.
pub async fn list_rooms(
    State(state): State<AppState>,
    Extension(user): Extension<UserIdentity>,
) -> Result<impl IntoResponse, StatusCode> {
    let (summaries, last_messages) = state
        .storage(move |db| {
            let summaries = db.rooms_for_user(user.tenant_id, user.user_id)?;
            let ids: Vec<i64> = summaries.iter().filter_map(|s| s.last_message_id).collect();
            let last_messages = db.get_messages_by_ids(&ids)?;
            Ok((summaries, last_messages))
        })
        .await?;

    let mut last_by_id: HashMap<i64, MessageResponse> = last_messages
        .into_iter()
        .map(|row| (row.id, message_response(row)))
        .collect();

    let rooms: Vec<RoomResponse> = summaries
        .into_iter()
        .map(|summary: RoomSummaryRow| {
            let last_message = summary.last_message_id.and_then(|id| last_by_id.remove(&id));
            room_response(summary.room, last_message, summary.unread_count, summary.other_user_id)
        })
        .collect();

    Ok(Json(rooms))
}

/// Get or create the DM room between the caller and `user_id`.
pub async fn create_dm(
    State(state): State<AppState>,
    Extension(user): Extension<UserIdentity>,
    Json(req): Json<CreateDmRequest>,
) -> Result<impl IntoResponse, StatusCode> {
    if req.user_id == user.user_id {
        return Err(StatusCode::BAD_REQUEST);
    }

    let (tenant_id, me, other) = (user.tenant_id, user.user_id, req.user_id);
    let room = state
        .storage(move |db| db.get_or_create_dm_room(tenant_id, me, other))
        .await?;

    info!("DM room {} ready for users {} and {} (tenant {})", room.id, me, other, tenant_id);
    Ok(Json(room_response(room, None, 0, Some(other))))
}
