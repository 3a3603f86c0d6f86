//! Enrollment webhook: the backend tells us who belongs in a course room.
//!
//! Callers retry on timeout, so every step is get-or-create.

use axum::{
    Json,
    extract::State,
    http::{HeaderMap, StatusCode},
    response::IntoResponse,
};
use tracing::{info, warn};

use eduflow_types::api::{EnrollmentWebhookRequest, EnrollmentWebhookResponse};

use crate::auth::AppState;

pub const SERVICE_TOKEN_HEADER: &str = "x-service-token";

pub async fn enrollment(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(req): Json<EnrollmentWebhookRequest>,
) -> Result<impl IntoResponse, StatusCode> {
    let presented = headers.get(SERVICE_TOKEN_HEADER).and_then(|v| v.to_str().ok());
    if !state.service_token_matches(presented) {
        warn!("Enrollment webhook called without a valid service token");
        return Err(StatusCode::FORBIDDEN);
    }

    let (Some(course_id), Some(user_id), Some(tenant_id)) = (req.course_id, req.user_id, req.tenant_id) else {
        return Err(StatusCode::BAD_REQUEST);
    };

    let name = req
        .course_name
        .filter(|n| !n.trim().is_empty())
        .unwrap_or_else(|| format!("Course {}", course_id));
    let instructor_id = req.instructor_id;

    let room_id = state
        .storage(move |db| {
            let room = db.get_or_create_course_room(tenant_id, course_id, &name)?;
            db.add_member(room.id, user_id)?;
            if let Some(instructor_id) = instructor_id {
                db.add_member(room.id, instructor_id)?;
            }
            Ok(room.id)
        })
        .await?;

    info!(
        "Enrolled user {} in course room {} (tenant {}, course {})",
        user_id, room_id, tenant_id, course_id
    );

    Ok(Json(EnrollmentWebhookResponse {
        status: "success".to_string(),
        room_id,
    }))
}
