use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::models::{CallStatus, RoomKind};

// -- JWT Claims --

/// Claims minted by the auth backend. Shared by the socket identity
/// middleware and the REST bearer check.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    pub user_id: i64,
    pub tenant_id: i64,
    #[serde(default)]
    pub role: String,
    #[serde(default)]
    pub full_name: String,
    pub exp: usize,
}

// -- Rooms --

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OtherUser {
    pub user_id: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoomResponse {
    pub id: i64,
    pub name: String,
    #[serde(rename = "type")]
    pub kind: RoomKind,
    pub course_id: Option<i64>,
    pub description: String,
    pub last_message: Option<MessageResponse>,
    pub unread_count: i64,
    pub other_user: Option<OtherUser>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CreateDmRequest {
    pub user_id: i64,
}

// -- Messages --

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessageResponse {
    pub id: i64,
    pub room_id: i64,
    pub sender_id: i64,
    pub sender_name: String,
    pub content: String,
    pub file_url: Option<String>,
    pub file_type: Option<String>,
    pub timestamp: DateTime<Utc>,
    pub is_system_message: bool,
    pub is_read: bool,
}

// -- Calls --

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CallSessionResponse {
    pub id: i64,
    pub room_id: i64,
    pub caller_id: i64,
    pub callee_id: i64,
    pub status: CallStatus,
    pub started_at: DateTime<Utc>,
    pub answered_at: Option<DateTime<Utc>>,
    pub ended_at: Option<DateTime<Utc>>,
    /// Seconds between answer and hang-up; absent unless both are set.
    pub duration: Option<i64>,
}

// -- Enrollment webhook --

/// Every field is optional at the wire level so that a missing required
/// field yields `400` rather than a deserializer rejection.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EnrollmentWebhookRequest {
    pub course_id: Option<i64>,
    pub user_id: Option<i64>,
    pub tenant_id: Option<i64>,
    pub course_name: Option<String>,
    pub instructor_id: Option<i64>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct EnrollmentWebhookResponse {
    pub status: String,
    pub room_id: i64,
}
