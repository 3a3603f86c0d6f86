//! Database row types. These map directly to SQLite rows and stay
//! independent of the eduflow-types API models.

use std::str::FromStr;

use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::Row;
use rusqlite::types::Type;

use eduflow_types::models::{CallStatus, RoomKind};

pub struct RoomRow {
    pub id: i64,
    pub tenant_id: i64,
    pub course_id: Option<i64>,
    pub name: String,
    pub kind: RoomKind,
    pub description: String,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
}

pub(crate) const ROOM_COLUMNS: &str =
    "r.id, r.tenant_id, r.course_id, r.name, r.kind, r.description, r.is_active, r.created_at";

impl RoomRow {
    pub(crate) fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            tenant_id: row.get(1)?,
            course_id: row.get(2)?,
            name: row.get(3)?,
            kind: parsed_column(row, 4)?,
            description: row.get(5)?,
            is_active: row.get(6)?,
            created_at: ts_column(row, 7)?,
        })
    }
}

/// A room as seen by one of its members.
pub struct RoomSummaryRow {
    pub room: RoomRow,
    pub last_read_at: Option<DateTime<Utc>>,
    pub unread_count: i64,
    /// Any other member of the room; only meaningful for DM rooms.
    pub other_user_id: Option<i64>,
    pub last_message_id: Option<i64>,
}

pub struct MessageRow {
    pub id: i64,
    pub room_id: i64,
    pub sender_id: i64,
    pub sender_name: String,
    pub content: String,
    pub file_url: Option<String>,
    pub file_type: Option<String>,
    pub created_at: DateTime<Utc>,
    pub is_system_message: bool,
    pub is_read: bool,
}

pub(crate) const MESSAGE_COLUMNS: &str = "m.id, m.room_id, m.sender_id, m.sender_name, m.content, \
     m.file_url, m.file_type, m.created_at, m.is_system_message, m.is_read";

impl MessageRow {
    pub(crate) fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            room_id: row.get(1)?,
            sender_id: row.get(2)?,
            sender_name: row.get(3)?,
            content: row.get(4)?,
            file_url: row.get(5)?,
            file_type: row.get(6)?,
            created_at: ts_column(row, 7)?,
            is_system_message: row.get(8)?,
            is_read: row.get(9)?,
        })
    }
}

/// Insert payload for a chat message.
#[derive(Debug, Clone, Copy)]
pub struct NewMessage<'a> {
    pub room_id: i64,
    pub sender_id: i64,
    pub sender_name: &'a str,
    pub content: &'a str,
    pub file_url: Option<&'a str>,
    pub file_type: Option<&'a str>,
    pub is_system_message: bool,
}

pub struct CallRow {
    pub id: i64,
    pub room_id: i64,
    pub caller_id: i64,
    pub callee_id: i64,
    pub status: CallStatus,
    pub started_at: DateTime<Utc>,
    pub answered_at: Option<DateTime<Utc>>,
    pub ended_at: Option<DateTime<Utc>>,
}

pub(crate) const CALL_COLUMNS: &str = "c.id, c.room_id, c.caller_id, c.callee_id, c.status, \
     c.started_at, c.answered_at, c.ended_at";

impl CallRow {
    pub(crate) fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            room_id: row.get(1)?,
            caller_id: row.get(2)?,
            callee_id: row.get(3)?,
            status: parsed_column(row, 4)?,
            started_at: ts_column(row, 5)?,
            answered_at: opt_ts_column(row, 6)?,
            ended_at: opt_ts_column(row, 7)?,
        })
    }

    /// Whole seconds between answer and hang-up.
    pub fn duration(&self) -> Option<i64> {
        match (self.answered_at, self.ended_at) {
            (Some(answered), Some(ended)) => Some((ended - answered).num_seconds()),
            _ => None,
        }
    }
}

// -- Timestamps --
//
// Stored as fixed-width RFC 3339 UTC with microseconds, so lexical order in
// SQL matches chronological order.

pub(crate) fn now_ts() -> String {
    format_ts(Utc::now())
}

pub(crate) fn format_ts(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn parse_ts(raw: &str) -> Result<DateTime<Utc>, chrono::ParseError> {
    DateTime::parse_from_rfc3339(raw).map(|dt| dt.with_timezone(&Utc))
}

pub(crate) fn ts_column(row: &Row<'_>, idx: usize) -> rusqlite::Result<DateTime<Utc>> {
    let raw: String = row.get(idx)?;
    parse_ts(&raw).map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

pub(crate) fn opt_ts_column(row: &Row<'_>, idx: usize) -> rusqlite::Result<Option<DateTime<Utc>>> {
    let raw: Option<String> = row.get(idx)?;
    raw.map(|raw| {
        parse_ts(&raw)
            .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
    })
    .transpose()
}

fn parsed_column<T>(row: &Row<'_>, idx: usize) -> rusqlite::Result<T>
where
    T: FromStr<Err = String>,
{
    let raw: String = row.get(idx)?;
    raw.parse()
        .map_err(|e: String| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, e.into()))
}
