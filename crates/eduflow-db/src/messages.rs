use anyhow::Result;
use rusqlite::{OptionalExtension, params};

use crate::Database;
use crate::models::{MESSAGE_COLUMNS, MessageRow, NewMessage, now_ts};

impl Database {
    /// Persist a message. Returns `None` without writing when the room does
    /// not exist in `tenant_id`, has been deactivated, or the sender is not a
    /// member. System messages skip the membership check.
    pub fn insert_message(&self, tenant_id: i64, msg: &NewMessage<'_>) -> Result<Option<MessageRow>> {
        self.with_conn(|conn| {
            let tx = conn.transaction()?;

            let room_ok = tx
                .query_row(
                    "SELECT 1 FROM rooms r
                     WHERE r.id = ?1 AND r.tenant_id = ?2 AND r.is_active = 1
                       AND (?3 OR EXISTS (SELECT 1 FROM room_members m
                                          WHERE m.room_id = r.id AND m.user_id = ?4))",
                    params![msg.room_id, tenant_id, msg.is_system_message, msg.sender_id],
                    |_| Ok(()),
                )
                .optional()?
                .is_some();
            if !room_ok {
                return Ok(None);
            }

            tx.execute(
                "INSERT INTO messages
                    (room_id, sender_id, sender_name, content, file_url, file_type,
                     created_at, is_system_message)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
                params![
                    msg.room_id,
                    msg.sender_id,
                    msg.sender_name,
                    msg.content,
                    msg.file_url,
                    msg.file_type,
                    now_ts(),
                    msg.is_system_message
                ],
            )?;
            let id = tx.last_insert_rowid();

            let sql = format!("SELECT {MESSAGE_COLUMNS} FROM messages m WHERE m.id = ?1");
            let row = tx.query_row(&sql, [id], MessageRow::from_row)?;
            tx.commit()?;
            Ok(Some(row))
        })
    }

    /// Room history in chronological order (`created_at`, then id).
    ///
    /// Returns the newest `limit` messages older than the `before` message
    /// when a cursor is given.
    pub fn list_messages(
        &self,
        tenant_id: i64,
        room_id: i64,
        limit: u32,
        before: Option<i64>,
    ) -> Result<Vec<MessageRow>> {
        self.with_conn(|conn| {
            let sql = format!(
                "SELECT {MESSAGE_COLUMNS} FROM messages m
                 JOIN rooms r ON r.id = m.room_id
                 WHERE m.room_id = ?1 AND r.tenant_id = ?2
                   AND (?3 IS NULL OR (m.created_at, m.id) <
                        (SELECT c.created_at, c.id FROM messages c WHERE c.id = ?3))
                 ORDER BY m.created_at DESC, m.id DESC
                 LIMIT ?4"
            );

            let mut stmt = conn.prepare(&sql)?;
            let mut rows = stmt
                .query_map(params![room_id, tenant_id, before, limit], MessageRow::from_row)?
                .collect::<std::result::Result<Vec<_>, _>>()?;

            rows.reverse();
            Ok(rows)
        })
    }

    /// Flag a message as read. Update-only: returns `false` when the message
    /// is not in `room_id` or the room is not in `tenant_id`.
    pub fn mark_message_read(&self, tenant_id: i64, room_id: i64, message_id: i64) -> Result<bool> {
        self.with_conn(|conn| {
            let changed = conn.execute(
                "UPDATE messages SET is_read = 1
                 WHERE id = ?1 AND room_id = ?2
                   AND room_id IN (SELECT id FROM rooms WHERE tenant_id = ?3)",
                params![message_id, room_id, tenant_id],
            )?;
            Ok(changed == 1)
        })
    }

    /// Batch-fetch messages by id.
    pub fn get_messages_by_ids(&self, message_ids: &[i64]) -> Result<Vec<MessageRow>> {
        if message_ids.is_empty() {
            return Ok(vec![]);
        }

        self.with_conn(|conn| {
            let placeholders: Vec<String> = (1..=message_ids.len()).map(|i| format!("?{}", i)).collect();
            let sql = format!(
                "SELECT {MESSAGE_COLUMNS} FROM messages m WHERE m.id IN ({})",
                placeholders.join(", ")
            );

            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt
                .query_map(rusqlite::params_from_iter(message_ids.iter()), MessageRow::from_row)?
                .collect::<std::result::Result<Vec<_>, _>>()?;

            Ok(rows)
        })
    }
}
