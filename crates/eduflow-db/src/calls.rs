use anyhow::Result;
use rusqlite::{Connection, OptionalExtension, params};

use eduflow_types::models::CallStatus;

use crate::Database;
use crate::models::{CALL_COLUMNS, CallRow, now_ts};

impl Database {
    /// Start ringing. Returns `None` unless the room is a DM room in
    /// `tenant_id` and both parties are members of it.
    pub fn create_call(
        &self,
        tenant_id: i64,
        room_id: i64,
        caller_id: i64,
        callee_id: i64,
    ) -> Result<Option<CallRow>> {
        self.with_conn(|conn| {
            let tx = conn.transaction()?;

            let members: i64 = tx.query_row(
                "SELECT COUNT(*) FROM room_members m
                 JOIN rooms r ON r.id = m.room_id
                 WHERE m.room_id = ?1 AND r.tenant_id = ?2 AND r.kind = 'DM'
                   AND m.user_id IN (?3, ?4)",
                params![room_id, tenant_id, caller_id, callee_id],
                |row| row.get(0),
            )?;
            if caller_id == callee_id || members != 2 {
                return Ok(None);
            }

            tx.execute(
                "INSERT INTO call_sessions (room_id, caller_id, callee_id, status, started_at)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![room_id, caller_id, callee_id, CallStatus::Ringing.as_str(), now_ts()],
            )?;
            let id = tx.last_insert_rowid();
            let call = query_call(&tx, tenant_id, id)?;
            tx.commit()?;
            Ok(call)
        })
    }

    pub fn get_call(&self, tenant_id: i64, call_id: i64) -> Result<Option<CallRow>> {
        self.with_conn(|conn| query_call(conn, tenant_id, call_id))
    }

    /// `RINGING -> ACTIVE`, callee only.
    pub fn answer_call(&self, tenant_id: i64, call_id: i64, user_id: i64) -> Result<Option<CallRow>> {
        self.transition(tenant_id, call_id, |call| {
            if call.callee_id != user_id {
                return None;
            }
            call.status.on_answer()
        })
    }

    /// `ACTIVE -> ENDED` or `RINGING -> MISSED`, either party.
    pub fn end_call(&self, tenant_id: i64, call_id: i64, user_id: i64) -> Result<Option<CallRow>> {
        self.transition(tenant_id, call_id, |call| {
            if call.caller_id != user_id && call.callee_id != user_id {
                return None;
            }
            call.status.on_end()
        })
    }

    /// `RINGING -> REJECTED`, callee only.
    pub fn reject_call(&self, tenant_id: i64, call_id: i64, user_id: i64) -> Result<Option<CallRow>> {
        self.transition(tenant_id, call_id, |call| {
            if call.callee_id != user_id {
                return None;
            }
            call.status.on_reject()
        })
    }

    /// Call history for a room, newest first.
    pub fn list_calls(&self, tenant_id: i64, room_id: i64, limit: u32) -> Result<Vec<CallRow>> {
        self.with_conn(|conn| {
            let sql = format!(
                "SELECT {CALL_COLUMNS} FROM call_sessions c
                 JOIN rooms r ON r.id = c.room_id
                 WHERE c.room_id = ?1 AND r.tenant_id = ?2
                 ORDER BY c.started_at DESC, c.id DESC
                 LIMIT ?3"
            );
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt
                .query_map(params![room_id, tenant_id, limit], CallRow::from_row)?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    /// Apply a state change picked by `next`. Unknown calls, calls in other
    /// tenants and refused transitions all yield `None` and write nothing.
    fn transition<F>(&self, tenant_id: i64, call_id: i64, next: F) -> Result<Option<CallRow>>
    where
        F: FnOnce(&CallRow) -> Option<CallStatus>,
    {
        self.with_conn(|conn| {
            let tx = conn.transaction()?;

            let Some(call) = query_call(&tx, tenant_id, call_id)? else {
                return Ok(None);
            };
            let Some(status) = next(&call) else {
                return Ok(None);
            };

            let now = now_ts();
            let answered_at = (status == CallStatus::Active).then(|| now.clone());
            let ended_at = status.is_terminal().then(|| now.clone());

            let changed = tx.execute(
                "UPDATE call_sessions
                 SET status = ?1,
                     answered_at = COALESCE(?2, answered_at),
                     ended_at = COALESCE(?3, ended_at)
                 WHERE id = ?4 AND status = ?5",
                params![status.as_str(), answered_at, ended_at, call_id, call.status.as_str()],
            )?;
            if changed != 1 {
                return Ok(None);
            }

            let updated = query_call(&tx, tenant_id, call_id)?;
            tx.commit()?;
            Ok(updated)
        })
    }
}

fn query_call(conn: &Connection, tenant_id: i64, call_id: i64) -> Result<Option<CallRow>> {
    let sql = format!(
        "SELECT {CALL_COLUMNS} FROM call_sessions c
         JOIN rooms r ON r.id = c.room_id
         WHERE c.id = ?1 AND r.tenant_id = ?2"
    );
    let call = conn
        .query_row(&sql, params![call_id, tenant_id], CallRow::from_row)
        .optional()?;
    Ok(call)
}
