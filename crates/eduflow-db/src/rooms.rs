use anyhow::{Result, anyhow};
use rusqlite::{Connection, OptionalExtension, params};

use eduflow_types::models::RoomKind;

use crate::Database;
use crate::models::{ROOM_COLUMNS, RoomRow, RoomSummaryRow, now_ts, opt_ts_column};

impl Database {
    /// Fetch a room only if it belongs to `tenant_id`.
    pub fn get_room(&self, tenant_id: i64, room_id: i64) -> Result<Option<RoomRow>> {
        self.with_conn(|conn| query_room(conn, tenant_id, room_id))
    }

    /// Get or create the room for `(tenant_id, course_id)`. The name is only
    /// used when the room is created.
    pub fn get_or_create_course_room(
        &self,
        tenant_id: i64,
        course_id: i64,
        name: &str,
    ) -> Result<RoomRow> {
        self.with_conn(|conn| {
            let tx = conn.transaction()?;
            tx.execute(
                "INSERT OR IGNORE INTO rooms (tenant_id, course_id, name, kind, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![tenant_id, course_id, name, RoomKind::Course.as_str(), now_ts()],
            )?;

            let sql = format!(
                "SELECT {ROOM_COLUMNS} FROM rooms r
                 WHERE r.tenant_id = ?1 AND r.course_id = ?2 AND r.kind = 'COURSE'"
            );
            let room = tx.query_row(&sql, params![tenant_id, course_id], RoomRow::from_row)?;
            tx.commit()?;
            Ok(room)
        })
    }

    /// Get or create the DM room for an unordered pair of users, making sure
    /// both are members.
    pub fn get_or_create_dm_room(&self, tenant_id: i64, user_a: i64, user_b: i64) -> Result<RoomRow> {
        let (low, high) = if user_a <= user_b { (user_a, user_b) } else { (user_b, user_a) };

        self.with_conn(|conn| {
            let tx = conn.transaction()?;
            tx.execute(
                "INSERT OR IGNORE INTO rooms
                    (tenant_id, name, kind, dm_user_low, dm_user_high, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![
                    tenant_id,
                    format!("dm_{}_{}", low, high),
                    RoomKind::Dm.as_str(),
                    low,
                    high,
                    now_ts()
                ],
            )?;

            let sql = format!(
                "SELECT {ROOM_COLUMNS} FROM rooms r
                 WHERE r.tenant_id = ?1 AND r.dm_user_low = ?2 AND r.dm_user_high = ?3
                   AND r.kind = 'DM'"
            );
            let room = tx.query_row(&sql, params![tenant_id, low, high], RoomRow::from_row)?;

            insert_member(&tx, room.id, low)?;
            insert_member(&tx, room.id, high)?;
            tx.commit()?;
            Ok(room)
        })
    }

    /// Add a member. Returns `false` when the membership already existed.
    pub fn add_member(&self, room_id: i64, user_id: i64) -> Result<bool> {
        self.with_conn(|conn| insert_member(conn, room_id, user_id))
    }

    pub fn is_member(&self, tenant_id: i64, room_id: i64, user_id: i64) -> Result<bool> {
        self.with_conn(|conn| {
            let found = conn
                .query_row(
                    "SELECT 1 FROM room_members m
                     JOIN rooms r ON r.id = m.room_id
                     WHERE m.room_id = ?1 AND m.user_id = ?2 AND r.tenant_id = ?3",
                    params![room_id, user_id, tenant_id],
                    |_| Ok(()),
                )
                .optional()?;
            Ok(found.is_some())
        })
    }

    pub fn member_ids(&self, tenant_id: i64, room_id: i64) -> Result<Vec<i64>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT m.user_id FROM room_members m
                 JOIN rooms r ON r.id = m.room_id
                 WHERE m.room_id = ?1 AND r.tenant_id = ?2
                 ORDER BY m.user_id",
            )?;
            let ids = stmt
                .query_map(params![room_id, tenant_id], |row| row.get(0))?
                .collect::<std::result::Result<Vec<i64>, _>>()?;
            Ok(ids)
        })
    }

    /// Advance a member's read marker to now. Update-only: returns `false`
    /// when the user is not a member of that room in that tenant.
    pub fn touch_last_read(&self, tenant_id: i64, room_id: i64, user_id: i64) -> Result<bool> {
        self.with_conn(|conn| {
            let changed = conn.execute(
                "UPDATE room_members SET last_read_at = ?1
                 WHERE room_id = ?2 AND user_id = ?3
                   AND room_id IN (SELECT id FROM rooms WHERE tenant_id = ?4)",
                params![now_ts(), room_id, user_id, tenant_id],
            )?;
            Ok(changed == 1)
        })
    }

    #[cfg(test)]
    pub fn last_read_at(
        &self,
        room_id: i64,
        user_id: i64,
    ) -> Result<Option<chrono::DateTime<chrono::Utc>>> {
        self.with_conn(|conn| {
            let marker = conn
                .query_row(
                    "SELECT last_read_at FROM room_members WHERE room_id = ?1 AND user_id = ?2",
                    params![room_id, user_id],
                    |row| opt_ts_column(row, 0),
                )
                .optional()?
                .flatten();
            Ok(marker)
        })
    }

    /// Active rooms the user belongs to in their tenant, newest first.
    pub fn rooms_for_user(&self, tenant_id: i64, user_id: i64) -> Result<Vec<RoomSummaryRow>> {
        self.with_conn(|conn| {
            // Counts and the last message id are folded into one query to avoid N+1
            let sql = format!(
                "SELECT {ROOM_COLUMNS},
                    m.last_read_at,
                    (SELECT COUNT(*) FROM messages msg
                        WHERE msg.room_id = r.id
                          AND (m.last_read_at IS NULL OR msg.created_at > m.last_read_at)),
                    (SELECT o.user_id FROM room_members o
                        WHERE o.room_id = r.id AND o.user_id != m.user_id
                        ORDER BY o.user_id LIMIT 1),
                    (SELECT last.id FROM messages last
                        WHERE last.room_id = r.id
                        ORDER BY last.created_at DESC, last.id DESC LIMIT 1)
                 FROM rooms r
                 JOIN room_members m ON m.room_id = r.id
                 WHERE r.tenant_id = ?1 AND m.user_id = ?2 AND r.is_active = 1
                 ORDER BY r.created_at DESC, r.id DESC"
            );

            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt
                .query_map(params![tenant_id, user_id], |row| {
                    Ok(RoomSummaryRow {
                        room: RoomRow::from_row(row)?,
                        last_read_at: opt_ts_column(row, 8)?,
                        unread_count: row.get(9)?,
                        other_user_id: row.get(10)?,
                        last_message_id: row.get(11)?,
                    })
                })?
                .collect::<std::result::Result<Vec<_>, _>>()?;

            Ok(rows)
        })
    }
}

fn query_room(conn: &Connection, tenant_id: i64, room_id: i64) -> Result<Option<RoomRow>> {
    let sql = format!("SELECT {ROOM_COLUMNS} FROM rooms r WHERE r.id = ?1 AND r.tenant_id = ?2");
    let room = conn
        .query_row(&sql, params![room_id, tenant_id], RoomRow::from_row)
        .optional()?;
    Ok(room)
}

fn insert_member(conn: &Connection, room_id: i64, user_id: i64) -> Result<bool> {
    let inserted = conn
        .execute(
            "INSERT OR IGNORE INTO room_members (room_id, user_id, joined_at) VALUES (?1, ?2, ?3)",
            params![room_id, user_id, now_ts()],
        )
        .map_err(|e| anyhow!("add member {} to room {}: {}", user_id, room_id, e))?;
    Ok(inserted == 1)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn db() -> Database {
        Database::open_in_memory().unwrap()
    }

    #[test]
    fn course_room_is_created_once_per_tenant_and_course() {
        let db = db();
        let first = db.get_or_create_course_room(5, 1, "Rust 101").unwrap();
        let second = db.get_or_create_course_room(5, 1, "Renamed").unwrap();
        assert_eq!(first.id, second.id);
        assert_eq!(second.name, "Rust 101");
        assert_eq!(second.kind, RoomKind::Course);

        let other_tenant = db.get_or_create_course_room(7, 1, "Rust 101").unwrap();
        assert_ne!(first.id, other_tenant.id);
    }

    #[test]
    fn dm_room_is_unique_per_unordered_pair() {
        let db = db();
        let ab = db.get_or_create_dm_room(5, 10, 20).unwrap();
        let ba = db.get_or_create_dm_room(5, 20, 10).unwrap();
        assert_eq!(ab.id, ba.id);
        assert_eq!(ab.kind, RoomKind::Dm);
        assert_eq!(db.member_ids(5, ab.id).unwrap(), vec![10, 20]);

        let other_tenant = db.get_or_create_dm_room(6, 10, 20).unwrap();
        assert_ne!(ab.id, other_tenant.id);
    }

    #[test]
    fn membership_is_idempotent() {
        let db = db();
        let room = db.get_or_create_course_room(5, 1, "c").unwrap();
        assert!(db.add_member(room.id, 9).unwrap());
        assert!(!db.add_member(room.id, 9).unwrap());
        assert_eq!(db.member_ids(5, room.id).unwrap(), vec![9]);
    }

    #[test]
    fn rooms_are_invisible_across_tenants() {
        let db = db();
        let room = db.get_or_create_course_room(5, 1, "c").unwrap();
        db.add_member(room.id, 9).unwrap();

        assert!(db.get_room(5, room.id).unwrap().is_some());
        assert!(db.get_room(7, room.id).unwrap().is_none());
        assert!(db.is_member(5, room.id, 9).unwrap());
        assert!(!db.is_member(7, room.id, 9).unwrap());
        assert!(db.member_ids(7, room.id).unwrap().is_empty());
    }

    #[test]
    fn touch_last_read_only_updates_existing_members() {
        let db = db();
        let room = db.get_or_create_course_room(5, 1, "c").unwrap();
        db.add_member(room.id, 9).unwrap();

        assert!(db.last_read_at(room.id, 9).unwrap().is_none());
        assert!(db.touch_last_read(5, room.id, 9).unwrap());
        assert!(db.last_read_at(room.id, 9).unwrap().is_some());

        assert!(!db.touch_last_read(5, room.id, 10).unwrap());
        assert!(!db.touch_last_read(7, room.id, 9).unwrap());
        assert!(!db.is_member(5, room.id, 10).unwrap());
    }

    #[test]
    fn room_listing_reports_other_dm_user() {
        let db = db();
        let course = db.get_or_create_course_room(5, 1, "c").unwrap();
        db.add_member(course.id, 10).unwrap();
        let dm = db.get_or_create_dm_room(5, 10, 20).unwrap();

        let rooms = db.rooms_for_user(5, 10).unwrap();
        assert_eq!(rooms.len(), 2);
        let dm_summary = rooms.iter().find(|r| r.room.id == dm.id).unwrap();
        assert_eq!(dm_summary.other_user_id, Some(20));
        assert_eq!(dm_summary.unread_count, 0);
        assert!(dm_summary.last_message_id.is_none());

        assert!(db.rooms_for_user(7, 10).unwrap().is_empty());
    }
}
