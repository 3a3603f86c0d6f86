use anyhow::Result;
use rusqlite::Connection;
use tracing::info;

pub fn run(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS rooms (
            id              INTEGER PRIMARY KEY AUTOINCREMENT,
            tenant_id       INTEGER NOT NULL,
            course_id       INTEGER,
            name            TEXT NOT NULL,
            kind            TEXT NOT NULL CHECK (kind IN ('COURSE', 'DM')),
            description     TEXT NOT NULL DEFAULT '',
            is_active       INTEGER NOT NULL DEFAULT 1,
            dm_user_low     INTEGER,
            dm_user_high    INTEGER,
            created_at      TEXT NOT NULL
        );

        -- One course room per (tenant, course)
        CREATE UNIQUE INDEX IF NOT EXISTS idx_rooms_course
            ON rooms(tenant_id, course_id) WHERE kind = 'COURSE';

        -- One DM room per unordered (tenant, user, user) pair
        CREATE UNIQUE INDEX IF NOT EXISTS idx_rooms_dm
            ON rooms(tenant_id, dm_user_low, dm_user_high) WHERE kind = 'DM';

        CREATE TABLE IF NOT EXISTS room_members (
            room_id         INTEGER NOT NULL REFERENCES rooms(id),
            user_id         INTEGER NOT NULL,
            joined_at       TEXT NOT NULL,
            last_read_at    TEXT,
            PRIMARY KEY (room_id, user_id)
        );

        CREATE INDEX IF NOT EXISTS idx_room_members_user
            ON room_members(user_id);

        CREATE TABLE IF NOT EXISTS messages (
            id                  INTEGER PRIMARY KEY AUTOINCREMENT,
            room_id             INTEGER NOT NULL REFERENCES rooms(id),
            sender_id           INTEGER NOT NULL,
            sender_name         TEXT NOT NULL DEFAULT '',
            content             TEXT NOT NULL DEFAULT '',
            file_url            TEXT,
            file_type           TEXT,
            created_at          TEXT NOT NULL,
            is_system_message   INTEGER NOT NULL DEFAULT 0,
            is_read             INTEGER NOT NULL DEFAULT 0
        );

        CREATE INDEX IF NOT EXISTS idx_messages_room
            ON messages(room_id, created_at, id);

        CREATE TABLE IF NOT EXISTS call_sessions (
            id              INTEGER PRIMARY KEY AUTOINCREMENT,
            room_id         INTEGER NOT NULL REFERENCES rooms(id),
            caller_id       INTEGER NOT NULL,
            callee_id       INTEGER NOT NULL,
            status          TEXT NOT NULL DEFAULT 'RINGING',
            started_at      TEXT NOT NULL,
            answered_at     TEXT,
            ended_at        TEXT
        );

        CREATE INDEX IF NOT EXISTS idx_call_sessions_room
            ON call_sessions(room_id, started_at);
        ",
    )?;

    info!("Database migrations complete");
    Ok(())
}
