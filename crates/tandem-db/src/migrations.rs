use anyhow::Result;
use rusqlite::Connection;
use tracing::info;

/// Only the columns the gateway reads or writes. Everything else about users
/// and groups belongs to the external profile service.
pub fn run(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS users (
            id          INTEGER PRIMARY KEY,
            username    TEXT NOT NULL,
            avatar      TEXT
        );

        CREATE TABLE IF NOT EXISTS messages (
            id              INTEGER PRIMARY KEY AUTOINCREMENT,
            from_id         INTEGER NOT NULL,
            to_id           INTEGER,
            group_id        INTEGER,
            text            TEXT NOT NULL DEFAULT '',
            cipher_version  INTEGER,
            iv              TEXT,
            tag             TEXT,
            text_ecb        TEXT,
            text_preview    TEXT NOT NULL DEFAULT '',
            time            INTEGER NOT NULL,
            seen            INTEGER NOT NULL DEFAULT 0,
            reply_id        INTEGER,
            media_type      TEXT,
            media_url       TEXT,
            thumbnail_url   TEXT
        );

        CREATE INDEX IF NOT EXISTS idx_messages_pair
            ON messages(from_id, to_id, id);

        CREATE INDEX IF NOT EXISTS idx_messages_group
            ON messages(group_id, id);

        CREATE TABLE IF NOT EXISTS conversations (
            user_id     INTEGER NOT NULL,
            peer_id     INTEGER NOT NULL,
            time        INTEGER NOT NULL,
            PRIMARY KEY (user_id, peer_id)
        );

        CREATE TABLE IF NOT EXISTS calls (
            id              INTEGER PRIMARY KEY AUTOINCREMENT,
            room_name       TEXT NOT NULL,
            from_id         INTEGER NOT NULL,
            to_id           INTEGER,
            group_id        INTEGER,
            call_type       TEXT NOT NULL,
            status          TEXT NOT NULL,
            created_at      INTEGER NOT NULL,
            accepted_at     INTEGER,
            ended_at        INTEGER,
            duration        INTEGER,
            end_reason      TEXT
        );

        CREATE INDEX IF NOT EXISTS idx_calls_room
            ON calls(room_name, id);
        ",
    )?;

    info!("Database migrations complete");
    Ok(())
}
