use crate::Database;
use crate::models::{CallRow, CallStatus, ConversationRow, MessageRow, NewCall, NewMessage};
use anyhow::Result;
use rusqlite::{Connection, Row};
use tandem_crypto::{CipherRecord, CipherVersion};
use tandem_types::models::{MediaRef, UserProfile};

const CALL_COLUMNS: &str = "id, room_name, from_id, to_id, group_id, call_type, status, created_at, \
     accepted_at, ended_at, duration, end_reason";

/// Newest log row for a room name. Names may be reused once a call is over.
const LATEST_CALL: &str = "(SELECT MAX(id) FROM calls WHERE room_name = ?1)";

const MESSAGE_COLUMNS: &str = "id, from_id, to_id, group_id, text, cipher_version, iv, tag, text_ecb, \
     text_preview, time, seen, reply_id, media_type, media_url, thumbnail_url";

impl Database {
    // -- Users --

    pub fn upsert_user(&self, user: &UserProfile) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO users (id, username, avatar) VALUES (?1, ?2, ?3)
                 ON CONFLICT(id) DO UPDATE SET username = excluded.username, avatar = excluded.avatar",
                rusqlite::params![user.id, user.username, user.avatar],
            )?;
            Ok(())
        })
    }

    pub fn get_user(&self, id: i64) -> Result<Option<UserProfile>> {
        self.with_conn(|conn| {
            let user = conn
                .query_row("SELECT id, username, avatar FROM users WHERE id = ?1", [id], |row| {
                    Ok(UserProfile {
                        id: row.get(0)?,
                        username: row.get(1)?,
                        avatar: row.get(2)?,
                    })
                })
                .optional()?;
            Ok(user)
        })
    }

    // -- Messages --

    /// Returns the new message id.
    pub fn insert_message(&self, msg: &NewMessage) -> Result<i64> {
        let (media_type, media_url, thumbnail_url) = split_media(msg.media.as_ref());
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO messages (from_id, to_id, group_id, text, cipher_version, iv, tag, text_ecb,
                                       text_preview, time, reply_id, media_type, media_url, thumbnail_url)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14)",
                rusqlite::params![
                    msg.from_id,
                    msg.to_id,
                    msg.group_id,
                    msg.cipher.ciphertext,
                    msg.cipher.cipher_version.map(u8::from),
                    msg.cipher.nonce,
                    msg.cipher.tag,
                    msg.cipher.legacy_ciphertext,
                    msg.text_preview,
                    msg.time,
                    msg.reply_id,
                    media_type,
                    media_url,
                    thumbnail_url,
                ],
            )?;
            Ok(conn.last_insert_rowid())
        })
    }

    pub fn get_message(&self, id: i64) -> Result<Option<MessageRow>> {
        self.with_conn(|conn| {
            let sql = format!("SELECT {} FROM messages WHERE id = ?1", MESSAGE_COLUMNS);
            let row = conn.query_row(&sql, [id], message_from_row).optional()?;
            Ok(row)
        })
    }

    /// Direct history between two users, both directions, newest first.
    /// `before_id` pages backwards.
    pub fn get_history(&self, user_id: i64, peer_id: i64, before_id: Option<i64>, limit: u32) -> Result<Vec<MessageRow>> {
        self.with_conn(|conn| {
            let sql = format!(
                "SELECT {} FROM messages
                 WHERE group_id IS NULL
                   AND ((from_id = ?1 AND to_id = ?2) OR (from_id = ?2 AND to_id = ?1))
                   AND id < ?3
                 ORDER BY id DESC
                 LIMIT ?4",
                MESSAGE_COLUMNS
            );
            query_messages(conn, &sql, rusqlite::params![user_id, peer_id, before_id.unwrap_or(i64::MAX), limit])
        })
    }

    pub fn get_group_history(&self, group_id: i64, before_id: Option<i64>, limit: u32) -> Result<Vec<MessageRow>> {
        self.with_conn(|conn| {
            let sql = format!(
                "SELECT {} FROM messages
                 WHERE group_id = ?1 AND id < ?2
                 ORDER BY id DESC
                 LIMIT ?3",
                MESSAGE_COLUMNS
            );
            query_messages(conn, &sql, rusqlite::params![group_id, before_id.unwrap_or(i64::MAX), limit])
        })
    }

    /// Cache a V1 form next to a V2 primary. Rewriting an existing value is
    /// harmless: any V1 ciphertext of the same plaintext decrypts the same.
    pub fn store_legacy_ciphertext(&self, id: i64, legacy_ciphertext: &str) -> Result<bool> {
        self.with_conn(|conn| {
            let n = conn.execute(
                "UPDATE messages SET text_ecb = ?2 WHERE id = ?1",
                rusqlite::params![id, legacy_ciphertext],
            )?;
            Ok(n > 0)
        })
    }

    /// Rewrite all cipher columns, used after a V1 row gained a V2 primary.
    pub fn store_representations(&self, id: i64, cipher: &CipherRecord) -> Result<bool> {
        self.with_conn(|conn| {
            let n = conn.execute(
                "UPDATE messages SET text = ?2, cipher_version = ?3, iv = ?4, tag = ?5, text_ecb = ?6 WHERE id = ?1",
                rusqlite::params![
                    id,
                    cipher.ciphertext,
                    cipher.cipher_version.map(u8::from),
                    cipher.nonce,
                    cipher.tag,
                    cipher.legacy_ciphertext,
                ],
            )?;
            Ok(n > 0)
        })
    }

    /// Mark everything `peer_id` sent to `reader_id` as seen. Returns the
    /// number of rows that changed.
    pub fn mark_seen(&self, reader_id: i64, peer_id: i64, seen_at: i64) -> Result<usize> {
        self.with_conn(|conn| {
            let n = conn.execute(
                "UPDATE messages SET seen = ?3
                 WHERE from_id = ?2 AND to_id = ?1 AND group_id IS NULL AND seen = 0",
                rusqlite::params![reader_id, peer_id, seen_at],
            )?;
            Ok(n)
        })
    }

    // -- Conversations --

    /// Bump the conversation for both participants.
    pub fn touch_conversation(&self, user_id: i64, peer_id: i64, time: i64) -> Result<()> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "INSERT INTO conversations (user_id, peer_id, time) VALUES (?1, ?2, ?3)
                 ON CONFLICT(user_id, peer_id) DO UPDATE SET time = excluded.time",
            )?;
            stmt.execute(rusqlite::params![user_id, peer_id, time])?;
            stmt.execute(rusqlite::params![peer_id, user_id, time])?;
            Ok(())
        })
    }

    pub fn list_conversations(&self, user_id: i64, limit: u32) -> Result<Vec<ConversationRow>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT c.peer_id, c.time,
                        (SELECT COUNT(*) FROM messages m
                          WHERE m.from_id = c.peer_id AND m.to_id = c.user_id
                            AND m.group_id IS NULL AND m.seen = 0),
                        (SELECT MAX(m.id) FROM messages m
                          WHERE m.group_id IS NULL
                            AND ((m.from_id = c.user_id AND m.to_id = c.peer_id)
                              OR (m.from_id = c.peer_id AND m.to_id = c.user_id)))
                 FROM conversations c
                 WHERE c.user_id = ?1
                 ORDER BY c.time DESC
                 LIMIT ?2",
            )?;

            let rows = stmt
                .query_map(rusqlite::params![user_id, limit], |row| {
                    Ok(ConversationRow {
                        peer_id: row.get(0)?,
                        time: row.get(1)?,
                        unread: row.get(2)?,
                        last_message_id: row.get(3)?,
                    })
                })?
                .collect::<std::result::Result<Vec<_>, _>>()?;

            Ok(rows)
        })
    }
}

impl Database {
    // -- Call log --

    /// Log a call as ringing. Returns the row id.
    pub fn insert_call(&self, call: &NewCall) -> Result<i64> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO calls (room_name, from_id, to_id, group_id, call_type, status, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                rusqlite::params![
                    call.room_name,
                    call.from_id,
                    call.to_id,
                    call.group_id,
                    call.call_type.as_str(),
                    CallStatus::Ringing.as_str(),
                    call.created_at,
                ],
            )?;
            Ok(conn.last_insert_rowid())
        })
    }

    /// Move the room's latest call forward. Only ringing calls connect and
    /// only live calls finish, so a final status is never overwritten.
    /// Returns false when nothing changed.
    pub fn update_call_status(&self, room_name: &str, status: CallStatus, at: i64, reason: Option<&str>) -> Result<bool> {
        self.with_conn(|conn| {
            let n = match status {
                CallStatus::Ringing => 0,
                CallStatus::Connected => conn.execute(
                    &format!(
                        "UPDATE calls SET status = ?2, accepted_at = ?3
                         WHERE id = {} AND status = 'ringing'",
                        LATEST_CALL
                    ),
                    rusqlite::params![room_name, status.as_str(), at],
                )?,
                CallStatus::Rejected | CallStatus::Missed | CallStatus::Ended => conn.execute(
                    &format!(
                        "UPDATE calls SET status = ?2, ended_at = ?3, end_reason = ?4,
                                duration = CASE WHEN accepted_at IS NULL THEN 0 ELSE MAX(?3 - accepted_at, 0) END
                         WHERE id = {} AND status IN ('ringing', 'connected')",
                        LATEST_CALL
                    ),
                    rusqlite::params![room_name, status.as_str(), at, reason],
                )?,
            };
            Ok(n > 0)
        })
    }

    pub fn get_call(&self, room_name: &str) -> Result<Option<CallRow>> {
        self.with_conn(|conn| {
            let sql = format!("SELECT {} FROM calls WHERE id = {}", CALL_COLUMNS, LATEST_CALL);
            let row = conn.query_row(&sql, [room_name], call_from_row).optional()?;
            Ok(row)
        })
    }
}

fn call_from_row(row: &Row<'_>) -> rusqlite::Result<CallRow> {
    let status: String = row.get(6)?;
    Ok(CallRow {
        id: row.get(0)?,
        room_name: row.get(1)?,
        from_id: row.get(2)?,
        to_id: row.get(3)?,
        group_id: row.get(4)?,
        call_type: row.get(5)?,
        status: CallStatus::parse(&status).unwrap_or(CallStatus::Ended),
        created_at: row.get(7)?,
        accepted_at: row.get(8)?,
        ended_at: row.get(9)?,
        duration: row.get(10)?,
        end_reason: row.get(11)?,
    })
}

fn query_messages(conn: &Connection, sql: &str, params: impl rusqlite::Params) -> Result<Vec<MessageRow>> {
    let mut stmt = conn.prepare(sql)?;
    let rows = stmt
        .query_map(params, message_from_row)?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(rows)
}

fn message_from_row(row: &Row<'_>) -> rusqlite::Result<MessageRow> {
    let cipher_version = row
        .get::<_, Option<u8>>(5)?
        .and_then(|v| CipherVersion::try_from(v).ok());

    let media_type: Option<String> = row.get(13)?;
    let media_url: Option<String> = row.get(14)?;
    let thumbnail_url: Option<String> = row.get(15)?;
    let media = match (media_type, media_url) {
        (Some(media_type), Some(url)) => Some(MediaRef {
            media_type,
            url,
            thumbnail_url,
        }),
        _ => None,
    };

    Ok(MessageRow {
        id: row.get(0)?,
        from_id: row.get(1)?,
        to_id: row.get(2)?,
        group_id: row.get(3)?,
        cipher: CipherRecord {
            ciphertext: row.get(4)?,
            cipher_version,
            nonce: row.get(6)?,
            tag: row.get(7)?,
            legacy_ciphertext: row.get(8)?,
        },
        text_preview: row.get(9)?,
        time: row.get(10)?,
        seen: row.get(11)?,
        reply_id: row.get(12)?,
        media,
    })
}

fn split_media(media: Option<&MediaRef>) -> (Option<&str>, Option<&str>, Option<&str>) {
    match media {
        Some(m) => (Some(m.media_type.as_str()), Some(m.url.as_str()), m.thumbnail_url.as_deref()),
        None => (None, None, None),
    }
}

/// Extension trait for optional query results
trait OptionalExt<T> {
    fn optional(self) -> Result<Option<T>>;
}

impl<T> OptionalExt<T> for std::result::Result<T, rusqlite::Error> {
    fn optional(self) -> Result<Option<T>> {
        match self {
            Ok(val) => Ok(Some(val)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tandem_crypto::{CipherBridge, CipherVersion};

    const TS: i64 = 1754067404;

    fn new_direct(db: &Database, from: i64, to: i64, text: &str, time: i64) -> i64 {
        let cipher = CipherBridge::default()
            .seal_new(text, time, CipherVersion::V2Modern)
            .unwrap();
        db.insert_message(&NewMessage {
            from_id: from,
            to_id: Some(to),
            group_id: None,
            cipher,
            text_preview: text.to_string(),
            time,
            reply_id: None,
            media: None,
        })
        .unwrap()
    }

    #[test]
    fn insert_and_fetch_keeps_cipher_fields() {
        let db = Database::open_in_memory().unwrap();
        let id = new_direct(&db, 1, 2, "hello", TS);

        let row = db.get_message(id).unwrap().unwrap();
        assert_eq!(row.from_id, 1);
        assert_eq!(row.to_id, Some(2));
        assert_eq!(row.cipher.cipher_version, Some(CipherVersion::V2Modern));
        assert!(row.cipher.nonce.is_some());
        assert!(row.cipher.legacy_ciphertext.is_none());

        let text = CipherBridge::default()
            .decrypt_text(&row.cipher.primary(), row.time)
            .unwrap();
        assert_eq!(text, "hello");
        assert!(db.get_message(id + 100).unwrap().is_none());
    }

    #[test]
    fn history_is_newest_first_and_pages_backwards() {
        let db = Database::open_in_memory().unwrap();
        let a = new_direct(&db, 1, 2, "a", TS);
        let b = new_direct(&db, 2, 1, "b", TS + 1);
        let c = new_direct(&db, 1, 2, "c", TS + 2);
        new_direct(&db, 1, 3, "other", TS + 3);

        let page: Vec<i64> = db.get_history(1, 2, None, 10).unwrap().iter().map(|m| m.id).collect();
        assert_eq!(page, vec![c, b, a]);

        let older: Vec<i64> = db.get_history(2, 1, Some(c), 1).unwrap().iter().map(|m| m.id).collect();
        assert_eq!(older, vec![b]);
    }

    #[test]
    fn legacy_cache_and_representations_are_written() {
        let db = Database::open_in_memory().unwrap();
        let id = new_direct(&db, 1, 2, "hello", TS);

        assert!(db.store_legacy_ciphertext(id, "bGVnYWN5").unwrap());
        let row = db.get_message(id).unwrap().unwrap();
        assert_eq!(row.cipher.legacy_ciphertext.as_deref(), Some("bGVnYWN5"));

        let mut cipher = row.cipher.clone();
        cipher.ciphertext = "cmV3cml0dGVu".into();
        assert!(db.store_representations(id, &cipher).unwrap());
        assert_eq!(db.get_message(id).unwrap().unwrap().cipher, cipher);
    }

    #[test]
    fn pre_version_rows_have_no_explicit_version() {
        let db = Database::open_in_memory().unwrap();
        db.with_conn(|conn| {
            conn.execute(
                "INSERT INTO messages (id, from_id, to_id, text, time) VALUES (7, 1, 2, 'plain old text', 100)",
                [],
            )?;
            Ok(())
        })
        .unwrap();

        let row = db.get_message(7).unwrap().unwrap();
        assert_eq!(row.cipher.cipher_version, None);
        assert_eq!(row.cipher.detect_version(), CipherVersion::V1Legacy);
    }

    #[test]
    fn seen_and_conversations() {
        let db = Database::open_in_memory().unwrap();
        new_direct(&db, 2, 1, "x", TS);
        let last = new_direct(&db, 2, 1, "y", TS + 1);
        db.touch_conversation(1, 2, TS + 1).unwrap();

        let convs = db.list_conversations(1, 20).unwrap();
        assert_eq!(convs.len(), 1);
        assert_eq!(convs[0].peer_id, 2);
        assert_eq!(convs[0].unread, 2);
        assert_eq!(convs[0].last_message_id, Some(last));
        assert_eq!(db.list_conversations(2, 20).unwrap()[0].peer_id, 1);

        assert_eq!(db.mark_seen(1, 2, TS + 5).unwrap(), 2);
        assert_eq!(db.mark_seen(1, 2, TS + 6).unwrap(), 0);
        assert_eq!(db.list_conversations(1, 20).unwrap()[0].unread, 0);
    }

    fn ring(db: &Database, room: &str, at: i64) -> i64 {
        db.insert_call(&NewCall {
            room_name: room.into(),
            from_id: 1,
            to_id: Some(2),
            group_id: None,
            call_type: tandem_types::models::CallType::Video,
            created_at: at,
        })
        .unwrap()
    }

    #[test]
    fn call_log_lifecycle() {
        let db = Database::open_in_memory().unwrap();
        ring(&db, "r1", TS);

        let call = db.get_call("r1").unwrap().unwrap();
        assert_eq!(call.status, CallStatus::Ringing);
        assert_eq!(call.call_type, "video");
        assert!(call.accepted_at.is_none());

        assert!(db.update_call_status("r1", CallStatus::Connected, TS + 5, None).unwrap());
        assert!(!db.update_call_status("r1", CallStatus::Connected, TS + 6, None).unwrap());
        assert!(db.update_call_status("r1", CallStatus::Ended, TS + 65, Some("Call ended")).unwrap());

        let call = db.get_call("r1").unwrap().unwrap();
        assert_eq!(call.status, CallStatus::Ended);
        assert_eq!(call.accepted_at, Some(TS + 5));
        assert_eq!(call.ended_at, Some(TS + 65));
        assert_eq!(call.duration, Some(60));
        assert_eq!(call.end_reason.as_deref(), Some("Call ended"));

        assert!(!db.update_call_status("r1", CallStatus::Missed, TS + 70, None).unwrap());
        assert!(db.get_call("nope").unwrap().is_none());
    }

    #[test]
    fn reused_room_name_updates_newest_call() {
        let db = Database::open_in_memory().unwrap();
        ring(&db, "r1", TS);
        db.update_call_status("r1", CallStatus::Rejected, TS + 1, Some("busy")).unwrap();
        let second = ring(&db, "r1", TS + 10);

        assert!(db.update_call_status("r1", CallStatus::Missed, TS + 55, Some("No answer")).unwrap());
        let call = db.get_call("r1").unwrap().unwrap();
        assert_eq!(call.id, second);
        assert_eq!(call.status, CallStatus::Missed);
        assert_eq!(call.duration, Some(0));
    }

    #[test]
    fn users_upsert() {
        let db = Database::open_in_memory().unwrap();
        let mut alice = UserProfile { id: 1, username: "alice".into(), avatar: None };
        db.upsert_user(&alice).unwrap();
        alice.avatar = Some("a.png".into());
        db.upsert_user(&alice).unwrap();
        assert_eq!(db.get_user(1).unwrap(), Some(alice));
        assert_eq!(db.get_user(2).unwrap(), None);
    }
}
