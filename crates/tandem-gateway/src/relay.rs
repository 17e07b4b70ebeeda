use std::sync::Arc;

use anyhow::anyhow;
use thiserror::Error;
use tracing::{debug, info, warn};
use uuid::Uuid;

use tandem_crypto::{CipherBridge, CipherError, CipherVersion, ClientGeneration, Recovered, Sealed, preview};
use tandem_db::Database;
use tandem_db::models::{MessageRow, NewMessage};
use tandem_types::events::{Echo, Notification, OutgoingDirect, OutgoingGroup, ServerEvent, TypingTarget};
use tandem_types::models::{Conversation, Message, UserProfile};
use tandem_types::wire::{DirectMessage, GroupMessage, MinPresence, MinTyping};

use crate::registry::{Registry, group_room};
use crate::throttle::AdaptiveThrottle;

#[derive(Debug, Error)]
pub enum RelayError {
    #[error("message has neither text nor media")]
    EmptyMessage,
    #[error(transparent)]
    Cipher(#[from] CipherError),
    #[error(transparent)]
    Storage(#[from] anyhow::Error),
}

/// Run a blocking DB call off the async runtime.
pub async fn with_db<T, F>(db: &Arc<Database>, f: F) -> anyhow::Result<T>
where
    F: FnOnce(&Database) -> anyhow::Result<T> + Send + 'static,
    T: Send + 'static,
{
    let db = db.clone();
    tokio::task::spawn_blocking(move || f(&db))
        .await
        .map_err(|e| anyhow!("spawn_blocking join error: {}", e))?
}

pub struct SeenOutcome {
    pub updated: usize,
    pub seen: i64,
}

/// Send pipeline and fan-out for chat traffic.
///
/// Messages are sealed in the sender's generation, persisted, then pushed to
/// every live connection in the generation that connection speaks. Delivery
/// is at-most-once; clients fill gaps from history.
#[derive(Clone)]
pub struct MessageRelay {
    registry: Registry,
    db: Arc<Database>,
    bridge: CipherBridge,
    throttle: Arc<AdaptiveThrottle>,
}

impl MessageRelay {
    pub fn new(registry: Registry, db: Arc<Database>, bridge: CipherBridge, throttle: Arc<AdaptiveThrottle>) -> Self {
        Self {
            registry,
            db,
            bridge,
            throttle,
        }
    }

    pub fn bridge(&self) -> &CipherBridge {
        &self.bridge
    }

    /// Display data for a user, or a placeholder if the profile is missing.
    pub async fn profile(&self, user_id: i64) -> UserProfile {
        match with_db(&self.db, move |db| db.get_user(user_id)).await {
            Ok(Some(profile)) => profile,
            Ok(None) => UserProfile::unknown(user_id),
            Err(e) => {
                warn!("Profile lookup for {} failed: {}", user_id, e);
                UserProfile::unknown(user_id)
            }
        }
    }

    // -- Send --

    /// `origin` is the sending connection, if the message came over the
    /// gateway; it is skipped by the echo.
    pub async fn send_direct(
        &self,
        sender: &UserProfile,
        origin: Option<Uuid>,
        generation: ClientGeneration,
        msg: OutgoingDirect,
    ) -> Result<Message, RelayError> {
        if msg.text.trim().is_empty() && msg.media.is_none() {
            return Err(RelayError::EmptyMessage);
        }

        let now = chrono::Utc::now().timestamp();
        let cipher = self.bridge.seal_new(&msg.text, now, generation.cipher_version())?;
        let text_preview = preview(&msg.text);

        let new = NewMessage {
            from_id: sender.id,
            to_id: Some(msg.to_id),
            group_id: None,
            cipher: cipher.clone(),
            text_preview: text_preview.clone(),
            time: now,
            reply_id: msg.reply_id,
            media: msg.media.clone(),
        };
        let (from_id, to_id) = (sender.id, msg.to_id);
        let id = with_db(&self.db, move |db| {
            let id = db.insert_message(&new)?;
            db.touch_conversation(from_id, to_id, now)?;
            Ok(id)
        })
        .await?;

        info!("Message {} from {} to {} stored as {:?}", id, from_id, to_id, cipher.cipher_version);

        let mut row = MessageRow {
            id,
            from_id,
            to_id: Some(to_id),
            group_id: None,
            cipher,
            text_preview: text_preview.clone(),
            time: now,
            seen: 0,
            reply_id: msg.reply_id,
            media: msg.media,
        };

        // Delivery to every device of the recipient
        for (conn_id, reader_generation) in self.registry.user_generations(to_id).await {
            let rendered = self.render(&mut row, reader_generation).await;
            if let Some(direct) = DirectMessage::from_message(&rendered, sender) {
                self.registry.send_to(conn_id, ServerEvent::PrivateMessage(direct.into())).await;
            }
        }

        self.registry
            .emit_to_user(
                to_id,
                ServerEvent::Notification(Notification {
                    id,
                    username: sender.username.clone(),
                    avatar: sender.avatar.clone(),
                    message: text_preview,
                    status: 200,
                }),
            )
            .await;

        // Echo to the sender's other devices
        for (conn_id, reader_generation) in self.registry.user_generations(from_id).await {
            if Some(conn_id) == origin {
                continue;
            }
            let rendered = self.render(&mut row, reader_generation).await;
            if let Some(direct) = DirectMessage::from_message(&rendered, sender) {
                let echo = Echo {
                    message: direct.into(),
                    is_self: true,
                };
                self.registry.send_to(conn_id, ServerEvent::NewMessage(echo)).await;
            }
        }

        Ok(self.render(&mut row, generation).await)
    }

    pub async fn send_group(
        &self,
        sender: &UserProfile,
        origin: Option<Uuid>,
        generation: ClientGeneration,
        msg: OutgoingGroup,
    ) -> Result<Message, RelayError> {
        if msg.text.trim().is_empty() && msg.media.is_none() {
            return Err(RelayError::EmptyMessage);
        }

        let now = chrono::Utc::now().timestamp();
        let cipher = self.bridge.seal_new(&msg.text, now, generation.cipher_version())?;

        let new = NewMessage {
            from_id: sender.id,
            to_id: None,
            group_id: Some(msg.group_id),
            cipher: cipher.clone(),
            text_preview: preview(&msg.text),
            time: now,
            reply_id: msg.reply_id,
            media: msg.media.clone(),
        };
        let id = with_db(&self.db, move |db| db.insert_message(&new)).await?;

        debug!("Group message {} from {} to group {}", id, sender.id, msg.group_id);

        let mut row = MessageRow {
            id,
            from_id: sender.id,
            to_id: None,
            group_id: Some(msg.group_id),
            cipher,
            text_preview: String::new(),
            time: now,
            seen: 0,
            reply_id: msg.reply_id,
            media: msg.media,
        };

        for (conn_id, reader_generation) in self.registry.room_generations(&group_room(msg.group_id)).await {
            if Some(conn_id) == origin {
                continue;
            }
            let rendered = self.render(&mut row, reader_generation).await;
            if let Some(group) = GroupMessage::from_message(&rendered, sender) {
                self.registry.send_to(conn_id, ServerEvent::GroupMessage(group.into())).await;
            }
        }

        Ok(self.render(&mut row, generation).await)
    }

    // -- History --

    pub async fn history(
        &self,
        reader: i64,
        generation: ClientGeneration,
        peer_id: i64,
        before_id: Option<i64>,
        limit: u32,
    ) -> anyhow::Result<Vec<Message>> {
        let rows = with_db(&self.db, move |db| db.get_history(reader, peer_id, before_id, limit)).await?;
        self.render_all(rows, generation).await
    }

    pub async fn group_history(
        &self,
        generation: ClientGeneration,
        group_id: i64,
        before_id: Option<i64>,
        limit: u32,
    ) -> anyhow::Result<Vec<Message>> {
        let rows = with_db(&self.db, move |db| db.get_group_history(group_id, before_id, limit)).await?;
        self.render_all(rows, generation).await
    }

    pub async fn conversations(
        &self,
        user_id: i64,
        generation: ClientGeneration,
        limit: u32,
    ) -> anyhow::Result<Vec<Conversation>> {
        let rows = with_db(&self.db, move |db| {
            let mut out = Vec::new();
            for conv in db.list_conversations(user_id, limit)? {
                let peer = db.get_user(conv.peer_id)?.unwrap_or_else(|| UserProfile::unknown(conv.peer_id));
                let last = match conv.last_message_id {
                    Some(id) => db.get_message(id)?,
                    None => None,
                };
                out.push((conv, peer, last));
            }
            Ok(out)
        })
        .await?;

        let mut conversations = Vec::with_capacity(rows.len());
        for (conv, peer, last) in rows {
            let last_message = match last {
                Some(mut row) => Some(self.render(&mut row, generation).await),
                None => None,
            };
            conversations.push(Conversation {
                peer,
                last_message,
                time: conv.time,
                unread: conv.unread,
            });
        }
        Ok(conversations)
    }

    async fn render_all(&self, rows: Vec<MessageRow>, generation: ClientGeneration) -> anyhow::Result<Vec<Message>> {
        let mut messages = Vec::with_capacity(rows.len());
        for mut row in rows {
            messages.push(self.render(&mut row, generation).await);
        }
        Ok(messages)
    }

    /// Render a stored message for a reader of `generation`, transcoding and
    /// caching the representation on first use.
    pub async fn render(&self, row: &mut MessageRow, generation: ClientGeneration) -> Message {
        let target = generation.cipher_version();
        match self.bridge.render_for(&mut row.cipher, row.time, target) {
            Ok((sealed, changed)) => {
                if changed {
                    self.cache_representation(row, target).await;
                }
                to_message(row, sealed)
            }
            Err(e) => {
                warn!("Message {} cannot be served as {:?}: {}", row.id, target, e);
                let mut primary = row.cipher.primary();
                primary.ciphertext = Recovered::Undecryptable.into_display();
                primary.nonce = None;
                primary.tag = None;
                to_message(row, primary)
            }
        }
    }

    /// Best effort: a failed write only means the next reader transcodes again.
    async fn cache_representation(&self, row: &MessageRow, target: CipherVersion) {
        let id = row.id;
        let cipher = row.cipher.clone();
        let result = with_db(&self.db, move |db| match target {
            CipherVersion::V1Legacy => {
                let legacy = cipher.legacy_ciphertext.unwrap_or_default();
                db.store_legacy_ciphertext(id, &legacy)
            }
            CipherVersion::V2Modern => db.store_representations(id, &cipher),
        })
        .await;

        match result {
            Ok(_) => debug!("Cached {:?} form of message {}", target, id),
            Err(e) => warn!("Could not cache {:?} form of message {}: {}", target, id, e),
        }
    }

    // -- Ephemeral events --

    /// Returns false when the event was throttled or had no target.
    pub async fn typing(&self, from: i64, origin: Option<Uuid>, target: TypingTarget, typing: bool) -> bool {
        let indicator = MinTyping {
            f: from,
            t: target.to_id,
            g: target.group_id,
            ty: typing,
        };
        let event = if typing {
            ServerEvent::Typing(indicator)
        } else {
            ServerEvent::TypingDone(indicator)
        };

        match (target.group_id, target.to_id) {
            (Some(group_id), _) => {
                if typing && !self.throttle.can_send_group_typing(from, group_id) {
                    return false;
                }
                self.registry.emit_except(&group_room(group_id), origin, event).await;
                true
            }
            (None, Some(to_id)) => {
                if typing && !self.throttle.can_send_typing(from, to_id) {
                    return false;
                }
                self.registry.emit_to_user(to_id, event).await;
                true
            }
            (None, None) => false,
        }
    }

    /// Tell everyone else a user came online or went offline. Online
    /// announcements are throttled; offline is always delivered.
    pub async fn presence(&self, user_id: i64, online: bool) -> bool {
        if online && !self.throttle.can_send_online_status(user_id) {
            debug!("Presence for {} throttled", user_id);
            return false;
        }
        let presence = MinPresence {
            u: user_id,
            o: online,
            l: chrono::Utc::now().timestamp(),
        };
        let event = if online {
            ServerEvent::UserOnline(presence)
        } else {
            ServerEvent::UserOffline(presence)
        };
        self.registry.broadcast_except_user(user_id, event).await;
        true
    }

    /// Mark a conversation read and tell the peer.
    pub async fn mark_seen(&self, reader: i64, peer_id: i64) -> anyhow::Result<SeenOutcome> {
        let seen = chrono::Utc::now().timestamp();
        let updated = with_db(&self.db, move |db| db.mark_seen(reader, peer_id, seen)).await?;
        self.last_seen(reader, peer_id, seen).await;
        Ok(SeenOutcome { updated, seen })
    }

    pub async fn last_seen(&self, reader: i64, peer_id: i64, seen: i64) {
        self.registry
            .emit_to_user(
                peer_id,
                ServerEvent::LastSeen {
                    can_seen: 1,
                    seen,
                    user_id: reader,
                },
            )
            .await;
    }

    pub async fn message_seen(&self, reader: i64, message_id: i64, from_id: i64) {
        self.registry
            .emit_to_user(
                from_id,
                ServerEvent::MessageSeen {
                    message_id,
                    seen_by: reader,
                    seen_at: chrono::Utc::now().timestamp(),
                },
            )
            .await;
    }
}

fn to_message(row: &MessageRow, sealed: Sealed) -> Message {
    Message {
        id: row.id,
        from_id: row.from_id,
        to_id: row.to_id,
        group_id: row.group_id,
        text: sealed.ciphertext,
        cipher_version: sealed.version,
        iv: sealed.nonce,
        tag: sealed.tag,
        time: row.time,
        seen: row.seen,
        reply_id: row.reply_id,
        media: row.media.clone(),
    }
}
