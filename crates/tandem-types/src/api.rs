use serde::{Deserialize, Serialize};

use crate::models::{Conversation, IceServer, MediaRef, Message};

// -- JWT Claims --

/// Bearer token claims, shared by the REST middleware and the gateway
/// handshake. `sub` is the numeric user id.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    pub sub: i64,
    pub exp: usize,
}

// -- Chat --

#[derive(Debug, Deserialize)]
pub struct HistoryQuery {
    pub peer_id: Option<i64>,
    pub group_id: Option<i64>,
    pub before_id: Option<i64>,
    pub limit: Option<u32>,
    pub use_gcm: Option<bool>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct HistoryResponse {
    pub messages: Vec<Message>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SendMessageRequest {
    pub to_id: Option<i64>,
    pub group_id: Option<i64>,
    pub text: String,
    pub reply_id: Option<i64>,
    pub media: Option<MediaRef>,
    pub use_gcm: Option<bool>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct SendMessageResponse {
    pub message: Message,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SeenRequest {
    pub peer_id: i64,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct SeenResponse {
    pub updated: usize,
    pub seen: i64,
}

#[derive(Debug, Deserialize)]
pub struct ConversationsQuery {
    pub limit: Option<u32>,
    pub use_gcm: Option<bool>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ConversationsResponse {
    pub conversations: Vec<Conversation>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TypingRequest {
    pub to_id: Option<i64>,
    pub group_id: Option<i64>,
    #[serde(default = "default_true")]
    pub typing: bool,
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Serialize, Deserialize)]
pub struct TypingResponse {
    /// False when the throttle swallowed the event.
    pub delivered: bool,
}

// -- Calls --

#[derive(Debug, Serialize, Deserialize)]
pub struct IceServersResponse {
    pub ice_servers: Vec<IceServer>,
    pub expires_at: i64,
}
