//! Database row types. These map directly to SQLite rows and stay
//! independent of the wire models in tandem-types.

use tandem_crypto::CipherRecord;
use tandem_types::models::{CallType, MediaRef};

pub struct MessageRow {
    pub id: i64,
    pub from_id: i64,
    pub to_id: Option<i64>,
    pub group_id: Option<i64>,
    /// `text`, `cipher_version`, `iv`, `tag`, `text_ecb`.
    pub cipher: CipherRecord,
    pub text_preview: String,
    pub time: i64,
    pub seen: i64,
    pub reply_id: Option<i64>,
    pub media: Option<MediaRef>,
}

/// Insert payload for a freshly sealed message.
pub struct NewMessage {
    pub from_id: i64,
    pub to_id: Option<i64>,
    pub group_id: Option<i64>,
    pub cipher: CipherRecord,
    pub text_preview: String,
    pub time: i64,
    pub reply_id: Option<i64>,
    pub media: Option<MediaRef>,
}

pub struct ConversationRow {
    pub peer_id: i64,
    pub time: i64,
    pub unread: i64,
    pub last_message_id: Option<i64>,
}

/// Call log status. Ringing and connected are live; the rest are final.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallStatus {
    Ringing,
    Connected,
    Rejected,
    Missed,
    Ended,
}

impl CallStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Ringing => "ringing",
            Self::Connected => "connected",
            Self::Rejected => "rejected",
            Self::Missed => "missed",
            Self::Ended => "ended",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "ringing" => Some(Self::Ringing),
            "connected" => Some(Self::Connected),
            "rejected" => Some(Self::Rejected),
            "missed" => Some(Self::Missed),
            "ended" => Some(Self::Ended),
            _ => None,
        }
    }
}

pub struct NewCall {
    pub room_name: String,
    pub from_id: i64,
    /// Callee of a 1:1 call, `None` for group calls.
    pub to_id: Option<i64>,
    pub group_id: Option<i64>,
    pub call_type: CallType,
    pub created_at: i64,
}

pub struct CallRow {
    pub id: i64,
    pub room_name: String,
    pub from_id: i64,
    pub to_id: Option<i64>,
    pub group_id: Option<i64>,
    pub call_type: String,
    pub status: CallStatus,
    pub created_at: i64,
    pub accepted_at: Option<i64>,
    pub ended_at: Option<i64>,
    /// Seconds between accept and end; 0 for calls never answered.
    pub duration: Option<i64>,
    pub end_reason: Option<String>,
}
