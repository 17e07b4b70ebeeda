use serde::{Deserialize, Serialize};

use tandem_crypto::CipherVersion;

/// Display data for a user, owned by the external profile service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserProfile {
    pub id: i64,
    pub username: String,
    pub avatar: Option<String>,
}

impl UserProfile {
    /// Placeholder used when the profile row is missing.
    pub fn unknown(id: i64) -> Self {
        Self {
            id,
            username: format!("user{}", id),
            avatar: None,
        }
    }
}

/// Attachment reference. Storage layout is handled elsewhere.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MediaRef {
    pub media_type: String,
    pub url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub thumbnail_url: Option<String>,
}

/// A message as served to one reader, in that reader's cipher generation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub id: i64,
    pub from_id: i64,
    pub to_id: Option<i64>,
    pub group_id: Option<i64>,
    /// Ciphertext (or an undecryptable marker), never plaintext for
    /// encrypted rows.
    pub text: String,
    pub cipher_version: CipherVersion,
    pub iv: Option<String>,
    pub tag: Option<String>,
    /// Unix seconds. Also the key input for both cipher generations.
    pub time: i64,
    /// Unix seconds when the recipient saw it, 0 if unseen.
    pub seen: i64,
    pub reply_id: Option<i64>,
    pub media: Option<MediaRef>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Conversation {
    pub peer: UserProfile,
    pub last_message: Option<Message>,
    pub time: i64,
    pub unread: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CallType {
    #[default]
    Audio,
    Video,
}

impl CallType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Audio => "audio",
            Self::Video => "video",
        }
    }
}

/// How a connection reaches the gateway.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Transport {
    /// Persistent websocket.
    Stream,
    /// Long-polling fallback.
    Poll,
}

/// `urls` is a single string for discovery-only entries and a list for relays.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum IceUrls {
    One(String),
    Many(Vec<String>),
}

/// One entry of a WebRTC `iceServers` list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IceServer {
    pub urls: IceUrls,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub credential: Option<String>,
}

impl IceServer {
    pub fn stun(url: impl Into<String>) -> Self {
        Self {
            urls: IceUrls::One(url.into()),
            username: None,
            credential: None,
        }
    }

    pub fn relay(urls: Vec<String>, username: &str, credential: &str) -> Self {
        Self {
            urls: IceUrls::Many(urls),
            username: Some(username.to_string()),
            credential: Some(credential.to_string()),
        }
    }

    pub fn is_relay(&self) -> bool {
        self.credential.is_some()
    }
}
