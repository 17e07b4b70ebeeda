//! Compact wire schemas.
//!
//! Every message pushed over the gateway is rewritten from descriptive field
//! names to fixed short keys. The short keys are a contract with deployed
//! legacy clients and must not change. Direct and group messages differ only
//! in `t` (peer) vs `g` (group).

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use tandem_crypto::CipherVersion;

use crate::models::{Message, UserProfile};

/// Descriptive name -> short key, direct messages.
pub const DIRECT_KEYS: &[(&str, &str)] = &[
    ("from_id", "f"),
    ("to_id", "t"),
    ("message_text", "m"),
    ("timestamp", "ts"),
    ("sender_name", "sn"),
    ("sender_avatar", "sa"),
    ("media_type", "mt"),
    ("media_url", "mu"),
    ("thumbnail_url", "tu"),
    ("reply_to", "r"),
    ("id", "id"),
    ("iv", "iv"),
    ("tag", "tag"),
    ("cipher_version", "cv"),
];

/// Descriptive name -> short key, group messages.
pub const GROUP_KEYS: &[(&str, &str)] = &[
    ("from_id", "f"),
    ("group_id", "g"),
    ("message_text", "m"),
    ("timestamp", "ts"),
    ("sender_name", "sn"),
    ("sender_avatar", "sa"),
    ("media_type", "mt"),
    ("media_url", "mu"),
    ("thumbnail_url", "tu"),
    ("reply_to", "r"),
    ("id", "id"),
    ("iv", "iv"),
    ("tag", "tag"),
    ("cipher_version", "cv"),
];

/// Rewrite descriptive keys to short keys. Keys outside the table pass through.
pub fn minify_keys(object: &Map<String, Value>, table: &[(&str, &str)]) -> Map<String, Value> {
    rename_keys(object, table.iter().map(|(long, short)| (*long, *short)))
}

/// Exact inverse of [`minify_keys`] for the same table.
pub fn expand_keys(object: &Map<String, Value>, table: &[(&str, &str)]) -> Map<String, Value> {
    rename_keys(object, table.iter().map(|(long, short)| (*short, *long)))
}

fn rename_keys<'a>(
    object: &Map<String, Value>,
    pairs: impl Iterator<Item = (&'a str, &'a str)> + Clone,
) -> Map<String, Value> {
    object
        .iter()
        .map(|(key, value)| {
            let renamed = pairs
                .clone()
                .find(|(from, _)| *from == key.as_str())
                .map(|(_, to)| to.to_string())
                .unwrap_or_else(|| key.clone());
            (renamed, value.clone())
        })
        .collect()
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DirectMessage {
    pub from_id: i64,
    pub to_id: i64,
    pub message_text: String,
    pub timestamp: i64,
    pub sender_name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sender_avatar: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub media_type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub media_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub thumbnail_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reply_to: Option<i64>,
    pub id: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub iv: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tag: Option<String>,
    pub cipher_version: CipherVersion,
}

impl DirectMessage {
    /// `None` for group messages.
    pub fn from_message(message: &Message, sender: &UserProfile) -> Option<Self> {
        let media = message.media.as_ref();
        Some(Self {
            from_id: message.from_id,
            to_id: message.to_id?,
            message_text: message.text.clone(),
            timestamp: message.time,
            sender_name: sender.username.clone(),
            sender_avatar: sender.avatar.clone(),
            media_type: media.map(|m| m.media_type.clone()),
            media_url: media.map(|m| m.url.clone()),
            thumbnail_url: media.and_then(|m| m.thumbnail_url.clone()),
            reply_to: message.reply_id,
            id: message.id,
            iv: message.iv.clone(),
            tag: message.tag.clone(),
            cipher_version: message.cipher_version,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GroupMessage {
    pub from_id: i64,
    pub group_id: i64,
    pub message_text: String,
    pub timestamp: i64,
    pub sender_name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sender_avatar: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub media_type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub media_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub thumbnail_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reply_to: Option<i64>,
    pub id: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub iv: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tag: Option<String>,
    pub cipher_version: CipherVersion,
}

impl GroupMessage {
    /// `None` for direct messages.
    pub fn from_message(message: &Message, sender: &UserProfile) -> Option<Self> {
        let media = message.media.as_ref();
        Some(Self {
            from_id: message.from_id,
            group_id: message.group_id?,
            message_text: message.text.clone(),
            timestamp: message.time,
            sender_name: sender.username.clone(),
            sender_avatar: sender.avatar.clone(),
            media_type: media.map(|m| m.media_type.clone()),
            media_url: media.map(|m| m.url.clone()),
            thumbnail_url: media.and_then(|m| m.thumbnail_url.clone()),
            reply_to: message.reply_id,
            id: message.id,
            iv: message.iv.clone(),
            tag: message.tag.clone(),
            cipher_version: message.cipher_version,
        })
    }
}

/// Compact direct message: `{f,t,m,ts,sn,sa,mt,mu,tu,r,id,iv,tag,cv}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MinDirect {
    pub f: i64,
    pub t: i64,
    pub m: String,
    pub ts: i64,
    pub sn: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sa: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mt: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mu: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tu: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub r: Option<i64>,
    pub id: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub iv: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tag: Option<String>,
    pub cv: CipherVersion,
}

/// Compact group message: the direct schema with `g` in place of `t`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MinGroup {
    pub f: i64,
    pub g: i64,
    pub m: String,
    pub ts: i64,
    pub sn: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sa: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mt: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mu: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tu: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub r: Option<i64>,
    pub id: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub iv: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tag: Option<String>,
    pub cv: CipherVersion,
}

impl From<DirectMessage> for MinDirect {
    fn from(m: DirectMessage) -> Self {
        Self {
            f: m.from_id,
            t: m.to_id,
            m: m.message_text,
            ts: m.timestamp,
            sn: m.sender_name,
            sa: m.sender_avatar,
            mt: m.media_type,
            mu: m.media_url,
            tu: m.thumbnail_url,
            r: m.reply_to,
            id: m.id,
            iv: m.iv,
            tag: m.tag,
            cv: m.cipher_version,
        }
    }
}

impl From<MinDirect> for DirectMessage {
    fn from(m: MinDirect) -> Self {
        Self {
            from_id: m.f,
            to_id: m.t,
            message_text: m.m,
            timestamp: m.ts,
            sender_name: m.sn,
            sender_avatar: m.sa,
            media_type: m.mt,
            media_url: m.mu,
            thumbnail_url: m.tu,
            reply_to: m.r,
            id: m.id,
            iv: m.iv,
            tag: m.tag,
            cipher_version: m.cv,
        }
    }
}

impl From<GroupMessage> for MinGroup {
    fn from(m: GroupMessage) -> Self {
        Self {
            f: m.from_id,
            g: m.group_id,
            m: m.message_text,
            ts: m.timestamp,
            sn: m.sender_name,
            sa: m.sender_avatar,
            mt: m.media_type,
            mu: m.media_url,
            tu: m.thumbnail_url,
            r: m.reply_to,
            id: m.id,
            iv: m.iv,
            tag: m.tag,
            cv: m.cipher_version,
        }
    }
}

impl From<MinGroup> for GroupMessage {
    fn from(m: MinGroup) -> Self {
        Self {
            from_id: m.f,
            group_id: m.g,
            message_text: m.m,
            timestamp: m.ts,
            sender_name: m.sn,
            sender_avatar: m.sa,
            media_type: m.mt,
            media_url: m.mu,
            thumbnail_url: m.tu,
            reply_to: m.r,
            id: m.id,
            iv: m.iv,
            tag: m.tag,
            cipher_version: m.cv,
        }
    }
}

/// Typing indicator: `{f,t,ty}`, or `{f,g,ty}` inside a group.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MinTyping {
    pub f: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub t: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub g: Option<i64>,
    pub ty: bool,
}

/// Presence change: `{u,o,l}`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MinPresence {
    pub u: i64,
    pub o: bool,
    /// Last seen, unix seconds.
    pub l: i64,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn direct() -> DirectMessage {
        DirectMessage {
            from_id: 1,
            to_id: 2,
            message_text: "Y2lwaGVydGV4dA==".into(),
            timestamp: 1754067404,
            sender_name: "alice".into(),
            sender_avatar: Some("upload/a.png".into()),
            media_type: None,
            media_url: None,
            thumbnail_url: None,
            reply_to: Some(9),
            id: 42,
            iv: Some("bm9uY2U=".into()),
            tag: Some("dGFn".into()),
            cipher_version: CipherVersion::V2Modern,
        }
    }

    fn group() -> GroupMessage {
        GroupMessage {
            from_id: 1,
            group_id: 77,
            message_text: "hi".into(),
            timestamp: 1754067404,
            sender_name: "alice".into(),
            sender_avatar: None,
            media_type: Some("image".into()),
            media_url: Some("upload/p.jpg".into()),
            thumbnail_url: Some("upload/p_t.jpg".into()),
            reply_to: None,
            id: 43,
            iv: None,
            tag: None,
            cipher_version: CipherVersion::V1Legacy,
        }
    }

    #[test]
    fn expand_inverts_minify() {
        let d = direct();
        assert_eq!(DirectMessage::from(MinDirect::from(d.clone())), d);
        let g = group();
        assert_eq!(GroupMessage::from(MinGroup::from(g.clone())), g);
    }

    #[test]
    fn key_tables_agree_with_typed_schemas() {
        let long = serde_json::to_value(direct()).unwrap();
        let short = serde_json::to_value(MinDirect::from(direct())).unwrap();
        let minified = minify_keys(long.as_object().unwrap(), DIRECT_KEYS);
        assert_eq!(Value::Object(minified), short);
        let expanded = expand_keys(short.as_object().unwrap(), DIRECT_KEYS);
        assert_eq!(Value::Object(expanded), long);

        let long = serde_json::to_value(group()).unwrap();
        let short = serde_json::to_value(MinGroup::from(group())).unwrap();
        assert_eq!(Value::Object(minify_keys(long.as_object().unwrap(), GROUP_KEYS)), short);
    }

    #[test]
    fn group_schema_uses_g_not_t() {
        let short = serde_json::to_value(MinGroup::from(group())).unwrap();
        assert_eq!(short["g"], 77);
        assert!(short.get("t").is_none());
        assert_eq!(short["cv"], 1);
    }

    #[test]
    fn unknown_keys_pass_through() {
        let mut obj = Map::new();
        obj.insert("from_id".into(), Value::from(1));
        obj.insert("extra".into(), Value::from("x"));
        let min = minify_keys(&obj, DIRECT_KEYS);
        assert_eq!(min["f"], 1);
        assert_eq!(min["extra"], "x");
    }

    #[test]
    fn typing_and_presence_are_compact() {
        let typing = MinTyping { f: 1, t: Some(2), g: None, ty: true };
        assert_eq!(serde_json::to_string(&typing).unwrap(), r#"{"f":1,"t":2,"ty":true}"#);
        let presence = MinPresence { u: 5, o: false, l: 100 };
        assert_eq!(serde_json::to_string(&presence).unwrap(), r#"{"u":5,"o":false,"l":100}"#);
    }
}
