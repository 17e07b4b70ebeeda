use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

use tandem_crypto::CipherVersion;

use crate::models::{CallType, IceServer, MediaRef, Transport};
use crate::wire::{DIRECT_KEYS, GROUP_KEYS, MinDirect, MinGroup, MinPresence, MinTyping, expand_keys};

/// Events sent FROM client TO server over the gateway.
///
/// Framed as `{"event": "<name>", "data": {...}}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "event", content = "data")]
pub enum ClientCommand {
    /// Authenticate a connection that did not carry a token on upgrade.
    #[serde(rename = "join")]
    Join {
        access_token: String,
        #[serde(default)]
        use_gcm: Option<bool>,
    },

    #[serde(rename = "typing")]
    Typing(TypingTarget),

    #[serde(rename = "typing_done")]
    TypingDone(TypingTarget),

    #[serde(rename = "private_message")]
    PrivateMessage(OutgoingDirect),

    #[serde(rename = "group_message")]
    GroupMessage(OutgoingGroup),

    #[serde(rename = "join_group")]
    JoinGroup { group_id: i64 },

    #[serde(rename = "leave_group")]
    LeaveGroup { group_id: i64 },

    /// "I am looking at this conversation now."
    #[serde(rename = "lastseen")]
    LastSeen { peer_id: i64 },

    /// Mark everything `peer_id` sent us as seen.
    #[serde(rename = "seen_messages")]
    SeenMessages { peer_id: i64 },

    /// Per-message read receipt relayed to the original sender.
    #[serde(rename = "message_seen")]
    MessageSeen { message_id: i64, from_id: i64 },

    #[serde(rename = "get_online_users")]
    GetOnlineUsers,

    /// Application-level latency check for clients that cannot see
    /// websocket pings. `sent_at` is client milliseconds, echoed back.
    #[serde(rename = "ping_latency")]
    PingLatency {
        sent_at: i64,
        #[serde(default)]
        latency_ms: Option<u64>,
    },

    #[serde(rename = "transport_upgrade")]
    TransportUpgrade { transport: Transport },

    #[serde(rename = "call:initiate")]
    CallInitiate(CallInitiate),

    #[serde(rename = "group_call:initiate")]
    GroupCallInitiate(GroupCallInitiate),

    #[serde(rename = "call:accept")]
    CallAccept(CallAccept),

    #[serde(rename = "call:reject")]
    CallReject(RoomReason),

    #[serde(rename = "call:end")]
    CallEnd(RoomReason),

    #[serde(rename = "ice:candidate")]
    IceCandidate(IceCandidateSend),

    #[serde(rename = "call:toggle_audio")]
    ToggleAudio(ToggleMedia),

    #[serde(rename = "call:toggle_video")]
    ToggleVideo(ToggleMedia),
}

impl ClientCommand {
    /// Event name as it appears on the wire, for logging.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Join { .. } => "join",
            Self::Typing(_) => "typing",
            Self::TypingDone(_) => "typing_done",
            Self::PrivateMessage(_) => "private_message",
            Self::GroupMessage(_) => "group_message",
            Self::JoinGroup { .. } => "join_group",
            Self::LeaveGroup { .. } => "leave_group",
            Self::LastSeen { .. } => "lastseen",
            Self::SeenMessages { .. } => "seen_messages",
            Self::MessageSeen { .. } => "message_seen",
            Self::GetOnlineUsers => "get_online_users",
            Self::PingLatency { .. } => "ping_latency",
            Self::TransportUpgrade { .. } => "transport_upgrade",
            Self::CallInitiate(_) => "call:initiate",
            Self::GroupCallInitiate(_) => "group_call:initiate",
            Self::CallAccept(_) => "call:accept",
            Self::CallReject(_) => "call:reject",
            Self::CallEnd(_) => "call:end",
            Self::IceCandidate(_) => "ice:candidate",
            Self::ToggleAudio(_) => "call:toggle_audio",
            Self::ToggleVideo(_) => "call:toggle_video",
        }
    }
}

/// Typing target. Exactly one of the two is expected.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct TypingTarget {
    #[serde(default)]
    pub to_id: Option<i64>,
    #[serde(default)]
    pub group_id: Option<i64>,
}

/// A direct message as submitted by its sender, plaintext over TLS.
///
/// Accepts both the descriptive form and the compact `{t,m,r,mt,mu,tu}`
/// form legacy clients send.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(try_from = "Map<String, Value>")]
pub struct OutgoingDirect {
    pub to_id: i64,
    pub text: String,
    pub reply_id: Option<i64>,
    pub media: Option<MediaRef>,
}

/// Group counterpart of [`OutgoingDirect`]; compact form uses `g`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(try_from = "Map<String, Value>")]
pub struct OutgoingGroup {
    pub group_id: i64,
    pub text: String,
    pub reply_id: Option<i64>,
    pub media: Option<MediaRef>,
}

/// Submitted message fields after short keys are expanded.
#[derive(Deserialize)]
struct Submitted {
    #[serde(default)]
    to_id: Option<i64>,
    #[serde(default)]
    group_id: Option<i64>,
    #[serde(default, alias = "message_text")]
    text: String,
    #[serde(default, alias = "reply_to")]
    reply_id: Option<i64>,
    #[serde(default)]
    media: Option<MediaRef>,
    #[serde(default)]
    media_type: Option<String>,
    #[serde(default)]
    media_url: Option<String>,
    #[serde(default)]
    thumbnail_url: Option<String>,
}

impl Submitted {
    fn parse(object: Map<String, Value>, table: &[(&str, &str)]) -> Result<Self, String> {
        let expanded = expand_keys(&object, table);
        serde_json::from_value(Value::Object(expanded)).map_err(|e| e.to_string())
    }

    /// Nested `media` wins over the flat compact fields.
    fn media(&mut self) -> Option<MediaRef> {
        self.media.take().or_else(|| match (self.media_type.take(), self.media_url.take()) {
            (Some(media_type), Some(url)) => Some(MediaRef {
                media_type,
                url,
                thumbnail_url: self.thumbnail_url.take(),
            }),
            _ => None,
        })
    }
}

impl TryFrom<Map<String, Value>> for OutgoingDirect {
    type Error = String;

    fn try_from(object: Map<String, Value>) -> Result<Self, Self::Error> {
        let mut fields = Submitted::parse(object, DIRECT_KEYS)?;
        let to_id = fields.to_id.ok_or("missing field `to_id`")?;
        let media = fields.media();
        Ok(Self {
            to_id,
            text: fields.text,
            reply_id: fields.reply_id,
            media,
        })
    }
}

impl TryFrom<Map<String, Value>> for OutgoingGroup {
    type Error = String;

    fn try_from(object: Map<String, Value>) -> Result<Self, Self::Error> {
        let mut fields = Submitted::parse(object, GROUP_KEYS)?;
        let group_id = fields.group_id.ok_or("missing field `group_id`")?;
        let media = fields.media();
        Ok(Self {
            group_id,
            text: fields.text,
            reply_id: fields.reply_id,
            media,
        })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CallInitiate {
    pub to_id: i64,
    #[serde(default)]
    pub call_type: CallType,
    pub room_name: String,
    pub sdp_offer: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GroupCallInitiate {
    pub group_id: i64,
    #[serde(default)]
    pub call_type: CallType,
    pub room_name: String,
    pub sdp_offer: String,
    pub member_ids: Vec<i64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CallAccept {
    pub room_name: String,
    pub sdp_answer: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoomReason {
    pub room_name: String,
    #[serde(default)]
    pub reason: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IceCandidateSend {
    pub room_name: String,
    /// Opaque RTCIceCandidateInit, relayed untouched.
    pub candidate: Value,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToggleMedia {
    pub room_name: String,
    pub enabled: bool,
}

/// Events sent FROM server TO client.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "event", content = "data")]
pub enum ServerEvent {
    /// Connection authenticated and registered.
    #[serde(rename = "ready")]
    Ready {
        user_id: i64,
        conn_id: Uuid,
        cipher_version: CipherVersion,
    },

    /// Delivery to the recipient.
    #[serde(rename = "private_message")]
    PrivateMessage(MinDirect),

    /// Echo to the sender's other devices.
    #[serde(rename = "new_message")]
    NewMessage(Echo),

    #[serde(rename = "group_message")]
    GroupMessage(MinGroup),

    /// Lightweight notification for clients that do not render pushes.
    #[serde(rename = "notification")]
    Notification(Notification),

    #[serde(rename = "typing")]
    Typing(MinTyping),

    #[serde(rename = "typing_done")]
    TypingDone(MinTyping),

    #[serde(rename = "user_online")]
    UserOnline(MinPresence),

    #[serde(rename = "user_offline")]
    UserOffline(MinPresence),

    #[serde(rename = "lastseen")]
    LastSeen { can_seen: u8, seen: i64, user_id: i64 },

    #[serde(rename = "message_seen")]
    MessageSeen { message_id: i64, seen_by: i64, seen_at: i64 },

    #[serde(rename = "online_users")]
    OnlineUsers { user_ids: Vec<i64> },

    #[serde(rename = "pong_latency")]
    PongLatency { sent_at: i64, server_time: i64 },

    #[serde(rename = "call:incoming")]
    CallIncoming(IncomingCall),

    #[serde(rename = "call:answer")]
    CallAnswer(CallAnswer),

    #[serde(rename = "call:rejected")]
    CallRejected(RoomReason),

    #[serde(rename = "call:ended")]
    CallEnded(RoomReason),

    #[serde(rename = "ice:candidate")]
    IceCandidate(RelayedCandidate),

    #[serde(rename = "participant:audio_changed")]
    AudioChanged(ParticipantAudio),

    #[serde(rename = "participant:video_changed")]
    VideoChanged(ParticipantVideo),

    #[serde(rename = "call:error")]
    CallError(CallError),

    #[serde(rename = "error")]
    Error { message: String },
}

/// Sender echo: the compact message plus `"self": true`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Echo {
    #[serde(flatten)]
    pub message: MinDirect,
    #[serde(rename = "self")]
    pub is_self: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Notification {
    pub id: i64,
    pub username: String,
    pub avatar: Option<String>,
    /// Plaintext preview, bounded.
    pub message: String,
    pub status: u16,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IncomingCall {
    pub from_id: i64,
    pub from_name: String,
    pub from_avatar: Option<String>,
    pub to_id: i64,
    pub call_type: CallType,
    pub room_name: String,
    pub sdp_offer: String,
    pub ice_servers: Vec<IceServer>,
    pub is_group_call: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub group_id: Option<i64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CallAnswer {
    pub room_name: String,
    pub from_id: i64,
    pub sdp_answer: String,
    pub ice_servers: Vec<IceServer>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RelayedCandidate {
    pub room_name: String,
    pub from_id: i64,
    pub candidate: Value,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ParticipantAudio {
    pub room_name: String,
    pub user_id: i64,
    pub audio_enabled: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ParticipantVideo {
    pub room_name: String,
    pub user_id: i64,
    pub video_enabled: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CallError {
    pub room_name: String,
    pub message: String,
    pub status: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_colon_named_events() {
        let raw = r#"{"event":"call:initiate","data":{"toId":2,"callType":"video","roomName":"r1","sdpOffer":"v=0"}}"#;
        match serde_json::from_str::<ClientCommand>(raw).unwrap() {
            ClientCommand::CallInitiate(c) => {
                assert_eq!(c.to_id, 2);
                assert_eq!(c.call_type, CallType::Video);
                assert_eq!(c.room_name, "r1");
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn compact_messages_expand_on_receipt() {
        let raw = r#"{"event":"private_message","data":{"t":2,"m":"hi","r":7,"mt":"image","mu":"upload/p.jpg"}}"#;
        match serde_json::from_str::<ClientCommand>(raw).unwrap() {
            ClientCommand::PrivateMessage(msg) => {
                assert_eq!(msg.to_id, 2);
                assert_eq!(msg.text, "hi");
                assert_eq!(msg.reply_id, Some(7));
                let media = msg.media.unwrap();
                assert_eq!(media.media_type, "image");
                assert_eq!(media.url, "upload/p.jpg");
                assert_eq!(media.thumbnail_url, None);
            }
            other => panic!("unexpected {:?}", other),
        }

        let raw = r#"{"event":"group_message","data":{"g":5,"m":"all"}}"#;
        match serde_json::from_str::<ClientCommand>(raw).unwrap() {
            ClientCommand::GroupMessage(msg) => {
                assert_eq!(msg.group_id, 5);
                assert_eq!(msg.text, "all");
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn descriptive_messages_still_parse() {
        let raw = r#"{"event":"private_message","data":{"to_id":3,"text":"hey","media":{"media_type":"file","url":"u"}}}"#;
        match serde_json::from_str::<ClientCommand>(raw).unwrap() {
            ClientCommand::PrivateMessage(msg) => {
                assert_eq!(msg.to_id, 3);
                assert_eq!(msg.text, "hey");
                assert_eq!(msg.media.unwrap().url, "u");
            }
            other => panic!("unexpected {:?}", other),
        }

        let missing = r#"{"event":"private_message","data":{"m":"no target"}}"#;
        assert!(serde_json::from_str::<ClientCommand>(missing).is_err());
        let wrong_table = r#"{"event":"group_message","data":{"t":2,"m":"x"}}"#;
        assert!(serde_json::from_str::<ClientCommand>(wrong_table).is_err());
    }

    #[test]
    fn unit_command_needs_no_data() {
        let cmd: ClientCommand = serde_json::from_str(r#"{"event":"get_online_users"}"#).unwrap();
        assert!(matches!(cmd, ClientCommand::GetOnlineUsers));
    }

    #[test]
    fn echo_carries_self_flag() {
        let echo = ServerEvent::NewMessage(Echo {
            message: MinDirect {
                f: 1,
                t: 2,
                m: "abc".into(),
                ts: 10,
                sn: "alice".into(),
                sa: None,
                mt: None,
                mu: None,
                tu: None,
                r: None,
                id: 5,
                iv: None,
                tag: None,
                cv: CipherVersion::V1Legacy,
            },
            is_self: true,
        });
        let json = serde_json::to_value(&echo).unwrap();
        assert_eq!(json["event"], "new_message");
        assert_eq!(json["data"]["self"], true);
        assert_eq!(json["data"]["f"], 1);
        assert_eq!(json["data"]["cv"], 1);
    }

    #[test]
    fn participant_events_use_camel_case() {
        let ev = ServerEvent::AudioChanged(ParticipantAudio {
            room_name: "r".into(),
            user_id: 3,
            audio_enabled: false,
        });
        let json = serde_json::to_value(&ev).unwrap();
        assert_eq!(json["event"], "participant:audio_changed");
        assert_eq!(json["data"]["audioEnabled"], false);
        assert_eq!(json["data"]["userId"], 3);
    }
}
