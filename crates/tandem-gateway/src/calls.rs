//! Call signaling: room lifecycle and SDP/ICE relay between participants.
//!
//! The coordinator never touches media. It tracks who is in which call room,
//! forwards offers, answers and candidates, and makes sure every room ends
//! exactly once.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use serde::Serialize;
use tracing::{debug, info, warn};
use uuid::Uuid;

use tandem_db::Database;
use tandem_db::models::{CallStatus, NewCall};
use tandem_types::events::{
    CallAccept, CallAnswer, CallError, CallInitiate, GroupCallInitiate, IceCandidateSend, IncomingCall,
    ParticipantAudio, ParticipantVideo, RelayedCandidate, RoomReason, ServerEvent, ToggleMedia,
};
use tandem_types::models::{CallType, UserProfile};

use crate::registry::Registry;
use crate::relay::with_db;
use crate::turn::TurnCredentialIssuer;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum CallState {
    Initiated,
    Ringing,
    Active,
    Ended,
    Rejected,
}

#[derive(Debug, Clone)]
pub struct CallRoom {
    pub room_name: String,
    pub participants: Vec<i64>,
    pub call_type: CallType,
    pub initiator_id: i64,
    pub group_id: Option<i64>,
    pub started_at: Instant,
    pub started_unix: i64,
    pub state: CallState,
}

#[derive(Debug, Clone, Serialize)]
pub struct ActiveCall {
    pub room_name: String,
    pub state: CallState,
    pub call_type: CallType,
    pub participants: Vec<i64>,
    pub is_group_call: bool,
    pub started_at: i64,
    pub duration_secs: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct CallStats {
    pub active_calls: usize,
    pub calls: Vec<ActiveCall>,
}

pub const REASON_ENDED: &str = "Call ended";
pub const REASON_DISCONNECTED: &str = "Participant disconnected";
pub const REASON_NO_ANSWER: &str = "No answer";

pub struct CallCoordinator {
    registry: Registry,
    turn: Arc<TurnCredentialIssuer>,
    db: Arc<Database>,
    rooms: Mutex<HashMap<String, CallRoom>>,
    ring_timeout: Duration,
}

impl CallCoordinator {
    pub fn new(registry: Registry, turn: Arc<TurnCredentialIssuer>, db: Arc<Database>, ring_timeout: Duration) -> Self {
        Self {
            registry,
            turn,
            db,
            rooms: Mutex::new(HashMap::new()),
            ring_timeout,
        }
    }

    // The guard is never held across an await.
    fn rooms(&self) -> MutexGuard<'_, HashMap<String, CallRoom>> {
        self.rooms.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn room_state(&self, room_name: &str) -> Option<CallState> {
        self.rooms().get(room_name).map(|r| r.state)
    }

    pub fn is_participant(&self, room_name: &str, user_id: i64) -> bool {
        self.rooms().get(room_name).is_some_and(|r| r.participants.contains(&user_id))
    }

    pub fn room(&self, room_name: &str) -> Option<CallRoom> {
        self.rooms().get(room_name).cloned()
    }

    async fn call_error(&self, conn_id: Uuid, room_name: &str, message: &str, status: &str) {
        self.registry
            .send_to(
                conn_id,
                ServerEvent::CallError(CallError {
                    room_name: room_name.to_string(),
                    message: message.to_string(),
                    status: status.to_string(),
                }),
            )
            .await;
    }

    /// Claim a room name for a new call. False if the name is taken.
    fn open_room(&self, room: CallRoom) -> bool {
        let mut rooms = self.rooms();
        if rooms.contains_key(&room.room_name) {
            return false;
        }
        rooms.insert(room.room_name.clone(), room);
        true
    }

    // The call log is best effort: a failed write never changes signaling.

    async fn log_opened(&self, room: NewCall) {
        let room_name = room.room_name.clone();
        if let Err(e) = with_db(&self.db, move |db| db.insert_call(&room)).await {
            warn!("Could not log call {}: {}", room_name, e);
        }
    }

    async fn log_status(&self, room_name: &str, status: CallStatus, reason: Option<&str>) {
        let room = room_name.to_string();
        let reason = reason.map(str::to_string);
        let at = chrono::Utc::now().timestamp();
        let result = with_db(&self.db, move |db| db.update_call_status(&room, status, at, reason.as_deref())).await;
        match result {
            Ok(true) => debug!("Call {} logged as {}", room_name, status.as_str()),
            Ok(false) => {}
            Err(e) => warn!("Could not log call {} as {}: {}", room_name, status.as_str(), e),
        }
    }

    fn set_state(&self, room_name: &str, state: CallState) {
        if let Some(room) = self.rooms().get_mut(room_name) {
            room.state = state;
        }
    }

    /// Start a 1:1 call. The callee gets `call:incoming` with their own
    /// ICE credentials; an offline callee ends the call at once as missed.
    pub async fn initiate(&self, caller: &UserProfile, conn_id: Uuid, req: CallInitiate) {
        let now = chrono::Utc::now().timestamp();
        let opened = self.open_room(CallRoom {
            room_name: req.room_name.clone(),
            participants: vec![caller.id, req.to_id],
            call_type: req.call_type,
            initiator_id: caller.id,
            group_id: None,
            started_at: Instant::now(),
            started_unix: now,
            state: CallState::Initiated,
        });
        if !opened {
            warn!("Call room {} already exists", req.room_name);
            self.call_error(conn_id, &req.room_name, "Call room already exists", "error").await;
            return;
        }

        self.registry.join(conn_id, &req.room_name).await;
        self.log_opened(NewCall {
            room_name: req.room_name.clone(),
            from_id: caller.id,
            to_id: Some(req.to_id),
            group_id: None,
            call_type: req.call_type,
            created_at: now,
        })
        .await;

        if !self.registry.is_online(req.to_id).await {
            info!("Call {} from {} to offline user {}", req.room_name, caller.id, req.to_id);
            self.call_error(conn_id, &req.room_name, "Recipient is offline", "missed").await;
            self.registry.evict_room(&req.room_name).await;
            self.rooms().remove(&req.room_name);
            self.log_status(&req.room_name, CallStatus::Missed, Some("Recipient is offline")).await;
            return;
        }

        let (ice_servers, _) = self.turn.ice_servers(req.to_id);
        self.registry
            .emit_to_user(
                req.to_id,
                ServerEvent::CallIncoming(IncomingCall {
                    from_id: caller.id,
                    from_name: caller.username.clone(),
                    from_avatar: caller.avatar.clone(),
                    to_id: req.to_id,
                    call_type: req.call_type,
                    room_name: req.room_name.clone(),
                    sdp_offer: req.sdp_offer,
                    ice_servers,
                    is_group_call: false,
                    group_id: None,
                }),
            )
            .await;
        self.set_state(&req.room_name, CallState::Ringing);

        info!("Call {} ringing: {} -> {}", req.room_name, caller.id, req.to_id);
    }

    /// Start a group call. Each listed member gets their own invitation;
    /// offline members are skipped.
    pub async fn group_initiate(&self, caller: &UserProfile, conn_id: Uuid, req: GroupCallInitiate) {
        let mut participants = vec![caller.id];
        for member in &req.member_ids {
            if !participants.contains(member) {
                participants.push(*member);
            }
        }

        let now = chrono::Utc::now().timestamp();
        let opened = self.open_room(CallRoom {
            room_name: req.room_name.clone(),
            participants,
            call_type: req.call_type,
            initiator_id: caller.id,
            group_id: Some(req.group_id),
            started_at: Instant::now(),
            started_unix: now,
            state: CallState::Initiated,
        });
        if !opened {
            self.call_error(conn_id, &req.room_name, "Call room already exists", "error").await;
            return;
        }

        self.registry.join(conn_id, &req.room_name).await;
        self.log_opened(NewCall {
            room_name: req.room_name.clone(),
            from_id: caller.id,
            to_id: None,
            group_id: Some(req.group_id),
            call_type: req.call_type,
            created_at: now,
        })
        .await;

        let mut invited = 0;
        for member in req.member_ids.iter().filter(|m| **m != caller.id) {
            if !self.registry.is_online(*member).await {
                continue;
            }
            let (ice_servers, _) = self.turn.ice_servers(*member);
            self.registry
                .emit_to_user(
                    *member,
                    ServerEvent::CallIncoming(IncomingCall {
                        from_id: caller.id,
                        from_name: caller.username.clone(),
                        from_avatar: caller.avatar.clone(),
                        to_id: *member,
                        call_type: req.call_type,
                        room_name: req.room_name.clone(),
                        sdp_offer: req.sdp_offer.clone(),
                        ice_servers,
                        is_group_call: true,
                        group_id: Some(req.group_id),
                    }),
                )
                .await;
            invited += 1;
        }

        if invited == 0 {
            self.call_error(conn_id, &req.room_name, "No group members are online", "missed").await;
            self.registry.evict_room(&req.room_name).await;
            self.rooms().remove(&req.room_name);
            self.log_status(&req.room_name, CallStatus::Missed, Some("No group members are online")).await;
            return;
        }

        self.set_state(&req.room_name, CallState::Ringing);
        info!("Group call {} in group {} ringing {} members", req.room_name, req.group_id, invited);
    }

    /// Answer a call. The answer goes to everyone already in the room with
    /// ICE credentials for the initiator. Only invited users may answer, and
    /// a 1:1 call is answered once.
    pub async fn accept(&self, user_id: i64, conn_id: Uuid, req: CallAccept) {
        let (initiator, first_answer) = {
            let mut rooms = self.rooms();
            let Some(room) = rooms.get_mut(&req.room_name) else {
                debug!("Accept for unknown room {}", req.room_name);
                return;
            };
            if user_id == room.initiator_id || !room.participants.contains(&user_id) {
                debug!("User {} is not invited to {}", user_id, req.room_name);
                return;
            }
            if room.group_id.is_none() && room.state == CallState::Active {
                debug!("Call {} already answered", req.room_name);
                return;
            }
            let first_answer = room.state != CallState::Active;
            room.state = CallState::Active;
            (room.initiator_id, first_answer)
        };

        self.registry.join(conn_id, &req.room_name).await;
        if first_answer {
            self.log_status(&req.room_name, CallStatus::Connected, None).await;
        }

        let (ice_servers, _) = self.turn.ice_servers(initiator);
        self.registry
            .emit_except(
                &req.room_name,
                Some(conn_id),
                ServerEvent::CallAnswer(CallAnswer {
                    room_name: req.room_name.clone(),
                    from_id: user_id,
                    sdp_answer: req.sdp_answer,
                    ice_servers,
                }),
            )
            .await;

        info!("Call {} accepted by {}", req.room_name, user_id);
    }

    /// Decline a ringing call. Everyone involved is told, then the room is
    /// torn down.
    pub async fn reject(&self, user_id: i64, conn_id: Uuid, req: RoomReason) {
        let removed = {
            let mut rooms = self.rooms();
            let invited = rooms.get(&req.room_name).map(|r| r.participants.contains(&user_id));
            match invited {
                Some(true) => rooms.remove(&req.room_name),
                Some(false) => {
                    debug!("User {} cannot reject {}", user_id, req.room_name);
                    None
                }
                None => None,
            }
        };
        let Some(mut room) = removed else {
            return;
        };
        room.state = CallState::Rejected;

        let reason = req.reason.unwrap_or_else(|| "Call rejected".to_string());
        self.log_status(&req.room_name, CallStatus::Rejected, Some(&reason)).await;
        let event = ServerEvent::CallRejected(RoomReason {
            room_name: req.room_name.clone(),
            reason: Some(reason),
        });
        self.notify_room(&room, Some(conn_id), event).await;

        info!("Call {} rejected by {}", req.room_name, user_id);
    }

    /// End a call. Idempotent: returns false if the room was already gone.
    pub async fn end(&self, room_name: &str, reason: Option<String>) -> bool {
        let removed = self.rooms().remove(room_name);
        let Some(mut room) = removed else {
            return false;
        };
        let answered = room.state == CallState::Active;
        room.state = CallState::Ended;

        let reason = reason.unwrap_or_else(|| REASON_ENDED.to_string());
        let status = if answered { CallStatus::Ended } else { CallStatus::Missed };
        self.log_status(room_name, status, Some(&reason)).await;
        info!(
            "Call {} ended after {}s: {}",
            room_name,
            room.started_at.elapsed().as_secs(),
            reason
        );

        let event = ServerEvent::CallEnded(RoomReason {
            room_name: room_name.to_string(),
            reason: Some(reason),
        });
        self.notify_room(&room, None, event).await;
        true
    }

    /// Send to connections in the room and to every device of every
    /// participant (a callee who has not answered yet is not in the room),
    /// then empty the room. `skip` is the connection that caused the event.
    async fn notify_room(&self, room: &CallRoom, skip: Option<Uuid>, event: ServerEvent) {
        let mut targets = self.registry.room_members(&room.room_name).await;
        for user_id in &room.participants {
            for conn_id in self.registry.user_connections(*user_id).await {
                if !targets.contains(&conn_id) {
                    targets.push(conn_id);
                }
            }
        }
        targets.retain(|conn_id| Some(*conn_id) != skip);
        self.registry.send_to_many(&targets, event).await;
        self.registry.evict_room(&room.room_name).await;
    }

    pub async fn ice_candidate(&self, user_id: i64, conn_id: Uuid, req: IceCandidateSend) {
        let room_name = req.room_name;
        if !self.rooms().contains_key(&room_name) {
            debug!("Candidate for unknown room {}", room_name);
            return;
        }
        self.registry
            .emit_except(
                &room_name,
                Some(conn_id),
                ServerEvent::IceCandidate(RelayedCandidate {
                    room_name: room_name.clone(),
                    from_id: user_id,
                    candidate: req.candidate,
                }),
            )
            .await;
    }

    pub async fn toggle_audio(&self, user_id: i64, conn_id: Uuid, req: ToggleMedia) {
        let room_name = req.room_name;
        if !self.rooms().contains_key(&room_name) {
            return;
        }
        self.registry
            .emit_except(
                &room_name,
                Some(conn_id),
                ServerEvent::AudioChanged(ParticipantAudio {
                    room_name: room_name.clone(),
                    user_id,
                    audio_enabled: req.enabled,
                }),
            )
            .await;
    }

    pub async fn toggle_video(&self, user_id: i64, conn_id: Uuid, req: ToggleMedia) {
        let room_name = req.room_name;
        if !self.rooms().contains_key(&room_name) {
            return;
        }
        self.registry
            .emit_except(
                &room_name,
                Some(conn_id),
                ServerEvent::VideoChanged(ParticipantVideo {
                    room_name: room_name.clone(),
                    user_id,
                    video_enabled: req.enabled,
                }),
            )
            .await;
    }

    /// A connection dropped out of these rooms. Any that are calls end.
    ///
    /// `offline_user` is set when the connection was the user's last device:
    /// 1:1 calls ringing for that user end too, since the callee never
    /// joined the room.
    pub async fn on_disconnect(&self, rooms: &[String], offline_user: Option<i64>) -> usize {
        let mut doomed: Vec<String> = {
            let calls = self.rooms();
            rooms.iter().filter(|r| calls.contains_key(*r)).cloned().collect()
        };
        if let Some(user_id) = offline_user {
            let calls = self.rooms();
            for room in calls.values() {
                if room.group_id.is_none() && room.participants.contains(&user_id) && !doomed.contains(&room.room_name) {
                    doomed.push(room.room_name.clone());
                }
            }
        }

        let mut ended = 0;
        for room_name in &doomed {
            if self.end(room_name, Some(REASON_DISCONNECTED.to_string())).await {
                ended += 1;
            }
        }
        ended
    }

    pub async fn sweep_unanswered(&self) -> Vec<String> {
        self.sweep_unanswered_at(Instant::now()).await
    }

    /// End calls that have been ringing longer than the ring timeout.
    pub async fn sweep_unanswered_at(&self, now: Instant) -> Vec<String> {
        let stale: Vec<String> = self
            .rooms()
            .values()
            .filter(|r| {
                matches!(r.state, CallState::Initiated | CallState::Ringing)
                    && now.saturating_duration_since(r.started_at) >= self.ring_timeout
            })
            .map(|r| r.room_name.clone())
            .collect();

        let mut ended = Vec::with_capacity(stale.len());
        for room_name in stale {
            if self.end(&room_name, Some(REASON_NO_ANSWER.to_string())).await {
                ended.push(room_name);
            }
        }
        ended
    }

    pub fn stats(&self) -> CallStats {
        let rooms = self.rooms();
        let mut calls: Vec<ActiveCall> = rooms
            .values()
            .map(|r| ActiveCall {
                room_name: r.room_name.clone(),
                state: r.state,
                call_type: r.call_type,
                participants: r.participants.clone(),
                is_group_call: r.group_id.is_some(),
                started_at: r.started_unix,
                duration_secs: r.started_at.elapsed().as_secs(),
            })
            .collect();
        calls.sort_by(|a, b| a.room_name.cmp(&b.room_name));

        CallStats {
            active_calls: calls.len(),
            calls,
        }
    }
}
