use std::sync::Arc;

use serde::Serialize;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use tandem_crypto::{CipherBridge, ClientGeneration};
use tandem_db::Database;
use tandem_types::events::{ClientCommand, ServerEvent};
use tandem_types::models::Transport;

use crate::auth;
use crate::calls::{CallCoordinator, CallStats};
use crate::config::GatewayConfig;
use crate::monitor::{ConnectionMonitor, MonitorStats};
use crate::registry::{Registry, group_room};
use crate::relay::MessageRelay;
use crate::throttle::{AdaptiveThrottle, ThrottleStats};
use crate::turn::TurnCredentialIssuer;

#[derive(Debug, Clone, Serialize)]
pub struct GatewayStats {
    pub connections: MonitorStats,
    pub online_users: usize,
    pub throttle: ThrottleStats,
    pub calls: CallStats,
}

/// Shared handle to every gateway component. Cheap to clone; one per
/// process, handed to the websocket handler and the REST layer.
#[derive(Clone)]
pub struct Gateway {
    pub config: Arc<GatewayConfig>,
    pub registry: Registry,
    pub monitor: Arc<ConnectionMonitor>,
    pub throttle: Arc<AdaptiveThrottle>,
    pub turn: Arc<TurnCredentialIssuer>,
    pub relay: MessageRelay,
    pub calls: Arc<CallCoordinator>,
    pub db: Arc<Database>,
}

impl Gateway {
    pub fn new(config: GatewayConfig, db: Arc<Database>) -> Self {
        let registry = Registry::new();
        let throttle = Arc::new(AdaptiveThrottle::new(config.typing_interval, config.presence_interval));
        let turn = Arc::new(TurnCredentialIssuer::new(config.turn.clone()));
        let relay = MessageRelay::new(
            registry.clone(),
            db.clone(),
            CipherBridge::new(config.key_fill),
            throttle.clone(),
        );
        let calls = Arc::new(CallCoordinator::new(
            registry.clone(),
            turn.clone(),
            db.clone(),
            config.ring_timeout,
        ));

        Self {
            config: Arc::new(config),
            registry,
            monitor: Arc::new(ConnectionMonitor::new()),
            throttle,
            turn,
            relay,
            calls,
            db,
        }
    }

    /// Register a fresh, unauthenticated connection.
    pub async fn open_connection(&self, transport: Transport) -> (Uuid, mpsc::UnboundedReceiver<ServerEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let conn_id = self.registry.connect(tx).await;
        self.monitor.register(conn_id, transport);
        debug!("Connection {} opened ({:?})", conn_id, transport);
        (conn_id, rx)
    }

    /// Bind a connection to the user named by `token`. On success the
    /// connection gets `ready`; the user's first device also announces
    /// presence. On failure the connection gets an `error` event.
    pub async fn authenticate(
        &self,
        conn_id: Uuid,
        token: &str,
        use_gcm: Option<bool>,
        user_agent: Option<&str>,
    ) -> Option<i64> {
        let Some(user_id) = auth::decode_user_id(&self.config.jwt_secret, token) else {
            warn!("Connection {} presented an invalid token", conn_id);
            self.registry
                .send_to(
                    conn_id,
                    ServerEvent::Error {
                        message: "Authentication failed".into(),
                    },
                )
                .await;
            return None;
        };

        let generation = ClientGeneration::detect(use_gcm, user_agent);
        let first_device = self.registry.bind_user(conn_id, user_id, generation).await;
        self.monitor.bind_user(conn_id, user_id);

        self.registry
            .send_to(
                conn_id,
                ServerEvent::Ready {
                    user_id,
                    conn_id,
                    cipher_version: generation.cipher_version(),
                },
            )
            .await;

        if first_device {
            self.relay.presence(user_id, true).await;
        }

        info!("User {} joined on {} as {:?}", user_id, conn_id, generation);
        Some(user_id)
    }

    /// Handle one command from a connection.
    pub async fn dispatch(&self, conn_id: Uuid, cmd: ClientCommand) {
        if let ClientCommand::Join { access_token, use_gcm } = &cmd {
            if self.registry.user_of(conn_id).await.is_some() {
                debug!("Connection {} sent join twice", conn_id);
                return;
            }
            self.authenticate(conn_id, access_token, *use_gcm, None).await;
            return;
        }

        let Some(user_id) = self.registry.user_of(conn_id).await else {
            self.registry
                .send_to(
                    conn_id,
                    ServerEvent::Error {
                        message: format!("{} requires join first", cmd.name()),
                    },
                )
                .await;
            return;
        };

        match cmd {
            ClientCommand::Join { .. } => {}

            ClientCommand::PrivateMessage(msg) => {
                let generation = self.registry.generation_of(conn_id).await;
                let sender = self.relay.profile(user_id).await;
                if let Err(e) = self.relay.send_direct(&sender, Some(conn_id), generation, msg).await {
                    warn!("Message from {} failed: {}", user_id, e);
                    self.send_error(conn_id, e.to_string()).await;
                }
            }

            ClientCommand::GroupMessage(msg) => {
                if !self.in_group(user_id, msg.group_id).await {
                    self.send_error(conn_id, format!("not a member of group {}", msg.group_id)).await;
                    return;
                }
                let generation = self.registry.generation_of(conn_id).await;
                let sender = self.relay.profile(user_id).await;
                if let Err(e) = self.relay.send_group(&sender, Some(conn_id), generation, msg).await {
                    warn!("Group message from {} failed: {}", user_id, e);
                    self.send_error(conn_id, e.to_string()).await;
                }
            }

            ClientCommand::Typing(target) => {
                self.relay.typing(user_id, Some(conn_id), target, true).await;
            }

            ClientCommand::TypingDone(target) => {
                self.relay.typing(user_id, Some(conn_id), target, false).await;
            }

            ClientCommand::JoinGroup { group_id } => {
                self.registry.join(conn_id, &group_room(group_id)).await;
                debug!("User {} joined group {}", user_id, group_id);
            }

            ClientCommand::LeaveGroup { group_id } => {
                self.registry.leave(conn_id, &group_room(group_id)).await;
            }

            ClientCommand::LastSeen { peer_id } => {
                let now = chrono::Utc::now().timestamp();
                self.relay.last_seen(user_id, peer_id, now).await;
            }

            ClientCommand::SeenMessages { peer_id } => {
                if let Err(e) = self.relay.mark_seen(user_id, peer_id).await {
                    warn!("Marking {} -> {} seen failed: {}", peer_id, user_id, e);
                }
            }

            ClientCommand::MessageSeen { message_id, from_id } => {
                self.relay.message_seen(user_id, message_id, from_id).await;
            }

            ClientCommand::GetOnlineUsers => {
                let mut user_ids = self.registry.online_users().await;
                user_ids.sort_unstable();
                self.registry.send_to(conn_id, ServerEvent::OnlineUsers { user_ids }).await;
            }

            ClientCommand::PingLatency { sent_at, latency_ms } => {
                if let Some(ms) = latency_ms {
                    self.monitor.update_latency(conn_id, ms);
                }
                self.registry
                    .send_to(
                        conn_id,
                        ServerEvent::PongLatency {
                            sent_at,
                            server_time: chrono::Utc::now().timestamp_millis(),
                        },
                    )
                    .await;
            }

            ClientCommand::TransportUpgrade { transport } => {
                self.monitor.update_transport(conn_id, transport);
            }

            ClientCommand::CallInitiate(req) => {
                let caller = self.relay.profile(user_id).await;
                self.calls.initiate(&caller, conn_id, req).await;
            }

            ClientCommand::GroupCallInitiate(req) => {
                let caller = self.relay.profile(user_id).await;
                self.calls.group_initiate(&caller, conn_id, req).await;
            }

            ClientCommand::CallAccept(req) => self.calls.accept(user_id, conn_id, req).await,

            ClientCommand::CallReject(req) => self.calls.reject(user_id, conn_id, req).await,

            ClientCommand::CallEnd(req) => {
                if self.calls.is_participant(&req.room_name, user_id) {
                    self.calls.end(&req.room_name, req.reason).await;
                }
            }

            ClientCommand::IceCandidate(req) => self.calls.ice_candidate(user_id, conn_id, req).await,

            ClientCommand::ToggleAudio(req) => self.calls.toggle_audio(user_id, conn_id, req).await,

            ClientCommand::ToggleVideo(req) => self.calls.toggle_video(user_id, conn_id, req).await,
        }
    }

    /// Group membership as seen by both the socket and the REST surface: the
    /// user has a live connection that joined the group's room.
    pub async fn in_group(&self, user_id: i64, group_id: i64) -> bool {
        self.registry.user_in_room(user_id, &group_room(group_id)).await
    }

    async fn send_error(&self, conn_id: Uuid, message: String) {
        self.registry.send_to(conn_id, ServerEvent::Error { message }).await;
    }

    /// Tear down a connection: calls it was in end, and a user's last device
    /// going away broadcasts offline presence.
    pub async fn close_connection(&self, conn_id: Uuid) {
        self.monitor.remove(conn_id);
        let Some(departed) = self.registry.disconnect(conn_id).await else {
            return;
        };

        let offline_user = departed.user_id.filter(|_| departed.last_device);
        let ended = self.calls.on_disconnect(&departed.rooms, offline_user).await;
        if ended > 0 {
            info!("Connection {} left {} active calls", conn_id, ended);
        }

        if let Some(user_id) = departed.user_id {
            if departed.last_device {
                self.throttle.clear_user(user_id);
                self.relay.presence(user_id, false).await;
                info!("User {} offline", user_id);
            } else {
                debug!("User {} closed {} with other devices still live", user_id, conn_id);
            }
        }
    }

    pub async fn sweep_calls(&self) -> Vec<String> {
        self.calls.sweep_unanswered().await
    }

    pub async fn stats(&self) -> GatewayStats {
        GatewayStats {
            connections: self.monitor.stats(),
            online_users: self.registry.online_users().await.len(),
            throttle: self.throttle.stats(),
            calls: self.calls.stats(),
        }
    }
}
