use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use tokio::sync::{RwLock, mpsc};
use tracing::debug;
use uuid::Uuid;

use tandem_crypto::ClientGeneration;
use tandem_types::events::ServerEvent;

/// Room a user's own devices share.
pub fn user_room(user_id: i64) -> String {
    user_id.to_string()
}

/// Room for group fan-out. Prefixed so it can never collide with a user room.
pub fn group_room(group_id: i64) -> String {
    format!("group_{}", group_id)
}

struct Session {
    user_id: Option<i64>,
    generation: ClientGeneration,
    tx: mpsc::UnboundedSender<ServerEvent>,
    rooms: HashSet<String>,
}

#[derive(Default)]
struct RegistryState {
    connections: HashMap<Uuid, Session>,
    /// user_id -> live connections (multi-device)
    users: HashMap<i64, HashSet<Uuid>>,
    /// room -> member connections
    rooms: HashMap<String, HashSet<Uuid>>,
}

impl RegistryState {
    fn join(&mut self, conn_id: Uuid, room: &str) -> bool {
        let Some(session) = self.connections.get_mut(&conn_id) else {
            return false;
        };
        session.rooms.insert(room.to_string());
        self.rooms.entry(room.to_string()).or_default().insert(conn_id);
        true
    }

    fn leave(&mut self, conn_id: Uuid, room: &str) {
        if let Some(session) = self.connections.get_mut(&conn_id) {
            session.rooms.remove(room);
        }
        if let Some(members) = self.rooms.get_mut(room) {
            members.remove(&conn_id);
            if members.is_empty() {
                self.rooms.remove(room);
            }
        }
    }

    fn send(&self, conn_id: &Uuid, event: ServerEvent) {
        if let Some(session) = self.connections.get(conn_id) {
            let _ = session.tx.send(event);
        }
    }
}

/// What was left behind when a connection went away.
#[derive(Debug, Clone)]
pub struct Departed {
    pub user_id: Option<i64>,
    pub rooms: Vec<String>,
    /// True when this was the user's last live connection.
    pub last_device: bool,
}

/// Session registry: live connections, their users, and room membership.
///
/// Rooms are plain multicast groups keyed by string and live only while
/// they have members.
#[derive(Clone, Default)]
pub struct Registry {
    inner: Arc<RwLock<RegistryState>>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a connection that has not authenticated yet.
    pub async fn connect(&self, tx: mpsc::UnboundedSender<ServerEvent>) -> Uuid {
        let conn_id = Uuid::new_v4();
        self.inner.write().await.connections.insert(
            conn_id,
            Session {
                user_id: None,
                generation: ClientGeneration::default(),
                tx,
                rooms: HashSet::new(),
            },
        );
        conn_id
    }

    /// Attach a user to a connection and join the user's room. Returns true
    /// if this is the user's first live connection.
    pub async fn bind_user(&self, conn_id: Uuid, user_id: i64, generation: ClientGeneration) -> bool {
        let mut state = self.inner.write().await;
        let Some(session) = state.connections.get_mut(&conn_id) else {
            return false;
        };
        session.user_id = Some(user_id);
        session.generation = generation;

        let devices = state.users.entry(user_id).or_default();
        let first = devices.is_empty();
        devices.insert(conn_id);
        state.join(conn_id, &user_room(user_id));
        first
    }

    pub async fn user_of(&self, conn_id: Uuid) -> Option<i64> {
        self.inner
            .read()
            .await
            .connections
            .get(&conn_id)
            .and_then(|s| s.user_id)
    }

    pub async fn generation_of(&self, conn_id: Uuid) -> ClientGeneration {
        self.inner
            .read()
            .await
            .connections
            .get(&conn_id)
            .map_or(ClientGeneration::default(), |s| s.generation)
    }

    pub async fn join(&self, conn_id: Uuid, room: &str) -> bool {
        self.inner.write().await.join(conn_id, room)
    }

    pub async fn leave(&self, conn_id: Uuid, room: &str) {
        self.inner.write().await.leave(conn_id, room);
    }

    pub async fn is_member(&self, conn_id: Uuid, room: &str) -> bool {
        self.inner
            .read()
            .await
            .rooms
            .get(room)
            .is_some_and(|m| m.contains(&conn_id))
    }

    /// True if any of the user's live connections is in `room`.
    pub async fn user_in_room(&self, user_id: i64, room: &str) -> bool {
        let state = self.inner.read().await;
        let (Some(devices), Some(members)) = (state.users.get(&user_id), state.rooms.get(room)) else {
            return false;
        };
        devices.iter().any(|conn_id| members.contains(conn_id))
    }

    /// Remove every member from `room`. Returns the evicted connections.
    pub async fn evict_room(&self, room: &str) -> Vec<Uuid> {
        let mut state = self.inner.write().await;
        let members: Vec<Uuid> = state
            .rooms
            .remove(room)
            .map(|m| m.into_iter().collect())
            .unwrap_or_default();
        for conn_id in &members {
            if let Some(session) = state.connections.get_mut(conn_id) {
                session.rooms.remove(room);
            }
        }
        members
    }

    pub async fn room_members(&self, room: &str) -> Vec<Uuid> {
        self.inner
            .read()
            .await
            .rooms
            .get(room)
            .map(|m| m.iter().copied().collect())
            .unwrap_or_default()
    }

    /// Room members with the cipher generation each one speaks.
    pub async fn room_generations(&self, room: &str) -> Vec<(Uuid, ClientGeneration)> {
        let state = self.inner.read().await;
        state
            .rooms
            .get(room)
            .map(|members| {
                members
                    .iter()
                    .filter_map(|id| state.connections.get(id).map(|s| (*id, s.generation)))
                    .collect()
            })
            .unwrap_or_default()
    }

    pub async fn user_connections(&self, user_id: i64) -> Vec<Uuid> {
        self.inner
            .read()
            .await
            .users
            .get(&user_id)
            .map(|c| c.iter().copied().collect())
            .unwrap_or_default()
    }

    pub async fn user_generations(&self, user_id: i64) -> Vec<(Uuid, ClientGeneration)> {
        self.room_generations(&user_room(user_id)).await
    }

    pub async fn is_online(&self, user_id: i64) -> bool {
        self.inner
            .read()
            .await
            .users
            .get(&user_id)
            .is_some_and(|c| !c.is_empty())
    }

    pub async fn online_users(&self) -> Vec<i64> {
        self.inner.read().await.users.keys().copied().collect()
    }

    pub async fn connection_count(&self) -> usize {
        self.inner.read().await.connections.len()
    }

    // -- Emit --

    pub async fn send_to(&self, conn_id: Uuid, event: ServerEvent) {
        self.inner.read().await.send(&conn_id, event);
    }

    pub async fn send_to_many(&self, conn_ids: &[Uuid], event: ServerEvent) {
        let state = self.inner.read().await;
        for conn_id in conn_ids {
            state.send(conn_id, event.clone());
        }
    }

    pub async fn emit(&self, room: &str, event: ServerEvent) {
        self.emit_except(room, None, event).await;
    }

    /// Emit to every member of `room` except `skip`.
    pub async fn emit_except(&self, room: &str, skip: Option<Uuid>, event: ServerEvent) {
        let state = self.inner.read().await;
        let Some(members) = state.rooms.get(room) else {
            debug!("emit to empty room {}", room);
            return;
        };
        for conn_id in members.iter().filter(|id| Some(**id) != skip) {
            state.send(conn_id, event.clone());
        }
    }

    pub async fn emit_to_user(&self, user_id: i64, event: ServerEvent) {
        self.emit(&user_room(user_id), event).await;
    }

    /// Emit to every authenticated connection not owned by `user_id`.
    pub async fn broadcast_except_user(&self, user_id: i64, event: ServerEvent) {
        let state = self.inner.read().await;
        for (conn_id, session) in &state.connections {
            if session.user_id.is_some_and(|u| u != user_id) {
                state.send(conn_id, event.clone());
            }
        }
    }

    /// Drop a connection and all of its memberships.
    pub async fn disconnect(&self, conn_id: Uuid) -> Option<Departed> {
        let mut state = self.inner.write().await;
        let session = state.connections.remove(&conn_id)?;

        let mut rooms: Vec<String> = session.rooms.into_iter().collect();
        for room in &rooms {
            if let Some(members) = state.rooms.get_mut(room) {
                members.remove(&conn_id);
                if members.is_empty() {
                    state.rooms.remove(room);
                }
            }
        }
        rooms.sort();

        let mut last_device = false;
        if let Some(user_id) = session.user_id {
            if let Some(devices) = state.users.get_mut(&user_id) {
                devices.remove(&conn_id);
                if devices.is_empty() {
                    state.users.remove(&user_id);
                    last_device = true;
                }
            }
        }

        Some(Departed {
            user_id: session.user_id,
            rooms,
            last_device,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn connected(registry: &Registry) -> (Uuid, mpsc::UnboundedReceiver<ServerEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (registry.connect(tx).await, rx)
    }

    fn ping() -> ServerEvent {
        ServerEvent::Error { message: "ping".into() }
    }

    #[tokio::test]
    async fn multi_device_user() {
        let registry = Registry::new();
        let (a, mut rx_a) = connected(&registry).await;
        let (b, mut rx_b) = connected(&registry).await;

        assert!(registry.bind_user(a, 1, ClientGeneration::Legacy).await);
        assert!(!registry.bind_user(b, 1, ClientGeneration::Modern).await);
        assert_eq!(registry.user_connections(1).await.len(), 2);

        registry.emit_to_user(1, ping()).await;
        assert!(rx_a.try_recv().is_ok());
        assert!(rx_b.try_recv().is_ok());

        let gone = registry.disconnect(a).await.unwrap();
        assert_eq!(gone.user_id, Some(1));
        assert!(!gone.last_device);
        assert!(registry.is_online(1).await);

        let gone = registry.disconnect(b).await.unwrap();
        assert!(gone.last_device);
        assert!(!registry.is_online(1).await);
        assert!(registry.disconnect(b).await.is_none());
    }

    #[tokio::test]
    async fn emit_except_skips_sender() {
        let registry = Registry::new();
        let (a, mut rx_a) = connected(&registry).await;
        let (b, mut rx_b) = connected(&registry).await;
        registry.join(a, "room").await;
        registry.join(b, "room").await;

        registry.emit_except("room", Some(a), ping()).await;
        assert!(rx_a.try_recv().is_err());
        assert!(rx_b.try_recv().is_ok());
    }

    #[tokio::test]
    async fn evict_and_disconnect_clean_up_rooms() {
        let registry = Registry::new();
        let (a, _rx_a) = connected(&registry).await;
        let (b, _rx_b) = connected(&registry).await;
        registry.join(a, "call").await;
        registry.join(b, "call").await;
        registry.join(a, "group_9").await;

        let mut evicted = registry.evict_room("call").await;
        evicted.sort();
        let mut expected = vec![a, b];
        expected.sort();
        assert_eq!(evicted, expected);
        assert!(registry.room_members("call").await.is_empty());

        let gone = registry.disconnect(a).await.unwrap();
        assert_eq!(gone.rooms, vec!["group_9".to_string()]);
        assert!(registry.room_members("group_9").await.is_empty());
    }

    #[tokio::test]
    async fn user_in_room_checks_every_device() {
        let registry = Registry::new();
        let (a, _rx_a) = connected(&registry).await;
        let (b, _rx_b) = connected(&registry).await;
        registry.bind_user(a, 1, ClientGeneration::Modern).await;
        registry.bind_user(b, 1, ClientGeneration::Legacy).await;

        assert!(!registry.user_in_room(1, "group_4").await);
        registry.join(b, "group_4").await;
        assert!(registry.user_in_room(1, "group_4").await);
        assert!(!registry.user_in_room(2, "group_4").await);

        registry.disconnect(b).await;
        assert!(!registry.user_in_room(1, "group_4").await);
    }

    #[tokio::test]
    async fn join_requires_live_connection() {
        let registry = Registry::new();
        assert!(!registry.join(Uuid::new_v4(), "room").await);
        assert!(registry.room_members("room").await.is_empty());
    }
}
