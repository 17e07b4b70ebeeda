use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
enum EventKind {
    Typing,
    GroupTyping,
    Presence,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
struct ThrottleKey {
    kind: EventKind,
    subject: i64,
    /// Peer user (typing) or group (group typing). None for presence.
    peer: Option<i64>,
}

impl ThrottleKey {
    fn references(&self, user_id: i64) -> bool {
        self.subject == user_id || (self.kind == EventKind::Typing && self.peer == Some(user_id))
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ThrottleStats {
    pub tracked_events: usize,
    pub typing_interval_ms: u64,
    pub presence_interval_ms: u64,
}

struct ThrottleState {
    last_fired: HashMap<ThrottleKey, Instant>,
    typing_interval: Duration,
    presence_interval: Duration,
}

/// Rate limiter for ephemeral typing and presence events.
///
/// An event is allowed iff at least the configured interval has passed since
/// the last allowed event with the same key. Never errors; a key that was
/// never seen is allowed.
pub struct AdaptiveThrottle {
    state: Mutex<ThrottleState>,
}

impl Default for AdaptiveThrottle {
    fn default() -> Self {
        Self::new(Duration::from_millis(3000), Duration::from_millis(10_000))
    }
}

impl AdaptiveThrottle {
    pub fn new(typing_interval: Duration, presence_interval: Duration) -> Self {
        Self {
            state: Mutex::new(ThrottleState {
                last_fired: HashMap::new(),
                typing_interval,
                presence_interval,
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, ThrottleState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn can_send_typing(&self, user_id: i64, peer_id: i64) -> bool {
        self.can_send_typing_at(user_id, peer_id, Instant::now())
    }

    pub fn can_send_typing_at(&self, user_id: i64, peer_id: i64, now: Instant) -> bool {
        let key = ThrottleKey { kind: EventKind::Typing, subject: user_id, peer: Some(peer_id) };
        self.check(key, now)
    }

    pub fn can_send_group_typing(&self, user_id: i64, group_id: i64) -> bool {
        self.can_send_group_typing_at(user_id, group_id, Instant::now())
    }

    pub fn can_send_group_typing_at(&self, user_id: i64, group_id: i64, now: Instant) -> bool {
        let key = ThrottleKey { kind: EventKind::GroupTyping, subject: user_id, peer: Some(group_id) };
        self.check(key, now)
    }

    pub fn can_send_online_status(&self, user_id: i64) -> bool {
        self.can_send_online_status_at(user_id, Instant::now())
    }

    pub fn can_send_online_status_at(&self, user_id: i64, now: Instant) -> bool {
        let key = ThrottleKey { kind: EventKind::Presence, subject: user_id, peer: None };
        self.check(key, now)
    }

    fn check(&self, key: ThrottleKey, now: Instant) -> bool {
        let mut state = self.lock();
        let interval = match key.kind {
            EventKind::Typing | EventKind::GroupTyping => state.typing_interval,
            EventKind::Presence => state.presence_interval,
        };

        let allowed = match state.last_fired.get(&key) {
            Some(last) => now.saturating_duration_since(*last) >= interval,
            None => true,
        };
        if allowed {
            state.last_fired.insert(key, now);
        }
        allowed
    }

    pub fn set_typing_interval(&self, interval: Duration) {
        self.lock().typing_interval = interval;
    }

    pub fn set_presence_interval(&self, interval: Duration) {
        self.lock().presence_interval = interval;
    }

    /// Forget every entry that mentions `user_id`, as sender or as peer.
    pub fn clear_user(&self, user_id: i64) {
        self.lock().last_fired.retain(|key, _| !key.references(user_id));
    }

    pub fn stats(&self) -> ThrottleStats {
        let state = self.lock();
        ThrottleStats {
            tracked_events: state.last_fired.len(),
            typing_interval_ms: state.typing_interval.as_millis() as u64,
            presence_interval_ms: state.presence_interval.as_millis() as u64,
        }
    }
}
