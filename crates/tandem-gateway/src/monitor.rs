use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Instant;

use serde::Serialize;
use uuid::Uuid;

use tandem_types::models::Transport;

/// Latency-based health tier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Quality {
    Excellent,
    Good,
    Poor,
    Offline,
}

impl Quality {
    /// Fixed thresholds: <200 excellent, <500 good, <2000 poor, else offline.
    pub fn from_latency(ms: u64) -> Self {
        match ms {
            0..200 => Self::Excellent,
            200..500 => Self::Good,
            500..2000 => Self::Poor,
            _ => Self::Offline,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ConnectionInfo {
    pub user_id: Option<i64>,
    pub transport: Transport,
    pub latency_ms: u64,
    pub quality: Quality,
    pub connected_at: Instant,
}

#[derive(Debug, Clone, Default, Serialize, PartialEq, Eq)]
pub struct QualityCounts {
    pub excellent: usize,
    pub good: usize,
    pub poor: usize,
    pub offline: usize,
}

#[derive(Debug, Clone, Default, Serialize, PartialEq, Eq)]
pub struct TransportCounts {
    pub stream: usize,
    pub poll: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct MonitorStats {
    /// Connections registered since start.
    pub total: u64,
    pub active: usize,
    /// High-water mark of `active`.
    pub peak: usize,
    pub avg_latency_ms: u64,
    pub by_quality: QualityCounts,
    pub by_transport: TransportCounts,
}

#[derive(Default)]
struct MonitorState {
    connections: HashMap<Uuid, ConnectionInfo>,
    total: u64,
    peak: usize,
}

/// Per-connection latency and quality bookkeeping.
///
/// Every operation is total: unknown ids are ignored or answered with a
/// safe default.
#[derive(Default)]
pub struct ConnectionMonitor {
    state: Mutex<MonitorState>,
}

impl ConnectionMonitor {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, MonitorState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Start tracking `id`. Re-registering resets the entry.
    pub fn register(&self, id: Uuid, transport: Transport) {
        let mut state = self.lock();
        state.connections.insert(
            id,
            ConnectionInfo {
                user_id: None,
                transport,
                latency_ms: 0,
                quality: Quality::Excellent,
                connected_at: Instant::now(),
            },
        );
        state.total += 1;
        state.peak = state.peak.max(state.connections.len());
    }

    pub fn bind_user(&self, id: Uuid, user_id: i64) {
        if let Some(conn) = self.lock().connections.get_mut(&id) {
            conn.user_id = Some(user_id);
        }
    }

    pub fn update_latency(&self, id: Uuid, ms: u64) {
        if let Some(conn) = self.lock().connections.get_mut(&id) {
            conn.latency_ms = ms;
            conn.quality = Quality::from_latency(ms);
        }
    }

    pub fn update_transport(&self, id: Uuid, transport: Transport) {
        if let Some(conn) = self.lock().connections.get_mut(&id) {
            conn.transport = transport;
        }
    }

    pub fn remove(&self, id: Uuid) {
        self.lock().connections.remove(&id);
    }

    /// `Offline` for unknown connections.
    pub fn quality(&self, id: Uuid) -> Quality {
        self.lock()
            .connections
            .get(&id)
            .map_or(Quality::Offline, |c| c.quality)
    }

    /// 0 for unknown connections.
    pub fn latency(&self, id: Uuid) -> u64 {
        self.lock().connections.get(&id).map_or(0, |c| c.latency_ms)
    }

    pub fn connection(&self, id: Uuid) -> Option<ConnectionInfo> {
        self.lock().connections.get(&id).cloned()
    }

    pub fn stats(&self) -> MonitorStats {
        let state = self.lock();
        let mut by_quality = QualityCounts::default();
        let mut by_transport = TransportCounts::default();
        let mut latency_sum: u64 = 0;

        for conn in state.connections.values() {
            latency_sum += conn.latency_ms;
            match conn.quality {
                Quality::Excellent => by_quality.excellent += 1,
                Quality::Good => by_quality.good += 1,
                Quality::Poor => by_quality.poor += 1,
                Quality::Offline => by_quality.offline += 1,
            }
            match conn.transport {
                Transport::Stream => by_transport.stream += 1,
                Transport::Poll => by_transport.poll += 1,
            }
        }

        let active = state.connections.len();
        let avg_latency_ms = if active == 0 {
            0
        } else {
            (latency_sum as f64 / active as f64).round() as u64
        };

        MonitorStats {
            total: state.total,
            active,
            peak: state.peak,
            avg_latency_ms,
            by_quality,
            by_transport,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn quality_thresholds_at_boundaries() {
        assert_eq!(Quality::from_latency(0), Quality::Excellent);
        assert_eq!(Quality::from_latency(199), Quality::Excellent);
        assert_eq!(Quality::from_latency(200), Quality::Good);
        assert_eq!(Quality::from_latency(499), Quality::Good);
        assert_eq!(Quality::from_latency(500), Quality::Poor);
        assert_eq!(Quality::from_latency(1999), Quality::Poor);
        assert_eq!(Quality::from_latency(2000), Quality::Offline);
    }

    #[test]
    fn unknown_ids_default_safely() {
        let monitor = ConnectionMonitor::new();
        let ghost = Uuid::new_v4();
        monitor.update_latency(ghost, 100);
        monitor.update_transport(ghost, Transport::Poll);
        monitor.remove(ghost);
        assert_eq!(monitor.quality(ghost), Quality::Offline);
        assert_eq!(monitor.latency(ghost), 0);
        assert_eq!(monitor.stats().active, 0);
    }

    #[test]
    fn register_starts_excellent_and_tracks_latency() {
        let monitor = ConnectionMonitor::new();
        let id = Uuid::new_v4();
        monitor.register(id, Transport::Stream);
        assert_eq!(monitor.quality(id), Quality::Excellent);

        monitor.update_latency(id, 750);
        assert_eq!(monitor.quality(id), Quality::Poor);
        assert_eq!(monitor.latency(id), 750);

        monitor.register(id, Transport::Poll);
        assert_eq!(monitor.latency(id), 0);
        assert_eq!(monitor.stats().by_transport, TransportCounts { stream: 0, poll: 1 });
    }

    #[test]
    fn stats_keep_peak_and_average() {
        let monitor = ConnectionMonitor::new();
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();
        let c = Uuid::new_v4();
        monitor.register(a, Transport::Stream);
        monitor.register(b, Transport::Stream);
        monitor.register(c, Transport::Poll);
        monitor.update_latency(a, 100);
        monitor.update_latency(b, 301);
        monitor.update_latency(c, 2500);

        let stats = monitor.stats();
        assert_eq!(stats.active, 3);
        assert_eq!(stats.avg_latency_ms, 967);
        assert_eq!(
            stats.by_quality,
            QualityCounts { excellent: 1, good: 1, poor: 0, offline: 1 }
        );

        monitor.remove(a);
        monitor.remove(b);
        let stats = monitor.stats();
        assert_eq!(stats.active, 1);
        assert_eq!(stats.peak, 3);
        assert_eq!(stats.total, 3);
    }
}
