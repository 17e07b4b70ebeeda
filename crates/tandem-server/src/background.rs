use std::time::Duration;

use tracing::{debug, info};

use tandem_gateway::Gateway;

/// How often ringing calls are checked against the ring timeout.
const RING_SWEEP_INTERVAL: Duration = Duration::from_secs(5);

/// Periodically log the connection monitor snapshot.
pub async fn run_stats_loop(gateway: Gateway, every: Duration) {
    let mut interval = tokio::time::interval(every);
    interval.tick().await;

    loop {
        interval.tick().await;

        let stats = gateway.stats().await;
        let c = &stats.connections;
        info!(
            "Connections: {} active, {} peak, {} total, avg {}ms | quality E{} G{} P{} O{} | stream {} poll {} | {} calls",
            c.active,
            c.peak,
            c.total,
            c.avg_latency_ms,
            c.by_quality.excellent,
            c.by_quality.good,
            c.by_quality.poor,
            c.by_quality.offline,
            c.by_transport.stream,
            c.by_transport.poll,
            stats.calls.active_calls,
        );
        debug!("Throttle tracking {} entries", stats.throttle.tracked_events);
    }
}

/// End calls nobody answered within the ring timeout.
pub async fn run_ring_sweep_loop(gateway: Gateway) {
    let mut interval = tokio::time::interval(RING_SWEEP_INTERVAL);

    loop {
        interval.tick().await;

        let ended = gateway.sweep_calls().await;
        if !ended.is_empty() {
            info!("Ring sweep: ended {} unanswered calls", ended.len());
        }
    }
}
