//! Liveness monitor: one periodic sweep over the whole registry instead of
//! per-connection timers. Each round terminates connections that never
//! acknowledged the previous probe, then clears the flag and probes the
//! rest. Dead peers are detected within two sweep intervals without relying
//! on TCP timeouts or a clean close from the client.

use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use axum::extract::ws::Message;
use tokio::task::JoinHandle;
use tokio::time::interval;

use super::registry::Registry;

/// Spawn the periodic liveness sweep over the registry.
pub fn spawn_sweep(registry: Arc<Registry>, period: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut timer = interval(period);
        // Skip the immediate first tick so a freshly registered connection
        // gets a full interval before its first probe.
        timer.tick().await;
        loop {
            timer.tick().await;
            sweep(&registry);
        }
    })
}

/// One sweep round over every tracked connection.
pub fn sweep(registry: &Registry) {
    let mut probed = 0usize;
    let mut reaped = 0usize;

    for handle in registry.snapshot() {
        if handle.alive.swap(false, Ordering::AcqRel) {
            // Acknowledged the previous round — clear the flag and probe
            // again. The actor sets it back on pong.
            let _ = handle.tx.send(Message::Ping(Vec::new().into()));
            probed += 1;
        } else {
            tracing::warn!(
                identity = %handle.identity,
                conn_id = handle.conn_id,
                "Liveness probe unacknowledged, terminating connection"
            );
            handle.terminate.notify_one();
            reaped += 1;
        }
    }

    if reaped > 0 {
        tracing::info!(probed, reaped, "Liveness sweep reaped dead connections");
    } else {
        tracing::debug!(probed, "Liveness sweep complete");
    }
}
