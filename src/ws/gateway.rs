//! The real-time core consumed by application features (collaboration, chat,
//! notifications, live shopping-list updates). Explicitly constructed and
//! shared through `AppState` — no process-wide singleton — so tests can run
//! multiple isolated instances.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde_json::Value;
use tokio::task::JoinHandle;

use super::liveness;
use super::protocol::Envelope;
use super::registry::{ClientCounts, ConnectionHandle, Registry};
use super::ConnectionSender;

/// Owns the connection registry and the liveness sweep. All delivery is
/// best-effort, at-most-once: a write failure is logged and swallowed, never
/// surfaced to the feature that requested the send.
pub struct RealtimeGateway {
    registry: Arc<Registry>,
    sweep_interval: Duration,
    sweeper: Mutex<Option<JoinHandle<()>>>,
}

impl RealtimeGateway {
    pub fn new(sweep_interval: Duration) -> Self {
        Self {
            registry: Arc::new(Registry::new()),
            sweep_interval,
            sweeper: Mutex::new(None),
        }
    }

    /// Start the liveness sweep. Idempotent; called once at process start.
    pub fn start(&self) {
        let mut sweeper = self.sweeper.lock().unwrap_or_else(|e| e.into_inner());
        if sweeper.is_none() {
            *sweeper = Some(liveness::spawn_sweep(
                self.registry.clone(),
                self.sweep_interval,
            ));
            tracing::info!(
                interval_secs = self.sweep_interval.as_secs(),
                "Liveness sweep started"
            );
        }
    }

    /// Stop the liveness sweep and force-close every tracked connection.
    /// The only path that tears down all connections at once; used during
    /// process shutdown.
    pub fn shutdown(&self) {
        let mut sweeper = self.sweeper.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(task) = sweeper.take() {
            task.abort();
        }
        let drained = self.registry.drain();
        for handle in &drained {
            handle.terminate.notify_one();
        }
        tracing::info!(connections = drained.len(), "Real-time gateway shut down");
    }

    pub(crate) fn register(
        &self,
        identity: String,
        device_tag: Option<String>,
        tx: ConnectionSender,
    ) -> Arc<ConnectionHandle> {
        let handle = self.registry.register(identity, device_tag, tx);
        tracing::debug!(
            identity = %handle.identity,
            conn_id = handle.conn_id,
            connections = self.registry.len(),
            "Connection registered"
        );
        handle
    }

    pub(crate) fn unregister(&self, identity: &str, conn_id: u64) {
        self.registry.remove(identity, conn_id);
        tracing::debug!(
            identity = %identity,
            conn_id,
            connections = self.registry.len(),
            "Connection unregistered"
        );
    }

    /// Current connection for `identity`, if any.
    pub fn lookup(&self, identity: &str) -> Option<Arc<ConnectionHandle>> {
        self.registry.lookup(identity)
    }

    /// Best-effort unicast. An identity with no active connection is a
    /// no-op; a failed write is logged and dropped.
    pub fn emit_to_user(&self, identity: &str, kind: &str, payload: Value) {
        let Some(handle) = self.registry.lookup(identity) else {
            tracing::debug!(identity = %identity, kind = %kind, "emit_to_user: no active connection");
            return;
        };
        let Some(msg) = Envelope::new(kind, payload).to_message() else {
            return;
        };
        if handle.tx.send(msg).is_err() {
            tracing::warn!(
                identity = %identity,
                kind = %kind,
                "emit_to_user: write to closed connection dropped"
            );
        }
    }

    /// Deliver one envelope to every registered connection. Serialized once;
    /// per-recipient failures are contained so one bad connection cannot
    /// abort delivery to the rest. Topic subscriptions are not consulted —
    /// features embed any room scoping in the `type` string and clients
    /// filter on it.
    pub fn broadcast(&self, kind: &str, payload: Value) {
        let Some(msg) = Envelope::new(kind, payload).to_message() else {
            return;
        };
        let mut delivered = 0usize;
        for handle in self.registry.snapshot() {
            if handle.tx.send(msg.clone()).is_err() {
                tracing::warn!(
                    identity = %handle.identity,
                    kind = %kind,
                    "broadcast: write to closed connection dropped"
                );
            } else {
                delivered += 1;
            }
        }
        tracing::debug!(kind = %kind, delivered, "Broadcast complete");
    }

    /// Add topics to a connection's subscription set (reporting only).
    pub fn subscribe(&self, identity: &str, topics: &[String]) {
        self.registry.subscribe(identity, topics);
    }

    /// Remove topics from a connection's subscription set.
    pub fn unsubscribe(&self, identity: &str, topics: &[String]) {
        self.registry.unsubscribe(identity, topics);
    }

    /// Number of connections subscribed to `topic`.
    pub fn subscriber_count(&self, topic: &str) -> usize {
        self.registry.subscriber_count(topic)
    }

    /// Total connected clients plus the device-class breakdown. The total
    /// always equals the number of registry entries.
    pub fn connected_clients(&self) -> ClientCounts {
        self.registry.count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::extract::ws::Message;
    use serde_json::json;
    use tokio::sync::mpsc;

    fn gateway() -> RealtimeGateway {
        RealtimeGateway::new(Duration::from_secs(30))
    }

    fn connect(gw: &RealtimeGateway, identity: &str) -> mpsc::UnboundedReceiver<Message> {
        let (tx, rx) = mpsc::unbounded_channel();
        gw.register(identity.to_string(), None, tx);
        rx
    }

    fn recv_json(rx: &mut mpsc::UnboundedReceiver<Message>) -> Value {
        match rx.try_recv().expect("expected a frame") {
            Message::Text(text) => serde_json::from_str(text.as_str()).expect("invalid JSON"),
            other => panic!("unexpected frame: {:?}", other),
        }
    }

    #[test]
    fn emit_to_unknown_identity_is_noop() {
        let gw = gateway();
        gw.emit_to_user("ghost", "notification", json!({"id": 1}));
        assert_eq!(gw.connected_clients().total, 0);
    }

    #[test]
    fn emit_delivers_exact_envelope() {
        let gw = gateway();
        let mut rx = connect(&gw, "u1");
        gw.emit_to_user("u1", "notification", json!({"id": 1}));
        assert_eq!(
            recv_json(&mut rx),
            json!({"type": "notification", "payload": {"id": 1}})
        );
    }

    #[test]
    fn broadcast_reaches_every_connection() {
        let gw = gateway();
        let mut rx1 = connect(&gw, "u1");
        let mut rx2 = connect(&gw, "u2");

        gw.broadcast("system", json!({"msg": "x"}));

        let expected = json!({"type": "system", "payload": {"msg": "x"}});
        assert_eq!(recv_json(&mut rx1), expected);
        assert_eq!(recv_json(&mut rx2), expected);
    }

    #[test]
    fn broadcast_survives_a_closed_connection() {
        let gw = gateway();
        let rx1 = connect(&gw, "u1");
        drop(rx1); // transport gone, entry not yet cleaned up
        let mut rx2 = connect(&gw, "u2");

        gw.broadcast("system", json!({"msg": "x"}));
        assert_eq!(
            recv_json(&mut rx2),
            json!({"type": "system", "payload": {"msg": "x"}})
        );
    }

    #[test]
    fn broadcast_ignores_topic_membership() {
        let gw = gateway();
        let mut rx1 = connect(&gw, "u1");
        let mut rx2 = connect(&gw, "u2");
        gw.subscribe("u1", &["collaboration:room:9".to_string()]);

        gw.broadcast("collaboration:room:9", json!({"diff": []}));

        // Every connection receives the event, member or not
        let expected = json!({"type": "collaboration:room:9", "payload": {"diff": []}});
        assert_eq!(recv_json(&mut rx1), expected);
        assert_eq!(recv_json(&mut rx2), expected);
        assert_eq!(gw.subscriber_count("collaboration:room:9"), 1);
    }

    #[test]
    fn shutdown_clears_the_registry() {
        let gw = gateway();
        let _rx1 = connect(&gw, "u1");
        let _rx2 = connect(&gw, "u2");
        assert_eq!(gw.connected_clients().total, 2);

        gw.shutdown();
        assert_eq!(gw.connected_clients().total, 0);
        assert!(gw.lookup("u1").is_none());
    }
}
