//! Connection registry: the single source of truth for "is this user
//! currently reachable", plus the per-connection topic subscription table.
//!
//! Invariants: at most one entry per identity (last-writer-wins on
//! re-registration), and every entry has an open underlying transport —
//! entries are removed immediately on close/termination, never lazily.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use dashmap::DashMap;
use serde::Serialize;
use tokio::sync::Notify;

use super::ConnectionSender;

/// Server-side record of one authenticated client's persistent transport.
/// The registry exclusively owns the lifecycle; the actor holds a clone of
/// the Arc for the duration of the connection.
pub struct ConnectionHandle {
    /// Authenticated user identity (opaque, stable key)
    pub identity: String,
    /// Optional client-supplied label, used only for coarse counting
    pub device_tag: Option<String>,
    /// Process-unique connection id, guards removal races on re-registration
    pub conn_id: u64,
    /// Cleared at the start of each liveness sweep, set on pong
    pub alive: AtomicBool,
    /// Outbound channel feeding this connection's writer task
    pub tx: ConnectionSender,
    /// Signalled to make the actor close the transport and unregister
    pub terminate: Notify,
    /// Topics this connection has declared interest in (reporting only)
    subscriptions: Mutex<HashSet<String>>,
}

impl ConnectionHandle {
    pub fn subscribed_to(&self, topic: &str) -> bool {
        self.subscriptions
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .contains(topic)
    }

    fn add_topics(&self, topics: &[String]) {
        let mut set = self.subscriptions.lock().unwrap_or_else(|e| e.into_inner());
        for topic in topics {
            set.insert(topic.clone());
        }
    }

    fn remove_topics(&self, topics: &[String]) {
        let mut set = self.subscriptions.lock().unwrap_or_else(|e| e.into_inner());
        for topic in topics {
            set.remove(topic);
        }
    }
}

/// Connected-client totals, broken down by device-tag class. The class is
/// the text before the first `-` of the tag ("web-3f2a" counts as "web");
/// connections without a tag count as "unknown".
#[derive(Debug, Clone, Serialize)]
pub struct ClientCounts {
    pub total: usize,
    pub by_device: HashMap<String, usize>,
}

/// In-memory mapping from user identity to its current connection.
/// Created once at process start and lives for the process's lifetime.
pub struct Registry {
    connections: DashMap<String, Arc<ConnectionHandle>>,
    next_conn_id: AtomicU64,
}

impl Registry {
    pub fn new() -> Self {
        Self {
            connections: DashMap::new(),
            next_conn_id: AtomicU64::new(0),
        }
    }

    /// Insert a new connection for `identity`, replacing any existing entry
    /// (last-writer-wins). The superseded connection's transport is
    /// proactively terminated rather than left to its liveness timeout.
    pub fn register(
        &self,
        identity: String,
        device_tag: Option<String>,
        tx: ConnectionSender,
    ) -> Arc<ConnectionHandle> {
        let conn_id = self.next_conn_id.fetch_add(1, Ordering::Relaxed);
        let handle = Arc::new(ConnectionHandle {
            identity: identity.clone(),
            device_tag,
            conn_id,
            alive: AtomicBool::new(true),
            tx,
            terminate: Notify::new(),
            subscriptions: Mutex::new(HashSet::new()),
        });

        if let Some(prev) = self.connections.insert(identity, handle.clone()) {
            tracing::info!(
                identity = %prev.identity,
                superseded_conn_id = prev.conn_id,
                conn_id,
                "Re-registration superseded an existing connection"
            );
            prev.terminate.notify_one();
        }

        handle
    }

    /// Remove the entry for `identity` if it still belongs to `conn_id`.
    /// Idempotent; a superseded connection's cleanup never evicts its
    /// replacement. Returns whether an entry was removed.
    pub fn remove(&self, identity: &str, conn_id: u64) -> bool {
        self.connections
            .remove_if(identity, |_, handle| handle.conn_id == conn_id)
            .is_some()
    }

    /// Current connection for `identity`, if any.
    pub fn lookup(&self, identity: &str) -> Option<Arc<ConnectionHandle>> {
        self.connections.get(identity).map(|entry| entry.value().clone())
    }

    pub fn len(&self) -> usize {
        self.connections.len()
    }

    pub fn is_empty(&self) -> bool {
        self.connections.is_empty()
    }

    /// Snapshot of every tracked connection. Used by broadcast and the
    /// liveness sweep so neither holds map shards while writing to senders.
    pub fn snapshot(&self) -> Vec<Arc<ConnectionHandle>> {
        self.connections
            .iter()
            .map(|entry| entry.value().clone())
            .collect()
    }

    /// Take every handle out of the registry. Process shutdown only.
    pub fn drain(&self) -> Vec<Arc<ConnectionHandle>> {
        let handles = self.snapshot();
        self.connections.clear();
        handles
    }

    /// Total connections plus the per-device-class breakdown.
    pub fn count(&self) -> ClientCounts {
        let mut total = 0;
        let mut by_device: HashMap<String, usize> = HashMap::new();
        for entry in self.connections.iter() {
            total += 1;
            let class = entry
                .value()
                .device_tag
                .as_deref()
                .and_then(|tag| tag.split('-').next())
                .unwrap_or("unknown");
            *by_device.entry(class.to_string()).or_default() += 1;
        }
        ClientCounts { total, by_device }
    }

    /// Add topics to the connection's subscription set. No-op when the
    /// identity has no active connection.
    pub fn subscribe(&self, identity: &str, topics: &[String]) {
        match self.lookup(identity) {
            Some(handle) => handle.add_topics(topics),
            None => tracing::debug!(identity = %identity, "subscribe: no active connection"),
        }
    }

    /// Remove topics from the connection's subscription set.
    pub fn unsubscribe(&self, identity: &str, topics: &[String]) {
        if let Some(handle) = self.lookup(identity) {
            handle.remove_topics(topics);
        }
    }

    /// Number of connections whose subscription set contains `topic`.
    /// Consulted for reporting only — broadcast ignores topic membership.
    pub fn subscriber_count(&self, topic: &str) -> usize {
        self.connections
            .iter()
            .filter(|entry| entry.value().subscribed_to(topic))
            .count()
    }
}

impl Default for Registry {
    fn default() -> Self {
        Self::new()
    }
}
