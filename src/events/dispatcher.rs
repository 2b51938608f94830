//! Packet and connection-update fan-out
//!
//! Listener lists are copy-on-write: dispatch clones an `Arc` snapshot and
//! invokes listeners without holding the lock, so listeners may register or
//! remove other listeners while being called.

use super::{ConnectionUpdate, QualitySample};
use parking_lot::RwLock;
use rover_shared::Packet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Callback for decoded packets
pub type PacketListener = Arc<dyn Fn(&Packet) + Send + Sync>;

/// Callback for connection updates
pub type ConnectionListener = Arc<dyn Fn(&ConnectionUpdate) + Send + Sync>;

/// Handle returned on registration, used for removal
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

type ListenerList<L> = RwLock<Arc<Vec<(ListenerId, L)>>>;

/// Fans decoded packets and connection updates out to registered listeners
///
/// Listeners run synchronously on the dispatching task and must not block.
pub struct PacketDispatcher {
    next_id: AtomicU64,
    packet_listeners: ListenerList<PacketListener>,
    connection_listeners: ListenerList<ConnectionListener>,
}

impl PacketDispatcher {
    pub fn new() -> Self {
        Self {
            next_id: AtomicU64::new(1),
            packet_listeners: RwLock::new(Arc::new(Vec::new())),
            connection_listeners: RwLock::new(Arc::new(Vec::new())),
        }
    }

    fn next_id(&self) -> ListenerId {
        ListenerId(self.next_id.fetch_add(1, Ordering::Relaxed))
    }

    /// Register a packet listener
    pub fn add_packet_listener<F>(&self, listener: F) -> ListenerId
    where
        F: Fn(&Packet) + Send + Sync + 'static,
    {
        let id = self.next_id();
        let listener: PacketListener = Arc::new(listener);
        add(&self.packet_listeners, id, listener);
        id
    }

    /// Register a connection-update listener
    pub fn add_connection_listener<F>(&self, listener: F) -> ListenerId
    where
        F: Fn(&ConnectionUpdate) + Send + Sync + 'static,
    {
        let id = self.next_id();
        let listener: ConnectionListener = Arc::new(listener);
        add(&self.connection_listeners, id, listener);
        id
    }

    /// Remove a listener from whichever list holds it
    pub fn remove_listener(&self, id: ListenerId) -> bool {
        remove(&self.packet_listeners, id) || remove(&self.connection_listeners, id)
    }

    /// Deliver a decoded packet to every packet listener
    pub fn dispatch_packet(&self, packet: &Packet) {
        let snapshot = self.packet_listeners.read().clone();
        for (_, listener) in snapshot.iter() {
            listener(packet);
        }
    }

    /// Deliver a connection update to every connection listener
    pub fn dispatch_connection(&self, update: ConnectionUpdate) {
        let snapshot = self.connection_listeners.read().clone();
        for (_, listener) in snapshot.iter() {
            listener(&update);
        }
    }

    pub fn dispatch_status(&self, connected: bool) {
        self.dispatch_connection(ConnectionUpdate::Status { connected });
    }

    pub fn dispatch_quality(&self, sample: QualitySample) {
        self.dispatch_connection(ConnectionUpdate::Quality(sample));
    }

    /// Number of registered listeners across both lists
    pub fn listener_count(&self) -> usize {
        self.packet_listeners.read().len() + self.connection_listeners.read().len()
    }
}

impl Default for PacketDispatcher {
    fn default() -> Self {
        Self::new()
    }
}

fn add<L: Clone>(list: &ListenerList<L>, id: ListenerId, listener: L) {
    let mut guard = list.write();
    let mut next = Vec::clone(&guard);
    next.push((id, listener));
    *guard = Arc::new(next);
}

fn remove<L: Clone>(list: &ListenerList<L>, id: ListenerId) -> bool {
    let mut guard = list.write();
    if !guard.iter().any(|(existing, _)| *existing == id) {
        return false;
    }
    let next = guard
        .iter()
        .filter(|(existing, _)| *existing != id)
        .cloned()
        .collect();
    *guard = Arc::new(next);
    true
}
