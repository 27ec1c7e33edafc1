//! # Connection Registry
//!
//! Tracks live websocket connections and groups authenticated ones into
//! rooms keyed by candidate id. A candidate with two tabs open has two
//! connections in one room.
//!
//! Connections register a [`Recipient`] for [`RoomEvent`]; delivery is a
//! fire-and-forget `do_send` into each connection's mailbox.

use actix::prelude::*;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};
use tracing::debug;
use uuid::Uuid;

/// An outbound `{event, data}` addressed to a room.
#[derive(Debug, Clone, Message)]
#[rtype(result = "()")]
pub struct RoomEvent {
    pub event: String,
    pub data: Value,
}

impl RoomEvent {
    pub fn new(event: impl Into<String>, data: Value) -> Self {
        Self {
            event: event.into(),
            data,
        }
    }
}

#[derive(Debug, Default)]
pub struct ConnectionRegistry {
    connections: AtomicUsize,
    rooms: RwLock<HashMap<String, HashMap<Uuid, Recipient<RoomEvent>>>>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Claim a connection slot. Fails when `limit` connections are open.
    pub fn try_open(&self, limit: usize) -> bool {
        self.connections
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |open| {
                (open < limit).then_some(open + 1)
            })
            .is_ok()
    }

    /// Release a slot claimed by [`try_open`](Self::try_open).
    pub fn close(&self) {
        let _ = self
            .connections
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |open| open.checked_sub(1));
    }

    pub fn join(&self, candidate_id: &str, connection_id: Uuid, recipient: Recipient<RoomEvent>) {
        self.write()
            .entry(candidate_id.to_string())
            .or_default()
            .insert(connection_id, recipient);
        debug!(candidate_id, %connection_id, "Connection joined room");
    }

    pub fn leave(&self, candidate_id: &str, connection_id: Uuid) {
        let mut rooms = self.write();
        if let Some(room) = rooms.get_mut(candidate_id) {
            room.remove(&connection_id);
            if room.is_empty() {
                rooms.remove(candidate_id);
            }
        }
        debug!(candidate_id, %connection_id, "Connection left room");
    }

    /// Send `event` to every connection of a candidate. Returns how many
    /// connections it was handed to.
    pub fn deliver(&self, candidate_id: &str, event: RoomEvent) -> usize {
        let rooms = self.read();
        let Some(room) = rooms.get(candidate_id) else {
            return 0;
        };
        for recipient in room.values() {
            recipient.do_send(event.clone());
        }
        room.len()
    }

    pub fn connection_count(&self) -> usize {
        self.connections.load(Ordering::SeqCst)
    }

    pub fn room_count(&self) -> usize {
        self.read().len()
    }

    pub fn members(&self, candidate_id: &str) -> usize {
        self.read().get(candidate_id).map_or(0, HashMap::len)
    }

    fn read(&self) -> RwLockReadGuard<'_, HashMap<String, HashMap<Uuid, Recipient<RoomEvent>>>> {
        self.rooms.read().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, HashMap<String, HashMap<Uuid, Recipient<RoomEvent>>>> {
        self.rooms.write().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tokio::sync::mpsc;

    struct Collector {
        tx: mpsc::UnboundedSender<RoomEvent>,
    }

    impl Actor for Collector {
        type Context = Context<Self>;
    }

    impl Handler<RoomEvent> for Collector {
        type Result = ();

        fn handle(&mut self, msg: RoomEvent, _ctx: &mut Self::Context) {
            let _ = self.tx.send(msg);
        }
    }

    fn collector() -> (Recipient<RoomEvent>, mpsc::UnboundedReceiver<RoomEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Collector { tx }.start().recipient(), rx)
    }

    #[test]
    fn test_connection_limit() {
        let registry = ConnectionRegistry::new();
        assert!(registry.try_open(2));
        assert!(registry.try_open(2));
        assert!(!registry.try_open(2));
        registry.close();
        assert!(registry.try_open(2));
        assert_eq!(registry.connection_count(), 2);

        registry.close();
        registry.close();
        registry.close();
        assert_eq!(registry.connection_count(), 0);
    }

    #[actix_web::test]
    async fn test_deliver_reaches_every_tab_of_candidate() {
        let registry = ConnectionRegistry::new();
        let (tab_a, mut rx_a) = collector();
        let (tab_b, mut rx_b) = collector();
        let (other, mut rx_other) = collector();

        let (id_a, id_b) = (Uuid::new_v4(), Uuid::new_v4());
        registry.join("c1", id_a, tab_a);
        registry.join("c1", id_b, tab_b);
        registry.join("c2", Uuid::new_v4(), other);
        assert_eq!(registry.room_count(), 2);

        let sent = registry.deliver("c1", RoomEvent::new("interview-started", json!({"ok": true})));
        assert_eq!(sent, 2);
        assert_eq!(rx_a.recv().await.unwrap().event, "interview-started");
        assert_eq!(rx_b.recv().await.unwrap().data, json!({"ok": true}));
        assert!(rx_other.try_recv().is_err());

        registry.leave("c1", id_a);
        assert_eq!(registry.members("c1"), 1);
        registry.leave("c1", id_b);
        assert_eq!(registry.room_count(), 1);
        assert_eq!(registry.deliver("c1", RoomEvent::new("x", json!(null))), 0);
    }
}
