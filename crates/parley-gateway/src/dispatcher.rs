use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use serde::Serialize;
use tokio::sync::{RwLock, broadcast, mpsc};
use uuid::Uuid;

pub type ConnId = Uuid;

/// A broadcast frame: pre-serialized event plus the connection it should
/// skip (typing indicators exclude their originator).
#[derive(Debug, Clone)]
pub struct BroadcastFrame {
    pub skip: Option<ConnId>,
    pub json: Arc<str>,
}

/// Explicit publish/subscribe layer: room membership sets plus a registry
/// of per-connection output queues. Room publishes push to each member's
/// queue in send order; global events go over a broadcast bus that each
/// connection loop filters. One instance per variant — the two bounded
/// contexts never share a bus.
#[derive(Clone)]
pub struct Dispatcher {
    inner: Arc<DispatcherInner>,
}

struct DispatcherInner {
    broadcast_tx: broadcast::Sender<BroadcastFrame>,
    conns: RwLock<HashMap<ConnId, mpsc::UnboundedSender<Arc<str>>>>,
    rooms: RwLock<HashMap<String, HashSet<ConnId>>>,
}

impl Default for Dispatcher {
    fn default() -> Self {
        Self::new()
    }
}

impl Dispatcher {
    pub fn new() -> Self {
        let (broadcast_tx, _) = broadcast::channel(1024);
        Self {
            inner: Arc::new(DispatcherInner {
                broadcast_tx,
                conns: RwLock::new(HashMap::new()),
                rooms: RwLock::new(HashMap::new()),
            }),
        }
    }

    /// Subscribe to the global bus. Connection loops filter frames whose
    /// `skip` matches their own id.
    pub fn subscribe(&self) -> broadcast::Receiver<BroadcastFrame> {
        self.inner.broadcast_tx.subscribe()
    }

    /// Register a connection output queue. Returns (conn_id, receiver).
    pub async fn register(&self) -> (ConnId, mpsc::UnboundedReceiver<Arc<str>>) {
        let conn_id = Uuid::new_v4();
        let (tx, rx) = mpsc::unbounded_channel();
        self.inner.conns.write().await.insert(conn_id, tx);
        (conn_id, rx)
    }

    /// Drop a connection: removes its queue and its room memberships.
    pub async fn unregister(&self, conn_id: ConnId) {
        self.inner.conns.write().await.remove(&conn_id);

        let mut rooms = self.inner.rooms.write().await;
        rooms.retain(|_, members| {
            members.remove(&conn_id);
            !members.is_empty()
        });
    }

    pub async fn join_room(&self, room: &str, conn_id: ConnId) {
        self.inner
            .rooms
            .write()
            .await
            .entry(room.to_string())
            .or_default()
            .insert(conn_id);
    }

    /// Push `event` to every current member of `room`. Fire-and-forget:
    /// nobody subscribed means nobody hears it (persistence is the caller's
    /// job, not the router's).
    pub async fn publish_room<E: Serialize>(&self, room: &str, event: &E) {
        let json = encode(event);

        let rooms = self.inner.rooms.read().await;
        let Some(members) = rooms.get(room) else {
            return;
        };

        let conns = self.inner.conns.read().await;
        for conn_id in members {
            if let Some(tx) = conns.get(conn_id) {
                let _ = tx.send(json.clone());
            }
        }
    }

    /// Send a targeted event to one connection (login responses, history
    /// replay).
    pub async fn send_to<E: Serialize>(&self, conn_id: ConnId, event: &E) {
        let conns = self.inner.conns.read().await;
        if let Some(tx) = conns.get(&conn_id) {
            let _ = tx.send(encode(event));
        }
    }

    /// Broadcast an event to every subscribed connection.
    pub fn broadcast<E: Serialize>(&self, event: &E) {
        let _ = self.inner.broadcast_tx.send(BroadcastFrame {
            skip: None,
            json: encode(event),
        });
    }

    /// Broadcast to everyone except the originating connection.
    pub fn broadcast_excluding<E: Serialize>(&self, origin: ConnId, event: &E) {
        let _ = self.inner.broadcast_tx.send(BroadcastFrame {
            skip: Some(origin),
            json: encode(event),
        });
    }
}

fn encode<E: Serialize>(event: &E) -> Arc<str> {
    serde_json::to_string(event)
        .expect("gateway events serialize infallibly")
        .into()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Serialize;

    #[derive(Serialize)]
    struct Ping {
        seq: u32,
    }

    #[tokio::test]
    async fn room_publish_reaches_members_only() {
        let dispatcher = Dispatcher::new();
        let (member, mut member_rx) = dispatcher.register().await;
        let (_outsider, mut outsider_rx) = dispatcher.register().await;

        dispatcher.join_room("alice_bob", member).await;
        dispatcher.publish_room("alice_bob", &Ping { seq: 1 }).await;

        let frame = member_rx.recv().await.unwrap();
        assert!(frame.contains("\"seq\":1"));
        assert!(outsider_rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn room_publish_preserves_send_order() {
        let dispatcher = Dispatcher::new();
        let (member, mut rx) = dispatcher.register().await;
        dispatcher.join_room("r", member).await;

        for seq in 0..10u32 {
            dispatcher.publish_room("r", &Ping { seq }).await;
        }
        for seq in 0..10u32 {
            let frame = rx.recv().await.unwrap();
            assert!(frame.contains(&format!("\"seq\":{}", seq)));
        }
    }

    #[tokio::test]
    async fn publish_to_empty_room_is_fire_and_forget() {
        let dispatcher = Dispatcher::new();
        // No members joined; must not panic or block.
        dispatcher.publish_room("nobody_home", &Ping { seq: 1 }).await;
    }

    #[tokio::test]
    async fn unregister_leaves_all_rooms() {
        let dispatcher = Dispatcher::new();
        let (conn, mut rx) = dispatcher.register().await;
        dispatcher.join_room("a_b", conn).await;
        dispatcher.unregister(conn).await;

        dispatcher.publish_room("a_b", &Ping { seq: 1 }).await;
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn broadcast_excluding_marks_the_origin() {
        let dispatcher = Dispatcher::new();
        let (origin, _rx) = dispatcher.register().await;
        let mut bus = dispatcher.subscribe();

        dispatcher.broadcast_excluding(origin, &Ping { seq: 7 });
        let frame = bus.recv().await.unwrap();
        assert_eq!(frame.skip, Some(origin));
        assert!(frame.json.contains("\"seq\":7"));
    }
}
