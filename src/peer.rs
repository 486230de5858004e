//! Peer record: one per live session, per `spec.md` §3.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use serde_json::Value;
use tokio::sync::oneshot;

use crate::connection::ConnectionHandle;
use crate::ids::{ConsumerId, PeerId, ProducerId, RoomId, SessionId};
use crate::media::{EngineConsumer, EngineProducer, EngineTransport};

#[derive(Clone)]
pub struct Peer(Arc<Inner>);

struct Inner {
    session_id: SessionId,
    peer_id: PeerId,
    state: Mutex<State>,
}

struct State {
    conn: Option<ConnectionHandle>,
    room_id: Option<RoomId>,
    send_transport: Option<Arc<dyn EngineTransport>>,
    recv_transport: Option<Arc<dyn EngineTransport>>,
    producers: HashMap<ProducerId, Arc<dyn EngineProducer>>,
    consumers: HashMap<ConsumerId, Arc<dyn EngineConsumer>>,
    rtp_capabilities: Option<Value>,
    grace_cancel: Option<oneshot::Sender<()>>,
    disconnected_at: Option<i64>,
}

impl Peer {
    pub fn new(session_id: SessionId, peer_id: PeerId, conn: ConnectionHandle) -> Self {
        Self(Arc::new(Inner {
            session_id,
            peer_id,
            state: Mutex::new(State {
                conn: Some(conn),
                room_id: None,
                send_transport: None,
                recv_transport: None,
                producers: HashMap::new(),
                consumers: HashMap::new(),
                rtp_capabilities: None,
                grace_cancel: None,
                disconnected_at: None,
            }),
        }))
    }

    pub fn session_id(&self) -> &SessionId {
        &self.0.session_id
    }
    pub fn peer_id(&self) -> &PeerId {
        &self.0.peer_id
    }

    pub fn room_id(&self) -> Option<RoomId> {
        self.0.state.lock().unwrap().room_id.clone()
    }
    pub fn set_room_id(&self, room_id: Option<RoomId>) {
        self.0.state.lock().unwrap().room_id = room_id;
    }

    pub fn conn(&self) -> Option<ConnectionHandle> {
        self.0.state.lock().unwrap().conn.clone()
    }

    /// Replace the connection handle, returning the prior one if it
    /// differs (the caller closes it, per the adopt-semantics of
    /// `spec.md` §4.4).
    pub fn replace_conn(&self, conn: ConnectionHandle) -> Option<ConnectionHandle> {
        let mut state = self.0.state.lock().unwrap();
        let prior = state.conn.replace(conn.clone());
        match prior {
            Some(prior) if prior != conn => Some(prior),
            _ => None,
        }
    }

    pub fn send(&self, msg: serde_json::Value) {
        if let Some(conn) = self.conn() {
            conn.send(msg);
        }
    }

    pub fn send_transport(&self) -> Option<Arc<dyn EngineTransport>> {
        self.0.state.lock().unwrap().send_transport.clone()
    }
    pub fn recv_transport(&self) -> Option<Arc<dyn EngineTransport>> {
        self.0.state.lock().unwrap().recv_transport.clone()
    }
    pub fn set_send_transport(&self, t: Option<Arc<dyn EngineTransport>>) -> Option<Arc<dyn EngineTransport>> {
        std::mem::replace(&mut self.0.state.lock().unwrap().send_transport, t)
    }
    pub fn set_recv_transport(&self, t: Option<Arc<dyn EngineTransport>>) -> Option<Arc<dyn EngineTransport>> {
        std::mem::replace(&mut self.0.state.lock().unwrap().recv_transport, t)
    }

    pub fn rtp_capabilities(&self) -> Option<Value> {
        self.0.state.lock().unwrap().rtp_capabilities.clone()
    }
    pub fn set_rtp_capabilities(&self, caps: Value) {
        self.0.state.lock().unwrap().rtp_capabilities = Some(caps);
    }

    pub fn add_producer(&self, id: ProducerId, producer: Arc<dyn EngineProducer>) {
        self.0.state.lock().unwrap().producers.insert(id, producer);
    }
    pub fn get_producer(&self, id: &ProducerId) -> Option<Arc<dyn EngineProducer>> {
        self.0.state.lock().unwrap().producers.get(id).cloned()
    }
    pub fn take_producers(&self) -> HashMap<ProducerId, Arc<dyn EngineProducer>> {
        std::mem::take(&mut self.0.state.lock().unwrap().producers)
    }

    pub fn add_consumer(&self, id: ConsumerId, consumer: Arc<dyn EngineConsumer>) {
        self.0.state.lock().unwrap().consumers.insert(id, consumer);
    }
    pub fn get_consumer(&self, id: &ConsumerId) -> Option<Arc<dyn EngineConsumer>> {
        self.0.state.lock().unwrap().consumers.get(id).cloned()
    }
    pub fn take_consumers(&self) -> HashMap<ConsumerId, Arc<dyn EngineConsumer>> {
        std::mem::take(&mut self.0.state.lock().unwrap().consumers)
    }

    /// Close and forget send/recv transports, producers, and consumers.
    /// Used both by `resetPeerMedia` (no broadcast) and final destruction
    /// (caller broadcasts separately).
    pub async fn clear_media(&self) {
        let (send_t, recv_t, producers, consumers) = {
            let mut state = self.0.state.lock().unwrap();
            (
                state.send_transport.take(),
                state.recv_transport.take(),
                std::mem::take(&mut state.producers),
                std::mem::take(&mut state.consumers),
            )
        };
        for (_, consumer) in consumers {
            consumer.close().await;
        }
        for (_, producer) in producers {
            producer.close().await;
        }
        if let Some(t) = send_t {
            t.close().await;
        }
        if let Some(t) = recv_t {
            t.close().await;
        }
    }

    /// Install a grace-cancel handle, dropping (and thereby cancelling) any
    /// previously-armed one. Idempotent on re-arm, per `spec.md` §4.2.
    pub fn arm_grace(&self, cancel: oneshot::Sender<()>, disconnected_at: i64) {
        let mut state = self.0.state.lock().unwrap();
        state.grace_cancel = Some(cancel); // dropping the old sender cancels it
        state.disconnected_at = Some(disconnected_at);
    }

    /// Disarm the grace timer if one is armed. Idempotent.
    pub fn disarm_grace(&self) {
        let mut state = self.0.state.lock().unwrap();
        state.grace_cancel = None;
        state.disconnected_at = None;
    }

    pub fn is_grace_armed(&self) -> bool {
        self.0.state.lock().unwrap().grace_cancel.is_some()
    }
}

impl PartialEq for Peer {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}
impl Eq for Peer {}
