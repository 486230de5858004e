//! A connection-agnostic send handle. The real binary backs this with a
//! `warp` WebSocket sink; tests back it with a plain channel they can drain
//! and assert against. Equality is by connection identity, used by the
//! connection supervisor (C7) to find the peer owning a dropped socket.

use std::future::Future;
use std::sync::Arc;

use serde_json::Value;
use tokio::sync::{mpsc, Notify};
use uuid::Uuid;

#[derive(Clone)]
pub struct ConnectionHandle {
    id: Uuid,
    tx: mpsc::UnboundedSender<Value>,
    close: Arc<Notify>,
}

impl ConnectionHandle {
    pub fn new(tx: mpsc::UnboundedSender<Value>) -> Self {
        Self {
            id: Uuid::new_v4(),
            tx,
            close: Arc::new(Notify::new()),
        }
    }

    /// Swallows send failures: one stuck or gone peer must never block
    /// delivery to the rest of a room.
    pub fn send(&self, msg: Value) {
        if self.tx.send(msg).is_err() {
            log::debug!("connection {} dropped, discarding message", self.id);
        }
    }

    /// Ask the connection supervisor to close this socket, used when a
    /// reconnect or resume supersedes it.
    pub fn close(&self) {
        self.close.notify_one();
    }

    /// Resolves once [`Self::close`] has been called.
    pub fn closed(&self) -> impl Future<Output = ()> + '_ {
        self.close.notified()
    }
}

impl PartialEq for ConnectionHandle {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}
impl Eq for ConnectionHandle {}
