//! C2 — Session Registry: process-wide map from `sessionId` to peer record,
//! owning grace timers for reconnect.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use tokio::sync::oneshot;
use tokio::time::Duration;

use crate::connection::ConnectionHandle;
use crate::ids::SessionId;
use crate::peer::Peer;

/// Grace window: time a dropped peer's identity and room membership survive
/// a connection loss before final destruction.
pub const GRACE_WINDOW: Duration = Duration::from_secs(25);

#[derive(Default)]
pub struct SessionRegistry {
    peers: Mutex<HashMap<SessionId, Peer>>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn lookup(&self, session_id: &SessionId) -> Option<Peer> {
        self.peers.lock().unwrap().get(session_id).cloned()
    }

    pub fn insert(&self, peer: Peer) {
        self.peers
            .lock()
            .unwrap()
            .insert(peer.session_id().clone(), peer);
    }

    pub fn remove(&self, session_id: &SessionId) -> Option<Peer> {
        self.peers.lock().unwrap().remove(session_id)
    }

    /// Arm a peer's grace timer, cancelling any timer already armed for it.
    /// `on_expiry` runs once the timer fires without being cancelled.
    pub fn arm_grace<F>(self: &Arc<Self>, peer: &Peer, now: i64, on_expiry: F)
    where
        F: FnOnce() -> futures::future::BoxFuture<'static, ()> + Send + 'static,
    {
        let (tx, rx) = oneshot::channel();
        peer.arm_grace(tx, now);
        let peer_for_timer = peer.clone();
        tokio::spawn(async move {
            tokio::select! {
                _ = tokio::time::sleep(GRACE_WINDOW) => {
                    if peer_for_timer.is_grace_armed() {
                        peer_for_timer.disarm_grace();
                        on_expiry().await;
                    }
                }
                _ = rx => {
                    // cancelled by a resume/disarm
                }
            }
        });
    }

    pub fn disarm_grace(&self, peer: &Peer) {
        peer.disarm_grace();
    }

    /// Find the peer currently owning `conn`, per C7's disconnect handling.
    /// Linear scan is acceptable at target scale, per `spec.md` §4.6.
    pub fn find_by_connection(&self, conn: &ConnectionHandle) -> Option<Peer> {
        self.peers
            .lock()
            .unwrap()
            .values()
            .find(|p| p.conn().as_ref() == Some(conn))
            .cloned()
    }
}
