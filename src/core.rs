//! Ties C1–C6 together behind a single handle shared by the dispatcher (C5)
//! and connection supervisor (C7).

use std::sync::Arc;

use crate::connection::ConnectionHandle;
use crate::error::DispatchError;
use crate::ids::{PeerId, SessionId};
use crate::media::MediaEngine;
use crate::peer::Peer;
use crate::protocol::OutgoingMessage;
use crate::room::{self, Room, RoomRegistry};
use crate::session_registry::SessionRegistry;
use crate::token::TokenCodec;

pub struct Core {
    pub tokens: TokenCodec,
    pub sessions: Arc<SessionRegistry>,
    pub rooms: RoomRegistry,
}

impl Core {
    pub fn new(token_secret: impl Into<Vec<u8>>, engine: Arc<dyn MediaEngine>) -> Arc<Self> {
        Arc::new(Self {
            tokens: TokenCodec::new(token_secret),
            sessions: Arc::new(SessionRegistry::new()),
            rooms: RoomRegistry::new(engine),
        })
    }

    /// Adopt or create a peer for `session_id`/`peer_id`, joining `room`.
    /// Implements the adopt-semantics of `spec.md` §4.4 when a record
    /// already exists for `session_id`. Returns the peer and whether a
    /// `peerJoined` broadcast is owed (it is skipped only when the peer was
    /// already an active member of this exact room, which cannot actually
    /// happen on the `join`/`resumeSession` call paths but is kept explicit
    /// for clarity).
    pub async fn adopt_peer(
        self: &Arc<Self>,
        room: &Room,
        peer_id: &PeerId,
        session_id: &SessionId,
        conn: ConnectionHandle,
    ) -> Result<Peer, DispatchError> {
        match self.sessions.lookup(session_id) {
            Some(existing) => {
                if existing.peer_id() != peer_id {
                    return Err(DispatchError::PeerIdMismatch);
                }
                self.sessions.disarm_grace(&existing);
                self.reset_peer_media(room, &existing);
                if let Some(prior_conn) = existing.replace_conn(conn) {
                    prior_conn.close();
                }
                if existing.room_id().as_ref() != Some(room.room_id()) {
                    existing.set_room_id(Some(room.room_id().clone()));
                    room.add_peer(existing.clone());
                }
                Ok(existing)
            }
            None => {
                let peer = Peer::new(session_id.clone(), peer_id.clone(), conn);
                peer.set_room_id(Some(room.room_id().clone()));
                self.sessions.insert(peer.clone());
                room.add_peer(peer.clone());
                Ok(peer)
            }
        }
    }

    /// `resetPeerMedia`: close and forget a peer's transports, producers,
    /// and consumers, silently dropping its entries from the room's
    /// producer index and speaking set. Idempotent; never broadcasts.
    pub fn reset_peer_media(&self, room: &Room, peer: &Peer) {
        room.remove_producers_of(peer.peer_id());
        let peer = peer.clone();
        tokio::spawn(async move { peer.clear_media().await });
    }

    /// `destroyPeer`: final teardown on grace expiry or explicit leave.
    /// Removes the peer from its room, broadcasts `producerClosed` for each
    /// owned producer and `peerLeft`, closes all media objects, and
    /// destroys the room if it is now empty.
    pub async fn destroy_peer(self: &Arc<Self>, peer: &Peer) {
        let room_id = match peer.room_id() {
            Some(id) => id,
            None => {
                self.sessions.remove(peer.session_id());
                return;
            }
        };
        let room = self.rooms.get(&room_id);

        if let Some(room) = &room {
            for (producer_id, kind) in room.remove_producers_of(peer.peer_id()) {
                room.broadcast(
                    &OutgoingMessage::ProducerClosed {
                        producer_id,
                        peer_id: peer.peer_id().clone(),
                        kind,
                        reason: "left",
                    },
                    None,
                );
            }
            room.remove_peer(peer.peer_id());
            room.broadcast(
                &OutgoingMessage::PeerLeft {
                    peer_id: peer.peer_id().clone(),
                },
                None,
            );
        }

        peer.clear_media().await;
        self.sessions.remove(peer.session_id());

        if let Some(room) = room {
            self.rooms.destroy_if_empty(&room_id).await;
            let _ = room;
        }
    }

    pub fn build_join_response(room: &Room, peer: &Peer) -> serde_json::Value {
        let (existing_peers, existing_producers) = room::snapshot(room, peer.peer_id());
        serde_json::json!({
            "roomId": room.room_id(),
            "sessionId": peer.session_id(),
            "peerId": peer.peer_id(),
            "rtpCapabilities": room.rtp_capabilities(),
            "existingPeers": existing_peers,
            "existingProducers": existing_producers,
        })
    }
}
