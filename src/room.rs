//! C3 — Room Registry, plus C6's event broadcaster helpers that operate on
//! a room's peer map.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, Weak};

use futures::StreamExt;
use serde_json::json;
use tokio_stream::wrappers::errors::BroadcastStreamRecvError;
use tokio_stream::wrappers::BroadcastStream;

use crate::error::EngineError;
use crate::ids::{MediaKind, PeerId, ProducerId};
use crate::media::{EngineLevelObserver, EngineRouter, LevelObserverEvent, MediaEngine};
use crate::peer::Peer;
use crate::protocol::OutgoingMessage;

struct ProducerEntry {
    peer_id: PeerId,
    kind: MediaKind,
}

struct State {
    peers: HashMap<PeerId, Peer>,
    producers: HashMap<ProducerId, ProducerEntry>,
    speaking: HashSet<ProducerId>,
}

pub struct Inner {
    room_id: crate::ids::RoomId,
    router: Arc<dyn EngineRouter>,
    level_observer: Arc<dyn EngineLevelObserver>,
    state: Mutex<State>,
}

#[derive(Clone)]
pub struct Room(Arc<Inner>);

#[derive(Clone)]
pub struct WeakRoom(Weak<Inner>);

impl WeakRoom {
    pub fn upgrade(&self) -> Option<Room> {
        self.0.upgrade().map(Room)
    }
}

impl Room {
    pub fn downgrade(&self) -> WeakRoom {
        WeakRoom(Arc::downgrade(&self.0))
    }

    pub fn room_id(&self) -> &crate::ids::RoomId {
        &self.0.room_id
    }

    pub fn router(&self) -> &Arc<dyn EngineRouter> {
        &self.0.router
    }

    pub fn rtp_capabilities(&self) -> serde_json::Value {
        self.0.router.rtp_capabilities()
    }

    pub fn level_observer(&self) -> &Arc<dyn EngineLevelObserver> {
        &self.0.level_observer
    }

    pub fn is_empty(&self) -> bool {
        self.0.state.lock().unwrap().peers.is_empty()
    }

    pub fn add_peer(&self, peer: Peer) {
        self.0
            .state
            .lock()
            .unwrap()
            .peers
            .insert(peer.peer_id().clone(), peer);
    }

    pub fn remove_peer(&self, peer_id: &PeerId) {
        self.0.state.lock().unwrap().peers.remove(peer_id);
    }

    pub fn peers(&self) -> Vec<Peer> {
        self.0.state.lock().unwrap().peers.values().cloned().collect()
    }

    pub fn peer_ids(&self) -> Vec<PeerId> {
        self.0.state.lock().unwrap().peers.keys().cloned().collect()
    }

    pub fn add_producer(&self, producer_id: ProducerId, peer_id: PeerId, kind: MediaKind) {
        self.0
            .state
            .lock()
            .unwrap()
            .producers
            .insert(producer_id, ProducerEntry { peer_id, kind });
    }

    /// Remove `producer_id` from the index and speaking set. Returns the
    /// entry if it was present, so callers can decide whether to broadcast.
    pub fn remove_producer(&self, producer_id: &ProducerId) -> Option<(PeerId, MediaKind)> {
        let mut state = self.0.state.lock().unwrap();
        state.speaking.remove(producer_id);
        state
            .producers
            .remove(producer_id)
            .map(|e| (e.peer_id, e.kind))
    }

    /// Remove every producer owned by `peer_id`, returning their ids and
    /// kinds. Used by `resetPeerMedia` (silent) and final destruction
    /// (caller broadcasts `producerClosed` for each).
    pub fn remove_producers_of(&self, peer_id: &PeerId) -> Vec<(ProducerId, MediaKind)> {
        let mut state = self.0.state.lock().unwrap();
        let ids: Vec<ProducerId> = state
            .producers
            .iter()
            .filter(|(_, e)| &e.peer_id == peer_id)
            .map(|(id, _)| *id)
            .collect();
        let mut out = Vec::with_capacity(ids.len());
        for id in ids {
            state.speaking.remove(&id);
            if let Some(e) = state.producers.remove(&id) {
                out.push((id, e.kind));
            }
        }
        out
    }

    pub fn list_producers(&self) -> Vec<(ProducerId, PeerId, MediaKind)> {
        self.0
            .state
            .lock()
            .unwrap()
            .producers
            .iter()
            .map(|(id, e)| (*id, e.peer_id.clone(), e.kind))
            .collect()
    }

    pub fn producer_entry(&self, producer_id: &ProducerId) -> Option<(PeerId, MediaKind)> {
        self.0
            .state
            .lock()
            .unwrap()
            .producers
            .get(producer_id)
            .map(|e| (e.peer_id.clone(), e.kind))
    }

    /// Send `msg` to every room member except, optionally, one peer.
    pub fn broadcast(&self, msg: &OutgoingMessage, exclude: Option<&PeerId>) {
        let value = msg.clone().into_value();
        let peers = self.0.state.lock().unwrap().peers.clone();
        for (peer_id, peer) in peers {
            if Some(&peer_id) == exclude {
                continue;
            }
            peer.send(value.clone());
        }
    }

    /// Apply one tick from the room's level observer, emitting
    /// `producerSpeaking` events per `spec.md` §4.3.
    fn handle_level_event(&self, event: LevelObserverEvent) {
        match event {
            LevelObserverEvent::Volumes(volumes) => {
                let mut state = self.0.state.lock().unwrap();
                let mut active = HashSet::new();
                let mut to_emit = Vec::new();
                for (producer_id, volume) in volumes {
                    active.insert(producer_id);
                    if let Some(entry) = state.producers.get(&producer_id) {
                        to_emit.push(OutgoingMessage::ProducerSpeaking {
                            producer_id,
                            peer_id: entry.peer_id.clone(),
                            speaking: true,
                            volume: Some(volume),
                        });
                    }
                }
                let went_silent: Vec<ProducerId> =
                    state.speaking.difference(&active).copied().collect();
                for producer_id in &went_silent {
                    if let Some(entry) = state.producers.get(producer_id) {
                        to_emit.push(OutgoingMessage::ProducerSpeaking {
                            producer_id: *producer_id,
                            peer_id: entry.peer_id.clone(),
                            speaking: false,
                            volume: None,
                        });
                    }
                }
                state.speaking = active;
                drop(state);
                for msg in to_emit {
                    self.broadcast(&msg, None);
                }
            }
            LevelObserverEvent::Silence => {
                let mut state = self.0.state.lock().unwrap();
                let silent: Vec<(ProducerId, PeerId)> = state
                    .speaking
                    .iter()
                    .filter_map(|id| state.producers.get(id).map(|e| (*id, e.peer_id.clone())))
                    .collect();
                state.speaking.clear();
                drop(state);
                for (producer_id, peer_id) in silent {
                    self.broadcast(
                        &OutgoingMessage::ProducerSpeaking {
                            producer_id,
                            peer_id,
                            speaking: false,
                            volume: None,
                        },
                        None,
                    );
                }
            }
        }
    }

    pub async fn close(&self) {
        self.0.level_observer.close().await;
        self.0.router.close().await;
    }
}

/// Process-wide room table: creates routers lazily, tears rooms down when
/// empty, per `spec.md` §4.3.
pub struct RoomRegistry {
    engine: Arc<dyn MediaEngine>,
    rooms: Mutex<HashMap<crate::ids::RoomId, Room>>,
}

impl RoomRegistry {
    pub fn new(engine: Arc<dyn MediaEngine>) -> Self {
        Self {
            engine,
            rooms: Mutex::new(HashMap::new()),
        }
    }

    pub fn get(&self, room_id: &crate::ids::RoomId) -> Option<Room> {
        self.rooms.lock().unwrap().get(room_id).cloned()
    }

    /// Idempotent by `roomId`: returns the existing room or creates one with
    /// a fresh router and level observer, spawning the task that drives the
    /// speaking-state stream. The driver holds only a weak room reference so
    /// the room can be reclaimed once its peer map empties.
    pub async fn get_or_create(
        &self,
        room_id: &crate::ids::RoomId,
    ) -> Result<Room, EngineError> {
        if let Some(room) = self.get(room_id) {
            return Ok(room);
        }
        let router = self.engine.create_router().await?;
        let level_observer = router.create_level_observer().await?;
        let room = Room(Arc::new(Inner {
            room_id: room_id.clone(),
            router,
            level_observer: level_observer.clone(),
            state: Mutex::new(State {
                peers: HashMap::new(),
                producers: HashMap::new(),
                speaking: HashSet::new(),
            }),
        }));
        self.rooms.lock().unwrap().insert(room_id.clone(), room.clone());

        let weak_room = room.downgrade();
        let mut events = BroadcastStream::new(level_observer.subscribe());
        tokio::spawn(async move {
            while let Some(item) = events.next().await {
                let event = match item {
                    Ok(event) => event,
                    Err(BroadcastStreamRecvError::Lagged(_)) => continue,
                };
                match weak_room.upgrade() {
                    Some(room) => room.handle_level_event(event),
                    None => break,
                }
            }
        });

        Ok(room)
    }

    /// Close and unpublish a room once its peer map is empty. No-op if the
    /// room still has members or is already gone.
    pub async fn destroy_if_empty(&self, room_id: &crate::ids::RoomId) {
        let room = {
            let mut rooms = self.rooms.lock().unwrap();
            match rooms.get(room_id) {
                Some(room) if room.is_empty() => rooms.remove(room_id),
                _ => None,
            }
        };
        if let Some(room) = room {
            room.close().await;
        }
    }
}

/// Convenience: build the `rtpCapabilities`/`existingPeers`/`existingProducers`
/// shape shared by `join`/`resumeSession` responses.
pub fn snapshot(room: &Room, exclude: &PeerId) -> (serde_json::Value, serde_json::Value) {
    let existing_peers: Vec<_> = room
        .peer_ids()
        .into_iter()
        .filter(|id| id != exclude)
        .map(|id| json!({ "peerId": id }))
        .collect();
    let existing_producers: Vec<_> = room
        .list_producers()
        .into_iter()
        .filter(|(_, peer_id, _)| peer_id != exclude)
        .map(|(producer_id, peer_id, kind)| {
            json!({ "producerId": producer_id, "peerId": peer_id, "kind": kind })
        })
        .collect();
    (json!(existing_peers), json!(existing_producers))
}
