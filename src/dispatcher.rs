//! C5 — Request Dispatcher: per-connection message pump. Validates auth
//! binding, routes typed requests to handlers, emits response envelopes.

use std::sync::{Arc, Mutex};

use serde_json::json;

use crate::connection::ConnectionHandle;
use crate::core::Core;
use crate::error::DispatchError;
use crate::ids::{Direction, MediaKind, PeerId, RoomId, SessionId};
use crate::protocol::{
    ConnectTransportPayload, ConsumePayload, ConsumerActionPayload, CreateTransportPayload,
    IncomingMessage, JoinPayload, ListProducersPayload, OutgoingMessage, ProducePayload,
    ProducerActionPayload,
};

/// Per-connection, token-bound identity established at accept time, plus
/// the session this connection currently speaks for once joined.
pub struct ConnectionContext {
    pub token_room_id: RoomId,
    pub token_peer_id: PeerId,
    pub token_session_id: Option<SessionId>,
    current_session_id: Mutex<Option<SessionId>>,
}

impl ConnectionContext {
    pub fn new(token_room_id: RoomId, token_peer_id: PeerId, token_session_id: Option<SessionId>) -> Self {
        Self {
            token_room_id,
            token_peer_id,
            token_session_id,
            current_session_id: Mutex::new(None),
        }
    }

    fn current_session_id(&self) -> Option<SessionId> {
        self.current_session_id.lock().unwrap().clone()
    }

    fn set_current_session_id(&self, session_id: SessionId) {
        *self.current_session_id.lock().unwrap() = Some(session_id);
    }
}

fn parse_direction(raw: &str) -> Result<Direction, DispatchError> {
    match raw {
        "send" => Ok(Direction::Send),
        "recv" => Ok(Direction::Recv),
        _ => Err(DispatchError::InvalidDirection),
    }
}

fn parse_kind(raw: &str) -> Result<MediaKind, DispatchError> {
    match raw {
        "audio" => Ok(MediaKind::Audio),
        "video" => Ok(MediaKind::Video),
        _ => Err(DispatchError::InvalidKind),
    }
}

/// Resolve the peer a non-handshake request acts on: the payload's
/// `sessionId` if given, else this connection's current session. Per
/// `spec.md` §4.4 cross-cutting rule 1 and §7's `not_authed`/`invalid
/// sessionId` identity-binding errors.
fn resolve_peer(
    core: &Arc<Core>,
    ctx: &ConnectionContext,
    payload_session_id: Option<SessionId>,
) -> Result<crate::peer::Peer, DispatchError> {
    let session_id = payload_session_id
        .or_else(|| ctx.current_session_id())
        .ok_or(DispatchError::NotAuthed)?;
    core.sessions
        .lookup(&session_id)
        .ok_or(DispatchError::InvalidSessionId)
}

fn check_room_binding(ctx: &ConnectionContext, room_id: &Option<RoomId>) -> Result<(), DispatchError> {
    if let Some(room_id) = room_id {
        if room_id != &ctx.token_room_id {
            return Err(DispatchError::RoomIdMismatch);
        }
    }
    Ok(())
}

pub async fn dispatch(
    core: &Arc<Core>,
    ctx: &ConnectionContext,
    conn: &ConnectionHandle,
    msg: IncomingMessage,
) -> OutgoingMessage {
    let request_id = msg.request_id.clone();
    match handle(core, ctx, conn, &msg).await {
        Ok(data) => OutgoingMessage::ok(request_id, data),
        Err(err) => OutgoingMessage::err(request_id, err),
    }
}

async fn handle(
    core: &Arc<Core>,
    ctx: &ConnectionContext,
    conn: &ConnectionHandle,
    msg: &IncomingMessage,
) -> Result<serde_json::Value, DispatchError> {
    match msg.msg_type.as_str() {
        "join" => handle_join(core, ctx, conn, &msg.payload).await,
        "resumeSession" => handle_resume_session(core, ctx, conn, &msg.payload).await,
        "listProducers" | "getRoomProducers" => handle_list_producers(core, ctx, &msg.payload),
        "createTransport" => handle_create_transport(core, ctx, &msg.payload).await,
        "connectTransport" => handle_connect_transport(core, ctx, &msg.payload).await,
        "produce" => handle_produce(core, ctx, &msg.payload).await,
        "consume" => handle_consume(core, ctx, &msg.payload).await,
        "pauseProducer" => handle_producer_action(core, ctx, &msg.payload, true).await,
        "resumeProducer" => handle_producer_action(core, ctx, &msg.payload, false).await,
        "pauseConsumer" => handle_consumer_action(core, ctx, &msg.payload, true).await,
        "resumeConsumer" => handle_consumer_action(core, ctx, &msg.payload, false).await,
        _ => Err(DispatchError::UnknownType),
    }
}

async fn handle_join(
    core: &Arc<Core>,
    ctx: &ConnectionContext,
    conn: &ConnectionHandle,
    payload: &serde_json::Value,
) -> Result<serde_json::Value, DispatchError> {
    let payload: JoinPayload = serde_json::from_value(payload.clone()).unwrap_or_default();
    let room_id = payload.room_id.ok_or(DispatchError::RoomIdRequired)?;
    if room_id != ctx.token_room_id {
        return Err(DispatchError::RoomIdMismatch);
    }
    if let (Some(given), Some(token_bound)) = (&payload.session_id, &ctx.token_session_id) {
        if given != token_bound {
            return Err(DispatchError::SessionIdMismatch);
        }
    }
    let session_id = payload
        .session_id
        .or_else(|| ctx.token_session_id.clone())
        .unwrap_or_default();

    let room = core.rooms.get_or_create(&room_id).await?;
    let peer = core
        .adopt_peer(&room, &ctx.token_peer_id, &session_id, conn.clone())
        .await?;
    ctx.set_current_session_id(session_id);

    room.broadcast(
        &OutgoingMessage::PeerJoined {
            peer_id: peer.peer_id().clone(),
        },
        Some(peer.peer_id()),
    );

    let data = Core::build_join_response(&room, &peer);
    send_welcome(&peer);
    Ok(data)
}

async fn handle_resume_session(
    core: &Arc<Core>,
    ctx: &ConnectionContext,
    conn: &ConnectionHandle,
    payload: &serde_json::Value,
) -> Result<serde_json::Value, DispatchError> {
    let payload: JoinPayload = serde_json::from_value(payload.clone()).unwrap_or_default();
    let room_id = payload.room_id.ok_or(DispatchError::RoomIdRequired)?;
    if room_id != ctx.token_room_id {
        return Err(DispatchError::RoomIdMismatch);
    }
    let session_id = payload
        .session_id
        .or_else(|| ctx.token_session_id.clone())
        .ok_or(DispatchError::InvalidSessionId)?;

    let peer = core
        .sessions
        .lookup(&session_id)
        .ok_or(DispatchError::PeerNotFound)?;
    if peer.peer_id() != &ctx.token_peer_id {
        return Err(DispatchError::PeerIdMismatch);
    }

    core.sessions.disarm_grace(&peer);
    let room = core.rooms.get_or_create(&room_id).await?;
    core.reset_peer_media(&room, &peer);
    if let Some(prior_conn) = peer.replace_conn(conn.clone()) {
        prior_conn.close();
    }

    let rejoin = peer.room_id().as_ref() != Some(&room_id)
        || !room.peer_ids().contains(peer.peer_id());
    peer.set_room_id(Some(room_id));
    if rejoin {
        room.add_peer(peer.clone());
        room.broadcast(
            &OutgoingMessage::PeerJoined {
                peer_id: peer.peer_id().clone(),
            },
            Some(peer.peer_id()),
        );
    }
    ctx.set_current_session_id(peer.session_id().clone());

    let data = Core::build_join_response(&room, &peer);
    send_welcome(&peer);
    Ok(data)
}

fn send_welcome(peer: &crate::peer::Peer) {
    peer.send(
        OutgoingMessage::Welcome {
            peer_id: peer.peer_id().clone(),
            session_id: Some(peer.session_id().clone()),
            hint: "joined".to_string(),
        }
        .into_value(),
    );
}

fn handle_list_producers(
    core: &Arc<Core>,
    ctx: &ConnectionContext,
    payload: &serde_json::Value,
) -> Result<serde_json::Value, DispatchError> {
    let payload: ListProducersPayload = serde_json::from_value(payload.clone()).unwrap_or_default();
    check_room_binding(ctx, &payload.room_id)?;
    let peer = resolve_peer(core, ctx, payload.session_id)?;
    let room_id = payload
        .room_id
        .unwrap_or_else(|| peer.room_id().unwrap_or_else(|| ctx.token_room_id.clone()));
    let room = core.rooms.get(&room_id).ok_or(DispatchError::RoomNotFound)?;

    let list: Vec<_> = room
        .list_producers()
        .into_iter()
        .map(|(producer_id, peer_id, kind)| {
            json!({ "producerId": producer_id, "peerId": peer_id, "kind": kind })
        })
        .collect();
    Ok(json!({ "list": list }))
}

fn require_joined(peer: &crate::peer::Peer) -> Result<RoomId, DispatchError> {
    peer.room_id().ok_or(DispatchError::RoomNotJoined)
}

async fn handle_create_transport(
    core: &Arc<Core>,
    ctx: &ConnectionContext,
    payload: &serde_json::Value,
) -> Result<serde_json::Value, DispatchError> {
    let payload: CreateTransportPayload =
        serde_json::from_value(payload.clone()).map_err(|_| DispatchError::InvalidDirection)?;
    let direction = parse_direction(&payload.direction)?;
    let peer = resolve_peer(core, ctx, Some(payload.session_id))?;
    let room_id = require_joined(&peer)?;
    let room = core.rooms.get(&room_id).ok_or(DispatchError::RoomNotFound)?;

    let transport = room.router().create_webrtc_transport().await?;
    let prior = match direction {
        Direction::Send => peer.set_send_transport(Some(transport.clone())),
        Direction::Recv => peer.set_recv_transport(Some(transport.clone())),
    };
    if let Some(prior) = prior {
        prior.close().await;
    }

    Ok(json!({
        "id": transport.id(),
        "iceParameters": transport.ice_parameters(),
        "iceCandidates": transport.ice_candidates(),
        "dtlsParameters": transport.dtls_parameters(),
    }))
}

async fn handle_connect_transport(
    core: &Arc<Core>,
    ctx: &ConnectionContext,
    payload: &serde_json::Value,
) -> Result<serde_json::Value, DispatchError> {
    let payload: ConnectTransportPayload =
        serde_json::from_value(payload.clone()).map_err(|_| DispatchError::InvalidDirection)?;
    let direction = parse_direction(&payload.direction)?;
    let peer = resolve_peer(core, ctx, Some(payload.session_id))?;
    require_joined(&peer)?;

    let transport = match direction {
        Direction::Send => peer.send_transport(),
        Direction::Recv => peer.recv_transport(),
    }
    .ok_or(DispatchError::TransportNotFound)?;
    let dtls_parameters = payload
        .dtls_parameters
        .ok_or(DispatchError::MissingDtlsParameters)?;

    transport.connect(dtls_parameters).await?;
    Ok(json!({ "connected": true }))
}

async fn handle_produce(
    core: &Arc<Core>,
    ctx: &ConnectionContext,
    payload: &serde_json::Value,
) -> Result<serde_json::Value, DispatchError> {
    let payload: ProducePayload =
        serde_json::from_value(payload.clone()).map_err(|_| DispatchError::InvalidKind)?;
    let kind = parse_kind(&payload.kind)?;
    let peer = resolve_peer(core, ctx, Some(payload.session_id))?;
    let room_id = require_joined(&peer)?;
    let room = core.rooms.get(&room_id).ok_or(DispatchError::RoomNotFound)?;
    let transport = peer
        .send_transport()
        .ok_or(DispatchError::SendTransportNotReady)?;
    let rtp_parameters = payload
        .rtp_parameters
        .ok_or(DispatchError::MissingRtpParameters)?;

    let producer = transport.produce(kind, rtp_parameters).await?;
    peer.add_producer(producer.id(), producer.clone());
    room.add_producer(producer.id(), peer.peer_id().clone(), kind);
    if kind == MediaKind::Audio {
        room.level_observer().add_producer(producer.id()).await;
    }

    room.broadcast(
        &OutgoingMessage::NewProducer {
            producer_id: producer.id(),
            peer_id: peer.peer_id().clone(),
            kind,
        },
        Some(peer.peer_id()),
    );

    Ok(json!({ "producerId": producer.id() }))
}

async fn handle_consume(
    core: &Arc<Core>,
    ctx: &ConnectionContext,
    payload: &serde_json::Value,
) -> Result<serde_json::Value, DispatchError> {
    let payload: ConsumePayload =
        serde_json::from_value(payload.clone()).map_err(|_| DispatchError::ProducerNotFound)?;
    let peer = resolve_peer(core, ctx, Some(payload.session_id))?;
    let room_id = require_joined(&peer)?;
    let room = core.rooms.get(&room_id).ok_or(DispatchError::RoomNotFound)?;

    let (owner_id, kind) = room
        .producer_entry(&payload.producer_id)
        .ok_or(DispatchError::ProducerNotFound)?;
    if &owner_id == peer.peer_id() {
        return Err(DispatchError::CannotConsumeSelf);
    }
    let transport = peer
        .recv_transport()
        .ok_or(DispatchError::RecvTransportNotReady)?;
    if !transport
        .can_consume(payload.producer_id, &payload.rtp_capabilities)
        .await
    {
        return Err(DispatchError::CannotConsume);
    }

    let consumer = transport
        .consume(payload.producer_id, kind, payload.rtp_capabilities)
        .await?;
    consumer.resume().await?;
    peer.add_consumer(consumer.id(), consumer.clone());

    Ok(json!({
        "id": consumer.id(),
        "producerId": payload.producer_id,
        "kind": kind,
        "rtpParameters": consumer.rtp_parameters(),
    }))
}

async fn handle_producer_action(
    core: &Arc<Core>,
    ctx: &ConnectionContext,
    payload: &serde_json::Value,
    pause: bool,
) -> Result<serde_json::Value, DispatchError> {
    let payload: ProducerActionPayload =
        serde_json::from_value(payload.clone()).map_err(|_| DispatchError::ProducerNotFound)?;
    let peer = resolve_peer(core, ctx, Some(payload.session_id))?;
    let producer = peer
        .get_producer(&payload.producer_id)
        .ok_or(DispatchError::ProducerNotFound)?;
    if pause {
        producer.pause().await?;
        Ok(json!({ "paused": true }))
    } else {
        producer.resume().await?;
        Ok(json!({ "resumed": true }))
    }
}

async fn handle_consumer_action(
    core: &Arc<Core>,
    ctx: &ConnectionContext,
    payload: &serde_json::Value,
    pause: bool,
) -> Result<serde_json::Value, DispatchError> {
    let payload: ConsumerActionPayload =
        serde_json::from_value(payload.clone()).map_err(|_| DispatchError::ConsumerNotFound)?;
    let peer = resolve_peer(core, ctx, Some(payload.session_id))?;
    let consumer = peer
        .get_consumer(&payload.consumer_id)
        .ok_or(DispatchError::ConsumerNotFound)?;
    if pause {
        consumer.pause().await?;
    } else {
        consumer.resume().await?;
    }
    Ok(json!({}))
}
