//! C7 — Connection Supervisor: accepts incoming connections over a `warp`
//! WebSocket listener, binds the query-string token, drives the welcome
//! handshake, and schedules grace cleanup on disconnect.

use std::sync::Arc;

use futures::{FutureExt, Sink, SinkExt, StreamExt};
use serde::Deserialize;
use tokio::sync::mpsc;
use warp::ws::{Message, WebSocket};
use warp::Filter;

use crate::connection::ConnectionHandle;
use crate::core::Core;
use crate::dispatcher::{self, ConnectionContext};
use crate::error::TokenError;
use crate::protocol::{IncomingMessage, OutgoingMessage};
use crate::token::Expected;

#[derive(Debug, Deserialize)]
struct ConnectQuery {
    token: Option<String>,
}

/// Build the `warp` filter serving the signaling WebSocket at `/`.
pub fn routes(
    core: Arc<Core>,
) -> impl warp::Filter<Extract = impl warp::Reply, Error = warp::Rejection> + Clone {
    warp::ws()
        .and(warp::query::<ConnectQuery>())
        .map(move |ws: warp::ws::Ws, query: ConnectQuery| {
            let core = core.clone();
            ws.on_upgrade(move |socket| handle_connection(core, socket, query.token))
        })
}

pub async fn serve(core: Arc<Core>, port: u16) {
    let routes = routes(core).with(warp::log("sfu_signal"));
    log::info!("listening on 0.0.0.0:{port}");
    warp::serve(routes).run(([0, 0, 0, 0], port)).await;
}

async fn handle_connection(core: Arc<Core>, socket: WebSocket, token: Option<String>) {
    let (mut ws_tx, mut ws_rx) = socket.split();

    let token = match token {
        Some(token) => token,
        None => {
            close_with_reason(&mut ws_tx, TokenError::BadFormat).await;
            return;
        }
    };

    let now = now_unix();
    let payload = match core
        .tokens
        .verify(&token, now, &Expected::default(), true)
    {
        Ok(payload) => payload,
        Err(err) => {
            close_with_reason(&mut ws_tx, err).await;
            return;
        }
    };

    let (tx, mut rx) = mpsc::unbounded_channel::<serde_json::Value>();
    let conn = ConnectionHandle::new(tx);
    let ctx = ConnectionContext::new(
        payload.room_id.clone(),
        payload.peer_id.clone(),
        payload.session_id.clone(),
    );

    log::trace!("+connection peer={} room={}", payload.peer_id, payload.room_id);

    conn.send(
        OutgoingMessage::Welcome {
            peer_id: payload.peer_id.clone(),
            session_id: payload.session_id.clone(),
            hint: "welcome".to_string(),
        }
        .into_value(),
    );

    let conn_for_writer = conn.clone();
    let writer = tokio::spawn(async move {
        loop {
            tokio::select! {
                value = rx.recv() => {
                    let Some(value) = value else { break };
                    let text =
                        serde_json::to_string(&value).expect("OutgoingMessage always serializes");
                    if ws_tx.send(Message::text(text)).await.is_err() {
                        break;
                    }
                }
                _ = conn_for_writer.closed() => {
                    let _ = ws_tx.send(Message::close_with(1000u16, "superseded")).await;
                    break;
                }
            }
        }
    });

    while let Some(next) = ws_rx.next().await {
        let msg = match next {
            Ok(msg) => msg,
            Err(_) => break,
        };
        if msg.is_close() {
            break;
        }
        if !msg.is_text() {
            continue;
        }
        let incoming: IncomingMessage = match serde_json::from_str(msg.to_str().unwrap_or("")) {
            Ok(incoming) => incoming,
            Err(_) => continue,
        };
        let response = dispatcher::dispatch(&core, &ctx, &conn, incoming).await;
        conn.send(response.into_value());
    }

    writer.abort();
    on_disconnect(&core, &conn).await;
}

/// Find the owning peer by linear scan and arm its grace timer, per
/// `spec.md` §4.6.
async fn on_disconnect(core: &Arc<Core>, conn: &ConnectionHandle) {
    let peer = match core.sessions.find_by_connection(conn) {
        Some(peer) => peer,
        None => return,
    };
    log::trace!("-connection peer={}", peer.peer_id());

    let core = core.clone();
    let peer_for_expiry = peer.clone();
    core.sessions.clone().arm_grace(&peer, now_unix(), move || {
        async move {
            core.destroy_peer(&peer_for_expiry).await;
        }
        .boxed()
    });
}

async fn close_with_reason(
    ws_tx: &mut (impl Sink<Message, Error = warp::Error> + Unpin),
    err: impl std::fmt::Display,
) {
    log::warn!("rejecting connection: {err}");
    let frame = warp::ws::Message::close_with(1008u16, err.to_string());
    let _ = ws_tx.send(frame).await;
}

fn now_unix() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .expect("system clock before epoch")
        .as_secs() as i64
}
