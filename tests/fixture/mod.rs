use std::sync::Arc;

use serde_json::{json, Value};
use tokio::sync::mpsc;

use sfu_signal::connection::ConnectionHandle;
use sfu_signal::core::Core;
use sfu_signal::dispatcher::ConnectionContext;
use sfu_signal::ids::{Jti, PeerId, RoomId};
use sfu_signal::media::sim::SimMediaEngine;
use sfu_signal::protocol::IncomingMessage;
use sfu_signal::token::TokenPayload;

pub const SECRET: &str = "fixture-secret";

pub fn core() -> Arc<Core> {
    Core::new(SECRET, Arc::new(SimMediaEngine::new()))
}

/// A connection handle paired with the channel that receives everything
/// sent to it, for assertions about welcomes, responses, and events.
pub struct FakeConn {
    pub handle: ConnectionHandle,
    pub rx: mpsc::UnboundedReceiver<Value>,
}

impl FakeConn {
    pub fn new() -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        Self {
            handle: ConnectionHandle::new(tx),
            rx,
        }
    }

    /// Drain everything currently queued, in order.
    pub fn drain(&mut self) -> Vec<Value> {
        let mut out = Vec::new();
        while let Ok(value) = self.rx.try_recv() {
            out.push(value);
        }
        out
    }

    pub async fn next(&mut self) -> Option<Value> {
        self.rx.recv().await
    }
}

pub fn token_payload(room: &str, peer: &str, jti: &str, iat: i64, exp: i64) -> TokenPayload {
    TokenPayload {
        room_id: RoomId(room.to_string()),
        peer_id: PeerId(peer.to_string()),
        session_id: None,
        jti: Jti(jti.to_string()),
        iat,
        exp,
    }
}

pub fn ctx_for(payload: &TokenPayload) -> ConnectionContext {
    ConnectionContext::new(
        payload.room_id.clone(),
        payload.peer_id.clone(),
        payload.session_id.clone(),
    )
}

pub fn join_msg(request_id: i64, room: &str, session: &str) -> IncomingMessage {
    IncomingMessage {
        msg_type: "join".to_string(),
        request_id: json!(request_id),
        payload: json!({ "roomId": room, "sessionId": session }),
    }
}

pub fn resume_msg(request_id: i64, room: &str, session: &str) -> IncomingMessage {
    IncomingMessage {
        msg_type: "resumeSession".to_string(),
        request_id: json!(request_id),
        payload: json!({ "roomId": room, "sessionId": session }),
    }
}

pub fn produce_msg(request_id: i64, session: &str, kind: &str) -> IncomingMessage {
    IncomingMessage {
        msg_type: "produce".to_string(),
        request_id: json!(request_id),
        payload: json!({
            "sessionId": session,
            "kind": kind,
            "rtpParameters": { "codecs": [] },
        }),
    }
}

pub fn consume_msg(request_id: i64, session: &str, producer_id: Value) -> IncomingMessage {
    IncomingMessage {
        msg_type: "consume".to_string(),
        request_id: json!(request_id),
        payload: json!({
            "sessionId": session,
            "producerId": producer_id,
            "rtpCapabilities": {},
        }),
    }
}

pub fn create_transport_msg(request_id: i64, session: &str, direction: &str) -> IncomingMessage {
    IncomingMessage {
        msg_type: "createTransport".to_string(),
        request_id: json!(request_id),
        payload: json!({ "sessionId": session, "direction": direction }),
    }
}

pub fn connect_transport_msg(request_id: i64, session: &str, direction: &str) -> IncomingMessage {
    IncomingMessage {
        msg_type: "connectTransport".to_string(),
        request_id: json!(request_id),
        payload: json!({
            "sessionId": session,
            "direction": direction,
            "dtlsParameters": { "role": "client", "fingerprints": [] },
        }),
    }
}

/// Pull `data.error` out of a `{type:"response", ok:false, data:{error}}`
/// envelope, panicking if the shape doesn't match.
pub fn response_error(value: &Value) -> &str {
    assert_eq!(value["type"], "response");
    assert_eq!(value["ok"], false);
    value["data"]["error"].as_str().expect("error string")
}

pub fn response_data(value: &Value) -> &Value {
    assert_eq!(value["type"], "response");
    assert_eq!(value["ok"], true, "expected ok response, got {value}");
    &value["data"]
}
