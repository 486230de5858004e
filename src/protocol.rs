//! Wire envelopes for the JSON request/response/event protocol of
//! `spec.md` §4.4 and §6.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::ids::{ConsumerId, MediaKind, PeerId, ProducerId, RoomId, SessionId};

/// Every client -> server message: `{type, requestId, payload}`.
#[derive(Debug, Deserialize)]
pub struct IncomingMessage {
    #[serde(rename = "type")]
    pub msg_type: String,
    #[serde(rename = "requestId")]
    pub request_id: Value,
    #[serde(default)]
    pub payload: Value,
}

/// Every server -> client message, unified under one `type`-tagged enum so
/// one `ConnectionHandle::send` call always ships a well-formed envelope.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type")]
pub enum OutgoingMessage {
    #[serde(rename = "response")]
    Response {
        #[serde(rename = "requestId")]
        request_id: Value,
        ok: bool,
        data: Value,
    },
    #[serde(rename = "welcome")]
    Welcome {
        #[serde(rename = "peerId")]
        peer_id: PeerId,
        #[serde(rename = "sessionId", skip_serializing_if = "Option::is_none")]
        session_id: Option<SessionId>,
        hint: String,
    },
    #[serde(rename = "peerJoined")]
    PeerJoined {
        #[serde(rename = "peerId")]
        peer_id: PeerId,
    },
    #[serde(rename = "peerLeft")]
    PeerLeft {
        #[serde(rename = "peerId")]
        peer_id: PeerId,
    },
    #[serde(rename = "newProducer")]
    NewProducer {
        #[serde(rename = "producerId")]
        producer_id: ProducerId,
        #[serde(rename = "peerId")]
        peer_id: PeerId,
        kind: MediaKind,
    },
    #[serde(rename = "producerClosed")]
    ProducerClosed {
        #[serde(rename = "producerId")]
        producer_id: ProducerId,
        #[serde(rename = "peerId")]
        peer_id: PeerId,
        kind: MediaKind,
        reason: &'static str,
    },
    #[serde(rename = "producerSpeaking")]
    ProducerSpeaking {
        #[serde(rename = "producerId")]
        producer_id: ProducerId,
        #[serde(rename = "peerId")]
        peer_id: PeerId,
        speaking: bool,
        #[serde(skip_serializing_if = "Option::is_none")]
        volume: Option<f64>,
    },
}

impl OutgoingMessage {
    pub fn ok(request_id: Value, data: Value) -> Self {
        Self::Response {
            request_id,
            ok: true,
            data,
        }
    }

    pub fn err(request_id: Value, error: impl std::fmt::Display) -> Self {
        Self::Response {
            request_id,
            ok: false,
            data: serde_json::json!({ "error": error.to_string() }),
        }
    }

    pub fn into_value(self) -> Value {
        serde_json::to_value(self).expect("OutgoingMessage always serializes")
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JoinPayload {
    pub room_id: Option<RoomId>,
    pub session_id: Option<SessionId>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListProducersPayload {
    #[serde(default)]
    pub session_id: Option<SessionId>,
    #[serde(default)]
    pub room_id: Option<RoomId>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateTransportPayload {
    pub session_id: SessionId,
    pub direction: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectTransportPayload {
    pub session_id: SessionId,
    pub direction: String,
    #[serde(default)]
    pub dtls_parameters: Option<Value>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProducePayload {
    pub session_id: SessionId,
    pub kind: String,
    #[serde(default)]
    pub rtp_parameters: Option<Value>,
    #[serde(default)]
    pub app_data: Option<Value>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConsumePayload {
    pub session_id: SessionId,
    pub producer_id: ProducerId,
    pub rtp_capabilities: Value,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProducerActionPayload {
    pub session_id: SessionId,
    pub producer_id: ProducerId,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConsumerActionPayload {
    pub session_id: SessionId,
    pub consumer_id: ConsumerId,
}
