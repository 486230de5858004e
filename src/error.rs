//! Named error enums returned from fallible core operations.
//!
//! `Display` on these matches the literal wire strings `spec.md` names for
//! `data.error`; `anyhow` is reserved for the process boundary (`main.rs`,
//! the connection accept loop) the way the teacher uses it.

use thiserror::Error;

/// Failures from [`crate::token`] verification. Any of these closes the
/// connection with WebSocket close code 1008.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TokenError {
    #[error("bad_format")]
    BadFormat,
    #[error("bad_sig")]
    BadSig,
    #[error("no_{0}")]
    MissingField(&'static str),
    #[error("expired")]
    Expired,
    #[error("iat_in_future")]
    IatInFuture,
    #[error("roomId_mismatch")]
    RoomIdMismatch,
    #[error("peerId_mismatch")]
    PeerIdMismatch,
    #[error("sessionId_mismatch")]
    SessionIdMismatch,
    #[error("replayed")]
    Replayed,
}

/// Failures surfaced by the media engine adapter (C4). Dispatcher handlers
/// fold these into [`DispatchError::Engine`].
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum EngineError {
    #[error("room not found")]
    RoomNotFound,
    #[error("cannot consume")]
    CannotConsume,
}

/// Every failure the request dispatcher (C5) can hand back as a response
/// envelope with `ok:false`. None of these close the connection.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DispatchError {
    #[error("roomId required")]
    RoomIdRequired,
    #[error("roomId mismatch")]
    RoomIdMismatch,
    #[error("peerId mismatch")]
    PeerIdMismatch,
    #[error("sessionId mismatch")]
    SessionIdMismatch,
    #[error("peer not found")]
    PeerNotFound,
    #[error("invalid sessionId")]
    InvalidSessionId,
    #[error("room not joined")]
    RoomNotJoined,
    #[error("room not found")]
    RoomNotFound,
    #[error("send transport not ready")]
    SendTransportNotReady,
    #[error("recv transport not ready")]
    RecvTransportNotReady,
    #[error("transport not found")]
    TransportNotFound,
    #[error("producer not found")]
    ProducerNotFound,
    #[error("consumer not found")]
    ConsumerNotFound,
    #[error("cannot consume")]
    CannotConsume,
    #[error("cannot consume self")]
    CannotConsumeSelf,
    #[error("invalid kind")]
    InvalidKind,
    #[error("invalid direction")]
    InvalidDirection,
    #[error("missing dtlsParameters")]
    MissingDtlsParameters,
    #[error("missing rtpParameters")]
    MissingRtpParameters,
    #[error("not_authed")]
    NotAuthed,
    #[error("unknown type")]
    UnknownType,
    #[error(transparent)]
    Engine(#[from] EngineError),
}
