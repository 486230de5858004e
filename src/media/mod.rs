//! C4 — Media Engine Adapter.
//!
//! `spec.md` treats the media engine (router/transport/producer/consumer
//! primitives, audio-level observer) as an external collaborator reached
//! only through "a narrow interface to the external media primitives". This
//! module is that interface: a set of `async_trait` traits modeled on the
//! teacher's own mediasoup call shapes (`create_router`,
//! `create_webrtc_transport`, `produce`, `consume`, `connect`,
//! `pause`/`resume`, `close`), so the rest of the core never depends on a
//! concrete media backend. [`sim`] backs both the default binary and the
//! test suite with a deterministic in-process implementation.

pub mod sim;

use std::any::Any;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::broadcast;

use crate::error::EngineError;
use crate::ids::{ConsumerId, MediaKind, ProducerId, TransportId};

/// Entry point: mints routers, one per room, each with its own codec set.
#[async_trait]
pub trait MediaEngine: Send + Sync {
    async fn create_router(&self) -> Result<Arc<dyn EngineRouter>, EngineError>;
}

/// A room's router: the scope within which transports/producers/consumers
/// can exchange media, plus the room's single level observer.
#[async_trait]
pub trait EngineRouter: Send + Sync {
    /// Router RTP capabilities, handed to clients during `join`.
    fn rtp_capabilities(&self) -> Value;
    async fn create_webrtc_transport(&self) -> Result<Arc<dyn EngineTransport>, EngineError>;
    async fn create_level_observer(&self) -> Result<Arc<dyn EngineLevelObserver>, EngineError>;
    async fn close(&self);
}

/// A peer's send or recv WebRTC transport.
#[async_trait]
pub trait EngineTransport: Send + Sync {
    fn id(&self) -> TransportId;
    fn ice_parameters(&self) -> Value;
    fn ice_candidates(&self) -> Value;
    fn dtls_parameters(&self) -> Value;
    async fn connect(&self, dtls_parameters: Value) -> Result<(), EngineError>;
    async fn produce(
        &self,
        kind: MediaKind,
        rtp_parameters: Value,
    ) -> Result<Arc<dyn EngineProducer>, EngineError>;
    async fn can_consume(&self, producer_id: ProducerId, rtp_capabilities: &Value) -> bool;
    async fn consume(
        &self,
        producer_id: ProducerId,
        kind: MediaKind,
        rtp_capabilities: Value,
    ) -> Result<Arc<dyn EngineConsumer>, EngineError>;
    async fn close(&self);
}

#[async_trait]
pub trait EngineProducer: Send + Sync {
    fn id(&self) -> ProducerId;
    fn kind(&self) -> MediaKind;
    async fn pause(&self) -> Result<(), EngineError>;
    async fn resume(&self) -> Result<(), EngineError>;
    async fn close(&self);
}

#[async_trait]
pub trait EngineConsumer: Send + Sync {
    fn id(&self) -> ConsumerId;
    fn producer_id(&self) -> ProducerId;
    fn kind(&self) -> MediaKind;
    fn rtp_parameters(&self) -> Value;
    async fn pause(&self) -> Result<(), EngineError>;
    async fn resume(&self) -> Result<(), EngineError>;
    async fn close(&self);
}

/// A tick from the room's audio-level observer, per `spec.md` §4.3: either
/// a snapshot of currently-active producers and their volumes, or silence.
#[derive(Debug, Clone)]
pub enum LevelObserverEvent {
    Volumes(Vec<(ProducerId, f64)>),
    Silence,
}

/// VAD driver for a room. `spec.md` names the observer parameters
/// (maxEntries=10, threshold=-80 dBFS, interval=100ms) as a property of the
/// external engine's configuration, not of this adapter's interface.
#[async_trait]
pub trait EngineLevelObserver: Send + Sync + Any {
    async fn add_producer(&self, producer_id: ProducerId);
    async fn remove_producer(&self, producer_id: ProducerId);
    fn subscribe(&self) -> broadcast::Receiver<LevelObserverEvent>;
    async fn close(&self);

    /// Downcast hook so adapters backed by a concrete test/sim type can be
    /// driven directly (e.g. injecting a tick) without widening this trait.
    fn as_any(&self) -> &dyn Any;
}
