//! Deterministic in-process implementation of the [`super`] traits.
//!
//! Stands in for a real mediasoup-style worker: it mints plausible-looking
//! ICE/DTLS parameter blobs and bookkeeps producer/consumer state, but does
//! not move any RTP. `LevelObserverEvent`s are driven explicitly (via
//! [`SimLevelObserver::push`]) rather than derived from real audio, since
//! VAD math belongs to the external engine this crate never implements.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Value};
use tokio::sync::broadcast;

use super::{EngineConsumer, EngineLevelObserver, EngineProducer, EngineRouter, EngineTransport, LevelObserverEvent, MediaEngine};
use crate::error::EngineError;
use crate::ids::{ConsumerId, MediaKind, ProducerId, TransportId};

#[derive(Default)]
pub struct SimMediaEngine;

impl SimMediaEngine {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl MediaEngine for SimMediaEngine {
    async fn create_router(&self) -> Result<Arc<dyn EngineRouter>, EngineError> {
        Ok(Arc::new(SimRouter::new()))
    }
}

pub struct SimRouter {
    closed: AtomicBool,
}

impl SimRouter {
    fn new() -> Self {
        Self {
            closed: AtomicBool::new(false),
        }
    }
}

#[async_trait]
impl EngineRouter for SimRouter {
    fn rtp_capabilities(&self) -> Value {
        json!({
            "codecs": [{"mimeType": "audio/opus", "clockRate": 48000, "channels": 2}],
        })
    }

    async fn create_webrtc_transport(&self) -> Result<Arc<dyn EngineTransport>, EngineError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(EngineError::RoomNotFound);
        }
        Ok(Arc::new(SimTransport::new()))
    }

    async fn create_level_observer(&self) -> Result<Arc<dyn EngineLevelObserver>, EngineError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(EngineError::RoomNotFound);
        }
        Ok(Arc::new(SimLevelObserver::new()))
    }

    async fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }
}

pub struct SimTransport {
    id: TransportId,
}

impl SimTransport {
    fn new() -> Self {
        Self {
            id: TransportId::new(),
        }
    }
}

#[async_trait]
impl EngineTransport for SimTransport {
    fn id(&self) -> TransportId {
        self.id
    }
    fn ice_parameters(&self) -> Value {
        json!({"usernameFragment": self.id.0.simple().to_string(), "password": "simulated"})
    }
    fn ice_candidates(&self) -> Value {
        json!([])
    }
    fn dtls_parameters(&self) -> Value {
        json!({"role": "server", "fingerprints": []})
    }
    async fn connect(&self, dtls_parameters: Value) -> Result<(), EngineError> {
        let _ = dtls_parameters;
        Ok(())
    }
    async fn produce(
        &self,
        kind: MediaKind,
        rtp_parameters: Value,
    ) -> Result<Arc<dyn EngineProducer>, EngineError> {
        let _ = rtp_parameters;
        Ok(Arc::new(SimProducer::new(kind)))
    }
    async fn can_consume(&self, _producer_id: ProducerId, rtp_capabilities: &Value) -> bool {
        !rtp_capabilities
            .get("unsupported")
            .and_then(Value::as_bool)
            .unwrap_or(false)
    }
    async fn consume(
        &self,
        producer_id: ProducerId,
        kind: MediaKind,
        rtp_capabilities: Value,
    ) -> Result<Arc<dyn EngineConsumer>, EngineError> {
        if !self.can_consume(producer_id, &rtp_capabilities).await {
            return Err(EngineError::CannotConsume);
        }
        Ok(Arc::new(SimConsumer::new(producer_id, kind)))
    }
    async fn close(&self) {}
}

pub struct SimProducer {
    id: ProducerId,
    kind: MediaKind,
    paused: AtomicBool,
}

impl SimProducer {
    fn new(kind: MediaKind) -> Self {
        Self {
            id: ProducerId::new(),
            kind,
            paused: AtomicBool::new(false),
        }
    }
}

#[async_trait]
impl EngineProducer for SimProducer {
    fn id(&self) -> ProducerId {
        self.id
    }
    fn kind(&self) -> MediaKind {
        self.kind
    }
    async fn pause(&self) -> Result<(), EngineError> {
        self.paused.store(true, Ordering::SeqCst);
        Ok(())
    }
    async fn resume(&self) -> Result<(), EngineError> {
        self.paused.store(false, Ordering::SeqCst);
        Ok(())
    }
    async fn close(&self) {}
}

pub struct SimConsumer {
    id: ConsumerId,
    producer_id: ProducerId,
    kind: MediaKind,
    paused: AtomicBool,
}

impl SimConsumer {
    fn new(producer_id: ProducerId, kind: MediaKind) -> Self {
        Self {
            id: ConsumerId::new(),
            producer_id,
            kind,
            paused: AtomicBool::new(true),
        }
    }
}

#[async_trait]
impl EngineConsumer for SimConsumer {
    fn id(&self) -> ConsumerId {
        self.id
    }
    fn producer_id(&self) -> ProducerId {
        self.producer_id
    }
    fn kind(&self) -> MediaKind {
        self.kind
    }
    fn rtp_parameters(&self) -> Value {
        json!({"mid": self.id.0.simple().to_string()})
    }
    async fn pause(&self) -> Result<(), EngineError> {
        self.paused.store(true, Ordering::SeqCst);
        Ok(())
    }
    async fn resume(&self) -> Result<(), EngineError> {
        self.paused.store(false, Ordering::SeqCst);
        Ok(())
    }
    async fn close(&self) {}
}

/// Level observer driven explicitly via [`Self::push`]; real volume
/// computation belongs to the external engine.
pub struct SimLevelObserver {
    tx: broadcast::Sender<LevelObserverEvent>,
}

impl SimLevelObserver {
    fn new() -> Self {
        Self {
            tx: broadcast::channel(32).0,
        }
    }

    /// Test/ops hook: inject a tick as if the external engine produced it.
    pub fn push(&self, event: LevelObserverEvent) {
        let _ = self.tx.send(event);
    }
}

#[async_trait]
impl EngineLevelObserver for SimLevelObserver {
    async fn add_producer(&self, _producer_id: ProducerId) {}
    async fn remove_producer(&self, _producer_id: ProducerId) {}
    fn subscribe(&self) -> broadcast::Receiver<LevelObserverEvent> {
        self.tx.subscribe()
    }
    async fn close(&self) {}
    fn as_any(&self) -> &dyn std::any::Any {
        self
    }
}
