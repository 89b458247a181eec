//! Media engine seam.
//!
//! The engine owns routers, transports, producers and consumers; the
//! controller only keeps their ids. Parameter blobs (RTP capabilities, DTLS,
//! ICE) are opaque JSON passed through between client and engine.
//!
//! Close operations are infallible and idempotent: closing an unknown id is
//! a no-op. The engine cascades its own closes (closing a producer closes
//! its consumers; closing a transport closes everything created on it).

use async_trait::async_trait;
use common::types::{ConsumerId, MediaKind, ProducerId, RouterId, TransportId};
use serde::Serialize;
use serde_json::Value;
use thiserror::Error;

/// Opaque engine failure.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("{operation} failed: {reason}")]
pub struct EngineError {
    pub operation: &'static str,
    pub reason: String,
}

impl EngineError {
    pub fn new(operation: &'static str, reason: impl Into<String>) -> Self {
        Self {
            operation,
            reason: reason.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct RouterInfo {
    pub id: RouterId,
    pub rtp_capabilities: Value,
}

/// What the client needs to build its side of a transport.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TransportParams {
    pub id: TransportId,
    pub ice_parameters: Value,
    pub ice_candidates: Value,
    pub dtls_parameters: Value,
}

#[derive(Debug, Clone, PartialEq)]
pub struct EngineProducer {
    pub id: ProducerId,
    pub kind: MediaKind,
    pub rtp_parameters: Value,
}

#[derive(Debug, Clone, PartialEq)]
pub struct EngineConsumer {
    pub id: ConsumerId,
    pub producer_id: ProducerId,
    pub kind: MediaKind,
    pub rtp_parameters: Value,
}

/// Media engine operations used by media rooms.
#[async_trait]
pub trait MediaEngine: Send + Sync {
    async fn create_router(&self) -> Result<RouterInfo, EngineError>;

    async fn close_router(&self, router_id: &RouterId);

    async fn create_transport(&self, router_id: &RouterId) -> Result<TransportParams, EngineError>;

    async fn connect_transport(
        &self,
        transport_id: &TransportId,
        dtls_parameters: &Value,
    ) -> Result<(), EngineError>;

    async fn close_transport(&self, transport_id: &TransportId);

    async fn create_producer(
        &self,
        transport_id: &TransportId,
        kind: MediaKind,
        rtp_parameters: &Value,
    ) -> Result<EngineProducer, EngineError>;

    async fn close_producer(&self, producer_id: &ProducerId);

    /// Whether a receiver with `rtp_capabilities` can consume the producer.
    async fn can_consume(
        &self,
        router_id: &RouterId,
        producer_id: &ProducerId,
        rtp_capabilities: &Value,
    ) -> bool;

    async fn create_consumer(
        &self,
        transport_id: &TransportId,
        producer_id: &ProducerId,
        rtp_capabilities: &Value,
    ) -> Result<EngineConsumer, EngineError>;

    async fn close_consumer(&self, consumer_id: &ConsumerId);
}
