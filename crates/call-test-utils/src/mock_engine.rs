//! Mock media engine for Call Controller tests.
//!
//! Can be configured to:
//! - Fail any operation by name (`create_router`, `create_transport`, ...)
//! - Refuse every `can_consume` check
//!
//! and records every call so tests can assert what was created and closed.
//!
//! ```rust,ignore
//! let engine = MockEngine::new().failing("create_producer");
//! // ... drive a meeting ...
//! assert_eq!(engine.call_count("close_transport"), 2);
//! ```

use async_trait::async_trait;
use call_controller::media::{
    EngineConsumer, EngineError, EngineProducer, MediaEngine, RouterInfo, TransportParams,
};
use common::types::{ConsumerId, MediaKind, ProducerId, RouterId, TransportId};
use serde_json::{json, Value};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

#[derive(Debug, Default)]
struct MockState {
    failing: HashSet<&'static str>,
    refuse_consume: bool,
    calls: HashMap<&'static str, usize>,
    producer_kinds: HashMap<ProducerId, MediaKind>,
    closed_routers: Vec<RouterId>,
    closed_transports: Vec<TransportId>,
    closed_producers: Vec<ProducerId>,
    closed_consumers: Vec<ConsumerId>,
}

/// Mock media engine for testing.
#[derive(Debug, Default)]
pub struct MockEngine {
    state: Mutex<MockState>,
    next_id: AtomicU64,
}

impl MockEngine {
    /// Engine where every operation succeeds.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail `operation` from the start.
    #[must_use]
    pub fn failing(self, operation: &'static str) -> Self {
        self.fail(operation);
        self
    }

    /// Answer `false` to every `can_consume`.
    #[must_use]
    pub fn refusing_consume(self) -> Self {
        self.state.lock().unwrap().refuse_consume = true;
        self
    }

    /// Start failing `operation`.
    pub fn fail(&self, operation: &'static str) {
        self.state.lock().unwrap().failing.insert(operation);
    }

    /// Stop failing `operation`.
    pub fn recover(&self, operation: &'static str) {
        self.state.lock().unwrap().failing.remove(operation);
    }

    /// Number of times `operation` was invoked (including failures).
    #[must_use]
    pub fn call_count(&self, operation: &str) -> usize {
        self.state
            .lock()
            .unwrap()
            .calls
            .get(operation)
            .copied()
            .unwrap_or(0)
    }

    #[must_use]
    pub fn closed_routers(&self) -> Vec<RouterId> {
        self.state.lock().unwrap().closed_routers.clone()
    }

    #[must_use]
    pub fn closed_transports(&self) -> Vec<TransportId> {
        self.state.lock().unwrap().closed_transports.clone()
    }

    #[must_use]
    pub fn closed_producers(&self) -> Vec<ProducerId> {
        self.state.lock().unwrap().closed_producers.clone()
    }

    #[must_use]
    pub fn closed_consumers(&self) -> Vec<ConsumerId> {
        self.state.lock().unwrap().closed_consumers.clone()
    }

    /// Record a call and return an error if the operation is failing.
    fn enter(&self, operation: &'static str) -> Result<(), EngineError> {
        let mut state = self.state.lock().unwrap();
        *state.calls.entry(operation).or_insert(0) += 1;
        if state.failing.contains(operation) {
            Err(EngineError::new(operation, "injected failure"))
        } else {
            Ok(())
        }
    }

    fn record(&self, operation: &'static str) {
        let mut state = self.state.lock().unwrap();
        *state.calls.entry(operation).or_insert(0) += 1;
    }

    fn next_id(&self, prefix: &str) -> String {
        let n = self.next_id.fetch_add(1, Ordering::Relaxed) + 1;
        format!("{prefix}-{n}")
    }
}

#[async_trait]
impl MediaEngine for MockEngine {
    async fn create_router(&self) -> Result<RouterInfo, EngineError> {
        self.enter("create_router")?;
        Ok(RouterInfo {
            id: RouterId::from(self.next_id("router")),
            rtp_capabilities: json!({
                "codecs": [
                    { "kind": "audio", "mimeType": "audio/opus", "clockRate": 48000, "channels": 2 },
                    { "kind": "video", "mimeType": "video/VP8", "clockRate": 90000 }
                ],
                "headerExtensions": []
            }),
        })
    }

    async fn close_router(&self, router_id: &RouterId) {
        self.record("close_router");
        self.state
            .lock()
            .unwrap()
            .closed_routers
            .push(router_id.clone());
    }

    async fn create_transport(&self, _router_id: &RouterId) -> Result<TransportParams, EngineError> {
        self.enter("create_transport")?;
        Ok(TransportParams {
            id: TransportId::from(self.next_id("transport")),
            ice_parameters: json!({ "usernameFragment": "mock", "password": "mock" }),
            ice_candidates: json!([]),
            dtls_parameters: json!({ "role": "auto", "fingerprints": [] }),
        })
    }

    async fn connect_transport(
        &self,
        _transport_id: &TransportId,
        _dtls_parameters: &Value,
    ) -> Result<(), EngineError> {
        self.enter("connect_transport")
    }

    async fn close_transport(&self, transport_id: &TransportId) {
        self.record("close_transport");
        self.state
            .lock()
            .unwrap()
            .closed_transports
            .push(transport_id.clone());
    }

    async fn create_producer(
        &self,
        _transport_id: &TransportId,
        kind: MediaKind,
        rtp_parameters: &Value,
    ) -> Result<EngineProducer, EngineError> {
        self.enter("create_producer")?;
        let id = ProducerId::from(self.next_id("producer"));
        self.state
            .lock()
            .unwrap()
            .producer_kinds
            .insert(id.clone(), kind);
        Ok(EngineProducer {
            id,
            kind,
            rtp_parameters: rtp_parameters.clone(),
        })
    }

    async fn close_producer(&self, producer_id: &ProducerId) {
        self.record("close_producer");
        let mut state = self.state.lock().unwrap();
        state.producer_kinds.remove(producer_id);
        state.closed_producers.push(producer_id.clone());
    }

    async fn can_consume(
        &self,
        _router_id: &RouterId,
        producer_id: &ProducerId,
        _rtp_capabilities: &Value,
    ) -> bool {
        self.record("can_consume");
        let state = self.state.lock().unwrap();
        !state.refuse_consume && state.producer_kinds.contains_key(producer_id)
    }

    async fn create_consumer(
        &self,
        _transport_id: &TransportId,
        producer_id: &ProducerId,
        _rtp_capabilities: &Value,
    ) -> Result<EngineConsumer, EngineError> {
        self.enter("create_consumer")?;
        let kind = self
            .state
            .lock()
            .unwrap()
            .producer_kinds
            .get(producer_id)
            .copied()
            .ok_or_else(|| EngineError::new("create_consumer", "unknown producer"))?;
        Ok(EngineConsumer {
            id: ConsumerId::from(self.next_id("consumer")),
            producer_id: producer_id.clone(),
            kind,
            rtp_parameters: json!({ "codecs": [] }),
        })
    }

    async fn close_consumer(&self, consumer_id: &ConsumerId) {
        self.record("close_consumer");
        self.state
            .lock()
            .unwrap()
            .closed_consumers
            .push(consumer_id.clone());
    }
}
