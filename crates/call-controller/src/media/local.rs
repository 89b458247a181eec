//! In-process media engine.
//!
//! Keeps the full router/transport/producer/consumer graph and the
//! capability negotiation rules, and hands out ICE/DTLS parameters from the
//! configured port range. It does not move RTP; a deployment that needs real
//! media plugs an SFU in behind [`MediaEngine`].

use super::engine::{
    EngineConsumer, EngineError, EngineProducer, MediaEngine, RouterInfo, TransportParams,
};
use crate::config::MediaConfig;
use async_trait::async_trait;
use common::types::{ConsumerId, MediaKind, ProducerId, RouterId, TransportId};
use serde_json::{json, Value};
use std::collections::{HashMap, HashSet};
use tokio::sync::Mutex;
use tracing::debug;
use uuid::Uuid;

/// Router media codecs: Opus 48 kHz stereo and VP8.
#[must_use]
pub fn default_media_codecs() -> Vec<Value> {
    vec![
        json!({
            "kind": "audio",
            "mimeType": "audio/opus",
            "clockRate": 48000,
            "channels": 2
        }),
        json!({
            "kind": "video",
            "mimeType": "video/VP8",
            "clockRate": 90000,
            "parameters": { "x-google-start-bitrate": 1000 }
        }),
    ]
}

#[derive(Debug)]
struct LocalTransport {
    router_id: RouterId,
    connected: bool,
}

#[derive(Debug)]
struct LocalProducer {
    router_id: RouterId,
    transport_id: TransportId,
    kind: MediaKind,
    mime_type: String,
    rtp_parameters: Value,
}

#[derive(Debug)]
struct LocalConsumer {
    transport_id: TransportId,
    producer_id: ProducerId,
}

#[derive(Debug, Default)]
struct EngineState {
    routers: HashSet<RouterId>,
    transports: HashMap<TransportId, LocalTransport>,
    producers: HashMap<ProducerId, LocalProducer>,
    consumers: HashMap<ConsumerId, LocalConsumer>,
    next_port_offset: u32,
}

impl EngineState {
    fn remove_consumers_where(&mut self, pred: impl Fn(&LocalConsumer) -> bool) {
        self.consumers.retain(|_, c| !pred(c));
    }

    fn remove_producer(&mut self, producer_id: &ProducerId) {
        if self.producers.remove(producer_id).is_some() {
            self.remove_consumers_where(|c| c.producer_id == *producer_id);
        }
    }

    fn remove_transport(&mut self, transport_id: &TransportId) {
        if self.transports.remove(transport_id).is_none() {
            return;
        }
        let producers: Vec<ProducerId> = self
            .producers
            .iter()
            .filter(|(_, p)| p.transport_id == *transport_id)
            .map(|(id, _)| id.clone())
            .collect();
        for producer_id in &producers {
            self.remove_producer(producer_id);
        }
        self.remove_consumers_where(|c| c.transport_id == *transport_id);
    }
}

/// Live resource counts, for tests and diagnostics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct EngineStats {
    pub routers: usize,
    pub transports: usize,
    pub producers: usize,
    pub consumers: usize,
}

#[derive(Debug)]
pub struct LocalMediaEngine {
    config: MediaConfig,
    codecs: Vec<Value>,
    state: Mutex<EngineState>,
}

impl LocalMediaEngine {
    #[must_use]
    pub fn new(config: MediaConfig) -> Self {
        Self {
            config,
            codecs: default_media_codecs(),
            state: Mutex::new(EngineState::default()),
        }
    }

    pub async fn stats(&self) -> EngineStats {
        let state = self.state.lock().await;
        EngineStats {
            routers: state.routers.len(),
            transports: state.transports.len(),
            producers: state.producers.len(),
            consumers: state.consumers.len(),
        }
    }

    fn allocate_port(&self, state: &mut EngineState) -> u16 {
        let span = u32::from(self.config.rtc_max_port) - u32::from(self.config.rtc_min_port) + 1;
        let offset = state.next_port_offset % span;
        state.next_port_offset = state.next_port_offset.wrapping_add(1);
        // offset < span <= 65536 and min + offset <= max
        u16::try_from(u32::from(self.config.rtc_min_port) + offset)
            .unwrap_or(self.config.rtc_min_port)
    }
}

fn new_id() -> String {
    Uuid::new_v4().to_string()
}

/// `mimeType` of every codec in a capabilities or parameters blob, lowercased.
fn codec_mime_types(blob: &Value) -> Vec<String> {
    blob.get("codecs")
        .and_then(Value::as_array)
        .map(|codecs| {
            codecs
                .iter()
                .filter_map(|c| c.get("mimeType").and_then(Value::as_str))
                .map(str::to_ascii_lowercase)
                .collect()
        })
        .unwrap_or_default()
}

#[async_trait]
impl MediaEngine for LocalMediaEngine {
    async fn create_router(&self) -> Result<RouterInfo, EngineError> {
        let id = RouterId::from(new_id());
        self.state.lock().await.routers.insert(id.clone());
        debug!(target: "cc.media.engine", router_id = %id, "Router created");
        Ok(RouterInfo {
            id,
            rtp_capabilities: json!({ "codecs": self.codecs, "headerExtensions": [] }),
        })
    }

    async fn close_router(&self, router_id: &RouterId) {
        let mut state = self.state.lock().await;
        if !state.routers.remove(router_id) {
            return;
        }
        let transports: Vec<TransportId> = state
            .transports
            .iter()
            .filter(|(_, t)| t.router_id == *router_id)
            .map(|(id, _)| id.clone())
            .collect();
        for transport_id in &transports {
            state.remove_transport(transport_id);
        }
        debug!(target: "cc.media.engine", router_id = %router_id, "Router closed");
    }

    async fn create_transport(&self, router_id: &RouterId) -> Result<TransportParams, EngineError> {
        let mut state = self.state.lock().await;
        if !state.routers.contains(router_id) {
            return Err(EngineError::new("create_transport", "unknown router"));
        }

        let id = TransportId::from(new_id());
        let port = self.allocate_port(&mut state);
        state.transports.insert(
            id.clone(),
            LocalTransport {
                router_id: router_id.clone(),
                connected: false,
            },
        );

        let fingerprint = Uuid::new_v4().simple().to_string().to_ascii_uppercase();
        Ok(TransportParams {
            id,
            ice_parameters: json!({
                "usernameFragment": Uuid::new_v4().simple().to_string(),
                "password": Uuid::new_v4().simple().to_string(),
                "iceLite": true
            }),
            ice_candidates: json!([{
                "foundation": "udpcandidate",
                "ip": self.config.candidate_ip(),
                "port": port,
                "priority": 1_076_302_079_u32,
                "protocol": "udp",
                "type": "host"
            }]),
            dtls_parameters: json!({
                "role": "auto",
                "fingerprints": [{ "algorithm": "sha-256", "value": fingerprint }]
            }),
        })
    }

    async fn connect_transport(
        &self,
        transport_id: &TransportId,
        dtls_parameters: &Value,
    ) -> Result<(), EngineError> {
        if !dtls_parameters.is_object() {
            return Err(EngineError::new(
                "connect_transport",
                "dtlsParameters must be an object",
            ));
        }
        let mut state = self.state.lock().await;
        let transport = state
            .transports
            .get_mut(transport_id)
            .ok_or_else(|| EngineError::new("connect_transport", "unknown transport"))?;
        if transport.connected {
            return Err(EngineError::new(
                "connect_transport",
                "transport already connected",
            ));
        }
        transport.connected = true;
        Ok(())
    }

    async fn close_transport(&self, transport_id: &TransportId) {
        self.state.lock().await.remove_transport(transport_id);
    }

    async fn create_producer(
        &self,
        transport_id: &TransportId,
        kind: MediaKind,
        rtp_parameters: &Value,
    ) -> Result<EngineProducer, EngineError> {
        let mime_types = codec_mime_types(rtp_parameters);
        let prefix = format!("{}/", kind.as_str());
        let Some(mime_type) = mime_types.into_iter().find(|m| m.starts_with(&prefix)) else {
            return Err(EngineError::new(
                "create_producer",
                format!("rtpParameters has no {} codec", kind.as_str()),
            ));
        };
        let supported = self
            .codecs
            .iter()
            .filter_map(|c| c.get("mimeType").and_then(Value::as_str))
            .any(|m| m.eq_ignore_ascii_case(&mime_type));
        if !supported {
            return Err(EngineError::new(
                "create_producer",
                format!("codec {mime_type} not supported by router"),
            ));
        }

        let mut state = self.state.lock().await;
        let router_id = state
            .transports
            .get(transport_id)
            .map(|t| t.router_id.clone())
            .ok_or_else(|| EngineError::new("create_producer", "unknown transport"))?;

        let id = ProducerId::from(new_id());
        state.producers.insert(
            id.clone(),
            LocalProducer {
                router_id,
                transport_id: transport_id.clone(),
                kind,
                mime_type,
                rtp_parameters: rtp_parameters.clone(),
            },
        );
        Ok(EngineProducer {
            id,
            kind,
            rtp_parameters: rtp_parameters.clone(),
        })
    }

    async fn close_producer(&self, producer_id: &ProducerId) {
        self.state.lock().await.remove_producer(producer_id);
    }

    async fn can_consume(
        &self,
        router_id: &RouterId,
        producer_id: &ProducerId,
        rtp_capabilities: &Value,
    ) -> bool {
        let state = self.state.lock().await;
        let Some(producer) = state.producers.get(producer_id) else {
            return false;
        };
        producer.router_id == *router_id
            && codec_mime_types(rtp_capabilities).contains(&producer.mime_type)
    }

    async fn create_consumer(
        &self,
        transport_id: &TransportId,
        producer_id: &ProducerId,
        rtp_capabilities: &Value,
    ) -> Result<EngineConsumer, EngineError> {
        let mut state = self.state.lock().await;
        if !state.transports.contains_key(transport_id) {
            return Err(EngineError::new("create_consumer", "unknown transport"));
        }
        let producer = state
            .producers
            .get(producer_id)
            .ok_or_else(|| EngineError::new("create_consumer", "unknown producer"))?;
        if !codec_mime_types(rtp_capabilities).contains(&producer.mime_type) {
            return Err(EngineError::new(
                "create_consumer",
                "capabilities do not include producer codec",
            ));
        }

        let kind = producer.kind;
        let codecs = producer
            .rtp_parameters
            .get("codecs")
            .cloned()
            .unwrap_or_else(|| json!([]));
        let rtp_parameters = json!({
            "codecs": codecs,
            "encodings": [{ "ssrc": rand_ssrc() }],
            "mid": new_id()
        });

        let id = ConsumerId::from(new_id());
        state.consumers.insert(
            id.clone(),
            LocalConsumer {
                transport_id: transport_id.clone(),
                producer_id: producer_id.clone(),
            },
        );
        Ok(EngineConsumer {
            id,
            producer_id: producer_id.clone(),
            kind,
            rtp_parameters,
        })
    }

    async fn close_consumer(&self, consumer_id: &ConsumerId) {
        self.state.lock().await.consumers.remove(consumer_id);
    }
}

fn rand_ssrc() -> u32 {
    let [a, b, c, d, ..] = Uuid::new_v4().into_bytes();
    u32::from_be_bytes([a, b, c, d])
}
