//! Media room: per-meeting index of engine resources.
//!
//! A room wraps one engine router and records, for every participant, the
//! transports (one per direction), producers (one per kind) and consumers
//! (one per remote producer) it owns. Flat indices by resource id sit next to
//! the per-participant maps so lookups by id and teardown by owner are both
//! direct.
//!
//! Resources are registered only after the engine call that creates them
//! succeeds. Replacing a transport or producer closes the old one after the
//! new one exists. Closing a producer closes every consumer of it; closing a
//! transport closes the producers and consumers created on it.

use super::engine::{EngineError, MediaEngine, RouterInfo, TransportParams};
use crate::errors::CallError;
use crate::observability::metrics;
use chrono::{DateTime, Utc};
use common::types::{
    ConsumerId, MediaKind, MeetingId, ProducerId, RouterId, TransportDirection, TransportId,
    UserId,
};
use serde_json::Value;
use std::collections::HashMap;
use tracing::{debug, info, warn};

fn engine_failure(meeting_id: &MeetingId, err: EngineError) -> CallError {
    warn!(
        target: "cc.media",
        meeting_id = %meeting_id,
        operation = err.operation,
        error = %err,
        "Media engine call failed"
    );
    metrics::record_engine_failure(err.operation);
    CallError::EngineFailure(err.to_string())
}

#[derive(Debug, Default)]
struct ParticipantMedia {
    joined_at: Option<DateTime<Utc>>,
    transports: HashMap<TransportDirection, TransportId>,
    producers: HashMap<MediaKind, ProducerId>,
    /// Keyed by the producer being consumed.
    consumers: HashMap<ProducerId, ConsumerId>,
}

#[derive(Debug, Clone)]
struct TransportEntry {
    owner: UserId,
    direction: TransportDirection,
}

#[derive(Debug, Clone)]
struct ProducerEntry {
    owner: UserId,
    kind: MediaKind,
    transport_id: TransportId,
    rtp_parameters: Value,
}

#[derive(Debug, Clone)]
struct ConsumerEntry {
    owner: UserId,
    producer_id: ProducerId,
    transport_id: TransportId,
}

/// Whether a join added a participant or found one already present.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JoinKind {
    New,
    Rejoined,
}

/// A producer as announced to other participants.
#[derive(Debug, Clone, PartialEq)]
pub struct ProducerInfo {
    pub owner: UserId,
    pub id: ProducerId,
    pub kind: MediaKind,
    pub rtp_parameters: Value,
}

/// A newly created consumer.
#[derive(Debug, Clone, PartialEq)]
pub struct ConsumerInfo {
    pub id: ConsumerId,
    pub producer_id: ProducerId,
    pub producer_owner: UserId,
    pub kind: MediaKind,
    pub rtp_parameters: Value,
}

/// What a departure released.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReleasedResources {
    pub transports: usize,
    pub producers: usize,
    pub consumers: usize,
}

/// Per-participant counts for state queries.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParticipantMediaSnapshot {
    pub identity: UserId,
    pub transports: Vec<TransportDirection>,
    pub producers: Vec<(MediaKind, ProducerId)>,
    pub consumers: usize,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoomSnapshot {
    pub router_id: RouterId,
    pub participants: Vec<ParticipantMediaSnapshot>,
    pub transport_count: usize,
    pub producer_count: usize,
    pub consumer_count: usize,
}

#[derive(Debug)]
pub struct MediaRoom {
    meeting_id: MeetingId,
    router: RouterInfo,
    participants: HashMap<UserId, ParticipantMedia>,
    transports: HashMap<TransportId, TransportEntry>,
    producers: HashMap<ProducerId, ProducerEntry>,
    consumers: HashMap<ConsumerId, ConsumerEntry>,
}

impl MediaRoom {
    /// Create the room's router.
    pub async fn open(meeting_id: MeetingId, engine: &dyn MediaEngine) -> Result<Self, CallError> {
        let router = engine
            .create_router()
            .await
            .map_err(|e| engine_failure(&meeting_id, e))?;

        info!(
            target: "cc.media",
            meeting_id = %meeting_id,
            router_id = %router.id,
            "Media room created"
        );
        metrics::room_opened();

        Ok(Self {
            meeting_id,
            router,
            participants: HashMap::new(),
            transports: HashMap::new(),
            producers: HashMap::new(),
            consumers: HashMap::new(),
        })
    }

    #[must_use]
    pub fn router_id(&self) -> &RouterId {
        &self.router.id
    }

    #[must_use]
    pub fn rtp_capabilities(&self) -> &Value {
        &self.router.rtp_capabilities
    }

    #[must_use]
    pub fn contains(&self, identity: &UserId) -> bool {
        self.participants.contains_key(identity)
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.participants.is_empty()
    }

    /// Current members, sorted.
    #[must_use]
    pub fn participant_ids(&self) -> Vec<UserId> {
        let mut ids: Vec<UserId> = self.participants.keys().cloned().collect();
        ids.sort();
        ids
    }

    /// Add a participant with no media. Joining again keeps existing media
    /// and refreshes the join time.
    pub fn join(&mut self, identity: &UserId) -> JoinKind {
        if let Some(media) = self.participants.get_mut(identity) {
            media.joined_at = Some(Utc::now());
            debug!(target: "cc.media", meeting_id = %self.meeting_id, identity = %identity, "Participant rejoined");
            return JoinKind::Rejoined;
        }
        self.participants.insert(
            identity.clone(),
            ParticipantMedia {
                joined_at: Some(Utc::now()),
                ..ParticipantMedia::default()
            },
        );
        debug!(target: "cc.media", meeting_id = %self.meeting_id, identity = %identity, "Participant joined room");
        JoinKind::New
    }

    fn require_participant(&self, identity: &UserId) -> Result<(), CallError> {
        if self.participants.contains_key(identity) {
            Ok(())
        } else {
            Err(CallError::NotFound(format!(
                "{identity} is not in the meeting"
            )))
        }
    }

    fn owned_transport(
        &self,
        identity: &UserId,
        transport_id: &TransportId,
    ) -> Result<&TransportEntry, CallError> {
        let entry = self
            .transports
            .get(transport_id)
            .ok_or_else(|| CallError::NotFound("Transport not found".to_string()))?;
        if entry.owner != *identity {
            return Err(CallError::NotFound(
                "Transport not found for this participant".to_string(),
            ));
        }
        Ok(entry)
    }

    pub async fn create_transport(
        &mut self,
        engine: &dyn MediaEngine,
        identity: &UserId,
        direction: TransportDirection,
    ) -> Result<TransportParams, CallError> {
        self.require_participant(identity)?;

        let params = engine
            .create_transport(&self.router.id)
            .await
            .map_err(|e| engine_failure(&self.meeting_id, e))?;

        let replaced = self
            .participants
            .get_mut(identity)
            .and_then(|p| p.transports.insert(direction, params.id.clone()));
        self.transports.insert(
            params.id.clone(),
            TransportEntry {
                owner: identity.clone(),
                direction,
            },
        );

        if let Some(old) = replaced {
            debug!(
                target: "cc.media",
                meeting_id = %self.meeting_id,
                identity = %identity,
                direction = direction.as_str(),
                "Replacing transport"
            );
            let (producers, consumers) = self.detach_transport(&old);
            close_all(engine, &consumers, &producers, &[old]).await;
        }

        Ok(params)
    }

    pub async fn connect_transport(
        &mut self,
        engine: &dyn MediaEngine,
        identity: &UserId,
        transport_id: &TransportId,
        dtls_parameters: &Value,
    ) -> Result<(), CallError> {
        self.require_participant(identity)?;
        self.owned_transport(identity, transport_id)?;

        engine
            .connect_transport(transport_id, dtls_parameters)
            .await
            .map_err(|e| engine_failure(&self.meeting_id, e))
    }

    pub async fn create_producer(
        &mut self,
        engine: &dyn MediaEngine,
        identity: &UserId,
        transport_id: &TransportId,
        kind: MediaKind,
        rtp_parameters: &Value,
    ) -> Result<ProducerInfo, CallError> {
        self.require_participant(identity)?;
        let transport = self.owned_transport(identity, transport_id)?;
        if transport.direction != TransportDirection::Send {
            return Err(CallError::InvalidRequest(
                "Producers require a send transport".to_string(),
            ));
        }

        let producer = engine
            .create_producer(transport_id, kind, rtp_parameters)
            .await
            .map_err(|e| engine_failure(&self.meeting_id, e))?;

        let replaced = self
            .participants
            .get_mut(identity)
            .and_then(|p| p.producers.insert(kind, producer.id.clone()));
        self.producers.insert(
            producer.id.clone(),
            ProducerEntry {
                owner: identity.clone(),
                kind,
                transport_id: transport_id.clone(),
                rtp_parameters: producer.rtp_parameters.clone(),
            },
        );

        if let Some(old) = replaced {
            debug!(
                target: "cc.media",
                meeting_id = %self.meeting_id,
                identity = %identity,
                kind = kind.as_str(),
                "Replacing producer"
            );
            let consumers = self.detach_producer(&old);
            close_all(engine, &consumers, &[old], &[]).await;
        }

        Ok(ProducerInfo {
            owner: identity.clone(),
            id: producer.id,
            kind,
            rtp_parameters: producer.rtp_parameters,
        })
    }

    pub async fn create_consumer(
        &mut self,
        engine: &dyn MediaEngine,
        identity: &UserId,
        transport_id: &TransportId,
        producer_id: &ProducerId,
        rtp_capabilities: &Value,
    ) -> Result<ConsumerInfo, CallError> {
        self.require_participant(identity)?;
        let transport = self.owned_transport(identity, transport_id)?;
        if transport.direction != TransportDirection::Recv {
            return Err(CallError::InvalidRequest(
                "Consumers require a receive transport".to_string(),
            ));
        }
        let producer_owner = self
            .producers
            .get(producer_id)
            .map(|p| p.owner.clone())
            .ok_or_else(|| CallError::NotFound("Producer not found".to_string()))?;

        if !engine
            .can_consume(&self.router.id, producer_id, rtp_capabilities)
            .await
        {
            return Err(CallError::Unsupported(
                "Cannot consume this producer with the given capabilities".to_string(),
            ));
        }

        let consumer = engine
            .create_consumer(transport_id, producer_id, rtp_capabilities)
            .await
            .map_err(|e| engine_failure(&self.meeting_id, e))?;

        let replaced = self
            .participants
            .get_mut(identity)
            .and_then(|p| p.consumers.insert(producer_id.clone(), consumer.id.clone()));
        self.consumers.insert(
            consumer.id.clone(),
            ConsumerEntry {
                owner: identity.clone(),
                producer_id: producer_id.clone(),
                transport_id: transport_id.clone(),
            },
        );

        if let Some(old) = replaced {
            self.consumers.remove(&old);
            engine.close_consumer(&old).await;
        }

        Ok(ConsumerInfo {
            id: consumer.id,
            producer_id: consumer.producer_id,
            producer_owner,
            kind: consumer.kind,
            rtp_parameters: consumer.rtp_parameters,
        })
    }

    /// Producers owned by anyone other than `identity`.
    #[must_use]
    pub fn producers_except(&self, identity: &UserId) -> Vec<ProducerInfo> {
        let mut producers: Vec<ProducerInfo> = self
            .producers
            .iter()
            .filter(|(_, p)| p.owner != *identity)
            .map(|(id, p)| ProducerInfo {
                owner: p.owner.clone(),
                id: id.clone(),
                kind: p.kind,
                rtp_parameters: p.rtp_parameters.clone(),
            })
            .collect();
        producers.sort_by(|a, b| a.owner.cmp(&b.owner).then(a.id.cmp(&b.id)));
        producers
    }

    /// Remove a participant and close everything it owns, plus every
    /// consumer of its producers. Returns `None` if it was not present.
    pub async fn leave(
        &mut self,
        engine: &dyn MediaEngine,
        identity: &UserId,
    ) -> Option<ReleasedResources> {
        let media = self.participants.remove(identity)?;

        let mut consumers: Vec<ConsumerId> = media.consumers.into_values().collect();
        for consumer_id in &consumers {
            self.consumers.remove(consumer_id);
        }

        let producers: Vec<ProducerId> = media.producers.into_values().collect();
        for producer_id in &producers {
            consumers.extend(self.detach_producer(producer_id));
        }

        let transports: Vec<TransportId> = media.transports.into_values().collect();
        for transport_id in &transports {
            self.transports.remove(transport_id);
        }

        close_all(engine, &consumers, &producers, &transports).await;

        let released = ReleasedResources {
            transports: transports.len(),
            producers: producers.len(),
            consumers: consumers.len(),
        };
        let attended_seconds = media
            .joined_at
            .map(|joined| (Utc::now() - joined).num_seconds());
        info!(
            target: "cc.media",
            meeting_id = %self.meeting_id,
            identity = %identity,
            transports = released.transports,
            producers = released.producers,
            consumers = released.consumers,
            attended_seconds = attended_seconds,
            "Participant left room"
        );
        Some(released)
    }

    /// Release every participant's media and close the router.
    pub async fn destroy(mut self, engine: &dyn MediaEngine) {
        for identity in self.participant_ids() {
            self.leave(engine, &identity).await;
        }
        engine.close_router(&self.router.id).await;
        metrics::room_closed();
        info!(
            target: "cc.media",
            meeting_id = %self.meeting_id,
            router_id = %self.router.id,
            "Media room destroyed"
        );
    }

    #[must_use]
    pub fn snapshot(&self) -> RoomSnapshot {
        let participants = self
            .participant_ids()
            .into_iter()
            .filter_map(|identity| {
                let media = self.participants.get(&identity)?;
                let mut transports: Vec<TransportDirection> =
                    media.transports.keys().copied().collect();
                transports.sort_by_key(TransportDirection::as_str);
                let mut producers: Vec<(MediaKind, ProducerId)> = media
                    .producers
                    .iter()
                    .map(|(kind, id)| (*kind, id.clone()))
                    .collect();
                producers.sort_by_key(|(kind, _)| kind.as_str());
                Some(ParticipantMediaSnapshot {
                    identity,
                    transports,
                    producers,
                    consumers: media.consumers.len(),
                })
            })
            .collect();

        RoomSnapshot {
            router_id: self.router.id.clone(),
            participants,
            transport_count: self.transports.len(),
            producer_count: self.producers.len(),
            consumer_count: self.consumers.len(),
        }
    }

    /// Drop a producer and every consumer of it from the indices. Returns
    /// the consumers to close.
    fn detach_producer(&mut self, producer_id: &ProducerId) -> Vec<ConsumerId> {
        if let Some(entry) = self.producers.remove(producer_id) {
            if let Some(owner) = self.participants.get_mut(&entry.owner) {
                owner.producers.retain(|_, id| id != producer_id);
            }
        }

        let consumers: Vec<(ConsumerId, UserId)> = self
            .consumers
            .iter()
            .filter(|(_, c)| c.producer_id == *producer_id)
            .map(|(id, c)| (id.clone(), c.owner.clone()))
            .collect();
        for (consumer_id, owner) in &consumers {
            self.consumers.remove(consumer_id);
            if let Some(media) = self.participants.get_mut(owner) {
                media.consumers.remove(producer_id);
            }
        }
        consumers.into_iter().map(|(id, _)| id).collect()
    }

    /// Drop a transport and what was created on it from the indices.
    fn detach_transport(&mut self, transport_id: &TransportId) -> (Vec<ProducerId>, Vec<ConsumerId>) {
        self.transports.remove(transport_id);

        let producers: Vec<ProducerId> = self
            .producers
            .iter()
            .filter(|(_, p)| p.transport_id == *transport_id)
            .map(|(id, _)| id.clone())
            .collect();
        let mut consumers = Vec::new();
        for producer_id in &producers {
            consumers.extend(self.detach_producer(producer_id));
        }

        let on_transport: Vec<(ConsumerId, ConsumerEntry)> = self
            .consumers
            .iter()
            .filter(|(_, c)| c.transport_id == *transport_id)
            .map(|(id, c)| (id.clone(), c.clone()))
            .collect();
        for (consumer_id, entry) in on_transport {
            self.consumers.remove(&consumer_id);
            if let Some(media) = self.participants.get_mut(&entry.owner) {
                media.consumers.remove(&entry.producer_id);
            }
            consumers.push(consumer_id);
        }

        (producers, consumers)
    }
}

/// Close engine resources consumers first, then producers, then transports.
async fn close_all(
    engine: &dyn MediaEngine,
    consumers: &[ConsumerId],
    producers: &[ProducerId],
    transports: &[TransportId],
) {
    for consumer_id in consumers {
        engine.close_consumer(consumer_id).await;
    }
    for producer_id in producers {
        engine.close_producer(producer_id).await;
    }
    for transport_id in transports {
        engine.close_transport(transport_id).await;
    }
}
