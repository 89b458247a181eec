//! Signaling wire format.
//!
//! Every frame is a JSON object `{"event": "<name>", "data": {...}}`.
//! Field names inside `data` are camelCase.

use crate::errors::CallError;
use crate::invitation::{ResponseStatus, StatusAction};
use common::types::{
    ConsumerId, MediaKind, MeetingId, ProducerId, TransportDirection, TransportId, UserId,
};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Events sent by clients.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data")]
pub enum ClientEvent {
    /// Bind this connection to an identity for notifications.
    #[serde(rename = "register")]
    Register { identity: UserId },

    #[serde(rename = "call:initiate", rename_all = "camelCase")]
    CallInitiate {
        meeting_id: MeetingId,
        host_id: UserId,
        #[serde(default)]
        participants: Vec<UserId>,
    },

    #[serde(rename = "call:accept", rename_all = "camelCase")]
    CallAccept {
        meeting_id: MeetingId,
        identity: UserId,
    },

    #[serde(rename = "call:decline", rename_all = "camelCase")]
    CallDecline {
        meeting_id: MeetingId,
        identity: UserId,
    },

    #[serde(rename = "call:cancel", rename_all = "camelCase")]
    CallCancel {
        meeting_id: MeetingId,
        host_id: UserId,
    },

    /// Join a meeting's media room without an invitation.
    #[serde(rename = "call:join", rename_all = "camelCase")]
    CallJoin {
        meeting_id: MeetingId,
        identity: UserId,
    },

    /// Join again after a dropped connection.
    #[serde(rename = "call:rejoin", rename_all = "camelCase")]
    CallRejoin {
        meeting_id: MeetingId,
        identity: UserId,
    },

    #[serde(rename = "call:leave", rename_all = "camelCase")]
    CallLeave {
        meeting_id: MeetingId,
        identity: UserId,
    },

    #[serde(rename = "call:end", rename_all = "camelCase")]
    CallEnd {
        meeting_id: MeetingId,
        host_id: UserId,
    },

    #[serde(rename = "router:rtpCapabilities", rename_all = "camelCase")]
    RouterCapabilities {
        meeting_id: MeetingId,
        identity: UserId,
    },

    #[serde(rename = "transport:create", rename_all = "camelCase")]
    TransportCreate {
        meeting_id: MeetingId,
        identity: UserId,
        direction: TransportDirection,
    },

    #[serde(rename = "transport:connect", rename_all = "camelCase")]
    TransportConnect {
        meeting_id: MeetingId,
        identity: UserId,
        transport_id: TransportId,
        dtls_parameters: Value,
    },

    #[serde(rename = "producer:create", rename_all = "camelCase")]
    ProducerCreate {
        meeting_id: MeetingId,
        identity: UserId,
        transport_id: TransportId,
        kind: MediaKind,
        rtp_parameters: Value,
    },

    #[serde(rename = "consumer:create", rename_all = "camelCase")]
    ConsumerCreate {
        meeting_id: MeetingId,
        identity: UserId,
        transport_id: TransportId,
        producer_id: ProducerId,
        rtp_capabilities: Value,
    },

    /// Client finished transport setup; replay existing producers to it.
    #[serde(rename = "client:ready", rename_all = "camelCase")]
    ClientReady {
        meeting_id: MeetingId,
        identity: UserId,
    },
}

impl ClientEvent {
    /// Decode a text frame.
    pub fn from_json(text: &str) -> Result<Self, CallError> {
        serde_json::from_str(text)
            .map_err(|e| CallError::InvalidRequest(format!("Malformed event: {e}")))
    }

    /// Wire name, used as a metrics label.
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            ClientEvent::Register { .. } => "register",
            ClientEvent::CallInitiate { .. } => "call:initiate",
            ClientEvent::CallAccept { .. } => "call:accept",
            ClientEvent::CallDecline { .. } => "call:decline",
            ClientEvent::CallCancel { .. } => "call:cancel",
            ClientEvent::CallJoin { .. } => "call:join",
            ClientEvent::CallRejoin { .. } => "call:rejoin",
            ClientEvent::CallLeave { .. } => "call:leave",
            ClientEvent::CallEnd { .. } => "call:end",
            ClientEvent::RouterCapabilities { .. } => "router:rtpCapabilities",
            ClientEvent::TransportCreate { .. } => "transport:create",
            ClientEvent::TransportConnect { .. } => "transport:connect",
            ClientEvent::ProducerCreate { .. } => "producer:create",
            ClientEvent::ConsumerCreate { .. } => "consumer:create",
            ClientEvent::ClientReady { .. } => "client:ready",
        }
    }

    /// Meeting the event targets, if any.
    #[must_use]
    pub fn meeting_id(&self) -> Option<&MeetingId> {
        match self {
            ClientEvent::Register { .. } => None,
            ClientEvent::CallInitiate { meeting_id, .. }
            | ClientEvent::CallAccept { meeting_id, .. }
            | ClientEvent::CallDecline { meeting_id, .. }
            | ClientEvent::CallCancel { meeting_id, .. }
            | ClientEvent::CallJoin { meeting_id, .. }
            | ClientEvent::CallRejoin { meeting_id, .. }
            | ClientEvent::CallLeave { meeting_id, .. }
            | ClientEvent::CallEnd { meeting_id, .. }
            | ClientEvent::RouterCapabilities { meeting_id, .. }
            | ClientEvent::TransportCreate { meeting_id, .. }
            | ClientEvent::TransportConnect { meeting_id, .. }
            | ClientEvent::ProducerCreate { meeting_id, .. }
            | ClientEvent::ConsumerCreate { meeting_id, .. }
            | ClientEvent::ClientReady { meeting_id, .. } => Some(meeting_id),
        }
    }
}

/// Connection state announced with `user:status`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PresenceStatus {
    Online,
    Offline,
}

/// Events sent to clients, either as replies or as notifications.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data")]
pub enum ServerEvent {
    #[serde(rename = "registered")]
    Registered { identity: UserId },

    #[serde(rename = "call:invite", rename_all = "camelCase")]
    CallInvite {
        meeting_id: MeetingId,
        host_id: UserId,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        title: Option<String>,
    },

    #[serde(rename = "call:accepted", rename_all = "camelCase")]
    CallAccepted {
        meeting_id: MeetingId,
        identity: UserId,
    },

    #[serde(rename = "call:declined", rename_all = "camelCase")]
    CallDeclined {
        meeting_id: MeetingId,
        identity: UserId,
    },

    #[serde(rename = "call:cancelled", rename_all = "camelCase")]
    CallCancelled { meeting_id: MeetingId },

    #[serde(rename = "call:timeout", rename_all = "camelCase")]
    CallTimeout {
        meeting_id: MeetingId,
        participants: Vec<UserId>,
    },

    #[serde(rename = "call:ended", rename_all = "camelCase")]
    CallEnded { meeting_id: MeetingId },

    /// Reply to a successful join: everyone now in the room.
    #[serde(rename = "call:joined", rename_all = "camelCase")]
    CallJoined {
        meeting_id: MeetingId,
        participants: Vec<UserId>,
    },

    #[serde(rename = "participant:status-update", rename_all = "camelCase")]
    ParticipantStatusUpdate {
        meeting_id: MeetingId,
        identity: UserId,
        status: ResponseStatus,
        action: StatusAction,
    },

    #[serde(rename = "participant:joined", rename_all = "camelCase")]
    ParticipantJoined {
        meeting_id: MeetingId,
        identity: UserId,
    },

    #[serde(rename = "participant:left", rename_all = "camelCase")]
    ParticipantLeft {
        meeting_id: MeetingId,
        identity: UserId,
    },

    #[serde(rename = "participant:rejoined", rename_all = "camelCase")]
    ParticipantRejoined {
        meeting_id: MeetingId,
        identity: UserId,
    },

    /// Another user came online or went offline.
    #[serde(rename = "user:status")]
    UserStatus {
        identity: UserId,
        status: PresenceStatus,
    },

    #[serde(rename = "router:rtpCapabilities", rename_all = "camelCase")]
    RouterCapabilities {
        meeting_id: MeetingId,
        rtp_capabilities: Value,
    },

    #[serde(rename = "transport:created", rename_all = "camelCase")]
    TransportCreated {
        meeting_id: MeetingId,
        direction: TransportDirection,
        id: TransportId,
        ice_parameters: Value,
        ice_candidates: Value,
        dtls_parameters: Value,
    },

    #[serde(rename = "transport:connected", rename_all = "camelCase")]
    TransportConnected {
        meeting_id: MeetingId,
        transport_id: TransportId,
    },

    #[serde(rename = "producer:created", rename_all = "camelCase")]
    ProducerCreated {
        meeting_id: MeetingId,
        identity: UserId,
        kind: MediaKind,
        producer_id: ProducerId,
        rtp_parameters: Value,
    },

    #[serde(rename = "consumer:created", rename_all = "camelCase")]
    ConsumerCreated {
        meeting_id: MeetingId,
        consumer_id: ConsumerId,
        producer_id: ProducerId,
        producer_identity: UserId,
        kind: MediaKind,
        rtp_parameters: Value,
    },

    #[serde(rename = "error")]
    Error { code: String, message: String },
}

impl ServerEvent {
    /// Build the `error` event for a failed operation.
    #[must_use]
    pub fn error(err: &CallError) -> Self {
        ServerEvent::Error {
            code: err.error_code().to_string(),
            message: err.client_message(),
        }
    }

    /// Wire name, for logging.
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            ServerEvent::Registered { .. } => "registered",
            ServerEvent::CallInvite { .. } => "call:invite",
            ServerEvent::CallAccepted { .. } => "call:accepted",
            ServerEvent::CallDeclined { .. } => "call:declined",
            ServerEvent::CallCancelled { .. } => "call:cancelled",
            ServerEvent::CallTimeout { .. } => "call:timeout",
            ServerEvent::CallEnded { .. } => "call:ended",
            ServerEvent::CallJoined { .. } => "call:joined",
            ServerEvent::ParticipantStatusUpdate { .. } => "participant:status-update",
            ServerEvent::ParticipantJoined { .. } => "participant:joined",
            ServerEvent::ParticipantLeft { .. } => "participant:left",
            ServerEvent::ParticipantRejoined { .. } => "participant:rejoined",
            ServerEvent::UserStatus { .. } => "user:status",
            ServerEvent::RouterCapabilities { .. } => "router:rtpCapabilities",
            ServerEvent::TransportCreated { .. } => "transport:created",
            ServerEvent::TransportConnected { .. } => "transport:connected",
            ServerEvent::ProducerCreated { .. } => "producer:created",
            ServerEvent::ConsumerCreated { .. } => "consumer:created",
            ServerEvent::Error { .. } => "error",
        }
    }

    /// Encode as a text frame.
    pub fn to_json(&self) -> Result<String, CallError> {
        serde_json::to_string(self)
            .map_err(|e| CallError::Internal(format!("event encoding failed: {e}")))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_decode_initiate() {
        let frame = json!({
            "event": "call:initiate",
            "data": {
                "meetingId": "meeting-1",
                "hostId": "host@example.com",
                "participants": ["a@example.com", "b@example.com"]
            }
        })
        .to_string();

        let event = ClientEvent::from_json(&frame).unwrap();
        assert_eq!(event.name(), "call:initiate");
        assert_eq!(event.meeting_id(), Some(&MeetingId::from("meeting-1")));
        assert!(matches!(
            event,
            ClientEvent::CallInitiate { ref participants, .. } if participants.len() == 2
        ));
    }

    #[test]
    fn test_decode_transport_create_direction() {
        let frame = r#"{"event":"transport:create","data":{"meetingId":"m","identity":"a@example.com","direction":"send"}}"#;
        let event = ClientEvent::from_json(frame).unwrap();
        assert_eq!(
            event,
            ClientEvent::TransportCreate {
                meeting_id: MeetingId::from("m"),
                identity: UserId::from("a@example.com"),
                direction: TransportDirection::Send,
            }
        );
    }

    #[test]
    fn test_unknown_event_is_invalid_request() {
        let result = ClientEvent::from_json(r#"{"event":"call:dance","data":{}}"#);
        assert!(matches!(result, Err(CallError::InvalidRequest(_))));

        let result = ClientEvent::from_json("not json");
        assert!(matches!(result, Err(CallError::InvalidRequest(_))));
    }

    #[test]
    fn test_encode_status_update() {
        let event = ServerEvent::ParticipantStatusUpdate {
            meeting_id: MeetingId::from("m"),
            identity: UserId::from("a@example.com"),
            status: ResponseStatus::TimedOut,
            action: StatusAction::Timeout,
        };
        let value: Value = serde_json::from_str(&event.to_json().unwrap()).unwrap();
        assert_eq!(
            value,
            json!({
                "event": "participant:status-update",
                "data": {
                    "meetingId": "m",
                    "identity": "a@example.com",
                    "status": "timedOut",
                    "action": "timeout"
                }
            })
        );
    }

    #[test]
    fn test_encode_consumer_created_names_producer_identity() {
        let event = ServerEvent::ConsumerCreated {
            meeting_id: MeetingId::from("m"),
            consumer_id: ConsumerId::from("c1"),
            producer_id: ProducerId::from("p1"),
            producer_identity: UserId::from("b@example.com"),
            kind: MediaKind::Audio,
            rtp_parameters: json!({"codecs": []}),
        };
        let value: Value = serde_json::from_str(&event.to_json().unwrap()).unwrap();
        assert_eq!(value["event"], "consumer:created");
        assert_eq!(value["data"]["producerIdentity"], "b@example.com");
        assert_eq!(value["data"]["kind"], "audio");
    }

    #[test]
    fn test_error_event_uses_client_message() {
        let event = ServerEvent::error(&CallError::EngineFailure("secret detail".into()));
        assert_eq!(
            event,
            ServerEvent::Error {
                code: "ENGINE_FAILURE".to_string(),
                message: "Media operation failed".to_string(),
            }
        );
    }

    #[test]
    fn test_encode_user_status() {
        let event = ServerEvent::UserStatus {
            identity: UserId::from("a@example.com"),
            status: PresenceStatus::Offline,
        };
        let value: Value = serde_json::from_str(&event.to_json().unwrap()).unwrap();
        assert_eq!(
            value,
            json!({
                "event": "user:status",
                "data": { "identity": "a@example.com", "status": "offline" }
            })
        );
    }

    #[test]
    fn test_decode_rejoin() {
        let frame = r#"{"event":"call:rejoin","data":{"meetingId":"m","identity":"a@example.com"}}"#;
        let event = ClientEvent::from_json(frame).unwrap();
        assert_eq!(event.name(), "call:rejoin");
        assert_eq!(
            event,
            ClientEvent::CallRejoin {
                meeting_id: MeetingId::from("m"),
                identity: UserId::from("a@example.com"),
            }
        );
    }

    #[test]
    fn test_invite_omits_missing_title() {
        let event = ServerEvent::CallInvite {
            meeting_id: MeetingId::from("m"),
            host_id: UserId::from("host@example.com"),
            title: None,
        };
        let value: Value = serde_json::from_str(&event.to_json().unwrap()).unwrap();
        assert!(value["data"].get("title").is_none());
    }
}
