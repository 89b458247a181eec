//! Message types for actor communication.
//!
//! All inter-actor communication uses strongly-typed message passing via `tokio::sync::mpsc`.
//! Response patterns use `tokio::sync::oneshot` for request-reply semantics.

use super::meeting::MeetingActorHandle;
use crate::errors::CallError;
use crate::invitation::{InvitationSnapshot, ResponseOutcome};
use crate::media::{ConsumerInfo, ProducerInfo, RoomSnapshot, TransportParams};
use common::types::{MediaKind, MeetingId, ProducerId, TransportDirection, TransportId, UserId};
use serde_json::Value;
use std::time::Duration;
use tokio::sync::oneshot;

/// Messages sent to `CallControllerActor`.
#[derive(Debug)]
pub enum ControllerMessage {
    /// Get the live actor for a meeting, spawning one if needed.
    GetOrSpawnMeeting {
        meeting_id: MeetingId,
        respond_to: oneshot::Sender<Result<MeetingActorHandle, CallError>>,
    },

    /// A client connection went away; every meeting drops the identity
    /// from its room.
    ParticipantDisconnected { identity: UserId },

    /// Get current status of all meetings (for health checks).
    GetStatus {
        respond_to: oneshot::Sender<ControllerStatus>,
    },

    /// Initiate graceful shutdown.
    Shutdown {
        deadline: Duration,
        respond_to: oneshot::Sender<Result<(), CallError>>,
    },
}

/// Messages sent to `MeetingActor`.
#[derive(Debug)]
pub enum MeetingMessage {
    /// Host starts ringing participants.
    InitiateCall {
        host_id: UserId,
        participants: Vec<UserId>,
        respond_to: oneshot::Sender<Result<InvitationSummary, CallError>>,
    },

    /// An invitee accepted or declined. Replies with the room members when
    /// the responder joined the room.
    RespondToInvitation {
        identity: UserId,
        outcome: ResponseOutcome,
        respond_to: oneshot::Sender<Result<Option<Vec<UserId>>, CallError>>,
    },

    /// Host cancels the invitation; ends the meeting.
    CancelCall {
        host_id: UserId,
        respond_to: oneshot::Sender<Result<(), CallError>>,
    },

    /// Host ends the meeting.
    EndMeeting {
        host_id: UserId,
        respond_to: oneshot::Sender<Result<(), CallError>>,
    },

    /// Join the media room directly. `rejoin` marks a return after a
    /// dropped connection.
    JoinMeeting {
        identity: UserId,
        rejoin: bool,
        respond_to: oneshot::Sender<Result<Vec<UserId>, CallError>>,
    },

    /// Explicit leave.
    LeaveMeeting {
        identity: UserId,
        respond_to: oneshot::Sender<Result<(), CallError>>,
    },

    /// Connection for `identity` closed.
    ParticipantDisconnected { identity: UserId },

    /// Posted by the invitation timer. Ignored unless `generation` matches
    /// the outstanding invitation.
    InvitationTimeout { generation: u64 },

    GetRtpCapabilities {
        identity: UserId,
        respond_to: oneshot::Sender<Result<Value, CallError>>,
    },

    CreateTransport {
        identity: UserId,
        direction: TransportDirection,
        respond_to: oneshot::Sender<Result<TransportParams, CallError>>,
    },

    ConnectTransport {
        identity: UserId,
        transport_id: TransportId,
        dtls_parameters: Value,
        respond_to: oneshot::Sender<Result<(), CallError>>,
    },

    CreateProducer {
        identity: UserId,
        transport_id: TransportId,
        kind: MediaKind,
        rtp_parameters: Value,
        respond_to: oneshot::Sender<Result<ProducerInfo, CallError>>,
    },

    CreateConsumer {
        identity: UserId,
        transport_id: TransportId,
        producer_id: ProducerId,
        rtp_capabilities: Value,
        respond_to: oneshot::Sender<Result<ConsumerInfo, CallError>>,
    },

    /// Client finished setup; announce every other producer to it.
    /// Replies with the number announced.
    ClientReady {
        identity: UserId,
        respond_to: oneshot::Sender<Result<usize, CallError>>,
    },

    /// Get current meeting state (for debugging/tests).
    GetState {
        respond_to: oneshot::Sender<MeetingState>,
    },
}

/// Outcome of starting an invitation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InvitationSummary {
    /// Invitees after removing the host and duplicates.
    pub invited: Vec<UserId>,
    pub window: Duration,
}

/// Snapshot of a meeting actor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MeetingState {
    pub meeting_id: MeetingId,
    pub invitation: Option<InvitationSnapshot>,
    pub room: Option<RoomSnapshot>,
    pub ended: bool,
}

/// Snapshot of the controller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ControllerStatus {
    pub meeting_count: usize,
    pub meetings: Vec<MeetingId>,
    pub is_shutting_down: bool,
}
