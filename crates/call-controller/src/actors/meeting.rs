//! `MeetingActor` - per-meeting actor that owns the call invitation and the
//! media room.
//!
//! Every mutation of one meeting's invitation and room is a message handled
//! in order by this actor, so the invitation timer, the invitees' responses
//! and the host's cancel/end are totally ordered without locks.
//!
//! # Invitation timeout
//!
//! `initiate` spawns a timer task that sleeps until the deadline and posts
//! `InvitationTimeout { generation }` back into the mailbox. Whichever of
//! "last response" or "timeout" is handled first takes the invitation out of
//! its slot; the other finds the slot empty (or holding a newer generation)
//! and does nothing.
//!
//! # Lifetime
//!
//! Once the meeting ends the actor cancels its own token, rejects anything
//! still queued and exits. The controller never spawns an actor for a
//! completed meeting.
//!
//! An active meeting with no outstanding invitation and nobody in its room
//! is idle. After [`IDLE_GRACE_PERIOD`] of idleness the actor stops without
//! completing the meeting; the next event for it spawns a fresh actor.

use super::messages::{InvitationSummary, MeetingMessage, MeetingState};
use super::metrics::{ActorType, MailboxMonitor};
use super::CallServices;
use crate::errors::CallError;
use crate::invitation::{CallInvitation, RecordOutcome, ResponseOutcome, ResponseStatus, StatusAction};
use crate::media::{ConsumerInfo, JoinKind, MediaRoom, ProducerInfo, TransportParams};
use crate::signaling::events::ServerEvent;
use crate::store::{MeetingRecord, MeetingStatus};
use common::types::{MediaKind, MeetingId, ProducerId, TransportDirection, TransportId, UserId};
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

/// Default channel buffer size for the meeting mailbox.
const MEETING_CHANNEL_BUFFER: usize = 500;

/// How long an idle meeting keeps its actor.
pub const IDLE_GRACE_PERIOD: Duration = Duration::from_secs(30);

/// How often idleness is checked.
const IDLE_CHECK_INTERVAL: Duration = Duration::from_secs(5);

/// Handle to a `MeetingActor`.
#[derive(Debug, Clone)]
pub struct MeetingActorHandle {
    sender: mpsc::Sender<MeetingMessage>,
    cancel_token: CancellationToken,
    meeting_id: MeetingId,
}

impl MeetingActorHandle {
    #[must_use]
    pub fn meeting_id(&self) -> &MeetingId {
        &self.meeting_id
    }

    async fn request<T>(
        &self,
        build: impl FnOnce(oneshot::Sender<Result<T, CallError>>) -> MeetingMessage,
    ) -> Result<T, CallError> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(build(tx))
            .await
            .map_err(|e| CallError::Internal(format!("channel send failed: {e}")))?;

        rx.await
            .map_err(|e| CallError::Internal(format!("response receive failed: {e}")))?
    }

    /// Host starts ringing `participants` (empty means the meeting's
    /// stored invite list).
    pub async fn initiate_call(
        &self,
        host_id: UserId,
        participants: Vec<UserId>,
    ) -> Result<InvitationSummary, CallError> {
        self.request(|respond_to| MeetingMessage::InitiateCall {
            host_id,
            participants,
            respond_to,
        })
        .await
    }

    /// Record an accept/decline. Returns the room members when the
    /// responder joined the room.
    pub async fn respond(
        &self,
        identity: UserId,
        outcome: ResponseOutcome,
    ) -> Result<Option<Vec<UserId>>, CallError> {
        self.request(|respond_to| MeetingMessage::RespondToInvitation {
            identity,
            outcome,
            respond_to,
        })
        .await
    }

    pub async fn cancel_call(&self, host_id: UserId) -> Result<(), CallError> {
        self.request(|respond_to| MeetingMessage::CancelCall {
            host_id,
            respond_to,
        })
        .await
    }

    pub async fn end_meeting(&self, host_id: UserId) -> Result<(), CallError> {
        self.request(|respond_to| MeetingMessage::EndMeeting {
            host_id,
            respond_to,
        })
        .await
    }

    pub async fn join(&self, identity: UserId) -> Result<Vec<UserId>, CallError> {
        self.request(|respond_to| MeetingMessage::JoinMeeting {
            identity,
            rejoin: false,
            respond_to,
        })
        .await
    }

    /// Join again after a dropped connection. Other members are told with
    /// `participant:rejoined`.
    pub async fn rejoin(&self, identity: UserId) -> Result<Vec<UserId>, CallError> {
        self.request(|respond_to| MeetingMessage::JoinMeeting {
            identity,
            rejoin: true,
            respond_to,
        })
        .await
    }

    pub async fn leave(&self, identity: UserId) -> Result<(), CallError> {
        self.request(|respond_to| MeetingMessage::LeaveMeeting {
            identity,
            respond_to,
        })
        .await
    }

    /// Notify of a closed connection. Does not wait for processing.
    pub async fn participant_disconnected(&self, identity: UserId) -> Result<(), CallError> {
        self.sender
            .send(MeetingMessage::ParticipantDisconnected { identity })
            .await
            .map_err(|e| CallError::Internal(format!("channel send failed: {e}")))
    }

    pub async fn rtp_capabilities(&self, identity: UserId) -> Result<Value, CallError> {
        self.request(|respond_to| MeetingMessage::GetRtpCapabilities {
            identity,
            respond_to,
        })
        .await
    }

    pub async fn create_transport(
        &self,
        identity: UserId,
        direction: TransportDirection,
    ) -> Result<TransportParams, CallError> {
        self.request(|respond_to| MeetingMessage::CreateTransport {
            identity,
            direction,
            respond_to,
        })
        .await
    }

    pub async fn connect_transport(
        &self,
        identity: UserId,
        transport_id: TransportId,
        dtls_parameters: Value,
    ) -> Result<(), CallError> {
        self.request(|respond_to| MeetingMessage::ConnectTransport {
            identity,
            transport_id,
            dtls_parameters,
            respond_to,
        })
        .await
    }

    pub async fn create_producer(
        &self,
        identity: UserId,
        transport_id: TransportId,
        kind: MediaKind,
        rtp_parameters: Value,
    ) -> Result<ProducerInfo, CallError> {
        self.request(|respond_to| MeetingMessage::CreateProducer {
            identity,
            transport_id,
            kind,
            rtp_parameters,
            respond_to,
        })
        .await
    }

    pub async fn create_consumer(
        &self,
        identity: UserId,
        transport_id: TransportId,
        producer_id: ProducerId,
        rtp_capabilities: Value,
    ) -> Result<ConsumerInfo, CallError> {
        self.request(|respond_to| MeetingMessage::CreateConsumer {
            identity,
            transport_id,
            producer_id,
            rtp_capabilities,
            respond_to,
        })
        .await
    }

    pub async fn client_ready(&self, identity: UserId) -> Result<usize, CallError> {
        self.request(|respond_to| MeetingMessage::ClientReady {
            identity,
            respond_to,
        })
        .await
    }

    pub async fn get_state(&self) -> Result<MeetingState, CallError> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(MeetingMessage::GetState { respond_to: tx })
            .await
            .map_err(|e| CallError::Internal(format!("channel send failed: {e}")))?;

        rx.await
            .map_err(|e| CallError::Internal(format!("response receive failed: {e}")))
    }

    pub fn cancel(&self) {
        self.cancel_token.cancel();
    }

    /// True once the actor has stopped (or is stopping) and will not accept
    /// new work.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancel_token.is_cancelled() || self.sender.is_closed()
    }
}

/// The `MeetingActor` implementation.
pub struct MeetingActor {
    meeting_id: MeetingId,
    receiver: mpsc::Receiver<MeetingMessage>,
    /// Weak so the actor's own timer never keeps the mailbox open.
    self_sender: mpsc::WeakSender<MeetingMessage>,
    cancel_token: CancellationToken,
    services: CallServices,
    invitation: Option<CallInvitation>,
    next_generation: u64,
    room: Option<MediaRoom>,
    ended: bool,
    /// Set while there is no invitation and nobody in the room.
    idle_since: Option<Instant>,
    mailbox: MailboxMonitor,
}

impl MeetingActor {
    /// Spawn a new meeting actor. `cancel_token` should be a child of the
    /// controller's token.
    pub fn spawn(
        meeting_id: MeetingId,
        cancel_token: CancellationToken,
        services: CallServices,
    ) -> (MeetingActorHandle, JoinHandle<()>) {
        let (sender, receiver) = mpsc::channel(MEETING_CHANNEL_BUFFER);

        services.metrics.meeting_spawned();

        let actor = Self {
            meeting_id: meeting_id.clone(),
            receiver,
            self_sender: sender.downgrade(),
            cancel_token: cancel_token.clone(),
            services,
            invitation: None,
            next_generation: 0,
            room: None,
            ended: false,
            idle_since: Some(Instant::now()),
            mailbox: MailboxMonitor::new(ActorType::Meeting, meeting_id.as_str()),
        };

        let task_handle = tokio::spawn(actor.run());

        let handle = MeetingActorHandle {
            sender,
            cancel_token,
            meeting_id,
        };

        (handle, task_handle)
    }

    #[instrument(skip_all, name = "cc.actor.meeting", fields(meeting_id = %self.meeting_id))]
    async fn run(mut self) {
        debug!(
            target: "cc.actor.meeting",
            meeting_id = %self.meeting_id,
            "MeetingActor started"
        );

        let mut idle_check = tokio::time::interval(IDLE_CHECK_INTERVAL);

        loop {
            tokio::select! {
                biased;

                () = self.cancel_token.cancelled() => {
                    self.graceful_shutdown().await;
                    break;
                }

                msg = self.receiver.recv() => {
                    match msg {
                        Some(message) => {
                            self.mailbox.record_received(self.receiver.len());
                            self.handle_message(message).await;
                            self.mailbox.record_handled();
                            self.services.metrics.record_message_processed();
                            self.refresh_idle();
                        }
                        None => {
                            debug!(
                                target: "cc.actor.meeting",
                                meeting_id = %self.meeting_id,
                                "MeetingActor channel closed, exiting"
                            );
                            self.graceful_shutdown().await;
                            break;
                        }
                    }
                }

                _ = idle_check.tick() => {
                    if self.idle_expired() {
                        info!(
                            target: "cc.actor.meeting",
                            meeting_id = %self.meeting_id,
                            "Meeting idle, stopping actor"
                        );
                        self.cancel_token.cancel();
                    }
                }
            }
        }

        self.services.metrics.meeting_stopped();
        info!(
            target: "cc.actor.meeting",
            meeting_id = %self.meeting_id,
            ended = self.ended,
            messages_processed = self.mailbox.messages_processed(),
            "MeetingActor stopped"
        );
    }

    async fn handle_message(&mut self, message: MeetingMessage) {
        match message {
            MeetingMessage::InitiateCall {
                host_id,
                participants,
                respond_to,
            } => {
                let result = self.handle_initiate(host_id, participants).await;
                let _ = respond_to.send(result);
            }

            MeetingMessage::RespondToInvitation {
                identity,
                outcome,
                respond_to,
            } => {
                let result = self.handle_respond(identity, outcome).await;
                let _ = respond_to.send(result);
            }

            MeetingMessage::CancelCall {
                host_id,
                respond_to,
            } => {
                let result = self.handle_cancel(&host_id).await;
                let _ = respond_to.send(result);
            }

            MeetingMessage::EndMeeting {
                host_id,
                respond_to,
            } => {
                let result = self.handle_end(&host_id).await;
                let _ = respond_to.send(result);
            }

            MeetingMessage::JoinMeeting {
                identity,
                rejoin,
                respond_to,
            } => {
                let result = self.handle_join(&identity, rejoin).await;
                let _ = respond_to.send(result);
            }

            MeetingMessage::LeaveMeeting {
                identity,
                respond_to,
            } => {
                let result = self.handle_leave(&identity).await;
                let _ = respond_to.send(result);
            }

            MeetingMessage::ParticipantDisconnected { identity } => {
                self.handle_disconnect(&identity).await;
            }

            MeetingMessage::InvitationTimeout { generation } => {
                self.handle_timeout(generation).await;
            }

            MeetingMessage::GetRtpCapabilities {
                identity,
                respond_to,
            } => {
                let result = self
                    .room_ref()
                    .map(|room| room.rtp_capabilities().clone());
                debug!(
                    target: "cc.actor.meeting",
                    meeting_id = %self.meeting_id,
                    identity = %identity,
                    ok = result.is_ok(),
                    "RTP capabilities requested"
                );
                let _ = respond_to.send(result);
            }

            MeetingMessage::CreateTransport {
                identity,
                direction,
                respond_to,
            } => {
                let result = self.handle_create_transport(&identity, direction).await;
                let _ = respond_to.send(result);
            }

            MeetingMessage::ConnectTransport {
                identity,
                transport_id,
                dtls_parameters,
                respond_to,
            } => {
                let result = self
                    .handle_connect_transport(&identity, &transport_id, &dtls_parameters)
                    .await;
                let _ = respond_to.send(result);
            }

            MeetingMessage::CreateProducer {
                identity,
                transport_id,
                kind,
                rtp_parameters,
                respond_to,
            } => {
                let result = self
                    .handle_create_producer(&identity, &transport_id, kind, &rtp_parameters)
                    .await;
                let _ = respond_to.send(result);
            }

            MeetingMessage::CreateConsumer {
                identity,
                transport_id,
                producer_id,
                rtp_capabilities,
                respond_to,
            } => {
                let result = self
                    .handle_create_consumer(&identity, &transport_id, &producer_id, &rtp_capabilities)
                    .await;
                let _ = respond_to.send(result);
            }

            MeetingMessage::ClientReady {
                identity,
                respond_to,
            } => {
                let result = self.handle_client_ready(&identity).await;
                let _ = respond_to.send(result);
            }

            MeetingMessage::GetState { respond_to } => {
                let _ = respond_to.send(self.get_state());
            }
        }
    }

    // ------------------------------------------------------------------
    // Invitation
    // ------------------------------------------------------------------

    #[instrument(skip_all, fields(meeting_id = %self.meeting_id, host_id = %host_id))]
    async fn handle_initiate(
        &mut self,
        host_id: UserId,
        participants: Vec<UserId>,
    ) -> Result<InvitationSummary, CallError> {
        let meeting = self.load_meeting().await?;
        require_host(&meeting, &host_id, "Only the host can start a call")?;
        if !meeting.is_active() {
            return Err(CallError::Conflict("Meeting has ended".to_string()));
        }
        if self.invitation.is_some() {
            return Err(CallError::Conflict(
                "An invitation is already outstanding".to_string(),
            ));
        }

        let participants = if participants.is_empty() {
            meeting.invited.clone()
        } else {
            participants
        };

        self.next_generation += 1;
        let window = self.services.invitation_window;
        let invitation = CallInvitation::new(
            self.meeting_id.clone(),
            host_id,
            participants,
            window,
            self.next_generation,
        )?;

        self.schedule_timeout(&invitation);

        let invite = ServerEvent::CallInvite {
            meeting_id: self.meeting_id.clone(),
            host_id: invitation.host_id().clone(),
            title: meeting.title.clone(),
        };
        let delivered = self
            .services
            .presence
            .notify_all(invitation.invited().iter(), &invite)
            .await;

        info!(
            target: "cc.actor.meeting",
            meeting_id = %self.meeting_id,
            invited = invitation.invited().len(),
            delivered = delivered,
            window_secs = window.as_secs(),
            generation = invitation.generation(),
            "Invitation started"
        );

        let summary = InvitationSummary {
            invited: invitation.invited().to_vec(),
            window,
        };
        self.invitation = Some(invitation);
        Ok(summary)
    }

    /// Spawn the timer task for `invitation`.
    fn schedule_timeout(&self, invitation: &CallInvitation) {
        let token = invitation.timer_token();
        let deadline = invitation.deadline();
        let generation = invitation.generation();
        let sender = self.self_sender.clone();
        let meeting_id = self.meeting_id.clone();

        tokio::spawn(async move {
            tokio::select! {
                () = token.cancelled() => {}
                () = tokio::time::sleep_until(deadline) => {
                    let Some(sender) = sender.upgrade() else {
                        return;
                    };
                    if sender
                        .send(MeetingMessage::InvitationTimeout { generation })
                        .await
                        .is_err()
                    {
                        debug!(
                            target: "cc.actor.meeting",
                            meeting_id = %meeting_id,
                            "Meeting actor gone before invitation timeout"
                        );
                    }
                }
            }
        });
    }

    #[instrument(skip_all, fields(meeting_id = %self.meeting_id, identity = %identity, outcome = outcome.as_str()))]
    async fn handle_respond(
        &mut self,
        identity: UserId,
        outcome: ResponseOutcome,
    ) -> Result<Option<Vec<UserId>>, CallError> {
        let recorded = self
            .invitation
            .as_mut()
            .map(|invitation| (invitation.record(&identity, outcome), invitation.host_id().clone()));

        match recorded {
            None => debug!(
                target: "cc.actor.meeting",
                meeting_id = %self.meeting_id,
                "No outstanding invitation, forwarding to membership"
            ),
            Some((RecordOutcome::NotInvited, _)) => debug!(
                target: "cc.actor.meeting",
                meeting_id = %self.meeting_id,
                "Responder was not invited"
            ),
            Some((RecordOutcome::AlreadyResponded(status), _)) => debug!(
                target: "cc.actor.meeting",
                meeting_id = %self.meeting_id,
                status = ?status,
                "Responder already has a terminal status"
            ),
            Some((RecordOutcome::Recorded { resolved }, host_id)) => {
                let update = ServerEvent::ParticipantStatusUpdate {
                    meeting_id: self.meeting_id.clone(),
                    identity: identity.clone(),
                    status: outcome.status(),
                    action: outcome.action(),
                };
                self.services.presence.notify(&host_id, update).await;

                if resolved {
                    if let Some(invitation) = self.invitation.take() {
                        invitation.cancel_timer();
                        self.services.metrics.invitation_resolved();
                        info!(
                            target: "cc.actor.meeting",
                            meeting_id = %self.meeting_id,
                            answered = invitation.any_answered(),
                            "Invitation resolved"
                        );
                    }
                }
            }
        }

        let meeting = self.load_meeting().await?;
        if identity != meeting.host_id {
            let event = match outcome {
                ResponseOutcome::Answered => ServerEvent::CallAccepted {
                    meeting_id: self.meeting_id.clone(),
                    identity: identity.clone(),
                },
                ResponseOutcome::Declined => ServerEvent::CallDeclined {
                    meeting_id: self.meeting_id.clone(),
                    identity: identity.clone(),
                },
            };
            self.services.presence.notify(&meeting.host_id, event).await;
        }

        match outcome {
            ResponseOutcome::Answered => self
                .join_member(&meeting, &identity, false)
                .await
                .map(Some),
            ResponseOutcome::Declined => {
                self.leave_member(&identity).await;
                Ok(None)
            }
        }
    }

    #[instrument(skip_all, fields(meeting_id = %self.meeting_id))]
    async fn handle_timeout(&mut self, generation: u64) {
        let current = self.invitation.as_ref().map(CallInvitation::generation);
        if current != Some(generation) {
            debug!(
                target: "cc.actor.meeting",
                meeting_id = %self.meeting_id,
                generation = generation,
                "Stale invitation timeout ignored"
            );
            return;
        }
        let Some(mut invitation) = self.invitation.take() else {
            return;
        };

        let timed_out = invitation.expire();
        let host_id = invitation.host_id().clone();

        for identity in &timed_out {
            let update = ServerEvent::ParticipantStatusUpdate {
                meeting_id: self.meeting_id.clone(),
                identity: identity.clone(),
                status: ResponseStatus::TimedOut,
                action: StatusAction::Timeout,
            };
            self.services.presence.notify(&host_id, update).await;
        }
        if !timed_out.is_empty() {
            let summary = ServerEvent::CallTimeout {
                meeting_id: self.meeting_id.clone(),
                participants: timed_out.clone(),
            };
            self.services.presence.notify(&host_id, summary).await;
            for identity in &timed_out {
                let event = ServerEvent::CallTimeout {
                    meeting_id: self.meeting_id.clone(),
                    participants: vec![identity.clone()],
                };
                self.services.presence.notify(identity, event).await;
            }
        }

        self.services.metrics.invitation_timed_out();
        info!(
            target: "cc.actor.meeting",
            meeting_id = %self.meeting_id,
            timed_out = timed_out.len(),
            answered = invitation.any_answered(),
            "Invitation timed out"
        );

        if let Err(e) = self.end_meeting("timeout").await {
            warn!(
                target: "cc.actor.meeting",
                meeting_id = %self.meeting_id,
                error = %e,
                "Failed to end meeting after invitation timeout"
            );
        }
    }

    #[instrument(skip_all, fields(meeting_id = %self.meeting_id))]
    async fn handle_cancel(&mut self, host_id: &UserId) -> Result<(), CallError> {
        let meeting = self.load_meeting().await?;
        require_host(&meeting, host_id, "Only the host can cancel the call")?;
        self.end_meeting("cancelled").await
    }

    #[instrument(skip_all, fields(meeting_id = %self.meeting_id))]
    async fn handle_end(&mut self, host_id: &UserId) -> Result<(), CallError> {
        let meeting = self.load_meeting().await?;
        require_host(&meeting, host_id, "Only the host can end the meeting")?;
        self.end_meeting("host_ended").await
    }

    /// Tear down the invitation and room, complete the record and stop the
    /// actor. Safe to call on an already-completed meeting.
    async fn end_meeting(&mut self, reason: &'static str) -> Result<(), CallError> {
        if let Some(invitation) = self.invitation.take() {
            invitation.cancel_timer();
            let ringing = invitation.ringing();
            let cancelled = ServerEvent::CallCancelled {
                meeting_id: self.meeting_id.clone(),
            };
            self.services
                .presence
                .notify_all(ringing.iter(), &cancelled)
                .await;
            self.services.metrics.invitation_cancelled();
            debug!(
                target: "cc.actor.meeting",
                meeting_id = %self.meeting_id,
                ringing = ringing.len(),
                "Invitation cancelled"
            );
        }

        let status = self
            .services
            .store
            .set_meeting_status(&self.meeting_id, MeetingStatus::Completed)
            .await;
        match &status {
            Ok(true) => {
                self.services.metrics.meeting_ended();
                info!(
                    target: "cc.actor.meeting",
                    meeting_id = %self.meeting_id,
                    reason = reason,
                    "Meeting ended"
                );
            }
            Ok(false) => debug!(
                target: "cc.actor.meeting",
                meeting_id = %self.meeting_id,
                "Meeting already completed"
            ),
            Err(e) => warn!(
                target: "cc.actor.meeting",
                meeting_id = %self.meeting_id,
                error = %e,
                "Failed to mark meeting completed"
            ),
        }

        self.teardown_room().await;
        self.ended = true;
        self.cancel_token.cancel();

        status.map(|_| ())
    }

    // ------------------------------------------------------------------
    // Membership
    // ------------------------------------------------------------------

    #[instrument(skip_all, fields(meeting_id = %self.meeting_id, identity = %identity))]
    async fn handle_join(
        &mut self,
        identity: &UserId,
        rejoin: bool,
    ) -> Result<Vec<UserId>, CallError> {
        let meeting = self.load_meeting().await?;
        self.join_member(&meeting, identity, rejoin).await
    }

    /// Add `identity` to the record and the room. Other members hear
    /// `participant:rejoined` when `rejoin` is set, otherwise
    /// `participant:joined` for a first join only.
    async fn join_member(
        &mut self,
        meeting: &MeetingRecord,
        identity: &UserId,
        rejoin: bool,
    ) -> Result<Vec<UserId>, CallError> {
        if !meeting.is_active() {
            return Err(CallError::Conflict("Meeting has ended".to_string()));
        }

        self.ensure_room().await?;
        self.services
            .store
            .add_participant(&self.meeting_id, identity, *identity == meeting.host_id)
            .await?;

        let room = self.room_mut()?;
        let kind = room.join(identity);
        let members = room.participant_ids();

        let announcement = if rejoin {
            Some(ServerEvent::ParticipantRejoined {
                meeting_id: self.meeting_id.clone(),
                identity: identity.clone(),
            })
        } else if kind == JoinKind::New {
            Some(ServerEvent::ParticipantJoined {
                meeting_id: self.meeting_id.clone(),
                identity: identity.clone(),
            })
        } else {
            None
        };
        if let Some(event) = announcement {
            self.notify_room_except(identity, &event).await;
        }

        info!(
            target: "cc.actor.meeting",
            meeting_id = %self.meeting_id,
            identity = %identity,
            session_kept = kind == JoinKind::Rejoined,
            rejoin = rejoin,
            members = members.len(),
            "Participant joined"
        );
        Ok(members)
    }

    #[instrument(skip_all, fields(meeting_id = %self.meeting_id, identity = %identity))]
    async fn handle_leave(&mut self, identity: &UserId) -> Result<(), CallError> {
        self.load_meeting().await?;
        self.leave_member(identity).await;
        Ok(())
    }

    async fn handle_disconnect(&mut self, identity: &UserId) {
        let in_room = self.room.as_ref().is_some_and(|room| room.contains(identity));
        if in_room {
            debug!(
                target: "cc.actor.meeting",
                meeting_id = %self.meeting_id,
                identity = %identity,
                "Participant disconnected, leaving room"
            );
            self.leave_member(identity).await;
        }
    }

    /// Record the leave and release the identity's media. Returns true if
    /// the identity had a media session.
    async fn leave_member(&mut self, identity: &UserId) -> bool {
        let engine = Arc::clone(&self.services.engine);
        let released = match self.room.as_mut() {
            Some(room) => room.leave(engine.as_ref(), identity).await,
            None => None,
        };

        match self
            .services
            .store
            .remove_participant(&self.meeting_id, identity)
            .await
        {
            Ok(_) => {}
            Err(e) => warn!(
                target: "cc.actor.meeting",
                meeting_id = %self.meeting_id,
                identity = %identity,
                error = %e,
                "Failed to record participant leave"
            ),
        }

        if released.is_some() {
            let left = ServerEvent::ParticipantLeft {
                meeting_id: self.meeting_id.clone(),
                identity: identity.clone(),
            };
            self.notify_room_except(identity, &left).await;
        }
        released.is_some()
    }

    // ------------------------------------------------------------------
    // Media
    // ------------------------------------------------------------------

    async fn ensure_room(&mut self) -> Result<(), CallError> {
        if self.room.is_none() {
            let room =
                MediaRoom::open(self.meeting_id.clone(), self.services.engine.as_ref()).await?;
            self.services.metrics.room_opened();
            self.room = Some(room);
        }
        Ok(())
    }

    async fn teardown_room(&mut self) {
        let Some(room) = self.room.take() else {
            return;
        };
        let members = room.participant_ids();

        let ended = ServerEvent::CallEnded {
            meeting_id: self.meeting_id.clone(),
        };
        self.services
            .presence
            .notify_all(members.iter(), &ended)
            .await;

        for identity in &members {
            if let Err(e) = self
                .services
                .store
                .remove_participant(&self.meeting_id, identity)
                .await
            {
                warn!(
                    target: "cc.actor.meeting",
                    meeting_id = %self.meeting_id,
                    identity = %identity,
                    error = %e,
                    "Failed to record participant leave during teardown"
                );
            }
        }

        room.destroy(self.services.engine.as_ref()).await;
        self.services.metrics.room_closed();
    }

    async fn handle_create_transport(
        &mut self,
        identity: &UserId,
        direction: TransportDirection,
    ) -> Result<TransportParams, CallError> {
        let engine = Arc::clone(&self.services.engine);
        self.room_mut()?
            .create_transport(engine.as_ref(), identity, direction)
            .await
    }

    async fn handle_connect_transport(
        &mut self,
        identity: &UserId,
        transport_id: &TransportId,
        dtls_parameters: &Value,
    ) -> Result<(), CallError> {
        let engine = Arc::clone(&self.services.engine);
        self.room_mut()?
            .connect_transport(engine.as_ref(), identity, transport_id, dtls_parameters)
            .await
    }

    async fn handle_create_producer(
        &mut self,
        identity: &UserId,
        transport_id: &TransportId,
        kind: MediaKind,
        rtp_parameters: &Value,
    ) -> Result<ProducerInfo, CallError> {
        let engine = Arc::clone(&self.services.engine);
        let producer = self
            .room_mut()?
            .create_producer(engine.as_ref(), identity, transport_id, kind, rtp_parameters)
            .await?;

        let announcement = producer_event(&self.meeting_id, &producer);
        self.notify_room_except(identity, &announcement).await;
        Ok(producer)
    }

    async fn handle_create_consumer(
        &mut self,
        identity: &UserId,
        transport_id: &TransportId,
        producer_id: &ProducerId,
        rtp_capabilities: &Value,
    ) -> Result<ConsumerInfo, CallError> {
        let engine = Arc::clone(&self.services.engine);
        self.room_mut()?
            .create_consumer(
                engine.as_ref(),
                identity,
                transport_id,
                producer_id,
                rtp_capabilities,
            )
            .await
    }

    async fn handle_client_ready(&mut self, identity: &UserId) -> Result<usize, CallError> {
        let room = self.room_ref()?;
        if !room.contains(identity) {
            return Err(CallError::NotFound(format!(
                "{identity} is not in the meeting"
            )));
        }
        let producers = room.producers_except(identity);

        let mut announced = 0;
        for producer in &producers {
            let event = producer_event(&self.meeting_id, producer);
            if self.services.presence.notify(identity, event).await {
                announced += 1;
            }
        }
        Ok(announced)
    }

    // ------------------------------------------------------------------
    // Helpers
    // ------------------------------------------------------------------

    async fn load_meeting(&self) -> Result<MeetingRecord, CallError> {
        self.services
            .store
            .get_meeting_by_id(&self.meeting_id)
            .await?
            .ok_or_else(|| CallError::NotFound(format!("Meeting {} not found", self.meeting_id)))
    }

    fn room_ref(&self) -> Result<&MediaRoom, CallError> {
        self.room
            .as_ref()
            .ok_or_else(|| CallError::NotFound("Media room not found".to_string()))
    }

    fn room_mut(&mut self) -> Result<&mut MediaRoom, CallError> {
        self.room
            .as_mut()
            .ok_or_else(|| CallError::NotFound("Media room not found".to_string()))
    }

    async fn notify_room_except(&self, except: &UserId, event: &ServerEvent) {
        let Some(room) = self.room.as_ref() else {
            return;
        };
        let targets: Vec<UserId> = room
            .participant_ids()
            .into_iter()
            .filter(|id| id != except)
            .collect();
        self.services
            .presence
            .notify_all(targets.iter(), event)
            .await;
    }

    fn refresh_idle(&mut self) {
        let idle =
            self.invitation.is_none() && self.room.as_ref().map_or(true, MediaRoom::is_empty);
        if !idle {
            self.idle_since = None;
        } else if self.idle_since.is_none() {
            self.idle_since = Some(Instant::now());
        }
    }

    fn idle_expired(&self) -> bool {
        self.idle_since
            .is_some_and(|since| since.elapsed() >= IDLE_GRACE_PERIOD)
            && self.receiver.is_empty()
    }

    fn get_state(&self) -> MeetingState {
        MeetingState {
            meeting_id: self.meeting_id.clone(),
            invitation: self.invitation.as_ref().map(CallInvitation::snapshot),
            room: self.room.as_ref().map(MediaRoom::snapshot),
            ended: self.ended,
        }
    }

    fn closed_error(&self) -> CallError {
        if self.ended {
            CallError::NotFound("Meeting has ended".to_string())
        } else {
            CallError::NotFound("Meeting is shutting down".to_string())
        }
    }

    /// Answer a message that arrived after the actor stopped.
    fn reject(&self, message: MeetingMessage) {
        let err = self.closed_error();
        match message {
            MeetingMessage::InitiateCall { respond_to, .. } => {
                let _ = respond_to.send(Err(err));
            }
            MeetingMessage::RespondToInvitation { respond_to, .. } => {
                let _ = respond_to.send(Err(err));
            }
            MeetingMessage::CancelCall { respond_to, .. }
            | MeetingMessage::EndMeeting { respond_to, .. }
            | MeetingMessage::LeaveMeeting { respond_to, .. }
            | MeetingMessage::ConnectTransport { respond_to, .. } => {
                let _ = respond_to.send(Err(err));
            }
            MeetingMessage::JoinMeeting { respond_to, .. } => {
                let _ = respond_to.send(Err(err));
            }
            MeetingMessage::GetRtpCapabilities { respond_to, .. } => {
                let _ = respond_to.send(Err(err));
            }
            MeetingMessage::CreateTransport { respond_to, .. } => {
                let _ = respond_to.send(Err(err));
            }
            MeetingMessage::CreateProducer { respond_to, .. } => {
                let _ = respond_to.send(Err(err));
            }
            MeetingMessage::CreateConsumer { respond_to, .. } => {
                let _ = respond_to.send(Err(err));
            }
            MeetingMessage::ClientReady { respond_to, .. } => {
                let _ = respond_to.send(Err(err));
            }
            MeetingMessage::GetState { respond_to } => {
                let _ = respond_to.send(self.get_state());
            }
            MeetingMessage::ParticipantDisconnected { .. }
            | MeetingMessage::InvitationTimeout { .. } => {}
        }
    }

    async fn graceful_shutdown(&mut self) {
        self.receiver.close();

        if let Some(invitation) = self.invitation.take() {
            invitation.cancel_timer();
        }
        if !self.ended {
            // Process shutdown: release engine resources without completing
            // the meeting record.
            if let Some(room) = self.room.take() {
                room.destroy(self.services.engine.as_ref()).await;
                self.services.metrics.room_closed();
            }
        }

        let mut rejected = 0usize;
        while let Ok(message) = self.receiver.try_recv() {
            self.reject(message);
            rejected += 1;
        }

        debug!(
            target: "cc.actor.meeting",
            meeting_id = %self.meeting_id,
            rejected = rejected,
            "Graceful shutdown complete"
        );
    }
}

fn require_host(meeting: &MeetingRecord, caller: &UserId, message: &str) -> Result<(), CallError> {
    if meeting.host_id == *caller {
        Ok(())
    } else {
        Err(CallError::Forbidden(message.to_string()))
    }
}

fn producer_event(meeting_id: &MeetingId, producer: &ProducerInfo) -> ServerEvent {
    ServerEvent::ProducerCreated {
        meeting_id: meeting_id.clone(),
        identity: producer.owner.clone(),
        kind: producer.kind,
        producer_id: producer.id.clone(),
        rtp_parameters: producer.rtp_parameters.clone(),
    }
}
