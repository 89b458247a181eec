//! `CallControllerActor` - singleton supervisor for meeting actors.
//!
//! - Spawns a `MeetingActor` the first time an event names an active meeting
//! - Respawns when the previous actor for that meeting has stopped (ended
//!   or idle)
//! - Fans connection-closed notices out to every live meeting
//! - Owns the root `CancellationToken` for graceful shutdown
//! - Detects meeting actor panics through their `JoinHandle`s
//!
//! Meeting actors never send to the controller, so a controller awaiting a
//! meeting's mailbox cannot deadlock.

use super::meeting::{MeetingActor, MeetingActorHandle};
use super::messages::{ControllerMessage, ControllerStatus};
use super::metrics::{ActorType, MailboxMonitor};
use super::CallServices;
use crate::errors::CallError;
use crate::store::SessionStore;

use common::types::{MeetingId, UserId};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

/// Default channel buffer size for the controller mailbox.
const CONTROLLER_CHANNEL_BUFFER: usize = 1000;

/// Default time to wait for meeting actors during shutdown.
const DEFAULT_SHUTDOWN_DEADLINE: Duration = Duration::from_secs(30);

/// How often stopped meeting actors are swept from the map.
const REAP_INTERVAL: Duration = Duration::from_secs(5);

/// Handle to the `CallControllerActor`.
#[derive(Clone)]
pub struct CallControllerHandle {
    sender: mpsc::Sender<ControllerMessage>,
    cancel_token: CancellationToken,
    store: Arc<dyn SessionStore>,
}

impl CallControllerHandle {
    /// Spawn the controller actor and return a handle to it.
    #[must_use]
    pub fn new(instance_id: String, services: CallServices) -> Self {
        let (sender, receiver) = mpsc::channel(CONTROLLER_CHANNEL_BUFFER);
        let cancel_token = CancellationToken::new();
        let store = Arc::clone(&services.store);

        let actor = CallControllerActor::new(instance_id, receiver, cancel_token.clone(), services);
        tokio::spawn(actor.run());

        Self {
            sender,
            cancel_token,
            store,
        }
    }

    /// Live actor for an active meeting, spawning one if needed.
    ///
    /// `NotFound` for unknown meetings and `Conflict` for completed ones, so
    /// the controller never spawns an actor for either.
    pub async fn meeting(&self, meeting_id: &MeetingId) -> Result<MeetingActorHandle, CallError> {
        self.active_meeting(meeting_id)
            .await?
            .ok_or_else(|| CallError::Conflict("Meeting has ended".to_string()))
    }

    /// Like [`meeting`](Self::meeting), but a completed meeting is `None`
    /// instead of an error.
    pub async fn active_meeting(
        &self,
        meeting_id: &MeetingId,
    ) -> Result<Option<MeetingActorHandle>, CallError> {
        let record = self
            .store
            .get_meeting_by_id(meeting_id)
            .await?
            .ok_or_else(|| CallError::NotFound(format!("Meeting {meeting_id} not found")))?;
        if !record.is_active() {
            return Ok(None);
        }

        let (tx, rx) = tokio::sync::oneshot::channel();
        self.sender
            .send(ControllerMessage::GetOrSpawnMeeting {
                meeting_id: meeting_id.clone(),
                respond_to: tx,
            })
            .await
            .map_err(|e| CallError::Internal(format!("channel send failed: {e}")))?;

        rx.await
            .map_err(|e| CallError::Internal(format!("response receive failed: {e}")))?
            .map(Some)
    }

    /// A client connection closed. Does not wait for the meetings to react.
    pub async fn participant_disconnected(&self, identity: UserId) -> Result<(), CallError> {
        self.sender
            .send(ControllerMessage::ParticipantDisconnected { identity })
            .await
            .map_err(|e| CallError::Internal(format!("channel send failed: {e}")))
    }

    pub async fn get_status(&self) -> Result<ControllerStatus, CallError> {
        let (tx, rx) = tokio::sync::oneshot::channel();
        self.sender
            .send(ControllerMessage::GetStatus { respond_to: tx })
            .await
            .map_err(|e| CallError::Internal(format!("channel send failed: {e}")))?;

        rx.await
            .map_err(|e| CallError::Internal(format!("response receive failed: {e}")))
    }

    /// Stop accepting work and cancel every meeting actor. Waits up to
    /// `deadline` per meeting for them to stop.
    pub async fn shutdown(&self, deadline: Duration) -> Result<(), CallError> {
        let (tx, rx) = tokio::sync::oneshot::channel();
        self.sender
            .send(ControllerMessage::Shutdown {
                deadline,
                respond_to: tx,
            })
            .await
            .map_err(|e| CallError::Internal(format!("channel send failed: {e}")))?;

        rx.await
            .map_err(|e| CallError::Internal(format!("response receive failed: {e}")))?
    }

    pub fn cancel(&self) {
        self.cancel_token.cancel();
    }

    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancel_token.is_cancelled()
    }
}

/// Internal state for a managed meeting.
struct ManagedMeeting {
    handle: MeetingActorHandle,
    task_handle: JoinHandle<()>,
    /// Spawn timestamp (unix seconds).
    created_at: i64,
}

/// The `CallControllerActor` implementation.
pub struct CallControllerActor {
    instance_id: String,
    receiver: mpsc::Receiver<ControllerMessage>,
    /// Root token; every meeting actor gets a child of it.
    cancel_token: CancellationToken,
    meetings: HashMap<MeetingId, ManagedMeeting>,
    accepting_new: bool,
    shutdown_deadline: Duration,
    services: CallServices,
    mailbox: MailboxMonitor,
}

impl CallControllerActor {
    fn new(
        instance_id: String,
        receiver: mpsc::Receiver<ControllerMessage>,
        cancel_token: CancellationToken,
        services: CallServices,
    ) -> Self {
        let mailbox = MailboxMonitor::new(ActorType::Controller, &instance_id);

        Self {
            instance_id,
            receiver,
            cancel_token,
            meetings: HashMap::new(),
            accepting_new: true,
            shutdown_deadline: DEFAULT_SHUTDOWN_DEADLINE,
            services,
            mailbox,
        }
    }

    #[instrument(skip_all, name = "cc.actor.controller", fields(instance_id = %self.instance_id))]
    async fn run(mut self) {
        info!(
            target: "cc.actor.controller",
            instance_id = %self.instance_id,
            "CallControllerActor started"
        );

        let mut reap_check = tokio::time::interval(REAP_INTERVAL);

        loop {
            self.reap_finished_meetings().await;

            tokio::select! {
                () = self.cancel_token.cancelled() => {
                    info!(
                        target: "cc.actor.controller",
                        instance_id = %self.instance_id,
                        "CallControllerActor received cancellation signal"
                    );
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
                        }
                        None => {
                            info!(
                                target: "cc.actor.controller",
                                instance_id = %self.instance_id,
                                "CallControllerActor channel closed, exiting"
                            );
                            self.graceful_shutdown().await;
                            break;
                        }
                    }
                }

                // Wakes the loop so actors that stopped on their own are reaped.
                _ = reap_check.tick() => {}
            }
        }

        info!(
            target: "cc.actor.controller",
            instance_id = %self.instance_id,
            meetings_remaining = self.meetings.len(),
            messages_processed = self.mailbox.messages_processed(),
            "CallControllerActor stopped"
        );
    }

    async fn handle_message(&mut self, message: ControllerMessage) {
        match message {
            ControllerMessage::GetOrSpawnMeeting {
                meeting_id,
                respond_to,
            } => {
                let result = self.get_or_spawn(meeting_id);
                let _ = respond_to.send(result);
            }

            ControllerMessage::ParticipantDisconnected { identity } => {
                self.broadcast_disconnect(&identity).await;
            }

            ControllerMessage::GetStatus { respond_to } => {
                let _ = respond_to.send(self.get_status());
            }

            ControllerMessage::Shutdown {
                deadline,
                respond_to,
            } => {
                let result = self.initiate_shutdown(deadline);
                let _ = respond_to.send(result);
            }
        }
    }

    fn get_or_spawn(&mut self, meeting_id: MeetingId) -> Result<MeetingActorHandle, CallError> {
        if !self.accepting_new {
            return Err(CallError::Internal(
                "Controller is shutting down".to_string(),
            ));
        }

        if let Some(managed) = self.meetings.get(&meeting_id) {
            if !managed.handle.is_cancelled() && !managed.task_handle.is_finished() {
                return Ok(managed.handle.clone());
            }
        }

        // The previous actor ended its meeting; let it finish in the background.
        if let Some(stale) = self.meetings.remove(&meeting_id) {
            self.retire(meeting_id.clone(), stale);
        }

        let (handle, task_handle) = MeetingActor::spawn(
            meeting_id.clone(),
            self.cancel_token.child_token(),
            self.services.clone(),
        );

        self.meetings.insert(
            meeting_id.clone(),
            ManagedMeeting {
                handle: handle.clone(),
                task_handle,
                created_at: chrono::Utc::now().timestamp(),
            },
        );

        debug!(
            target: "cc.actor.controller",
            instance_id = %self.instance_id,
            meeting_id = %meeting_id,
            total_meetings = self.meetings.len(),
            "Meeting actor spawned"
        );

        Ok(handle)
    }

    /// Wait for a replaced actor without blocking the message loop.
    fn retire(&self, meeting_id: MeetingId, managed: ManagedMeeting) {
        let metrics = Arc::clone(&self.services.metrics);
        let instance_id = self.instance_id.clone();
        let age_secs = chrono::Utc::now().timestamp() - managed.created_at;

        tokio::spawn(async move {
            match tokio::time::timeout(Duration::from_secs(5), managed.task_handle).await {
                Ok(Ok(())) => debug!(
                    target: "cc.actor.controller",
                    instance_id = %instance_id,
                    meeting_id = %meeting_id,
                    age_secs = age_secs,
                    "Meeting actor task completed cleanly"
                ),
                Ok(Err(e)) if e.is_panic() => {
                    metrics.record_panic(ActorType::Meeting);
                    metrics.meeting_stopped();
                }
                Ok(Err(e)) => warn!(
                    target: "cc.actor.controller",
                    instance_id = %instance_id,
                    meeting_id = %meeting_id,
                    error = ?e,
                    "Meeting actor task aborted"
                ),
                Err(_) => warn!(
                    target: "cc.actor.controller",
                    instance_id = %instance_id,
                    meeting_id = %meeting_id,
                    "Meeting actor task cleanup timed out"
                ),
            }
        });
    }

    async fn broadcast_disconnect(&self, identity: &UserId) {
        let mut notified = 0usize;
        for (meeting_id, managed) in &self.meetings {
            if managed.handle.is_cancelled() {
                continue;
            }
            match managed
                .handle
                .participant_disconnected(identity.clone())
                .await
            {
                Ok(()) => notified += 1,
                Err(e) => debug!(
                    target: "cc.actor.controller",
                    instance_id = %self.instance_id,
                    meeting_id = %meeting_id,
                    error = %e,
                    "Meeting actor gone before disconnect notice"
                ),
            }
        }

        debug!(
            target: "cc.actor.controller",
            instance_id = %self.instance_id,
            identity = %identity,
            meetings_notified = notified,
            "Participant disconnect broadcast"
        );
    }

    fn get_status(&self) -> ControllerStatus {
        let mut meetings: Vec<MeetingId> = self
            .meetings
            .iter()
            .filter(|(_, managed)| !managed.handle.is_cancelled())
            .map(|(id, _)| id.clone())
            .collect();
        meetings.sort();

        ControllerStatus {
            meeting_count: meetings.len(),
            meetings,
            is_shutting_down: !self.accepting_new,
        }
    }

    fn initiate_shutdown(&mut self, deadline: Duration) -> Result<(), CallError> {
        info!(
            target: "cc.actor.controller",
            instance_id = %self.instance_id,
            meeting_count = self.meetings.len(),
            "Initiating graceful shutdown"
        );

        self.accepting_new = false;
        self.shutdown_deadline = deadline;
        self.cancel_token.cancel();

        Ok(())
    }

    async fn graceful_shutdown(&mut self) {
        self.accepting_new = false;

        for managed in self.meetings.values() {
            managed.handle.cancel();
        }

        for (meeting_id, managed) in self.meetings.drain() {
            match tokio::time::timeout(self.shutdown_deadline, managed.task_handle).await {
                Ok(Ok(())) => debug!(
                    target: "cc.actor.controller",
                    instance_id = %self.instance_id,
                    meeting_id = %meeting_id,
                    "Meeting actor completed cleanly"
                ),
                Ok(Err(e)) => warn!(
                    target: "cc.actor.controller",
                    instance_id = %self.instance_id,
                    meeting_id = %meeting_id,
                    error = ?e,
                    "Meeting actor task panicked during shutdown"
                ),
                Err(_) => warn!(
                    target: "cc.actor.controller",
                    instance_id = %self.instance_id,
                    meeting_id = %meeting_id,
                    "Meeting actor shutdown timed out"
                ),
            }
        }

        info!(
            target: "cc.actor.controller",
            instance_id = %self.instance_id,
            "Graceful shutdown complete"
        );
    }

    /// Drop actors whose task has exited and flag panics.
    async fn reap_finished_meetings(&mut self) {
        let finished: Vec<MeetingId> = self
            .meetings
            .iter()
            .filter(|(_, managed)| managed.task_handle.is_finished())
            .map(|(id, _)| id.clone())
            .collect();

        for meeting_id in finished {
            let Some(managed) = self.meetings.remove(&meeting_id) else {
                continue;
            };
            match managed.task_handle.await {
                Ok(()) => debug!(
                    target: "cc.actor.controller",
                    instance_id = %self.instance_id,
                    meeting_id = %meeting_id,
                    "Meeting actor exited"
                ),
                Err(join_error) if join_error.is_panic() => {
                    error!(
                        target: "cc.actor.controller",
                        instance_id = %self.instance_id,
                        meeting_id = %meeting_id,
                        error = ?join_error,
                        "Meeting actor panicked"
                    );
                    self.services.metrics.record_panic(ActorType::Meeting);
                    // A panicked actor never reached its own stop accounting.
                    self.services.metrics.meeting_stopped();
                }
                Err(join_error) => warn!(
                    target: "cc.actor.controller",
                    instance_id = %self.instance_id,
                    meeting_id = %meeting_id,
                    error = ?join_error,
                    "Meeting actor task cancelled"
                ),
            }
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::actors::meeting::IDLE_GRACE_PERIOD;
    use crate::config::MediaConfig;
    use crate::media::LocalMediaEngine;
    use crate::presence::PresenceDirectory;
    use crate::store::{InMemorySessionStore, NewMeeting};

    async fn controller() -> (CallControllerHandle, CallServices) {
        let store = Arc::new(InMemorySessionStore::new());
        for id in ["meeting-a", "meeting-b"] {
            store
                .create_meeting(NewMeeting::hosted_by("host@example.com").with_id(id))
                .await
                .unwrap();
        }
        let services = CallServices::new(
            store,
            Arc::new(LocalMediaEngine::new(MediaConfig::default())),
            PresenceDirectory::new(),
            Duration::from_secs(40),
        );
        let handle = CallControllerHandle::new("cc-test".to_string(), services.clone());
        (handle, services)
    }

    #[tokio::test]
    async fn test_unknown_meeting_is_not_found() {
        let (handle, services) = controller().await;

        let result = handle.meeting(&MeetingId::from("missing")).await;
        assert!(matches!(result, Err(CallError::NotFound(_))));
        assert_eq!(services.metrics.meeting_count(), 0);

        handle.cancel();
    }

    #[tokio::test]
    async fn test_same_meeting_reuses_actor() {
        let (handle, services) = controller().await;
        let id = MeetingId::from("meeting-a");

        let first = handle.meeting(&id).await.unwrap();
        let second = handle.meeting(&id).await.unwrap();
        assert_eq!(first.meeting_id(), second.meeting_id());
        assert_eq!(services.metrics.meeting_count(), 1);

        handle.meeting(&MeetingId::from("meeting-b")).await.unwrap();
        let status = handle.get_status().await.unwrap();
        assert_eq!(status.meeting_count, 2);
        assert_eq!(
            status.meetings,
            vec![MeetingId::from("meeting-a"), MeetingId::from("meeting-b")]
        );

        handle.cancel();
    }

    #[tokio::test]
    async fn test_completed_meeting_gets_no_actor() {
        let (handle, services) = controller().await;
        let id = MeetingId::from("meeting-a");

        let first = handle.meeting(&id).await.unwrap();
        first
            .end_meeting(UserId::from("host@example.com"))
            .await
            .unwrap();
        assert!(first.is_cancelled());

        for _ in 0..3 {
            let result = handle.meeting(&id).await;
            assert!(matches!(result, Err(CallError::Conflict(_))));
            assert!(handle.active_meeting(&id).await.unwrap().is_none());
        }

        while services.metrics.meeting_count() > 0 {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        let status = handle.get_status().await.unwrap();
        assert_eq!(status.meeting_count, 0);
        assert!(status.meetings.is_empty());

        handle.cancel();
    }

    #[tokio::test(start_paused = true)]
    async fn test_respawns_after_idle_stop() {
        let (handle, services) = controller().await;
        let id = MeetingId::from("meeting-a");

        let first = handle.meeting(&id).await.unwrap();
        tokio::time::sleep(IDLE_GRACE_PERIOD + REAP_INTERVAL * 2).await;
        assert!(first.is_cancelled());
        assert_eq!(services.metrics.meeting_count(), 0);

        let second = handle.meeting(&id).await.unwrap();
        assert!(!second.is_cancelled());
        second.join(UserId::from("host@example.com")).await.unwrap();
        assert_eq!(services.metrics.meeting_count(), 1);

        handle.cancel();
    }

    #[tokio::test]
    async fn test_shutdown_stops_meetings() {
        let (handle, services) = controller().await;
        let meeting = handle.meeting(&MeetingId::from("meeting-a")).await.unwrap();

        handle.shutdown(Duration::from_secs(5)).await.unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;

        assert!(handle.is_cancelled());
        assert!(meeting.is_cancelled());
        assert_eq!(services.metrics.meeting_count(), 0);
    }
}
