//! Dispatch of decoded client events.
//!
//! One [`ClientSession`] per connection. Replies go back on the session's own
//! channel, so they queue in order with any notifications the meeting actor
//! pushed to the same connection. Every failure is turned into an `error`
//! event for the caller; nothing here tears the connection down.

use super::events::{ClientEvent, PresenceStatus, ServerEvent};
use crate::actors::CallControllerHandle;
use crate::errors::CallError;
use crate::invitation::ResponseOutcome;
use crate::observability::metrics;
use crate::presence::{ClientChannel, PresenceDirectory};
use common::types::UserId;
use std::time::Instant;
use tracing::{debug, instrument, warn};

/// Per-connection state.
#[derive(Debug)]
pub struct ClientSession {
    channel: ClientChannel,
    identity: Option<UserId>,
}

impl ClientSession {
    #[must_use]
    pub fn new(channel: ClientChannel) -> Self {
        Self {
            channel,
            identity: None,
        }
    }

    /// Identity bound by `register`, if any.
    #[must_use]
    pub fn identity(&self) -> Option<&UserId> {
        self.identity.as_ref()
    }

    #[must_use]
    pub fn channel(&self) -> &ClientChannel {
        &self.channel
    }
}

/// Routes client events to meeting actors.
#[derive(Clone)]
pub struct EventRouter {
    controller: CallControllerHandle,
    presence: PresenceDirectory,
}

impl EventRouter {
    #[must_use]
    pub fn new(controller: CallControllerHandle, presence: PresenceDirectory) -> Self {
        Self {
            controller,
            presence,
        }
    }

    /// Decode a text frame and dispatch it.
    pub async fn dispatch_text(&self, session: &mut ClientSession, text: &str) {
        match ClientEvent::from_json(text) {
            Ok(event) => self.dispatch(session, event).await,
            Err(e) => {
                debug!(target: "cc.signaling", error = %e, "Rejected malformed frame");
                session.channel.send(ServerEvent::error(&e));
            }
        }
    }

    /// Handle one event and queue its reply (or error) on the session.
    #[instrument(skip_all, name = "cc.signaling.dispatch", fields(event = event.name()))]
    pub async fn dispatch(&self, session: &mut ClientSession, event: ClientEvent) {
        let name = event.name();
        let meeting_id = event.meeting_id().cloned();
        let start = Instant::now();

        let result = self.handle(session, event).await;
        metrics::record_event_latency(name, result.is_ok(), start.elapsed());

        match result {
            Ok(Some(reply)) => {
                session.channel.send(reply);
            }
            Ok(None) => {}
            Err(e) => {
                if e.is_server_fault() {
                    warn!(
                        target: "cc.signaling",
                        event = name,
                        meeting_id = ?meeting_id.as_ref().map(|id| id.as_str()),
                        error = %e,
                        "Event failed"
                    );
                } else {
                    debug!(
                        target: "cc.signaling",
                        event = name,
                        meeting_id = ?meeting_id.as_ref().map(|id| id.as_str()),
                        code = e.error_code(),
                        "Event rejected"
                    );
                }
                session.channel.send(ServerEvent::error(&e));
            }
        }
    }

    async fn handle(
        &self,
        session: &mut ClientSession,
        event: ClientEvent,
    ) -> Result<Option<ServerEvent>, CallError> {
        match event {
            ClientEvent::Register { identity } => self.register(session, identity).await.map(Some),

            ClientEvent::CallInitiate {
                meeting_id,
                host_id,
                participants,
            } => {
                let meeting = self.controller.meeting(&meeting_id).await?;
                meeting.initiate_call(host_id, participants).await?;
                Ok(None)
            }

            ClientEvent::CallAccept {
                meeting_id,
                identity,
            } => {
                let meeting = self.controller.meeting(&meeting_id).await?;
                let members = meeting.respond(identity, ResponseOutcome::Answered).await?;
                Ok(members.map(|participants| ServerEvent::CallJoined {
                    meeting_id,
                    participants,
                }))
            }

            ClientEvent::CallDecline {
                meeting_id,
                identity,
            } => {
                let meeting = self.controller.meeting(&meeting_id).await?;
                meeting.respond(identity, ResponseOutcome::Declined).await?;
                Ok(None)
            }

            ClientEvent::CallCancel {
                meeting_id,
                host_id,
            } => {
                let meeting = self.controller.meeting(&meeting_id).await?;
                meeting.cancel_call(host_id).await?;
                Ok(None)
            }

            ClientEvent::CallJoin {
                meeting_id,
                identity,
            } => {
                let meeting = self.controller.meeting(&meeting_id).await?;
                let participants = meeting.join(identity).await?;
                Ok(Some(ServerEvent::CallJoined {
                    meeting_id,
                    participants,
                }))
            }

            ClientEvent::CallRejoin {
                meeting_id,
                identity,
            } => {
                let meeting = self.controller.meeting(&meeting_id).await?;
                let participants = meeting.rejoin(identity).await?;
                Ok(Some(ServerEvent::CallJoined {
                    meeting_id,
                    participants,
                }))
            }

            // Leaving or ending a completed meeting is a no-op.
            ClientEvent::CallLeave {
                meeting_id,
                identity,
            } => {
                if let Some(meeting) = self.controller.active_meeting(&meeting_id).await? {
                    meeting.leave(identity).await?;
                }
                Ok(None)
            }

            ClientEvent::CallEnd {
                meeting_id,
                host_id,
            } => {
                if let Some(meeting) = self.controller.active_meeting(&meeting_id).await? {
                    meeting.end_meeting(host_id).await?;
                }
                Ok(None)
            }

            ClientEvent::RouterCapabilities {
                meeting_id,
                identity,
            } => {
                let meeting = self.controller.meeting(&meeting_id).await?;
                let rtp_capabilities = meeting.rtp_capabilities(identity).await?;
                Ok(Some(ServerEvent::RouterCapabilities {
                    meeting_id,
                    rtp_capabilities,
                }))
            }

            ClientEvent::TransportCreate {
                meeting_id,
                identity,
                direction,
            } => {
                let meeting = self.controller.meeting(&meeting_id).await?;
                let params = meeting.create_transport(identity, direction).await?;
                Ok(Some(ServerEvent::TransportCreated {
                    meeting_id,
                    direction,
                    id: params.id,
                    ice_parameters: params.ice_parameters,
                    ice_candidates: params.ice_candidates,
                    dtls_parameters: params.dtls_parameters,
                }))
            }

            ClientEvent::TransportConnect {
                meeting_id,
                identity,
                transport_id,
                dtls_parameters,
            } => {
                let meeting = self.controller.meeting(&meeting_id).await?;
                meeting
                    .connect_transport(identity, transport_id.clone(), dtls_parameters)
                    .await?;
                Ok(Some(ServerEvent::TransportConnected {
                    meeting_id,
                    transport_id,
                }))
            }

            ClientEvent::ProducerCreate {
                meeting_id,
                identity,
                transport_id,
                kind,
                rtp_parameters,
            } => {
                let meeting = self.controller.meeting(&meeting_id).await?;
                let producer = meeting
                    .create_producer(identity, transport_id, kind, rtp_parameters)
                    .await?;
                Ok(Some(ServerEvent::ProducerCreated {
                    meeting_id,
                    identity: producer.owner,
                    kind: producer.kind,
                    producer_id: producer.id,
                    rtp_parameters: producer.rtp_parameters,
                }))
            }

            ClientEvent::ConsumerCreate {
                meeting_id,
                identity,
                transport_id,
                producer_id,
                rtp_capabilities,
            } => {
                let meeting = self.controller.meeting(&meeting_id).await?;
                let consumer = meeting
                    .create_consumer(identity, transport_id, producer_id, rtp_capabilities)
                    .await?;
                Ok(Some(ServerEvent::ConsumerCreated {
                    meeting_id,
                    consumer_id: consumer.id,
                    producer_id: consumer.producer_id,
                    producer_identity: consumer.producer_owner,
                    kind: consumer.kind,
                    rtp_parameters: consumer.rtp_parameters,
                }))
            }

            ClientEvent::ClientReady {
                meeting_id,
                identity,
            } => {
                let meeting = self.controller.meeting(&meeting_id).await?;
                let announced = meeting.client_ready(identity).await?;
                debug!(
                    target: "cc.signaling",
                    meeting_id = %meeting_id,
                    announced = announced,
                    "Existing producers announced"
                );
                Ok(None)
            }
        }
    }

    async fn register(
        &self,
        session: &mut ClientSession,
        identity: UserId,
    ) -> Result<ServerEvent, CallError> {
        if identity.as_str().trim().is_empty() {
            return Err(CallError::InvalidRequest(
                "identity must not be empty".to_string(),
            ));
        }

        // Re-registering under a new name releases the old one.
        if let Some(previous) = session.identity.take() {
            if previous != identity
                && self
                    .presence
                    .unregister(&previous, session.channel.connection_id())
                    .await
            {
                self.announce(&previous, PresenceStatus::Offline).await;
            }
        }

        let replaced = self
            .presence
            .register(identity.clone(), session.channel.clone())
            .await;
        session.identity = Some(identity.clone());

        if replaced.is_none() {
            self.announce(&identity, PresenceStatus::Online).await;
        }

        Ok(ServerEvent::Registered { identity })
    }

    /// Tell every other registered client that `identity` changed state.
    async fn announce(&self, identity: &UserId, status: PresenceStatus) {
        let event = ServerEvent::UserStatus {
            identity: identity.clone(),
            status,
        };
        let notified = self.presence.broadcast_except(identity, &event).await;
        debug!(
            target: "cc.signaling",
            identity = %identity,
            status = ?status,
            notified = notified,
            "User status broadcast"
        );
    }

    /// Connection closed. Releases the presence binding and, if this
    /// connection still owned it, announces the identity offline and removes
    /// it from every room.
    pub async fn disconnect(&self, session: ClientSession) {
        let Some(identity) = session.identity else {
            return;
        };

        let owned = self
            .presence
            .unregister(&identity, session.channel.connection_id())
            .await;
        if !owned {
            debug!(
                target: "cc.signaling",
                identity = %identity,
                "Connection superseded, keeping media sessions"
            );
            return;
        }

        self.announce(&identity, PresenceStatus::Offline).await;

        if let Err(e) = self.controller.participant_disconnected(identity).await {
            warn!(
                target: "cc.signaling",
                error = %e,
                "Failed to broadcast disconnect"
            );
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::actors::CallServices;
    use crate::config::MediaConfig;
    use crate::media::LocalMediaEngine;
    use crate::store::{InMemorySessionStore, NewMeeting, SessionStore};
    use common::types::MeetingId;
    use serde_json::json;
    use std::sync::Arc;
    use std::time::Duration;
    use tokio::sync::mpsc;

    struct Fixture {
        router: EventRouter,
        presence: PresenceDirectory,
    }

    async fn fixture() -> Fixture {
        let store = Arc::new(InMemorySessionStore::new());
        store
            .create_meeting(NewMeeting::hosted_by("host@example.com").with_id("meeting-1"))
            .await
            .unwrap();
        let presence = PresenceDirectory::new();
        let services = CallServices::new(
            store,
            Arc::new(LocalMediaEngine::new(MediaConfig::default())),
            presence.clone(),
            Duration::from_secs(40),
        );
        let controller = CallControllerHandle::new("cc-test".to_string(), services);
        Fixture {
            router: EventRouter::new(controller, presence.clone()),
            presence,
        }
    }

    fn session() -> (ClientSession, mpsc::Receiver<ServerEvent>) {
        let (channel, rx) = ClientChannel::new(32);
        (ClientSession::new(channel), rx)
    }

    #[tokio::test]
    async fn test_register_binds_identity() {
        let f = fixture().await;
        let (mut s, mut rx) = session();

        f.router
            .dispatch_text(
                &mut s,
                &json!({"event": "register", "data": {"identity": "a@example.com"}}).to_string(),
            )
            .await;

        assert_eq!(
            rx.try_recv().unwrap(),
            ServerEvent::Registered {
                identity: UserId::from("a@example.com")
            }
        );
        assert!(f.presence.is_online(&UserId::from("a@example.com")).await);
        assert_eq!(s.identity(), Some(&UserId::from("a@example.com")));
    }

    #[tokio::test]
    async fn test_malformed_frame_yields_error_event() {
        let f = fixture().await;
        let (mut s, mut rx) = session();

        f.router.dispatch_text(&mut s, "{not json").await;
        f.router
            .dispatch_text(&mut s, r#"{"event": "call:teleport", "data": {}}"#)
            .await;

        for _ in 0..2 {
            let event = rx.try_recv().unwrap();
            assert!(
                matches!(event, ServerEvent::Error { ref code, .. } if code == "INVALID_REQUEST"),
                "unexpected event {event:?}"
            );
        }
    }

    #[tokio::test]
    async fn test_unknown_meeting_yields_not_found() {
        let f = fixture().await;
        let (mut s, mut rx) = session();

        f.router
            .dispatch(
                &mut s,
                ClientEvent::CallJoin {
                    meeting_id: MeetingId::from("nope"),
                    identity: UserId::from("a@example.com"),
                },
            )
            .await;

        assert!(matches!(
            rx.try_recv().unwrap(),
            ServerEvent::Error { ref code, .. } if code == "NOT_FOUND"
        ));
    }

    #[tokio::test]
    async fn test_join_replies_with_members() {
        let f = fixture().await;
        let (mut s, mut rx) = session();

        f.router
            .dispatch(
                &mut s,
                ClientEvent::CallJoin {
                    meeting_id: MeetingId::from("meeting-1"),
                    identity: UserId::from("host@example.com"),
                },
            )
            .await;

        assert_eq!(
            rx.try_recv().unwrap(),
            ServerEvent::CallJoined {
                meeting_id: MeetingId::from("meeting-1"),
                participants: vec![UserId::from("host@example.com")],
            }
        );
    }

    #[tokio::test]
    async fn test_superseded_connection_disconnect_keeps_binding() {
        let f = fixture().await;
        let (mut old, _old_rx) = session();
        let (mut new, _new_rx) = session();
        let identity = UserId::from("a@example.com");

        f.router
            .dispatch(&mut old, ClientEvent::Register { identity: identity.clone() })
            .await;
        f.router
            .dispatch(&mut new, ClientEvent::Register { identity: identity.clone() })
            .await;

        f.router.disconnect(old).await;
        assert!(f.presence.is_online(&identity).await);

        f.router.disconnect(new).await;
        assert!(!f.presence.is_online(&identity).await);
    }

    fn register_event(who: &str) -> ClientEvent {
        ClientEvent::Register {
            identity: UserId::from(who),
        }
    }

    fn drain(rx: &mut mpsc::Receiver<ServerEvent>) -> Vec<ServerEvent> {
        let mut events = Vec::new();
        while let Ok(event) = rx.try_recv() {
            events.push(event);
        }
        events
    }

    #[tokio::test]
    async fn test_register_announces_online_to_others() {
        let f = fixture().await;
        let (mut a, mut a_rx) = session();
        let (mut b, mut b_rx) = session();

        f.router.dispatch(&mut a, register_event("a@example.com")).await;
        drain(&mut a_rx);
        f.router.dispatch(&mut b, register_event("b@example.com")).await;

        assert_eq!(
            drain(&mut a_rx),
            vec![ServerEvent::UserStatus {
                identity: UserId::from("b@example.com"),
                status: PresenceStatus::Online,
            }]
        );
        // The newcomer only gets its own reply
        assert_eq!(
            drain(&mut b_rx),
            vec![ServerEvent::Registered {
                identity: UserId::from("b@example.com")
            }]
        );
    }

    #[tokio::test]
    async fn test_owned_disconnect_announces_offline() {
        let f = fixture().await;
        let (mut a, mut a_rx) = session();
        let (mut b, _b_rx) = session();

        f.router.dispatch(&mut a, register_event("a@example.com")).await;
        f.router.dispatch(&mut b, register_event("b@example.com")).await;
        drain(&mut a_rx);

        f.router.disconnect(b).await;

        assert_eq!(
            drain(&mut a_rx),
            vec![ServerEvent::UserStatus {
                identity: UserId::from("b@example.com"),
                status: PresenceStatus::Offline,
            }]
        );
    }

    #[tokio::test]
    async fn test_superseded_disconnect_announces_nothing() {
        let f = fixture().await;
        let (mut watcher, mut watcher_rx) = session();
        let (mut old, _old_rx) = session();
        let (mut new, _new_rx) = session();

        f.router
            .dispatch(&mut watcher, register_event("w@example.com"))
            .await;
        f.router.dispatch(&mut old, register_event("a@example.com")).await;
        drain(&mut watcher_rx);

        // Taking over a live binding is not a new arrival
        f.router.dispatch(&mut new, register_event("a@example.com")).await;
        f.router.disconnect(old).await;
        assert!(drain(&mut watcher_rx).is_empty());

        f.router.disconnect(new).await;
        assert_eq!(
            drain(&mut watcher_rx),
            vec![ServerEvent::UserStatus {
                identity: UserId::from("a@example.com"),
                status: PresenceStatus::Offline,
            }]
        );
    }

    #[tokio::test]
    async fn test_rejoin_replies_with_members() {
        let f = fixture().await;
        let (mut host, mut host_rx) = session();
        let (mut alice, mut alice_rx) = session();
        let meeting_id = MeetingId::from("meeting-1");

        f.router.dispatch(&mut host, register_event("host@example.com")).await;
        f.router.dispatch(&mut alice, register_event("a@example.com")).await;
        for (s, who) in [(&mut host, "host@example.com"), (&mut alice, "a@example.com")] {
            f.router
                .dispatch(
                    s,
                    ClientEvent::CallJoin {
                        meeting_id: meeting_id.clone(),
                        identity: UserId::from(who),
                    },
                )
                .await;
        }
        drain(&mut host_rx);
        drain(&mut alice_rx);

        f.router
            .dispatch(
                &mut alice,
                ClientEvent::CallRejoin {
                    meeting_id: meeting_id.clone(),
                    identity: UserId::from("a@example.com"),
                },
            )
            .await;

        assert_eq!(
            drain(&mut alice_rx),
            vec![ServerEvent::CallJoined {
                meeting_id: meeting_id.clone(),
                participants: vec![UserId::from("a@example.com"), UserId::from("host@example.com")],
            }]
        );
        assert_eq!(
            drain(&mut host_rx),
            vec![ServerEvent::ParticipantRejoined {
                meeting_id,
                identity: UserId::from("a@example.com"),
            }]
        );
    }

    #[tokio::test]
    async fn test_end_of_completed_meeting_is_noop() {
        let f = fixture().await;
        let (mut host, mut host_rx) = session();
        let end = || ClientEvent::CallEnd {
            meeting_id: MeetingId::from("meeting-1"),
            host_id: UserId::from("host@example.com"),
        };

        f.router.dispatch(&mut host, end()).await;
        f.router.dispatch(&mut host, end()).await;
        assert!(drain(&mut host_rx).is_empty());

        f.router
            .dispatch(
                &mut host,
                ClientEvent::CallJoin {
                    meeting_id: MeetingId::from("meeting-1"),
                    identity: UserId::from("host@example.com"),
                },
            )
            .await;
        assert!(matches!(
            drain(&mut host_rx).as_slice(),
            [ServerEvent::Error { code, .. }] if code == "CONFLICT"
        ));
    }
}
