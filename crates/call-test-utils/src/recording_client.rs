//! Signaling client that records every event it receives.
//!
//! A `RecordingClient` owns a real [`ClientSession`] and its outbound queue,
//! so replies and notifications arrive in exactly the order a WebSocket
//! connection would see them.
//!
//! `user:status` broadcasts reach every client whenever anyone connects, so
//! they are set aside and read separately with
//! [`RecordingClient::drain_presence`].

use call_controller::presence::ClientChannel;
use call_controller::signaling::{ClientEvent, ClientSession, EventRouter, ServerEvent};
use common::types::UserId;
use std::collections::VecDeque;
use std::time::Duration;
use tokio::sync::mpsc;

/// Default outbound queue size for recording clients.
const CLIENT_BUFFER: usize = 256;

/// How long `next_event` waits before failing the test.
const EVENT_TIMEOUT: Duration = Duration::from_secs(5);

pub struct RecordingClient {
    identity: UserId,
    session: ClientSession,
    events: mpsc::Receiver<ServerEvent>,
    /// Events read while looking for presence, not yet handed out.
    pending: VecDeque<ServerEvent>,
    presence: Vec<ServerEvent>,
}

impl RecordingClient {
    /// Open a session and register `identity` through the router.
    pub async fn connect(router: &EventRouter, identity: &str) -> Self {
        let identity = UserId::from(identity);
        let (channel, events) = ClientChannel::new(CLIENT_BUFFER);
        let mut client = Self {
            identity: identity.clone(),
            session: ClientSession::new(channel),
            events,
            pending: VecDeque::new(),
            presence: Vec::new(),
        };

        client
            .send(router, ClientEvent::Register { identity })
            .await;
        match client.next_event().await {
            ServerEvent::Registered { .. } => {}
            other => panic!("expected registered, got {other:?}"),
        }
        client
    }

    #[must_use]
    pub fn identity(&self) -> &UserId {
        &self.identity
    }

    /// Dispatch an event as this client.
    pub async fn send(&mut self, router: &EventRouter, event: ClientEvent) {
        router.dispatch(&mut self.session, event).await;
    }

    /// Next non-presence event, failing the test if none arrives in time.
    pub async fn next_event(&mut self) -> ServerEvent {
        if let Some(event) = self.pending.pop_front() {
            return event;
        }
        let deadline = tokio::time::Instant::now() + EVENT_TIMEOUT;
        loop {
            let event = tokio::time::timeout_at(deadline, self.events.recv())
                .await
                .unwrap_or_else(|_| panic!("{} received no event in time", self.identity))
                .unwrap_or_else(|| panic!("{} event channel closed", self.identity));
            if let Some(event) = self.set_aside_presence(event) {
                return event;
            }
        }
    }

    /// Everything queued right now, minus `user:status` events.
    pub fn drain(&mut self) -> Vec<ServerEvent> {
        self.pull_queued();
        self.pending.drain(..).collect()
    }

    /// `user:status` events received so far. Other events stay queued.
    pub fn drain_presence(&mut self) -> Vec<ServerEvent> {
        self.pull_queued();
        std::mem::take(&mut self.presence)
    }

    fn pull_queued(&mut self) {
        while let Ok(event) = self.events.try_recv() {
            if let Some(event) = self.set_aside_presence(event) {
                self.pending.push_back(event);
            }
        }
    }

    fn set_aside_presence(&mut self, event: ServerEvent) -> Option<ServerEvent> {
        if matches!(event, ServerEvent::UserStatus { .. }) {
            self.presence.push(event);
            None
        } else {
            Some(event)
        }
    }

    /// Wire names of everything queued right now.
    pub fn drain_names(&mut self) -> Vec<&'static str> {
        self.drain().iter().map(ServerEvent::name).collect()
    }

    /// Drain and panic if any queued event is an `error`.
    pub fn assert_no_errors(&mut self) -> Vec<ServerEvent> {
        let events = self.drain();
        if let Some(err) = events
            .iter()
            .find(|e| matches!(e, ServerEvent::Error { .. }))
        {
            panic!("{} got error event {err:?}", self.identity);
        }
        events
    }

    /// Close the connection the way the WebSocket server does.
    pub async fn disconnect(self, router: &EventRouter) {
        router.disconnect(self.session).await;
    }
}
