//! Test fixtures: identities, media parameter blobs and a wired-up harness.

use crate::recording_client::RecordingClient;
use call_controller::actors::{CallControllerHandle, CallServices};
use call_controller::config::MediaConfig;
use call_controller::media::{LocalMediaEngine, MediaEngine};
use call_controller::presence::PresenceDirectory;
use call_controller::signaling::{ClientEvent, EventRouter};
use call_controller::store::{InMemorySessionStore, NewMeeting, SessionStore};
use common::types::{MeetingId, UserId};
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;

pub const HOST: &str = "host@example.com";
pub const ALICE: &str = "alice@example.com";
pub const BOB: &str = "bob@example.com";
pub const CAROL: &str = "carol@example.com";

/// Default invitation window used by the harness.
pub const TEST_WINDOW: Duration = Duration::from_secs(40);

#[must_use]
pub fn user(identity: &str) -> UserId {
    UserId::from(identity)
}

#[must_use]
pub fn users(identities: &[&str]) -> Vec<UserId> {
    identities.iter().map(|id| UserId::from(*id)).collect()
}

/// Opus send parameters.
#[must_use]
pub fn opus_rtp_parameters() -> Value {
    json!({
        "codecs": [{ "mimeType": "audio/opus", "payloadType": 111, "clockRate": 48000, "channels": 2 }],
        "encodings": [{ "ssrc": 1111 }]
    })
}

/// VP8 send parameters.
#[must_use]
pub fn vp8_rtp_parameters() -> Value {
    json!({
        "codecs": [{ "mimeType": "video/VP8", "payloadType": 96, "clockRate": 90000 }],
        "encodings": [{ "ssrc": 2222 }]
    })
}

/// Receiver capabilities that can consume both default codecs.
#[must_use]
pub fn client_rtp_capabilities() -> Value {
    json!({
        "codecs": [
            { "kind": "audio", "mimeType": "audio/opus", "clockRate": 48000, "channels": 2 },
            { "kind": "video", "mimeType": "video/VP8", "clockRate": 90000 }
        ]
    })
}

#[must_use]
pub fn client_dtls_parameters() -> Value {
    json!({
        "role": "client",
        "fingerprints": [{ "algorithm": "sha-256", "value": "AB:CD" }]
    })
}

// ----------------------------------------------------------------------------
// Event builders
// ----------------------------------------------------------------------------

#[must_use]
pub fn initiate(meeting_id: &MeetingId, host: &str, participants: &[&str]) -> ClientEvent {
    ClientEvent::CallInitiate {
        meeting_id: meeting_id.clone(),
        host_id: user(host),
        participants: users(participants),
    }
}

#[must_use]
pub fn accept(meeting_id: &MeetingId, identity: &str) -> ClientEvent {
    ClientEvent::CallAccept {
        meeting_id: meeting_id.clone(),
        identity: user(identity),
    }
}

#[must_use]
pub fn decline(meeting_id: &MeetingId, identity: &str) -> ClientEvent {
    ClientEvent::CallDecline {
        meeting_id: meeting_id.clone(),
        identity: user(identity),
    }
}

#[must_use]
pub fn join(meeting_id: &MeetingId, identity: &str) -> ClientEvent {
    ClientEvent::CallJoin {
        meeting_id: meeting_id.clone(),
        identity: user(identity),
    }
}

// ----------------------------------------------------------------------------
// Harness
// ----------------------------------------------------------------------------

/// Controller, router and collaborators wired together in-process.
pub struct TestHarness {
    pub store: Arc<InMemorySessionStore>,
    pub presence: PresenceDirectory,
    pub services: CallServices,
    pub controller: CallControllerHandle,
    pub router: EventRouter,
}

impl TestHarness {
    #[must_use]
    pub fn builder() -> TestHarnessBuilder {
        TestHarnessBuilder::default()
    }

    /// Store a meeting hosted by `host` with `invited` as its invite list.
    pub async fn create_meeting(&self, host: &str, invited: &[&str]) -> MeetingId {
        self.store
            .create_meeting(NewMeeting::hosted_by(host).with_invited(users(invited)))
            .await
            .expect("create meeting")
            .meeting_id
    }

    /// Connect and register a recording client.
    pub async fn connect(&self, identity: &str) -> RecordingClient {
        RecordingClient::connect(&self.router, identity).await
    }
}

#[derive(Default)]
pub struct TestHarnessBuilder {
    engine: Option<Arc<dyn MediaEngine>>,
    window: Option<Duration>,
}

impl TestHarnessBuilder {
    /// Use `engine` instead of a fresh `LocalMediaEngine`.
    #[must_use]
    pub fn engine(mut self, engine: Arc<dyn MediaEngine>) -> Self {
        self.engine = Some(engine);
        self
    }

    #[must_use]
    pub fn window(mut self, window: Duration) -> Self {
        self.window = Some(window);
        self
    }

    pub async fn build(self) -> TestHarness {
        let store = Arc::new(InMemorySessionStore::new());
        let presence = PresenceDirectory::new();
        let engine = self
            .engine
            .unwrap_or_else(|| Arc::new(LocalMediaEngine::new(MediaConfig::default())));

        let services = CallServices::new(
            Arc::clone(&store) as Arc<dyn SessionStore>,
            engine,
            presence.clone(),
            self.window.unwrap_or(TEST_WINDOW),
        );
        let controller = CallControllerHandle::new("cc-test".to_string(), services.clone());
        let router = EventRouter::new(controller.clone(), presence.clone());

        TestHarness {
            store,
            presence,
            services,
            controller,
            router,
        }
    }
}
