//! Test server harness for E2E testing
//!
//! Provides `TestCallServer` for spawning a real Call Controller on a random
//! local port, wired exactly like the binary.

use call_controller::actors::{CallControllerHandle, CallServices};
use call_controller::api::ApiState;
use call_controller::config::Config;
use call_controller::media::LocalMediaEngine;
use call_controller::observability::HealthState;
use call_controller::presence::PresenceDirectory;
use call_controller::routes::{self, AppState};
use call_controller::signaling::{EventRouter, SignalingState};
use call_controller::store::{InMemorySessionStore, NewMeeting, SessionStore};
use common::types::{MeetingId, UserId};
use metrics_exporter_prometheus::PrometheusBuilder;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::task::JoinHandle;

/// Test harness for spawning the Call Controller in E2E tests.
///
/// # Example
/// ```rust,ignore
/// #[tokio::test]
/// async fn test_health() -> Result<(), anyhow::Error> {
///     let server = TestCallServer::spawn().await?;
///     let response = reqwest::get(format!("{}/health", server.url())).await?;
///     assert_eq!(response.status(), 200);
///     Ok(())
/// }
/// ```
pub struct TestCallServer {
    addr: SocketAddr,
    config: Config,
    store: Arc<InMemorySessionStore>,
    controller: CallControllerHandle,
    _handle: JoinHandle<()>,
}

impl TestCallServer {
    /// Spawn with default test settings.
    pub async fn spawn() -> Result<Self, anyhow::Error> {
        Self::spawn_with_vars(HashMap::new()).await
    }

    /// Spawn with extra `CC_*` variables layered over the test defaults.
    pub async fn spawn_with_vars(overrides: HashMap<String, String>) -> Result<Self, anyhow::Error> {
        let mut vars = HashMap::from([
            ("CC_BIND_ADDRESS".to_string(), "127.0.0.1:0".to_string()),
            ("CC_INSTANCE_ID".to_string(), "cc-e2e".to_string()),
        ]);
        vars.extend(overrides);

        let config = Config::from_vars(&vars)
            .map_err(|e| anyhow::anyhow!("Failed to create config: {}", e))?;

        let store = Arc::new(InMemorySessionStore::new());
        let presence = PresenceDirectory::new();
        let services = CallServices::new(
            Arc::clone(&store) as Arc<dyn SessionStore>,
            Arc::new(LocalMediaEngine::new(config.media.clone())),
            presence.clone(),
            config.invitation_window,
        );
        let controller = CallControllerHandle::new(config.instance_id.clone(), services);

        let health = Arc::new(HealthState::new(config.instance_id.clone()));
        health.set_ready();

        let app = routes::build_routes(
            AppState {
                signaling: SignalingState {
                    router: EventRouter::new(controller.clone(), presence),
                    client_channel_buffer: config.client_channel_buffer,
                },
                api: ApiState {
                    store: Arc::clone(&store) as Arc<dyn SessionStore>,
                },
                health,
            },
            PrometheusBuilder::new().build_recorder().handle(),
        );

        let listener = tokio::net::TcpListener::bind(&config.bind_address)
            .await
            .map_err(|e| anyhow::anyhow!("Failed to bind test server: {}", e))?;

        let addr = listener
            .local_addr()
            .map_err(|e| anyhow::anyhow!("Failed to get local address: {}", e))?;

        let handle = tokio::spawn(async move {
            if let Err(e) = axum::serve(listener, app).await {
                eprintln!("Test server error: {}", e);
            }
        });

        Ok(Self {
            addr,
            config,
            store,
            controller,
            _handle: handle,
        })
    }

    /// Base URL for HTTP requests.
    pub fn url(&self) -> String {
        format!("http://{}", self.addr)
    }

    /// URL of the signaling socket.
    pub fn ws_url(&self) -> String {
        format!("ws://{}/ws", self.addr)
    }

    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn store(&self) -> &Arc<InMemorySessionStore> {
        &self.store
    }

    pub fn controller(&self) -> &CallControllerHandle {
        &self.controller
    }

    /// Store a meeting directly, bypassing the HTTP API.
    pub async fn create_meeting(
        &self,
        host: &str,
        invited: &[&str],
    ) -> Result<MeetingId, anyhow::Error> {
        let invited = invited.iter().map(|id| UserId::from(*id)).collect();
        let record = self
            .store
            .create_meeting(NewMeeting::hosted_by(host).with_invited(invited))
            .await?;
        Ok(record.meeting_id)
    }
}

impl Drop for TestCallServer {
    fn drop(&mut self) {
        self.controller.cancel();
        self._handle.abort();
    }
}
