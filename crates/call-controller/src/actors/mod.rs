//! Actor model for the Call Controller.
//!
//! ```text
//! CallControllerActor (singleton)
//! └── supervises N MeetingActors
//!     └── MeetingActor (one per live meeting)
//!         ├── owns the outstanding CallInvitation and its timer
//!         └── owns the MediaRoom
//! ```
//!
//! - **One writer per meeting**: invitation responses, timeouts, host actions
//!   and media requests for a meeting are handled in mailbox order
//! - **CancellationToken propagation**: the controller hands each meeting a
//!   child token; a meeting cancels its own token when it ends or idles out
//! - **No callbacks upward**: collaborators (store, engine, presence) never
//!   call back into an actor
//!
//! # Modules
//!
//! - [`controller`] - `CallControllerActor` that supervises meetings
//! - [`meeting`] - `MeetingActor` per live meeting
//! - [`messages`] - Message types for actor communication
//! - [`metrics`] - Mailbox monitoring and actor metrics

pub mod controller;
pub mod meeting;
pub mod messages;
pub mod metrics;

pub use controller::{CallControllerActor, CallControllerHandle};
pub use meeting::{MeetingActor, MeetingActorHandle};
pub use messages::*;
pub use metrics::{ActorMetrics, ActorType, MailboxMonitor};

use crate::media::MediaEngine;
use crate::presence::PresenceDirectory;
use crate::store::SessionStore;
use std::sync::Arc;
use std::time::Duration;

/// Collaborators shared by every actor.
#[derive(Clone)]
pub struct CallServices {
    pub store: Arc<dyn SessionStore>,
    pub engine: Arc<dyn MediaEngine>,
    pub presence: PresenceDirectory,
    pub metrics: Arc<ActorMetrics>,
    /// How long invitees ring before timing out.
    pub invitation_window: Duration,
}

impl CallServices {
    #[must_use]
    pub fn new(
        store: Arc<dyn SessionStore>,
        engine: Arc<dyn MediaEngine>,
        presence: PresenceDirectory,
        invitation_window: Duration,
    ) -> Self {
        Self {
            store,
            engine,
            presence,
            metrics: ActorMetrics::new(),
            invitation_window,
        }
    }
}
