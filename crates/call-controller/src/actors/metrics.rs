//! Actor metrics and mailbox monitoring.
//!
//! | Actor Type | Normal | Warning | Critical |
//! |------------|--------|---------|----------|
//! | Controller | < 100  | 100-500 | > 500    |
//! | Meeting    | < 50   | 50-200  | > 200    |
//!
//! Counters here are in-process atomics that tests can read directly; the
//! Prometheus side is emitted through [`crate::observability::metrics`].

use crate::observability::metrics as prom;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use tracing::{debug, warn};

pub const CONTROLLER_MAILBOX_NORMAL: usize = 100;
pub const CONTROLLER_MAILBOX_WARNING: usize = 500;

pub const MEETING_MAILBOX_NORMAL: usize = 50;
pub const MEETING_MAILBOX_WARNING: usize = 200;

/// Actor type for metrics labeling.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActorType {
    /// `CallControllerActor` (singleton).
    Controller,
    /// `MeetingActor` (one per live meeting).
    Meeting,
}

impl ActorType {
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            ActorType::Controller => "controller",
            ActorType::Meeting => "meeting",
        }
    }

    #[must_use]
    pub const fn warning_threshold(&self) -> usize {
        match self {
            ActorType::Controller => CONTROLLER_MAILBOX_WARNING,
            ActorType::Meeting => MEETING_MAILBOX_WARNING,
        }
    }

    #[must_use]
    pub const fn normal_threshold(&self) -> usize {
        match self {
            ActorType::Controller => CONTROLLER_MAILBOX_NORMAL,
            ActorType::Meeting => MEETING_MAILBOX_NORMAL,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MailboxLevel {
    Normal,
    Warning,
    Critical,
}

/// Tracks queue depth for one actor.
#[derive(Debug)]
pub struct MailboxMonitor {
    actor_type: ActorType,
    actor_id: String,
    depth: AtomicUsize,
    peak_depth: AtomicUsize,
    messages_processed: AtomicU64,
}

impl MailboxMonitor {
    #[must_use]
    pub fn new(actor_type: ActorType, actor_id: impl Into<String>) -> Self {
        Self {
            actor_type,
            actor_id: actor_id.into(),
            depth: AtomicUsize::new(0),
            peak_depth: AtomicUsize::new(0),
            messages_processed: AtomicU64::new(0),
        }
    }

    /// A message was taken off the channel and is about to be handled.
    /// `queued` is the number of messages still waiting behind it.
    pub fn record_received(&self, queued: usize) {
        let depth = queued + 1;
        let previous = self.depth.swap(depth, Ordering::Relaxed);
        self.peak_depth.fetch_max(depth, Ordering::Relaxed);
        prom::set_actor_mailbox_depth(self.actor_type.as_str(), depth);

        match self.level_for_depth(depth) {
            MailboxLevel::Critical => warn!(
                target: "cc.actor.mailbox",
                actor_type = self.actor_type.as_str(),
                actor_id = %self.actor_id,
                depth = depth,
                threshold = self.actor_type.warning_threshold(),
                "Mailbox depth critical"
            ),
            MailboxLevel::Warning if previous <= self.actor_type.normal_threshold() => {
                debug!(
                    target: "cc.actor.mailbox",
                    actor_type = self.actor_type.as_str(),
                    actor_id = %self.actor_id,
                    depth = depth,
                    "Mailbox depth elevated"
                );
            }
            _ => {}
        }
    }

    /// The message taken by the last `record_received` was handled.
    pub fn record_handled(&self) {
        self.depth.fetch_sub(1, Ordering::Relaxed);
        self.messages_processed.fetch_add(1, Ordering::Relaxed);
    }

    #[must_use]
    pub fn current_depth(&self) -> usize {
        self.depth.load(Ordering::Relaxed)
    }

    #[must_use]
    pub fn peak_depth(&self) -> usize {
        self.peak_depth.load(Ordering::Relaxed)
    }

    #[must_use]
    pub fn messages_processed(&self) -> u64 {
        self.messages_processed.load(Ordering::Relaxed)
    }

    #[must_use]
    pub fn current_level(&self) -> MailboxLevel {
        self.level_for_depth(self.current_depth())
    }

    fn level_for_depth(&self, depth: usize) -> MailboxLevel {
        if depth > self.actor_type.warning_threshold() {
            MailboxLevel::Critical
        } else if depth > self.actor_type.normal_threshold() {
            MailboxLevel::Warning
        } else {
            MailboxLevel::Normal
        }
    }
}

/// Aggregated counters for the actor system, shared by every actor.
#[derive(Debug, Default)]
pub struct ActorMetrics {
    pub active_meetings: AtomicUsize,
    pub active_rooms: AtomicUsize,
    pub actor_panics: AtomicU64,
    pub total_messages_processed: AtomicU64,
    /// Invitations where every invitee answered or declined.
    pub invitations_resolved: AtomicU64,
    pub invitations_timed_out: AtomicU64,
    pub invitations_cancelled: AtomicU64,
    /// Meetings that transitioned to completed through this process.
    pub meetings_ended: AtomicU64,
}

impl ActorMetrics {
    #[must_use]
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn meeting_spawned(&self) {
        let count = self.active_meetings.fetch_add(1, Ordering::Relaxed) + 1;
        prom::set_meetings_active(count);
    }

    pub fn meeting_stopped(&self) {
        let previous = self.active_meetings.fetch_sub(1, Ordering::Relaxed);
        prom::set_meetings_active(previous.saturating_sub(1));
    }

    pub fn room_opened(&self) {
        self.active_rooms.fetch_add(1, Ordering::Relaxed);
    }

    pub fn room_closed(&self) {
        self.active_rooms.fetch_sub(1, Ordering::Relaxed);
    }

    pub fn record_panic(&self, actor_type: ActorType) {
        self.actor_panics.fetch_add(1, Ordering::Relaxed);
        prom::record_actor_panic(actor_type.as_str());
        tracing::error!(
            target: "cc.actor.panic",
            actor_type = actor_type.as_str(),
            total_panics = self.actor_panics.load(Ordering::Relaxed),
            "Actor panic detected - indicates bug, investigation required"
        );
    }

    pub fn record_message_processed(&self) {
        self.total_messages_processed
            .fetch_add(1, Ordering::Relaxed);
    }

    pub fn invitation_resolved(&self) {
        self.invitations_resolved.fetch_add(1, Ordering::Relaxed);
        prom::record_invitation_outcome("resolved");
    }

    pub fn invitation_timed_out(&self) {
        self.invitations_timed_out.fetch_add(1, Ordering::Relaxed);
        prom::record_invitation_outcome("timeout");
    }

    pub fn invitation_cancelled(&self) {
        self.invitations_cancelled.fetch_add(1, Ordering::Relaxed);
        prom::record_invitation_outcome("cancelled");
    }

    pub fn meeting_ended(&self) {
        self.meetings_ended.fetch_add(1, Ordering::Relaxed);
    }

    #[must_use]
    pub fn meeting_count(&self) -> usize {
        self.active_meetings.load(Ordering::Relaxed)
    }

    #[must_use]
    pub fn room_count(&self) -> usize {
        self.active_rooms.load(Ordering::Relaxed)
    }

    /// Invitations that left the ringing state by any path.
    #[must_use]
    pub fn invitations_finished(&self) -> u64 {
        self.invitations_resolved.load(Ordering::Relaxed)
            + self.invitations_timed_out.load(Ordering::Relaxed)
            + self.invitations_cancelled.load(Ordering::Relaxed)
    }
}
