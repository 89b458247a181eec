//! Session store: durable meeting records.
//!
//! The store owns the meeting's status and its participant history; the
//! meeting actor is the only writer for an existing meeting. Failures map to
//! [`CallError::EngineFailure`].

mod memory;

pub use memory::InMemorySessionStore;

use crate::errors::CallError;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use common::types::{MeetingId, UserId};
use serde::{Deserialize, Serialize};

/// Meeting lifecycle status. The only transition is `Active` to `Completed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MeetingStatus {
    Active,
    Completed,
}

/// One attendance interval. A participant who rejoins after leaving gets a
/// new entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ParticipantRecord {
    pub identity: UserId,
    pub is_host: bool,
    pub joined_at: DateTime<Utc>,
    pub left_at: Option<DateTime<Utc>>,
}

impl ParticipantRecord {
    #[must_use]
    pub fn is_present(&self) -> bool {
        self.left_at.is_none()
    }

    /// Attendance length in seconds, once the participant has left.
    #[must_use]
    pub fn duration_seconds(&self) -> Option<i64> {
        self.left_at.map(|left| (left - self.joined_at).num_seconds())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MeetingRecord {
    pub meeting_id: MeetingId,
    pub host_id: UserId,
    pub title: Option<String>,
    /// Identities named when the meeting was created; used as the default
    /// invitation list.
    pub invited: Vec<UserId>,
    pub participants: Vec<ParticipantRecord>,
    pub status: MeetingStatus,
    pub start_time: DateTime<Utc>,
    pub end_time: Option<DateTime<Utc>>,
}

impl MeetingRecord {
    #[must_use]
    pub fn is_active(&self) -> bool {
        self.status == MeetingStatus::Active
    }

    /// Identities with an open attendance entry.
    #[must_use]
    pub fn present_participants(&self) -> Vec<&UserId> {
        self.participants
            .iter()
            .filter(|p| p.is_present())
            .map(|p| &p.identity)
            .collect()
    }
}

/// Parameters for creating a meeting.
#[derive(Debug, Clone)]
pub struct NewMeeting {
    /// Explicit id; generated when absent.
    pub meeting_id: Option<MeetingId>,
    pub host_id: UserId,
    pub title: Option<String>,
    pub invited: Vec<UserId>,
}

impl NewMeeting {
    #[must_use]
    pub fn hosted_by(host_id: impl Into<UserId>) -> Self {
        Self {
            meeting_id: None,
            host_id: host_id.into(),
            title: None,
            invited: Vec::new(),
        }
    }

    #[must_use]
    pub fn with_id(mut self, meeting_id: impl Into<MeetingId>) -> Self {
        self.meeting_id = Some(meeting_id.into());
        self
    }

    #[must_use]
    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = Some(title.into());
        self
    }

    #[must_use]
    pub fn with_invited(mut self, invited: Vec<UserId>) -> Self {
        self.invited = invited;
        self
    }
}

/// Durable meeting state.
#[async_trait]
pub trait SessionStore: Send + Sync {
    /// Create an active meeting. `Conflict` if the id is taken.
    async fn create_meeting(&self, meeting: NewMeeting) -> Result<MeetingRecord, CallError>;

    async fn get_meeting_by_id(
        &self,
        meeting_id: &MeetingId,
    ) -> Result<Option<MeetingRecord>, CallError>;

    /// Set the status. Returns true only when the status actually changed.
    /// `NotFound` for unknown meetings; `Conflict` for `Completed` to
    /// `Active`.
    async fn set_meeting_status(
        &self,
        meeting_id: &MeetingId,
        status: MeetingStatus,
    ) -> Result<bool, CallError>;

    /// Open an attendance entry unless one is already open.
    async fn add_participant(
        &self,
        meeting_id: &MeetingId,
        identity: &UserId,
        is_host: bool,
    ) -> Result<(), CallError>;

    /// Close the open attendance entry. Returns false if there was none.
    async fn remove_participant(
        &self,
        meeting_id: &MeetingId,
        identity: &UserId,
    ) -> Result<bool, CallError>;
}
