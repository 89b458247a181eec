//! In-process session store.

use super::{MeetingRecord, MeetingStatus, NewMeeting, ParticipantRecord, SessionStore};
use crate::errors::CallError;
use async_trait::async_trait;
use chrono::Utc;
use common::types::{MeetingId, UserId};
use std::collections::HashMap;
use tokio::sync::RwLock;
use tracing::debug;

/// Meeting records held in memory for the life of the process.
#[derive(Debug, Default)]
pub struct InMemorySessionStore {
    meetings: RwLock<HashMap<MeetingId, MeetingRecord>>,
}

impl InMemorySessionStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn meeting_count(&self) -> usize {
        self.meetings.read().await.len()
    }
}

fn not_found(meeting_id: &MeetingId) -> CallError {
    CallError::NotFound(format!("Meeting {meeting_id} not found"))
}

#[async_trait]
impl SessionStore for InMemorySessionStore {
    async fn create_meeting(&self, meeting: NewMeeting) -> Result<MeetingRecord, CallError> {
        let meeting_id = meeting.meeting_id.unwrap_or_else(MeetingId::generate);

        let mut meetings = self.meetings.write().await;
        if meetings.contains_key(&meeting_id) {
            return Err(CallError::Conflict(format!(
                "Meeting {meeting_id} already exists"
            )));
        }

        let record = MeetingRecord {
            meeting_id: meeting_id.clone(),
            host_id: meeting.host_id,
            title: meeting.title,
            invited: meeting.invited,
            participants: Vec::new(),
            status: MeetingStatus::Active,
            start_time: Utc::now(),
            end_time: None,
        };
        meetings.insert(meeting_id, record.clone());
        Ok(record)
    }

    async fn get_meeting_by_id(
        &self,
        meeting_id: &MeetingId,
    ) -> Result<Option<MeetingRecord>, CallError> {
        Ok(self.meetings.read().await.get(meeting_id).cloned())
    }

    async fn set_meeting_status(
        &self,
        meeting_id: &MeetingId,
        status: MeetingStatus,
    ) -> Result<bool, CallError> {
        let mut meetings = self.meetings.write().await;
        let record = meetings
            .get_mut(meeting_id)
            .ok_or_else(|| not_found(meeting_id))?;

        match (record.status, status) {
            (current, requested) if current == requested => Ok(false),
            (MeetingStatus::Active, MeetingStatus::Completed) => {
                record.status = MeetingStatus::Completed;
                record.end_time = Some(Utc::now());
                debug!(target: "cc.store", meeting_id = %meeting_id, "Meeting completed");
                Ok(true)
            }
            _ => Err(CallError::Conflict("Meeting has ended".to_string())),
        }
    }

    async fn add_participant(
        &self,
        meeting_id: &MeetingId,
        identity: &UserId,
        is_host: bool,
    ) -> Result<(), CallError> {
        let mut meetings = self.meetings.write().await;
        let record = meetings
            .get_mut(meeting_id)
            .ok_or_else(|| not_found(meeting_id))?;

        let already_present = record
            .participants
            .iter()
            .any(|p| p.identity == *identity && p.is_present());
        if !already_present {
            record.participants.push(ParticipantRecord {
                identity: identity.clone(),
                is_host,
                joined_at: Utc::now(),
                left_at: None,
            });
        }
        Ok(())
    }

    async fn remove_participant(
        &self,
        meeting_id: &MeetingId,
        identity: &UserId,
    ) -> Result<bool, CallError> {
        let mut meetings = self.meetings.write().await;
        let record = meetings
            .get_mut(meeting_id)
            .ok_or_else(|| not_found(meeting_id))?;

        let open = record
            .participants
            .iter_mut()
            .find(|p| p.identity == *identity && p.is_present());
        match open {
            Some(entry) => {
                entry.left_at = Some(Utc::now());
                Ok(true)
            }
            None => Ok(false),
        }
    }
}
