//! Call invitation state machine.
//!
//! A [`CallInvitation`] tracks the per-invitee response status for one
//! meeting while it rings. It is plain data owned by the meeting actor; the
//! actor removes it from its slot (`Option::take`) when the invitation
//! resolves, times out or is cancelled, so at most one of those outcomes can
//! ever be observed.

use crate::errors::CallError;
use common::types::{MeetingId, UserId};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

/// Per-invitee response status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ResponseStatus {
    Ringing,
    Answered,
    Declined,
    TimedOut,
}

impl ResponseStatus {
    /// Terminal statuses never change again.
    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        !matches!(self, ResponseStatus::Ringing)
    }
}

/// Action that produced a status change, as reported to the host.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StatusAction {
    Accept,
    Decline,
    Timeout,
}

/// An invitee's answer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseOutcome {
    Answered,
    Declined,
}

impl ResponseOutcome {
    #[must_use]
    pub const fn status(&self) -> ResponseStatus {
        match self {
            ResponseOutcome::Answered => ResponseStatus::Answered,
            ResponseOutcome::Declined => ResponseStatus::Declined,
        }
    }

    #[must_use]
    pub const fn action(&self) -> StatusAction {
        match self {
            ResponseOutcome::Answered => StatusAction::Accept,
            ResponseOutcome::Declined => StatusAction::Decline,
        }
    }

    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            ResponseOutcome::Answered => "answered",
            ResponseOutcome::Declined => "declined",
        }
    }
}

/// Result of recording a response.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordOutcome {
    /// Identity was not invited; nothing changed.
    NotInvited,
    /// Identity already had a terminal status; nothing changed.
    AlreadyResponded(ResponseStatus),
    /// Status updated. `resolved` is true when every invitee is now terminal.
    Recorded { resolved: bool },
}

/// The ringing state of one meeting's invitation.
#[derive(Debug)]
pub struct CallInvitation {
    meeting_id: MeetingId,
    host_id: UserId,
    /// Invitees in invitation order.
    invited: Vec<UserId>,
    responses: HashMap<UserId, ResponseStatus>,
    deadline: Instant,
    generation: u64,
    timer: CancellationToken,
}

impl CallInvitation {
    /// Create an invitation for `participants`, excluding the host and
    /// duplicates. Fails with `InvalidRequest` if nobody is left to ring.
    pub fn new(
        meeting_id: MeetingId,
        host_id: UserId,
        participants: Vec<UserId>,
        window: Duration,
        generation: u64,
    ) -> Result<Self, CallError> {
        let mut invited: Vec<UserId> = Vec::with_capacity(participants.len());
        for participant in participants {
            if participant == host_id
                || participant.as_str().trim().is_empty()
                || invited.contains(&participant)
            {
                continue;
            }
            invited.push(participant);
        }

        if invited.is_empty() {
            return Err(CallError::InvalidRequest(
                "Invitation needs at least one participant other than the host".to_string(),
            ));
        }

        let responses = invited
            .iter()
            .map(|id| (id.clone(), ResponseStatus::Ringing))
            .collect();

        Ok(Self {
            meeting_id,
            host_id,
            invited,
            responses,
            deadline: Instant::now() + window,
            generation,
            timer: CancellationToken::new(),
        })
    }

    #[must_use]
    pub fn meeting_id(&self) -> &MeetingId {
        &self.meeting_id
    }

    #[must_use]
    pub fn host_id(&self) -> &UserId {
        &self.host_id
    }

    #[must_use]
    pub fn invited(&self) -> &[UserId] {
        &self.invited
    }

    #[must_use]
    pub fn deadline(&self) -> Instant {
        self.deadline
    }

    /// Generation stamped on the timeout message for this invitation.
    #[must_use]
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Token the timer task waits on; cancelled when the invitation ends.
    #[must_use]
    pub fn timer_token(&self) -> CancellationToken {
        self.timer.clone()
    }

    pub fn cancel_timer(&self) {
        self.timer.cancel();
    }

    #[must_use]
    pub fn status_of(&self, identity: &UserId) -> Option<ResponseStatus> {
        self.responses.get(identity).copied()
    }

    /// Record an answer. Terminal statuses are never overwritten.
    pub fn record(&mut self, identity: &UserId, outcome: ResponseOutcome) -> RecordOutcome {
        let Some(status) = self.responses.get_mut(identity) else {
            return RecordOutcome::NotInvited;
        };
        if status.is_terminal() {
            return RecordOutcome::AlreadyResponded(*status);
        }
        *status = outcome.status();
        RecordOutcome::Recorded {
            resolved: self.is_resolved(),
        }
    }

    /// True once every invitee has a terminal status.
    #[must_use]
    pub fn is_resolved(&self) -> bool {
        self.responses.values().all(ResponseStatus::is_terminal)
    }

    #[must_use]
    pub fn any_answered(&self) -> bool {
        self.responses
            .values()
            .any(|s| *s == ResponseStatus::Answered)
    }

    /// Invitees still ringing, in invitation order.
    #[must_use]
    pub fn ringing(&self) -> Vec<UserId> {
        self.invited
            .iter()
            .filter(|id| self.status_of(id) == Some(ResponseStatus::Ringing))
            .cloned()
            .collect()
    }

    /// Mark every ringing invitee as timed out and return them.
    pub fn expire(&mut self) -> Vec<UserId> {
        let expired = self.ringing();
        for identity in &expired {
            self.responses
                .insert(identity.clone(), ResponseStatus::TimedOut);
        }
        expired
    }

    /// Point-in-time view for state queries.
    #[must_use]
    pub fn snapshot(&self) -> InvitationSnapshot {
        InvitationSnapshot {
            host_id: self.host_id.clone(),
            responses: self
                .invited
                .iter()
                .filter_map(|id| self.status_of(id).map(|s| (id.clone(), s)))
                .collect(),
            remaining: self.deadline.saturating_duration_since(Instant::now()),
            generation: self.generation,
        }
    }
}

/// Snapshot of an outstanding invitation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InvitationSnapshot {
    pub host_id: UserId,
    pub responses: Vec<(UserId, ResponseStatus)>,
    pub remaining: Duration,
    pub generation: u64,
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    fn user(name: &str) -> UserId {
        UserId::from(name)
    }

    fn invitation(participants: &[&str]) -> CallInvitation {
        CallInvitation::new(
            MeetingId::from("meeting-1"),
            user("host@example.com"),
            participants.iter().map(|p| user(p)).collect(),
            Duration::from_secs(40),
            1,
        )
        .expect("invitation should be created")
    }

    #[tokio::test]
    async fn test_host_and_duplicates_are_excluded() {
        let inv = invitation(&[
            "a@example.com",
            "host@example.com",
            "b@example.com",
            "a@example.com",
        ]);
        assert_eq!(inv.invited(), &[user("a@example.com"), user("b@example.com")]);
        assert_eq!(
            inv.status_of(&user("a@example.com")),
            Some(ResponseStatus::Ringing)
        );
        assert_eq!(inv.status_of(&user("host@example.com")), None);
    }

    #[tokio::test]
    async fn test_empty_invitation_rejected() {
        let result = CallInvitation::new(
            MeetingId::from("meeting-1"),
            user("host@example.com"),
            vec![user("host@example.com")],
            Duration::from_secs(40),
            1,
        );
        assert!(matches!(result, Err(CallError::InvalidRequest(_))));
    }

    #[tokio::test]
    async fn test_resolves_when_all_terminal() {
        let mut inv = invitation(&["a@example.com", "b@example.com"]);

        assert_eq!(
            inv.record(&user("a@example.com"), ResponseOutcome::Answered),
            RecordOutcome::Recorded { resolved: false }
        );
        assert_eq!(
            inv.record(&user("b@example.com"), ResponseOutcome::Declined),
            RecordOutcome::Recorded { resolved: true }
        );
        assert!(inv.is_resolved());
        assert!(inv.any_answered());
        assert!(inv.ringing().is_empty());
    }

    #[tokio::test]
    async fn test_terminal_status_not_overwritten() {
        let mut inv = invitation(&["a@example.com", "b@example.com"]);
        inv.record(&user("a@example.com"), ResponseOutcome::Declined);

        assert_eq!(
            inv.record(&user("a@example.com"), ResponseOutcome::Answered),
            RecordOutcome::AlreadyResponded(ResponseStatus::Declined)
        );
        assert_eq!(
            inv.status_of(&user("a@example.com")),
            Some(ResponseStatus::Declined)
        );
    }

    #[tokio::test]
    async fn test_uninvited_response_ignored() {
        let mut inv = invitation(&["a@example.com"]);
        assert_eq!(
            inv.record(&user("stranger@example.com"), ResponseOutcome::Answered),
            RecordOutcome::NotInvited
        );
        assert!(!inv.is_resolved());
    }

    #[tokio::test]
    async fn test_expire_marks_only_ringing() {
        let mut inv = invitation(&["a@example.com", "b@example.com", "c@example.com"]);
        inv.record(&user("b@example.com"), ResponseOutcome::Answered);

        let expired = inv.expire();

        assert_eq!(expired, vec![user("a@example.com"), user("c@example.com")]);
        assert_eq!(
            inv.status_of(&user("a@example.com")),
            Some(ResponseStatus::TimedOut)
        );
        assert_eq!(
            inv.status_of(&user("b@example.com")),
            Some(ResponseStatus::Answered)
        );
        assert!(inv.is_resolved());
    }

    #[tokio::test(start_paused = true)]
    async fn test_snapshot_reports_remaining_window() {
        let inv = invitation(&["a@example.com"]);
        tokio::time::advance(Duration::from_secs(15)).await;

        let snapshot = inv.snapshot();
        assert_eq!(snapshot.remaining, Duration::from_secs(25));
        assert_eq!(snapshot.generation, 1);
        assert_eq!(snapshot.responses.len(), 1);
    }

    #[test]
    fn test_status_wire_format() {
        assert_eq!(
            serde_json::to_string(&ResponseStatus::TimedOut).unwrap(),
            "\"timedOut\""
        );
        assert_eq!(
            serde_json::to_string(&StatusAction::Decline).unwrap(),
            "\"decline\""
        );
    }

    #[tokio::test]
    async fn test_cancel_timer_cancels_token() {
        let inv = invitation(&["a@example.com"]);
        let token = inv.timer_token();
        assert!(!token.is_cancelled());
        inv.cancel_timer();
        assert!(token.is_cancelled());
    }
}
