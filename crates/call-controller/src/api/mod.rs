//! HTTP meeting API.
//!
//! - `POST /api/meetings` - create a meeting record
//! - `GET /api/meetings/:meeting_id` - fetch a meeting record
//!
//! Creating a meeting only writes the record; ringing the invitees is the
//! host's `call:initiate` over signaling.

use crate::errors::CallError;
use crate::store::{MeetingRecord, NewMeeting, SessionStore};
use axum::extract::{Path, State};
use axum::routing::{get, post};
use axum::{Json, Router};
use common::types::{MeetingId, UserId};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{info, instrument};

/// Shared state for the meeting API.
#[derive(Clone)]
pub struct ApiState {
    pub store: Arc<dyn SessionStore>,
}

/// Body of `POST /api/meetings`.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateMeetingRequest {
    pub host_id: UserId,
    pub participants: Vec<UserId>,
    #[serde(default)]
    pub title: Option<String>,
}

impl CreateMeetingRequest {
    fn validate(&self) -> Result<(), CallError> {
        if self.host_id.as_str().trim().is_empty() {
            return Err(CallError::InvalidRequest("hostId is required".to_string()));
        }
        if self.participants.is_empty() {
            return Err(CallError::InvalidRequest(
                "At least one participant is required".to_string(),
            ));
        }
        if self.participants.iter().any(|p| !p.as_str().contains('@')) {
            return Err(CallError::InvalidRequest(
                "All participants must be valid email addresses".to_string(),
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Serialize)]
pub struct MeetingResponse {
    pub meeting: MeetingRecord,
}

pub fn api_router(state: ApiState) -> Router {
    Router::new()
        .route("/api/meetings", post(create_meeting))
        .route("/api/meetings/:meeting_id", get(get_meeting))
        .with_state(state)
}

#[instrument(skip_all, fields(host_id = %request.host_id))]
async fn create_meeting(
    State(state): State<ApiState>,
    Json(request): Json<CreateMeetingRequest>,
) -> Result<Json<MeetingResponse>, CallError> {
    request.validate()?;

    let mut new_meeting = NewMeeting::hosted_by(request.host_id).with_invited(request.participants);
    if let Some(title) = request.title {
        new_meeting = new_meeting.with_title(title);
    }

    let meeting = state.store.create_meeting(new_meeting).await?;
    info!(
        target: "cc.api",
        meeting_id = %meeting.meeting_id,
        invited = meeting.invited.len(),
        "Meeting created"
    );

    Ok(Json(MeetingResponse { meeting }))
}

#[instrument(skip_all, fields(meeting_id = %meeting_id))]
async fn get_meeting(
    State(state): State<ApiState>,
    Path(meeting_id): Path<String>,
) -> Result<Json<MeetingResponse>, CallError> {
    let meeting_id = MeetingId::from(meeting_id);
    let meeting = state
        .store
        .get_meeting_by_id(&meeting_id)
        .await?
        .ok_or_else(|| CallError::NotFound("Meeting not found".to_string()))?;

    Ok(Json(MeetingResponse { meeting }))
}
