//! Scheduled post REST API controller.

use crate::extractors::ValidatedJson;
use crate::responses::{created, ok, ApiResponse, ApiResult, AppError};
use crate::state::AppState;
use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use chrono::{DateTime, Utc};
use herald_core::HeraldError;
use herald_jobs::{Job, JobId, JobState, PostPayload};
use serde::{Deserialize, Serialize};
use std::borrow::Cow;
use std::str::FromStr;
use validator::{Validate, ValidationError};

/// Create the posts router.
pub fn router() -> Router<AppState> {
    Router::new()
        .route("/schedule", post(schedule_post))
        .route("/scheduled", get(list_scheduled_posts))
        .route("/scheduled/:id", get(get_scheduled_post).delete(cancel_scheduled_post))
}

// ============================================================================
// Request/Response Types
// ============================================================================

/// Body of `POST /schedule`.
#[derive(Debug, Deserialize, Validate)]
pub struct SchedulePostRequest {
    /// Post text.
    #[validate(custom(function = "not_blank"))]
    pub message: String,
    /// Optional image reference.
    #[serde(default, alias = "imagePath")]
    pub image_path: Option<String>,
    /// Optional destination page.
    #[serde(default, alias = "targetPageId")]
    pub target_page_id: Option<String>,
    /// When to publish. Must be in the future.
    #[serde(alias = "scheduledTime")]
    pub scheduled_time: DateTime<Utc>,
}

/// Rejects empty and whitespace-only text.
fn not_blank(value: &str) -> Result<(), ValidationError> {
    if value.trim().is_empty() {
        return Err(ValidationError::new("not_blank").with_message(Cow::Borrowed("Message is required")));
    }
    Ok(())
}

impl SchedulePostRequest {
    fn into_payload(self) -> (PostPayload, DateTime<Utc>) {
        let payload = PostPayload {
            message: self.message,
            image_path: self.image_path.filter(|p| !p.is_empty()),
            target_page_id: self.target_page_id.filter(|p| !p.is_empty()),
        };
        (payload, self.scheduled_time)
    }
}

/// Response for a newly scheduled post.
#[derive(Debug, Serialize)]
pub struct SchedulePostResponse {
    pub job_id: JobId,
    pub scheduled_time: DateTime<Utc>,
    pub status: &'static str,
}

/// Query parameters for listing.
#[derive(Debug, Deserialize)]
pub struct ListParams {
    /// Comma-separated states, e.g. `waiting,failed_retryable`.
    pub state: Option<String>,
}

/// A scheduled post as seen by API clients.
#[derive(Debug, Serialize)]
pub struct ScheduledPostResponse {
    pub id: JobId,
    pub data: PostPayload,
    pub scheduled_time: DateTime<Utc>,
    pub status: JobState,
    pub attempts: u32,
    pub max_attempts: u32,
    pub last_error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<Job> for ScheduledPostResponse {
    fn from(job: Job) -> Self {
        Self {
            id: job.id,
            data: job.payload,
            scheduled_time: job.scheduled_at,
            status: job.state,
            attempts: job.attempts,
            max_attempts: job.max_attempts,
            last_error: job.last_error,
            created_at: job.created_at,
            updated_at: job.updated_at,
        }
    }
}

// ============================================================================
// Helper Functions
// ============================================================================

/// Parses `waiting,failed_retryable`; an absent or blank filter means pending.
fn parse_states(filter: Option<&str>) -> Result<Vec<JobState>, HeraldError> {
    let Some(filter) = filter.filter(|f| !f.trim().is_empty()) else {
        return Ok(JobState::PENDING.to_vec());
    };

    let mut states = Vec::new();
    for part in filter.split(',').filter(|p| !p.trim().is_empty()) {
        let state = JobState::from_str(part).map_err(|_| {
            HeraldError::validation(format!("Unknown state '{}'", part.trim()))
        })?;
        if !states.contains(&state) {
            states.push(state);
        }
    }
    Ok(states)
}

fn parse_id(id: &str) -> Result<JobId, HeraldError> {
    JobId::parse(id).map_err(|_| HeraldError::not_found("Job", id))
}

// ============================================================================
// Handler Functions
// ============================================================================

/// Schedule a post for later publication.
async fn schedule_post(
    State(state): State<AppState>,
    ValidatedJson(request): ValidatedJson<SchedulePostRequest>,
) -> Result<(StatusCode, Json<ApiResponse<SchedulePostResponse>>), AppError> {
    let (payload, scheduled_time) = request.into_payload();
    let job = state.scheduler.schedule(payload, scheduled_time).await?;

    Ok(created(SchedulePostResponse {
        job_id: job.id,
        scheduled_time: job.scheduled_at,
        status: "scheduled",
    }))
}

/// List scheduled posts, pending ones by default.
async fn list_scheduled_posts(
    State(state): State<AppState>,
    Query(params): Query<ListParams>,
) -> ApiResult<Vec<ScheduledPostResponse>> {
    let states = parse_states(params.state.as_deref())?;
    let jobs = state.scheduler.list(&states).await?;

    ok(jobs.into_iter().map(ScheduledPostResponse::from).collect())
}

/// Get one scheduled post.
async fn get_scheduled_post(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<ScheduledPostResponse> {
    let id = parse_id(&id)?;
    let job = state.scheduler.get(&id).await?;

    ok(job.into())
}

/// Cancel a post that has not started publishing.
async fn cancel_scheduled_post(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<ApiResponse<()>>, AppError> {
    let id = parse_id(&id)?;
    state.scheduler.cancel(&id).await?;

    Ok(Json(ApiResponse::message("Post cancelled")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_states_defaults_to_pending() {
        assert_eq!(parse_states(None).unwrap(), JobState::PENDING.to_vec());
        assert_eq!(parse_states(Some("  ")).unwrap(), JobState::PENDING.to_vec());
    }

    #[test]
    fn test_parse_states_list() {
        let states = parse_states(Some("dead, completed,dead")).unwrap();
        assert_eq!(states, vec![JobState::Dead, JobState::Completed]);
    }

    #[test]
    fn test_parse_states_rejects_unknown() {
        let err = parse_states(Some("waiting,delayed")).unwrap_err();
        assert_eq!(err.status_code(), 400);
        assert!(err.to_string().contains("delayed"));
    }

    #[test]
    fn test_blank_message_fails_validation() {
        for message in ["", "   ", "\n\t"] {
            let request = SchedulePostRequest {
                message: message.to_string(),
                image_path: None,
                target_page_id: None,
                scheduled_time: Utc::now(),
            };
            let errors = request.validate().unwrap_err();
            let fields = errors.field_errors();
            assert_eq!(fields["message"][0].code, "not_blank");
        }
    }

    #[test]
    fn test_request_accepts_camel_case() {
        let request: SchedulePostRequest = serde_json::from_str(
            r#"{"message": "hi", "imagePath": "", "scheduledTime": "2030-01-01T00:00:00Z"}"#,
        )
        .unwrap();
        let (payload, when) = request.into_payload();

        assert_eq!(payload.message, "hi");
        assert!(payload.image_path.is_none());
        assert_eq!(when.to_rfc3339(), "2030-01-01T00:00:00+00:00");
    }
}
