//! Public protocol structs for the HTTP endpoints (serde ready), plus the
//! JSON error envelope every handler returns on failure.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::builder::{BuilderSession, Stage};
use crate::domain::{
    CommitTarget, ContentSource, CourseDraft, FlatAnswer, GenerationRequest, NewCollection, Question,
};
use crate::error::{BuilderError, ErrorKind, GenerationError, PipelineError, StoreError, ValidationError, Violation};
use crate::import::ImportRow;
use crate::persistence::CourseOutcome;
use crate::validation::{is_complete, Rejected};

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthOut {
    pub ok: bool,
    pub live_generation: bool,
}

/// Persisted question in the flat row layout (`options` / `correct_answer` /
/// `correct_answer_text` columns).
#[derive(Debug, Serialize)]
pub struct QuestionOut {
    pub id: Uuid,
    pub collection_id: Uuid,
    pub order_index: u32,
    pub question: String,
    #[serde(flatten)]
    pub answer: FlatAnswer,
    pub explanation: Option<String>,
    pub points: u32,
    pub tags: Vec<String>,
    pub is_published: bool,
}

pub fn question_out(q: &Question) -> QuestionOut {
    QuestionOut {
        id: q.id,
        collection_id: q.collection_id,
        order_index: q.order_index,
        question: q.body.prompt.clone(),
        answer: q.body.payload.to_flat(),
        explanation: q.body.explanation.clone(),
        points: q.body.points,
        tags: q.body.tags.iter().cloned().collect(),
        is_published: q.body.is_published,
    }
}

#[derive(Debug, Deserialize)]
pub struct ImportIn {
    pub target: CommitTarget,
    pub rows: Vec<ImportRow>,
}

/// Target of a CSV upload: an existing collection, or a title for a new one.
#[derive(Debug, Deserialize)]
pub struct CsvImportQuery {
    pub collection_id: Option<Uuid>,
    pub title: Option<String>,
}

impl CsvImportQuery {
    pub fn target(&self) -> Result<CommitTarget, ValidationError> {
        match (self.collection_id, self.title.as_deref().map(str::trim)) {
            (Some(collection_id), _) => Ok(CommitTarget::Existing { collection_id }),
            (None, Some(t)) if !t.is_empty() => Ok(CommitTarget::New { collection: NewCollection::quiz(t) }),
            _ => Err(ValidationError::single("collection_id", "either collection_id or title is required")),
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ImportOut {
    pub collection_id: Uuid,
    pub imported_count: usize,
    pub records: Vec<QuestionOut>,
    pub rejected: Vec<Rejected>,
    pub skipped: usize,
}

#[derive(Debug, Deserialize)]
pub struct GenerateQuizIn {
    pub request: GenerationRequest,
    /// Defaults to a new quiz named after the generated draft.
    #[serde(default)]
    pub target: Option<CommitTarget>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerateQuizOut {
    pub source: ContentSource,
    pub collection_id: Uuid,
    pub imported_count: usize,
    pub records: Vec<QuestionOut>,
    pub rejected: Vec<Rejected>,
}

#[derive(Debug, Deserialize)]
pub struct GenerateCourseIn {
    pub request: GenerationRequest,
    #[serde(default)]
    pub persist: bool,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerateCourseOut {
    pub source: ContentSource,
    pub course: CourseDraft,
    pub saved: Option<CourseOutcome>,
}

#[derive(Debug, Default, Deserialize)]
pub struct OpenSessionIn {
    #[serde(default)]
    pub target: Option<CommitTarget>,
}

#[derive(Debug, Default, Deserialize)]
pub struct GenerateIn {
    #[serde(default)]
    pub request: Option<GenerationRequest>,
}

/// Session as shown to the UI, with the per-question completeness flags.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionOut {
    #[serde(flatten)]
    pub session: BuilderSession,
    pub complete: Vec<bool>,
    pub can_retry: bool,
}

pub fn session_out(session: BuilderSession) -> SessionOut {
    let complete = session.buffer.iter().map(is_complete).collect();
    let can_retry = session.stage == Stage::Error && session.last_error.as_ref().is_some_and(|e| e.retryable);
    SessionOut { session, complete, can_retry }
}

// --- Errors ---

#[derive(Debug, Serialize)]
pub struct ErrorBody {
    pub kind: &'static str,
    pub message: String,
    pub retryable: bool,
    pub violations: Vec<Violation>,
}

#[derive(Debug, Serialize)]
pub struct ErrorEnvelope {
    pub error: ErrorBody,
}

/// Error returned by every handler; renders as `{ "error": { ... } }`.
#[derive(Debug)]
pub struct ApiError {
    pub status: StatusCode,
    pub body: ErrorBody,
}

impl ApiError {
    fn new(status: StatusCode, kind: &'static str, message: String, retryable: bool, violations: Vec<Violation>) -> Self {
        Self { status, body: ErrorBody { kind, message, retryable, violations } }
    }
}

fn kind_status(kind: ErrorKind) -> StatusCode {
    match kind {
        ErrorKind::Validation => StatusCode::BAD_REQUEST,
        ErrorKind::CollectionNotFound => StatusCode::NOT_FOUND,
        ErrorKind::GenerationTimeout => StatusCode::GATEWAY_TIMEOUT,
        ErrorKind::GenerationParse | ErrorKind::GenerationStructural | ErrorKind::GenerationConnectivity => {
            StatusCode::BAD_GATEWAY
        }
        ErrorKind::StoreWrite => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

fn is_conflict(e: &PipelineError) -> bool {
    match e {
        PipelineError::Store { source: StoreError::Conflict { .. }, .. } => true,
        PipelineError::Lesson { source, .. } => is_conflict(source),
        _ => false,
    }
}

impl From<PipelineError> for ApiError {
    fn from(e: PipelineError) -> Self {
        if let PipelineError::Generation(GenerationError::Cancelled) = e {
            return GenerationError::Cancelled.into();
        }
        let kind = e.kind();
        let status = if is_conflict(&e) { StatusCode::CONFLICT } else { kind_status(kind) };
        ApiError::new(status, kind.as_str(), e.to_string(), kind.is_retryable(), e.violations().to_vec())
    }
}

impl From<ValidationError> for ApiError {
    fn from(e: ValidationError) -> Self {
        PipelineError::from(e).into()
    }
}

impl From<GenerationError> for ApiError {
    fn from(e: GenerationError) -> Self {
        match e.kind() {
            Some(kind) => ApiError::new(kind_status(kind), kind.as_str(), e.to_string(), kind.is_retryable(), vec![]),
            None => ApiError::new(StatusCode::CONFLICT, "cancelled", e.to_string(), false, vec![]),
        }
    }
}

impl From<BuilderError> for ApiError {
    fn from(e: BuilderError) -> Self {
        let message = e.to_string();
        match e {
            BuilderError::Validation(v) => v.into(),
            BuilderError::UnknownSession(_) => ApiError::new(StatusCode::NOT_FOUND, "unknown_session", message, false, vec![]),
            BuilderError::InvalidTransition { .. } => {
                ApiError::new(StatusCode::CONFLICT, "invalid_transition", message, false, vec![])
            }
            BuilderError::QuestionIndex { .. } => {
                ApiError::new(StatusCode::UNPROCESSABLE_ENTITY, "question_index", message, false, vec![])
            }
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status, Json(ErrorEnvelope { error: self.body })).into_response()
    }
}
