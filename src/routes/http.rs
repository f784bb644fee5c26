//! HTTP endpoint handlers. These are thin wrappers that forward to core logic.
//! Each handler is instrumented; failures render through `ApiError`.

use std::sync::Arc;
use axum::{extract::{Path, Query, State}, http::StatusCode, Json};
use tracing::{info, instrument};
use uuid::Uuid;

use crate::domain::{CandidateQuestion, Collection, GeneratedContent, GenerationRequest};
use crate::import::parse_csv;
use crate::logic::*;
use crate::protocol::*;
use crate::state::AppState;

type ApiResult<T> = Result<Json<T>, ApiError>;

fn import_out(report: ImportReport) -> ImportOut {
  ImportOut {
    collection_id: report.outcome.collection_id,
    imported_count: report.outcome.imported_count,
    records: report.outcome.records.iter().map(question_out).collect(),
    rejected: report.rejected,
    skipped: report.skipped,
  }
}

#[instrument(level = "info", skip(state))]
pub async fn http_health(State(state): State<Arc<AppState>>) -> Json<HealthOut> {
  Json(HealthOut { ok: true, live_generation: state.adapter.is_live() })
}

#[instrument(level = "info", skip(state, body), fields(rows = body.rows.len()))]
pub async fn http_post_import(
  State(state): State<Arc<AppState>>,
  Json(body): Json<ImportIn>,
) -> ApiResult<ImportOut> {
  let report = run_import(&state, body.target, &body.rows).await?;
  info!(target: "pipeline", collection_id = %report.outcome.collection_id, imported = report.outcome.imported_count, "HTTP import committed");
  Ok(Json(import_out(report)))
}

#[instrument(level = "info", skip(state, body), fields(bytes = body.len()))]
pub async fn http_post_import_csv(
  State(state): State<Arc<AppState>>,
  Query(q): Query<CsvImportQuery>,
  body: String,
) -> ApiResult<ImportOut> {
  let target = q.target()?;
  let rows = parse_csv(&body)?;
  let report = run_import(&state, target, &rows).await?;
  info!(target: "pipeline", collection_id = %report.outcome.collection_id, imported = report.outcome.imported_count, "HTTP CSV import committed");
  Ok(Json(import_out(report)))
}

#[instrument(level = "info", skip(state, body), fields(topic = %body.topic))]
pub async fn http_post_generate(
  State(state): State<Arc<AppState>>,
  Json(body): Json<GenerationRequest>,
) -> ApiResult<GeneratedContent> {
  Ok(Json(generate_draft(&state, &body).await?))
}

#[instrument(level = "info", skip(state, body), fields(topic = %body.request.topic))]
pub async fn http_post_generate_quiz(
  State(state): State<Arc<AppState>>,
  Json(body): Json<GenerateQuizIn>,
) -> ApiResult<GenerateQuizOut> {
  let report = generate_quiz(&state, &body.request, body.target).await?;
  Ok(Json(GenerateQuizOut {
    source: report.source,
    collection_id: report.outcome.collection_id,
    imported_count: report.outcome.imported_count,
    records: report.outcome.records.iter().map(question_out).collect(),
    rejected: report.rejected,
  }))
}

#[instrument(level = "info", skip(state, body), fields(topic = %body.request.topic, persist = body.persist))]
pub async fn http_post_generate_course(
  State(state): State<Arc<AppState>>,
  Json(body): Json<GenerateCourseIn>,
) -> ApiResult<GenerateCourseOut> {
  let (source, course, saved) = generate_course(&state, &body.request, body.persist).await?;
  Ok(Json(GenerateCourseOut { source, course, saved }))
}

#[instrument(level = "info", skip(state))]
pub async fn http_get_collection(
  State(state): State<Arc<AppState>>,
  Path(id): Path<Uuid>,
) -> ApiResult<Collection> {
  Ok(Json(get_collection(&state, id).await?))
}

#[instrument(level = "info", skip(state))]
pub async fn http_get_collection_questions(
  State(state): State<Arc<AppState>>,
  Path(id): Path<Uuid>,
) -> ApiResult<Vec<QuestionOut>> {
  let questions = collection_questions(&state, id).await?;
  Ok(Json(questions.iter().map(question_out).collect()))
}

// --- Builder ---

#[instrument(level = "info", skip(state, body))]
pub async fn http_open_session(
  State(state): State<Arc<AppState>>,
  body: Option<Json<OpenSessionIn>>,
) -> (StatusCode, Json<SessionOut>) {
  let target = body.and_then(|Json(b)| b.target);
  let session = open_session(&state, target).await;
  (StatusCode::CREATED, Json(session_out(session)))
}

#[instrument(level = "info", skip(state))]
pub async fn http_get_session(State(state): State<Arc<AppState>>, Path(id): Path<Uuid>) -> ApiResult<SessionOut> {
  Ok(Json(session_out(state.session(id).await?)))
}

#[instrument(level = "info", skip(state))]
pub async fn http_close_session(State(state): State<Arc<AppState>>, Path(id): Path<Uuid>) -> ApiResult<SessionOut> {
  Ok(Json(session_out(close_session(&state, id).await?)))
}

#[instrument(level = "info", skip(state, body), fields(topic = %body.topic))]
pub async fn http_configure_session(
  State(state): State<Arc<AppState>>,
  Path(id): Path<Uuid>,
  Json(body): Json<GenerationRequest>,
) -> ApiResult<SessionOut> {
  Ok(Json(session_out(configure_session(&state, id, body).await?)))
}

#[instrument(level = "info", skip(state, body))]
pub async fn http_generate_in_session(
  State(state): State<Arc<AppState>>,
  Path(id): Path<Uuid>,
  body: Option<Json<GenerateIn>>,
) -> ApiResult<SessionOut> {
  let req = body.and_then(|Json(b)| b.request);
  Ok(Json(session_out(generate_in_session(&state, id, req).await?)))
}

#[instrument(level = "info", skip(state))]
pub async fn http_cancel_session(State(state): State<Arc<AppState>>, Path(id): Path<Uuid>) -> ApiResult<SessionOut> {
  Ok(Json(session_out(cancel_session(&state, id).await?)))
}

#[instrument(level = "info", skip(state, body))]
pub async fn http_edit_question(
  State(state): State<Arc<AppState>>,
  Path((id, index)): Path<(Uuid, usize)>,
  Json(body): Json<CandidateQuestion>,
) -> ApiResult<SessionOut> {
  Ok(Json(session_out(edit_in_session(&state, id, index, body).await?)))
}

#[instrument(level = "info", skip(state))]
pub async fn http_preview_session(State(state): State<Arc<AppState>>, Path(id): Path<Uuid>) -> ApiResult<SessionOut> {
  Ok(Json(session_out(preview_session(&state, id).await?)))
}

#[instrument(level = "info", skip(state))]
pub async fn http_back_to_edit(State(state): State<Arc<AppState>>, Path(id): Path<Uuid>) -> ApiResult<SessionOut> {
  Ok(Json(session_out(back_to_edit(&state, id).await?)))
}

#[instrument(level = "info", skip(state))]
pub async fn http_save_session(State(state): State<Arc<AppState>>, Path(id): Path<Uuid>) -> ApiResult<SessionOut> {
  Ok(Json(session_out(save_session(&state, id).await?)))
}

#[instrument(level = "info", skip(state))]
pub async fn http_retry_session(State(state): State<Arc<AppState>>, Path(id): Path<Uuid>) -> ApiResult<SessionOut> {
  Ok(Json(session_out(retry_session(&state, id).await?)))
}
