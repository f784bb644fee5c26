//! Pipeline runs behind the HTTP handlers.
//!
//! This includes:
//!   - Bulk import: normalize -> validate per row -> allocate -> commit
//!   - One-shot generation: generate -> validate per question -> commit
//!   - Course generation, optionally persisted lesson by lesson
//!   - Builder actions: session transitions around generation and save

use tokio_util::sync::CancellationToken;
use tracing::{info, instrument, warn};
use uuid::Uuid;

use crate::builder::{BuilderSession, Stage};
use crate::document::to_candidates;
use crate::domain::{
  CandidateQuestion, Collection, CommitTarget, ContentSource, CourseDraft, GeneratedContent, GenerationRequest,
  NewCollection, Question,
};
use crate::error::{BuilderError, CommitStage, PipelineError, ValidationError, Violation};
use crate::import::{normalize_rows, ImportRow};
use crate::persistence::{commit_batch, commit_course, CommitOutcome, CourseOutcome};
use crate::state::AppState;
use crate::validation::{partition, validate_request, Rejected};

#[derive(Debug)]
pub struct ImportReport {
  pub outcome: CommitOutcome,
  pub rejected: Vec<Rejected>,
  pub skipped: usize,
}

#[derive(Debug)]
pub struct QuizReport {
  pub source: ContentSource,
  pub outcome: CommitOutcome,
  pub rejected: Vec<Rejected>,
}

/// Rejected items become the error when nothing survived.
fn nothing_to_commit(prefix: &str, rejected: &[Rejected]) -> ValidationError {
  let mut violations: Vec<Violation> = rejected
    .iter()
    .flat_map(|r| r.violations.iter().map(move |v| Violation::new(format!("{}[{}].{}", prefix, r.index, v.field), v.reason.clone())))
    .collect();
  if violations.is_empty() {
    violations.push(Violation::new(prefix, "nothing to import"));
  }
  ValidationError { violations }
}

#[instrument(level = "info", target = "pipeline", skip(state, target, rows), fields(rows = rows.len()))]
pub async fn run_import(state: &AppState, target: CommitTarget, rows: &[ImportRow]) -> Result<ImportReport, PipelineError> {
  let normalized = normalize_rows(rows);
  let (accepted, mut rejected) = partition(normalized.candidates);
  rejected.extend(normalized.rejected);
  rejected.sort_by_key(|r| r.index);

  if accepted.is_empty() {
    return Err(nothing_to_commit("rows", &rejected).into());
  }

  let outcome = commit_batch(state.store.as_ref(), &state.config.persistence, target, accepted).await?;
  info!(
    target: "pipeline",
    collection_id = %outcome.collection_id,
    imported = outcome.imported_count,
    rejected = rejected.len(),
    skipped = normalized.skipped,
    "Import finished"
  );
  Ok(ImportReport { outcome, rejected, skipped: normalized.skipped })
}

/// Generate a quiz or course draft without committing anything.
#[instrument(level = "info", target = "pipeline", skip(state, req), fields(topic = %req.topic))]
pub async fn generate_draft(state: &AppState, req: &GenerationRequest) -> Result<GeneratedContent, PipelineError> {
  validate_request(req)?;
  Ok(state.adapter.generate(req, &CancellationToken::new()).await?)
}

#[instrument(level = "info", target = "pipeline", skip(state, req, target), fields(topic = %req.topic))]
pub async fn generate_quiz(
  state: &AppState,
  req: &GenerationRequest,
  target: Option<CommitTarget>,
) -> Result<QuizReport, PipelineError> {
  validate_request(req)?;
  if req.course.is_some() {
    return Err(ValidationError::single("course", "use course generation for course outlines").into());
  }

  let (source, draft) = state.adapter.generate_quiz(req, &CancellationToken::new()).await?;
  let candidates = to_candidates(&draft.questions)?;
  let (accepted, rejected) = partition(candidates.into_iter().enumerate());
  if accepted.is_empty() {
    return Err(nothing_to_commit("questions", &rejected).into());
  }
  if !rejected.is_empty() {
    warn!(target: "pipeline", rejected = rejected.len(), "Generated questions failed validation and were skipped");
  }

  let target = target.unwrap_or_else(|| CommitTarget::New { collection: NewCollection::quiz(draft.title.clone()) });
  let outcome = commit_batch(state.store.as_ref(), &state.config.persistence, target, accepted).await?;
  Ok(QuizReport { source, outcome, rejected })
}

#[instrument(level = "info", target = "pipeline", skip(state, req), fields(topic = %req.topic))]
pub async fn generate_course(
  state: &AppState,
  req: &GenerationRequest,
  persist: bool,
) -> Result<(ContentSource, CourseDraft, Option<CourseOutcome>), PipelineError> {
  validate_request(req)?;
  let outline = req
    .course
    .as_ref()
    .ok_or_else(|| ValidationError::single("course", "a course outline is required"))?;

  let (source, draft) = state.adapter.generate_course(req, outline, &CancellationToken::new()).await?;
  let saved = if persist {
    Some(commit_course(state.store.as_ref(), &state.config.persistence, &draft).await?)
  } else {
    None
  };
  Ok((source, draft, saved))
}

pub async fn get_collection(state: &AppState, id: Uuid) -> Result<Collection, PipelineError> {
  state
    .store
    .find_collection(id)
    .await
    .map_err(|e| PipelineError::store(CommitStage::ResolveTarget, e))?
    .ok_or(PipelineError::CollectionNotFound(id))
}

/// Questions of a collection in `order_index` order.
pub async fn collection_questions(state: &AppState, id: Uuid) -> Result<Vec<Question>, PipelineError> {
  let collection = get_collection(state, id).await?;
  state
    .store
    .list_questions(collection.id)
    .await
    .map_err(|e| PipelineError::store(CommitStage::ResolveTarget, e))
}

// --- Builder actions ---

pub async fn open_session(state: &AppState, target: Option<CommitTarget>) -> BuilderSession {
  let session = BuilderSession::open(target);
  info!(target: "builder", session = %session.id, "Builder session opened");
  state.insert_session(session.clone()).await;
  session
}

pub async fn configure_session(state: &AppState, id: Uuid, req: GenerationRequest) -> Result<BuilderSession, BuilderError> {
  state.update_session(id, |s| s.configure(req)).await
}

/// Submit and run generation. Holds no lock while the adapter runs, so a
/// concurrent cancel or close goes through.
#[instrument(level = "info", target = "builder", skip(state, req), fields(session = %id))]
pub async fn generate_in_session(
  state: &AppState,
  id: Uuid,
  req: Option<GenerationRequest>,
) -> Result<BuilderSession, BuilderError> {
  let session = state.update_session(id, |s| s.submit(req)).await?;
  run_generation(state, session).await
}

async fn run_generation(state: &AppState, session: BuilderSession) -> Result<BuilderSession, BuilderError> {
  let id = session.id;
  let (Some(req), Some(run)) = (session.request.clone(), session.generating_run()) else {
    return state.update_session(id, |s| s.cancel()).await;
  };

  let token = state.register_generation(id, run).await;
  let outcome = state.adapter.generate_quiz(&req, &token).await;
  state.finish_generation(id, run);

  match state.update_session(id, |s| s.finish_generation(run, outcome)).await {
    // Cancelled, closed or regenerated meanwhile: the result is dropped.
    Err(BuilderError::InvalidTransition { .. }) => {
      warn!(target: "builder", session = %id, "Generation finished after the session moved on; result dropped");
      state.session(id).await
    }
    other => other,
  }
}

/// Discard the buffer and signal the running generation. Both happen under
/// the session lock, so a run started right after is not touched.
pub async fn cancel_session(state: &AppState, id: Uuid) -> Result<BuilderSession, BuilderError> {
  state
    .update_session(id, |s| {
      let next = s.cancel()?;
      state.cancel_generation(id);
      Ok(next)
    })
    .await
}

pub async fn edit_in_session(
  state: &AppState,
  id: Uuid,
  index: usize,
  question: CandidateQuestion,
) -> Result<BuilderSession, BuilderError> {
  state.update_session(id, |s| s.edit_question(index, question)).await
}

pub async fn preview_session(state: &AppState, id: Uuid) -> Result<BuilderSession, BuilderError> {
  state.update_session(id, |s| s.preview()).await
}

pub async fn back_to_edit(state: &AppState, id: Uuid) -> Result<BuilderSession, BuilderError> {
  state.update_session(id, |s| s.back_to_edit()).await
}

#[instrument(level = "info", target = "builder", skip(state), fields(session = %id))]
pub async fn save_session(state: &AppState, id: Uuid) -> Result<BuilderSession, BuilderError> {
  let session = state.update_session(id, |s| s.start_save()).await?;
  if session.stage != Stage::Saving {
    return Ok(session);
  }
  run_save(state, session).await
}

async fn run_save(state: &AppState, session: BuilderSession) -> Result<BuilderSession, BuilderError> {
  let outcome = commit_batch(
    state.store.as_ref(),
    &state.config.persistence,
    session.commit_target(),
    session.buffer.clone(),
  )
  .await;
  state.update_session(session.id, |s| s.finish_save(outcome)).await
}

#[instrument(level = "info", target = "builder", skip(state), fields(session = %id))]
pub async fn retry_session(state: &AppState, id: Uuid) -> Result<BuilderSession, BuilderError> {
  let session = state.update_session(id, |s| s.retry()).await?;
  match session.stage {
    Stage::Generating => run_generation(state, session).await,
    Stage::Saving => run_save(state, session).await,
    _ => Ok(session),
  }
}

/// Cancel anything in flight and drop the session.
pub async fn close_session(state: &AppState, id: Uuid) -> Result<BuilderSession, BuilderError> {
  let session = state.remove_session(id).await.ok_or(BuilderError::UnknownSession(id))?;
  state.cancel_generation(id);
  info!(target: "builder", session = %id, stage = session.stage.as_str(), "Builder session closed");
  Ok(session)
}

#[cfg(test)]
mod tests {
  use std::sync::Arc;
  use std::time::Duration;

  use super::*;
  use crate::config::AppConfig;
  use crate::domain::{CourseOutline, QuestionPayload, QuestionType};
  use crate::generation::testing::{live_adapter, offline_adapter, ScriptedGenerator};
  use crate::generation::GenerationAdapter;
  use crate::store::{ContentStore, MemoryStore};

  fn state_with(adapter: GenerationAdapter) -> AppState {
    AppState::with_parts(AppConfig::default(), Arc::new(MemoryStore::new()), adapter)
  }

  fn fill_blank(status: &str, answer: &str) -> ImportRow {
    ImportRow {
      status: status.into(),
      question_type: "fill_blank".into(),
      question: "Capital of France: ___".into(),
      correct_answer_text: Some(answer.into()),
      ..ImportRow::default()
    }
  }

  async fn wait_for_generation(state: &AppState, id: Uuid) {
    for _ in 0..200 {
      if state.active_generations.lock().unwrap().contains_key(&id) {
        return;
      }
      tokio::time::sleep(Duration::from_millis(5)).await;
    }
  }

  fn quiz_request(count: usize) -> GenerationRequest {
    GenerationRequest::quiz("Present Perfect", count, vec![QuestionType::SingleChoice, QuestionType::TrueFalse])
  }

  #[tokio::test]
  async fn invalid_status_rows_are_not_imported() {
    let state = state_with(offline_adapter());
    let rows = vec![
      fill_blank("valid", "Paris"),
      fill_blank("invalid", "Paris"),
      fill_blank("valid", "Paris"),
      fill_blank("invalid", "Paris"),
      fill_blank("valid", "Paris"),
    ];
    let target = CommitTarget::New { collection: NewCollection::quiz("Geography") };
    let report = run_import(&state, target, &rows).await.unwrap();
    assert_eq!(report.outcome.imported_count, 3);
    assert_eq!(report.outcome.records.len(), 3);
    assert_eq!(report.skipped, 2);
    let stored = state.store.find_collection(report.outcome.collection_id).await.unwrap().unwrap();
    assert_eq!(stored.total_questions, 3);
  }

  #[tokio::test]
  async fn incomplete_rows_do_not_block_siblings() {
    let state = state_with(offline_adapter());
    let rows = vec![fill_blank("valid", "Paris"), fill_blank("valid", "  "), fill_blank("valid", "Lyon")];
    let target = CommitTarget::New { collection: NewCollection::quiz("Geography") };
    let report = run_import(&state, target, &rows).await.unwrap();
    assert_eq!(report.outcome.imported_count, 2);
    assert_eq!(report.rejected.len(), 1);
    assert_eq!(report.rejected[0].index, 1);
    assert_eq!(report.rejected[0].violations[0].field, "correct_answer_text");
  }

  #[tokio::test]
  async fn import_with_nothing_valid_is_a_validation_error() {
    let state = state_with(offline_adapter());
    let rows = vec![fill_blank("valid", ""), fill_blank("invalid", "x")];
    let err = run_import(&state, CommitTarget::New { collection: NewCollection::quiz("X") }, &rows)
      .await
      .unwrap_err();
    assert_eq!(err.violations()[0].field, "rows[0].correct_answer_text");
  }

  #[tokio::test]
  async fn import_into_unknown_collection_fails() {
    let state = state_with(offline_adapter());
    let err = run_import(&state, CommitTarget::Existing { collection_id: Uuid::new_v4() }, &[fill_blank("valid", "x")])
      .await
      .unwrap_err();
    assert!(matches!(err, PipelineError::CollectionNotFound(_)));
  }

  #[tokio::test]
  async fn offline_one_shot_quiz_is_committed() {
    let state = state_with(offline_adapter());
    let report = generate_quiz(&state, &quiz_request(6), None).await.unwrap();
    assert_eq!(report.source, ContentSource::Fallback);
    assert_eq!(report.outcome.imported_count, 6);
    assert!(report.rejected.is_empty());
    let indices: Vec<u32> = report.outcome.records.iter().map(|q| q.order_index).collect();
    assert_eq!(indices, (0..6).collect::<Vec<u32>>());
  }

  #[tokio::test]
  async fn one_shot_quiz_rejects_bad_request_before_calling_out() {
    let state = state_with(live_adapter(ScriptedGenerator::text("never parsed")));
    let mut req = quiz_request(0);
    req.topic.clear();
    let err = generate_quiz(&state, &req, None).await.unwrap_err();
    let fields: Vec<&str> = err.violations().iter().map(|v| v.field.as_str()).collect();
    assert_eq!(fields, vec!["topic", "question_count"]);
  }

  #[tokio::test]
  async fn draft_generation_commits_nothing() {
    let state = state_with(offline_adapter());
    match generate_draft(&state, &quiz_request(2)).await.unwrap() {
      GeneratedContent::Quiz { source, draft } => {
        assert_eq!(source, ContentSource::Fallback);
        assert_eq!(draft.questions.len(), 2);
      }
      other => panic!("unexpected {other:?}"),
    }
  }

  #[tokio::test]
  async fn course_generation_scenario_with_lesson_quiz() {
    let state = state_with(offline_adapter());
    let mut req = quiz_request(3);
    req.course = Some(CourseOutline {
      module_count: 1,
      lessons_per_module: 1,
      include_lesson_quizzes: true,
      quiz_questions_per_lesson: 3,
    });
    let (_, draft, saved) = generate_course(&state, &req, true).await.unwrap();
    assert_eq!(draft.modules.len(), 1);
    let quiz = draft.modules[0].lessons[0].quiz.as_ref().unwrap();
    assert_eq!(quiz.questions.len(), 3);
    assert_eq!(quiz.duration_minutes, 6);
    assert_eq!(quiz.passing_score, 70);

    let saved = saved.unwrap();
    let quiz_id = saved.lessons[0].quiz.as_ref().unwrap().collection_id;
    assert_eq!(state.store.count_questions(quiz_id).await.unwrap(), 3);
  }

  #[tokio::test]
  async fn builder_happy_path_saves_buffer() {
    let state = state_with(offline_adapter());
    let id = open_session(&state, None).await.id;
    let s = generate_in_session(&state, id, Some(quiz_request(4))).await.unwrap();
    assert_eq!(s.stage, Stage::Editing);
    assert_eq!(s.buffer.len(), 4);

    let edited = CandidateQuestion::new("Edited?", QuestionPayload::TrueFalse { correct_answer: Some(0) });
    edit_in_session(&state, id, 0, edited).await.unwrap();
    preview_session(&state, id).await.unwrap();
    let saved = save_session(&state, id).await.unwrap();
    assert_eq!(saved.stage, Stage::Saved);

    let summary = saved.saved.unwrap();
    assert_eq!(summary.imported_count, 4);
    let questions = state.store.list_questions(summary.collection_id).await.unwrap();
    assert_eq!(questions[0].body.prompt, "Edited?");
  }

  #[tokio::test]
  async fn builder_generation_failure_then_retry() {
    let generator = ScriptedGenerator::new(vec![
      Err(crate::error::GenerationError::Connectivity("refused".into())),
      Ok(r#"{"title":"T","questions":[{"question":"Q1","type":"true_false","correct_answer":true},{"question":"Q2","type":"true_false","correct_answer":false}]}"#.into()),
    ]);
    let state = state_with(live_adapter(generator));
    let id = open_session(&state, None).await.id;
    let mut req = quiz_request(2);
    req.question_types = vec![QuestionType::TrueFalse];

    let failed = generate_in_session(&state, id, Some(req)).await.unwrap();
    assert_eq!(failed.stage, Stage::Error);
    assert!(failed.last_error.as_ref().unwrap().retryable);

    let retried = retry_session(&state, id).await.unwrap();
    assert_eq!(retried.stage, Stage::Editing);
    assert_eq!(retried.buffer.len(), 2);
  }

  #[tokio::test]
  async fn cancel_during_generation_returns_to_configure() {
    let state = state_with(live_adapter(ScriptedGenerator::slow(Duration::from_secs(5))));
    let id = open_session(&state, None).await.id;

    let runner = state.clone();
    let task = tokio::spawn(async move { generate_in_session(&runner, id, Some(quiz_request(2))).await });

    wait_for_generation(&state, id).await;
    let cancelled = cancel_session(&state, id).await.unwrap();
    assert_eq!(cancelled.stage, Stage::Configure);

    let after = task.await.unwrap().unwrap();
    assert_eq!(after.stage, Stage::Configure);
    assert!(after.buffer.is_empty());
    assert!(after.request.is_some());
  }

  #[tokio::test]
  async fn regenerating_after_cancel_keeps_the_new_result() {
    let reply = r#"{"title":"T","questions":[{"question":"Q1","type":"true_false","correct_answer":true},{"question":"Q2","type":"true_false","correct_answer":false}]}"#;
    let generator = ScriptedGenerator::timed(vec![
      (Duration::from_secs(5), Ok(reply.into())),
      (Duration::from_millis(50), Ok(reply.into())),
    ]);
    let state = state_with(live_adapter(generator));
    let id = open_session(&state, None).await.id;
    let mut req = quiz_request(2);
    req.question_types = vec![QuestionType::TrueFalse];

    let runner = state.clone();
    let first_req = req.clone();
    let first = tokio::spawn(async move { generate_in_session(&runner, id, Some(first_req)).await });
    wait_for_generation(&state, id).await;
    cancel_session(&state, id).await.unwrap();

    let second = generate_in_session(&state, id, Some(req)).await.unwrap();
    assert_eq!(second.stage, Stage::Editing);
    assert_eq!(second.buffer.len(), 2);

    first.await.unwrap().unwrap();
    let settled = state.session(id).await.unwrap();
    assert_eq!(settled.stage, Stage::Editing);
    assert_eq!(settled.buffer.len(), 2);
    assert!(state.active_generations.lock().unwrap().is_empty());
  }

  #[tokio::test]
  async fn closing_discards_the_session() {
    let state = state_with(offline_adapter());
    let id = open_session(&state, None).await.id;
    close_session(&state, id).await.unwrap();
    assert_eq!(state.session(id).await.unwrap_err(), BuilderError::UnknownSession(id));
    assert!(close_session(&state, id).await.is_err());
  }
}
