//! Builder session state machine.
//!
//! ```text
//! CONFIGURE -> GENERATING -> EDITING <-> PREVIEW -> SAVING -> SAVED
//!                  |            ^                     |
//!                  v            |                     v
//!                ERROR ---------+------------------ ERROR
//! ```
//!
//! Sessions are values. Every transition takes `&self` and returns the next
//! session; a rejected action returns an error and the caller keeps the old
//! value. Side effects (generation, commit) happen outside, between a
//! `submit`/`start_save` and the matching `finish_*`.

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::debug;
use uuid::Uuid;

use crate::document::to_candidates;
use crate::domain::{CandidateQuestion, CommitTarget, ContentSource, GenerationRequest, NewCollection, QuizDraft};
use crate::error::{BuilderError, ErrorKind, GenerationError, PipelineError, ValidationError, Violation};
use crate::persistence::CommitOutcome;
use crate::validation::{validate_all, validate_request};

#[derive(Clone, Copy, Debug, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
  Configure,
  Generating,
  Editing,
  Preview,
  Saving,
  Saved,
  Error,
}

impl Stage {
  pub fn as_str(self) -> &'static str {
    match self {
      Stage::Configure => "configure",
      Stage::Generating => "generating",
      Stage::Editing => "editing",
      Stage::Preview => "preview",
      Stage::Saving => "saving",
      Stage::Saved => "saved",
      Stage::Error => "error",
    }
  }
}

/// Failure attached to a session in `Error`.
#[derive(Clone, Debug, Serialize, PartialEq)]
pub struct SessionError {
  pub kind: ErrorKind,
  pub message: String,
  pub retryable: bool,
  /// Stage that failed: `generating` or `saving`.
  pub during: Stage,
  #[serde(skip_serializing_if = "Vec::is_empty")]
  pub violations: Vec<Violation>,
}

#[derive(Clone, Debug, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SavedSummary {
  pub collection_id: Uuid,
  pub imported_count: usize,
}

#[derive(Clone, Debug, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct BuilderSession {
  pub id: Uuid,
  pub stage: Stage,
  pub request: Option<GenerationRequest>,
  /// Where `save` commits. `None` creates a new quiz named after the draft.
  pub target: Option<CommitTarget>,
  pub title: Option<String>,
  pub buffer: Vec<CandidateQuestion>,
  /// Identifies the generation run while the session is `Generating`.
  #[serde(skip_serializing_if = "Option::is_none")]
  pub generation_run: Option<Uuid>,
  pub source: Option<ContentSource>,
  pub last_generated_at: Option<DateTime<Utc>>,
  pub last_saved_at: Option<DateTime<Utc>>,
  pub last_error: Option<SessionError>,
  pub saved: Option<SavedSummary>,
  pub created_at: DateTime<Utc>,
}

impl BuilderSession {
  pub fn open(target: Option<CommitTarget>) -> Self {
    Self {
      id: Uuid::new_v4(),
      stage: Stage::Configure,
      request: None,
      target,
      title: None,
      buffer: Vec::new(),
      generation_run: None,
      source: None,
      last_generated_at: None,
      last_saved_at: None,
      last_error: None,
      saved: None,
      created_at: Utc::now(),
    }
  }

  fn reject(&self, action: &'static str) -> BuilderError {
    BuilderError::InvalidTransition { action, stage: self.stage.as_str() }
  }

  fn failed_during(&self, stage: Stage) -> bool {
    self.stage == Stage::Error && self.last_error.as_ref().is_some_and(|e| e.during == stage)
  }

  /// The run a generation outcome must belong to, if one is pending.
  pub fn generating_run(&self) -> Option<Uuid> {
    self.generation_run.filter(|_| self.stage == Stage::Generating)
  }

  fn moved(&self, to: Stage, action: &'static str) -> Self {
    debug!(target: "builder", session = %self.id, from = self.stage.as_str(), to = to.as_str(), action, "Transition");
    Self { stage: to, ..self.clone() }
  }

  /// Store a request without generating. Only before a buffer exists.
  pub fn configure(&self, req: GenerationRequest) -> Result<Self, BuilderError> {
    if !(self.stage == Stage::Configure || self.failed_during(Stage::Generating)) {
      return Err(self.reject("configure"));
    }
    let mut next = self.moved(Stage::Configure, "configure");
    next.request = Some(req);
    next.last_error = None;
    Ok(next)
  }

  /// The generate action: validate the request (given or stored) and move to `Generating`.
  /// An invalid request leaves the session where it was.
  pub fn submit(&self, req: Option<GenerationRequest>) -> Result<Self, BuilderError> {
    if !(self.stage == Stage::Configure || self.failed_during(Stage::Generating)) {
      return Err(self.reject("generate"));
    }
    let req = req
      .or_else(|| self.request.clone())
      .ok_or_else(|| ValidationError::single("request", "no configuration submitted"))?;
    validate_request(&req)?;
    if req.course.is_some() {
      return Err(ValidationError::single("course", "builder sessions generate quizzes only").into());
    }
    let mut next = self.moved(Stage::Generating, "generate");
    next.request = Some(req);
    next.generation_run = Some(Uuid::new_v4());
    next.last_error = None;
    Ok(next)
  }

  /// Apply the adapter outcome of `run`. Cancellation returns to `Configure`
  /// with the request kept and nothing buffered. An outcome from an earlier
  /// run is rejected.
  pub fn finish_generation(
    &self,
    run: Uuid,
    outcome: Result<(ContentSource, QuizDraft), GenerationError>,
  ) -> Result<Self, BuilderError> {
    if self.generating_run() != Some(run) {
      return Err(self.reject("finish_generation"));
    }
    let converted = outcome.and_then(|(source, draft)| Ok((source, draft.title, to_candidates(&draft.questions)?)));
    match converted {
      Ok((source, title, buffer)) => {
        let mut next = self.moved(Stage::Editing, "finish_generation");
        next.generation_run = None;
        next.buffer = buffer;
        next.title = Some(title);
        next.source = Some(source);
        next.last_generated_at = Some(Utc::now());
        Ok(next)
      }
      Err(GenerationError::Cancelled) => {
        let mut next = self.moved(Stage::Configure, "cancel");
        next.generation_run = None;
        next.buffer.clear();
        Ok(next)
      }
      Err(e) => {
        let mut next = self.moved(Stage::Error, "finish_generation");
        next.generation_run = None;
        next.last_error = Some(generation_failure(&e));
        Ok(next)
      }
    }
  }

  /// Explicit discard: back to `Configure`, buffer dropped, request kept.
  pub fn cancel(&self) -> Result<Self, BuilderError> {
    match self.stage {
      Stage::Saving | Stage::Saved => Err(self.reject("cancel")),
      _ => {
        let mut next = self.moved(Stage::Configure, "cancel");
        next.generation_run = None;
        next.buffer.clear();
        next.title = None;
        next.source = None;
        next.last_error = None;
        Ok(next)
      }
    }
  }

  /// Replace one buffered question. Edits are checked at save time, not here.
  pub fn edit_question(&self, index: usize, question: CandidateQuestion) -> Result<Self, BuilderError> {
    let editable = matches!(self.stage, Stage::Editing | Stage::Preview) || self.failed_during(Stage::Saving);
    if !editable {
      return Err(self.reject("edit_question"));
    }
    if index >= self.buffer.len() {
      return Err(BuilderError::QuestionIndex { index, len: self.buffer.len() });
    }
    let mut next = self.moved(Stage::Editing, "edit_question");
    next.buffer[index] = question;
    next.last_error = None;
    Ok(next)
  }

  pub fn preview(&self) -> Result<Self, BuilderError> {
    match self.stage {
      Stage::Editing => Ok(self.moved(Stage::Preview, "preview")),
      _ => Err(self.reject("preview")),
    }
  }

  pub fn back_to_edit(&self) -> Result<Self, BuilderError> {
    match self.stage {
      Stage::Preview => Ok(self.moved(Stage::Editing, "edit")),
      _ => Err(self.reject("edit")),
    }
  }

  /// `Preview -> Saving`. An incomplete buffer goes to `Error` instead, buffer intact.
  pub fn start_save(&self) -> Result<Self, BuilderError> {
    if self.stage != Stage::Preview {
      return Err(self.reject("save"));
    }
    Ok(self.check_then_save("save"))
  }

  fn check_then_save(&self, action: &'static str) -> Self {
    let checked = if self.buffer.is_empty() {
      Err(ValidationError::single("questions", "at least one question is required"))
    } else {
      validate_all(&self.buffer)
    };
    match checked {
      Ok(()) => {
        let mut next = self.moved(Stage::Saving, action);
        next.last_error = None;
        next
      }
      Err(v) => {
        let mut next = self.moved(Stage::Error, action);
        next.last_error = Some(SessionError {
          kind: ErrorKind::Validation,
          message: v.to_string(),
          retryable: false,
          during: Stage::Saving,
          violations: v.violations,
        });
        next
      }
    }
  }

  pub fn commit_target(&self) -> CommitTarget {
    self.target.clone().unwrap_or_else(|| {
      let title = self
        .title
        .clone()
        .filter(|t| !t.trim().is_empty())
        .or_else(|| self.request.as_ref().map(|r| r.default_title()))
        .unwrap_or_else(|| "Untitled quiz".into());
      CommitTarget::New { collection: NewCollection::quiz(title) }
    })
  }

  pub fn finish_save(&self, outcome: Result<CommitOutcome, PipelineError>) -> Result<Self, BuilderError> {
    if self.stage != Stage::Saving {
      return Err(self.reject("finish_save"));
    }
    match outcome {
      Ok(out) => {
        let mut next = self.moved(Stage::Saved, "finish_save");
        next.last_saved_at = Some(Utc::now());
        next.saved = Some(SavedSummary { collection_id: out.collection_id, imported_count: out.imported_count });
        next.target = Some(CommitTarget::Existing { collection_id: out.collection_id });
        Ok(next)
      }
      Err(e) => {
        let kind = e.kind();
        let mut next = self.moved(Stage::Error, "finish_save");
        next.last_error = Some(SessionError {
          kind,
          message: e.to_string(),
          retryable: kind.is_retryable(),
          during: Stage::Saving,
          violations: e.violations().to_vec(),
        });
        Ok(next)
      }
    }
  }

  /// Re-run the failed step. Only offered for retryable failures.
  pub fn retry(&self) -> Result<Self, BuilderError> {
    let Some(err) = self.last_error.as_ref().filter(|e| e.retryable && self.stage == Stage::Error) else {
      return Err(self.reject("retry"));
    };
    match err.during {
      Stage::Generating => {
        let mut next = self.moved(Stage::Generating, "retry");
        next.generation_run = Some(Uuid::new_v4());
        next.last_error = None;
        Ok(next)
      }
      _ => Ok(self.check_then_save("retry")),
    }
  }
}

fn generation_failure(e: &GenerationError) -> SessionError {
  let kind = e.kind().unwrap_or(ErrorKind::GenerationConnectivity);
  SessionError {
    kind,
    message: e.to_string(),
    retryable: kind.is_retryable(),
    during: Stage::Generating,
    violations: Vec::new(),
  }
}
