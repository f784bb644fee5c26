//! Error taxonomy for the ingestion pipeline.
//!
//! Low-level adapters (generation, store) raise their own typed errors; the
//! persistence orchestrator wraps them in `PipelineError` adding the stage or
//! batch index they happened at. Every error carries a stable `ErrorKind`
//! label so callers can tell whether a retry is worth offering.

use std::time::Duration;

use serde::Serialize;
use thiserror::Error;
use uuid::Uuid;

/// Stable, machine-readable error label exposed to callers.
#[derive(Clone, Copy, Debug, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
  Validation,
  GenerationParse,
  GenerationStructural,
  GenerationTimeout,
  GenerationConnectivity,
  CollectionNotFound,
  StoreWrite,
}

impl ErrorKind {
  pub fn as_str(self) -> &'static str {
    match self {
      ErrorKind::Validation => "validation",
      ErrorKind::GenerationParse => "generation_parse",
      ErrorKind::GenerationStructural => "generation_structural",
      ErrorKind::GenerationTimeout => "generation_timeout",
      ErrorKind::GenerationConnectivity => "generation_connectivity",
      ErrorKind::CollectionNotFound => "collection_not_found",
      ErrorKind::StoreWrite => "store_write",
    }
  }

  /// Timeouts, connectivity failures and store write failures may succeed on
  /// a second attempt. Bad data will not.
  pub fn is_retryable(self) -> bool {
    matches!(
      self,
      ErrorKind::GenerationTimeout | ErrorKind::GenerationConnectivity | ErrorKind::StoreWrite
    )
  }
}

/// One `(field, reason)` pair reported by a validator.
#[derive(Clone, Debug, Serialize, PartialEq, Eq)]
pub struct Violation {
  pub field: String,
  pub reason: String,
}

impl Violation {
  pub fn new(field: impl Into<String>, reason: impl Into<String>) -> Self {
    Self { field: field.into(), reason: reason.into() }
  }
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("validation failed: {}", describe(.violations))]
pub struct ValidationError {
  pub violations: Vec<Violation>,
}

impl ValidationError {
  pub fn single(field: impl Into<String>, reason: impl Into<String>) -> Self {
    Self { violations: vec![Violation::new(field, reason)] }
  }
}

fn describe(violations: &[Violation]) -> String {
  violations
    .iter()
    .map(|v| format!("{}: {}", v.field, v.reason))
    .collect::<Vec<_>>()
    .join("; ")
}

/// Failures of one generation attempt. All are terminal for that attempt.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum GenerationError {
  #[error("could not parse generated content: {0}")]
  Parse(String),

  #[error("generated content is structurally invalid at {location}: {reason}")]
  Structural { location: String, reason: String },

  #[error("generation timed out after {0:?}")]
  Timeout(Duration),

  #[error("generation service unreachable: {0}")]
  Connectivity(String),

  #[error("generation cancelled")]
  Cancelled,
}

impl GenerationError {
  pub fn structural(location: impl Into<String>, reason: impl Into<String>) -> Self {
    GenerationError::Structural { location: location.into(), reason: reason.into() }
  }

  /// `None` for cancellation, which is not an error state for callers.
  pub fn kind(&self) -> Option<ErrorKind> {
    match self {
      GenerationError::Parse(_) => Some(ErrorKind::GenerationParse),
      GenerationError::Structural { .. } => Some(ErrorKind::GenerationStructural),
      GenerationError::Timeout(_) => Some(ErrorKind::GenerationTimeout),
      GenerationError::Connectivity(_) => Some(ErrorKind::GenerationConnectivity),
      GenerationError::Cancelled => None,
    }
  }
}

/// Errors reported by a `ContentStore` implementation.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum StoreError {
  #[error("store write failed: {0}")]
  Write(String),

  #[error("order_index {order_index} already taken in collection {collection_id}")]
  Conflict { collection_id: Uuid, order_index: u32 },
}

/// Where in a commit a store error happened.
#[derive(Clone, Copy, Debug, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum CommitStage {
  ResolveTarget,
  CreateCollection,
  ReadOrdering,
  InsertBatch,
  UpdateCounter,
}

impl std::fmt::Display for CommitStage {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    let s = match self {
      CommitStage::ResolveTarget => "resolve_target",
      CommitStage::CreateCollection => "create_collection",
      CommitStage::ReadOrdering => "read_ordering",
      CommitStage::InsertBatch => "insert_batch",
      CommitStage::UpdateCounter => "update_counter",
    };
    f.write_str(s)
  }
}

#[derive(Debug, Error)]
pub enum PipelineError {
  #[error(transparent)]
  Validation(#[from] ValidationError),

  #[error(transparent)]
  Generation(#[from] GenerationError),

  #[error("collection {0} not found")]
  CollectionNotFound(Uuid),

  #[error("{stage} failed: {source}")]
  Store {
    stage: CommitStage,
    #[source]
    source: StoreError,
  },

  #[error("module {module}, lesson {lesson}: {source}")]
  Lesson {
    module: usize,
    lesson: usize,
    #[source]
    source: Box<PipelineError>,
  },
}

impl PipelineError {
  pub fn store(stage: CommitStage, source: StoreError) -> Self {
    PipelineError::Store { stage, source }
  }

  pub fn kind(&self) -> ErrorKind {
    match self {
      PipelineError::Validation(_) => ErrorKind::Validation,
      PipelineError::Generation(e) => e.kind().unwrap_or(ErrorKind::GenerationConnectivity),
      PipelineError::CollectionNotFound(_) => ErrorKind::CollectionNotFound,
      PipelineError::Store { .. } => ErrorKind::StoreWrite,
      PipelineError::Lesson { source, .. } => source.kind(),
    }
  }

  pub fn violations(&self) -> &[Violation] {
    match self {
      PipelineError::Validation(v) => &v.violations,
      PipelineError::Lesson { source, .. } => source.violations(),
      _ => &[],
    }
  }
}

/// Errors returned by the builder action surface. A rejected action leaves
/// the session unchanged.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum BuilderError {
  #[error("action '{action}' is not allowed in stage {stage}")]
  InvalidTransition { action: &'static str, stage: &'static str },

  #[error(transparent)]
  Validation(#[from] ValidationError),

  #[error("unknown builder session {0}")]
  UnknownSession(Uuid),

  #[error("question index {index} out of range (buffer holds {len})")]
  QuestionIndex { index: usize, len: usize },
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn retryable_kinds_are_transient_failures() {
    assert!(ErrorKind::GenerationTimeout.is_retryable());
    assert!(ErrorKind::GenerationConnectivity.is_retryable());
    assert!(ErrorKind::StoreWrite.is_retryable());
    assert!(!ErrorKind::GenerationParse.is_retryable());
    assert!(!ErrorKind::GenerationStructural.is_retryable());
    assert!(!ErrorKind::Validation.is_retryable());
    assert!(!ErrorKind::CollectionNotFound.is_retryable());
  }

  #[test]
  fn lesson_context_keeps_inner_kind_and_violations() {
    let inner = PipelineError::Validation(ValidationError::single("questions[0].prompt", "must not be empty"));
    let err = PipelineError::Lesson { module: 1, lesson: 0, source: Box::new(inner) };
    assert_eq!(err.kind(), ErrorKind::Validation);
    assert_eq!(err.violations().len(), 1);
    assert!(err.to_string().starts_with("module 1, lesson 0:"));
  }

  #[test]
  fn cancellation_has_no_error_kind() {
    assert_eq!(GenerationError::Cancelled.kind(), None);
    assert_eq!(GenerationError::Timeout(Duration::from_secs(3)).kind(), Some(ErrorKind::GenerationTimeout));
  }
}
