//! Persistence orchestrator: commit a validated batch into a collection.
//!
//! Order of operations: resolve or create the target, read the current
//! maximum `order_index`, insert the batch in one call, then maintain
//! `total_questions`. None of this runs under a lock; with the default
//! settings two concurrent commits into the same collection can collide on
//! indices or undercount the counter.

use serde::Serialize;
use tracing::{info, instrument, warn};
use uuid::Uuid;

use crate::config::{CounterPolicy, PersistenceSettings};
use crate::document::to_candidates;
use crate::domain::{CandidateQuestion, CollectionKind, CommitTarget, CourseDraft, NewCollection, Question};
use crate::error::{CommitStage, PipelineError, StoreError};
use crate::ordering;
use crate::store::ContentStore;
use crate::validation::{partition, validate_all, Rejected};

#[derive(Clone, Debug, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct CommitOutcome {
  pub collection_id: Uuid,
  pub imported_count: usize,
  pub records: Vec<Question>,
}

#[instrument(level = "info", target = "pipeline", skip(store, settings, target, batch), fields(batch = batch.len()))]
pub async fn commit_batch(
  store: &dyn ContentStore,
  settings: &PersistenceSettings,
  target: CommitTarget,
  batch: Vec<CandidateQuestion>,
) -> Result<CommitOutcome, PipelineError> {
  validate_all(&batch)?;

  let collection_id = match target {
    CommitTarget::Existing { collection_id } => {
      store
        .find_collection(collection_id)
        .await
        .map_err(|e| PipelineError::store(CommitStage::ResolveTarget, e))?
        .ok_or(PipelineError::CollectionNotFound(collection_id))?
        .id
    }
    CommitTarget::New { collection } => {
      store
        .create_collection(collection)
        .await
        .map_err(|e| PipelineError::store(CommitStage::CreateCollection, e))?
        .id
    }
  };

  if batch.is_empty() {
    return Ok(CommitOutcome { collection_id, imported_count: 0, records: Vec::new() });
  }

  let mut retries = 0;
  let records = loop {
    let assigned = ordering::allocate(store, collection_id, batch.clone())
      .await
      .map_err(|e| PipelineError::store(CommitStage::ReadOrdering, e))?;
    match store.insert_many(assigned).await {
      Ok(records) => break records,
      Err(StoreError::Conflict { order_index, .. }) if retries < settings.max_order_retries => {
        retries += 1;
        warn!(target: "pipeline", %collection_id, order_index, attempt = retries, "order_index conflict; re-allocating");
      }
      Err(e) => return Err(PipelineError::store(CommitStage::InsertBatch, e)),
    }
  };

  update_counter(store, settings.counter_policy, collection_id, records.len() as u32)
    .await
    .map_err(|e| PipelineError::store(CommitStage::UpdateCounter, e))?;

  info!(target: "pipeline", %collection_id, imported = records.len(), retries, "Batch committed");
  Ok(CommitOutcome { collection_id, imported_count: records.len(), records })
}

async fn update_counter(
  store: &dyn ContentStore,
  policy: CounterPolicy,
  collection_id: Uuid,
  inserted: u32,
) -> Result<(), StoreError> {
  let total = match policy {
    CounterPolicy::Accumulate => {
      let current = store
        .find_collection(collection_id)
        .await?
        .map_or(0, |c| c.total_questions);
      current + inserted
    }
    CounterPolicy::Recount => store.count_questions(collection_id).await?,
  };
  store.write_total_questions(collection_id, total).await
}

#[derive(Clone, Debug, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct LessonOutcome {
  pub module: usize,
  pub lesson: usize,
  pub lesson_id: Uuid,
  pub quiz: Option<CommitOutcome>,
  /// Lesson quiz questions the validator refused, by position in the quiz.
  #[serde(skip_serializing_if = "Vec::is_empty")]
  pub rejected: Vec<Rejected>,
}

#[derive(Clone, Debug, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct CourseOutcome {
  pub title: String,
  pub lessons: Vec<LessonOutcome>,
}

struct PreparedLesson {
  module: usize,
  lesson: usize,
  meta: NewCollection,
  quiz: Option<(NewCollection, Vec<CandidateQuestion>)>,
  rejected: Vec<Rejected>,
}

/// Convert and validate every lesson quiz before anything is written.
/// Invalid questions are set aside per lesson; a lesson whose quiz has no
/// valid question at all is committed without one.
fn prepare_course(draft: &CourseDraft) -> Result<Vec<PreparedLesson>, PipelineError> {
  let mut prepared = Vec::with_capacity(draft.lesson_count());
  for (mi, module) in draft.modules.iter().enumerate() {
    for (li, lesson) in module.lessons.iter().enumerate() {
      let meta = NewCollection {
        kind: CollectionKind::Lesson,
        title: lesson.title.clone(),
        description: module.title.clone(),
        content: Some(lesson.content.clone()),
        parent_id: None,
        duration_minutes: None,
        passing_score: None,
      };
      let (quiz, rejected) = match &lesson.quiz {
        None => (None, Vec::new()),
        Some(q) => {
          let candidates = to_candidates(&q.questions).map_err(|e| PipelineError::Lesson {
            module: mi,
            lesson: li,
            source: Box::new(e.into()),
          })?;
          let (accepted, rejected) = partition(candidates.into_iter().enumerate());
          if !rejected.is_empty() {
            warn!(target: "pipeline", module = mi, lesson = li, rejected = rejected.len(), "Lesson quiz questions failed validation and were skipped");
          }
          let quiz_meta = NewCollection {
            kind: CollectionKind::Quiz,
            title: q.title.clone(),
            description: format!("Check your understanding of {}", lesson.title),
            content: None,
            parent_id: None,
            duration_minutes: Some(q.duration_minutes),
            passing_score: Some(q.passing_score),
          };
          ((!accepted.is_empty()).then_some((quiz_meta, accepted)), rejected)
        }
      };
      prepared.push(PreparedLesson { module: mi, lesson: li, meta, quiz, rejected });
    }
  }
  Ok(prepared)
}

/// One Lesson collection per lesson, plus a child Quiz collection when the
/// lesson carries a quiz with at least one valid question. Conversion
/// failures abort before any write. A store failure stops at that lesson;
/// earlier lessons stay.
#[instrument(level = "info", target = "pipeline", skip_all, fields(title = %draft.title, lessons = draft.lesson_count()))]
pub async fn commit_course(
  store: &dyn ContentStore,
  settings: &PersistenceSettings,
  draft: &CourseDraft,
) -> Result<CourseOutcome, PipelineError> {
  let prepared = prepare_course(draft)?;

  let mut lessons = Vec::with_capacity(prepared.len());
  for p in prepared {
    let (mi, li) = (p.module, p.lesson);
    let in_lesson = |source: PipelineError| PipelineError::Lesson { module: mi, lesson: li, source: Box::new(source) };

    let lesson_id = store
      .create_collection(p.meta)
      .await
      .map_err(|e| in_lesson(PipelineError::store(CommitStage::CreateCollection, e)))?
      .id;

    let quiz = match p.quiz {
      None => None,
      Some((mut meta, batch)) => {
        meta.parent_id = Some(lesson_id);
        let target = CommitTarget::New { collection: meta };
        Some(commit_batch(store, settings, target, batch).await.map_err(in_lesson)?)
      }
    };
    lessons.push(LessonOutcome { module: mi, lesson: li, lesson_id, quiz, rejected: p.rejected });
  }
  info!(target: "pipeline", lessons = lessons.len(), "Course committed");
  Ok(CourseOutcome { title: draft.title.clone(), lessons })
}

#[cfg(test)]
pub(crate) mod testing {
  use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};

  use async_trait::async_trait;

  use super::*;
  use crate::domain::{Collection, NewQuestion};
  use crate::store::MemoryStore;

  /// Wraps a `MemoryStore` and replays the reads a concurrent writer would see.
  #[derive(Default)]
  pub struct RacyStore {
    pub inner: MemoryStore,
    /// `max_order_index` reports an empty collection this many times.
    pub stale_max_reads: AtomicU32,
    /// `find_collection` reports this counter instead of the real one.
    pub stale_total: Option<u32>,
    pub fail_insert: AtomicBool,
  }

  #[async_trait]
  impl ContentStore for RacyStore {
    async fn find_collection(&self, id: Uuid) -> Result<Option<Collection>, StoreError> {
      let found = self.inner.find_collection(id).await?;
      Ok(found.map(|mut c| {
        if let Some(t) = self.stale_total {
          c.total_questions = t;
        }
        c
      }))
    }

    async fn create_collection(&self, meta: NewCollection) -> Result<Collection, StoreError> {
      self.inner.create_collection(meta).await
    }

    async fn max_order_index(&self, collection_id: Uuid) -> Result<Option<u32>, StoreError> {
      let stale = self
        .stale_max_reads
        .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
        .is_ok();
      if stale {
        return Ok(None);
      }
      self.inner.max_order_index(collection_id).await
    }

    async fn insert_many(&self, records: Vec<NewQuestion>) -> Result<Vec<Question>, StoreError> {
      if self.fail_insert.load(Ordering::SeqCst) {
        return Err(StoreError::Write("disk full".into()));
      }
      self.inner.insert_many(records).await
    }

    async fn write_total_questions(&self, collection_id: Uuid, total: u32) -> Result<(), StoreError> {
      self.inner.write_total_questions(collection_id, total).await
    }

    async fn count_questions(&self, collection_id: Uuid) -> Result<u32, StoreError> {
      self.inner.count_questions(collection_id).await
    }

    async fn list_questions(&self, collection_id: Uuid) -> Result<Vec<Question>, StoreError> {
      self.inner.list_questions(collection_id).await
    }
  }
}

#[cfg(test)]
mod tests {
  use std::sync::atomic::{AtomicU32, Ordering};

  use super::testing::RacyStore;
  use super::*;
  use crate::domain::{LessonDraft, LessonQuizDraft, ModuleDraft, QuestionPayload};
  use crate::error::ErrorKind;
  use crate::store::MemoryStore;

  fn batch(n: usize) -> Vec<CandidateQuestion> {
    (0..n)
      .map(|i| CandidateQuestion::new(format!("Q{i}"), QuestionPayload::TrueFalse { correct_answer: Some(i % 2) }))
      .collect()
  }

  fn defaults() -> PersistenceSettings {
    PersistenceSettings::default()
  }

  async fn existing(store: &MemoryStore) -> Uuid {
    store.create_collection(NewCollection::quiz("Tenses")).await.unwrap().id
  }

  #[tokio::test]
  async fn new_target_is_created_unpublished() {
    let store = MemoryStore::new();
    let out = commit_batch(&store, &defaults(), CommitTarget::New { collection: NewCollection::quiz("Imported") }, batch(3))
      .await
      .unwrap();
    assert_eq!(out.imported_count, 3);
    let c = store.find_collection(out.collection_id).await.unwrap().unwrap();
    assert!(!c.is_published);
    assert_eq!(c.total_questions, 3);
    assert_eq!(out.records.iter().map(|q| q.order_index).collect::<Vec<_>>(), vec![0, 1, 2]);
  }

  #[tokio::test]
  async fn missing_target_is_collection_not_found() {
    let store = MemoryStore::new();
    let id = Uuid::new_v4();
    let err = commit_batch(&store, &defaults(), CommitTarget::Existing { collection_id: id }, batch(1))
      .await
      .unwrap_err();
    assert!(matches!(err, PipelineError::CollectionNotFound(got) if got == id));
  }

  #[tokio::test]
  async fn appends_after_existing_questions() {
    let store = MemoryStore::new();
    let id = existing(&store).await;
    commit_batch(&store, &defaults(), CommitTarget::Existing { collection_id: id }, batch(2)).await.unwrap();
    let out = commit_batch(&store, &defaults(), CommitTarget::Existing { collection_id: id }, batch(2)).await.unwrap();
    assert_eq!(out.records[0].order_index, 2);
    assert_eq!(store.find_collection(id).await.unwrap().unwrap().total_questions, 4);
  }

  #[tokio::test]
  async fn invalid_batch_is_rejected_before_any_write() {
    let store = MemoryStore::new();
    let mut bad = batch(2);
    bad[1].prompt.clear();
    let err = commit_batch(&store, &defaults(), CommitTarget::New { collection: NewCollection::quiz("X") }, bad)
      .await
      .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Validation);
    assert_eq!(err.violations()[0].field, "questions[1].prompt");
  }

  #[tokio::test]
  async fn insert_failure_aborts_whole_batch() {
    let store = RacyStore::default();
    let id = store.create_collection(NewCollection::quiz("Q")).await.unwrap().id;
    store.fail_insert.store(true, Ordering::SeqCst);
    let err = commit_batch(&store, &defaults(), CommitTarget::Existing { collection_id: id }, batch(3))
      .await
      .unwrap_err();
    assert!(matches!(err, PipelineError::Store { stage: CommitStage::InsertBatch, source: StoreError::Write(_) }));
    assert!(err.kind().is_retryable());
    assert_eq!(store.count_questions(id).await.unwrap(), 0);
    assert_eq!(store.find_collection(id).await.unwrap().unwrap().total_questions, 0);
  }

  #[tokio::test]
  async fn accumulate_undercounts_after_a_stale_read() {
    // Accepted limitation: a writer that read the counter before another
    // writer's update overwrites it.
    let mut store = RacyStore::default();
    let id = store.create_collection(NewCollection::quiz("Q")).await.unwrap().id;
    commit_batch(&store, &defaults(), CommitTarget::Existing { collection_id: id }, batch(2)).await.unwrap();

    store.stale_total = Some(0);
    commit_batch(&store, &defaults(), CommitTarget::Existing { collection_id: id }, batch(3)).await.unwrap();
    store.stale_total = None;

    assert_eq!(store.count_questions(id).await.unwrap(), 5);
    assert_eq!(store.find_collection(id).await.unwrap().unwrap().total_questions, 3);
  }

  #[tokio::test]
  async fn recount_policy_survives_a_stale_read() {
    let mut store = RacyStore::default();
    let id = store.create_collection(NewCollection::quiz("Q")).await.unwrap().id;
    let settings = PersistenceSettings { counter_policy: CounterPolicy::Recount, ..defaults() };
    commit_batch(&store, &settings, CommitTarget::Existing { collection_id: id }, batch(2)).await.unwrap();

    store.stale_total = Some(0);
    commit_batch(&store, &settings, CommitTarget::Existing { collection_id: id }, batch(3)).await.unwrap();
    store.stale_total = None;

    assert_eq!(store.find_collection(id).await.unwrap().unwrap().total_questions, 5);
  }

  #[tokio::test]
  async fn stale_maximum_conflicts_without_retries() {
    let store = RacyStore::default();
    let id = store.create_collection(NewCollection::quiz("Q")).await.unwrap().id;
    commit_batch(&store, &defaults(), CommitTarget::Existing { collection_id: id }, batch(2)).await.unwrap();

    store.stale_max_reads.store(1, Ordering::SeqCst);
    let err = commit_batch(&store, &defaults(), CommitTarget::Existing { collection_id: id }, batch(2))
      .await
      .unwrap_err();
    assert!(matches!(err, PipelineError::Store { source: StoreError::Conflict { order_index: 0, .. }, .. }));
    assert_eq!(store.count_questions(id).await.unwrap(), 2);
  }

  #[tokio::test]
  async fn conflict_retry_reallocates() {
    let store = RacyStore { stale_max_reads: AtomicU32::new(0), ..RacyStore::default() };
    let id = store.create_collection(NewCollection::quiz("Q")).await.unwrap().id;
    let settings = PersistenceSettings { max_order_retries: 2, ..defaults() };
    commit_batch(&store, &settings, CommitTarget::Existing { collection_id: id }, batch(2)).await.unwrap();

    store.stale_max_reads.store(1, Ordering::SeqCst);
    let out = commit_batch(&store, &settings, CommitTarget::Existing { collection_id: id }, batch(2)).await.unwrap();
    assert_eq!(out.records.iter().map(|q| q.order_index).collect::<Vec<_>>(), vec![2, 3]);
  }

  fn generated(text: &str, question_type: &str, options: &[&str], answer: serde_json::Value) -> crate::domain::GeneratedQuestion {
    crate::domain::GeneratedQuestion {
      question: text.into(),
      question_type: question_type.into(),
      options: options.iter().map(|o| serde_json::json!(o)).collect(),
      correct_answer: answer,
      explanation: None,
      points: None,
      tags: vec![],
    }
  }

  fn lesson(title: &str, questions: Vec<crate::domain::GeneratedQuestion>) -> LessonDraft {
    LessonDraft {
      title: title.into(),
      content: "Body text. ".repeat(20),
      quiz: Some(LessonQuizDraft { title: format!("{title} Quiz"), duration_minutes: 4, passing_score: 70, questions }),
    }
  }

  fn course(lessons: [Vec<crate::domain::GeneratedQuestion>; 3]) -> CourseDraft {
    let [l1, l2, l3] = lessons;
    CourseDraft {
      title: "Course".into(),
      description: "D".into(),
      modules: vec![
        ModuleDraft { title: "M1".into(), description: "d".into(), lessons: vec![lesson("L1", l1)] },
        ModuleDraft { title: "M2".into(), description: "d".into(), lessons: vec![lesson("L2", l2), lesson("L3", l3)] },
      ],
    }
  }

  fn true_false(text: &str) -> crate::domain::GeneratedQuestion {
    generated(text, "true_false", &[], serde_json::json!(true))
  }

  fn two_valid() -> Vec<crate::domain::GeneratedQuestion> {
    vec![true_false("A?"), true_false("B?")]
  }

  #[tokio::test]
  async fn course_creates_lessons_and_parented_quizzes() {
    let store = MemoryStore::new();
    let out = commit_course(&store, &defaults(), &course([two_valid(), two_valid(), two_valid()])).await.unwrap();
    assert_eq!(out.lessons.len(), 3);
    let last = &out.lessons[2];
    assert_eq!((last.module, last.lesson), (1, 1));
    let quiz = last.quiz.as_ref().unwrap();
    let quiz_c = store.find_collection(quiz.collection_id).await.unwrap().unwrap();
    assert_eq!(quiz_c.parent_id, Some(last.lesson_id));
    assert_eq!(quiz_c.passing_score, Some(70));
    assert_eq!(quiz_c.total_questions, 2);
    let lesson_c = store.find_collection(last.lesson_id).await.unwrap().unwrap();
    assert_eq!(lesson_c.kind, CollectionKind::Lesson);
    assert_eq!(lesson_c.description, "M2");
  }

  #[tokio::test]
  async fn invalid_lesson_question_does_not_abort_the_course() {
    let store = MemoryStore::new();
    let mut l2 = two_valid();
    l2.push(generated("Pick one", "single_choice", &["only"], serde_json::json!(0)));
    let out = commit_course(&store, &defaults(), &course([two_valid(), l2, two_valid()])).await.unwrap();

    assert_eq!(out.lessons.len(), 3);
    let second = &out.lessons[1];
    assert_eq!(second.quiz.as_ref().unwrap().imported_count, 2);
    assert_eq!(second.rejected.len(), 1);
    assert_eq!(second.rejected[0].index, 2);
    assert_eq!(second.rejected[0].violations[0].field, "options");
    assert!(out.lessons[0].rejected.is_empty());
    assert_eq!(out.lessons[2].quiz.as_ref().unwrap().imported_count, 2);
  }

  #[tokio::test]
  async fn lesson_without_valid_questions_keeps_its_lesson() {
    let store = MemoryStore::new();
    let bad = vec![generated("?", "true_false", &[], serde_json::Value::Null)];
    let out = commit_course(&store, &defaults(), &course([two_valid(), bad, two_valid()])).await.unwrap();
    assert!(out.lessons[1].quiz.is_none());
    assert_eq!(out.lessons[1].rejected.len(), 1);
    assert!(store.find_collection(out.lessons[1].lesson_id).await.unwrap().is_some());
  }

  #[tokio::test]
  async fn unconvertible_lesson_quiz_writes_nothing() {
    let store = MemoryStore::new();
    let bad = vec![generated("Q", "essay_prompt", &[], serde_json::json!(0))];
    let draft = course([two_valid(), bad, two_valid()]);
    let err = commit_course(&store, &defaults(), &draft).await.unwrap_err();
    match err {
      PipelineError::Lesson { module, lesson, .. } => assert_eq!((module, lesson), (1, 0)),
      other => panic!("unexpected {other:?}"),
    }
    assert_eq!(store.collection_count().await, 0);
  }
}
