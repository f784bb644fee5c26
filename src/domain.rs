//! Domain models: question types and payloads, collections, generation
//! requests and the drafts produced by the generation adapter.

use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// Literal options every true/false question carries, whatever its language.
pub const TRUE_FALSE_OPTIONS: [&str; 2] = ["True", "False"];

pub const DEFAULT_POINTS: u32 = 10;

/// Passing threshold attached to every generated lesson quiz.
pub const LESSON_QUIZ_PASSING_SCORE: u8 = 70;

/// Size of the per-lesson question template pool used by the offline generator.
/// Lesson quizzes can never ask for more questions than this.
pub const LESSON_QUIZ_POOL_SIZE: usize = 10;

/// Closed set of supported question kinds.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "snake_case")]
pub enum QuestionType {
  MultipleChoice,
  SingleChoice,
  TrueFalse,
  FillBlank,
  Essay,
  Matching,
  Ordering,
}

impl QuestionType {
  pub const ALL: [QuestionType; 7] = [
    QuestionType::MultipleChoice,
    QuestionType::SingleChoice,
    QuestionType::TrueFalse,
    QuestionType::FillBlank,
    QuestionType::Essay,
    QuestionType::Matching,
    QuestionType::Ordering,
  ];

  pub fn as_str(self) -> &'static str {
    match self {
      QuestionType::MultipleChoice => "multiple_choice",
      QuestionType::SingleChoice => "single_choice",
      QuestionType::TrueFalse => "true_false",
      QuestionType::FillBlank => "fill_blank",
      QuestionType::Essay => "essay",
      QuestionType::Matching => "matching",
      QuestionType::Ordering => "ordering",
    }
  }
}

impl fmt::Display for QuestionType {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.as_str())
  }
}

impl FromStr for QuestionType {
  type Err = String;

  /// Accepts the canonical snake_case names plus the spellings bulk files tend to use.
  fn from_str(s: &str) -> Result<Self, Self::Err> {
    let norm = s.trim().to_lowercase().replace(&['-', ' '][..], "_");
    match norm.as_str() {
      "multiple_choice" | "multiplechoice" | "mcq" => Ok(QuestionType::MultipleChoice),
      "single_choice" | "singlechoice" => Ok(QuestionType::SingleChoice),
      "true_false" | "truefalse" | "boolean" => Ok(QuestionType::TrueFalse),
      "fill_blank" | "fill_in_the_blank" | "fill_in_blank" => Ok(QuestionType::FillBlank),
      "essay" => Ok(QuestionType::Essay),
      "matching" => Ok(QuestionType::Matching),
      "ordering" => Ok(QuestionType::Ordering),
      _ => {
        let known: Vec<&str> = QuestionType::ALL.iter().map(|t| t.as_str()).collect();
        Err(format!("unknown question type '{}' (expected one of {})", s.trim(), known.join(", ")))
      }
    }
  }
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct MatchPair {
  pub left: String,
  pub right: String,
}

/// Correct answer as stored for each question kind.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(untagged)]
pub enum CorrectAnswer {
  Index(usize),
  Text(String),
  List(Vec<usize>),
}

/// Type-specific part of a question. The variant is the question type, so a
/// payload can never disagree with its tag.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum QuestionPayload {
  MultipleChoice {
    options: Vec<String>,
    #[serde(default)]
    correct_answer: Option<usize>,
  },
  SingleChoice {
    options: Vec<String>,
    #[serde(default)]
    correct_answer: Option<usize>,
  },
  /// `0` = "True", `1` = "False".
  TrueFalse {
    #[serde(default)]
    correct_answer: Option<usize>,
  },
  FillBlank {
    #[serde(default)]
    correct_answer_text: String,
  },
  /// `correct_answer_text` holds the rubric or a sample answer.
  Essay {
    #[serde(default)]
    correct_answer_text: String,
  },
  Matching {
    pairs: Vec<MatchPair>,
    #[serde(default)]
    correct_answer: Option<Vec<usize>>,
  },
  Ordering {
    items: Vec<String>,
    #[serde(default)]
    correct_answer: Option<Vec<usize>>,
  },
}

impl QuestionPayload {
  pub fn question_type(&self) -> QuestionType {
    match self {
      QuestionPayload::MultipleChoice { .. } => QuestionType::MultipleChoice,
      QuestionPayload::SingleChoice { .. } => QuestionType::SingleChoice,
      QuestionPayload::TrueFalse { .. } => QuestionType::TrueFalse,
      QuestionPayload::FillBlank { .. } => QuestionType::FillBlank,
      QuestionPayload::Essay { .. } => QuestionType::Essay,
      QuestionPayload::Matching { .. } => QuestionType::Matching,
      QuestionPayload::Ordering { .. } => QuestionType::Ordering,
    }
  }

  pub fn correct_answer(&self) -> Option<CorrectAnswer> {
    match self {
      QuestionPayload::MultipleChoice { correct_answer, .. }
      | QuestionPayload::SingleChoice { correct_answer, .. }
      | QuestionPayload::TrueFalse { correct_answer } => correct_answer.map(CorrectAnswer::Index),
      QuestionPayload::FillBlank { correct_answer_text } | QuestionPayload::Essay { correct_answer_text } => {
        Some(CorrectAnswer::Text(correct_answer_text.clone()))
      }
      QuestionPayload::Matching { correct_answer, .. } | QuestionPayload::Ordering { correct_answer, .. } => {
        correct_answer.clone().map(CorrectAnswer::List)
      }
    }
  }

  /// Options as presented to a learner. True/false always materializes the
  /// literal English pair.
  pub fn options(&self) -> Vec<Value> {
    match self {
      QuestionPayload::MultipleChoice { options, .. } | QuestionPayload::SingleChoice { options, .. } => {
        options.iter().cloned().map(Value::String).collect()
      }
      QuestionPayload::TrueFalse { .. } => TRUE_FALSE_OPTIONS.iter().map(|s| Value::String(s.to_string())).collect(),
      QuestionPayload::FillBlank { .. } | QuestionPayload::Essay { .. } => Vec::new(),
      QuestionPayload::Matching { pairs, .. } => pairs
        .iter()
        .map(|p| serde_json::json!({ "left": p.left, "right": p.right }))
        .collect(),
      QuestionPayload::Ordering { items, .. } => items.iter().cloned().map(Value::String).collect(),
    }
  }

  /// Legacy single-column row view. Text answers move to `correct_answer_text`
  /// and leave the placeholder `0` in the shared numeric slot.
  pub fn to_flat(&self) -> FlatAnswer {
    let (correct_answer, correct_answer_text) = match self.correct_answer() {
      Some(CorrectAnswer::Index(i)) => (Value::from(i), None),
      Some(CorrectAnswer::List(list)) => (Value::from(list), None),
      Some(CorrectAnswer::Text(text)) => (Value::from(0), Some(text)),
      None => (Value::Null, None),
    };
    FlatAnswer {
      question_type: self.question_type(),
      options: self.options(),
      correct_answer,
      correct_answer_text,
    }
  }
}

/// Flat `options` / `correct_answer` / `correct_answer_text` columns.
#[derive(Clone, Debug, Serialize, PartialEq)]
pub struct FlatAnswer {
  #[serde(rename = "type")]
  pub question_type: QuestionType,
  pub options: Vec<Value>,
  pub correct_answer: Value,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub correct_answer_text: Option<String>,
}

/// A not-yet-persisted question produced by either ingestion path.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct CandidateQuestion {
  pub prompt: String,
  pub payload: QuestionPayload,
  #[serde(default)]
  pub explanation: Option<String>,
  #[serde(default = "default_points")]
  pub points: u32,
  #[serde(default)]
  pub tags: BTreeSet<String>,
  #[serde(default)]
  pub is_published: bool,
}

fn default_points() -> u32 {
  DEFAULT_POINTS
}

impl CandidateQuestion {
  pub fn new(prompt: impl Into<String>, payload: QuestionPayload) -> Self {
    Self {
      prompt: prompt.into(),
      payload,
      explanation: None,
      points: DEFAULT_POINTS,
      tags: BTreeSet::new(),
      is_published: false,
    }
  }
}

/// A candidate with its allocated position, ready for `insert_many`.
#[derive(Clone, Debug, PartialEq)]
pub struct NewQuestion {
  pub collection_id: Uuid,
  pub order_index: u32,
  pub body: CandidateQuestion,
}

/// Persisted question.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct Question {
  pub id: Uuid,
  pub collection_id: Uuid,
  pub order_index: u32,
  #[serde(flatten)]
  pub body: CandidateQuestion,
  pub created_at: DateTime<Utc>,
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum CollectionKind {
  Quiz,
  Lesson,
}

/// A quiz or lesson: the ordered parent of questions.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct Collection {
  pub id: Uuid,
  pub kind: CollectionKind,
  pub title: String,
  pub description: String,
  #[serde(default)]
  pub content: Option<String>,
  #[serde(default)]
  pub parent_id: Option<Uuid>,
  #[serde(default)]
  pub duration_minutes: Option<u32>,
  #[serde(default)]
  pub passing_score: Option<u8>,
  pub is_published: bool,
  pub total_questions: u32,
  pub created_at: DateTime<Utc>,
}

/// Caller-supplied metadata for a collection created by the pipeline.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct NewCollection {
  #[serde(default = "default_kind")]
  pub kind: CollectionKind,
  pub title: String,
  #[serde(default)]
  pub description: String,
  #[serde(default)]
  pub content: Option<String>,
  #[serde(default)]
  pub parent_id: Option<Uuid>,
  #[serde(default)]
  pub duration_minutes: Option<u32>,
  #[serde(default)]
  pub passing_score: Option<u8>,
}

fn default_kind() -> CollectionKind {
  CollectionKind::Quiz
}

impl NewCollection {
  pub fn quiz(title: impl Into<String>) -> Self {
    Self {
      kind: CollectionKind::Quiz,
      title: title.into(),
      description: String::new(),
      content: None,
      parent_id: None,
      duration_minutes: None,
      passing_score: None,
    }
  }
}

/// Where a batch of questions is committed.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum CommitTarget {
  Existing { collection_id: Uuid },
  New { collection: NewCollection },
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum Difficulty {
  Easy,
  #[default]
  Medium,
  Hard,
}

impl Difficulty {
  pub fn as_str(self) -> &'static str {
    match self {
      Difficulty::Easy => "easy",
      Difficulty::Medium => "medium",
      Difficulty::Hard => "hard",
    }
  }
}

/// Course shape requested on top of the question settings.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct CourseOutline {
  pub module_count: usize,
  pub lessons_per_module: usize,
  #[serde(default)]
  pub include_lesson_quizzes: bool,
  #[serde(default = "default_quiz_questions")]
  pub quiz_questions_per_lesson: usize,
}

fn default_quiz_questions() -> usize {
  3
}

impl CourseOutline {
  /// Minutes allotted to each lesson quiz.
  pub fn quiz_duration_minutes(&self) -> u32 {
    (self.quiz_questions_per_lesson as u32 * 2).max(2)
  }
}

/// Ephemeral input to the generation adapter. Never persisted.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct GenerationRequest {
  #[serde(default)]
  pub subject: String,
  pub topic: String,
  #[serde(default = "default_question_count")]
  pub question_count: usize,
  #[serde(default)]
  pub difficulty: Difficulty,
  #[serde(default = "default_language")]
  pub language: String,
  #[serde(default)]
  pub question_types: Vec<QuestionType>,
  #[serde(default)]
  pub instructions: Option<String>,
  #[serde(default)]
  pub style: Option<String>,
  #[serde(default)]
  pub depth: Option<String>,
  /// Present for full-course generation; absent for quiz-only.
  #[serde(default)]
  pub course: Option<CourseOutline>,
}

fn default_question_count() -> usize {
  10
}

fn default_language() -> String {
  "English".into()
}

impl GenerationRequest {
  #[cfg(test)]
  pub fn quiz(topic: impl Into<String>, question_count: usize, question_types: Vec<QuestionType>) -> Self {
    Self {
      subject: String::new(),
      topic: topic.into(),
      question_count,
      difficulty: Difficulty::Medium,
      language: default_language(),
      question_types,
      instructions: None,
      style: None,
      depth: None,
      course: None,
    }
  }

  /// Title given to a quiz created from this request.
  pub fn default_title(&self) -> String {
    if self.subject.trim().is_empty() {
      self.topic.trim().to_string()
    } else {
      format!("{}: {}", self.subject.trim(), self.topic.trim())
    }
  }
}

/// Question as emitted by the generation service or the fallback generator:
/// loosely typed, converted into a `CandidateQuestion` after structural checks.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct GeneratedQuestion {
  pub question: String,
  #[serde(rename = "type")]
  pub question_type: String,
  #[serde(default)]
  pub options: Vec<Value>,
  #[serde(default)]
  pub correct_answer: Value,
  #[serde(default)]
  pub explanation: Option<String>,
  #[serde(default)]
  pub points: Option<u32>,
  #[serde(default)]
  pub tags: Vec<String>,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct QuizDraft {
  #[serde(default)]
  pub title: String,
  pub questions: Vec<GeneratedQuestion>,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct LessonQuizDraft {
  #[serde(default)]
  pub title: String,
  #[serde(default)]
  pub duration_minutes: u32,
  #[serde(default)]
  pub passing_score: u8,
  pub questions: Vec<GeneratedQuestion>,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct LessonDraft {
  pub title: String,
  pub content: String,
  #[serde(default)]
  pub quiz: Option<LessonQuizDraft>,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct ModuleDraft {
  pub title: String,
  pub description: String,
  #[serde(default)]
  pub lessons: Vec<LessonDraft>,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct CourseDraft {
  pub title: String,
  pub description: String,
  #[serde(default)]
  pub modules: Vec<ModuleDraft>,
}

impl CourseDraft {
  pub fn lesson_count(&self) -> usize {
    self.modules.iter().map(|m| m.lessons.len()).sum()
  }
}

/// Where generated content came from.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ContentSource {
  Generated,
  Fallback,
}

#[derive(Clone, Debug, Serialize, PartialEq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum GeneratedContent {
  Quiz { source: ContentSource, draft: QuizDraft },
  Course { source: ContentSource, draft: CourseDraft },
}
