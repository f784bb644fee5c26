//! Generated document parsing, repair and structural validation.
//!
//! Flow:
//! 1) Strict parse of the whole response text.
//! 2) Strip Markdown fences and retry.
//! 3) Extract the outermost `{...}` span and retry.
//! 4) Validate the document shape deterministically before accepting it.
//!
//! Nothing here guesses missing data: a response either maps onto the draft
//! types completely or the attempt fails with a typed error.

use std::collections::BTreeSet;
use std::sync::OnceLock;

use regex::Regex;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::Value;
use tracing::warn;

use crate::domain::{
  CandidateQuestion, CourseDraft, CourseOutline, GeneratedQuestion, GenerationRequest, LessonQuizDraft, MatchPair,
  QuestionPayload, QuestionType, QuizDraft, DEFAULT_POINTS, LESSON_QUIZ_PASSING_SCORE,
};
use crate::error::GenerationError;

fn outer_object_re() -> &'static Regex {
  static RE: OnceLock<Regex> = OnceLock::new();
  RE.get_or_init(|| Regex::new(r"(?s)\{.*\}").expect("static regex"))
}

fn fence_re() -> &'static Regex {
  static RE: OnceLock<Regex> = OnceLock::new();
  RE.get_or_init(|| Regex::new(r"(?s)```(?:json|JSON)?\s*\n?(.*?)```").expect("static regex"))
}

/// Parse untrusted model output into `T`.
pub fn parse_document<T: DeserializeOwned>(raw: &str) -> Result<T, GenerationError> {
  let trimmed = raw.trim();
  let first_err = match serde_json::from_str::<T>(trimmed) {
    Ok(v) => return Ok(v),
    Err(e) => e,
  };

  if let Some(body) = fence_re().captures(trimmed).and_then(|c| c.get(1)) {
    if let Ok(v) = serde_json::from_str::<T>(body.as_str().trim()) {
      return Ok(v);
    }
  }

  if let Some(m) = outer_object_re().find(trimmed) {
    return serde_json::from_str::<T>(m.as_str())
      .map_err(|e| GenerationError::Parse(format!("embedded object did not parse: {}", e)));
  }

  Err(GenerationError::Parse(format!("no JSON document found: {}", first_err)))
}

/// Quiz responses may come back wrapped (`{"questions": [...]}`) or bare.
#[derive(Deserialize)]
#[serde(untagged)]
enum QuizDocument {
  Wrapped(QuizDraft),
  Bare(Vec<GeneratedQuestion>),
}

pub fn parse_quiz(raw: &str) -> Result<QuizDraft, GenerationError> {
  Ok(match parse_document::<QuizDocument>(raw)? {
    QuizDocument::Wrapped(d) => d,
    QuizDocument::Bare(questions) => QuizDraft { title: String::new(), questions },
  })
}

pub fn parse_course(raw: &str) -> Result<CourseDraft, GenerationError> {
  parse_document::<CourseDraft>(raw)
}

/// Shape checks for a quiz-only document. Extra questions are dropped; too few
/// is an error.
pub fn check_quiz(mut draft: QuizDraft, req: &GenerationRequest) -> Result<QuizDraft, GenerationError> {
  check_questions("questions", &mut draft.questions, req.question_count, &req.question_types)?;
  if draft.title.trim().is_empty() {
    draft.title = req.default_title();
  }
  Ok(draft)
}

/// Shape checks for a course document, plus lesson-quiz augmentation.
pub fn check_course(
  mut draft: CourseDraft,
  req: &GenerationRequest,
  outline: &CourseOutline,
  min_lesson_chars: usize,
) -> Result<CourseDraft, GenerationError> {
  if draft.title.trim().is_empty() {
    return Err(GenerationError::structural("course", "title is empty"));
  }
  if draft.description.trim().is_empty() {
    return Err(GenerationError::structural("course", "description is empty"));
  }
  truncate_or_fail("course.modules", &mut draft.modules, outline.module_count)?;

  for (mi, module) in draft.modules.iter_mut().enumerate() {
    let mloc = format!("modules[{}]", mi);
    if module.title.trim().is_empty() {
      return Err(GenerationError::structural(mloc, "title is empty"));
    }
    if module.description.trim().is_empty() {
      return Err(GenerationError::structural(mloc, "description is empty"));
    }
    if module.lessons.is_empty() {
      return Err(GenerationError::structural(mloc, "has no lessons"));
    }
    truncate_or_fail(&format!("{}.lessons", mloc), &mut module.lessons, outline.lessons_per_module)?;

    for (li, lesson) in module.lessons.iter_mut().enumerate() {
      let lloc = format!("modules[{}].lessons[{}]", mi, li);
      if lesson.title.trim().is_empty() {
        return Err(GenerationError::structural(lloc, "title is empty"));
      }
      let chars = lesson.content.trim().chars().count();
      if chars == 0 {
        return Err(GenerationError::structural(lloc, "content is empty"));
      }
      if chars < min_lesson_chars {
        return Err(GenerationError::structural(
          lloc,
          format!("content is {} characters, minimum is {}", chars, min_lesson_chars),
        ));
      }

      if !outline.include_lesson_quizzes {
        lesson.quiz = None;
        continue;
      }
      let mut quiz = lesson
        .quiz
        .take()
        .ok_or_else(|| GenerationError::structural(lloc.clone(), "lesson quiz is missing"))?;
      check_questions(
        &format!("{}.quiz.questions", lloc),
        &mut quiz.questions,
        outline.quiz_questions_per_lesson,
        &req.question_types,
      )?;
      lesson.quiz = Some(LessonQuizDraft {
        title: if quiz.title.trim().is_empty() { format!("{} Quiz", lesson.title.trim()) } else { quiz.title },
        duration_minutes: outline.quiz_duration_minutes(),
        passing_score: LESSON_QUIZ_PASSING_SCORE,
        questions: quiz.questions,
      });
    }
  }
  Ok(draft)
}

fn truncate_or_fail<T>(location: &str, items: &mut Vec<T>, expected: usize) -> Result<(), GenerationError> {
  if items.len() < expected {
    return Err(GenerationError::structural(
      location,
      format!("expected {} entries, got {}", expected, items.len()),
    ));
  }
  if items.len() > expected {
    warn!(target: "pipeline", %location, expected, got = items.len(), "Dropping surplus generated entries");
    items.truncate(expected);
  }
  Ok(())
}

fn check_questions(
  location: &str,
  questions: &mut Vec<GeneratedQuestion>,
  expected: usize,
  allowed: &[QuestionType],
) -> Result<(), GenerationError> {
  truncate_or_fail(location, questions, expected)?;
  for (i, q) in questions.iter().enumerate() {
    let qloc = format!("{}[{}]", location, i);
    if q.question.trim().is_empty() {
      return Err(GenerationError::structural(qloc, "question text is empty"));
    }
    let t: QuestionType = q.question_type.parse().map_err(|e: String| GenerationError::structural(qloc.clone(), e))?;
    if !allowed.is_empty() && !allowed.contains(&t) {
      return Err(GenerationError::structural(qloc, format!("type '{}' was not requested", t)));
    }
  }
  Ok(())
}

/// Map a loosely typed generated question onto the typed payload. Missing or
/// malformed answers become `None` / empty so the validator reports them.
pub fn to_candidate(g: &GeneratedQuestion) -> Result<CandidateQuestion, GenerationError> {
  let t: QuestionType = g
    .question_type
    .parse()
    .map_err(|e: String| GenerationError::structural("question.type", e))?;

  let payload = match t {
    QuestionType::MultipleChoice => QuestionPayload::MultipleChoice {
      options: g.options.iter().map(value_text).collect(),
      correct_answer: value_index(&g.correct_answer),
    },
    QuestionType::SingleChoice => QuestionPayload::SingleChoice {
      options: g.options.iter().map(value_text).collect(),
      correct_answer: value_index(&g.correct_answer),
    },
    QuestionType::TrueFalse => QuestionPayload::TrueFalse { correct_answer: true_false_index(&g.correct_answer) },
    QuestionType::FillBlank => QuestionPayload::FillBlank { correct_answer_text: value_text(&g.correct_answer) },
    QuestionType::Essay => QuestionPayload::Essay { correct_answer_text: value_text(&g.correct_answer) },
    QuestionType::Matching => QuestionPayload::Matching {
      pairs: g.options.iter().map(value_pair).collect(),
      correct_answer: value_list(&g.correct_answer),
    },
    QuestionType::Ordering => QuestionPayload::Ordering {
      items: g.options.iter().map(value_text).collect(),
      correct_answer: value_list(&g.correct_answer),
    },
  };

  Ok(CandidateQuestion {
    explanation: g.explanation.as_deref().map(str::trim).filter(|s| !s.is_empty()).map(String::from),
    points: g.points.unwrap_or(DEFAULT_POINTS),
    tags: g.tags.iter().map(|t| t.trim().to_string()).filter(|t| !t.is_empty()).collect::<BTreeSet<_>>(),
    ..CandidateQuestion::new(g.question.trim(), payload)
  })
}

pub fn to_candidates(questions: &[GeneratedQuestion]) -> Result<Vec<CandidateQuestion>, GenerationError> {
  questions.iter().map(to_candidate).collect()
}

fn value_text(v: &Value) -> String {
  match v {
    Value::String(s) => s.trim().to_string(),
    Value::Number(n) => n.to_string(),
    Value::Bool(b) => b.to_string(),
    _ => String::new(),
  }
}

fn value_index(v: &Value) -> Option<usize> {
  match v {
    Value::Number(n) => n.as_u64().map(|n| n as usize),
    Value::String(s) => s.trim().parse().ok(),
    _ => None,
  }
}

fn true_false_index(v: &Value) -> Option<usize> {
  match v {
    Value::Bool(true) => Some(0),
    Value::Bool(false) => Some(1),
    Value::String(s) if s.trim().eq_ignore_ascii_case("true") => Some(0),
    Value::String(s) if s.trim().eq_ignore_ascii_case("false") => Some(1),
    other => value_index(other),
  }
}

fn value_list(v: &Value) -> Option<Vec<usize>> {
  match v {
    Value::Array(items) => items.iter().map(value_index).collect(),
    _ => None,
  }
}

fn value_pair(v: &Value) -> MatchPair {
  let side = |key: &str| v.get(key).map(value_text).unwrap_or_default();
  MatchPair { left: side("left"), right: side("right") }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::domain::{LessonDraft, ModuleDraft};
  use serde_json::json;

  fn q(kind: &str) -> GeneratedQuestion {
    GeneratedQuestion {
      question: format!("A {} question?", kind),
      question_type: kind.into(),
      options: vec![json!("yes"), json!("no")],
      correct_answer: json!(0),
      explanation: None,
      points: None,
      tags: vec![],
    }
  }

  fn long_text() -> String {
    "The present perfect links a past action to the present moment. ".repeat(3)
  }

  fn course(modules: usize, lessons: usize, quiz_questions: usize) -> CourseDraft {
    CourseDraft {
      title: "Grammar".into(),
      description: "Tenses".into(),
      modules: (0..modules)
        .map(|m| ModuleDraft {
          title: format!("Module {}", m + 1),
          description: "About tenses".into(),
          lessons: (0..lessons)
            .map(|l| LessonDraft {
              title: format!("Lesson {}", l + 1),
              content: long_text(),
              quiz: Some(LessonQuizDraft {
                title: String::new(),
                duration_minutes: 99,
                passing_score: 10,
                questions: (0..quiz_questions).map(|_| q("single_choice")).collect(),
              }),
            })
            .collect(),
        })
        .collect(),
    }
  }

  fn outline(modules: usize, lessons: usize, quizzes: bool, per_lesson: usize) -> CourseOutline {
    CourseOutline {
      module_count: modules,
      lessons_per_module: lessons,
      include_lesson_quizzes: quizzes,
      quiz_questions_per_lesson: per_lesson,
    }
  }

  fn req() -> GenerationRequest {
    GenerationRequest::quiz("Present Perfect", 2, vec![QuestionType::SingleChoice])
  }

  #[test]
  fn strict_parse_of_clean_object() {
    let draft = parse_quiz(r#"{"title":"T","questions":[{"question":"Q","type":"essay","correct_answer":"A"}]}"#).unwrap();
    assert_eq!(draft.questions.len(), 1);
  }

  #[test]
  fn bare_question_array_is_accepted() {
    let draft = parse_quiz(r#"[{"question":"Q","type":"essay","correct_answer":"A"}]"#).unwrap();
    assert_eq!(draft.questions[0].question_type, "essay");
  }

  #[test]
  fn embedded_object_is_extracted_from_prose() {
    let raw = "Sure! Here is your quiz:\n{\"title\":\"T\",\"questions\":[{\"question\":\"Q\",\"type\":\"true_false\",\"correct_answer\":true}]}\nHope this helps.";
    let draft = parse_quiz(raw).unwrap();
    assert_eq!(draft.title, "T");
  }

  #[test]
  fn fenced_json_is_unwrapped() {
    let raw = "```json\n{\"title\":\"Course\",\"description\":\"D\",\"modules\":[]}\n```";
    let draft = parse_course(raw).unwrap();
    assert_eq!(draft.title, "Course");
  }

  #[test]
  fn unparseable_text_is_a_parse_error() {
    assert!(matches!(parse_quiz("I cannot help with that."), Err(GenerationError::Parse(_))));
    assert!(matches!(parse_quiz("prefix {\"title\": oops} suffix"), Err(GenerationError::Parse(_))));
  }

  #[test]
  fn two_by_two_course_yields_four_lessons() {
    let draft = check_course(course(2, 2, 2), &req(), &outline(2, 2, false, 2), 100).unwrap();
    assert_eq!(draft.lesson_count(), 4);
    assert!(draft.modules.iter().flat_map(|m| &m.lessons).all(|l| l.quiz.is_none()));
  }

  #[test]
  fn short_lesson_names_its_location() {
    let mut c = course(2, 2, 2);
    c.modules[1].lessons[0].content = "Too short.".into();
    let err = check_course(c, &req(), &outline(2, 2, false, 2), 100).unwrap_err();
    match err {
      GenerationError::Structural { location, .. } => assert_eq!(location, "modules[1].lessons[0]"),
      other => panic!("unexpected {other:?}"),
    }
  }

  #[test]
  fn module_without_lessons_is_rejected() {
    let mut c = course(1, 1, 0);
    c.modules[0].lessons.clear();
    let err = check_course(c, &req(), &outline(1, 1, false, 1), 100).unwrap_err();
    assert!(matches!(err, GenerationError::Structural { ref location, .. } if location == "modules[0]"));
  }

  #[test]
  fn too_few_modules_is_rejected_and_surplus_is_trimmed() {
    assert!(check_course(course(1, 1, 0), &req(), &outline(2, 1, false, 1), 100).is_err());
    let trimmed = check_course(course(3, 2, 0), &req(), &outline(2, 1, false, 1), 100).unwrap();
    assert_eq!(trimmed.modules.len(), 2);
    assert_eq!(trimmed.lesson_count(), 2);
  }

  #[test]
  fn lesson_quiz_is_augmented() {
    let draft = check_course(course(1, 1, 5), &req(), &outline(1, 1, true, 3), 100).unwrap();
    let quiz = draft.modules[0].lessons[0].quiz.as_ref().unwrap();
    assert_eq!(quiz.questions.len(), 3);
    assert_eq!(quiz.duration_minutes, 6);
    assert_eq!(quiz.passing_score, 70);
    assert_eq!(quiz.title, "Lesson 1 Quiz");
  }

  #[test]
  fn missing_lesson_quiz_is_structural() {
    let mut c = course(1, 1, 3);
    c.modules[0].lessons[0].quiz = None;
    assert!(check_course(c, &req(), &outline(1, 1, true, 3), 100).is_err());
  }

  #[test]
  fn unrequested_type_is_structural() {
    let draft = QuizDraft { title: String::new(), questions: vec![q("single_choice"), q("essay")] };
    let err = check_quiz(draft, &req()).unwrap_err();
    assert!(matches!(err, GenerationError::Structural { ref location, .. } if location == "questions[1]"));
  }

  #[test]
  fn quiz_title_defaults_from_request() {
    let draft = QuizDraft { title: " ".into(), questions: vec![q("single_choice"), q("single_choice")] };
    assert_eq!(check_quiz(draft, &req()).unwrap().title, "Present Perfect");
  }

  #[test]
  fn conversion_maps_loose_answers() {
    let mut tf = q("true_false");
    tf.correct_answer = json!("FALSE");
    let c = to_candidate(&tf).unwrap();
    assert_eq!(c.payload, QuestionPayload::TrueFalse { correct_answer: Some(1) });

    let mut m = q("matching");
    m.options = vec![json!({"left": "cat", "right": "chat"}), json!({"left": "dog", "right": "chien"})];
    m.correct_answer = json!([1, "0"]);
    let c = to_candidate(&m).unwrap();
    match c.payload {
      QuestionPayload::Matching { pairs, correct_answer } => {
        assert_eq!(pairs[1].right, "chien");
        assert_eq!(correct_answer, Some(vec![1, 0]));
      }
      other => panic!("unexpected {other:?}"),
    }

    let mut fb = q("fill_blank");
    fb.correct_answer = json!(" Paris ");
    assert_eq!(
      to_candidate(&fb).unwrap().payload,
      QuestionPayload::FillBlank { correct_answer_text: "Paris".into() }
    );
  }
}
