//! Prompt construction for the generation service.
//!
//! Prompts are a pure function of the request and the configured templates.
//! They embed the exact JSON shape expected back so `document.rs` can map the
//! response one-to-one onto `QuizDraft` / `CourseDraft`.

use crate::config::Prompts;
use crate::domain::{CourseOutline, GenerationRequest, QuestionType};
use crate::util::fill_template;

/// System + user message pair sent to the text generator.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Prompt {
  pub system: String,
  pub user: String,
}

pub const QUESTION_SCHEMA: &str = r#"{"question": string, "type": one of the allowed types, "options": array, "correct_answer": see rules, "explanation": string, "points": integer, "tags": [string]}
Rules per type:
- multiple_choice / single_choice: "options" = 2-4 non-empty strings, "correct_answer" = zero-based index of the right option
- true_false: "options" = ["True","False"], "correct_answer" = 0 for True or 1 for False
- fill_blank: "options" = [], "correct_answer" = the missing word(s) as a string
- essay: "options" = [], "correct_answer" = a short rubric or model answer as a string
- matching: "options" = [{"left": string, "right": string}, ...] (at least 2), "correct_answer" = array of pair indices
- ordering: "options" = items in shuffled order (at least 2), "correct_answer" = array of item indices in the correct order"#;

pub const QUIZ_SCHEMA: &str = r#"{"title": string, "questions": [QUESTION, ...]}"#;

pub const COURSE_SCHEMA: &str = r#"{"title": string, "description": string, "modules": [{"title": string, "description": string, "lessons": [{"title": string, "content": string, "quiz": {"title": string, "questions": [QUESTION, ...]}}]}]}"#;

pub fn build_quiz_prompt(prompts: &Prompts, req: &GenerationRequest) -> Prompt {
  let count = req.question_count.to_string();
  let types = types_list(&req.question_types);
  let schema = format!("{}\nwhere QUESTION is {}", QUIZ_SCHEMA, QUESTION_SCHEMA);
  let user = fill_template(
    &prompts.quiz_user_template,
    &[
      ("count", &count),
      ("difficulty", req.difficulty.as_str()),
      ("language", &req.language),
      ("topic", req.topic.trim()),
      ("subject_clause", &subject_clause(req)),
      ("types", &types),
      ("style", req.style.as_deref().unwrap_or("clear and neutral")),
      ("depth", req.depth.as_deref().unwrap_or("standard")),
      ("instructions", &instructions_line(req)),
      ("schema", &schema),
    ],
  );
  Prompt { system: prompts.quiz_system.clone(), user }
}

pub fn build_course_prompt(
  prompts: &Prompts,
  req: &GenerationRequest,
  outline: &CourseOutline,
  min_lesson_chars: usize,
) -> Prompt {
  let types = types_list(&req.question_types);
  let quiz_block = if outline.include_lesson_quizzes {
    fill_template(
      &prompts.lesson_quiz_template,
      &[("quiz_count", &outline.quiz_questions_per_lesson.to_string()), ("types", &types)],
    )
  } else {
    "Do not include a \"quiz\" field in lessons.".to_string()
  };
  let schema = format!("{}\nwhere QUESTION is {}", COURSE_SCHEMA, QUESTION_SCHEMA);
  let user = fill_template(
    &prompts.course_user_template,
    &[
      ("difficulty", req.difficulty.as_str()),
      ("language", &req.language),
      ("topic", req.topic.trim()),
      ("subject_clause", &subject_clause(req)),
      ("module_count", &outline.module_count.to_string()),
      ("lessons_per_module", &outline.lessons_per_module.to_string()),
      ("min_lesson_chars", &min_lesson_chars.to_string()),
      ("style", req.style.as_deref().unwrap_or("clear and neutral")),
      ("depth", req.depth.as_deref().unwrap_or("standard")),
      ("quiz_block", &quiz_block),
      ("instructions", &instructions_line(req)),
      ("schema", &schema),
    ],
  );
  Prompt { system: prompts.course_system.clone(), user }
}

/// Requested types in request order, duplicates removed.
fn types_list(types: &[QuestionType]) -> String {
  let mut seen = Vec::with_capacity(types.len());
  for t in types {
    if !seen.contains(t) {
      seen.push(*t);
    }
  }
  seen.iter().map(|t| t.as_str()).collect::<Vec<_>>().join(", ")
}

fn subject_clause(req: &GenerationRequest) -> String {
  if req.subject.trim().is_empty() {
    String::new()
  } else {
    format!(" (subject: {})", req.subject.trim())
  }
}

fn instructions_line(req: &GenerationRequest) -> String {
  match req.instructions.as_deref().map(str::trim) {
    Some(s) if !s.is_empty() => format!("Additional author instructions: {}", s),
    _ => String::new(),
  }
}
