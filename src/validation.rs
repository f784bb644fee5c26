//! Question-type validator and generation request checks.
//!
//! Both are pure: they inspect their input and return violations, never
//! mutating anything. The question validator is an exhaustive match over
//! `QuestionPayload`, so a new question type does not compile until it has
//! completeness rules here.

use std::collections::HashSet;

use serde::Serialize;

use crate::domain::{
  CandidateQuestion, GenerationRequest, MatchPair, QuestionPayload, LESSON_QUIZ_POOL_SIZE,
};
use crate::error::{ValidationError, Violation};

pub const MIN_QUESTION_COUNT: usize = 1;
pub const MAX_QUESTION_COUNT: usize = 50;
pub const MAX_MODULES: usize = 10;
pub const MAX_LESSONS_PER_MODULE: usize = 10;

/// A batch item the validator refused, with its position in the input.
#[derive(Clone, Debug, Serialize, PartialEq)]
pub struct Rejected {
  pub index: usize,
  pub violations: Vec<Violation>,
}

/// Check one candidate against the completeness rules of its type.
pub fn validate_question(q: &CandidateQuestion) -> Result<(), ValidationError> {
  let mut out = Vec::new();

  if q.prompt.trim().is_empty() {
    out.push(Violation::new("prompt", "must not be empty"));
  }
  if q.points == 0 {
    out.push(Violation::new("points", "must be greater than zero"));
  }

  match &q.payload {
    QuestionPayload::MultipleChoice { options, correct_answer }
    | QuestionPayload::SingleChoice { options, correct_answer } => {
      check_items("options", options, &mut out);
      match correct_answer {
        None => out.push(Violation::new("correct_answer", "must be defined")),
        Some(i) if *i >= options.len() => out.push(Violation::new(
          "correct_answer",
          format!("index {} is out of range for {} options", i, options.len()),
        )),
        Some(_) => {}
      }
    }
    QuestionPayload::TrueFalse { correct_answer } => match correct_answer {
      None => out.push(Violation::new("correct_answer", "must be defined")),
      Some(i) if *i > 1 => out.push(Violation::new("correct_answer", "must be 0 (True) or 1 (False)")),
      Some(_) => {}
    },
    QuestionPayload::FillBlank { correct_answer_text } | QuestionPayload::Essay { correct_answer_text } => {
      if correct_answer_text.trim().is_empty() {
        out.push(Violation::new("correct_answer_text", "must not be empty"));
      }
    }
    QuestionPayload::Matching { pairs, correct_answer } => {
      check_pairs(pairs, &mut out);
      match correct_answer {
        None => out.push(Violation::new("correct_answer", "must be a list of pair indices")),
        Some(list) => {
          if let Some(bad) = list.iter().find(|i| **i >= pairs.len()) {
            out.push(Violation::new(
              "correct_answer",
              format!("pair index {} is out of range for {} pairs", bad, pairs.len()),
            ));
          } else if !is_permutation(list, pairs.len()) {
            out.push(Violation::new(
              "correct_answer",
              format!("must name each of the {} pairs exactly once", pairs.len()),
            ));
          }
        }
      }
    }
    QuestionPayload::Ordering { items, correct_answer } => {
      check_items("items", items, &mut out);
      match correct_answer {
        None => out.push(Violation::new("correct_answer", "must be a list of item indices")),
        Some(list) if !is_permutation(list, items.len()) => out.push(Violation::new(
          "correct_answer",
          format!("must be a permutation of 0..{}", items.len()),
        )),
        Some(_) => {}
      }
    }
  }

  if out.is_empty() {
    Ok(())
  } else {
    Err(ValidationError { violations: out })
  }
}

pub fn is_complete(q: &CandidateQuestion) -> bool {
  validate_question(q).is_ok()
}

/// Split a batch into accepted candidates and rejections. Rejections never
/// affect their siblings.
pub fn partition<I>(items: I) -> (Vec<CandidateQuestion>, Vec<Rejected>)
where
  I: IntoIterator<Item = (usize, CandidateQuestion)>,
{
  let mut accepted = Vec::new();
  let mut rejected = Vec::new();
  for (index, q) in items {
    match validate_question(&q) {
      Ok(()) => accepted.push(q),
      Err(e) => rejected.push(Rejected { index, violations: e.violations }),
    }
  }
  (accepted, rejected)
}

/// Validate every question of a buffer, prefixing fields with their index.
pub fn validate_all(questions: &[CandidateQuestion]) -> Result<(), ValidationError> {
  let violations: Vec<Violation> = questions
    .iter()
    .enumerate()
    .filter_map(|(i, q)| validate_question(q).err().map(|e| (i, e)))
    .flat_map(|(i, e)| {
      e.violations
        .into_iter()
        .map(move |v| Violation::new(format!("questions[{}].{}", i, v.field), v.reason))
    })
    .collect();
  if violations.is_empty() {
    Ok(())
  } else {
    Err(ValidationError { violations })
  }
}

/// Local field validation of a generation request, run before any call out.
pub fn validate_request(req: &GenerationRequest) -> Result<(), ValidationError> {
  let mut out = Vec::new();

  if req.topic.trim().is_empty() {
    out.push(Violation::new("topic", "must not be empty"));
  }
  if req.question_types.is_empty() {
    out.push(Violation::new("question_types", "at least one question type is required"));
  }
  if !(MIN_QUESTION_COUNT..=MAX_QUESTION_COUNT).contains(&req.question_count) {
    out.push(Violation::new(
      "question_count",
      format!("must be between {} and {}", MIN_QUESTION_COUNT, MAX_QUESTION_COUNT),
    ));
  }
  if req.language.trim().is_empty() {
    out.push(Violation::new("language", "must not be empty"));
  }

  if let Some(course) = &req.course {
    if !(1..=MAX_MODULES).contains(&course.module_count) {
      out.push(Violation::new("course.module_count", format!("must be between 1 and {}", MAX_MODULES)));
    }
    if !(1..=MAX_LESSONS_PER_MODULE).contains(&course.lessons_per_module) {
      out.push(Violation::new(
        "course.lessons_per_module",
        format!("must be between 1 and {}", MAX_LESSONS_PER_MODULE),
      ));
    }
    if course.include_lesson_quizzes && !(1..=LESSON_QUIZ_POOL_SIZE).contains(&course.quiz_questions_per_lesson) {
      out.push(Violation::new(
        "course.quiz_questions_per_lesson",
        format!("must be between 1 and {}", LESSON_QUIZ_POOL_SIZE),
      ));
    }
  }

  if out.is_empty() {
    Ok(())
  } else {
    Err(ValidationError { violations: out })
  }
}

fn check_items(field: &str, items: &[String], out: &mut Vec<Violation>) {
  if items.len() < 2 {
    out.push(Violation::new(field, format!("at least 2 required, got {}", items.len())));
  }
  for (i, item) in items.iter().enumerate() {
    if item.trim().is_empty() {
      out.push(Violation::new(format!("{}[{}]", field, i), "must not be empty"));
    }
  }
}

fn check_pairs(pairs: &[MatchPair], out: &mut Vec<Violation>) {
  if pairs.len() < 2 {
    out.push(Violation::new("pairs", format!("at least 2 required, got {}", pairs.len())));
  }
  for (i, p) in pairs.iter().enumerate() {
    if p.left.trim().is_empty() {
      out.push(Violation::new(format!("pairs[{}].left", i), "must not be empty"));
    }
    if p.right.trim().is_empty() {
      out.push(Violation::new(format!("pairs[{}].right", i), "must not be empty"));
    }
  }
}

fn is_permutation(list: &[usize], len: usize) -> bool {
  if list.len() != len {
    return false;
  }
  let seen: HashSet<usize> = list.iter().copied().filter(|i| *i < len).collect();
  seen.len() == len
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::domain::{CourseOutline, QuestionType};

  fn choice(options: &[&str], answer: Option<usize>) -> CandidateQuestion {
    CandidateQuestion::new(
      "Pick one",
      QuestionPayload::SingleChoice { options: options.iter().map(|s| s.to_string()).collect(), correct_answer: answer },
    )
  }

  fn fields(e: &ValidationError) -> Vec<&str> {
    e.violations.iter().map(|v| v.field.as_str()).collect()
  }

  #[test]
  fn choice_accepts_iff_two_nonempty_options_and_valid_index() {
    let cases: Vec<(Vec<&str>, Option<usize>, bool)> = vec![
      (vec!["a", "b"], Some(0), true),
      (vec!["a", "b", "c", "d"], Some(3), true),
      (vec!["a"], Some(0), false),
      (vec![], None, false),
      (vec!["a", " "], Some(0), false),
      (vec!["a", "b"], Some(2), false),
      (vec!["a", "b"], None, false),
    ];
    for (opts, answer, ok) in cases {
      let mc = CandidateQuestion::new(
        "Pick",
        QuestionPayload::MultipleChoice { options: opts.iter().map(|s| s.to_string()).collect(), correct_answer: answer },
      );
      assert_eq!(validate_question(&choice(&opts, answer)).is_ok(), ok, "single {:?} {:?}", opts, answer);
      assert_eq!(validate_question(&mc).is_ok(), ok, "multiple {:?} {:?}", opts, answer);
    }
  }

  #[test]
  fn empty_option_is_reported_with_its_index() {
    let err = validate_question(&choice(&["a", "", "c"], Some(0))).unwrap_err();
    assert_eq!(fields(&err), vec!["options[1]"]);
  }

  #[test]
  fn true_false_needs_zero_or_one() {
    let ok = CandidateQuestion::new("Sky is blue", QuestionPayload::TrueFalse { correct_answer: Some(1) });
    let missing = CandidateQuestion::new("Sky is blue", QuestionPayload::TrueFalse { correct_answer: None });
    let bad = CandidateQuestion::new("Sky is blue", QuestionPayload::TrueFalse { correct_answer: Some(2) });
    assert!(validate_question(&ok).is_ok());
    assert!(validate_question(&missing).is_err());
    assert!(validate_question(&bad).is_err());
  }

  #[test]
  fn text_types_need_answer_text() {
    let blank = CandidateQuestion::new("Capital of France?", QuestionPayload::FillBlank { correct_answer_text: " ".into() });
    let essay = CandidateQuestion::new("Discuss", QuestionPayload::Essay { correct_answer_text: "Mentions both wars".into() });
    assert_eq!(fields(&validate_question(&blank).unwrap_err()), vec!["correct_answer_text"]);
    assert!(validate_question(&essay).is_ok());
  }

  #[test]
  fn matching_requires_populated_pairs_and_list_answer() {
    let pairs = vec![
      MatchPair { left: "Paris".into(), right: "France".into() },
      MatchPair { left: "Rome".into(), right: "".into() },
    ];
    let q = CandidateQuestion::new("Match", QuestionPayload::Matching { pairs, correct_answer: None });
    let err = validate_question(&q).unwrap_err();
    assert_eq!(fields(&err), vec!["pairs[1].right", "correct_answer"]);
  }

  #[test]
  fn matching_answer_names_every_pair_once() {
    let pairs = vec![
      MatchPair { left: "cat".into(), right: "chat".into() },
      MatchPair { left: "dog".into(), right: "chien".into() },
    ];
    let with = |answer: Vec<usize>| {
      CandidateQuestion::new("Match", QuestionPayload::Matching { pairs: pairs.clone(), correct_answer: Some(answer) })
    };
    assert!(validate_question(&with(vec![1, 0])).is_ok());
    for answer in [vec![], vec![0, 0], vec![0], vec![0, 1, 1]] {
      let err = validate_question(&with(answer.clone())).unwrap_err();
      assert_eq!(fields(&err), vec!["correct_answer"], "answer {answer:?}");
    }
  }

  #[test]
  fn ordering_answer_must_be_a_permutation() {
    let items: Vec<String> = vec!["first".into(), "second".into(), "third".into()];
    let good = CandidateQuestion::new(
      "Order",
      QuestionPayload::Ordering { items: items.clone(), correct_answer: Some(vec![2, 0, 1]) },
    );
    let dup = CandidateQuestion::new(
      "Order",
      QuestionPayload::Ordering { items, correct_answer: Some(vec![0, 0, 1]) },
    );
    assert!(validate_question(&good).is_ok());
    assert!(validate_question(&dup).is_err());
  }

  #[test]
  fn validator_never_mutates_input() {
    let q = choice(&["", "b"], None);
    let before = q.clone();
    let _ = validate_question(&q);
    assert_eq!(q, before);
  }

  #[test]
  fn partition_keeps_valid_siblings() {
    let (ok, rejected) = partition(vec![
      (0, choice(&["a", "b"], Some(1))),
      (1, choice(&["a"], Some(0))),
      (2, choice(&["x", "y"], Some(0))),
    ]);
    assert_eq!(ok.len(), 2);
    assert_eq!(rejected.len(), 1);
    assert_eq!(rejected[0].index, 1);
  }

  #[test]
  fn validate_all_prefixes_question_index() {
    let err = validate_all(&[choice(&["a", "b"], Some(0)), choice(&["a", "b"], None)]).unwrap_err();
    assert_eq!(fields(&err), vec!["questions[1].correct_answer"]);
  }

  #[test]
  fn request_rejects_empty_topic_and_types() {
    let req = GenerationRequest::quiz("  ", 5, vec![]);
    let err = validate_request(&req).unwrap_err();
    assert_eq!(fields(&err), vec!["topic", "question_types"]);
  }

  #[test]
  fn request_count_bounds() {
    let mut req = GenerationRequest::quiz("Fractions", 50, vec![QuestionType::SingleChoice]);
    assert!(validate_request(&req).is_ok());
    req.question_count = 51;
    assert!(validate_request(&req).is_err());
    req.question_count = 0;
    assert!(validate_request(&req).is_err());
  }

  #[test]
  fn lesson_quiz_size_is_capped_by_template_pool() {
    let mut req = GenerationRequest::quiz("Fractions", 5, vec![QuestionType::SingleChoice]);
    req.course = Some(CourseOutline {
      module_count: 1,
      lessons_per_module: 1,
      include_lesson_quizzes: true,
      quiz_questions_per_lesson: LESSON_QUIZ_POOL_SIZE + 1,
    });
    let err = validate_request(&req).unwrap_err();
    assert_eq!(fields(&err), vec!["course.quiz_questions_per_lesson"]);
  }
}
