//! Offline fallback content.
//!
//! Produces the same draft shapes the generation service returns, from fixed
//! templates, so callers never branch on where content came from. Output is
//! deterministic: the RNG is seeded from config, or from the request itself.

use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use serde_json::{json, Value};

use crate::domain::{
  CourseDraft, CourseOutline, GeneratedQuestion, GenerationRequest, LessonDraft, LessonQuizDraft, ModuleDraft,
  QuestionType, QuizDraft, LESSON_QUIZ_PASSING_SCORE, LESSON_QUIZ_POOL_SIZE,
};
use crate::error::GenerationError;

const LESSON_SENTENCES: [&str; 4] = [
  "Start by reading the key terms out loud and writing a one-line definition for each of them.",
  "Then work through the worked example step by step, pausing to predict the next step before reading it.",
  "Compare the example with a situation from your own experience and note where the two differ.",
  "Finish by summarising the lesson in three sentences without looking back at the text.",
];

#[derive(Clone, Debug, Default)]
pub struct FallbackGenerator {
  seed: Option<u64>,
}

impl FallbackGenerator {
  pub fn new(seed: Option<u64>) -> Self {
    Self { seed }
  }

  fn rng_for(&self, req: &GenerationRequest) -> StdRng {
    StdRng::seed_from_u64(self.seed.unwrap_or_else(|| request_seed(req)))
  }

  pub fn quiz(&self, req: &GenerationRequest) -> QuizDraft {
    let mut rng = self.rng_for(req);
    let types = requested_types(req);
    let topic = req.topic.trim();
    let mut questions: Vec<GeneratedQuestion> = (0..req.question_count)
      .map(|i| template_question(types[i % types.len()], topic, i))
      .collect();
    questions.shuffle(&mut rng);
    QuizDraft { title: format!("{} Quiz", req.default_title()), questions }
  }

  pub fn course(
    &self,
    req: &GenerationRequest,
    outline: &CourseOutline,
    min_lesson_chars: usize,
  ) -> Result<CourseDraft, GenerationError> {
    if outline.include_lesson_quizzes && outline.quiz_questions_per_lesson > LESSON_QUIZ_POOL_SIZE {
      return Err(GenerationError::structural(
        "course.lessons.quiz",
        format!(
          "{} questions per lesson requested, the offline pool holds {}",
          outline.quiz_questions_per_lesson, LESSON_QUIZ_POOL_SIZE
        ),
      ));
    }

    let mut rng = self.rng_for(req);
    let types = requested_types(req);
    let topic = req.topic.trim();

    let modules = (0..outline.module_count)
      .map(|m| {
        let module_title = format!("{}: Part {}", topic, m + 1);
        let lessons = (0..outline.lessons_per_module)
          .map(|l| {
            let title = format!("{} - Lesson {}.{}", topic, m + 1, l + 1);
            let quiz = outline.include_lesson_quizzes.then(|| {
              let pool = lesson_pool(&types, topic, m * outline.lessons_per_module + l);
              let mut questions: Vec<GeneratedQuestion> = pool
                .choose_multiple(&mut rng, outline.quiz_questions_per_lesson)
                .cloned()
                .collect();
              questions.shuffle(&mut rng);
              LessonQuizDraft {
                title: format!("{} Quiz", title),
                duration_minutes: outline.quiz_duration_minutes(),
                passing_score: LESSON_QUIZ_PASSING_SCORE,
                questions,
              }
            });
            LessonDraft { content: lesson_content(topic, &module_title, l + 1, min_lesson_chars), title, quiz }
          })
          .collect();
        ModuleDraft {
          description: format!("Part {} of the {} course, covering the core ideas in order.", m + 1, topic),
          title: module_title,
          lessons,
        }
      })
      .collect();

    Ok(CourseDraft {
      title: format!("{} Course", req.default_title()),
      description: format!("A {} introduction to {} in {}.", req.difficulty.as_str(), topic, req.language),
      modules,
    })
  }
}

/// FNV-1a over subject and topic.
fn request_seed(req: &GenerationRequest) -> u64 {
  let mut h: u64 = 0xcbf2_9ce4_8422_2325;
  for b in req.subject.trim().bytes().chain([0u8]).chain(req.topic.trim().bytes()) {
    h ^= b as u64;
    h = h.wrapping_mul(0x0100_0000_01b3);
  }
  h
}

fn requested_types(req: &GenerationRequest) -> Vec<QuestionType> {
  let mut out = Vec::with_capacity(req.question_types.len());
  for t in &req.question_types {
    if !out.contains(t) {
      out.push(*t);
    }
  }
  if out.is_empty() {
    out.push(QuestionType::SingleChoice);
  }
  out
}

fn lesson_pool(types: &[QuestionType], topic: &str, lesson_no: usize) -> Vec<GeneratedQuestion> {
  (0..LESSON_QUIZ_POOL_SIZE)
    .map(|i| template_question(types[i % types.len()], topic, lesson_no * LESSON_QUIZ_POOL_SIZE + i))
    .collect()
}

fn lesson_content(topic: &str, module_title: &str, lesson_no: usize, min_chars: usize) -> String {
  let mut text = format!("Lesson {} of \"{}\" looks at one building block of {}. ", lesson_no, module_title, topic);
  for s in LESSON_SENTENCES {
    text.push_str(s);
    text.push(' ');
  }
  let mut i = 0;
  while text.trim_end().chars().count() < min_chars {
    text.push_str(LESSON_SENTENCES[i % LESSON_SENTENCES.len()]);
    text.push(' ');
    i += 1;
  }
  text.trim_end().to_string()
}

fn template_question(t: QuestionType, topic: &str, n: usize) -> GeneratedQuestion {
  let no = n + 1;
  let (question, options, correct_answer, explanation) = match t {
    QuestionType::MultipleChoice | QuestionType::SingleChoice => {
      let right = n % 4;
      let mut options: Vec<Value> = (0..4).map(|k| json!(format!("Distractor {} about {}", k + 1, topic))).collect();
      options[right] = json!(format!("The statement about {} taught in section {}", topic, no));
      (
        format!("Which option best matches section {} on {}?", no, topic),
        options,
        json!(right),
        format!("Section {} states this directly.", no),
      )
    }
    QuestionType::TrueFalse => (
      format!("Statement {}: {} was covered in this material.", no, topic),
      vec![json!("True"), json!("False")],
      json!(if n % 2 == 0 { 0 } else { 1 }),
      "Check the summary at the end of the lesson.".to_string(),
    ),
    QuestionType::FillBlank => (
      format!("Complete the sentence: the first step when studying {} (item {}) is to ____ the key terms.", topic, no),
      Vec::new(),
      json!("define"),
      "Defining terms comes before practice.".to_string(),
    ),
    QuestionType::Essay => (
      format!("In a short paragraph, explain how you would apply {} in a real situation (prompt {}).", topic, no),
      Vec::new(),
      json!(format!("Mentions a concrete situation, applies {} correctly, and explains the outcome.", topic)),
      "Graded against the rubric.".to_string(),
    ),
    QuestionType::Matching => (
      format!("Match each activity with its purpose when studying {} (set {}).", topic, no),
      vec![
        json!({"left": "Read", "right": "Meet the ideas"}),
        json!({"left": "Practise", "right": "Build fluency"}),
        json!({"left": "Review", "right": "Keep what you learned"}),
      ],
      json!([0, 1, 2]),
      "Each activity supports one stage of learning.".to_string(),
    ),
    QuestionType::Ordering => (
      format!("Put these study steps for {} in order (set {}).", topic, no),
      vec![json!("Apply it to a new problem"), json!("Learn the definition"), json!("Practise with examples")],
      json!([1, 2, 0]),
      "Definitions first, then practice, then transfer.".to_string(),
    ),
  };
  GeneratedQuestion {
    question,
    question_type: t.as_str().to_string(),
    options,
    correct_answer,
    explanation: Some(explanation),
    points: None,
    tags: vec![topic.to_lowercase()],
  }
}
