//! Generation adapter: request -> prompt -> live call (or offline fallback) ->
//! parse/repair -> structural checks -> draft.
//!
//! A live failure is reported as-is. The fallback is only used when the adapter
//! runs offline, never to paper over a failed live call.

use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use tracing::{info, instrument, warn};

use crate::config::{AppConfig, GenerationSettings, Prompts};
use crate::document::{check_course, check_quiz, parse_course, parse_quiz};
use crate::domain::{ContentSource, CourseDraft, CourseOutline, GeneratedContent, GenerationRequest, QuizDraft};
use crate::error::GenerationError;
use crate::openai::OpenAI;
use crate::prompt::{build_course_prompt, build_quiz_prompt, Prompt};
use crate::seeds::FallbackGenerator;
use crate::util::trunc_for_log;

/// Anything that turns a prompt into raw model text.
#[async_trait]
pub trait TextGenerator: Send + Sync {
  fn name(&self) -> &str;
  async fn generate(&self, prompt: &Prompt) -> Result<String, GenerationError>;
}

#[derive(Clone)]
pub struct GenerationAdapter {
  live: Option<Arc<dyn TextGenerator>>,
  fallback: FallbackGenerator,
  prompts: Prompts,
  timeout: Duration,
  min_lesson_chars: usize,
}

impl GenerationAdapter {
  pub fn new(live: Option<Arc<dyn TextGenerator>>, prompts: Prompts, settings: &GenerationSettings) -> Self {
    Self {
      live: if settings.offline { None } else { live },
      fallback: FallbackGenerator::new(settings.fallback_seed),
      prompts,
      timeout: settings.timeout(),
      min_lesson_chars: settings.min_lesson_chars,
    }
  }

  /// Live OpenAI generator when a key is configured and offline mode is off.
  pub fn from_config(cfg: &AppConfig) -> Self {
    let settings = &cfg.generation;
    let live = OpenAI::from_env(settings.timeout(), settings.temperature);
    match (&live, settings.offline) {
      (Some(oa), false) => {
        info!(target: "quizforge_backend", base_url = %oa.base_url, model = %oa.model, "OpenAI enabled.")
      }
      (_, true) => info!(target: "quizforge_backend", "Offline mode: using the fallback generator."),
      (None, false) => {
        info!(target: "quizforge_backend", "OpenAI disabled (no OPENAI_API_KEY). Using the fallback generator.")
      }
    }
    let live = live.map(|oa| Arc::new(oa) as Arc<dyn TextGenerator>);
    Self::new(live, cfg.prompts.clone(), settings)
  }

  #[cfg(test)]
  pub fn with_timeout(mut self, timeout: Duration) -> Self {
    self.timeout = timeout;
    self
  }

  pub fn is_live(&self) -> bool {
    self.live.is_some()
  }

  /// Dispatch on the request shape: course when an outline is present, quiz otherwise.
  pub async fn generate(
    &self,
    req: &GenerationRequest,
    cancel: &CancellationToken,
  ) -> Result<GeneratedContent, GenerationError> {
    match &req.course {
      Some(outline) => {
        let (source, draft) = self.generate_course(req, outline, cancel).await?;
        Ok(GeneratedContent::Course { source, draft })
      }
      None => {
        let (source, draft) = self.generate_quiz(req, cancel).await?;
        Ok(GeneratedContent::Quiz { source, draft })
      }
    }
  }

  #[instrument(level = "info", target = "pipeline", skip(self, req, cancel), fields(topic = %req.topic, count = req.question_count))]
  pub async fn generate_quiz(
    &self,
    req: &GenerationRequest,
    cancel: &CancellationToken,
  ) -> Result<(ContentSource, QuizDraft), GenerationError> {
    let Some(live) = &self.live else {
      if cancel.is_cancelled() {
        return Err(GenerationError::Cancelled);
      }
      let draft = check_quiz(self.fallback.quiz(req), req)?;
      info!(target: "pipeline", questions = draft.questions.len(), "Fallback quiz generated");
      return Ok((ContentSource::Fallback, draft));
    };

    let prompt = build_quiz_prompt(&self.prompts, req);
    let raw = self.call(live.as_ref(), &prompt, cancel).await?;
    let draft = parse_quiz(&raw).and_then(|d| check_quiz(d, req)).map_err(|e| {
      warn!(target: "pipeline", error = %e, response = %trunc_for_log(&raw, 200), "Rejected generated quiz");
      e
    })?;
    info!(target: "pipeline", questions = draft.questions.len(), "Generated quiz accepted");
    Ok((ContentSource::Generated, draft))
  }

  #[instrument(
    level = "info",
    target = "pipeline",
    skip(self, req, outline, cancel),
    fields(topic = %req.topic, modules = outline.module_count, lessons = outline.lessons_per_module)
  )]
  pub async fn generate_course(
    &self,
    req: &GenerationRequest,
    outline: &CourseOutline,
    cancel: &CancellationToken,
  ) -> Result<(ContentSource, CourseDraft), GenerationError> {
    let Some(live) = &self.live else {
      if cancel.is_cancelled() {
        return Err(GenerationError::Cancelled);
      }
      let draft = self.fallback.course(req, outline, self.min_lesson_chars)?;
      let draft = check_course(draft, req, outline, self.min_lesson_chars)?;
      info!(target: "pipeline", lessons = draft.lesson_count(), "Fallback course generated");
      return Ok((ContentSource::Fallback, draft));
    };

    let prompt = build_course_prompt(&self.prompts, req, outline, self.min_lesson_chars);
    let raw = self.call(live.as_ref(), &prompt, cancel).await?;
    let draft = parse_course(&raw)
      .and_then(|d| check_course(d, req, outline, self.min_lesson_chars))
      .map_err(|e| {
        warn!(target: "pipeline", error = %e, response = %trunc_for_log(&raw, 200), "Rejected generated course");
        e
      })?;
    info!(target: "pipeline", lessons = draft.lesson_count(), "Generated course accepted");
    Ok((ContentSource::Generated, draft))
  }

  /// One live call, bounded by the timeout and abandoned on cancellation.
  async fn call(
    &self,
    live: &dyn TextGenerator,
    prompt: &Prompt,
    cancel: &CancellationToken,
  ) -> Result<String, GenerationError> {
    let start = Instant::now();
    let result = tokio::select! {
      _ = cancel.cancelled() => Err(GenerationError::Cancelled),
      r = tokio::time::timeout(self.timeout, live.generate(prompt)) => match r {
        Ok(inner) => inner,
        Err(_) => Err(GenerationError::Timeout(self.timeout)),
      },
    };
    match &result {
      Ok(text) => info!(target: "pipeline", generator = live.name(), elapsed = ?start.elapsed(), response_len = text.len(), "Generation call finished"),
      Err(e) => warn!(target: "pipeline", generator = live.name(), elapsed = ?start.elapsed(), error = %e, "Generation call failed"),
    }
    result
  }
}
