//! Loading authoring configuration (prompts + generation/persistence knobs) from TOML.
//!
//! Every table and field is optional; see `AppConfig` for the schema.
//!
//! ```toml
//! [generation]
//! offline = true
//! timeout_secs = 30
//!
//! [persistence]
//! counter_policy = "recount"
//! max_order_retries = 3
//! ```

use std::time::Duration;

use serde::Deserialize;
use tracing::{error, info};

#[derive(Clone, Debug, Deserialize, Default)]
pub struct AppConfig {
  #[serde(default)]
  pub prompts: Prompts,
  #[serde(default)]
  pub generation: GenerationSettings,
  #[serde(default)]
  pub persistence: PersistenceSettings,
}

/// Prompts sent to the generation service. `{placeholders}` are filled by `prompt.rs`.
#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct Prompts {
  pub quiz_system: String,
  pub quiz_user_template: String,
  pub course_system: String,
  pub course_user_template: String,
  pub lesson_quiz_template: String,
}

impl Default for Prompts {
  fn default() -> Self {
    Self {
      quiz_system: "You are an assessment author for an e-learning platform. Respond ONLY with one strict JSON document, no prose, no Markdown.".into(),
      quiz_user_template: "Write {count} {difficulty} quiz questions in {language} about '{topic}'{subject_clause}.\nAllowed question types: {types}.\nStyle: {style}. Depth: {depth}.\n{instructions}\n\nReturn JSON exactly of this shape:\n{schema}".into(),
      course_system: "You are a senior instructional designer. Respond ONLY with one strict JSON document, no prose, no Markdown.".into(),
      course_user_template: "Design a {difficulty} course in {language} about '{topic}'{subject_clause}.\nIt must have exactly {module_count} modules with exactly {lessons_per_module} lessons each.\nEvery lesson body must be at least {min_lesson_chars} characters of teaching content.\nStyle: {style}. Depth: {depth}.\n{quiz_block}\n{instructions}\n\nReturn JSON exactly of this shape:\n{schema}".into(),
      lesson_quiz_template: "Every lesson must include a \"quiz\" with exactly {quiz_count} questions using only these types: {types}.".into(),
    }
  }
}

#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct GenerationSettings {
  /// Always use the local fallback generator, even with an API key.
  pub offline: bool,
  pub timeout_secs: u64,
  pub temperature: f32,
  pub min_lesson_chars: usize,
  /// Fixed RNG seed for the fallback generator (reproducible demos).
  pub fallback_seed: Option<u64>,
}

impl Default for GenerationSettings {
  fn default() -> Self {
    Self {
      offline: false,
      timeout_secs: 60,
      temperature: 0.7,
      min_lesson_chars: 100,
      fallback_seed: None,
    }
  }
}

impl GenerationSettings {
  pub fn timeout(&self) -> Duration {
    Duration::from_secs(self.timeout_secs.max(1))
  }
}

/// How `total_questions` is maintained after an insert.
#[derive(Clone, Copy, Debug, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum CounterPolicy {
  /// Read the stored counter, add the inserted count, write it back.
  #[default]
  Accumulate,
  /// Write the live question count of the collection.
  Recount,
}

#[derive(Clone, Debug, Deserialize, Default)]
#[serde(default)]
pub struct PersistenceSettings {
  pub counter_policy: CounterPolicy,
  /// Re-allocate and retry this many times when the store reports an
  /// order_index conflict. Zero keeps plain read-then-assign.
  pub max_order_retries: u32,
}

pub fn parse_config(s: &str) -> Result<AppConfig, toml::de::Error> {
  toml::from_str::<AppConfig>(s)
}

/// Attempt to load `AppConfig` from AUTHORING_CONFIG_PATH. On any parsing/IO error, returns None.
pub fn load_app_config_from_env() -> Option<AppConfig> {
  let path = std::env::var("AUTHORING_CONFIG_PATH").ok()?;
  match std::fs::read_to_string(&path) {
    Ok(s) => match parse_config(&s) {
      Ok(cfg) => {
        info!(target: "quizforge_backend", %path, "Loaded authoring config (TOML)");
        Some(cfg)
      }
      Err(e) => {
        error!(target: "quizforge_backend", %path, error = %e, "Failed to parse TOML config");
        None
      }
    },
    Err(e) => {
      error!(target: "quizforge_backend", %path, error = %e, "Failed to read TOML config file");
      None
    }
  }
}
