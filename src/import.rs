//! Import adapter: flat bulk rows (JSON or CSV) -> typed candidate questions.
//!
//! Only rows marked `valid` by the upstream pre-check are considered. This
//! module maps fields; completeness is `validation.rs`'s job.

use serde::{Deserialize, Deserializer, Serialize};
use tracing::{debug, instrument};

use crate::domain::{CandidateQuestion, MatchPair, QuestionPayload, QuestionType, DEFAULT_POINTS};
use crate::error::ValidationError;
use crate::util::split_list;
use crate::validation::Rejected;

/// One flat record from a bulk upload. Every field is text-ish; numbers are accepted too.
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq)]
pub struct ImportRow {
  #[serde(default)]
  pub status: String,
  #[serde(rename = "type", default)]
  pub question_type: String,
  #[serde(default)]
  pub question: String,
  #[serde(default, deserialize_with = "loose_string")]
  pub option_a: Option<String>,
  #[serde(default, deserialize_with = "loose_string")]
  pub option_b: Option<String>,
  #[serde(default, deserialize_with = "loose_string")]
  pub option_c: Option<String>,
  #[serde(default, deserialize_with = "loose_string")]
  pub option_d: Option<String>,
  #[serde(default, deserialize_with = "loose_string")]
  pub correct_answer: Option<String>,
  #[serde(default, deserialize_with = "loose_string")]
  pub correct_answer_text: Option<String>,
  #[serde(default, deserialize_with = "loose_string")]
  pub explanation: Option<String>,
  #[serde(default, deserialize_with = "loose_string")]
  pub points: Option<String>,
  #[serde(default, deserialize_with = "loose_string")]
  pub tags: Option<String>,
}

impl ImportRow {
  pub fn is_valid(&self) -> bool {
    self.status.trim().eq_ignore_ascii_case("valid")
  }

  fn option_slots(&self) -> [Option<&str>; 4] {
    [&self.option_a, &self.option_b, &self.option_c, &self.option_d].map(|o| o.as_deref())
  }
}

/// Spreadsheet exports mix strings, numbers and booleans in the same column.
fn loose_string<'de, D>(d: D) -> Result<Option<String>, D::Error>
where
  D: Deserializer<'de>,
{
  #[derive(Deserialize)]
  #[serde(untagged)]
  enum Loose {
    S(String),
    U(u64),
    I(i64),
    F(f64),
    B(bool),
  }
  Ok(Option::<Loose>::deserialize(d)?.map(|v| match v {
    Loose::S(s) => s,
    Loose::U(n) => n.to_string(),
    Loose::I(n) => n.to_string(),
    Loose::F(n) => n.to_string(),
    Loose::B(b) => b.to_string(),
  }))
}

/// Rows that survived the status filter and mapped onto a payload, keyed by input position.
#[derive(Debug, Default)]
pub struct NormalizedRows {
  pub candidates: Vec<(usize, CandidateQuestion)>,
  /// Rows that could not be mapped at all (unknown type, bad points).
  pub rejected: Vec<Rejected>,
  /// Rows skipped because their status was not `valid`.
  pub skipped: usize,
}

#[instrument(level = "debug", target = "pipeline", skip(rows), fields(rows = rows.len()))]
pub fn normalize_rows(rows: &[ImportRow]) -> NormalizedRows {
  let mut out = NormalizedRows::default();
  for (index, row) in rows.iter().enumerate() {
    if !row.is_valid() {
      out.skipped += 1;
      continue;
    }
    match normalize_row(row) {
      Ok(c) => out.candidates.push((index, c)),
      Err(e) => out.rejected.push(Rejected { index, violations: e.violations }),
    }
  }
  debug!(target: "pipeline", mapped = out.candidates.len(), rejected = out.rejected.len(), skipped = out.skipped, "Normalized import rows");
  out
}

pub fn normalize_row(row: &ImportRow) -> Result<CandidateQuestion, ValidationError> {
  let t: QuestionType = row
    .question_type
    .parse()
    .map_err(|e: String| ValidationError::single("type", e))?;

  let payload = match t {
    QuestionType::MultipleChoice => {
      let (options, correct_answer) = choice_fields(row);
      QuestionPayload::MultipleChoice { options, correct_answer }
    }
    QuestionType::SingleChoice => {
      let (options, correct_answer) = choice_fields(row);
      QuestionPayload::SingleChoice { options, correct_answer }
    }
    QuestionType::TrueFalse => QuestionPayload::TrueFalse {
      correct_answer: answer_text(row).and_then(|a| match a.to_ascii_lowercase().as_str() {
        "true" => Some(0),
        "false" => Some(1),
        _ => None,
      }),
    },
    QuestionType::FillBlank => QuestionPayload::FillBlank { correct_answer_text: answer_text(row).unwrap_or_default() },
    QuestionType::Essay => QuestionPayload::Essay { correct_answer_text: answer_text(row).unwrap_or_default() },
    QuestionType::Matching => QuestionPayload::Matching {
      pairs: filled_slots(row)
        .map(|s| match s.split_once('|') {
          Some((l, r)) => MatchPair { left: l.trim().to_string(), right: r.trim().to_string() },
          None => MatchPair { left: s.to_string(), right: String::new() },
        })
        .collect(),
      correct_answer: index_list(row.correct_answer.as_deref()),
    },
    QuestionType::Ordering => QuestionPayload::Ordering {
      items: filled_slots(row).map(String::from).collect(),
      correct_answer: index_list(row.correct_answer.as_deref()),
    },
  };

  let points = match row.points.as_deref().map(str::trim).filter(|s| !s.is_empty()) {
    None => DEFAULT_POINTS,
    Some(p) => p
      .parse::<u32>()
      .map_err(|_| ValidationError::single("points", format!("'{}' is not a whole number", p)))?,
  };

  Ok(CandidateQuestion {
    explanation: row.explanation.as_deref().map(str::trim).filter(|s| !s.is_empty()).map(String::from),
    points,
    tags: row.tags.as_deref().map(|t| split_list(t, ',')).unwrap_or_default().into_iter().collect(),
    ..CandidateQuestion::new(row.question.trim(), payload)
  })
}

fn filled_slots(row: &ImportRow) -> impl Iterator<Item = &str> {
  row.option_slots().into_iter().flatten().map(str::trim).filter(|s| !s.is_empty())
}

/// Non-empty options in declared order, and the answer mapped onto that compacted list.
/// Letters (`A`..`D`) and numbers (`0`..`3`) both name a slot; an answer naming an
/// empty slot maps to `None`, one past the last slot stays out of range.
fn choice_fields(row: &ImportRow) -> (Vec<String>, Option<usize>) {
  let slots = row.option_slots();
  let filled: Vec<bool> = slots.iter().map(|s| s.map(str::trim).is_some_and(|s| !s.is_empty())).collect();
  let options: Vec<String> = filled_slots(row).map(String::from).collect();

  let answer = row.correct_answer.as_deref().map(str::trim).and_then(|a| {
    let mut chars = a.chars();
    let slot = match (chars.next(), chars.next()) {
      (Some(c), None) if c.is_ascii_alphabetic() => (c.to_ascii_uppercase() as u8).checked_sub(b'A')? as usize,
      _ => a.parse::<usize>().ok()?,
    };
    match filled.get(slot).copied() {
      Some(true) => Some(filled[..slot].iter().filter(|f| **f).count()),
      Some(false) => None,
      None => Some(options.len() + slot - filled.len()),
    }
  });
  (options, answer)
}

fn answer_text(row: &ImportRow) -> Option<String> {
  row
    .correct_answer_text
    .as_deref()
    .or(row.correct_answer.as_deref())
    .map(str::trim)
    .filter(|s| !s.is_empty())
    .map(String::from)
}

fn index_list(raw: Option<&str>) -> Option<Vec<usize>> {
  let parts = split_list(raw?, ',');
  if parts.is_empty() {
    return None;
  }
  parts.iter().map(|p| p.parse::<usize>().ok()).collect()
}

/// Parse a CSV upload whose header row uses the `ImportRow` field names.
pub fn parse_csv(text: &str) -> Result<Vec<ImportRow>, ValidationError> {
  let mut reader = csv::ReaderBuilder::new()
    .flexible(true)
    .has_headers(true)
    .trim(csv::Trim::Headers)
    .from_reader(text.as_bytes());

  let mut rows = Vec::new();
  for (i, record) in reader.deserialize::<ImportRow>().enumerate() {
    let row = record.map_err(|e| ValidationError::single(format!("rows[{}]", i), e.to_string()))?;
    rows.push(row);
  }
  Ok(rows)
}
