//! Small utility helpers used across modules.

/// Very small and safe string templating.
/// Replaces occurrences of `{key}` in the template with provided values.
/// This is intentionally simple (no nested/conditional logic).
pub fn fill_template(tpl: &str, pairs: &[(&str, &str)]) -> String {
  let mut out = tpl.to_string();
  for (k, v) in pairs {
    let needle = format!("{{{}}}", k);
    out = out.replace(&needle, v);
  }
  out
}

/// Split a delimited cell into trimmed, non-empty parts.
pub fn split_list(s: &str, sep: char) -> Vec<String> {
  s.split(sep)
    .map(|t| t.trim().to_string())
    .filter(|t| !t.is_empty())
    .collect()
}

/// Log-safe truncation for large strings.
/// Avoids spamming logs with huge request/response payloads.
pub fn trunc_for_log(s: &str, max: usize) -> String {
  if s.chars().count() <= max {
    s.to_string()
  } else {
    let head: String = s.chars().take(max).collect();
    format!("{}… ({} bytes total)", head, s.len())
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn fill_template_replaces_every_occurrence() {
    let out = fill_template("{topic} / {count} / {topic}", &[("topic", "Rust"), ("count", "3")]);
    assert_eq!(out, "Rust / 3 / Rust");
  }

  #[test]
  fn split_list_drops_blank_entries() {
    assert_eq!(split_list(" grammar, ,tenses ,", ','), vec!["grammar", "tenses"]);
  }

  #[test]
  fn trunc_for_log_respects_char_boundaries() {
    let s = "日本語のテキスト";
    let t = trunc_for_log(s, 3);
    assert!(t.starts_with("日本語…"));
  }
}
