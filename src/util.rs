//! Small utility helpers used across modules.

/// Very small and safe string templating.
/// Replaces occurrences of `{key}` in the template with provided values in a single pass,
/// so substituted text is never scanned again (no nested/conditional logic).
pub fn fill_template(tpl: &str, pairs: &[(&str, &str)]) -> String {
  let mut out = String::with_capacity(tpl.len());
  let mut rest = tpl;
  while let Some(open) = rest.find('{') {
    out.push_str(&rest[..open]);
    let tail = &rest[open..];
    let value = tail[1..].find('}').and_then(|close| {
      let key = &tail[1..1 + close];
      pairs.iter().find(|(k, _)| *k == key).map(|(_, v)| (*v, close + 2))
    });
    match value {
      Some((v, consumed)) => {
        out.push_str(v);
        rest = &tail[consumed..];
      }
      None => {
        out.push('{');
        rest = &tail[1..];
      }
    }
  }
  out.push_str(rest);
  out
}

/// Log-safe preview of user text: first `max` chars, never the whole transcript.
pub fn preview(s: &str, max: usize) -> String {
  let mut out: String = s.chars().take(max).collect();
  if s.chars().count() > max {
    out.push('…');
  }
  out
}
