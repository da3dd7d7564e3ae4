//! Welcome-screen input checks, run before any AI call.

use std::sync::OnceLock;

use regex::Regex;

use crate::domain::ExamRequest;
use crate::error::ExamError;

pub const MIN_TRANSCRIPT_CHARS: usize = 50;

fn video_url_re() -> &'static Regex {
  static RE: OnceLock<Regex> = OnceLock::new();
  RE.get_or_init(|| {
    Regex::new(
      r"^(?:https?://)?(?:www\.|m\.)?(?:youtube\.com/(?:watch\?(?:.*&)?v=|shorts/|embed/|live/)|youtu\.be/)[A-Za-z0-9_-]{6,}(?:[?&#].*)?$",
    )
    .expect("video URL pattern compiles")
  })
}

/// True when `url` points at a recognized video host.
pub fn is_video_url(url: &str) -> bool {
  video_url_re().is_match(url.trim())
}

/// Both checks must pass; the first failing one is reported.
pub fn validate_request(req: &ExamRequest) -> Result<(), ExamError> {
  if !is_video_url(&req.video_url) {
    return Err(ExamError::Validation("Please enter a valid YouTube video URL.".into()));
  }
  let len = req.transcript.trim().chars().count();
  if len < MIN_TRANSCRIPT_CHARS {
    return Err(ExamError::Validation(format!(
      "The transcript must be at least {MIN_TRANSCRIPT_CHARS} characters long (got {len})."
    )));
  }
  Ok(())
}
