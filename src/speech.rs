//! Live speech-transcript capture for the speaking section.
//!
//! The browser runs the recognizer and streams snapshots to us. A snapshot is either
//! interim (replaces the previous interim text) or final (committed to the buffer).
//! `stop` is the only cancellation point: it folds the last interim snapshot into the
//! buffer and every snapshot that arrives afterwards is ignored.

use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, Deserialize, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct TranscriptSnapshot {
  pub text: String,
  #[serde(default)]
  pub is_final: bool,
}

#[derive(Clone, Debug, Default)]
pub struct Recorder {
  recording: bool,
  committed: String,
  interim: String,
}

fn join(a: &str, b: &str) -> String {
  match (a.trim(), b.trim()) {
    ("", b) => b.to_string(),
    (a, "") => a.to_string(),
    (a, b) => format!("{a} {b}"),
  }
}

impl Recorder {
  pub fn is_recording(&self) -> bool {
    self.recording
  }

  /// Current buffer as the user would see it, interim text included.
  pub fn text(&self) -> String {
    join(&self.committed, &self.interim)
  }

  /// Begin capture. Anything already in the buffer is kept as a prefix.
  /// Returns false if capture was already running.
  pub fn start(&mut self) -> bool {
    if self.recording {
      return false;
    }
    self.recording = true;
    self.interim.clear();
    true
  }

  /// Apply one snapshot. Returns false when not recording (the snapshot is dropped).
  pub fn push(&mut self, snapshot: &TranscriptSnapshot) -> bool {
    if !self.recording {
      return false;
    }
    if snapshot.is_final {
      self.committed = join(&self.committed, &snapshot.text);
      self.interim.clear();
    } else {
      self.interim = snapshot.text.clone();
    }
    true
  }

  /// Freeze the buffer for editing and return it.
  pub fn stop(&mut self) -> String {
    self.committed = self.text();
    self.interim.clear();
    self.recording = false;
    self.committed.clone()
  }

  /// Manual edit of a stopped buffer. Returns false while capture is running.
  pub fn edit(&mut self, text: &str) -> bool {
    if self.recording {
      return false;
    }
    self.committed = text.to_string();
    true
  }

  /// Stop if needed, hand back the buffer, and reset for the next question.
  pub fn take(&mut self) -> String {
    let text = self.stop();
    self.committed.clear();
    text
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  fn interim(t: &str) -> TranscriptSnapshot {
    TranscriptSnapshot { text: t.into(), is_final: false }
  }
  fn fin(t: &str) -> TranscriptSnapshot {
    TranscriptSnapshot { text: t.into(), is_final: true }
  }

  #[test]
  fn interim_snapshots_replace_each_other() {
    let mut r = Recorder::default();
    r.start();
    r.push(&interim("I like"));
    r.push(&interim("I like reading"));
    assert_eq!(r.text(), "I like reading");
  }

  #[test]
  fn final_snapshots_accumulate() {
    let mut r = Recorder::default();
    r.start();
    r.push(&fin("I like reading."));
    r.push(&interim("Mostly"));
    assert_eq!(r.text(), "I like reading. Mostly");
    r.push(&fin("Mostly novels."));
    assert_eq!(r.text(), "I like reading. Mostly novels.");
  }

  #[test]
  fn stop_keeps_last_interim_and_ignores_later_snapshots() {
    let mut r = Recorder::default();
    r.start();
    r.push(&interim("half a sentence"));
    assert_eq!(r.stop(), "half a sentence");
    assert!(!r.push(&fin("too late")));
    assert_eq!(r.text(), "half a sentence");
  }

  #[test]
  fn edits_only_when_stopped() {
    let mut r = Recorder::default();
    r.start();
    assert!(!r.edit("nope"));
    r.stop();
    assert!(r.edit("fixed text"));
    assert_eq!(r.text(), "fixed text");
  }

  #[test]
  fn restart_keeps_buffer_as_prefix() {
    let mut r = Recorder::default();
    r.start();
    r.push(&fin("First part."));
    r.stop();
    assert!(r.start());
    assert!(!r.start());
    r.push(&fin("Second part."));
    assert_eq!(r.take(), "First part. Second part.");
    assert_eq!(r.text(), "");
    assert!(!r.is_recording());
  }
}
