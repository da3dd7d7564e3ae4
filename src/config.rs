//! Loading exam configuration (prompt templates) from TOML.
//!
//! See `ExamConfig` and `Prompts` for expected schema. Every field is optional in the file;
//! missing prompts fall back to the built-in defaults.

use serde::Deserialize;
use tracing::{error, info};

#[derive(Clone, Debug, Deserialize, Default)]
pub struct ExamConfig {
  #[serde(default)]
  pub prompts: Prompts,
}

/// Prompts used by the AI gateway.
///
/// Placeholders: `{test_type}`, `{sections}`, `{video_url}`, `{transcript}` for generation;
/// `{test_type}`, `{transcript}`, `{test_json}`, `{answers_json}` for evaluation;
/// `{weak_criteria}` for the practice plan.
#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct Prompts {
  pub test_system: String,
  pub test_user_template: String,
  pub evaluation_system: String,
  pub evaluation_user_template: String,
  pub practice_system: String,
  pub practice_user_template: String,
}

impl Default for Prompts {
  fn default() -> Self {
    Self {
      test_system: "You are a senior IELTS examiner who writes official-standard mock exams. Respond ONLY with JSON matching the provided schema.".into(),
      test_user_template: "Create an IELTS {test_type} mock exam based on the video at {video_url}.\n\
        Generate content ONLY for these sections: {sections}. Every other section must be present but empty \
        (empty strings, empty arrays, chart type \"table\" with empty title and data).\n\
        Listening: 10 questions answerable from the transcript, each with its correct answer.\n\
        Reading: an academic passage of about 700 words inspired by the transcript, with 10 questions and answers.\n\
        Writing: Task 1 describes a chart (type bar, line, pie or table; for tables give CSV with a header row), \
        Task 2 is an opinion or discussion essay prompt on the video's theme.\n\
        Speaking: Part 1 interview questions, one Part 2 cue card with topic and 3-4 points, Part 3 discussion questions.\n\n\
        Transcript:\n{transcript}".into(),
      evaluation_system: "You are a strict, fair IELTS examiner. Score with official band descriptors. Respond ONLY with JSON matching the provided schema.".into(),
      evaluation_user_template: "Evaluate this IELTS {test_type} attempt.\n\
        Do NOT score Listening or Reading: their answer key is shown to the candidate separately.\n\
        For Writing and Speaking give a band score and feedback for each official criterion \
        (Task Achievement/Response, Coherence and Cohesion, Lexical Resource, Grammatical Range and Accuracy; \
        Fluency and Coherence, Lexical Resource, Grammatical Range and Accuracy, Pronunciation), \
        plus one criterion per assessed skill named exactly \"Writing\" or \"Speaking\".\n\
        Rewrite each Writing task and each Speaking answer as a Band 7.5 model answer that keeps the candidate's ideas. \
        Leave rewrites empty for sections that were not taken.\n\n\
        Source transcript:\n{transcript}\n\nTest (JSON):\n{test_json}\n\nCandidate answers (JSON):\n{answers_json}".into(),
      practice_system: "You are an IELTS coach who designs short, targeted practice. Respond ONLY with JSON matching the provided schema.".into(),
      practice_user_template: "The candidate scored below Band 7.5 on these criteria (JSON):\n{weak_criteria}\n\n\
        Create EXACTLY three practice items that target these weaknesses. Each item has a focus area \
        (one of the criteria above), a short title, a one-paragraph description and a concrete exercise.".into(),
    }
  }
}

/// Attempt to load `ExamConfig` from EXAM_CONFIG_PATH. On any parsing/IO error, returns None.
pub fn load_exam_config_from_env() -> Option<ExamConfig> {
  let path = std::env::var("EXAM_CONFIG_PATH").ok()?;
  match std::fs::read_to_string(&path) {
    Ok(s) => match parse_exam_config(&s) {
      Ok(cfg) => {
        info!(target: "ielts_mock", %path, "Loaded exam config (TOML)");
        Some(cfg)
      }
      Err(e) => {
        error!(target: "ielts_mock", %path, error = %e, "Failed to parse TOML config");
        None
      }
    },
    Err(e) => {
      error!(target: "ielts_mock", %path, error = %e, "Failed to read TOML config file");
      None
    }
  }
}

pub fn parse_exam_config(s: &str) -> Result<ExamConfig, toml::de::Error> {
  toml::from_str::<ExamConfig>(s)
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn partial_override_keeps_other_defaults() {
    let cfg = parse_exam_config(
      r#"
        [prompts]
        practice_system = "Be brief."
      "#,
    )
    .unwrap();
    assert_eq!(cfg.prompts.practice_system, "Be brief.");
    assert_eq!(cfg.prompts.test_system, Prompts::default().test_system);
  }

  #[test]
  fn default_templates_carry_their_placeholders() {
    let p = Prompts::default();
    for key in ["{test_type}", "{sections}", "{video_url}", "{transcript}"] {
      assert!(p.test_user_template.contains(key), "missing {key}");
    }
    for key in ["{transcript}", "{test_json}", "{answers_json}"] {
      assert!(p.evaluation_user_template.contains(key), "missing {key}");
    }
    assert!(p.practice_user_template.contains("{weak_criteria}"));
  }

  #[test]
  fn empty_file_is_all_defaults() {
    let cfg = parse_exam_config("").unwrap();
    assert_eq!(cfg.prompts.evaluation_system, Prompts::default().evaluation_system);
  }
}
