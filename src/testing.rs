//! Test utilities: a stub gateway that returns canned exam content and records its calls.
//! Used by unit and integration tests to drive the workflow without real API calls.

use std::io::Cursor;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use image::{DynamicImage, ImageOutputFormat, Rgb, RgbImage};

use crate::domain::{
  ChartKind, ChartSpec, Criterion, CueCard, Evaluation, ExamRequest, ImprovedAnswers, ListeningSection, PracticeItem,
  Question, ReadingSection, SpeakingAnswer, SpeakingQuestion, SpeakingSection, TestSpec, WritingSection, WritingTask1,
};
use crate::gateway::{EvaluationInput, ExamGateway, GatewayError};

#[derive(Default)]
struct Log {
  calls: Vec<&'static str>,
  practice_requests: Vec<Vec<Criterion>>,
}

/// A stub gateway. Clones share the same call log, so a test can keep one clone and hand
/// another to the application state.
#[derive(Clone)]
pub struct StubGateway {
  test: TestSpec,
  evaluation: Evaluation,
  practice_items: usize,
  failing: Option<&'static str>,
  log: Arc<Mutex<Log>>,
}

impl Default for StubGateway {
  fn default() -> Self {
    Self::new()
  }
}

impl StubGateway {
  pub fn new() -> Self {
    Self {
      test: sample_test(),
      evaluation: sample_evaluation(),
      practice_items: 3,
      failing: None,
      log: Arc::new(Mutex::new(Log::default())),
    }
  }

  pub fn with_chart(mut self, kind: ChartKind) -> Self {
    self.test.writing.task1.chart.kind = kind;
    self
  }

  pub fn with_evaluation(mut self, evaluation: Evaluation) -> Self {
    self.evaluation = evaluation;
    self
  }

  pub fn with_practice_items(mut self, n: usize) -> Self {
    self.practice_items = n;
    self
  }

  /// Make the named operation fail with a transport error.
  pub fn failing(mut self, op: &'static str) -> Self {
    self.failing = Some(op);
    self
  }

  /// Operation names in call order.
  pub fn calls(&self) -> Vec<&'static str> {
    self.log.lock().map(|l| l.calls.clone()).unwrap_or_default()
  }

  /// The weak-criteria payload of every practice-plan request.
  pub fn practice_requests(&self) -> Vec<Vec<Criterion>> {
    self.log.lock().map(|l| l.practice_requests.clone()).unwrap_or_default()
  }

  fn record(&self, op: &'static str) -> Result<(), GatewayError> {
    if let Ok(mut log) = self.log.lock() {
      log.calls.push(op);
    }
    if self.failing == Some(op) {
      return Err(GatewayError::Transport(format!("stub failure in {op}")));
    }
    Ok(())
  }
}

#[async_trait]
impl ExamGateway for StubGateway {
  async fn generate_test(&self, _request: &ExamRequest) -> Result<TestSpec, GatewayError> {
    self.record("generate_test")?;
    Ok(self.test.clone())
  }

  async fn generate_chart_image(&self, _chart: &ChartSpec) -> Result<Vec<u8>, GatewayError> {
    self.record("generate_chart_image")?;
    Ok(b"png".to_vec())
  }

  async fn evaluate_test(&self, _input: EvaluationInput<'_>) -> Result<Evaluation, GatewayError> {
    self.record("evaluate_test")?;
    Ok(self.evaluation.clone())
  }

  async fn request_practice_items(&self, weak: &[Criterion]) -> Result<Vec<PracticeItem>, GatewayError> {
    self.record("request_practice_items")?;
    if let Ok(mut log) = self.log.lock() {
      log.practice_requests.push(weak.to_vec());
    }
    Ok(
      (0..self.practice_items)
        .map(|i| PracticeItem {
          focus_area: weak.get(i % weak.len().max(1)).map(|c| c.name.clone()).unwrap_or_default(),
          title: format!("Drill {}", i + 1),
          description: format!("Targeted practice number {}.", i + 1),
          exercise: format!("Exercise {}: write and record a short response.", i + 1),
        })
        .collect(),
    )
  }
}

/// A complete four-section exam with a table chart.
pub fn sample_test() -> TestSpec {
  let q = |question: &str, answer: &str| Question {
    question: question.into(),
    kind: "short_answer".into(),
    answer: answer.into(),
  };
  TestSpec {
    listening: ListeningSection {
      questions: vec![q("What city is the speaker from?", "Lisbon"), q("How many years did the project take?", "Three")],
    },
    reading: ReadingSection {
      transcript: "Urban beekeeping has grown rapidly over the past decade...".into(),
      questions: vec![q("When did urban beekeeping start growing?", "The past decade"), q("TRUE/FALSE/NOT GIVEN: Bees prefer cities.", "NOT GIVEN")],
    },
    writing: WritingSection {
      task1: WritingTask1 {
        prompt: "Summarise the information in the table.".into(),
        chart: ChartSpec { kind: ChartKind::Table, title: "Hive counts".into(), data: "Year,Hives\n2020,120\n2021,180".into() },
        chart_image: None,
      },
      task2: "Some people think cities should ban beekeeping. Discuss both views.".into(),
    },
    speaking: SpeakingSection {
      questions: vec![
        SpeakingQuestion { part: 1, kind: "interview".into(), question: "Do you like insects?".into(), cue_card: None },
        SpeakingQuestion {
          part: 2,
          kind: "cue_card".into(),
          question: "Describe a hobby you started recently.".into(),
          cue_card: Some(CueCard {
            topic: "A new hobby".into(),
            points: vec!["what it is".into(), "when you started".into(), "why you enjoy it".into()],
          }),
        },
      ],
    },
  }
}

/// Mixed evaluation: some criteria below Band 7.5, some above.
pub fn sample_evaluation() -> Evaluation {
  let c = |name: &str, score: f32, feedback: &str| Criterion { name: name.into(), score, feedback: feedback.into() };
  Evaluation {
    overall_score: 6.5,
    criteria: vec![
      c("Writing", 6.5, "Solid structure, limited range."),
      c("Speaking", 7.0, "Fluent with occasional hesitation."),
      c("Task Response", 6.0, "Position not fully developed."),
      c("Lexical Resource", 7.5, "Good range of topic vocabulary."),
      c("Pronunciation", 8.0, "Clear and natural."),
    ],
    summary: "A competent attempt with room to develop arguments.".into(),
    improved_answers: ImprovedAnswers {
      writing_task1: "The table illustrates the number of hives...".into(),
      writing_task2: "It is often argued that urban beekeeping...".into(),
      speaking: vec![SpeakingAnswer { question: "Do you like insects?".into(), answer: "I find them fascinating...".into() }],
    },
  }
}

/// A solid-colour image encoded in the given format, standing in for a rendered report.
pub fn sample_image(width: u32, height: u32, format: ImageOutputFormat) -> Result<Vec<u8>, image::ImageError> {
  let img = RgbImage::from_pixel(width, height, Rgb([240, 236, 220]));
  let mut out = Vec::new();
  DynamicImage::ImageRgb8(img).write_to(&mut Cursor::new(&mut out), format)?;
  Ok(out)
}
