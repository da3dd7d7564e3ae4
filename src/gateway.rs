//! The seam between the workflow and the generative-AI service.
//!
//! `ExamGateway` is one request/response exchange per method: no retries, no caching, no rate
//! limiting. Failures come back as `GatewayError` and are never repaired. The free functions
//! below add the local rules that sit on top of the raw calls (chart attachment, the
//! practice-plan short-circuit).

use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use tracing::{info, instrument};

use crate::domain::{
  maintain_excellence_plan, AnswerSet, ChartSpec, Criterion, Evaluation, ExamRequest, PracticeItem, PracticePlan,
  TestSpec,
};

/// Exactly this many items must come back when the service builds a plan.
pub const PRACTICE_ITEMS: usize = 3;

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum GatewayError {
  #[error("AI service is not configured: {0}")]
  Unavailable(String),
  #[error("AI service request failed: {0}")]
  Transport(String),
  #[error("AI service HTTP {status}: {message}")]
  Http { status: u16, message: String },
  #[error("AI response did not match the expected format: {0}")]
  Parse(String),
  #[error("AI service returned no image")]
  NoImage,
}

/// Everything the evaluator needs to see.
#[derive(Clone, Copy, Debug)]
pub struct EvaluationInput<'a> {
  pub request: &'a ExamRequest,
  pub test: &'a TestSpec,
  pub answers: &'a AnswerSet,
}

#[async_trait]
pub trait ExamGateway: Send + Sync {
  async fn generate_test(&self, request: &ExamRequest) -> Result<TestSpec, GatewayError>;

  /// Raw image bytes (PNG).
  async fn generate_chart_image(&self, chart: &ChartSpec) -> Result<Vec<u8>, GatewayError>;

  async fn evaluate_test(&self, input: EvaluationInput<'_>) -> Result<Evaluation, GatewayError>;

  /// Ask the service for practice items targeting `weak` (all below the target band).
  async fn request_practice_items(&self, weak: &[Criterion]) -> Result<Vec<PracticeItem>, GatewayError>;
}

/// Installed when no API key is configured; every call fails.
pub struct DisabledGateway;

#[async_trait]
impl ExamGateway for DisabledGateway {
  async fn generate_test(&self, _request: &ExamRequest) -> Result<TestSpec, GatewayError> {
    Err(GatewayError::Unavailable("OPENAI_API_KEY is not set".into()))
  }

  async fn generate_chart_image(&self, _chart: &ChartSpec) -> Result<Vec<u8>, GatewayError> {
    Err(GatewayError::Unavailable("OPENAI_API_KEY is not set".into()))
  }

  async fn evaluate_test(&self, _input: EvaluationInput<'_>) -> Result<Evaluation, GatewayError> {
    Err(GatewayError::Unavailable("OPENAI_API_KEY is not set".into()))
  }

  async fn request_practice_items(&self, _weak: &[Criterion]) -> Result<Vec<PracticeItem>, GatewayError> {
    Err(GatewayError::Unavailable("OPENAI_API_KEY is not set".into()))
  }
}

/// Generate the exam, blank unrequested sections, and attach the chart image when Task 1
/// needs one. A chart failure fails the whole generation.
#[instrument(level = "info", skip(gateway, request), fields(test_type = ?request.test_type))]
pub async fn generate_exam(gateway: &dyn ExamGateway, request: &ExamRequest) -> Result<TestSpec, GatewayError> {
  let mut test = gateway.generate_test(request).await?.normalized_for(request.test_type);
  if test.needs_chart_image() {
    let bytes = gateway.generate_chart_image(&test.writing.task1.chart).await?;
    if bytes.is_empty() {
      return Err(GatewayError::NoImage);
    }
    info!(target: "gateway", chart = test.writing.task1.chart.kind.as_str(), bytes = bytes.len(), "Chart image attached");
    test.writing.task1.chart_image = Some(BASE64.encode(&bytes));
  }
  Ok(test)
}

/// Practice plan for an evaluation. Nothing below the target band means the fixed
/// "maintain excellence" plan and no outbound call.
#[instrument(level = "info", skip(gateway, evaluation), fields(criteria = evaluation.criteria.len()))]
pub async fn derive_practice_plan(gateway: &dyn ExamGateway, evaluation: &Evaluation) -> Result<PracticePlan, GatewayError> {
  let weak = evaluation.weak_criteria();
  if weak.is_empty() {
    info!(target: "gateway", "All criteria at or above target; skipping practice-plan request");
    return Ok(maintain_excellence_plan());
  }
  let items = gateway.request_practice_items(&weak).await?;
  if items.len() != PRACTICE_ITEMS {
    return Err(GatewayError::Parse(format!("expected {PRACTICE_ITEMS} practice items, got {}", items.len())));
  }
  Ok(PracticePlan { items })
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::domain::{ChartKind, ImprovedAnswers, TestType};
  use crate::testing::StubGateway;

  fn eval(scores: &[(&str, f32)]) -> Evaluation {
    Evaluation {
      overall_score: 7.0,
      criteria: scores
        .iter()
        .map(|(n, s)| Criterion { name: (*n).into(), score: *s, feedback: String::new() })
        .collect(),
      summary: String::new(),
      improved_answers: ImprovedAnswers::default(),
    }
  }

  fn request(test_type: TestType) -> ExamRequest {
    ExamRequest { video_url: "https://youtu.be/dQw4w9WgXcQ".into(), transcript: "t".repeat(60), test_type }
  }

  #[tokio::test]
  async fn strong_evaluation_short_circuits() {
    let stub = StubGateway::new();
    let plan = derive_practice_plan(&stub, &eval(&[("Writing", 7.5), ("Lexical Resource", 8.0)])).await.unwrap();
    assert_eq!(plan.items.len(), 1);
    assert_eq!(plan.items[0].title, "Maintain Excellence");
    assert!(stub.calls().is_empty());
  }

  #[tokio::test]
  async fn only_weak_criteria_are_sent() {
    let stub = StubGateway::new();
    let plan = derive_practice_plan(&stub, &eval(&[("Writing", 6.0), ("Coherence and Cohesion", 7.5), ("Pronunciation", 7.0)]))
      .await
      .unwrap();
    assert_eq!(plan.items.len(), 3);
    let sent: Vec<String> = stub.practice_requests().concat().into_iter().map(|c| c.name).collect();
    assert_eq!(sent, vec!["Writing".to_string(), "Pronunciation".to_string()]);
  }

  #[tokio::test]
  async fn wrong_item_count_is_a_parse_error() {
    let stub = StubGateway::new().with_practice_items(2);
    let err = derive_practice_plan(&stub, &eval(&[("Writing", 5.0)])).await.unwrap_err();
    assert!(matches!(err, GatewayError::Parse(_)));
  }

  #[tokio::test]
  async fn bar_chart_gets_an_image() {
    let stub = StubGateway::new().with_chart(ChartKind::Bar);
    let test = generate_exam(&stub, &request(TestType::Writing)).await.unwrap();
    assert_eq!(test.writing.task1.chart_image.as_deref(), Some(BASE64.encode(b"png").as_str()));
    assert_eq!(stub.calls(), vec!["generate_test", "generate_chart_image"]);
  }

  #[tokio::test]
  async fn table_chart_and_non_writing_tests_skip_the_image() {
    let stub = StubGateway::new().with_chart(ChartKind::Table);
    generate_exam(&stub, &request(TestType::Writing)).await.unwrap();
    let stub2 = StubGateway::new().with_chart(ChartKind::Line);
    let test = generate_exam(&stub2, &request(TestType::Reading)).await.unwrap();
    assert!(test.writing.is_empty());
    assert_eq!(stub.calls(), vec!["generate_test"]);
    assert_eq!(stub2.calls(), vec!["generate_test"]);
  }

  #[tokio::test]
  async fn chart_failure_fails_generation() {
    let stub = StubGateway::new().with_chart(ChartKind::Pie).failing("generate_chart_image");
    let err = generate_exam(&stub, &request(TestType::Full)).await.unwrap_err();
    assert!(matches!(err, GatewayError::NoImage | GatewayError::Transport(_)));
  }
}
