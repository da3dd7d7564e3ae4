//! OpenAI-backed implementation of `ExamGateway`.
//!
//! Text calls go to chat.completions with a strict `json_schema` response format, so the reply
//! is JSON of a fixed shape; anything that fails to deserialize is a `GatewayError::Parse`.
//! Chart images go to images.generations with base64 output.
//! Calls are instrumented and log model names, latencies, and response sizes (not contents).
//!
//! NOTE: We never log the API key or transcript text.

use std::time::{Duration, Instant};

use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use reqwest::header::{AUTHORIZATION, CONTENT_TYPE, USER_AGENT};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::{debug, error, info, instrument};

use crate::chart::image_prompt;
use crate::config::Prompts;
use crate::domain::{ChartSpec, Criterion, Evaluation, ExamRequest, PracticeItem, PracticePlan, TestSpec};
use crate::gateway::{EvaluationInput, ExamGateway, GatewayError};
use crate::util::{fill_template, preview};

const UA: &str = "ielts-mock/0.1";

#[derive(Clone)]
pub struct OpenAI {
  pub client: reqwest::Client,
  pub api_key: String,
  pub base_url: String,
  pub text_model: String,
  pub image_model: String,
  pub prompts: Prompts,
}

impl OpenAI {
  /// Construct the client if we find OPENAI_API_KEY; otherwise return None.
  /// No request timeout unless OPENAI_TIMEOUT_SECS is set.
  pub fn from_env(prompts: Prompts) -> Option<Self> {
    let api_key = std::env::var("OPENAI_API_KEY").ok().filter(|k| !k.trim().is_empty())?;
    let base_url = std::env::var("OPENAI_BASE_URL").unwrap_or_else(|_| "https://api.openai.com/v1".into());
    let text_model = std::env::var("OPENAI_TEXT_MODEL").unwrap_or_else(|_| "gpt-4o".into());
    let image_model = std::env::var("OPENAI_IMAGE_MODEL").unwrap_or_else(|_| "dall-e-3".into());

    let mut builder = reqwest::Client::builder();
    if let Some(secs) = std::env::var("OPENAI_TIMEOUT_SECS").ok().and_then(|s| s.parse::<u64>().ok()) {
      builder = builder.timeout(Duration::from_secs(secs));
    }
    let client = builder.build().ok()?;

    Some(Self { client, api_key, base_url, text_model, image_model, prompts })
  }

  async fn post_json(&self, path: &str, body: &impl Serialize) -> Result<reqwest::Response, GatewayError> {
    let url = format!("{}/{}", self.base_url.trim_end_matches('/'), path);
    let res = self
      .client
      .post(&url)
      .header(USER_AGENT, UA)
      .header(CONTENT_TYPE, "application/json")
      .header(AUTHORIZATION, format!("Bearer {}", self.api_key))
      .json(body)
      .send()
      .await
      .map_err(|e| GatewayError::Transport(e.to_string()))?;

    if !res.status().is_success() {
      let status = res.status().as_u16();
      let body = res.text().await.unwrap_or_default();
      let message = extract_openai_error(&body).unwrap_or(body);
      return Err(GatewayError::Http { status, message });
    }
    Ok(res)
  }

  /// Schema-constrained chat completion. Generic over the target type T.
  #[instrument(level = "info", skip(self, system, user, schema_name, schema), fields(model = %self.text_model, schema = %schema_name))]
  async fn chat_structured<T: DeserializeOwned>(
    &self,
    system: &str,
    user: &str,
    schema_name: &str,
    schema: Value,
  ) -> Result<T, GatewayError> {
    let req = chat_request(&self.text_model, system, user, schema_name, schema);
    let start = Instant::now();
    let res = self.post_json("chat/completions", &req).await?;
    let body: ChatCompletionResponse = res.json().await.map_err(|e| GatewayError::Parse(e.to_string()))?;
    if let Some(usage) = &body.usage {
      info!(target: "gateway", prompt_tokens = ?usage.prompt_tokens, completion_tokens = ?usage.completion_tokens, total_tokens = ?usage.total_tokens, "OpenAI usage");
    }
    let content = body.choices.into_iter().next().and_then(|c| c.message.content).unwrap_or_default();
    info!(target: "gateway", elapsed = ?start.elapsed(), content_len = content.len(), "Structured response received");
    debug!(target: "gateway", content = %preview(&content, 200), "Structured response preview");
    parse_structured(&content)
  }
}

#[async_trait]
impl ExamGateway for OpenAI {
  #[instrument(level = "info", skip(self, request), fields(test_type = ?request.test_type, transcript_len = request.transcript.len()))]
  async fn generate_test(&self, request: &ExamRequest) -> Result<TestSpec, GatewayError> {
    let user = test_user_message(&self.prompts, request);
    let result = self.chat_structured::<TestSpec>(&self.prompts.test_system, &user, "ielts_test", test_schema()).await;
    if let Err(e) = &result {
      error!(target: "gateway", error = %e, "Test generation failed");
    }
    result
  }

  #[instrument(level = "info", skip(self, chart), fields(model = %self.image_model, chart = chart.kind.as_str()))]
  async fn generate_chart_image(&self, chart: &ChartSpec) -> Result<Vec<u8>, GatewayError> {
    let req = ImageRequest {
      model: self.image_model.clone(),
      prompt: image_prompt(chart),
      n: 1,
      size: "1024x1024".into(),
      response_format: "b64_json".into(),
    };
    let start = Instant::now();
    let res = self.post_json("images/generations", &req).await?;
    let body: ImageResponse = res.json().await.map_err(|e| GatewayError::Parse(e.to_string()))?;
    let bytes = decode_image(body)?;
    info!(target: "gateway", elapsed = ?start.elapsed(), bytes = bytes.len(), "Chart image received");
    Ok(bytes)
  }

  #[instrument(level = "info", skip(self, input), fields(test_type = ?input.request.test_type))]
  async fn evaluate_test(&self, input: EvaluationInput<'_>) -> Result<Evaluation, GatewayError> {
    let user = evaluation_user_message(&self.prompts, input)?;
    self
      .chat_structured::<Evaluation>(&self.prompts.evaluation_system, &user, "ielts_evaluation", evaluation_schema())
      .await
  }

  #[instrument(level = "info", skip(self, weak), fields(weak = weak.len()))]
  async fn request_practice_items(&self, weak: &[Criterion]) -> Result<Vec<PracticeItem>, GatewayError> {
    let weak_json = serde_json::to_string_pretty(weak).map_err(|e| GatewayError::Parse(e.to_string()))?;
    let user = fill_template(&self.prompts.practice_user_template, &[("weak_criteria", &weak_json)]);
    let plan = self
      .chat_structured::<PracticePlan>(&self.prompts.practice_system, &user, "ielts_practice_plan", practice_schema())
      .await?;
    Ok(plan.items)
  }
}

// --- Prompt assembly ---

pub fn test_user_message(prompts: &Prompts, request: &ExamRequest) -> String {
  let sections = request.test_type.sections().iter().map(|s| s.label()).collect::<Vec<_>>().join(", ");
  fill_template(
    &prompts.test_user_template,
    &[
      ("test_type", request.test_type.label()),
      ("sections", &sections),
      ("video_url", request.video_url.trim()),
      ("transcript", &request.transcript),
    ],
  )
}

pub fn evaluation_user_message(prompts: &Prompts, input: EvaluationInput<'_>) -> Result<String, GatewayError> {
  // the chart image is base64 and tells the evaluator nothing
  let mut test = input.test.clone();
  test.writing.task1.chart_image = None;
  let test_json = serde_json::to_string_pretty(&test).map_err(|e| GatewayError::Parse(e.to_string()))?;
  let answers_json = serde_json::to_string_pretty(input.answers).map_err(|e| GatewayError::Parse(e.to_string()))?;
  Ok(fill_template(
    &prompts.evaluation_user_template,
    &[
      ("test_type", input.request.test_type.label()),
      ("test_json", &test_json),
      ("answers_json", &answers_json),
      ("transcript", &input.request.transcript),
    ],
  ))
}

pub fn parse_structured<T: DeserializeOwned>(content: &str) -> Result<T, GatewayError> {
  if content.trim().is_empty() {
    return Err(GatewayError::Parse("empty response".into()));
  }
  serde_json::from_str::<T>(content).map_err(|e| GatewayError::Parse(e.to_string()))
}

fn decode_image(body: ImageResponse) -> Result<Vec<u8>, GatewayError> {
  let b64 = body.data.into_iter().find_map(|d| d.b64_json).filter(|s| !s.is_empty()).ok_or(GatewayError::NoImage)?;
  let bytes = BASE64.decode(b64.trim()).map_err(|e| GatewayError::Parse(format!("image base64: {e}")))?;
  if bytes.is_empty() {
    return Err(GatewayError::NoImage);
  }
  Ok(bytes)
}

// --- Schemas (strict mode: every property required, no extras) ---

fn object(properties: Value) -> Value {
  let required: Vec<String> = properties.as_object().map(|m| m.keys().cloned().collect()).unwrap_or_default();
  json!({ "type": "object", "additionalProperties": false, "required": required, "properties": properties })
}

fn string() -> Value {
  json!({ "type": "string" })
}

fn array(items: Value) -> Value {
  json!({ "type": "array", "items": items })
}

pub fn test_schema() -> Value {
  let question = object(json!({ "question": string(), "type": string(), "answer": string() }));
  let cue_card = object(json!({ "topic": string(), "points": array(string()) }));
  object(json!({
    "listening": object(json!({ "questions": array(question.clone()) })),
    "reading": object(json!({ "transcript": string(), "questions": array(question) })),
    "writing": object(json!({
      "task1": object(json!({
        "prompt": string(),
        "chart": object(json!({
          "type": { "type": "string", "enum": ["bar", "line", "pie", "table"] },
          "title": string(),
          "data": string(),
        })),
      })),
      "task2": string(),
    })),
    "speaking": object(json!({
      "questions": array(object(json!({
        "part": { "type": "integer", "enum": [1, 2, 3] },
        "type": string(),
        "question": string(),
        "cueCard": { "anyOf": [cue_card, { "type": "null" }] },
      }))),
    })),
  }))
}

pub fn evaluation_schema() -> Value {
  let qa = object(json!({ "question": string(), "answer": string() }));
  object(json!({
    "overallScore": { "type": "number" },
    "criteria": array(object(json!({ "name": string(), "score": { "type": "number" }, "feedback": string() }))),
    "summary": string(),
    "improvedAnswers": object(json!({
      "writingTask1": string(),
      "writingTask2": string(),
      "speaking": array(qa),
    })),
  }))
}

pub fn practice_schema() -> Value {
  object(json!({
    "items": array(object(json!({
      "focusArea": string(),
      "title": string(),
      "description": string(),
      "exercise": string(),
    }))),
  }))
}

// --- Chat DTOs ---

fn chat_request(model: &str, system: &str, user: &str, schema_name: &str, schema: Value) -> ChatCompletionRequest {
  ChatCompletionRequest {
    model: model.to_string(),
    messages: vec![
      ChatMessageReq { role: "system".into(), content: system.into() },
      ChatMessageReq { role: "user".into(), content: user.into() },
    ],
    temperature: 0.7,
    response_format: ResponseFormat {
      r#type: "json_schema".into(),
      json_schema: JsonSchemaFormat { name: schema_name.into(), strict: true, schema },
    },
  }
}

#[derive(Serialize)]
struct ChatCompletionRequest {
  model: String,
  messages: Vec<ChatMessageReq>,
  temperature: f32,
  response_format: ResponseFormat,
}
#[derive(Serialize)]
struct ChatMessageReq { role: String, content: String }
#[derive(Serialize)]
struct ResponseFormat {
  #[serde(rename = "type")]
  r#type: String,
  json_schema: JsonSchemaFormat,
}
#[derive(Serialize)]
struct JsonSchemaFormat { name: String, strict: bool, schema: Value }

#[derive(Deserialize)]
struct ChatCompletionResponse {
  choices: Vec<ChatChoice>,
  #[serde(default)] usage: Option<Usage>,
}
#[derive(Deserialize)]
struct ChatChoice { message: ChatMessageResp }
#[derive(Deserialize)]
struct ChatMessageResp { content: Option<String> }
#[derive(Deserialize)]
struct Usage {
  #[serde(default)] prompt_tokens: Option<u32>,
  #[serde(default)] completion_tokens: Option<u32>,
  #[serde(default)] total_tokens: Option<u32>,
}

#[derive(Serialize)]
struct ImageRequest {
  model: String,
  prompt: String,
  n: u8,
  size: String,
  response_format: String,
}
#[derive(Deserialize)]
struct ImageResponse {
  #[serde(default)] data: Vec<ImageDatum>,
}
#[derive(Deserialize)]
struct ImageDatum {
  #[serde(default)] b64_json: Option<String>,
}

/// Try to extract a clean error message from OpenAI error body.
fn extract_openai_error(body: &str) -> Option<String> {
  #[derive(Deserialize)]
  struct EWrap { error: EObj }
  #[derive(Deserialize)]
  struct EObj { message: String }
  match serde_json::from_str::<EWrap>(body) {
    Ok(w) => Some(w.error.message),
    Err(_) => None,
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::domain::{AnswerSet, TestType};
  use crate::testing::{sample_evaluation, sample_test};

  fn request() -> ExamRequest {
    ExamRequest {
      video_url: " https://youtu.be/dQw4w9WgXcQ ".into(),
      transcript: "Bees are remarkable pollinators and cities are learning to host them.".into(),
      test_type: TestType::Reading,
    }
  }

  #[test]
  fn test_message_embeds_transcript_verbatim_and_sections() {
    let msg = test_user_message(&Prompts::default(), &request());
    assert!(msg.contains("Bees are remarkable pollinators and cities are learning to host them."));
    assert!(msg.contains("ONLY for these sections: Reading."));
    assert!(msg.contains("https://youtu.be/dQw4w9WgXcQ"));
  }

  #[test]
  fn evaluation_message_includes_answers_but_not_chart_image() {
    let mut test = sample_test();
    test.writing.task1.chart_image = Some("QUJDRA==".into());
    let mut answers = AnswerSet::default();
    answers.writing.task2 = "My distinctive essay answer".into();
    let req = request();
    let msg = evaluation_user_message(&Prompts::default(), EvaluationInput { request: &req, test: &test, answers: &answers }).unwrap();
    assert!(msg.contains("My distinctive essay answer"));
    assert!(msg.contains("What city is the speaker from?"));
    assert!(msg.contains("Do NOT score Listening or Reading"));
    assert!(!msg.contains("QUJDRA=="));
  }

  #[test]
  fn sample_content_deserializes_through_schema_shape() {
    let json = serde_json::to_string(&sample_test()).unwrap();
    let back: TestSpec = parse_structured(&json).unwrap();
    assert_eq!(back, sample_test());
    let json = serde_json::to_string(&sample_evaluation()).unwrap();
    assert!(parse_structured::<Evaluation>(&json).is_ok());
  }

  #[test]
  fn malformed_content_is_a_parse_error() {
    assert!(matches!(parse_structured::<TestSpec>(""), Err(GatewayError::Parse(_))));
    assert!(matches!(parse_structured::<TestSpec>("{\"listening\": 3}"), Err(GatewayError::Parse(_))));
    assert!(matches!(parse_structured::<Evaluation>("not json"), Err(GatewayError::Parse(_))));
  }

  #[test]
  fn schemas_are_strict_objects() {
    for schema in [test_schema(), evaluation_schema(), practice_schema()] {
      assert_eq!(schema["type"], "object");
      assert_eq!(schema["additionalProperties"], false);
    }
    let required = test_schema()["required"].as_array().unwrap().len();
    assert_eq!(required, 4);
    let speaking_q = &test_schema()["properties"]["speaking"]["properties"]["questions"]["items"];
    let req: Vec<&str> = speaking_q["required"].as_array().unwrap().iter().filter_map(Value::as_str).collect();
    assert!(req.contains(&"cueCard"));
  }

  #[test]
  fn chat_request_uses_json_schema_format() {
    let req = chat_request("gpt-4o", "sys", "usr", "ielts_test", test_schema());
    let v = serde_json::to_value(&req).unwrap();
    assert_eq!(v["response_format"]["type"], "json_schema");
    assert_eq!(v["response_format"]["json_schema"]["strict"], true);
    assert_eq!(v["messages"][1]["content"], "usr");
  }

  #[test]
  fn image_response_decoding() {
    let ok = ImageResponse { data: vec![ImageDatum { b64_json: Some(BASE64.encode(b"\x89PNG")) }] };
    assert_eq!(decode_image(ok).unwrap(), b"\x89PNG".to_vec());
    assert_eq!(decode_image(ImageResponse { data: vec![] }), Err(GatewayError::NoImage));
    let empty = ImageResponse { data: vec![ImageDatum { b64_json: Some(String::new()) }] };
    assert_eq!(decode_image(empty), Err(GatewayError::NoImage));
  }

  #[test]
  fn openai_error_body_is_unwrapped() {
    let body = r#"{"error":{"message":"Invalid schema","type":"invalid_request_error"}}"#;
    assert_eq!(extract_openai_error(body).as_deref(), Some("Invalid schema"));
    assert_eq!(extract_openai_error("plain"), None);
  }
}
