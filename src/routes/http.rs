//! HTTP endpoint handlers. These are thin wrappers that forward to core logic.
//! Each handler is instrumented; errors are rendered by `ExamError` as `{ "error": ... }`.

use std::sync::Arc;
use axum::{
  extract::{Path, State},
  http::{header, StatusCode},
  response::IntoResponse,
  Json,
};
use tracing::{info, instrument};

use crate::domain::ExamRequest;
use crate::error::ExamError;
use crate::logic::*;
use crate::protocol::*;
use crate::report::Report;
use crate::speech::TranscriptSnapshot;
use crate::state::AppState;

type ApiResult<T> = Result<Json<T>, ExamError>;

#[instrument(level = "info")]
pub async fn http_health() -> impl IntoResponse { Json(HealthOut { ok: true }) }

#[instrument(level = "info", skip(state))]
pub async fn http_create_session(State(state): State<Arc<AppState>>) -> impl IntoResponse {
  Json(create_session(&state).await)
}

#[instrument(level = "info", skip(state), fields(%id))]
pub async fn http_get_session(State(state): State<Arc<AppState>>, Path(id): Path<String>) -> ApiResult<SessionView> {
  view(&state, &id).await.map(Json)
}

#[instrument(level = "info", skip(state), fields(%id))]
pub async fn http_delete_session(
  State(state): State<Arc<AppState>>,
  Path(id): Path<String>,
) -> Result<StatusCode, ExamError> {
  delete_session(&state, &id).await?;
  Ok(StatusCode::NO_CONTENT)
}

#[instrument(level = "info", skip(state, body), fields(%id, test_type = ?body.test_type))]
pub async fn http_submit(
  State(state): State<Arc<AppState>>,
  Path(id): Path<String>,
  Json(body): Json<ExamRequest>,
) -> ApiResult<SessionView> {
  let v = submit_exam(&state, &id, body).await?;
  info!(target: "workflow", session = %id, phase = ?v.phase, "HTTP submit handled");
  Ok(Json(v))
}

#[instrument(level = "debug", skip(state, body), fields(%id, section = ?body.section, index = body.index))]
pub async fn http_answer(
  State(state): State<Arc<AppState>>,
  Path(id): Path<String>,
  Json(body): Json<AnswerIn>,
) -> ApiResult<SessionView> {
  answer_question(&state, &id, body.section, body.index, &body.text).await.map(Json)
}

#[instrument(level = "debug", skip(state, body), fields(%id, task = ?body.task))]
pub async fn http_writing(
  State(state): State<Arc<AppState>>,
  Path(id): Path<String>,
  Json(body): Json<WritingIn>,
) -> ApiResult<SessionView> {
  write_task(&state, &id, body.task, &body.text).await.map(Json)
}

#[instrument(level = "info", skip(state), fields(%id))]
pub async fn http_speaking_start(State(state): State<Arc<AppState>>, Path(id): Path<String>) -> ApiResult<SessionView> {
  start_recording(&state, &id).await.map(Json)
}

#[instrument(level = "info", skip(state), fields(%id))]
pub async fn http_speaking_stop(State(state): State<Arc<AppState>>, Path(id): Path<String>) -> ApiResult<SessionView> {
  stop_recording(&state, &id).await.map(Json)
}

#[instrument(level = "debug", skip(state, body), fields(%id, is_final = body.is_final))]
pub async fn http_speaking_transcript(
  State(state): State<Arc<AppState>>,
  Path(id): Path<String>,
  Json(body): Json<TranscriptSnapshot>,
) -> ApiResult<BufferOut> {
  let buffer = push_transcript(&state, &id, &body).await?;
  Ok(Json(BufferOut { buffer }))
}

#[instrument(level = "debug", skip(state, body), fields(%id, text_len = body.text.len()))]
pub async fn http_speaking_buffer(
  State(state): State<Arc<AppState>>,
  Path(id): Path<String>,
  Json(body): Json<BufferIn>,
) -> ApiResult<SessionView> {
  edit_buffer(&state, &id, &body.text).await.map(Json)
}

#[instrument(level = "info", skip(state), fields(%id))]
pub async fn http_speaking_next(State(state): State<Arc<AppState>>, Path(id): Path<String>) -> ApiResult<SessionView> {
  next_question(&state, &id).await.map(Json)
}

#[instrument(level = "info", skip(state), fields(%id))]
pub async fn http_next_section(State(state): State<Arc<AppState>>, Path(id): Path<String>) -> ApiResult<SessionView> {
  next_section(&state, &id).await.map(Json)
}

#[instrument(level = "info", skip(state), fields(%id))]
pub async fn http_evaluate(State(state): State<Arc<AppState>>, Path(id): Path<String>) -> ApiResult<SessionView> {
  resubmit_evaluation(&state, &id).await.map(Json)
}

#[instrument(level = "info", skip(state), fields(%id))]
pub async fn http_restart(State(state): State<Arc<AppState>>, Path(id): Path<String>) -> ApiResult<SessionView> {
  restart(&state, &id).await.map(Json)
}

#[instrument(level = "info", skip(state), fields(%id))]
pub async fn http_report(State(state): State<Arc<AppState>>, Path(id): Path<String>) -> ApiResult<Report> {
  report(&state, &id).await.map(Json)
}

#[instrument(level = "info", skip(state), fields(%id))]
pub async fn http_report_markdown(
  State(state): State<Arc<AppState>>,
  Path(id): Path<String>,
) -> Result<impl IntoResponse, ExamError> {
  let md = report_markdown(&state, &id).await?;
  Ok((
    [
      (header::CONTENT_TYPE, "text/markdown; charset=utf-8"),
      (header::CONTENT_DISPOSITION, "attachment; filename=\"ielts-report.md\""),
    ],
    md,
  ))
}

#[instrument(level = "info", skip(state, body), fields(%id))]
pub async fn http_report_document(
  State(state): State<Arc<AppState>>,
  Path(id): Path<String>,
  Json(body): Json<DocumentIn>,
) -> Result<impl IntoResponse, ExamError> {
  let pdf = export_document(&state, &id, &body.image_base64).await?;
  Ok((
    [
      (header::CONTENT_TYPE, "application/pdf"),
      (header::CONTENT_DISPOSITION, "attachment; filename=\"ielts-report.pdf\""),
    ],
    pdf,
  ))
}

#[instrument(level = "info", skip(state), fields(%id))]
pub async fn http_test_text(
  State(state): State<Arc<AppState>>,
  Path(id): Path<String>,
) -> Result<impl IntoResponse, ExamError> {
  let text = test_text(&state, &id).await?;
  Ok((
    [
      (header::CONTENT_TYPE, "text/plain; charset=utf-8"),
      (header::CONTENT_DISPOSITION, "attachment; filename=\"ielts-test.txt\""),
    ],
    text,
  ))
}
