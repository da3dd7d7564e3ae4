//! Core behaviors shared by both HTTP and WebSocket handlers.
//!
//! This includes:
//!   - Driving the session state machine around the two long AI calls
//!   - Forwarding test-taking actions to the session's flow
//!   - Building the report and its exports
//!
//! The session lock is never held across a gateway call: the "start" event is applied under the
//! lock, the lock is released for the call, and the outcome event is applied after relocking.
//! Calls run on their own task so a dropped request cannot leave the session busy forever.

use std::sync::Arc;

use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use tracing::{error, info, instrument, warn, Instrument, Span};

use crate::document::single_page_pdf;
use crate::domain::{ExamRequest, Section};
use crate::error::{ExamError, Result};
use crate::flow::{FlowError, Progress, TestFlow, WritingTask};
use crate::gateway::{derive_practice_plan, generate_exam, EvaluationInput, ExamGateway, GatewayError};
use crate::protocol::{to_view, SessionView};
use crate::report::{build_report, export_markdown, export_test_text, Report};
use crate::speech::TranscriptSnapshot;
use crate::state::{AppState, SessionHandle};
use crate::workflow::{apply, Event, Phase};

fn generation_error(e: GatewayError) -> ExamError {
  match e {
    GatewayError::Parse(m) => ExamError::Parse(m),
    other => ExamError::Generation(other.to_string()),
  }
}

/// Every failure while scoring or planning surfaces as an evaluation error.
fn evaluation_error(e: GatewayError) -> ExamError {
  ExamError::Evaluation(e.to_string())
}

#[instrument(level = "info", skip(state))]
pub async fn create_session(state: &AppState) -> SessionView {
  let (_, handle) = state.create_session().await;
  let s = handle.lock().await;
  to_view(&s)
}

/// Forget a session. Any call still running for it finishes against a detached copy.
#[instrument(level = "info", skip(state), fields(%id))]
pub async fn delete_session(state: &AppState, id: &str) -> Result<()> {
  if state.remove_session(id).await {
    Ok(())
  } else {
    Err(ExamError::NotFound(format!("session {id}")))
  }
}

#[instrument(level = "debug", skip(state), fields(%id))]
pub async fn view(state: &AppState, id: &str) -> Result<SessionView> {
  let handle = state.session(id).await?;
  let s = handle.lock().await;
  Ok(to_view(&s))
}

/// Validate, generate the exam, and land on the test screen (or back on welcome with an error).
#[instrument(level = "info", skip(state, request), fields(%id, test_type = ?request.test_type, transcript_len = request.transcript.len()))]
pub async fn submit_exam(state: &AppState, id: &str, request: ExamRequest) -> Result<SessionView> {
  let handle = state.session(id).await?;

  let (attempt, request) = {
    let mut s = handle.lock().await;
    match apply(&s, Event::Submit(request)) {
      Ok(next) => *s = next,
      Err(e) => {
        if let ExamError::Validation(m) = &e {
          s.last_error = Some(m.clone());
        }
        return Err(e);
      }
    }
    let request = s.request.clone().ok_or_else(|| ExamError::Conflict("Submitted without a request.".into()))?;
    (s.attempt, request)
  };

  let task = tokio::spawn(
    finish_generation(state.gateway.clone(), handle.clone(), id.to_string(), attempt, request).instrument(Span::current()),
  );
  match task.await {
    Ok(result) => result,
    Err(e) => {
      handle.lock().await.settle(attempt);
      Err(ExamError::Generation(format!("generation task ended abnormally: {e}")))
    }
  }
}

async fn finish_generation(
  gateway: Arc<dyn ExamGateway>,
  handle: SessionHandle,
  id: String,
  attempt: u64,
  request: ExamRequest,
) -> Result<SessionView> {
  let outcome = generate_exam(gateway.as_ref(), &request).await;

  let mut s = handle.lock().await;
  let (event, failure) = match outcome {
    Ok(test) => (Event::Generated { attempt, test }, None),
    Err(e) => {
      let err = generation_error(e);
      error!(target: "workflow", session = %id, error = %err, "Test generation failed");
      (Event::GenerationFailed { attempt, message: err.to_string() }, Some(err))
    }
  };
  match apply(&s, event) {
    Ok(next) => *s = next,
    Err(e) => {
      s.settle(attempt);
      warn!(target: "workflow", session = %id, attempt, "Generation result arrived after restart; discarded");
      return Err(e);
    }
  }
  match failure {
    Some(err) => Err(err),
    None => {
      info!(target: "workflow", session = %id, attempt, "Test ready");
      Ok(to_view(&s))
    }
  }
}

/// Run a flow action under the session lock.
async fn with_flow<T>(
  state: &AppState,
  id: &str,
  action: impl FnOnce(&mut TestFlow) -> std::result::Result<T, FlowError>,
) -> Result<(T, SessionView)> {
  let handle = state.session(id).await?;
  let mut s = handle.lock().await;
  let out = action(s.flow_mut()?)?;
  Ok((out, to_view(&s)))
}

#[instrument(level = "debug", skip(state, text), fields(%id, ?section, index, text_len = text.len()))]
pub async fn answer_question(state: &AppState, id: &str, section: Section, index: usize, text: &str) -> Result<SessionView> {
  with_flow(state, id, |f| f.answer_question(section, index, text)).await.map(|(_, v)| v)
}

#[instrument(level = "debug", skip(state, text), fields(%id, ?task, text_len = text.len()))]
pub async fn write_task(state: &AppState, id: &str, task: WritingTask, text: &str) -> Result<SessionView> {
  with_flow(state, id, |f| f.write_task(task, text)).await.map(|(_, v)| v)
}

#[instrument(level = "info", skip(state), fields(%id))]
pub async fn start_recording(state: &AppState, id: &str) -> Result<SessionView> {
  with_flow(state, id, |f| f.start_recording()).await.map(|(_, v)| v)
}

/// Feed one recognizer snapshot; returns the resulting buffer.
#[instrument(level = "debug", skip(state, snapshot), fields(%id, is_final = snapshot.is_final))]
pub async fn push_transcript(state: &AppState, id: &str, snapshot: &TranscriptSnapshot) -> Result<String> {
  with_flow(state, id, |f| f.push_transcript(snapshot)).await.map(|(buffer, _)| buffer)
}

#[instrument(level = "info", skip(state), fields(%id))]
pub async fn stop_recording(state: &AppState, id: &str) -> Result<SessionView> {
  with_flow(state, id, |f| f.stop_recording()).await.map(|(_, v)| v)
}

#[instrument(level = "debug", skip(state, text), fields(%id, text_len = text.len()))]
pub async fn edit_buffer(state: &AppState, id: &str, text: &str) -> Result<SessionView> {
  with_flow(state, id, |f| f.edit_buffer(text)).await.map(|(_, v)| v)
}

#[instrument(level = "info", skip(state), fields(%id))]
pub async fn next_question(state: &AppState, id: &str) -> Result<SessionView> {
  advance(state, id, |f| f.next_question()).await
}

#[instrument(level = "info", skip(state), fields(%id))]
pub async fn next_section(state: &AppState, id: &str) -> Result<SessionView> {
  advance(state, id, |f| f.advance_section()).await
}

/// Move the flow forward; completing the last section hands off to results or evaluation.
async fn advance(
  state: &AppState,
  id: &str,
  action: impl FnOnce(&mut TestFlow) -> std::result::Result<Progress, FlowError>,
) -> Result<SessionView> {
  let handle = state.session(id).await?;
  let attempt = {
    let mut s = handle.lock().await;
    let answers = match action(s.flow_mut()?)? {
      Progress::Completed(answers) => answers,
      progress => {
        info!(target: "workflow", session = %id, ?progress, "Flow advanced");
        return Ok(to_view(&s));
      }
    };
    *s = apply(&s, Event::TestCompleted(answers))?;
    if s.phase != Phase::Evaluating {
      info!(target: "workflow", session = %id, "Objective test complete; results ready");
      return Ok(to_view(&s));
    }
    s.attempt
  };
  spawn_evaluation(state, handle, id, attempt).await
}

/// Retry evaluation with the answers kept from a failed attempt.
#[instrument(level = "info", skip(state), fields(%id))]
pub async fn resubmit_evaluation(state: &AppState, id: &str) -> Result<SessionView> {
  let handle = state.session(id).await?;
  let attempt = {
    let mut s = handle.lock().await;
    *s = apply(&s, Event::Resubmit)?;
    s.attempt
  };
  spawn_evaluation(state, handle, id, attempt).await
}

async fn spawn_evaluation(state: &AppState, handle: SessionHandle, id: &str, attempt: u64) -> Result<SessionView> {
  let task = tokio::spawn(
    run_evaluation(state.gateway.clone(), handle.clone(), id.to_string(), attempt).instrument(Span::current()),
  );
  match task.await {
    Ok(result) => result,
    Err(e) => {
      handle.lock().await.settle(attempt);
      Err(ExamError::Evaluation(format!("evaluation task ended abnormally: {e}")))
    }
  }
}

/// Evaluate, then derive the practice plan. Either failure returns the session to the test
/// screen with its answers intact.
async fn run_evaluation(
  gateway: Arc<dyn ExamGateway>,
  handle: SessionHandle,
  id: String,
  attempt: u64,
) -> Result<SessionView> {
  let (request, test, answers) = {
    let mut s = handle.lock().await;
    let inputs = match (&s.request, &s.test, &s.answers) {
      (Some(r), Some(t), Some(a)) => Some((r.clone(), t.clone(), a.clone())),
      _ => None,
    };
    match inputs {
      Some(inputs) => inputs,
      None => {
        // restarted before the call began
        s.settle(attempt);
        return Err(ExamError::Conflict("Nothing to evaluate.".into()));
      }
    }
  };

  let input = EvaluationInput { request: &request, test: &test, answers: &answers };
  let outcome = match gateway.evaluate_test(input).await {
    // Weak criteria are judged on the raw scores; snapping happens for display only.
    Ok(evaluation) => match derive_practice_plan(gateway.as_ref(), &evaluation).await {
      Ok(plan) => Ok((evaluation.normalized(), plan)),
      Err(e) => Err(evaluation_error(e)),
    },
    Err(e) => Err(evaluation_error(e)),
  };

  let mut s = handle.lock().await;
  let (event, failure) = match outcome {
    Ok((evaluation, practice_plan)) => {
      info!(target: "workflow", session = %id, overall = evaluation.overall_score, items = practice_plan.items.len(), "Evaluation complete");
      (Event::Evaluated { attempt, evaluation, practice_plan }, None)
    }
    Err(err) => {
      error!(target: "workflow", session = %id, error = %err, "Evaluation failed; answers kept");
      (Event::EvaluationFailed { attempt, message: err.to_string() }, Some(err))
    }
  };
  match apply(&s, event) {
    Ok(next) => *s = next,
    Err(e) => {
      s.settle(attempt);
      warn!(target: "workflow", session = %id, attempt, "Evaluation result arrived after restart; discarded");
      return Err(e);
    }
  }
  match failure {
    Some(err) => Err(err),
    None => Ok(to_view(&s)),
  }
}

#[instrument(level = "info", skip(state), fields(%id))]
pub async fn restart(state: &AppState, id: &str) -> Result<SessionView> {
  let handle = state.session(id).await?;
  let mut s = handle.lock().await;
  *s = apply(&s, Event::Restart)?;
  Ok(to_view(&s))
}

#[instrument(level = "debug", skip(state), fields(%id))]
pub async fn report(state: &AppState, id: &str) -> Result<Report> {
  let handle = state.session(id).await?;
  let s = handle.lock().await;
  if s.phase != Phase::Results {
    return Err(ExamError::Conflict("The report is available on the results screen only.".into()));
  }
  match (&s.request, &s.test, &s.answers) {
    (Some(r), Some(t), Some(a)) => {
      Ok(build_report(r.test_type, t, a, s.evaluation.as_ref(), s.practice_plan.as_ref()))
    }
    _ => Err(ExamError::Conflict("Results are incomplete.".into())),
  }
}

#[instrument(level = "info", skip(state), fields(%id))]
pub async fn report_markdown(state: &AppState, id: &str) -> Result<String> {
  report(state, id).await.map(|r| export_markdown(&r))
}

/// Questions and prompts of the generated test, available once a test exists.
#[instrument(level = "info", skip(state), fields(%id))]
pub async fn test_text(state: &AppState, id: &str) -> Result<String> {
  let handle = state.session(id).await?;
  let s = handle.lock().await;
  match (&s.request, &s.test) {
    (Some(r), Some(t)) => Ok(export_test_text(r.test_type, t)),
    _ => Err(ExamError::Conflict("No test has been generated yet.".into())),
  }
}

/// Wrap the client-rendered report image into a one-page PDF.
#[instrument(level = "info", skip(state, image_base64), fields(%id, payload_len = image_base64.len()))]
pub async fn export_document(state: &AppState, id: &str, image_base64: &str) -> Result<Vec<u8>> {
  let handle = state.session(id).await?;
  handle.lock().await.export.begin()?;

  let payload = image_base64.split_once(',').map(|(_, b)| b).unwrap_or(image_base64);
  let result = BASE64
    .decode(payload.trim())
    .map_err(|e| ExamError::Export(format!("image is not valid base64 ({e})")))
    .and_then(|bytes| single_page_pdf(&bytes));

  handle.lock().await.export.finish();
  match &result {
    Ok(pdf) => info!(target: "workflow", session = %id, bytes = pdf.len(), "Report exported"),
    Err(e) => error!(target: "workflow", session = %id, error = %e, "Report export failed"),
  }
  result
}
