//! Session state machine: `welcome → generating → test → evaluating → results`.
//!
//! Transitions are pure: `apply` takes the current session and an event and returns the next
//! session, or an error leaving the caller's copy untouched. The async driver in `logic`
//! applies a "start" event, releases the session lock for the gateway call, and applies the
//! outcome event afterwards.
//!
//! Every call-starting transition bumps `attempt` and records it in `in_flight`. Outcome events
//! carry the attempt they belong to, so results that arrive after a restart are rejected as
//! stale. `in_flight` survives Restart and is cleared only when its own outcome comes back, so a
//! restarted session cannot start a second call while the abandoned one is still running.

use serde::Serialize;
use tracing::debug;

use crate::document::ExportGate;
use crate::domain::{AnswerSet, Evaluation, ExamRequest, PracticePlan, TestSpec};
use crate::error::ExamError;
use crate::flow::TestFlow;
use crate::validation::validate_request;

#[derive(Clone, Copy, Debug, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
  Welcome,
  Generating,
  Test,
  Evaluating,
  Results,
}

impl Phase {
  /// A gateway call is in flight.
  pub fn is_busy(self) -> bool {
    matches!(self, Phase::Generating | Phase::Evaluating)
  }
}

#[derive(Clone, Debug)]
pub struct Session {
  pub id: String,
  pub phase: Phase,
  pub attempt: u64,
  /// Attempt of the gateway call currently running, if any.
  pub in_flight: Option<u64>,
  pub request: Option<ExamRequest>,
  pub test: Option<TestSpec>,
  pub flow: Option<TestFlow>,
  pub answers: Option<AnswerSet>,
  pub evaluation: Option<Evaluation>,
  pub practice_plan: Option<PracticePlan>,
  pub last_error: Option<String>,
  pub export: ExportGate,
}

impl Session {
  pub fn new(id: impl Into<String>) -> Self {
    Self {
      id: id.into(),
      phase: Phase::Welcome,
      attempt: 0,
      in_flight: None,
      request: None,
      test: None,
      flow: None,
      answers: None,
      evaluation: None,
      practice_plan: None,
      last_error: None,
      export: ExportGate::default(),
    }
  }

  /// Mutable access to the running flow; only valid on the test screen.
  pub fn flow_mut(&mut self) -> Result<&mut TestFlow, ExamError> {
    if self.phase != Phase::Test {
      return Err(ExamError::Conflict(format!("No test in progress (phase: {:?}).", self.phase)));
    }
    self.flow.as_mut().ok_or_else(|| ExamError::Conflict("No test in progress.".into()))
  }

  /// The call for `attempt` has returned, whether or not its result was used.
  pub fn settle(&mut self, attempt: u64) {
    if self.in_flight == Some(attempt) {
      self.in_flight = None;
    }
  }

  /// A gateway call is running for this session, possibly one abandoned by a restart.
  pub fn is_busy(&self) -> bool {
    self.phase.is_busy() || self.in_flight.is_some()
  }
}

#[derive(Clone, Debug)]
pub enum Event {
  Submit(ExamRequest),
  Generated { attempt: u64, test: TestSpec },
  GenerationFailed { attempt: u64, message: String },
  /// The flow finalized its answers.
  TestCompleted(AnswerSet),
  /// Try evaluation again with the answers kept from a failed attempt.
  Resubmit,
  Evaluated { attempt: u64, evaluation: Evaluation, practice_plan: PracticePlan },
  EvaluationFailed { attempt: u64, message: String },
  Restart,
}

impl Event {
  fn name(&self) -> &'static str {
    match self {
      Event::Submit(_) => "submit",
      Event::Generated { .. } => "generated",
      Event::GenerationFailed { .. } => "generation_failed",
      Event::TestCompleted(_) => "test_completed",
      Event::Resubmit => "resubmit",
      Event::Evaluated { .. } => "evaluated",
      Event::EvaluationFailed { .. } => "evaluation_failed",
      Event::Restart => "restart",
    }
  }
}

fn busy(phase: Phase) -> ExamError {
  ExamError::Conflict(format!("A request is already in progress ({phase:?})."))
}

fn unexpected(phase: Phase, event: &Event) -> ExamError {
  ExamError::Conflict(format!("Cannot {} while in {:?}.", event.name(), phase))
}

fn stale(attempt: u64) -> ExamError {
  ExamError::Conflict(format!("Discarding stale result for attempt {attempt}."))
}

/// Pure transition function.
pub fn apply(session: &Session, event: Event) -> Result<Session, ExamError> {
  let phase = session.phase;
  debug!(target: "workflow", session = %session.id, ?phase, event = event.name(), "Applying event");

  match event {
    Event::Restart => {
      let mut next = Session::new(session.id.clone());
      next.attempt = session.attempt + 1;
      next.in_flight = session.in_flight;
      Ok(next)
    }

    Event::Submit(request) => {
      if session.is_busy() {
        return Err(busy(phase));
      }
      if phase != Phase::Welcome {
        return Err(unexpected(phase, &Event::Submit(request)));
      }
      validate_request(&request)?;
      let mut next = session.clone();
      next.phase = Phase::Generating;
      next.attempt += 1;
      next.in_flight = Some(next.attempt);
      next.request = Some(request);
      next.last_error = None;
      Ok(next)
    }

    Event::Generated { attempt, test } => {
      if phase != Phase::Generating || attempt != session.attempt {
        return Err(stale(attempt));
      }
      let test_type = session
        .request
        .as_ref()
        .map(|r| r.test_type)
        .ok_or_else(|| ExamError::Conflict("Generated test without a request.".into()))?;
      let mut next = session.clone();
      next.flow = Some(TestFlow::new(test_type, &test));
      next.test = Some(test);
      next.phase = Phase::Test;
      next.in_flight = None;
      Ok(next)
    }

    Event::GenerationFailed { attempt, message } => {
      if phase != Phase::Generating || attempt != session.attempt {
        return Err(stale(attempt));
      }
      let mut next = Session::new(session.id.clone());
      next.attempt = session.attempt;
      next.last_error = Some(message);
      Ok(next)
    }

    Event::TestCompleted(answers) => {
      if session.is_busy() {
        return Err(busy(phase));
      }
      if phase != Phase::Test {
        return Err(unexpected(phase, &Event::TestCompleted(answers)));
      }
      let subjective = session.request.as_ref().is_some_and(|r| r.test_type.is_subjective());
      let mut next = session.clone();
      next.answers = Some(answers);
      next.last_error = None;
      if subjective {
        next.phase = Phase::Evaluating;
        next.attempt += 1;
        next.in_flight = Some(next.attempt);
      } else {
        next.evaluation = None;
        next.practice_plan = None;
        next.phase = Phase::Results;
        next.export = ExportGate::Ready;
      }
      Ok(next)
    }

    Event::Resubmit => {
      if session.is_busy() {
        return Err(busy(phase));
      }
      let answers = match (phase, &session.answers) {
        (Phase::Test, Some(a)) => a.clone(),
        _ => return Err(unexpected(phase, &Event::Resubmit)),
      };
      apply(session, Event::TestCompleted(answers))
    }

    Event::Evaluated { attempt, evaluation, practice_plan } => {
      if phase != Phase::Evaluating || attempt != session.attempt {
        return Err(stale(attempt));
      }
      let mut next = session.clone();
      next.evaluation = Some(evaluation);
      next.practice_plan = Some(practice_plan);
      next.phase = Phase::Results;
      next.export = ExportGate::Ready;
      next.in_flight = None;
      Ok(next)
    }

    Event::EvaluationFailed { attempt, message } => {
      if phase != Phase::Evaluating || attempt != session.attempt {
        return Err(stale(attempt));
      }
      let mut next = session.clone();
      next.phase = Phase::Test;
      next.last_error = Some(message);
      next.in_flight = None;
      Ok(next)
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::domain::{ImprovedAnswers, ListeningSection, Question, TestType};

  fn request(test_type: TestType) -> ExamRequest {
    ExamRequest {
      video_url: "https://www.youtube.com/watch?v=dQw4w9WgXcQ".into(),
      transcript: "This is a transcript that is comfortably longer than fifty characters.".into(),
      test_type,
    }
  }

  fn test_spec() -> TestSpec {
    TestSpec {
      listening: ListeningSection {
        questions: vec![Question { question: "Q1".into(), kind: "short_answer".into(), answer: "A".into() }],
      },
      ..Default::default()
    }
  }

  fn evaluation() -> Evaluation {
    Evaluation { overall_score: 6.5, criteria: vec![], summary: "ok".into(), improved_answers: ImprovedAnswers::default() }
  }

  fn in_test(test_type: TestType) -> Session {
    let s = apply(&Session::new("s1"), Event::Submit(request(test_type))).unwrap();
    apply(&s, Event::Generated { attempt: s.attempt, test: test_spec() }).unwrap()
  }

  #[test]
  fn invalid_submission_keeps_welcome() {
    let s = Session::new("s1");
    let mut bad = request(TestType::Full);
    bad.transcript = "too short".into();
    let err = apply(&s, Event::Submit(bad)).unwrap_err();
    assert!(matches!(err, ExamError::Validation(_)));
    assert_eq!(s.phase, Phase::Welcome);
  }

  #[test]
  fn valid_submission_starts_generation() {
    let s = apply(&Session::new("s1"), Event::Submit(request(TestType::Full))).unwrap();
    assert_eq!(s.phase, Phase::Generating);
    assert_eq!(s.attempt, 1);
  }

  #[test]
  fn second_submit_while_generating_is_busy() {
    let s = apply(&Session::new("s1"), Event::Submit(request(TestType::Full))).unwrap();
    let err = apply(&s, Event::Submit(request(TestType::Full))).unwrap_err();
    assert!(matches!(err, ExamError::Conflict(m) if m.contains("in progress")));
  }

  #[test]
  fn generation_failure_returns_to_welcome_and_discards_inputs() {
    let s = apply(&Session::new("s1"), Event::Submit(request(TestType::Full))).unwrap();
    let s = apply(&s, Event::GenerationFailed { attempt: s.attempt, message: "boom".into() }).unwrap();
    assert_eq!(s.phase, Phase::Welcome);
    assert!(s.request.is_none());
    assert_eq!(s.last_error.as_deref(), Some("boom"));
  }

  #[test]
  fn stale_generation_after_restart_is_rejected() {
    let s = apply(&Session::new("s1"), Event::Submit(request(TestType::Full))).unwrap();
    let old = s.attempt;
    let s = apply(&s, Event::Restart).unwrap();
    assert_eq!(s.phase, Phase::Welcome);
    assert!(apply(&s, Event::Generated { attempt: old, test: test_spec() }).is_err());
  }

  #[test]
  fn objective_completion_goes_straight_to_results() {
    let s = in_test(TestType::Listening);
    let s = apply(&s, Event::TestCompleted(AnswerSet::default())).unwrap();
    assert_eq!(s.phase, Phase::Results);
    assert!(s.evaluation.is_none());
    assert!(s.practice_plan.is_none());
    assert_eq!(s.export, ExportGate::Ready);
  }

  #[test]
  fn subjective_completion_evaluates_then_results() {
    let s = in_test(TestType::Writing);
    let s = apply(&s, Event::TestCompleted(AnswerSet::default())).unwrap();
    assert_eq!(s.phase, Phase::Evaluating);
    let s = apply(
      &s,
      Event::Evaluated { attempt: s.attempt, evaluation: evaluation(), practice_plan: PracticePlan::default() },
    )
    .unwrap();
    assert_eq!(s.phase, Phase::Results);
    assert!(s.evaluation.is_some());
  }

  #[test]
  fn evaluation_failure_keeps_answers_and_allows_resubmit() {
    let s = in_test(TestType::Speaking);
    let mut answers = AnswerSet::default();
    answers.writing.task2 = "kept".into();
    let s = apply(&s, Event::TestCompleted(answers.clone())).unwrap();
    let s = apply(&s, Event::EvaluationFailed { attempt: s.attempt, message: "nope".into() }).unwrap();
    assert_eq!(s.phase, Phase::Test);
    assert_eq!(s.answers.as_ref(), Some(&answers));
    assert_eq!(s.last_error.as_deref(), Some("nope"));

    let s = apply(&s, Event::Resubmit).unwrap();
    assert_eq!(s.phase, Phase::Evaluating);
    assert_eq!(s.answers, Some(answers));
  }

  #[test]
  fn restart_during_generation_keeps_the_call_outstanding() {
    let s = apply(&Session::new("s1"), Event::Submit(request(TestType::Full))).unwrap();
    let old = s.attempt;
    let mut s = apply(&s, Event::Restart).unwrap();
    assert_eq!(s.phase, Phase::Welcome);
    assert_eq!(s.in_flight, Some(old));

    let err = apply(&s, Event::Submit(request(TestType::Full))).unwrap_err();
    assert!(matches!(err, ExamError::Conflict(m) if m.contains("in progress")));

    // The abandoned result is refused, but its return frees the session.
    assert!(apply(&s, Event::Generated { attempt: old, test: test_spec() }).is_err());
    s.settle(old);
    assert_eq!(s.in_flight, None);
    let s = apply(&s, Event::Submit(request(TestType::Full))).unwrap();
    assert_eq!(s.phase, Phase::Generating);
  }

  #[test]
  fn settle_ignores_other_attempts() {
    let mut s = apply(&Session::new("s1"), Event::Submit(request(TestType::Full))).unwrap();
    s.settle(s.attempt + 7);
    assert_eq!(s.in_flight, Some(s.attempt));
    let s = apply(&s, Event::Generated { attempt: s.attempt, test: test_spec() }).unwrap();
    assert_eq!(s.in_flight, None);
  }

  #[test]
  fn restart_clears_everything() {
    let s = in_test(TestType::Listening);
    let s = apply(&s, Event::TestCompleted(AnswerSet::default())).unwrap();
    let s = apply(&s, Event::Restart).unwrap();
    assert_eq!(s.phase, Phase::Welcome);
    assert!(s.test.is_none() && s.answers.is_none() && s.request.is_none());
    assert_eq!(s.export, ExportGate::Unavailable);
  }

  #[test]
  fn flow_is_only_reachable_on_test_screen() {
    let mut s = Session::new("s1");
    assert!(s.flow_mut().is_err());
    let mut s2 = in_test(TestType::Listening);
    assert!(s2.flow_mut().is_ok());
    s.phase = Phase::Results;
    assert!(s.flow_mut().is_err());
  }
}
