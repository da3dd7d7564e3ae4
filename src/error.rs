//! Service error taxonomy and its HTTP mapping.

use axum::{
  http::StatusCode,
  response::{IntoResponse, Json, Response},
};
use serde_json::json;

pub type Result<T> = std::result::Result<T, ExamError>;

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ExamError {
  /// Local, pre-submission, user-correctable.
  #[error("{0}")]
  Validation(String),

  /// The AI call failed or returned no usable payload.
  #[error("{0}")]
  Generation(String),

  /// The AI response did not match the expected schema.
  #[error("{0}")]
  Parse(String),

  /// Evaluation or practice-plan derivation failed.
  #[error("{0}")]
  Evaluation(String),

  #[error("Not found: {0}")]
  NotFound(String),

  /// Illegal transition, busy session, or an out-of-order flow action.
  #[error("{0}")]
  Conflict(String),

  #[error("Export failed: {0}")]
  Export(String),
}

impl ExamError {
  pub fn status(&self) -> StatusCode {
    match self {
      ExamError::Validation(_) => StatusCode::BAD_REQUEST,
      ExamError::Generation(_) | ExamError::Parse(_) | ExamError::Evaluation(_) => StatusCode::BAD_GATEWAY,
      ExamError::NotFound(_) => StatusCode::NOT_FOUND,
      ExamError::Conflict(_) => StatusCode::CONFLICT,
      ExamError::Export(_) => StatusCode::BAD_REQUEST,
    }
  }
}

impl IntoResponse for ExamError {
  fn into_response(self) -> Response {
    let status = self.status();
    let body = Json(json!({ "error": self.to_string() }));
    (status, body).into_response()
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn status_mapping() {
    assert_eq!(ExamError::Validation("x".into()).status(), StatusCode::BAD_REQUEST);
    assert_eq!(ExamError::Parse("x".into()).status(), StatusCode::BAD_GATEWAY);
    assert_eq!(ExamError::Conflict("x".into()).status(), StatusCode::CONFLICT);
    assert_eq!(ExamError::NotFound("s".into()).to_string(), "Not found: s");
  }
}
