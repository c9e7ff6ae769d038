//! API error type and [`axum::response::IntoResponse`] implementation.

use axum::{
  Json,
  http::StatusCode,
  response::{IntoResponse, Response},
};
use lineage_engine::Error as EngineError;
use serde_json::json;
use thiserror::Error;

/// An error returned by an API handler.
#[derive(Debug, Error)]
pub enum ApiError {
  #[error(transparent)]
  Engine(#[from] EngineError),
}

impl ApiError {
  pub fn status(&self) -> StatusCode {
    match self {
      ApiError::Engine(e) => match e {
        EngineError::NotFound(_) => StatusCode::NOT_FOUND,
        EngineError::PredecessorMismatch { .. }
        | EngineError::WouldCreateCycle { .. }
        | EngineError::DocumentTypeMismatch { .. } => StatusCode::CONFLICT,
        EngineError::ScorerUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
        EngineError::InconsistentState { .. }
        | EngineError::Core(_)
        | EngineError::Store(_) => StatusCode::INTERNAL_SERVER_ERROR,
      },
    }
  }
}

impl IntoResponse for ApiError {
  fn into_response(self) -> Response {
    let status = self.status();
    if status.is_server_error() {
      tracing::error!(error = %self, "request failed");
    }
    (status, Json(json!({ "error": self.to_string() }))).into_response()
  }
}
