use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde_json::json;

/// The error taxonomy that crosses an API boundary. Pipeline-internal
/// errors (git/store/compose failures recorded to `sync_status`) travel
/// as plain `anyhow::Error` and never need this type -- `CoreError` only
/// exists where a response has to be rendered.
#[derive(Debug, thiserror::Error)]
pub enum CoreError {
  #[error("{0}")]
  Validation(String),

  #[error("{0}")]
  NotFound(String),

  #[error("{0}")]
  Auth(String),

  #[error("version mismatch: {0}")]
  VersionMismatch(String),

  #[error("{0}")]
  Timeout(String),

  #[error("{0}")]
  Busy(String),

  #[error(transparent)]
  Internal(#[from] anyhow::Error),
}

impl CoreError {
  fn status(&self) -> StatusCode {
    match self {
      CoreError::Validation(_) => StatusCode::BAD_REQUEST,
      CoreError::NotFound(_) => StatusCode::NOT_FOUND,
      CoreError::Auth(_) => StatusCode::UNAUTHORIZED,
      CoreError::VersionMismatch(_) => StatusCode::CONFLICT,
      CoreError::Timeout(_) => StatusCode::GATEWAY_TIMEOUT,
      CoreError::Busy(_) => StatusCode::CONFLICT,
      CoreError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
  }
}

impl IntoResponse for CoreError {
  fn into_response(self) -> Response {
    let status = self.status();
    if status == StatusCode::INTERNAL_SERVER_ERROR {
      tracing::error!(error = %self, "internal error");
    }
    (status, Json(json!({ "error": self.to_string() }))).into_response()
  }
}

pub type CoreResult<T> = Result<T, CoreError>;

#[cfg(test)]
mod tests {
  use super::*;
  use axum::body::to_bytes;

  #[tokio::test]
  async fn version_mismatch_renders_409_with_error_body() {
    let response =
      CoreError::VersionMismatch("daemon is V1/B1, client sent V2/B1".to_string())
        .into_response();
    assert_eq!(response.status(), StatusCode::CONFLICT);

    let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let value: serde_json::Value = serde_json::from_slice(&body).unwrap();
    assert!(value["error"].as_str().unwrap().starts_with("version mismatch"));
  }

  #[tokio::test]
  async fn not_found_renders_404() {
    let response = CoreError::NotFound("deployment 'x' not found".to_string())
      .into_response();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
  }

  #[tokio::test]
  async fn internal_errors_render_500_without_leaking_detail_shape() {
    let response: Response =
      CoreError::from(anyhow::anyhow!("disk is on fire")).into_response();
    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
  }
}
