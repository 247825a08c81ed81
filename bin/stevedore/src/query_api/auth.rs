use axum::body::Body;
use axum::extract::State;
use axum::http::Request;
use axum::middleware::Next;
use axum::response::Response;
use response::CoreError;

use super::QueryState;

/// Validates the per-deployment bearer token against `query_tokens` and
/// carries the resolved deployment name into the request extensions.
/// Authentication is deliberately unscoped: a valid token from any
/// deployment can read any deployment's status (§4.8 open question (a),
/// resolved as "no scoping" -- see DESIGN.md).
pub async fn require_token(
  State(state): State<QueryState>,
  mut req: Request<Body>,
  next: Next,
) -> Result<Response, CoreError> {
  let token = req
    .headers()
    .get(axum::http::header::AUTHORIZATION)
    .and_then(|v| v.to_str().ok())
    .and_then(|v| v.strip_prefix("Bearer "))
    .filter(|t| !t.is_empty())
    .ok_or_else(|| CoreError::Auth("missing or malformed Authorization header".to_string()))?
    .to_string();

  let deployment = state
    .app
    .store
    .deployment_for_token(&token)
    .await?
    .ok_or_else(|| CoreError::Auth("unknown query token".to_string()))?;

  req.extensions_mut().insert(AuthenticatedDeployment(deployment));
  Ok(next.run(req).await)
}

#[derive(Clone)]
pub struct AuthenticatedDeployment(pub String);
