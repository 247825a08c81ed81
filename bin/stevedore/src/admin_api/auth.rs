use axum::body::Body;
use axum::extract::State;
use axum::http::Request;
use axum::middleware::Next;
use axum::response::Response;
use response::CoreError;
use subtle::ConstantTimeEq;

use super::AdminState;

const BEARER_PREFIX: &str = "Bearer ";

fn bearer_token(req: &Request<Body>) -> Result<&str, CoreError> {
  req
    .headers()
    .get(axum::http::header::AUTHORIZATION)
    .and_then(|v| v.to_str().ok())
    .and_then(|v| v.strip_prefix(BEARER_PREFIX))
    .filter(|token| !token.is_empty())
    .ok_or_else(|| CoreError::Auth("missing or malformed Authorization header".to_string()))
}

fn header_str<'a>(req: &'a Request<Body>, name: &str) -> Result<&'a str, CoreError> {
  req
    .headers()
    .get(name)
    .and_then(|v| v.to_str().ok())
    .filter(|v| !v.is_empty())
    .ok_or_else(|| CoreError::Validation(format!("missing required header '{name}'")))
}

/// Constant-time bearer-token check against the admin key, then strict
/// version/build header equality against the running daemon (§4.7).
/// Order matters: an unauthenticated caller must not learn the running
/// version/build through a 409 before clearing auth.
pub async fn require_auth_and_version(
  State(state): State<AdminState>,
  req: Request<Body>,
  next: Next,
) -> Result<Response, CoreError> {
  let token = bearer_token(&req)?;
  let expected = state.admin_key.as_bytes();
  if token.as_bytes().ct_eq(expected).unwrap_u8() != 1 {
    return Err(CoreError::Auth("invalid admin key".to_string()));
  }

  let client_version = header_str(&req, "x-stevedore-version")?;
  let client_build = header_str(&req, "x-stevedore-build")?;
  if client_version != state.app.config.version || client_build != state.app.config.build {
    return Err(CoreError::VersionMismatch(format!(
      "daemon is {}/{}, client sent {}/{}",
      state.app.config.version, state.app.config.build, client_version, client_build
    )));
  }

  Ok(next.run(req).await)
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn equal_tokens_compare_equal_in_constant_time() {
    assert_eq!(b"secret".ct_eq(b"secret").unwrap_u8(), 1);
    assert_eq!(b"secret".ct_eq(b"wrong!").unwrap_u8(), 0);
  }
}
