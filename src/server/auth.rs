//! Auth guard (C0d, SPEC_FULL.md §4 C0d): a minimal bearer-token +
//! `X-Workspace-Id` header guard. Issuance and refresh of tokens are out of
//! scope (spec.md §1); this extractor only verifies a pre-issued HS256
//! token's signature and expiry and rejects blacklisted ones.

use axum::extract::FromRequestParts;
use axum::http::request::Parts;
use axum::http::{HeaderMap, StatusCode, Uri};
use axum::response::{IntoResponse, Response};
use jsonwebtoken::{decode, Algorithm, DecodingKey, Validation};
use serde::{Deserialize, Serialize};

use super::AppState;

#[derive(Debug, Serialize, Deserialize)]
pub struct Claims {
    pub sub: String,
    pub jti: String,
    pub exp: i64,
}

/// The authenticated caller, resolved from the request on every route
/// except auth itself.
#[derive(Debug, Clone)]
pub struct AuthContext {
    pub user_id: String,
    pub workspace_id: String,
}

#[derive(Debug)]
pub struct AuthRejection(StatusCode, &'static str);

impl IntoResponse for AuthRejection {
    fn into_response(self) -> Response {
        (self.0, self.1).into_response()
    }
}

fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(axum::http::header::AUTHORIZATION)?
        .to_str()
        .ok()?
        .strip_prefix("Bearer ")
}

/// SSE clients (`EventSource`) cannot set arbitrary headers, so spec.md §6
/// allows the token via `?token=` on `GET /uploads/{id}/status`.
fn token_from_query(uri: &Uri) -> Option<String> {
    uri.query()?.split('&').find_map(|pair| {
        let (k, v) = pair.split_once('=')?;
        (k == "token").then(|| v.to_string())
    })
}

async fn authenticate(
    state: &AppState,
    headers: &HeaderMap,
    uri: &Uri,
) -> Result<AuthContext, AuthRejection> {
    let query_token = token_from_query(uri);
    let token = bearer_token(headers)
        .map(str::to_string)
        .or(query_token)
        .ok_or(AuthRejection(StatusCode::UNAUTHORIZED, "missing bearer token"))?;

    let workspace_id = headers
        .get("x-workspace-id")
        .and_then(|v| v.to_str().ok())
        .filter(|v| !v.is_empty())
        .ok_or(AuthRejection(
            StatusCode::UNAUTHORIZED,
            "missing X-Workspace-Id header",
        ))?
        .to_string();

    let mut validation = Validation::new(Algorithm::HS256);
    validation.validate_exp = true;
    let data = decode::<Claims>(
        &token,
        &DecodingKey::from_secret(state.jwt_secret.as_bytes()),
        &validation,
    )
    .map_err(|_| AuthRejection(StatusCode::UNAUTHORIZED, "invalid or expired token"))?;

    let blacklisted = state
        .blacklist
        .is_blacklisted(&data.claims.jti)
        .await
        .unwrap_or(false);
    if blacklisted {
        return Err(AuthRejection(StatusCode::UNAUTHORIZED, "token revoked"));
    }

    Ok(AuthContext {
        user_id: data.claims.sub,
        workspace_id,
    })
}

impl FromRequestParts<AppState> for AuthContext {
    type Rejection = AuthRejection;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        authenticate(state, &parts.headers, &parts.uri).await
    }
}

/// Shared by other handler test modules that need a signed bearer token
/// without duplicating the JWT plumbing.
#[cfg(test)]
pub mod test_support {
    use jsonwebtoken::{encode, Algorithm, EncodingKey, Header};

    use super::Claims;

    pub fn sign(secret: &str, jti: &str) -> String {
        sign_with_ttl(secret, jti, 900)
    }

    pub fn sign_with_ttl(secret: &str, jti: &str, exp_offset_secs: i64) -> String {
        let claims = Claims {
            sub: "user-1".to_string(),
            jti: jti.to_string(),
            exp: chrono::Utc::now().timestamp() + exp_offset_secs,
        };
        encode(
            &Header::new(Algorithm::HS256),
            &claims,
            &EncodingKey::from_secret(secret.as_bytes()),
        )
        .unwrap()
    }
}

#[cfg(test)]
mod tests {
    use super::test_support::sign_with_ttl as sign;
    use super::*;
    use axum::http::HeaderValue;

    #[tokio::test]
    async fn rejects_missing_token() {
        let tmp = tempfile::tempdir().unwrap();
        let state = super::super::tests_support::test_state(tmp.path()).await;
        let headers = HeaderMap::new();
        let uri: Uri = "/uploads".parse().unwrap();
        assert!(authenticate(&state, &headers, &uri).await.is_err());
    }

    #[tokio::test]
    async fn accepts_valid_token_and_workspace_header() {
        let tmp = tempfile::tempdir().unwrap();
        let state = super::super::tests_support::test_state(tmp.path()).await;
        let token = sign(&state.jwt_secret, "jti-1", 900);

        let mut headers = HeaderMap::new();
        headers.insert(
            axum::http::header::AUTHORIZATION,
            HeaderValue::from_str(&format!("Bearer {token}")).unwrap(),
        );
        headers.insert("x-workspace-id", HeaderValue::from_static("ws-1"));
        let uri: Uri = "/uploads".parse().unwrap();

        let ctx = authenticate(&state, &headers, &uri).await.unwrap();
        assert_eq!(ctx.workspace_id, "ws-1");
        assert_eq!(ctx.user_id, "user-1");
    }

    #[tokio::test]
    async fn rejects_blacklisted_token() {
        let tmp = tempfile::tempdir().unwrap();
        let state = super::super::tests_support::test_state(tmp.path()).await;
        let token = sign(&state.jwt_secret, "jti-2", 900);
        state
            .blacklist
            .blacklist("jti-2", std::time::Duration::from_secs(60))
            .await
            .unwrap();

        let mut headers = HeaderMap::new();
        headers.insert(
            axum::http::header::AUTHORIZATION,
            HeaderValue::from_str(&format!("Bearer {token}")).unwrap(),
        );
        headers.insert("x-workspace-id", HeaderValue::from_static("ws-1"));
        let uri: Uri = "/uploads".parse().unwrap();

        assert!(authenticate(&state, &headers, &uri).await.is_err());
    }

    #[tokio::test]
    async fn falls_back_to_query_token_for_sse() {
        let tmp = tempfile::tempdir().unwrap();
        let state = super::super::tests_support::test_state(tmp.path()).await;
        let token = sign(&state.jwt_secret, "jti-3", 900);

        let mut headers = HeaderMap::new();
        headers.insert("x-workspace-id", HeaderValue::from_static("ws-1"));
        let uri: Uri = format!("/uploads/u1/status?token={token}").parse().unwrap();

        assert!(authenticate(&state, &headers, &uri).await.is_ok());
    }
}
