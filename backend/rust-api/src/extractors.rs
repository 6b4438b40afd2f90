use axum::{
    extract::{FromRequest, FromRequestParts, Request},
    http::{request::Parts, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use jsonwebtoken::{decode, DecodingKey, Validation};
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;

use crate::services::AppState;

/// Custom JSON extractor that returns JSON error responses instead of HTML
pub struct AppJson<T>(pub T);

impl<T, S> FromRequest<S> for AppJson<T>
where
    T: serde::de::DeserializeOwned + 'static,
    S: Send + Sync,
{
    type Rejection = Response;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        match Json::<T>::from_request(req, state).await {
            Ok(Json(value)) => Ok(AppJson(value)),
            Err(rejection) => {
                let message = format!("Failed to parse JSON request body: {}", rejection);
                tracing::warn!("{}", message);
                let error_response = json!({
                    "message": message,
                    "status": 400
                });
                Err((StatusCode::BAD_REQUEST, Json(error_response)).into_response())
            }
        }
    }
}

#[derive(Debug, Deserialize)]
struct BearerClaims {
    sub: String,
    #[allow(dead_code)]
    exp: usize,
}

/// Who is practicing. The opaque `X-Session-ID` header is the identity;
/// a bearer token, when present and valid, additionally names the
/// logged-in user so anonymous history can be merged.
#[derive(Debug, Clone)]
pub struct SessionIdentity {
    pub session_id: String,
    pub user_id: Option<String>,
}

impl FromRequestParts<Arc<AppState>> for SessionIdentity {
    type Rejection = Response;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &Arc<AppState>,
    ) -> Result<Self, Self::Rejection> {
        let session_id = parts
            .headers
            .get("x-session-id")
            .and_then(|v| v.to_str().ok())
            .map(str::trim)
            .filter(|s| !s.is_empty() && s.len() <= 128)
            .map(str::to_string)
            .ok_or_else(|| {
                let body = json!({
                    "success": false,
                    "error": "Session ID is required"
                });
                (StatusCode::BAD_REQUEST, Json(body)).into_response()
            })?;

        // An invalid token downgrades to anonymous rather than failing
        // the request.
        let user_id = parts
            .headers
            .get("authorization")
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.strip_prefix("Bearer "))
            .and_then(|token| {
                let key = DecodingKey::from_secret(state.config.jwt_secret.as_bytes());
                match decode::<BearerClaims>(token, &key, &Validation::default()) {
                    Ok(data) => Some(data.claims.sub),
                    Err(e) => {
                        tracing::debug!(error = %e, "ignoring invalid bearer token");
                        None
                    }
                }
            });

        Ok(SessionIdentity {
            session_id,
            user_id,
        })
    }
}
