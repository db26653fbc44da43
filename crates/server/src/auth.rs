//! Identity for socket upgrades.
//!
//! Agents connect to `/cable?token=<jwt>`. Access tokens are HS256 JWTs
//! signed with `JWT_SECRET` by the login endpoint. Development setups may
//! also pass `?user_id=<uuid>` directly when `WS_ALLOW_USER_ID` is on.

use axum::{
    extract::{FromRef, FromRequestParts, Query},
    http::{request::Parts, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use supportdesk_shared::ProblemDetails;
use uuid::Uuid;

use crate::state::AppState;

/// Claims carried by access tokens.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccessTokenClaims {
    pub user_id: Uuid,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub account_id: Option<Uuid>,
    pub exp: usize,
    pub iat: usize,
}

#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    #[error("token or user_id required")]
    MissingCredentials,
    #[error("invalid token: {0}")]
    InvalidToken(#[from] jsonwebtoken::errors::Error),
    #[error("invalid user_id")]
    InvalidUserId,
    #[error("user_id authentication is disabled")]
    UserIdAuthDisabled,
}

impl IntoResponse for AuthError {
    fn into_response(self) -> Response {
        let problem = match &self {
            AuthError::InvalidToken(_) => ProblemDetails::unauthorized(self.to_string()),
            AuthError::UserIdAuthDisabled => ProblemDetails::unauthorized(self.to_string()),
            AuthError::MissingCredentials | AuthError::InvalidUserId => {
                ProblemDetails::bad_request(self.to_string())
            }
        };
        let status = StatusCode::from_u16(problem.status).unwrap_or(StatusCode::BAD_REQUEST);
        (status, Json(problem)).into_response()
    }
}

/// Issue an access token for `user_id`, valid for `ttl`.
pub fn issue_token(
    user_id: Uuid,
    secret: &str,
    ttl: chrono::Duration,
) -> Result<String, jsonwebtoken::errors::Error> {
    let now = chrono::Utc::now();
    let claims = AccessTokenClaims {
        user_id,
        email: None,
        role: None,
        account_id: None,
        iat: now.timestamp() as usize,
        exp: (now + ttl).timestamp() as usize,
    };

    jsonwebtoken::encode(
        &Header::new(Algorithm::HS256),
        &claims,
        &EncodingKey::from_secret(secret.as_bytes()),
    )
}

/// Validate an incoming token and return its claims.
pub fn validate_token(token: &str, secret: &str) -> Result<AccessTokenClaims, AuthError> {
    let data = jsonwebtoken::decode::<AccessTokenClaims>(
        token,
        &DecodingKey::from_secret(secret.as_bytes()),
        &Validation::new(Algorithm::HS256),
    )?;
    Ok(data.claims)
}

#[derive(Debug, Default, Deserialize)]
struct CableParams {
    token: Option<String>,
    user_id: Option<String>,
}

/// User resolved from the `/cable` query string.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AuthenticatedUser {
    pub user_id: Uuid,
}

impl<S> FromRequestParts<S> for AuthenticatedUser
where
    S: Send + Sync,
    AppState: FromRef<S>,
{
    type Rejection = AuthError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let app_state = AppState::from_ref(state);
        let params = Query::<CableParams>::try_from_uri(&parts.uri)
            .map(|Query(params)| params)
            .unwrap_or_default();

        let result = resolve_user(&params, &app_state);
        if let Err(e) = &result {
            tracing::warn!("WebSocket auth failed: {}", e);
        }
        result
    }
}

fn resolve_user(params: &CableParams, state: &AppState) -> Result<AuthenticatedUser, AuthError> {
    if let Some(token) = params.token.as_deref().filter(|t| !t.is_empty()) {
        let claims = validate_token(token, &state.config.jwt_secret)?;
        return Ok(AuthenticatedUser {
            user_id: claims.user_id,
        });
    }

    let raw = params
        .user_id
        .as_deref()
        .filter(|u| !u.is_empty())
        .ok_or(AuthError::MissingCredentials)?;
    if !state.config.allow_user_id_auth {
        return Err(AuthError::UserIdAuthDisabled);
    }
    let user_id = Uuid::parse_str(raw).map_err(|_| AuthError::InvalidUserId)?;
    Ok(AuthenticatedUser { user_id })
}

#[cfg(test)]
mod tests {
    use super::*;

    const SECRET: &str = "test-secret";

    #[test]
    fn issued_token_validates() {
        let user_id = Uuid::new_v4();
        let token = issue_token(user_id, SECRET, chrono::Duration::hours(1)).unwrap();

        let claims = validate_token(&token, SECRET).unwrap();
        assert_eq!(claims.user_id, user_id);
    }

    #[test]
    fn wrong_secret_is_rejected() {
        let token = issue_token(Uuid::new_v4(), SECRET, chrono::Duration::hours(1)).unwrap();
        assert!(matches!(
            validate_token(&token, "other-secret"),
            Err(AuthError::InvalidToken(_))
        ));
    }

    #[test]
    fn expired_token_is_rejected() {
        let token = issue_token(Uuid::new_v4(), SECRET, chrono::Duration::hours(-2)).unwrap();
        assert!(validate_token(&token, SECRET).is_err());
    }

    #[test]
    fn rejections_map_to_problem_status() {
        assert_eq!(
            AuthError::MissingCredentials.into_response().status(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            AuthError::UserIdAuthDisabled.into_response().status(),
            StatusCode::UNAUTHORIZED
        );
    }
}
