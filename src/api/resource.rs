use axum::extract::State;
use axum::http::HeaderMap;
use axum::http::header::AUTHORIZATION;
use axum::routing::get;
use axum::{Json, Router};
use serde::Serialize;

use crate::error::ApiError;
use crate::oauth::jwt::{self, Claims};
use crate::store::AppState;

/// Example bearer-protected resource endpoint (spec §6 `GET /api/*`).
/// Demonstrates the validation sequence real endpoints reuse: parse
/// `Authorization: Bearer`, verify HS256 + `exp`, confirm the grant is
/// still live, check scope.
pub fn router() -> Router<AppState> {
    Router::new().route("/api/userinfo", get(userinfo))
}

#[derive(Debug, Serialize)]
struct UserInfoResponse {
    handle: String,
    email: String,
}

async fn userinfo(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<UserInfoResponse>, ApiError> {
    let claims = authenticate_bearer(&state, &headers, "user:read").await?;

    let row = sqlx::query!(
        "SELECT handle, email FROM users WHERE id = $1",
        claims.sub,
    )
    .fetch_optional(&state.pool)
    .await?
    .ok_or(ApiError::Unauthorized)?;

    Ok(Json(UserInfoResponse {
        handle: row.handle,
        email: row.email,
    }))
}

/// Parse and verify `Authorization: Bearer <jwt>`, look up the (User,
/// Project) OAuthAuthorization the claims reference, reject if absent or
/// revoked, and check the required scope (spec §4.5 "Bearer token
/// validation").
pub async fn authenticate_bearer(
    state: &AppState,
    headers: &HeaderMap,
    required_scope: &str,
) -> Result<Claims, ApiError> {
    let token = headers
        .get(AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .ok_or(ApiError::Unauthorized)?;

    let claims = jwt::validate(&state.config.jwt_secret, token).map_err(|_| ApiError::Unauthorized)?;

    let live: bool = sqlx::query_scalar!(
        r#"SELECT EXISTS(
             SELECT 1 FROM oauth_authorizations
             WHERE user_id = $1 AND project_id = $2 AND NOT revoked
           ) as "exists!""#,
        claims.sub,
        claims.client_id,
    )
    .fetch_one(&state.pool)
    .await?;

    if !live {
        return Err(ApiError::Unauthorized);
    }

    if !jwt::scope_contains(&claims.scope, required_scope) {
        return Err(ApiError::InsufficientScope(required_scope.to_owned()));
    }

    Ok(claims)
}
