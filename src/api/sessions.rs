use axum::Router;
use axum::extract::State;
use axum::http::header::SET_COOKIE;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, http::StatusCode};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::auth::middleware::AuthUser;
use crate::auth::{password, token};
use crate::error::ApiError;
use crate::store::AppState;

/// Platform sessions live 30 days, matching the bearer-token lifetime issued
/// by the OAuth token endpoint (spec §4.5).
const SESSION_TTL_DAYS: i64 = 30;

#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    pub handle: String,
    pub password: String,
}

#[derive(Debug, Deserialize)]
pub struct SignupRequest {
    pub handle: String,
    pub email: String,
    pub password: String,
}

#[derive(Debug, Serialize)]
pub struct UserResponse {
    pub id: Uuid,
    pub handle: String,
    pub is_admin: bool,
}

#[derive(Debug, Serialize)]
pub struct MeResponse {
    #[serde(flatten)]
    pub user: UserResponse,
}

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/api/auth/signup", post(signup))
        .route("/api/auth/login", post(login))
        .route("/api/auth/logout", post(logout))
        .route("/api/auth/me", get(me))
}

struct UserRow {
    id: Uuid,
    handle: String,
    password_hash: String,
    is_admin: bool,
}

/// Shared by `signup` and `login`: mint a session row for `user` and build the
/// `Set-Cookie` + JSON response both endpoints return.
async fn issue_session(state: &AppState, user: UserRow) -> Result<Response, ApiError> {
    let (raw, hash) = token::generate_session_token();
    let expires_at = Utc::now() + chrono::Duration::days(SESSION_TTL_DAYS);

    sqlx::query!(
        "INSERT INTO auth_sessions (user_id, token_hash, expires_at) VALUES ($1, $2, $3)",
        user.id,
        hash,
        expires_at,
    )
    .execute(&state.pool)
    .await?;

    let body = Json(UserResponse {
        id: user.id,
        handle: user.handle,
        is_admin: user.is_admin,
    });

    let cookie = format!(
        "session={raw}; Path=/; HttpOnly; SameSite=Lax; Max-Age={}",
        SESSION_TTL_DAYS * 24 * 60 * 60
    );

    Ok((StatusCode::OK, [(SET_COOKIE, cookie)], body).into_response())
}

/// Ordinary users come into existence here; `store::bootstrap` only ever
/// creates the one hard-coded admin account on first run.
async fn signup(
    State(state): State<AppState>,
    Json(req): Json<SignupRequest>,
) -> Result<Response, ApiError> {
    let handle = crate::id::sanitize_id(&req.handle)?;
    if req.password.len() < 8 {
        return Err(ApiError::BadRequest(
            "password must be at least 8 characters".into(),
        ));
    }

    let hash = password::hash_password(&req.password).map_err(ApiError::Internal)?;

    let row = sqlx::query_as!(
        UserRow,
        r#"INSERT INTO users (handle, email, password_hash, is_admin)
           VALUES ($1, $2, $3, false)
           RETURNING id, handle, password_hash, is_admin"#,
        handle,
        req.email,
        hash,
    )
    .fetch_one(&state.pool)
    .await?;

    issue_session(&state, row).await
}

async fn login(
    State(state): State<AppState>,
    Json(req): Json<LoginRequest>,
) -> Result<Response, ApiError> {
    let row = sqlx::query_as!(
        UserRow,
        r#"SELECT id, handle, password_hash, is_admin FROM users WHERE handle = $1"#,
        req.handle,
    )
    .fetch_optional(&state.pool)
    .await?
    .ok_or(ApiError::Unauthorized)?;

    let valid =
        password::verify_password(&req.password, &row.password_hash).map_err(ApiError::Internal)?;
    if !valid {
        return Err(ApiError::Unauthorized);
    }

    issue_session(&state, row).await
}

async fn logout(State(state): State<AppState>, auth: AuthUser) -> Result<Response, ApiError> {
    sqlx::query!("DELETE FROM auth_sessions WHERE user_id = $1", auth.user_id)
        .execute(&state.pool)
        .await?;

    let cleared = "session=; Path=/; HttpOnly; SameSite=Lax; Max-Age=0";
    Ok((StatusCode::NO_CONTENT, [(SET_COOKIE, cleared)]).into_response())
}

async fn me(auth: AuthUser) -> Json<MeResponse> {
    Json(MeResponse {
        user: UserResponse {
            id: auth.user_id,
            handle: auth.handle,
            is_admin: auth.is_admin,
        },
    })
}
