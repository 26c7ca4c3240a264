use axum::extract::FromRequestParts;
use axum::http::request::Parts;
use sqlx::PgPool;
use uuid::Uuid;

use crate::auth::token;
use crate::error::ApiError;
use crate::store::AppState;

/// The platform user behind the current request, resolved from the `session`
/// cookie. Required by the OAuth authorize endpoint ("requires an
/// authenticated platform session", spec §4.5) and by project-management
/// handlers.
#[derive(Debug, Clone)]
pub struct AuthUser {
    pub user_id: Uuid,
    pub handle: String,
    pub is_admin: bool,
}

struct SessionLookup {
    user_id: Uuid,
    handle: String,
    is_admin: bool,
}

impl FromRequestParts<AppState> for AuthUser {
    type Rejection = ApiError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let raw = extract_session_cookie(parts).ok_or(ApiError::Unauthorized)?;
        let row = lookup_session(&state.pool, &raw)
            .await?
            .ok_or(ApiError::Unauthorized)?;

        Ok(Self {
            user_id: row.user_id,
            handle: row.handle,
            is_admin: row.is_admin,
        })
    }
}

/// Optional auth — returns `None` for unauthenticated requests instead of 401.
#[derive(Debug, Clone)]
pub struct OptionalAuthUser(pub Option<AuthUser>);

impl FromRequestParts<AppState> for OptionalAuthUser {
    type Rejection = ApiError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        match AuthUser::from_request_parts(parts, state).await {
            Ok(user) => Ok(Self(Some(user))),
            Err(ApiError::Unauthorized) => Ok(Self(None)),
            Err(e) => Err(e),
        }
    }
}

fn extract_session_cookie(parts: &Parts) -> Option<String> {
    let cookies = parts
        .headers
        .get(axum::http::header::COOKIE)?
        .to_str()
        .ok()?;
    for cookie in cookies.split(';') {
        let cookie = cookie.trim();
        if let Some(value) = cookie.strip_prefix("session=")
            && !value.is_empty()
        {
            return Some(value.to_owned());
        }
    }
    None
}

async fn lookup_session(
    pool: &PgPool,
    raw_token: &str,
) -> Result<Option<SessionLookup>, ApiError> {
    let hash = token::hash_token(raw_token);

    let row = sqlx::query_as!(
        SessionLookup,
        r#"
        SELECT u.id as "user_id!", u.handle as "handle!", u.is_admin as "is_admin!"
        FROM auth_sessions s
        JOIN users u ON u.id = s.user_id
        WHERE s.token_hash = $1
          AND s.expires_at > now()
        "#,
        hash,
    )
    .fetch_optional(pool)
    .await?;

    Ok(row)
}
