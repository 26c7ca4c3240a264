use axum::extract::{Path, Query, State};
use axum::http::header::{AUTHORIZATION, LOCATION};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{delete, get, post};
use axum::{Form, Json, Router};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::activity::{ActivityEntry, write_activity};
use crate::auth::middleware::AuthUser;
use crate::error::ApiError;
use crate::oauth::{client, code, jwt};
use crate::store::AppState;

const DEFAULT_SCOPE: &str = "user:read";
const CODE_TTL_MINUTES: i64 = 10;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/oauth/authorize", get(authorize_get).post(authorize_post))
        .route("/oauth/token", post(token))
        .route("/api/me/authorizations", get(list_own_authorizations))
        .route(
            "/api/me/authorizations/{client_id}",
            delete(revoke_own_authorization),
        )
}

#[derive(Debug, Serialize)]
struct AuthorizationResponse {
    project_id: String,
    scopes: String,
}

/// The grants a user has made to OAuth clients (hosted Projects), so they
/// can review and revoke them — the "granting user" side of spec §3's
/// lifecycle ("revoked ... or by the granting user"), distinct from the
/// project-owner-only management in §4.5 (`api::projects::revoke_authorization`,
/// which instead takes a `user_id` to revoke someone else's grant).
async fn list_own_authorizations(
    State(state): State<AppState>,
    auth: AuthUser,
) -> Result<Json<Vec<AuthorizationResponse>>, ApiError> {
    let rows = sqlx::query_as!(
        AuthorizationResponse,
        r#"
        SELECT project_id, scopes
        FROM oauth_authorizations
        WHERE user_id = $1 AND NOT revoked
        ORDER BY updated_at DESC
        "#,
        auth.user_id,
    )
    .fetch_all(&state.pool)
    .await?;

    Ok(Json(rows))
}

/// A user revoking their own consent for a client Project (spec §3).
async fn revoke_own_authorization(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(client_id): Path<String>,
) -> Result<StatusCode, ApiError> {
    let revoked = sqlx::query!(
        "UPDATE oauth_authorizations SET revoked = true, updated_at = now() WHERE user_id = $1 AND project_id = $2 AND NOT revoked",
        auth.user_id,
        client_id,
    )
    .execute(&state.pool)
    .await?
    .rows_affected();

    if revoked == 0 {
        return Err(ApiError::NotFound("authorization".into()));
    }

    Ok(StatusCode::NO_CONTENT)
}

// ---------------------------------------------------------------------------
// GET/POST /oauth/authorize
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct AuthorizeQuery {
    client_id: String,
    redirect_uri: String,
    response_type: String,
    scope: Option<String>,
    state: Option<String>,
}

#[derive(Debug, Serialize)]
struct ConsentScreen {
    client_id: String,
    scope: String,
    state: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ConsentDecision {
    client_id: String,
    redirect_uri: String,
    scope: Option<String>,
    state: Option<String>,
    action: String,
}

/// Validate the fixed parts of an authorize request shared by GET and POST:
/// `response_type=code`, project exists, `redirect_uri` matches the fixed
/// per-project value exactly (spec §4.5).
async fn validate_client(
    state: &AppState,
    client_id: &str,
    redirect_uri: &str,
    response_type: &str,
) -> Result<(), ApiError> {
    if response_type != "code" {
        return Err(ApiError::BadRequest(
            "response_type must be 'code'".into(),
        ));
    }

    let exists: bool = sqlx::query_scalar!(
        r#"SELECT EXISTS(SELECT 1 FROM projects WHERE id = $1) as "exists!""#,
        client_id,
    )
    .fetch_one(&state.pool)
    .await?;
    if !exists {
        return Err(ApiError::NotFound("client".into()));
    }

    let expected = state.config.redirect_uri_for(client_id);
    if redirect_uri != expected {
        return Err(ApiError::BadRequest("redirect_uri mismatch".into()));
    }

    Ok(())
}

/// GET: requires an authenticated platform session. Short-circuits to an
/// immediate code issuance if a non-revoked Authorization already exists
/// with identical scopes; otherwise renders a consent screen (rendering
/// itself is an external collaborator — this returns the data it needs).
async fn authorize_get(
    State(state): State<AppState>,
    auth: AuthUser,
    Query(query): Query<AuthorizeQuery>,
) -> Result<Response, ApiError> {
    validate_client(
        &state,
        &query.client_id,
        &query.redirect_uri,
        &query.response_type,
    )
    .await?;

    let scope = query.scope.clone().unwrap_or_else(|| DEFAULT_SCOPE.to_owned());

    let existing: Option<String> = sqlx::query_scalar!(
        "SELECT scopes FROM oauth_authorizations WHERE user_id = $1 AND project_id = $2 AND NOT revoked",
        auth.user_id,
        query.client_id,
    )
    .fetch_optional(&state.pool)
    .await?;

    if existing.as_deref() == Some(scope.as_str()) {
        let location = issue_code(
            &state,
            &query.client_id,
            auth.user_id,
            &query.redirect_uri,
            &scope,
            query.state.as_deref(),
        )
        .await?;
        return Ok(redirect(&location));
    }

    Ok(Json(ConsentScreen {
        client_id: query.client_id,
        scope,
        state: query.state,
    })
    .into_response())
}

/// POST: the consent decision. `action=deny` redirects with an error;
/// otherwise upserts the Authorization (un-revoking/overwriting scopes),
/// records a `joined` Activity on first consent, and issues a code.
async fn authorize_post(
    State(state): State<AppState>,
    auth: AuthUser,
    Form(decision): Form<ConsentDecision>,
) -> Result<Response, ApiError> {
    validate_client(&state, &decision.client_id, &decision.redirect_uri, "code").await?;

    if decision.action == "deny" {
        let state_param = decision
            .state
            .map(|s| format!("&state={s}"))
            .unwrap_or_default();
        return Ok(redirect(&format!(
            "{}?error=access_denied{state_param}",
            decision.redirect_uri
        )));
    }

    let scope = decision.scope.unwrap_or_else(|| DEFAULT_SCOPE.to_owned());

    let was_first_consent = sqlx::query_scalar!(
        r#"SELECT NOT EXISTS(
             SELECT 1 FROM oauth_authorizations WHERE user_id = $1 AND project_id = $2
           ) as "first!""#,
        auth.user_id,
        decision.client_id,
    )
    .fetch_one(&state.pool)
    .await?;

    // Write order: upsert Authorization, then insert Code (spec §5) — a
    // reader seeing a Code row is guaranteed to also see the Authorization.
    // Prefers un-revoking/overwriting an existing row over inserting a new
    // one, per spec §4.2 "un-revoke if revoked, overwrite scopes".
    sqlx::query!(
        r#"
        WITH updated AS (
            UPDATE oauth_authorizations
            SET scopes = $3, revoked = false, updated_at = now()
            WHERE id = (
                SELECT id FROM oauth_authorizations
                WHERE user_id = $1 AND project_id = $2
                ORDER BY revoked ASC, updated_at DESC
                LIMIT 1
            )
            RETURNING id
        )
        INSERT INTO oauth_authorizations (user_id, project_id, scopes, revoked)
        SELECT $1, $2, $3, false
        WHERE NOT EXISTS (SELECT 1 FROM updated)
        "#,
        auth.user_id,
        decision.client_id,
        scope,
    )
    .execute(&state.pool)
    .await?;

    if was_first_consent {
        write_activity(
            &state.pool,
            &ActivityEntry {
                user_id: auth.user_id,
                verb: "joined",
                subject_type: "project",
                subject_id: &decision.client_id,
                content: None,
            },
        )
        .await;
    }

    let location = issue_code(
        &state,
        &decision.client_id,
        auth.user_id,
        &decision.redirect_uri,
        &scope,
        decision.state.as_deref(),
    )
    .await?;

    Ok(redirect(&location))
}

async fn issue_code(
    state: &AppState,
    client_id: &str,
    user_id: Uuid,
    redirect_uri: &str,
    scope: &str,
    state_param: Option<&str>,
) -> Result<String, ApiError> {
    let (plaintext, hash) = code::generate();
    let expires_at = chrono::Utc::now() + chrono::Duration::minutes(CODE_TTL_MINUTES);

    sqlx::query!(
        r#"
        INSERT INTO oauth_authorization_codes
            (project_id, user_id, code_hash, redirect_uri, scopes, expires_at)
        VALUES ($1, $2, $3, $4, $5, $6)
        "#,
        client_id,
        user_id,
        hash,
        redirect_uri,
        scope,
        expires_at,
    )
    .execute(&state.pool)
    .await?;

    let state_query = state_param
        .map(|s| format!("&state={s}"))
        .unwrap_or_default();
    Ok(format!("{redirect_uri}?code={plaintext}{state_query}"))
}

fn redirect(location: &str) -> Response {
    (
        StatusCode::FOUND,
        [(LOCATION, location.to_owned())],
    )
        .into_response()
}

// ---------------------------------------------------------------------------
// POST /oauth/token
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct TokenRequest {
    grant_type: String,
    code: String,
    redirect_uri: String,
}

#[derive(Debug, Serialize)]
struct TokenResponse {
    access_token: String,
    token_type: &'static str,
    expires_in: i64,
    scope: String,
}

/// Exchange an authorization code for a bearer token. Validation runs in the
/// exact order spec'd in §4.5, each step failing with a distinct error
/// before the next is attempted.
#[tracing::instrument(skip(state, headers, req), err)]
async fn token(
    State(state): State<AppState>,
    headers: HeaderMap,
    Form(req): Form<TokenRequest>,
) -> Result<Json<TokenResponse>, ApiError> {
    // 1. grant_type must equal authorization_code.
    if req.grant_type != "authorization_code" {
        return Err(ApiError::oauth(
            "unsupported_grant_type",
            "grant_type must be authorization_code",
        ));
    }

    // 2. Project identified by Basic username exists; its stored secret
    // verifier accepts the presented secret.
    let (client_id, client_secret) = extract_basic(&headers)?;

    let project = sqlx::query!(
        "SELECT client_secret_hash FROM projects WHERE id = $1",
        client_id,
    )
    .fetch_optional(&state.pool)
    .await?
    .ok_or_else(|| ApiError::oauth("invalid_client", "unknown client"))?;

    let verifier = project
        .client_secret_hash
        .ok_or_else(|| ApiError::oauth("invalid_client", "client has no secret"))?;

    let secret_ok = client::verify(&client_secret, &verifier).map_err(ApiError::Internal)?;
    if !secret_ok {
        return Err(ApiError::oauth("invalid_client", "bad client secret"));
    }

    // 3. Hash the submitted code, load the row by (client_id, hash); it must exist.
    let code_hash = code::hash(&req.code);
    let code_row = sqlx::query!(
        r#"
        SELECT id, user_id, redirect_uri, scopes, used, expires_at
        FROM oauth_authorization_codes
        WHERE project_id = $1 AND code_hash = $2
        "#,
        client_id,
        code_hash,
    )
    .fetch_optional(&state.pool)
    .await?
    .ok_or_else(|| ApiError::oauth("invalid_grant", "unknown code"))?;

    // 4. Used=false AND now < expires_at.
    if code_row.used || chrono::Utc::now() >= code_row.expires_at {
        return Err(ApiError::oauth("invalid_grant", "code expired or used"));
    }

    // 5. Stored redirect_uri equals the submitted redirect_uri exactly.
    if code_row.redirect_uri != req.redirect_uri {
        return Err(ApiError::oauth("invalid_grant", "redirect_uri mismatch"));
    }

    // Atomic redemption: zero rows affected means a concurrent redeemer won.
    let redeemed = sqlx::query!(
        "UPDATE oauth_authorization_codes SET used = true, updated_at = now() WHERE id = $1 AND used = false",
        code_row.id,
    )
    .execute(&state.pool)
    .await?
    .rows_affected();

    if redeemed == 0 {
        return Err(ApiError::oauth("invalid_grant", "code already used"));
    }

    let access_token = jwt::mint(
        &state.config.jwt_secret,
        code_row.user_id,
        &client_id,
        &code_row.scopes,
    )
    .map_err(ApiError::Internal)?;

    Ok(Json(TokenResponse {
        access_token,
        token_type: "Bearer",
        expires_in: jwt::EXPIRES_IN_SECS,
        scope: code_row.scopes,
    }))
}

fn extract_basic(headers: &HeaderMap) -> Result<(String, String), ApiError> {
    let auth_value = headers
        .get(AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .ok_or_else(|| ApiError::oauth("invalid_client", "missing credentials"))?;

    let encoded = auth_value
        .strip_prefix("Basic ")
        .ok_or_else(|| ApiError::oauth("invalid_client", "credentials must be HTTP Basic"))?;

    let decoded = base64::Engine::decode(&base64::engine::general_purpose::STANDARD, encoded)
        .map_err(|_| ApiError::oauth("invalid_client", "malformed credentials"))?;
    let decoded_str = String::from_utf8(decoded)
        .map_err(|_| ApiError::oauth("invalid_client", "malformed credentials"))?;

    decoded_str
        .split_once(':')
        .map(|(u, p)| (u.to_owned(), p.to_owned()))
        .ok_or_else(|| ApiError::oauth("invalid_client", "malformed credentials"))
}
