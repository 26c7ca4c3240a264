use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::activity::{ActivityEntry, write_activity};
use crate::auth::middleware::AuthUser;
use crate::error::ApiError;
use crate::id;
use crate::oauth;
use crate::store::AppState;

// ---------------------------------------------------------------------------
// Types
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
pub struct CreateProjectRequest {
    pub name: String,
    pub display_name: Option<String>,
    pub description: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct RenameProjectRequest {
    pub new_id: String,
}

#[derive(Debug, Serialize)]
pub struct ProjectResponse {
    pub id: String,
    pub owner_id: Uuid,
    pub display_name: Option<String>,
    pub description: Option<String>,
    pub status: String,
    pub last_build_error: Option<String>,
    pub default_branch: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Serialize)]
pub struct ClientSecretResponse {
    pub client_secret: String,
}

#[derive(Debug, Deserialize)]
pub struct RevokeAuthorizationRequest {
    pub user_id: Uuid,
}

struct ProjectRow {
    id: String,
    owner_id: Uuid,
    display_name: Option<String>,
    description: Option<String>,
    status: String,
    last_build_error: Option<String>,
    default_branch: String,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl From<ProjectRow> for ProjectResponse {
    fn from(row: ProjectRow) -> Self {
        Self {
            id: row.id,
            owner_id: row.owner_id,
            display_name: row.display_name,
            description: row.description,
            status: row.status,
            last_build_error: row.last_build_error,
            default_branch: row.default_branch,
            created_at: row.created_at,
            updated_at: row.updated_at,
        }
    }
}

// ---------------------------------------------------------------------------
// Router
// ---------------------------------------------------------------------------

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/api/projects", get(list_projects).post(create_project))
        .route("/api/projects/{id}", get(get_project))
        .route("/api/projects/{id}/rename", post(rename_project))
        .route("/api/projects/{id}/shutdown", post(shutdown_project))
        .route(
            "/api/projects/{id}/rotate-secret",
            post(rotate_client_secret),
        )
        .route(
            "/api/projects/{id}/authorizations/revoke",
            post(revoke_authorization),
        )
}

// ---------------------------------------------------------------------------
// Handlers
// ---------------------------------------------------------------------------

async fn list_projects(
    State(state): State<AppState>,
    auth: AuthUser,
) -> Result<Json<Vec<ProjectResponse>>, ApiError> {
    let rows = sqlx::query_as!(
        ProjectRow,
        r#"
        SELECT id, owner_id, display_name, description, status,
               last_build_error, default_branch, created_at, updated_at
        FROM projects
        WHERE owner_id = $1 OR $2
        ORDER BY created_at DESC
        "#,
        auth.user_id,
        auth.is_admin,
    )
    .fetch_all(&state.pool)
    .await?;

    Ok(Json(rows.into_iter().map(ProjectResponse::from).collect()))
}

async fn get_project(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<ProjectResponse>, ApiError> {
    let row = sqlx::query_as!(
        ProjectRow,
        r#"
        SELECT id, owner_id, display_name, description, status,
               last_build_error, default_branch, created_at, updated_at
        FROM projects WHERE id = $1
        "#,
        id,
    )
    .fetch_optional(&state.pool)
    .await?
    .ok_or_else(|| ApiError::NotFound("project".into()))?;

    Ok(Json(row.into()))
}

/// Create: sanitize the identifier, init the bare repo, write the Project
/// row (`draft`), record a `created` Activity, then asynchronously push
/// starter scaffolding and trigger the first build (spec §4.2).
#[tracing::instrument(skip(state, auth, req), fields(name = %req.name), err)]
async fn create_project(
    State(state): State<AppState>,
    auth: AuthUser,
    Json(req): Json<CreateProjectRequest>,
) -> Result<(StatusCode, Json<ProjectResponse>), ApiError> {
    let project_id = id::sanitize_id(&req.name)?;
    let repo_path = crate::git::repo::repo_path(&state.config.git_repos_path, &project_id);

    crate::git::repo::init_bare_repo(&state.config.git_repos_path, &project_id)
        .await
        .map_err(ApiError::Internal)?;

    let row = match sqlx::query_as!(
        ProjectRow,
        r#"
        INSERT INTO projects (id, owner_id, display_name, description, repo_path)
        VALUES ($1, $2, $3, $4, $5)
        RETURNING id, owner_id, display_name, description, status,
                  last_build_error, default_branch, created_at, updated_at
        "#,
        project_id,
        auth.user_id,
        req.display_name,
        req.description,
        repo_path.to_string_lossy().as_ref(),
    )
    .fetch_one(&state.pool)
    .await
    {
        Ok(row) => row,
        Err(e) => {
            let _ = crate::git::repo::remove_bare_repo(&state.config.git_repos_path, &project_id)
                .await;
            return Err(e.into());
        }
    };

    write_activity(
        &state.pool,
        &ActivityEntry {
            user_id: auth.user_id,
            verb: "created",
            subject_type: "project",
            subject_id: &project_id,
            content: None,
        },
    )
    .await;

    let scaffold_state = state.clone();
    let scaffold_id = project_id.clone();
    tokio::spawn(async move {
        if let Err(e) = crate::git::repo::push_starter_files(
            &scaffold_state.config.git_repos_path,
            &scaffold_id,
        )
        .await
        {
            tracing::error!(error = %e, project_id = %scaffold_id, "starter scaffold push failed");
            return;
        }
        crate::build::queue::enqueue(&scaffold_state, scaffold_id).await;
    });

    Ok((StatusCode::CREATED, Json(row.into())))
}

/// Rename (administrator-only): rename the bare repo, update the store,
/// cascade via foreign-key `ON DELETE CASCADE`/direct column updates, and
/// roll the filesystem back on a uniqueness failure. Forbidden while
/// `status=launching` (spec §4.2).
#[tracing::instrument(skip(state, auth, req), fields(%id, new_id = %req.new_id), err)]
async fn rename_project(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(id): Path<String>,
    Json(req): Json<RenameProjectRequest>,
) -> Result<Json<ProjectResponse>, ApiError> {
    if !auth.is_admin {
        return Err(ApiError::Forbidden);
    }

    let new_id = id::sanitize_id(&req.new_id)?;

    let status: String = sqlx::query_scalar!("SELECT status FROM projects WHERE id = $1", id)
        .fetch_optional(&state.pool)
        .await?
        .ok_or_else(|| ApiError::NotFound("project".into()))?;

    if status == "launching" {
        return Err(ApiError::Conflict(
            "cannot rename a project while it is launching".into(),
        ));
    }

    let new_repo_path =
        crate::git::repo::rename_bare_repo(&state.config.git_repos_path, &id, &new_id)
            .await
            .map_err(ApiError::Internal)?;

    // `images`, `oauth_authorizations`, and `oauth_authorization_codes` carry
    // an `ON UPDATE CASCADE` foreign key and follow automatically; `activities`
    // references the project polymorphically (subject_type/subject_id) and
    // has to be updated by hand (spec §4.2 "cascade-update every referring
    // column").
    let mut tx = state.pool.begin().await?;

    let row = match sqlx::query_as!(
        ProjectRow,
        r#"
        UPDATE projects SET id = $2, repo_path = $3, updated_at = now()
        WHERE id = $1
        RETURNING id, owner_id, display_name, description, status,
                  last_build_error, default_branch, created_at, updated_at
        "#,
        id,
        new_id,
        new_repo_path.to_string_lossy().as_ref(),
    )
    .fetch_one(&mut *tx)
    .await
    {
        Ok(row) => row,
        Err(e) => {
            let _ =
                crate::git::repo::rename_bare_repo(&state.config.git_repos_path, &new_id, &id)
                    .await;
            return Err(e.into());
        }
    };

    if let Err(e) = sqlx::query!(
        "UPDATE activities SET subject_id = $2 WHERE subject_type = 'project' AND subject_id = $1",
        id,
        new_id,
    )
    .execute(&mut *tx)
    .await
    {
        let _ = crate::git::repo::rename_bare_repo(&state.config.git_repos_path, &new_id, &id).await;
        return Err(e.into());
    }

    if let Err(e) = tx.commit().await {
        let _ = crate::git::repo::rename_bare_repo(&state.config.git_repos_path, &new_id, &id).await;
        return Err(e.into());
    }

    write_activity(
        &state.pool,
        &ActivityEntry {
            user_id: auth.user_id,
            verb: "published",
            subject_type: "project",
            subject_id: &new_id,
            content: Some(&format!("renamed from {id}")),
        },
    )
    .await;

    Ok(Json(row.into()))
}

/// Shutdown: terminal. The identifier stays reserved; an external
/// orchestrator observes the transition and stops the container (spec §4.2).
async fn shutdown_project(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(id): Path<String>,
) -> Result<StatusCode, ApiError> {
    require_owner_or_admin(&state, &auth, &id).await?;

    sqlx::query!(
        "UPDATE projects SET status = 'shutdown', updated_at = now() WHERE id = $1",
        id,
    )
    .execute(&state.pool)
    .await?;

    Ok(StatusCode::NO_CONTENT)
}

/// Rotate the OAuth client secret: generate a new verifier, return the
/// plaintext once. Previously issued codes remain valid until their TTL
/// expires; future token exchanges require the new secret (spec §4.5).
async fn rotate_client_secret(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(id): Path<String>,
) -> Result<Json<ClientSecretResponse>, ApiError> {
    require_owner_or_admin(&state, &auth, &id).await?;

    let (plaintext, verifier) = oauth::client::generate().map_err(ApiError::Internal)?;

    sqlx::query!(
        "UPDATE projects SET client_secret_hash = $2, updated_at = now() WHERE id = $1",
        id,
        verifier,
    )
    .execute(&state.pool)
    .await?;

    Ok(Json(ClientSecretResponse {
        client_secret: plaintext,
    }))
}

/// Revoke a specific user's authorization for this project's OAuth client
/// (spec §4.5 "Authorization management").
async fn revoke_authorization(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(id): Path<String>,
    Json(req): Json<RevokeAuthorizationRequest>,
) -> Result<StatusCode, ApiError> {
    require_owner_or_admin(&state, &auth, &id).await?;

    sqlx::query!(
        "UPDATE oauth_authorizations SET revoked = true, updated_at = now() WHERE project_id = $1 AND user_id = $2",
        id,
        req.user_id,
    )
    .execute(&state.pool)
    .await?;

    Ok(StatusCode::NO_CONTENT)
}

async fn require_owner_or_admin(
    state: &AppState,
    auth: &AuthUser,
    project_id: &str,
) -> Result<(), ApiError> {
    if auth.is_admin {
        return Ok(());
    }

    let owner_id: Uuid = sqlx::query_scalar!("SELECT owner_id FROM projects WHERE id = $1", project_id)
        .fetch_optional(&state.pool)
        .await?
        .ok_or_else(|| ApiError::NotFound("project".into()))?;

    if owner_id != auth.user_id {
        return Err(ApiError::Forbidden);
    }

    Ok(())
}
