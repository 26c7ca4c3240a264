use std::path::Path;

use crate::git;
use crate::store::AppState;

/// Run one build attempt for a project: clone, build+push image, update
/// status (spec §4.4). Strictly sequential per project — the caller
/// (`queue::run`) guarantees at most one concurrent call per project id.
#[tracing::instrument(skip(state), fields(%project_id), err)]
pub async fn run_build(state: &AppState, project_id: &str) -> anyhow::Result<()> {
    let Some(project) = sqlx::query!(
        "SELECT default_branch FROM projects WHERE id = $1 AND status != 'shutdown'",
        project_id,
    )
    .fetch_optional(&state.pool)
    .await?
    else {
        return Ok(()); // project deleted/shut down between trigger and run
    };

    let repo_path = git::repo::repo_path(&state.config.git_repos_path, project_id);

    // Step 1: read the short commit hash at the tip of the default branch.
    let short_hash = git::hooks::short_tip_hash(&repo_path, &project.default_branch).await?;

    // Dedup by commit hash (spec §4.4/§5): if this exact hash already has a
    // build in flight or finished successfully, there is nothing new to do.
    let already_built: bool = sqlx::query_scalar!(
        r#"SELECT EXISTS(
             SELECT 1 FROM images
             WHERE project_id = $1 AND commit_hash = $2 AND status IN ('building', 'ready', 'running')
           ) as "exists!""#,
        project_id,
        short_hash,
    )
    .fetch_one(&state.pool)
    .await?;
    if already_built {
        return Ok(());
    }

    // Step 2: insert the Image row.
    let image_id = sqlx::query_scalar!(
        r#"INSERT INTO images (project_id, commit_hash, status) VALUES ($1, $2, 'building') RETURNING id"#,
        project_id,
        short_hash,
    )
    .fetch_one(&state.pool)
    .await?;

    sqlx::query!(
        "UPDATE projects SET status = 'launching' WHERE id = $1 AND status != 'shutdown'",
        project_id,
    )
    .execute(&state.pool)
    .await?;

    // Step 3: transient working directory + shallow clone onto the branch.
    let work_dir = std::env::temp_dir().join(format!("shipyard-build-{image_id}"));
    let build_result = match clone_shallow(&repo_path, &project.default_branch, &work_dir).await {
        Ok(()) => build_and_push(state, &work_dir, project_id, &short_hash).await,
        Err(e) => Err(e),
    };

    // Step 6: always remove the transient directory.
    let _ = tokio::fs::remove_dir_all(&work_dir).await;

    match build_result {
        Ok(()) => finish_success(state, project_id, image_id).await?,
        Err(e) => finish_failure(state, project_id, image_id, &e.to_string()).await?,
    }

    Ok(())
}

async fn finish_success(state: &AppState, project_id: &str, image_id: uuid::Uuid) -> anyhow::Result<()> {
    sqlx::query!(
        "UPDATE images SET status = 'ready', updated_at = now() WHERE id = $1",
        image_id,
    )
    .execute(&state.pool)
    .await?;

    sqlx::query!(
        "UPDATE projects SET status = 'online', last_build_error = NULL WHERE id = $1 AND status != 'shutdown'",
        project_id,
    )
    .execute(&state.pool)
    .await?;

    Ok(())
}

/// On failure: mark the Image failed, and normalize the Project's status —
/// `draft` unless an older image is still `ready`/`running`, in which case
/// it keeps serving and the project stays `online` (spec §4.4 step 5).
async fn finish_failure(
    state: &AppState,
    project_id: &str,
    image_id: uuid::Uuid,
    message: &str,
) -> anyhow::Result<()> {
    sqlx::query!(
        "UPDATE images SET status = 'failed', error = $2, updated_at = now() WHERE id = $1",
        image_id,
        message,
    )
    .execute(&state.pool)
    .await?;

    let has_serving_image: bool = sqlx::query_scalar!(
        r#"SELECT EXISTS(
             SELECT 1 FROM images
             WHERE project_id = $1 AND status IN ('ready', 'running') AND id != $2
           ) as "exists!""#,
        project_id,
        image_id,
    )
    .fetch_one(&state.pool)
    .await?;

    let new_status = if has_serving_image { "online" } else { "draft" };

    sqlx::query!(
        "UPDATE projects SET status = $2, last_build_error = $3 WHERE id = $1 AND status != 'shutdown'",
        project_id,
        new_status,
        message,
    )
    .execute(&state.pool)
    .await?;

    Ok(())
}

async fn clone_shallow(bare_repo: &Path, branch: &str, dest: &Path) -> anyhow::Result<()> {
    let output = tokio::process::Command::new("git")
        .arg("clone")
        .arg("--depth=1")
        .arg("--branch")
        .arg(branch)
        .arg(bare_repo)
        .arg(dest)
        .output()
        .await?;
    if !output.status.success() {
        anyhow::bail!(
            "git clone failed: {}",
            String::from_utf8_lossy(&output.stderr)
        );
    }
    Ok(())
}

/// Step 4: invoke the container builder on the clone's `Dockerfile`, tag
/// `<registry>:<project-id>:<short-hash>`, push to the registry.
async fn build_and_push(
    state: &AppState,
    work_dir: &Path,
    project_id: &str,
    short_hash: &str,
) -> anyhow::Result<()> {
    let tag = format!(
        "{}/{project_id}:{short_hash}",
        state.config.registry_addr
    );

    let build_output = tokio::process::Command::new("docker")
        .arg("build")
        .arg("-t")
        .arg(&tag)
        .arg(work_dir)
        .output()
        .await?;
    if !build_output.status.success() {
        anyhow::bail!(
            "image build failed: {}",
            String::from_utf8_lossy(&build_output.stderr)
        );
    }

    let push_output = tokio::process::Command::new("docker")
        .arg("push")
        .arg(&tag)
        .output()
        .await?;
    if !push_output.status.success() {
        anyhow::bail!(
            "image push failed: {}",
            String::from_utf8_lossy(&push_output.stderr)
        );
    }

    Ok(())
}
