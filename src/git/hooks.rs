use std::path::Path;
use std::time::Duration;

use uuid::Uuid;

use crate::activity::{ActivityEntry, write_activity};
use crate::store::AppState;

/// How long to wait after a `receive-pack` exits before reading the new tip.
/// The auth hook fires before the pack is fully installed on disk; this is
/// "short enough to be imperceptible, long enough that the pack is visible"
/// (spec §4.3). A deployment with a real post-receive hook should fire this
/// synchronously instead and drop the delay entirely.
const SETTLE_DELAY: Duration = Duration::from_millis(300);

pub struct PostReceiveParams {
    pub project_id: String,
    pub user_id: Uuid,
    pub repo_path: std::path::PathBuf,
    pub default_branch: String,
}

/// Run after a successful `git-receive-pack`: read the new tip commit,
/// record a `pushed` Activity with its subject line, and dispatch a build.
///
/// Fires exactly once per push, on the pack-upload request only — a bare
/// refs-discovery request never has a pack to inspect, so it never triggers
/// this (spec §9 open question 1).
#[tracing::instrument(skip(state, params), fields(project_id = %params.project_id), err)]
pub async fn post_receive(state: &AppState, params: &PostReceiveParams) -> anyhow::Result<()> {
    tokio::time::sleep(SETTLE_DELAY).await;

    let subject = commit_subject(&params.repo_path, &params.default_branch).await?;

    write_activity(
        &state.pool,
        &ActivityEntry {
            user_id: params.user_id,
            verb: "pushed",
            subject_type: "project",
            subject_id: &params.project_id,
            content: Some(&subject),
        },
    )
    .await;

    crate::build::queue::enqueue(state, params.project_id.clone()).await;

    Ok(())
}

/// `git log -1 --pretty=format:%s` on the default branch — the subject line
/// of the new tip commit (spec §4.3).
async fn commit_subject(repo_path: &Path, branch: &str) -> anyhow::Result<String> {
    let output = tokio::process::Command::new("git")
        .arg("-C")
        .arg(repo_path)
        .arg("log")
        .arg("-1")
        .arg("--pretty=format:%s")
        .arg(format!("refs/heads/{branch}"))
        .output()
        .await?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        anyhow::bail!("git log failed: {stderr}");
    }

    Ok(String::from_utf8_lossy(&output.stdout).trim().to_owned())
}

/// The short commit hash at the tip of `refs/heads/<branch>` (used both by
/// the build pipeline, spec §4.4 step 1, and by invariant 5 checks).
pub async fn short_tip_hash(repo_path: &Path, branch: &str) -> anyhow::Result<String> {
    let output = tokio::process::Command::new("git")
        .arg("-C")
        .arg(repo_path)
        .arg("rev-parse")
        .arg("--short")
        .arg(format!("refs/heads/{branch}"))
        .output()
        .await?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        anyhow::bail!("git rev-parse failed: {stderr}");
    }

    Ok(String::from_utf8_lossy(&output.stdout).trim().to_owned())
}
