use std::path::{Path, PathBuf};

use anyhow::Context;

/// The on-disk path of a project's bare repository: `<repo-root>/<project-id>`.
/// Invariant 2 (spec §3) ties this path's existence 1:1 to the Project row.
pub fn repo_path(repos_root: &Path, project_id: &str) -> PathBuf {
    repos_root.join(project_id)
}

/// Initialize a new bare git repository on disk with `main` as the initial
/// branch. Does NOT touch the `projects` table — that is the caller's
/// responsibility, so it can roll the filesystem side back on a uniqueness
/// failure.
#[tracing::instrument(skip(repos_root), fields(%project_id), err)]
pub async fn init_bare_repo(repos_root: &Path, project_id: &str) -> anyhow::Result<PathBuf> {
    let dir = repo_path(repos_root, project_id);

    tokio::fs::create_dir_all(&dir)
        .await
        .context("failed to create repo directory")?;

    let output = tokio::process::Command::new("git")
        .arg("init")
        .arg("--bare")
        .arg("--initial-branch=main")
        .arg(&dir)
        .output()
        .await
        .context("failed to run git init")?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        anyhow::bail!("git init failed: {stderr}");
    }

    tracing::info!(path = %dir.display(), "bare repository initialized");
    Ok(dir)
}

/// Rename a project's bare repository on disk atomically. Called only after
/// the caller has confirmed the new identifier is free; if the subsequent
/// store update fails on a uniqueness violation, the caller must invoke this
/// again with the arguments swapped to roll back (spec §4.2).
#[tracing::instrument(skip(repos_root), fields(%old_id, %new_id), err)]
pub async fn rename_bare_repo(
    repos_root: &Path,
    old_id: &str,
    new_id: &str,
) -> anyhow::Result<PathBuf> {
    let old_path = repo_path(repos_root, old_id);
    let new_path = repo_path(repos_root, new_id);

    tokio::fs::rename(&old_path, &new_path).await.with_context(|| {
        format!(
            "failed to rename {} -> {}",
            old_path.display(),
            new_path.display()
        )
    })?;

    Ok(new_path)
}

/// Permanently remove a project's bare repository. Used when a create fails
/// partway through and the filesystem side must be unwound.
pub async fn remove_bare_repo(repos_root: &Path, project_id: &str) -> anyhow::Result<()> {
    let dir = repo_path(repos_root, project_id);
    tokio::fs::remove_dir_all(&dir)
        .await
        .context("failed to remove repo directory")
}

/// Commit the minimal runnable scaffolding (a web server and a container
/// definition) into a working tree and push it to `main` on the bare repo
/// (spec §4.2 "asynchronously installs starter scaffolding"). Performed
/// through a throwaway clone so the bare repo itself is only ever touched by
/// `git` subprocess invocations, never written to directly.
#[tracing::instrument(skip(repos_root), fields(%project_id), err)]
pub async fn push_starter_files(repos_root: &Path, project_id: &str) -> anyhow::Result<()> {
    let bare = repo_path(repos_root, project_id);
    let work = std::env::temp_dir().join(format!("shipyard-scaffold-{}", uuid::Uuid::new_v4()));

    tokio::fs::create_dir_all(&work).await?;

    run_git(&work, ["init", "--initial-branch=main"]).await?;
    tokio::fs::write(
        work.join("Dockerfile"),
        STARTER_DOCKERFILE.replace("{project_id}", project_id),
    )
    .await?;
    tokio::fs::write(work.join("server.js"), STARTER_SERVER).await?;
    tokio::fs::write(work.join("package.json"), STARTER_PACKAGE_JSON).await?;

    run_git(&work, ["add", "-A"]).await?;
    run_git(
        &work,
        [
            "-c",
            "user.email=noreply@shipyard.local",
            "-c",
            "user.name=shipyard",
            "commit",
            "-m",
            "Initial scaffold",
        ],
    )
    .await?;
    run_git(&work, ["push", bare.to_string_lossy().as_ref(), "main"]).await?;

    let _ = tokio::fs::remove_dir_all(&work).await;
    Ok(())
}

async fn run_git<'a, I>(work_dir: &Path, args: I) -> anyhow::Result<()>
where
    I: IntoIterator<Item = &'a str>,
{
    let output = tokio::process::Command::new("git")
        .arg("-C")
        .arg(work_dir)
        .args(args)
        .output()
        .await
        .context("failed to spawn git")?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        anyhow::bail!("git command failed: {stderr}");
    }
    Ok(())
}

const STARTER_DOCKERFILE: &str = "FROM node:20-slim\nWORKDIR /app\nCOPY package.json server.js ./\nEXPOSE 5000\nCMD [\"node\", \"server.js\"]\n# {project_id}\n";

const STARTER_SERVER: &str = r#"const http = require("http");

const server = http.createServer((req, res) => {
  res.writeHead(200, { "Content-Type": "text/plain" });
  res.end("Hello from your new project!\n");
});

server.listen(5000, () => console.log("listening on :5000"));
"#;

const STARTER_PACKAGE_JSON: &str = r#"{
  "name": "app",
  "private": true,
  "version": "0.0.0",
  "scripts": { "start": "node server.js" }
}
"#;

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn init_bare_repo_creates_directory() {
        let tmp = std::env::temp_dir().join(format!("shipyard-test-{}", uuid::Uuid::new_v4()));
        let path = init_bare_repo(&tmp, "my-cool-app").await.unwrap();

        assert!(path.exists());
        assert!(path.join("HEAD").exists());
        assert_eq!(path, tmp.join("my-cool-app"));

        let _ = tokio::fs::remove_dir_all(&tmp).await;
    }

    #[tokio::test]
    async fn rename_moves_directory() {
        let tmp = std::env::temp_dir().join(format!("shipyard-test-{}", uuid::Uuid::new_v4()));
        init_bare_repo(&tmp, "old-name").await.unwrap();

        let new_path = rename_bare_repo(&tmp, "old-name", "new-name")
            .await
            .unwrap();
        assert!(new_path.exists());
        assert!(!tmp.join("old-name").exists());

        let _ = tokio::fs::remove_dir_all(&tmp).await;
    }

    #[tokio::test]
    async fn push_starter_files_populates_main() {
        let tmp = std::env::temp_dir().join(format!("shipyard-test-{}", uuid::Uuid::new_v4()));
        init_bare_repo(&tmp, "scaffolded").await.unwrap();
        push_starter_files(&tmp, "scaffolded").await.unwrap();

        let output = tokio::process::Command::new("git")
            .arg("-C")
            .arg(tmp.join("scaffolded"))
            .arg("log")
            .arg("-1")
            .arg("--pretty=format:%s")
            .arg("refs/heads/main")
            .output()
            .await
            .unwrap();
        assert_eq!(String::from_utf8_lossy(&output.stdout), "Initial scaffold");

        let _ = tokio::fs::remove_dir_all(&tmp).await;
    }
}
