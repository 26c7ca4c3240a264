mod helpers;

use std::net::SocketAddr;

use axum::http::StatusCode;
use sqlx::PgPool;
use tokio::net::TcpListener;

/// Spin up the real app (git + API routes, no host-router layer) on an
/// ephemeral TCP port so the actual `git` CLI can talk HTTP smart-protocol
/// to it, exactly as a real client would.
async fn spawn_server(state: shipyard::store::AppState) -> SocketAddr {
    let app = helpers::test_router(state);
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        let _ = axum::serve(listener, app).await;
    });
    addr
}

async fn git(args: &[&str], dir: &std::path::Path) -> std::process::Output {
    tokio::process::Command::new("git")
        .current_dir(dir)
        .args(args)
        .output()
        .await
        .expect("failed to spawn git")
}

#[sqlx::test(migrations = "./migrations")]
async fn fetch_is_open_without_credentials(pool: PgPool) {
    let state = helpers::test_state(pool.clone()).await;
    let owner = helpers::create_user(&pool, "alice", "hunter2", false).await;
    shipyard::git::repo::init_bare_repo(&state.config.git_repos_path, "fetchable")
        .await
        .unwrap();
    sqlx::query!(
        "INSERT INTO projects (id, owner_id, repo_path) VALUES ($1, $2, $3)",
        "fetchable",
        owner,
        state.config.git_repos_path.join("fetchable").to_string_lossy(),
    )
    .execute(&pool)
    .await
    .unwrap();

    let addr = spawn_server(state).await;

    let url = format!("http://{addr}/project/fetchable/info/refs?service=git-upload-pack");
    let resp = reqwest_like_get(&url).await;
    assert_eq!(resp, StatusCode::OK.as_u16());
}

/// A tiny dependency-free HTTP GET used only to sanity-check status codes
/// without pulling in an HTTP client crate the teacher doesn't use.
async fn reqwest_like_get(url: &str) -> u16 {
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    let uri: axum::http::Uri = url.parse().unwrap();
    let host = uri.host().unwrap();
    let port = uri.port_u16().unwrap();
    let path = uri
        .path_and_query()
        .map(|p| p.as_str())
        .unwrap_or("/")
        .to_owned();

    let mut stream = tokio::net::TcpStream::connect((host, port)).await.unwrap();
    let request = format!("GET {path} HTTP/1.1\r\nHost: {host}\r\nConnection: close\r\n\r\n");
    stream.write_all(request.as_bytes()).await.unwrap();

    let mut response = Vec::new();
    stream.read_to_end(&mut response).await.unwrap();
    let text = String::from_utf8_lossy(&response);
    let status_line = text.lines().next().unwrap_or("");
    status_line
        .split_whitespace()
        .nth(1)
        .and_then(|s| s.parse().ok())
        .unwrap_or(0)
}

#[sqlx::test(migrations = "./migrations")]
async fn push_without_credentials_is_rejected(pool: PgPool) {
    let state = helpers::test_state(pool.clone()).await;
    let owner = helpers::create_user(&pool, "alice", "hunter2", false).await;
    shipyard::git::repo::init_bare_repo(&state.config.git_repos_path, "guarded")
        .await
        .unwrap();
    sqlx::query!(
        "INSERT INTO projects (id, owner_id, repo_path) VALUES ($1, $2, $3)",
        "guarded",
        owner,
        state.config.git_repos_path.join("guarded").to_string_lossy(),
    )
    .execute(&pool)
    .await
    .unwrap();

    let addr = spawn_server(state).await;

    let work = std::env::temp_dir().join(format!("shipyard-push-test-{}", uuid::Uuid::new_v4()));
    tokio::fs::create_dir_all(&work).await.unwrap();
    git(&["init", "--initial-branch=main"], &work).await;
    tokio::fs::write(work.join("a.txt"), "hi").await.unwrap();
    git(&["add", "-A"], &work).await;
    git(
        &[
            "-c",
            "user.email=t@t.com",
            "-c",
            "user.name=t",
            "commit",
            "-m",
            "first",
        ],
        &work,
    )
    .await;

    let push_url = format!("http://{addr}/project/guarded");
    let output = git(&["push", &push_url, "main"], &work).await;
    assert!(!output.status.success(), "push should have been rejected");
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(
        stderr.contains("401") || stderr.contains("Authentication") || stderr.contains("authentication"),
        "expected an auth failure, got: {stderr}"
    );

    let _ = tokio::fs::remove_dir_all(&work).await;
}

#[sqlx::test(migrations = "./migrations")]
async fn push_by_non_owner_is_forbidden(pool: PgPool) {
    let state = helpers::test_state(pool.clone()).await;
    let owner = helpers::create_user(&pool, "alice", "hunter2", false).await;
    helpers::create_user(&pool, "charlie", "hunter2", false).await;
    shipyard::git::repo::init_bare_repo(&state.config.git_repos_path, "alice-repo")
        .await
        .unwrap();
    sqlx::query!(
        "INSERT INTO projects (id, owner_id, repo_path) VALUES ($1, $2, $3)",
        "alice-repo",
        owner,
        state.config.git_repos_path.join("alice-repo").to_string_lossy(),
    )
    .execute(&pool)
    .await
    .unwrap();

    let addr = spawn_server(state).await;

    let work = std::env::temp_dir().join(format!("shipyard-push-test-{}", uuid::Uuid::new_v4()));
    tokio::fs::create_dir_all(&work).await.unwrap();
    git(&["init", "--initial-branch=main"], &work).await;
    tokio::fs::write(work.join("a.txt"), "hi").await.unwrap();
    git(&["add", "-A"], &work).await;
    git(
        &[
            "-c",
            "user.email=t@t.com",
            "-c",
            "user.name=t",
            "commit",
            "-m",
            "first",
        ],
        &work,
    )
    .await;

    let push_url = format!("http://charlie:hunter2@{addr}/project/alice-repo");
    let output = git(&["push", &push_url, "main"], &work).await;
    assert!(!output.status.success(), "non-owner push should be forbidden");
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(
        stderr.contains("403") || stderr.to_lowercase().contains("forbidden"),
        "expected a forbidden failure, got: {stderr}"
    );

    let _ = tokio::fs::remove_dir_all(&work).await;
}

#[sqlx::test(migrations = "./migrations")]
async fn owner_push_succeeds_and_triggers_a_pushed_activity(pool: PgPool) {
    let state = helpers::test_state(pool.clone()).await;
    let owner = helpers::create_user(&pool, "alice", "hunter2", false).await;
    shipyard::git::repo::init_bare_repo(&state.config.git_repos_path, "deployable")
        .await
        .unwrap();
    sqlx::query!(
        "INSERT INTO projects (id, owner_id, repo_path) VALUES ($1, $2, $3)",
        "deployable",
        owner,
        state
            .config
            .git_repos_path
            .join("deployable")
            .to_string_lossy(),
    )
    .execute(&pool)
    .await
    .unwrap();

    let addr = spawn_server(state).await;

    let work = std::env::temp_dir().join(format!("shipyard-push-test-{}", uuid::Uuid::new_v4()));
    tokio::fs::create_dir_all(&work).await.unwrap();
    git(&["init", "--initial-branch=main"], &work).await;
    tokio::fs::write(work.join("a.txt"), "hi").await.unwrap();
    git(&["add", "-A"], &work).await;
    git(
        &[
            "-c",
            "user.email=t@t.com",
            "-c",
            "user.name=t",
            "commit",
            "-m",
            "Add a.txt",
        ],
        &work,
    )
    .await;

    let push_url = format!("http://alice:hunter2@{addr}/project/deployable");
    let output = git(&["push", &push_url, "main"], &work).await;
    assert!(
        output.status.success(),
        "owner push should succeed: {}",
        String::from_utf8_lossy(&output.stderr)
    );

    // The post-receive side effect runs after a short settle delay and off
    // the request path; poll briefly instead of sleeping a fixed guess.
    let mut pushed_activity_seen = false;
    for _ in 0..20 {
        let count: i64 = sqlx::query_scalar!(
            "SELECT COUNT(*) as \"count!\" FROM activities WHERE subject_id = 'deployable' AND verb = 'pushed'",
        )
        .fetch_one(&pool)
        .await
        .unwrap();
        if count > 0 {
            pushed_activity_seen = true;
            break;
        }
        tokio::time::sleep(std::time::Duration::from_millis(100)).await;
    }
    assert!(pushed_activity_seen, "expected a 'pushed' activity after a successful push");

    let _ = tokio::fs::remove_dir_all(&work).await;
}
