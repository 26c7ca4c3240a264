#![allow(dead_code)]

use axum::Router;
use axum::body::Body;
use axum::http::{Request, StatusCode};
use http_body_util::BodyExt;
use serde_json::Value;
use sqlx::PgPool;
use tower::ServiceExt;
use uuid::Uuid;

use shipyard::auth::password;
use shipyard::config::Config;
use shipyard::store::AppState;

/// A `Config` with test-scoped defaults: a throwaway repo root under the OS
/// temp dir, a fixed apex so `redirect_uri_for`/host-routing are predictable.
pub fn test_config() -> Config {
    Config {
        listen: "127.0.0.1:0".into(),
        database_url: String::new(),
        jwt_secret: "test-signing-secret".into(),
        apex_domain: "example.com".into(),
        git_repos_path: std::env::temp_dir().join(format!("shipyard-test-repos-{}", Uuid::new_v4())),
        registry_addr: "localhost:5000".into(),
        build_concurrency: 2,
        trust_proxy_headers: false,
        admin_bootstrap_password: None,
    }
}

pub async fn test_state(pool: PgPool) -> AppState {
    let config = test_config();
    tokio::fs::create_dir_all(&config.git_repos_path)
        .await
        .expect("create test repo root");
    AppState::new(pool, config)
}

/// The inner application router: git smart-HTTP + JSON API, with no
/// host-based proxy layer. Most integration tests exercise this directly;
/// `proxy_integration.rs` separately wraps it with the host-router layer.
pub fn test_router(state: AppState) -> Router {
    Router::new()
        .nest("/project", shipyard::git::smart_http::router())
        .nest("/repo", shipyard::git::smart_http::router())
        .merge(shipyard::api::router())
        .route("/healthz", axum::routing::get(|| async { "ok" }))
        .with_state(state)
}

pub async fn create_user(pool: &PgPool, handle: &str, plain_password: &str, is_admin: bool) -> Uuid {
    let hash = password::hash_password(plain_password).expect("hash password");
    sqlx::query_scalar!(
        "INSERT INTO users (handle, email, password_hash, is_admin) VALUES ($1, $2, $3, $4) RETURNING id",
        handle,
        format!("{handle}@example.com"),
        hash,
        is_admin,
    )
    .fetch_one(pool)
    .await
    .expect("insert test user")
}

/// Log in via `/api/auth/login`. Returns `(status, session_cookie, body)` —
/// the cookie is the `session=...` pair lifted off `Set-Cookie`, ready to hand
/// back on `Cookie` for subsequent requests.
pub async fn login(app: &Router, handle: &str, plain_password: &str) -> (StatusCode, String, Value) {
    let req = Request::builder()
        .method("POST")
        .uri("/api/auth/login")
        .header("Content-Type", "application/json")
        .body(Body::from(
            serde_json::to_vec(&serde_json::json!({
                "handle": handle,
                "password": plain_password,
            }))
            .unwrap(),
        ))
        .unwrap();

    let resp = app.clone().oneshot(req).await.unwrap();
    let status = resp.status();
    let cookie = resp
        .headers()
        .get(axum::http::header::SET_COOKIE)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(';').next())
        .unwrap_or_default()
        .to_owned();
    let body = body_json(resp).await;
    (status, cookie, body)
}

/// Sign up via `/api/auth/signup`. Same return shape as `login`.
pub async fn signup(app: &Router, handle: &str, plain_password: &str) -> (StatusCode, String, Value) {
    let req = Request::builder()
        .method("POST")
        .uri("/api/auth/signup")
        .header("Content-Type", "application/json")
        .body(Body::from(
            serde_json::to_vec(&serde_json::json!({
                "handle": handle,
                "email": format!("{handle}@example.com"),
                "password": plain_password,
            }))
            .unwrap(),
        ))
        .unwrap();

    let resp = app.clone().oneshot(req).await.unwrap();
    let status = resp.status();
    let cookie = resp
        .headers()
        .get(axum::http::header::SET_COOKIE)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(';').next())
        .unwrap_or_default()
        .to_owned();
    let body = body_json(resp).await;
    (status, cookie, body)
}

pub async fn get_json(app: &Router, cookie: &str, path: &str) -> (StatusCode, Value) {
    let mut builder = Request::builder().method("GET").uri(path);
    if !cookie.is_empty() {
        builder = builder.header("Cookie", cookie.to_owned());
    }
    let req = builder.body(Body::empty()).unwrap();
    send(app, req).await
}

pub async fn delete_json(app: &Router, cookie: &str, path: &str) -> (StatusCode, Value) {
    let mut builder = Request::builder().method("DELETE").uri(path);
    if !cookie.is_empty() {
        builder = builder.header("Cookie", cookie.to_owned());
    }
    let req = builder.body(Body::empty()).unwrap();
    send(app, req).await
}

pub async fn post_json(app: &Router, cookie: &str, path: &str, body: Value) -> (StatusCode, Value) {
    let mut builder = Request::builder()
        .method("POST")
        .uri(path)
        .header("Content-Type", "application/json");
    if !cookie.is_empty() {
        builder = builder.header("Cookie", cookie.to_owned());
    }
    let req = builder
        .body(Body::from(serde_json::to_vec(&body).unwrap()))
        .unwrap();
    send(app, req).await
}

/// POST a `application/x-www-form-urlencoded` body, optionally with extra
/// headers (e.g. `Cookie` for the authorize endpoint, `Authorization: Basic
/// ...` for the token endpoint).
pub async fn form_post(
    app: &Router,
    headers: &[(&str, String)],
    path: &str,
    form: &[(&str, &str)],
) -> (StatusCode, Value) {
    let encoded = form
        .iter()
        .map(|(k, v)| format!("{}={}", urlencode(k), urlencode(v)))
        .collect::<Vec<_>>()
        .join("&");

    let mut builder = Request::builder()
        .method("POST")
        .uri(path)
        .header("Content-Type", "application/x-www-form-urlencoded");
    for (name, value) in headers {
        builder = builder.header(*name, value.clone());
    }
    let req = builder.body(Body::from(encoded)).unwrap();
    send(app, req).await
}

/// Like `form_post` but returns the raw response so redirects (`Location`)
/// can be inspected without axum trying to parse a JSON body.
pub async fn form_post_raw(
    app: &Router,
    headers: &[(&str, String)],
    path: &str,
    form: &[(&str, &str)],
) -> axum::http::Response<Body> {
    let encoded = form
        .iter()
        .map(|(k, v)| format!("{}={}", urlencode(k), urlencode(v)))
        .collect::<Vec<_>>()
        .join("&");

    let mut builder = Request::builder()
        .method("POST")
        .uri(path)
        .header("Content-Type", "application/x-www-form-urlencoded");
    for (name, value) in headers {
        builder = builder.header(*name, value.clone());
    }
    let req = builder.body(Body::from(encoded)).unwrap();
    app.clone().oneshot(req).await.unwrap()
}

pub async fn get_raw(app: &Router, headers: &[(&str, String)], path: &str) -> axum::http::Response<Body> {
    let mut builder = Request::builder().method("GET").uri(path);
    for (name, value) in headers {
        builder = builder.header(*name, value.clone());
    }
    let req = builder.body(Body::empty()).unwrap();
    app.clone().oneshot(req).await.unwrap()
}

pub fn basic_auth_header(user: &str, pass: &str) -> String {
    use base64::Engine;
    let raw = format!("{user}:{pass}");
    format!(
        "Basic {}",
        base64::engine::general_purpose::STANDARD.encode(raw)
    )
}

fn urlencode(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for b in s.bytes() {
        match b {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~' => {
                out.push(b as char);
            }
            b' ' => out.push('+'),
            _ => out.push_str(&format!("%{b:02X}")),
        }
    }
    out
}

async fn send(app: &Router, req: Request<Body>) -> (StatusCode, Value) {
    let resp = app.clone().oneshot(req).await.unwrap();
    let status = resp.status();
    (status, body_json(resp).await)
}

async fn body_json(resp: axum::http::Response<Body>) -> Value {
    let bytes = resp.into_body().collect().await.unwrap().to_bytes();
    if bytes.is_empty() {
        return Value::Null;
    }
    serde_json::from_slice(&bytes).unwrap_or(Value::Null)
}
