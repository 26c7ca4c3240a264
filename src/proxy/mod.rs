use axum::body::Body;
use axum::extract::{Request, State};
use axum::http::{StatusCode, Uri};
use axum::middleware::Next;
use axum::response::{IntoResponse, Redirect, Response};
use hyper_util::client::legacy::Client;
use hyper_util::client::legacy::connect::HttpConnector;
use hyper_util::rt::TokioExecutor;

use crate::store::AppState;

type ProxyClient = Client<HttpConnector, Body>;

/// Port every container's starter scaffold listens on (spec §4.6).
const CONTAINER_PORT: u16 = 5000;

/// Reverse-proxy / host-router outer layer. Host-header classification, in
/// order (spec §4.6):
///
/// 1. bare apex -> 301 to `https://www.<apex><uri>`
/// 2. a configured apex variant (e.g. `www.<apex>`) -> pass through to the
///    platform application
/// 3. `<id>.<apex>` (exactly three dot-separated labels) -> forward to
///    `http://<id>:5000`, unbuffered
/// 4. otherwise -> 404
pub async fn route_by_host(
    State(state): State<AppState>,
    request: Request,
    next: Next,
) -> Response {
    let Some(host) = host_header(&request) else {
        return StatusCode::NOT_FOUND.into_response();
    };

    let apex = &state.config.apex_domain;

    if host == *apex {
        let target = format!("https://{}{}", state.config.www_apex(), request.uri());
        return Redirect::permanent(&target).into_response();
    }

    if host == state.config.www_apex() || is_apex_variant(&host, apex) {
        return next.run(request).await;
    }

    if let Some(container) = subdomain_target(&host, apex) {
        return forward_to_container(&container, request).await;
    }

    StatusCode::NOT_FOUND.into_response()
}

fn host_header(request: &Request) -> Option<String> {
    request
        .headers()
        .get(axum::http::header::HOST)
        .and_then(|v| v.to_str().ok())
        .map(|h| h.split(':').next().unwrap_or(h).to_lowercase())
}

/// Apex variants besides the bare apex itself: `www.<apex>` and any
/// health-check host sharing the apex as its own full value. The bare apex
/// is handled separately (redirect, not pass-through).
fn is_apex_variant(host: &str, apex: &str) -> bool {
    host == format!("www.{apex}") || host == format!("health.{apex}")
}

/// `<id>.<apex>`: exactly three dot-separated labels, ending in the
/// configured apex. The first label is the target container name, which
/// must already satisfy the identifier invariants of §4.1 (guaranteed by
/// project creation, §4.2).
fn subdomain_target(host: &str, apex: &str) -> Option<String> {
    if !host.ends_with(apex) {
        return None;
    }
    let labels: Vec<&str> = host.split('.').collect();
    if labels.len() != 3 {
        return None;
    }
    let suffix = labels[1..].join(".");
    if suffix != apex {
        return None;
    }
    Some(labels[0].to_owned())
}

/// Forward the request to `http://<id>:5000`, streaming the response body
/// without buffering (enables SSE/WebSocket-style streams). Failed upstream
/// dial returns 502. No retry across upstreams.
async fn forward_to_container(container: &str, mut request: Request) -> Response {
    let client: ProxyClient = Client::builder(TokioExecutor::new()).build(HttpConnector::new());

    let path_and_query = request
        .uri()
        .path_and_query()
        .map(|pq| pq.as_str())
        .unwrap_or("/");
    let upstream_uri = match format!("http://{container}:{CONTAINER_PORT}{path_and_query}").parse::<Uri>() {
        Ok(uri) => uri,
        Err(_) => return StatusCode::BAD_GATEWAY.into_response(),
    };
    *request.uri_mut() = upstream_uri;

    match client.request(request).await {
        Ok(response) => {
            let (parts, body) = response.into_parts();
            Response::from_parts(parts, Body::new(body)).into_response()
        }
        Err(err) => {
            tracing::warn!(error = %err, %container, "upstream dial failed");
            StatusCode::BAD_GATEWAY.into_response()
        }
    }
}
