use std::net::SocketAddr;
use std::time::Duration;

use axum::error_handling::HandleErrorLayer;
use axum::http::StatusCode;
use axum::{BoxError, Router};
use axum::middleware;
use tokio::signal;
use tower::ServiceBuilder;
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::TraceLayer;
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

use shipyard::build;
use shipyard::config::Config;
use shipyard::store::{self, AppState};
use shipyard::{api, git, proxy};

/// Every request carries a deadline (spec.md §5): long enough for a
/// shallow `git push`/`git fetch` of a reasonably sized repo or a slow
/// upstream container, short enough that a wedged connection doesn't hang
/// the server forever.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(120);

/// `TimeoutLayer` reports an elapsed deadline as a boxed error rather than a
/// response, so it has to be paired with `HandleErrorLayer` to turn that back
/// into a normal 408 before axum's `Router` will accept it.
async fn handle_timeout_error(err: BoxError) -> (StatusCode, &'static str) {
    if err.is::<tower::timeout::error::Elapsed>() {
        (StatusCode::REQUEST_TIMEOUT, "request timed out")
    } else {
        (StatusCode::INTERNAL_SERVER_ERROR, "internal error")
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_env("SHIPYARD_LOG").unwrap_or_else(|_| "info".into()))
        .with(fmt::layer().json())
        .init();

    let cfg = Config::load();

    let pool = store::pool::connect(&cfg.database_url).await?;
    store::bootstrap::run(&pool, cfg.admin_bootstrap_password.as_deref()).await?;

    let state = AppState::new(pool, cfg.clone());

    let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);
    let build_state = state.clone();
    tokio::spawn(async move { build::queue::run(build_state, shutdown_rx).await });

    let app = Router::new()
        .nest("/project", git::smart_http::router())
        .nest("/repo", git::smart_http::router())
        .merge(api::router())
        .route("/healthz", axum::routing::get(|| async { "ok" }))
        .layer(middleware::from_fn_with_state(
            state.clone(),
            proxy::route_by_host,
        ))
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(HandleErrorLayer::new(handle_timeout_error))
                .layer(TimeoutLayer::new(REQUEST_TIMEOUT)),
        )
        .with_state(state);

    let addr: SocketAddr = cfg.listen.parse()?;
    tracing::info!(%addr, "starting shipyard");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(shutdown_tx))
        .await?;

    tracing::info!("shipyard stopped");
    Ok(())
}

async fn shutdown_signal(shutdown_tx: tokio::sync::watch::Sender<bool>) {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {},
        () = terminate => {},
    }

    tracing::info!("shutdown signal received");
    let _ = shutdown_tx.send(true);
}
