pub mod oauth;
pub mod projects;
pub mod resource;
pub mod sessions;

use axum::Router;

use crate::store::AppState;

pub fn router() -> Router<AppState> {
    Router::new()
        .merge(sessions::router())
        .merge(projects::router())
        .merge(oauth::router())
        .merge(resource::router())
}
