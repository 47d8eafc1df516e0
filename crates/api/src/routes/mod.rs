pub mod archive;
pub mod health;

use axum::Router;

use crate::state::AppState;

/// Build the full route tree.
pub fn app_routes() -> Router<AppState> {
    Router::new()
        .merge(health::router())
        .merge(archive::router())
}
