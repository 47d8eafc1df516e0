use axum::routing::post;
use axum::Router;

use crate::handlers::archive;
use crate::state::AppState;

/// Archive routes, mounted at the root.
///
/// ```text
/// POST   /archive               all-or-nothing batch write
/// POST   /archive/case-logs     per-record write with partial success
/// ```
pub fn router() -> Router<AppState> {
    Router::new()
        .route("/archive", post(archive::archive_batch))
        .route("/archive/case-logs", post(archive::archive_case_logs))
}
