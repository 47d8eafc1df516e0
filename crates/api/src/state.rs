use std::sync::Arc;

use caselog_core::archiver::Archiver;

/// Shared application state available to all Axum handlers via `State<AppState>`.
///
/// This is cheaply cloneable (inner data is behind `Arc`).
#[derive(Clone)]
pub struct AppState {
    /// The archive write path, bound to its storage backend.
    pub archiver: Arc<Archiver>,
}
