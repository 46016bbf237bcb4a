/// API Routes definition

use axum::{
    extract::DefaultBodyLimit,
    middleware,
    routing::{get, post},
    Router,
};
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use super::auth::{self, AuthSettings};
use super::handlers;
use crate::core::BackupEngine;
use crate::utils::MAX_RESTORE_UPLOAD_BYTES;

/// Room for multipart boundaries and part headers on top of the archive
const MULTIPART_OVERHEAD_BYTES: usize = 64 * 1024;

pub fn create_router(engine: Arc<BackupEngine>, auth: AuthSettings, enable_cors: bool) -> Router {
    // Backup routes expose every record, so they all require the admin token
    let protected_routes = Router::new()
        .route("/api/backup/stats", get(handlers::get_backup_stats))
        .route("/api/backup/full", get(handlers::download_full_backup))
        .route("/api/backup/data", get(handlers::download_data_backup))
        .route(
            "/api/backup/restore",
            post(handlers::restore_backup)
                .layer(DefaultBodyLimit::max(MAX_RESTORE_UPLOAD_BYTES + MULTIPART_OVERHEAD_BYTES)),
        )
        .layer(middleware::from_fn_with_state(
            Arc::new(auth),
            auth::auth_middleware,
        ));

    let public_routes = Router::new().route("/api/health", get(handlers::health_check));

    let mut app = Router::new()
        .merge(protected_routes)
        .merge(public_routes)
        .with_state(engine)
        .layer(TraceLayer::new_for_http());

    if enable_cors {
        app = app.layer(CorsLayer::permissive());
    }

    app
}
