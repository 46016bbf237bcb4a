/// API Request Handlers
/// Thin HTTP layer over the backup engine

use axum::{
    body::Body,
    extract::{Multipart, State},
    http::{header, StatusCode},
    response::Response,
    Json,
};
use chrono::Utc;
use serde::Serialize;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::io::AsyncWriteExt;
use tokio_util::io::ReaderStream;
use tracing::{error, info, warn};

use crate::core::scratch::CleanupGuard;
use crate::core::{BackupEngine, BackupStats, RestoreReport};
use crate::utils::{
    filename_timestamp, generate_hex_string, ACCEPTED_ARCHIVE_CONTENT_TYPES, ARCHIVE_CONTENT_TYPE,
    MAX_RESTORE_UPLOAD_BYTES,
};

/// Buffer between the archive writer task and the response body
const STREAM_BUFFER_BYTES: usize = 64 * 1024;

/// Multipart field carrying the archive
const UPLOAD_FIELD: &str = "backup";

// ============================================================================
// Response Types
// ============================================================================

#[derive(Serialize)]
pub struct ApiResponse<T> {
    success: bool,
    data: Option<T>,
    error: Option<String>,
}

impl<T> ApiResponse<T> {
    fn ok(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
        }
    }

    fn error(msg: String) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(msg),
        }
    }

    fn failed_with(data: T, msg: String) -> Self {
        Self {
            success: false,
            data: Some(data),
            error: Some(msg),
        }
    }
}

pub type ApiError = (StatusCode, Json<ApiResponse<()>>);

fn reject(status: StatusCode, msg: impl Into<String>) -> ApiError {
    (status, Json(ApiResponse::error(msg.into())))
}

fn attachment(filename: &str) -> String {
    format!("attachment; filename=\"{}\"", filename)
}

// ============================================================================
// Backup Handlers
// ============================================================================

pub async fn health_check() -> Json<ApiResponse<String>> {
    Json(ApiResponse::ok("healthy".to_string()))
}

pub async fn get_backup_stats(
    State(engine): State<Arc<BackupEngine>>,
) -> Result<Json<ApiResponse<BackupStats>>, ApiError> {
    let stats = engine.backup.stats().await.map_err(|e| {
        error!(error = %e, "Failed to compute backup stats");
        reject(StatusCode::INTERNAL_SERVER_ERROR, e.to_string())
    })?;

    Ok(Json(ApiResponse::ok(stats)))
}

/// Stream a full backup archive. Store errors surface as 500 before any
/// byte is sent; once streaming started, a failure just ends the stream.
pub async fn download_full_backup(
    State(engine): State<Arc<BackupEngine>>,
) -> Result<Response, ApiError> {
    let shops = engine.backup.load_shops().await.map_err(|e| {
        error!(error = %e, "Failed to load shops for backup");
        reject(StatusCode::INTERNAL_SERVER_ERROR, e.to_string())
    })?;

    let (writer, reader) = tokio::io::duplex(STREAM_BUFFER_BYTES);
    let task_engine = engine.clone();
    tokio::spawn(async move {
        // Dropping the writer at the end closes the response body
        if let Err(e) = task_engine.backup.write_full_backup(shops, writer).await {
            warn!(error = %e, "Full backup stream ended early");
        }
    });

    let filename = format!("shop-backup-{}.tar.gz", filename_timestamp(Utc::now()));
    info!(filename = %filename, "Streaming full backup");

    Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, ARCHIVE_CONTENT_TYPE)
        .header(header::CONTENT_DISPOSITION, attachment(&filename))
        .body(Body::from_stream(ReaderStream::new(reader)))
        .map_err(|e| reject(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()))
}

pub async fn download_data_backup(
    State(engine): State<Arc<BackupEngine>>,
) -> Result<Response, ApiError> {
    let manifest = engine.backup.data_only_backup().await.map_err(|e| {
        error!(error = %e, "Data-only backup failed");
        reject(StatusCode::INTERNAL_SERVER_ERROR, e.to_string())
    })?;

    let filename = format!("shop-data-{}.json", filename_timestamp(Utc::now()));

    Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, "application/json")
        .header(header::CONTENT_DISPOSITION, attachment(&filename))
        .body(Body::from(manifest))
        .map_err(|e| reject(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()))
}

// ============================================================================
// Restore Handler
// ============================================================================

pub async fn restore_backup(
    State(engine): State<Arc<BackupEngine>>,
    mut multipart: Multipart,
) -> Result<(StatusCode, Json<ApiResponse<RestoreReport>>), ApiError> {
    let mut guard = CleanupGuard::new();
    let mut upload: Option<PathBuf> = None;

    while let Some(mut field) = multipart
        .next_field()
        .await
        .map_err(|e| reject(e.status(), e.body_text()))?
    {
        if field.name() != Some(UPLOAD_FIELD) {
            continue;
        }

        let content_type = field.content_type().unwrap_or("").to_ascii_lowercase();
        if !ACCEPTED_ARCHIVE_CONTENT_TYPES.contains(&content_type.as_str()) {
            return Err(reject(
                StatusCode::UNSUPPORTED_MEDIA_TYPE,
                format!("Expected a .tar.gz backup archive, got '{}'", content_type),
            ));
        }

        tokio::fs::create_dir_all(&engine.config.scratch_dir)
            .await
            .map_err(|e| reject(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()))?;
        let path = engine.config.scratch_dir.join(format!(
            "upload-{}-{}.tar.gz",
            filename_timestamp(Utc::now()),
            generate_hex_string(8)
        ));
        guard.track(&path);

        let mut file = tokio::fs::File::create(&path)
            .await
            .map_err(|e| reject(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()))?;

        let mut received = 0usize;
        while let Some(chunk) = field
            .chunk()
            .await
            .map_err(|e| reject(e.status(), e.body_text()))?
        {
            received += chunk.len();
            if received > MAX_RESTORE_UPLOAD_BYTES {
                return Err(reject(
                    StatusCode::PAYLOAD_TOO_LARGE,
                    format!("Backup archive exceeds {} MiB", MAX_RESTORE_UPLOAD_BYTES / (1024 * 1024)),
                ));
            }
            file.write_all(&chunk)
                .await
                .map_err(|e| reject(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()))?;
        }
        file.flush()
            .await
            .map_err(|e| reject(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()))?;

        info!(bytes = received, "Backup archive received");
        upload = Some(path);
        break;
    }

    let Some(path) = upload else {
        return Err(reject(
            StatusCode::BAD_REQUEST,
            format!("Missing '{}' file field", UPLOAD_FIELD),
        ));
    };

    let report = engine.restore.restore_archive(&path).await;

    if report.success {
        Ok((StatusCode::OK, Json(ApiResponse::ok(report))))
    } else {
        let cause = report.outcome.errors.first().cloned().unwrap_or_default();
        Ok((StatusCode::BAD_REQUEST, Json(ApiResponse::failed_with(report, cause))))
    }
}
