/// Authentication middleware for the backup endpoints

use axum::{
    extract::{Request, State},
    http::{HeaderMap, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use std::sync::Arc;
use tracing::{info, warn};

/// Environment variable holding the admin token
pub const ADMIN_TOKEN_ENV: &str = "SHOPDIR_ADMIN_TOKEN";

#[derive(Debug, Clone, Default)]
pub struct AuthSettings {
    /// `None` disables authentication (development mode)
    pub token: Option<String>,
}

impl AuthSettings {
    pub fn from_env() -> Self {
        Self {
            token: std::env::var(ADMIN_TOKEN_ENV).ok().filter(|t| !t.is_empty()),
        }
    }

    /// Startup log line; the middleware itself stays quiet
    pub fn log_mode(&self) {
        if self.token.is_some() {
            info!("Admin token set, backup routes require authentication");
        } else {
            warn!("{} not set - authentication disabled!", ADMIN_TOKEN_ENV);
        }
    }
}

/// Check if request has valid authentication token
pub async fn auth_middleware(
    State(auth): State<Arc<AuthSettings>>,
    headers: HeaderMap,
    request: Request,
    next: Next,
) -> Result<Response, Response> {
    // Get token from Authorization header
    let provided = headers
        .get("Authorization")
        .and_then(|v| v.to_str().ok())
        .map(|header| header.strip_prefix("Bearer ").unwrap_or(header));

    match (provided, auth.token.as_deref()) {
        (Some(provided), Some(expected)) if provided == expected => Ok(next.run(request).await),
        (_, None) => Ok(next.run(request).await),
        _ => Err(unauthorized_response()),
    }
}

fn unauthorized_response() -> Response {
    (
        StatusCode::UNAUTHORIZED,
        Json(json!({
            "success": false,
            "error": "Unauthorized - invalid or missing authentication token"
        })),
    )
        .into_response()
}

/// Generate a random secure token
pub fn generate_token() -> String {
    use rand::Rng;
    const CHARSET: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789";
    const TOKEN_LEN: usize = 32;
    let mut rng = rand::thread_rng();

    (0..TOKEN_LEN)
        .map(|_| {
            let idx = rng.gen_range(0..CHARSET.len());
            CHARSET[idx] as char
        })
        .collect()
}
