/// HTTP API Server module
/// Exposes backup download, stats and restore upload over REST

#[cfg(feature = "server")]
pub mod routes;

#[cfg(feature = "server")]
pub mod handlers;

#[cfg(feature = "server")]
pub mod auth;

#[cfg(feature = "server")]
pub use routes::create_router;

#[cfg(feature = "server")]
pub async fn run(
    host: String,
    port: u16,
    enable_cors: bool,
    engine: std::sync::Arc<crate::core::BackupEngine>,
) -> anyhow::Result<()> {
    use auth::{AuthSettings, ADMIN_TOKEN_ENV};
    use std::io::{self, IsTerminal, Write};
    use std::net::SocketAddr;

    let mut settings = AuthSettings::from_env();

    // Prompt for a token if none is set and someone is at the keyboard
    if settings.token.is_none() && io::stdin().is_terminal() {
        println!("⚠️  {} environment variable not set!", ADMIN_TOKEN_ENV);
        println!("    This token protects every backup endpoint.");
        println!();
        print!("Enter a secure token (or press Enter to continue without auth): ");
        io::stdout().flush()?;

        let mut token = String::new();
        io::stdin().read_line(&mut token)?;
        let token = token.trim();

        if !token.is_empty() {
            settings.token = Some(token.to_string());
            println!("✓ Token set for this session");
            println!("  To persist, add to your environment: export {}=\"{}\"", ADMIN_TOKEN_ENV, token);
            println!();
        } else {
            println!("⚠️  Starting without authentication - backups will be downloadable by anyone!");
            println!();
        }
    }

    let auth_enabled = settings.token.is_some();
    settings.log_mode();
    let app = create_router(engine, settings, enable_cors);

    let addr: SocketAddr = format!("{}:{}", host, port).parse()?;
    println!("🚀 Shop Directory Backup Server");
    println!("   🔌 API:    http://{}/api", addr);

    if auth_enabled {
        println!("   🔒 Auth:   Enabled (token required)");
    } else {
        println!("   ⚠️  Auth:   Disabled (no token)");
    }

    println!();
    println!("📚 API Endpoints:");
    println!("   GET  /api/health          - Health check");
    println!("   GET  /api/backup/stats    - Backup size estimate");
    println!("   GET  /api/backup/full     - Download full backup (.tar.gz)");
    println!("   GET  /api/backup/data     - Download shop data only (.json)");
    println!("   POST /api/backup/restore  - Restore from uploaded archive");
    println!();

    tracing::info!(%addr, auth = auth_enabled, "Server listening");
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
