//! kmt-web - Krav Maga progress tracker HTTP service
//!
//! Configuration priority: command line / environment, then the TOML file,
//! then built-in defaults.

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use tokio::signal;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use kmt_common::config::{ConfigOverrides, ServerConfig};
use kmt_common::db::{init_database, seed::seed_demo_curriculum};
use kmt_web::api::auth::ensure_admin;
use kmt_web::{build_router, AppState};

/// Command-line arguments for kmt-web
#[derive(Parser, Debug)]
#[command(name = "kmt-web")]
#[command(about = "Krav Maga curriculum and progress tracker")]
#[command(version)]
struct Args {
    /// TOML config file (default: <config dir>/kmt/config.toml)
    #[arg(short, long, env = "KMT_CONFIG")]
    config: Option<PathBuf>,

    /// Listen address, e.g. 127.0.0.1:3000
    #[arg(short, long, env = "KMT_BIND_ADDR")]
    bind: Option<String>,

    /// SQLite database file
    #[arg(short, long, env = "KMT_DATABASE")]
    database: Option<PathBuf>,

    /// Session signing secret
    #[arg(long, env = "AUTH_SECRET", hide_env_values = true)]
    auth_secret: Option<String>,

    /// Mark the session cookie `Secure` (serve behind HTTPS)
    #[arg(long, env = "KMT_SECURE_COOKIES")]
    secure_cookies: Option<bool>,

    /// Log level when RUST_LOG is unset
    #[arg(long)]
    log_level: Option<String>,

    /// Insert the demo belts and sample techniques before serving
    #[arg(long)]
    seed: bool,

    /// Create or promote this admin account at startup
    #[arg(long, env = "KMT_ADMIN_EMAIL", requires = "admin_password")]
    admin_email: Option<String>,

    /// Password for --admin-email
    #[arg(long, env = "KMT_ADMIN_PASSWORD", hide_env_values = true, requires = "admin_email")]
    admin_password: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let config = ServerConfig::resolve(ConfigOverrides {
        config_file: args.config.clone(),
        bind_addr: args.bind.clone(),
        database_path: args.database.clone(),
        auth_secret: args.auth_secret.clone(),
        secure_cookies: args.secure_cookies,
        log_level: args.log_level.clone(),
    })
    .context("Failed to resolve configuration")?;

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                format!("kmt_web={0},kmt_common={0},tower_http=info", config.log_level).into()
            }),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!(
        "Starting kmt-web v{} [{}] built {} ({})",
        env!("CARGO_PKG_VERSION"),
        env!("GIT_HASH"),
        env!("BUILD_TIMESTAMP"),
        env!("BUILD_PROFILE")
    );

    if config.uses_dev_secret() {
        warn!("AUTH_SECRET not set: sessions are signed with the development secret");
    }

    info!("Database path: {}", config.database_path.display());
    let pool = match init_database(&config.database_path).await {
        Ok(pool) => {
            info!("✓ Database ready");
            pool
        }
        Err(e) => {
            error!("Failed to open database: {}", e);
            return Err(e.into());
        }
    };

    if args.seed {
        let report = seed_demo_curriculum(&pool)
            .await
            .context("Failed to seed demo curriculum")?;
        info!(
            belts = report.belts_upserted,
            techniques = report.techniques_created,
            "Demo curriculum seeded"
        );
    }

    if let (Some(email), Some(password)) = (&args.admin_email, &args.admin_password) {
        ensure_admin(&pool, email, password, config.bcrypt_cost)
            .await
            .context("Failed to bootstrap admin account")?;
    }

    let state = AppState::new(pool, &config);

    // Forget idle rate limiter keys so the maps do not grow unbounded
    let rate_limits = state.rate_limits.clone();
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_secs(60));
        loop {
            interval.tick().await;
            rate_limits.retain_recent();
        }
    });

    let app = build_router(state);

    let listener = tokio::net::TcpListener::bind(&config.bind_addr)
        .await
        .with_context(|| format!("Failed to bind to {}", config.bind_addr))?;
    info!("kmt-web listening on http://{}", config.bind_addr);
    info!("Health check: http://{}/health", config.bind_addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    info!("Server shutdown complete");
    Ok(())
}

/// Resolves on Ctrl+C or SIGTERM
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received Ctrl+C, shutting down"),
        _ = terminate => info!("Received SIGTERM, shutting down"),
    }
}
