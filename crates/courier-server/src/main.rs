mod config;
mod maintenance;

use std::sync::Arc;

use tracing::{info, warn};

use courier_api::auth::{self, AppState, AppStateInner};
use courier_crypto::CredentialVault;
use courier_db::Database;
use courier_gateway::{
    BridgeTransport, MediaStore, MessagePipeline, RegistryConfig, SessionRegistry, Transport,
};

use crate::config::Config;

/// Used when `RUST_LOG` is unset. Every workspace crate logs at debug.
const DEFAULT_LOG_FILTER: &str = "info,courier=debug,courier_api=debug,courier_crypto=debug,\
     courier_db=debug,courier_gateway=debug,tower_http=info";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env if present
    let _ = dotenvy::dotenv();

    // Init logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| DEFAULT_LOG_FILTER.into()),
        )
        .init();

    let config = Config::from_env()?;

    // `courier token [subject] [days]` prints an operator token and exits.
    let args: Vec<String> = std::env::args().skip(1).collect();
    if args.first().map(String::as_str) == Some("token") {
        let subject = args.get(1).map(String::as_str).unwrap_or("operator");
        let days: i64 = match args.get(2) {
            Some(raw) => raw.parse()?,
            None => 30,
        };
        println!("{}", auth::create_token(&config.api_secret, subject, chrono::Duration::days(days))?);
        return Ok(());
    }

    // Store, vault and media staging
    let db = Arc::new(Database::open(&config.db_path)?);
    let vault = Arc::new(CredentialVault::new(config.master_secret.clone()));
    let media = Arc::new(MediaStore::new(config.media_dir.clone()).await?);

    // Pipeline and sessions
    let pipeline = Arc::new(
        MessagePipeline::new(db.clone(), config.admin_chat_id)
            .with_media(media)
            .with_route(config.forward_route),
    );
    let transport: Arc<dyn Transport> = Arc::new(BridgeTransport::new(config.bridge_url.clone()));
    let registry = SessionRegistry::new(
        db.clone(),
        vault.clone(),
        transport,
        pipeline,
        RegistryConfig {
            health_interval: config.health_interval,
            retry_interval: config.retry_interval,
        },
    );

    info!("Forward route: {:?}, admin chat {}", config.forward_route, config.admin_chat_id);

    match registry.resume_all().await {
        Ok(count) => info!("Boot: {} sessions resumed", count),
        Err(e) => warn!("Boot: could not enumerate resumable users: {}", e),
    }

    tokio::spawn(maintenance::run_maintenance_loop(db.clone(), config.maintenance_interval));

    let app_state: AppState = Arc::new(AppStateInner {
        db,
        vault,
        registry: registry.clone(),
        api_secret: config.api_secret.clone(),
    });
    let app = courier_api::router(app_state);

    info!("Courier operations API listening on {}", config.bind_addr);
    let listener = tokio::net::TcpListener::bind(config.bind_addr).await?;

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    registry.shutdown().await;
    info!("Shutdown complete");

    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = tokio::signal::ctrl_c();
    #[cfg(unix)]
    {
        let mut sigterm =
            tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
                .expect("failed to install SIGTERM handler");
        tokio::select! {
            _ = ctrl_c => info!("Received Ctrl+C, shutting down..."),
            _ = sigterm.recv() => info!("Received SIGTERM, shutting down..."),
        }
    }
    #[cfg(not(unix))]
    {
        ctrl_c.await.ok();
        info!("Received Ctrl+C, shutting down...");
    }
}
