//! Buildbot syncer - Main entry point.
//!
//! Loads the sync configuration, starts the periodic sync task and serves
//! the status API with Actix-web.

use std::sync::Arc;

use actix_web::{App, HttpServer, web};
use tokio::sync::RwLock;
use tracing::{Level, error, info, warn};
use tracing_subscriber::FmtSubscriber;

use buildbot_syncer_lib::api;
use buildbot_syncer_lib::config::Config;
use buildbot_syncer_lib::services::buildbot::load_sync_config_file;
use buildbot_syncer_lib::services::{
    self, BuildbotTriggerable, HttpRemote, RemoteApi, SyncLoopConfig, SyncStatus,
};
use buildbot_syncer_lib::store;

#[actix_web::main]
async fn main() -> std::io::Result<()> {
    let args: Vec<String> = std::env::args().collect();
    let run_once = args.iter().any(|arg| arg == "--once");

    // Load environment variables from .env file
    dotenvy::dotenv().ok();

    // Initialize logging
    let subscriber = FmtSubscriber::builder()
        .with_max_level(Level::INFO)
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .finish();
    if let Err(e) = tracing::subscriber::set_global_default(subscriber) {
        eprintln!("Failed to set tracing subscriber: {}", e);
        std::process::exit(1);
    }

    // Load configuration
    let config = match Config::from_env() {
        Ok(cfg) => cfg,
        Err(e) => {
            error!("Failed to load configuration: {}", e);
            error!("");
            error!("Please check your environment variables:");
            error!("  - RUST_ENV must be set to 'development' or 'production'");
            error!("  - In production, PSYNC_SERVER_URL, PSYNC_BUILDBOT_URL and PSYNC_WORKER_PASSWORD must be set");
            error!("  - In production, values must not match development defaults");
            std::process::exit(1);
        }
    };

    info!("========================================");
    info!("  Buildbot Syncer");
    info!("  Environment: {}", config.environment);
    info!("========================================");

    if config.is_development() {
        warn!("Running in DEVELOPMENT mode - do not use in production!");
    }

    let sync_config = match load_sync_config_file(&config.sync_config) {
        Ok(sync_config) => sync_config,
        Err(e) => {
            error!("Invalid sync configuration: {}", e);
            std::process::exit(1);
        }
    };
    info!(
        "Loaded {} syncers for triggerable {} from {}",
        sync_config.syncers.len(),
        sync_config.triggerable_name,
        config.sync_config.display()
    );

    let remotes = HttpRemote::new(&config.server_url, config.server_auth(), config.request_timeout())
        .and_then(|app| {
            HttpRemote::new(&config.buildbot_url, None, config.request_timeout())
                .map(|buildbot| (app, buildbot))
        });
    let (app, buildbot): (Arc<dyn RemoteApi>, Arc<dyn RemoteApi>) = match remotes {
        Ok((app, buildbot)) => (Arc::new(app), Arc::new(buildbot)),
        Err(e) => {
            error!("Failed to create HTTP clients: {}", e);
            std::process::exit(1);
        }
    };

    let manifest = match store::fetch_manifest(app.as_ref()).await {
        Ok(manifest) => manifest,
        Err(e) => {
            error!("Failed to fetch the manifest: {}", e);
            std::process::exit(1);
        }
    };

    let mut triggerable = match BuildbotTriggerable::new(
        sync_config,
        manifest,
        app.clone(),
        buildbot,
        config.triggerable_options(),
    ) {
        Ok(triggerable) => triggerable,
        Err(e) => {
            error!("Sync configuration does not match the manifest: {}", e);
            std::process::exit(1);
        }
    };

    if run_once {
        match services::run_sync_cycle(&mut triggerable, app.as_ref()).await {
            Ok(report) => {
                info!(
                    "Sync finished: {} updates, {} scheduled",
                    report.updates.len(),
                    report.scheduled.len()
                );
                return Ok(());
            }
            Err(e) => {
                error!("Sync failed: {}", e);
                std::process::exit(1);
            }
        }
    }

    let status = Arc::new(RwLock::new(SyncStatus::new(triggerable.name())));
    services::start_sync_task(
        triggerable,
        app,
        status.clone(),
        SyncLoopConfig {
            interval_secs: config.seconds_to_sleep,
        },
    );

    let bind_address = config.bind_address();
    info!("Starting status API at http://{}", bind_address);

    HttpServer::new(move || {
        App::new()
            .app_data(web::Data::new(status.clone()))
            .service(web::scope("/api/v1").configure(api::configure_health_routes))
    })
    .workers(2)
    .bind(&bind_address)?
    .run()
    .await
}
