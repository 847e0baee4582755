//! Charge point demo binary
//!
//! Runs the OCPP 1.6 client against the configured central system with
//! simulated EVSE, certificate and file-transfer drivers. Reads its TOML
//! configuration from `$OCPP_CP_CONFIG` or the default path.

use std::sync::Arc;

use sea_orm_migration::MigratorTrait;
use tracing::{error, info};

use ocpp_chargepoint::charge_point::ChargePoint;
use ocpp_chargepoint::config::{default_config_path, AppConfig};
use ocpp_chargepoint::dispatcher::ResetKind;
use ocpp_chargepoint::drivers::sim::{SimCertStore, SimEvse, SimFileAgent};
use ocpp_chargepoint::storage::{init_database, DatabaseConfig, Migrator, SqliteStorage};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // ── Load configuration ─────────────────────────────────────
    let config_path = std::env::var("OCPP_CP_CONFIG")
        .map(std::path::PathBuf::from)
        .unwrap_or_else(|_| default_config_path());
    let config = match AppConfig::load(&config_path) {
        Ok(config) => {
            init_logging(&config.logging.level);
            info!("Configuration loaded from {}", config_path.display());
            config
        }
        Err(e) => {
            let config = AppConfig::default();
            init_logging(&config.logging.level);
            error!("Failed to load config: {}. Using defaults.", e);
            config
        }
    };

    info!(
        station = config.station.id.as_str(),
        url = config.central_system.url.as_str(),
        "Starting charge point"
    );

    // ── Database ───────────────────────────────────────────────
    let db_config = DatabaseConfig::sqlite(&config.database.path);
    let db = init_database(&db_config).await?;
    Migrator::up(&db, None).await?;
    let storage = Arc::new(SqliteStorage::new(db));

    // ── Drivers (simulated) ────────────────────────────────────
    let evse = Arc::new(SimEvse::new());
    let cert_store = Arc::new(SimCertStore);
    let file_agent = Arc::new(SimFileAgent);

    loop {
        let point = ChargePoint::new(
            &config,
            storage.clone(),
            evse.clone(),
            cert_store.clone(),
            file_agent.clone(),
        )
        .await;

        match point.run().await {
            ResetKind::Hard => {
                info!("Hard reset: terminating");
                return Ok(());
            }
            ResetKind::Soft => {
                info!("Soft reset: restarting the stack");
            }
        }
    }
}

fn init_logging(level: &str) {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(level)),
        )
        .init();
}
