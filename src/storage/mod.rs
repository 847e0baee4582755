//! Persisted charge point state
//!
//! The station must survive power cycles with its authorization cache,
//! local authorization list, connector availability, installed charging
//! profiles and device-model snapshot intact. SQLite (via SeaORM) is the
//! on-station database; [`MemoryStorage`] backs tests.

pub mod entities;
pub mod memory;
pub mod migrator;
pub mod sqlite;
pub mod traits;

pub use memory::MemoryStorage;
pub use migrator::Migrator;
pub use sqlite::SqliteStorage;
pub use traits::{CachedAuthorization, LocalListEntry, Storage};

use sea_orm::{Database, DatabaseConnection};
use tracing::info;

/// Database configuration
#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    /// Database URL (e.g., "sqlite://./chargepoint.db?mode=rwc")
    pub url: String,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: "sqlite://./chargepoint.db?mode=rwc".to_string(),
        }
    }
}

impl DatabaseConfig {
    pub fn sqlite(path: &str) -> Self {
        Self {
            url: format!("sqlite://{}?mode=rwc", path),
        }
    }
}

/// Initialize the database connection
pub async fn init_database(config: &DatabaseConfig) -> Result<DatabaseConnection, sea_orm::DbErr> {
    info!("Connecting to database: {}", config.url);
    let db = Database::connect(&config.url).await?;
    info!("Database connected successfully");
    Ok(db)
}
