//! Database module
pub mod entities;
pub mod repo;

use anyhow::{Context, Result};
use sea_orm::{ConnectOptions, Database, DatabaseConnection};
use std::time::Duration;
use tracing::info;

pub async fn establish_connection(database_url: &str) -> Result<DatabaseConnection> {
    let mut opt = ConnectOptions::new(database_url);
    opt.max_connections(16)
        .min_connections(1)
        .connect_timeout(Duration::from_secs(8))
        .acquire_timeout(Duration::from_secs(8))
        .sqlx_logging(false);

    let connection = Database::connect(opt)
        .await
        .with_context(|| format!("Failed to connect to database {}", database_url))?;
    info!("Connected to database: {}", database_url);

    Ok(connection)
}

/// Create the parent directory of a file-backed SQLite database
pub fn ensure_sqlite_dir(database_url: &str) -> Result<()> {
    let Some(path) = database_url.strip_prefix("sqlite:") else {
        return Ok(());
    };
    let path = path.trim_start_matches("//");
    let path = path.split('?').next().unwrap_or_default();
    if path.is_empty() || path.starts_with(':') {
        return Ok(());
    }
    if let Some(parent) = std::path::Path::new(path).parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }
    }
    Ok(())
}

/// In-memory database with all migrations applied
#[cfg(test)]
pub(crate) async fn test_repo() -> std::sync::Arc<repo::Repo> {
    use sea_orm_migration::MigratorTrait;

    let db = Database::connect("sqlite::memory:")
        .await
        .expect("in-memory database");
    migration::Migrator::up(&db, None)
        .await
        .expect("migrations apply");
    std::sync::Arc::new(repo::Repo::new(db))
}
