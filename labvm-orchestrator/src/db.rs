//! Database lifecycle for the fleet store.

use std::path::{Path, PathBuf};

use sqlx::sqlite::SqliteConnectOptions;
use sqlx::SqlitePool;
use tracing::{info, instrument};

use crate::error::Result;

/// Open the fleet database and bring its schema up to date.
///
/// Creates the file and its parent directory when missing. An existing
/// file is copied to a timestamped sibling before migrations run.
#[instrument(fields(db_path = %db_path.display()))]
pub async fn open_database(db_path: &Path) -> Result<SqlitePool> {
    if db_path.exists() {
        let backup = snapshot(db_path)?;
        info!("Existing database copied to {}", backup.display());
    } else if let Some(parent) = db_path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    let options = SqliteConnectOptions::new()
        .filename(db_path)
        .create_if_missing(true);
    let pool = SqlitePool::connect_with(options).await?;

    sqlx::migrate!("./migrations").run(&pool).await?;

    Ok(pool)
}

/// Copy the database file aside, returning the copy's path.
fn snapshot(db_path: &Path) -> Result<PathBuf> {
    let timestamp = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0);

    let backup_path = db_path.with_extension(format!("db.backup.{}", timestamp));
    std::fs::copy(db_path, &backup_path)?;

    Ok(backup_path)
}
