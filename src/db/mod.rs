pub mod config;
pub mod migrate;

use std::str::FromStr;
use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions};
use sqlx::{Sqlite, SqlitePool, Transaction};
use thiserror::Error;

use crate::db::config::DbConfig;
use crate::db::migrate::MigrationError;

pub type WriteTx = Transaction<'static, Sqlite>;

#[derive(Clone)]
pub struct DatabaseProxy {
    pool: SqlitePool,
}

impl DatabaseProxy {
    pub async fn connect(config: DbConfig) -> Result<Arc<Self>, DbInitError> {
        if let Some(path) = config.file_path() {
            if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
                std::fs::create_dir_all(parent).map_err(|e| DbInitError::Io(e.to_string()))?;
            }
        }

        let options = SqliteConnectOptions::from_str(&config.url)?
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .foreign_keys(true)
            .busy_timeout(config.busy_timeout);

        let pool = SqlitePoolOptions::new()
            .max_connections(config.max_connections)
            .acquire_timeout(config.acquire_timeout)
            .connect_with(options)
            .await?;

        migrate::run_migrations(&pool).await?;

        tracing::info!(url = %config.url, "database ready");

        Ok(Arc::new(Self { pool }))
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Opens a transaction for a read-modify-write unit with the SQLite
    /// writer lock already held.
    ///
    /// A deferred transaction that reads first cannot upgrade to a writer
    /// once another writer has committed; SQLite fails it with `SQLITE_BUSY`
    /// instead of waiting. Touching `write_lock` as the first statement makes
    /// concurrent writers queue on `busy_timeout` before any snapshot exists.
    pub async fn begin_write(&self) -> Result<WriteTx, sqlx::Error> {
        let mut tx = self.pool.begin().await?;
        sqlx::query(r#"UPDATE "write_lock" SET "acquired_at" = ? WHERE "id" = 1"#)
            .bind(Utc::now())
            .execute(&mut *tx)
            .await?;
        Ok(tx)
    }

    pub async fn ping(&self) -> Result<u128, sqlx::Error> {
        let started = Instant::now();
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(started.elapsed().as_millis())
    }
}

#[derive(Debug, Error)]
pub enum DbInitError {
    #[error("io error: {0}")]
    Io(String),
    #[error(transparent)]
    Sqlx(#[from] sqlx::Error),
    #[error(transparent)]
    Migration(#[from] MigrationError),
}
