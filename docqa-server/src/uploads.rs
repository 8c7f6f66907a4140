//! Upload bookkeeping in a relational database.
//!
//! One row per stored upload: `documents(id, filename, upload_time)`. Writes
//! are best-effort; callers log failures and carry on. The `Any` driver lets
//! the same code run against Postgres in production and SQLite in tests.

use std::time::Duration;

use chrono::Utc;
use sqlx::any::AnyPoolOptions;
use sqlx::{AnyPool, Row};
use tracing::{debug, info};

const CREATE_TABLE: &str = "CREATE TABLE IF NOT EXISTS documents (
    id TEXT PRIMARY KEY,
    filename TEXT NOT NULL,
    upload_time TEXT NOT NULL
)";

#[derive(Debug, Clone)]
pub struct UploadLog {
    pool: AnyPool,
}

impl UploadLog {
    /// Connect and make sure the `documents` table exists.
    pub async fn connect(database_url: &str) -> Result<Self, sqlx::Error> {
        sqlx::any::install_default_drivers();

        // Every connection to an in-memory SQLite database sees its own empty
        // database, so those get a single long-lived connection.
        let in_memory = database_url.contains(":memory:");
        let options = AnyPoolOptions::new()
            .max_connections(if in_memory { 1 } else { 5 })
            .acquire_timeout(Duration::from_secs(5));
        let options =
            if in_memory { options.idle_timeout(None).max_lifetime(None) } else { options };

        let pool = options.connect(database_url).await?;
        sqlx::query(CREATE_TABLE).execute(&pool).await?;
        info!("upload log ready");
        Ok(Self { pool })
    }

    /// Append a row for a stored upload.
    pub async fn record(&self, id: &str, filename: &str) -> Result<(), sqlx::Error> {
        sqlx::query("INSERT INTO documents (id, filename, upload_time) VALUES ($1, $2, $3)")
            .bind(id)
            .bind(filename)
            .bind(Utc::now().to_rfc3339())
            .execute(&self.pool)
            .await?;
        debug!(upload.id = id, filename, "recorded upload");
        Ok(())
    }

    /// Filenames of all recorded uploads, oldest first.
    pub async fn filenames(&self) -> Result<Vec<String>, sqlx::Error> {
        let rows = sqlx::query("SELECT filename FROM documents ORDER BY upload_time, id")
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(|row| row.try_get::<String, _>("filename")).collect()
    }

    /// Round-trip a trivial query.
    pub async fn ping(&self) -> Result<(), sqlx::Error> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn records_and_lists_uploads() {
        let log = UploadLog::connect("sqlite::memory:").await.unwrap();
        log.ping().await.unwrap();
        log.record("1", "test.pdf").await.unwrap();
        log.record("2", "other.pdf").await.unwrap();
        let names = log.filenames().await.unwrap();
        assert_eq!(names.len(), 2);
        assert!(names.contains(&"test.pdf".to_string()));
    }

    #[tokio::test]
    async fn duplicate_id_is_an_error() {
        let log = UploadLog::connect("sqlite::memory:").await.unwrap();
        log.record("same", "a.pdf").await.unwrap();
        assert!(log.record("same", "b.pdf").await.is_err());
    }

    #[tokio::test]
    async fn unreachable_database_fails_to_connect() {
        assert!(UploadLog::connect("not-a-database-url").await.is_err());
    }
}
