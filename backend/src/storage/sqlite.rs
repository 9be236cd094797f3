use anyhow::{Context, Result};
use async_trait::async_trait;
use sqlx::{migrate::MigrateDatabase, Row, Sqlite, SqlitePool};
use std::sync::Arc;
use tracing::info;

use super::traits::KeyValueMedium;

/// SQLite-backed local medium: a single `key_values` table
#[derive(Clone)]
pub struct SqliteMedium {
    pool: Arc<SqlitePool>,
}

impl SqliteMedium {
    /// Open (creating if needed) the database at `url`
    pub async fn new(url: &str) -> Result<Self> {
        if !Sqlite::database_exists(url).await.unwrap_or(false) {
            info!("Creating local database at {}", url);
            Sqlite::create_database(url)
                .await
                .with_context(|| format!("Failed to create database {}", url))?;
        }

        let pool = SqlitePool::connect(url)
            .await
            .with_context(|| format!("Failed to connect to {}", url))?;

        Self::setup_schema(&pool).await?;

        Ok(Self { pool: Arc::new(pool) })
    }

    /// Fresh in-memory database with a unique name
    #[cfg(test)]
    pub async fn init_test() -> Result<Self> {
        let test_id = uuid::Uuid::new_v4().to_string();
        let db_url = format!("file:memdb_{}?mode=memory&cache=shared", test_id);

        Self::new(&db_url).await
    }

    async fn setup_schema(pool: &SqlitePool) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS key_values (
                key TEXT PRIMARY KEY,
                value TEXT NOT NULL,
                updated_at TEXT NOT NULL
            );
            "#,
        )
        .execute(pool)
        .await
        .context("Failed to create key_values table")?;

        Ok(())
    }
}

#[async_trait]
impl KeyValueMedium for SqliteMedium {
    async fn get_value(&self, key: &str) -> Result<Option<String>> {
        let row = sqlx::query("SELECT value FROM key_values WHERE key = ?")
            .bind(key)
            .fetch_optional(&*self.pool)
            .await?;

        Ok(row.map(|r| r.get("value")))
    }

    async fn put_value(&self, key: &str, value: &str) -> Result<()> {
        sqlx::query("INSERT OR REPLACE INTO key_values (key, value, updated_at) VALUES (?, ?, ?)")
            .bind(key)
            .bind(value)
            .bind(chrono::Utc::now().to_rfc3339())
            .execute(&*self.pool)
            .await?;
        Ok(())
    }

    async fn delete_value(&self, key: &str) -> Result<bool> {
        let result = sqlx::query("DELETE FROM key_values WHERE key = ?")
            .bind(key)
            .execute(&*self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn list_keys(&self) -> Result<Vec<String>> {
        let rows = sqlx::query("SELECT key FROM key_values ORDER BY key")
            .fetch_all(&*self.pool)
            .await?;
        Ok(rows.iter().map(|row| row.get("key")).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_put_get_delete() {
        let db = SqliteMedium::init_test().await.unwrap();

        db.put_value("babylog_children", "{}").await.unwrap();
        assert_eq!(db.get_value("babylog_children").await.unwrap(), Some("{}".to_string()));

        // Overwrite
        db.put_value("babylog_children", "{\"1\":null}").await.unwrap();
        assert_eq!(
            db.get_value("babylog_children").await.unwrap(),
            Some("{\"1\":null}".to_string())
        );

        assert!(db.delete_value("babylog_children").await.unwrap());
        assert!(!db.delete_value("babylog_children").await.unwrap());
        assert_eq!(db.get_value("babylog_children").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_list_keys() {
        let db = SqliteMedium::init_test().await.unwrap();
        db.put_value("b", "1").await.unwrap();
        db.put_value("a", "2").await.unwrap();

        assert_eq!(db.list_keys().await.unwrap(), vec!["a".to_string(), "b".to_string()]);
    }

    #[tokio::test]
    async fn test_values_survive_reopen() {
        let temp_dir = TempDir::new().unwrap();
        let url = format!("sqlite:{}", temp_dir.path().join("babylog.db").display());

        {
            let db = SqliteMedium::new(&url).await.unwrap();
            db.put_value("babylog_logs", "[]").await.unwrap();
        }

        let reopened = SqliteMedium::new(&url).await.unwrap();
        assert_eq!(reopened.get_value("babylog_logs").await.unwrap(), Some("[]".to_string()));
    }
}
