use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::{Pool, Sqlite};
use std::path::Path;
use std::str::FromStr;
use tracing::{debug, info};

pub mod error;
pub mod init;
pub mod query_helper;
pub mod storage;

pub use error::{DatabaseError, Result};
pub use init::{create_entity_tables, initialize_database, DatabaseConfig};
pub use query_helper::QueryHelper;
pub use storage::EntityStorage;

/// Database connection pool
#[derive(Debug)]
pub struct Database {
    pool: Pool<Sqlite>,
}

impl Database {
    /// Connect to a SQLite database, creating the file if needed
    ///
    /// Accepts `sqlite:` URLs, `:memory:` and plain file paths.
    pub async fn new(database_path: &str) -> Result<Self> {
        let in_memory = database_path.contains(":memory:");

        let connection_string = if database_path.starts_with("sqlite:") {
            database_path.to_string()
        } else if in_memory {
            "sqlite::memory:".to_string()
        } else {
            // Ensure the data directory exists
            if let Some(parent) = Path::new(database_path).parent() {
                if !parent.as_os_str().is_empty() {
                    std::fs::create_dir_all(parent)?;
                }
            }
            format!("sqlite://{}", database_path)
        };

        info!("Connecting to database at: {}", connection_string);

        let options = SqliteConnectOptions::from_str(&connection_string)?.create_if_missing(true);
        // Every connection to :memory: opens a separate database
        let max_connections = if in_memory { 1 } else { 5 };
        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections)
            .connect_with(options)
            .await?;

        debug!("Database connection established");

        Ok(Self { pool })
    }

    /// Get a reference to the connection pool
    pub fn pool(&self) -> &Pool<Sqlite> {
        &self.pool
    }

    /// Check if a table exists
    pub async fn table_exists(&self, table_name: &str) -> Result<bool> {
        let query = r#"
            SELECT COUNT(*) as count
            FROM sqlite_master
            WHERE type='table' AND name=?
        "#;

        let result: (i32,) = sqlx::query_as(query)
            .bind(table_name)
            .fetch_one(&self.pool)
            .await?;

        Ok(result.0 > 0)
    }

    /// Execute raw SQL (for table creation, etc.)
    pub async fn execute_raw(&self, sql: &str) -> Result<()> {
        sqlx::query(sql).execute(&self.pool).await?;
        Ok(())
    }
}
