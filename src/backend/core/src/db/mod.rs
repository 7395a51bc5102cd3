//! Database layer.
//!
//! Uses PostgreSQL with sqlx. Guard reads go through a `StorageManager`, which
//! is either the shared pool or the transaction the surrounding request is
//! already running in (for example an RLS-scoped connection), so the guard
//! observes the same snapshot as the write it protects.

use sqlx::postgres::{PgArguments, PgPoolOptions, PgQueryResult, PgRow};
use sqlx::query::{Query, QueryAs};
use sqlx::{FromRow, PgPool, Postgres, Transaction};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;

use crate::config::DatabaseConfig;
use crate::error::{AccessError, Result};

/// Transaction shared between a request handler and the guards it calls.
pub type SharedTransaction = Arc<Mutex<Transaction<'static, Postgres>>>;

/// Database connection pool.
#[derive(Clone)]
pub struct Database {
    pool: PgPool,
}

impl Database {
    /// Create a new database connection pool.
    pub async fn connect(config: &DatabaseConfig) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .min_connections(config.min_connections)
            .acquire_timeout(Duration::from_secs(config.acquire_timeout_secs))
            .connect(&config.url)
            .await?;

        Ok(Self { pool })
    }

    /// Run migrations.
    pub async fn migrate(&self) -> Result<()> {
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .map_err(|e| AccessError::from(sqlx::Error::Migrate(Box::new(e))))?;
        Ok(())
    }

    /// Storage manager reading straight from the pool.
    pub fn manager(&self) -> StorageManager {
        StorageManager::Pool(self.pool.clone())
    }
}

/// The connection source storage adapters read through.
#[derive(Clone)]
pub enum StorageManager {
    Pool(PgPool),
    Transaction(SharedTransaction),
}

impl StorageManager {
    /// Wrap a transaction owned by the caller.
    pub fn transaction(tx: SharedTransaction) -> Self {
        Self::Transaction(tx)
    }

    pub async fn fetch_optional<'q, T>(
        &self,
        query: QueryAs<'q, Postgres, T, PgArguments>,
    ) -> std::result::Result<Option<T>, sqlx::Error>
    where
        T: for<'r> FromRow<'r, PgRow> + Send + Unpin,
    {
        match self {
            Self::Pool(pool) => query.fetch_optional(pool).await,
            Self::Transaction(tx) => {
                let mut tx = tx.lock().await;
                query.fetch_optional(&mut **tx).await
            }
        }
    }

    pub async fn fetch_all<'q, T>(
        &self,
        query: QueryAs<'q, Postgres, T, PgArguments>,
    ) -> std::result::Result<Vec<T>, sqlx::Error>
    where
        T: for<'r> FromRow<'r, PgRow> + Send + Unpin,
    {
        match self {
            Self::Pool(pool) => query.fetch_all(pool).await,
            Self::Transaction(tx) => {
                let mut tx = tx.lock().await;
                query.fetch_all(&mut **tx).await
            }
        }
    }

    pub async fn execute<'q>(
        &self,
        query: Query<'q, Postgres, PgArguments>,
    ) -> std::result::Result<PgQueryResult, sqlx::Error> {
        match self {
            Self::Pool(pool) => query.execute(pool).await,
            Self::Transaction(tx) => {
                let mut tx = tx.lock().await;
                query.execute(&mut **tx).await
            }
        }
    }
}

impl std::fmt::Debug for StorageManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Pool(_) => f.write_str("StorageManager::Pool"),
            Self::Transaction(_) => f.write_str("StorageManager::Transaction"),
        }
    }
}
