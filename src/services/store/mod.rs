// Relational store adapters
pub mod adapter;
pub mod postgresql;
pub mod sqlite;

pub use adapter::RelationalStore;
pub use postgresql::PostgresStore;
pub use sqlite::SqliteStore;

use crate::config::DatabaseConfig;
use crate::error::AppError;
use std::sync::Arc;

/// Store backend enum
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreKind {
    PostgreSQL,
    Sqlite,
}

impl StoreKind {
    pub fn from_str(s: &str) -> Result<Self, AppError> {
        match s.to_lowercase().as_str() {
            "postgresql" | "postgres" => Ok(StoreKind::PostgreSQL),
            "sqlite" => Ok(StoreKind::Sqlite),
            _ => Err(AppError::Validation(format!("Unsupported store backend: {}", s))),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            StoreKind::PostgreSQL => "postgresql",
            StoreKind::Sqlite => "sqlite",
        }
    }
}

/// Open a connection to the configured store. Fails fast when the store is
/// unreachable.
pub async fn connect(config: &DatabaseConfig) -> Result<Arc<dyn RelationalStore>, AppError> {
    let kind = StoreKind::from_str(&config.backend)?;
    tracing::info!("Connecting to {} store: {}", kind.as_str(), config.display_url());

    let store: Arc<dyn RelationalStore> = match kind {
        StoreKind::PostgreSQL => Arc::new(PostgresStore::connect(config).await?),
        StoreKind::Sqlite => Arc::new(SqliteStore::open(&config.name).await?),
    };

    tracing::info!("Successfully connected to {} store", kind.as_str());
    Ok(store)
}
