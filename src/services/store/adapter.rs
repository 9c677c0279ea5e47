// Relational store abstraction consumed by the raw loader and the pipeline
use crate::error::AppError;
use crate::models::{Table, TableSchema};

/// Relational store trait - the narrow surface the loader and pipeline need.
/// Mutation granularity is always the whole table.
#[async_trait::async_trait]
pub trait RelationalStore: Send + Sync {
    /// Create the table if it is absent. An existing table is left as is,
    /// whatever its shape.
    async fn execute_ddl(&self, schema: &TableSchema) -> Result<(), AppError>;

    async fn table_exists(&self, name: &str) -> Result<bool, AppError>;

    /// Materialize the full table. Fails with `NotFound` if it does not exist.
    async fn read_table(&self, name: &str) -> Result<Table, AppError>;

    /// Replace the full contents of an existing table, returning rows written.
    /// Values are coerced to the destination's declared column types.
    async fn replace_table(&self, name: &str, table: &Table) -> Result<u64, AppError>;

    /// Store backend name
    fn backend(&self) -> &str;
}
