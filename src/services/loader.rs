use std::fs::File;
use std::path::Path;
use std::sync::Arc;

use crate::config::TablesConfig;
use crate::error::AppError;
use crate::models::{ColumnDef, Table, TableSchema};
use crate::services::store::RelationalStore;

/// Parse a delimited file with a header row into a table.
///
/// Every header must name a column of `schema`; cells are parsed with that
/// column's type and empty cells become NULL. Column order follows the file.
pub fn parse_delimited_file(
    path: &Path,
    delimiter: u8,
    schema: &TableSchema,
) -> Result<Table, AppError> {
    let file = File::open(path)
        .map_err(|e| AppError::Io(format!("Failed to open {}: {}", path.display(), e)))?;

    let mut reader = csv::ReaderBuilder::new()
        .delimiter(delimiter)
        .has_headers(true)
        .from_reader(file);

    let columns = reader
        .headers()?
        .iter()
        .map(|header| {
            let header = header.trim();
            schema
                .column(header)
                .cloned()
                .ok_or_else(|| {
                    AppError::Validation(format!(
                        "Unexpected column '{}' in {}",
                        header,
                        path.display()
                    ))
                })
        })
        .collect::<Result<Vec<ColumnDef>, AppError>>()?;

    let mut table = Table::new(columns.clone());
    for record in reader.records() {
        let record = record?;
        let line = record.position().map_or(0, |p| p.line());
        let row = record
            .iter()
            .zip(&columns)
            .map(|(cell, column)| {
                column.column_type.parse_cell(cell).map_err(|e| {
                    AppError::Parse(format!("line {}, column '{}': {}", line, column.name, e))
                })
            })
            .collect::<Result<Vec<_>, AppError>>()?;
        table.push_row(row)?;
    }

    Ok(table)
}

/// Outcome of a raw load
#[derive(Debug, Clone)]
pub struct LoadReport {
    pub table: String,
    pub rows: u64,
}

/// Loads the listings file into the raw table, replacing its contents
pub struct RawLoader {
    store: Arc<dyn RelationalStore>,
    schema: TableSchema,
    delimiter: u8,
}

impl RawLoader {
    pub fn new(store: Arc<dyn RelationalStore>, tables: &TablesConfig, delimiter: u8) -> Self {
        Self {
            store,
            schema: TableSchema::listings_raw(tables.raw.clone()),
            delimiter,
        }
    }

    pub async fn load(&self, path: &Path) -> Result<LoadReport, AppError> {
        tracing::info!("Reading {}", path.display());
        let table = parse_delimited_file(path, self.delimiter, &self.schema)?;
        tracing::info!("Parsed {} rows from {}", table.row_count(), path.display());

        tracing::info!("Creating table {} if absent", self.schema.name);
        self.store.execute_ddl(&self.schema).await?;
        tracing::info!("Table {} is ready", self.schema.name);

        let rows = self.store.replace_table(&self.schema.name, &table).await?;
        tracing::info!("Data loaded into {} table successfully ({} rows)", self.schema.name, rows);

        Ok(LoadReport {
            table: self.schema.name.clone(),
            rows,
        })
    }
}
