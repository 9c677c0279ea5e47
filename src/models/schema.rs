use serde::Serialize;

use super::table::{ColumnDef, ColumnType};

pub const ID: &str = "id";
pub const NEIGHBOURHOOD: &str = "neighbourhood";
pub const PRICE: &str = "price";
pub const LAST_REVIEW: &str = "last_review";
pub const REVIEWS_PER_MONTH: &str = "reviews_per_month";
pub const AVERAGE_PRICE: &str = "average_price";

/// Column layout of the listings source file and `listings_raw`
const LISTING_COLUMNS: &[(&str, ColumnType)] = &[
    (ID, ColumnType::Integer),
    ("name", ColumnType::Text),
    ("host_id", ColumnType::Integer),
    ("host_name", ColumnType::Text),
    ("neighbourhood_group", ColumnType::Text),
    (NEIGHBOURHOOD, ColumnType::Text),
    ("latitude", ColumnType::Float),
    ("longitude", ColumnType::Float),
    ("room_type", ColumnType::Text),
    (PRICE, ColumnType::Integer),
    ("minimum_nights", ColumnType::Integer),
    ("number_of_reviews", ColumnType::Integer),
    (LAST_REVIEW, ColumnType::Date),
    (REVIEWS_PER_MONTH, ColumnType::Float),
    ("calculated_host_listings_count", ColumnType::Integer),
    ("availability_365", ColumnType::Integer),
];

/// SQL dialect used to render DDL
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SqlDialect {
    PostgreSQL,
    Sqlite,
}

impl ColumnType {
    pub fn sql_type(&self, dialect: SqlDialect) -> &'static str {
        match (self, dialect) {
            (ColumnType::Integer, SqlDialect::PostgreSQL) => "INT",
            (ColumnType::Integer, SqlDialect::Sqlite) => "INTEGER",
            (ColumnType::Float, SqlDialect::PostgreSQL) => "DOUBLE PRECISION",
            (ColumnType::Float, SqlDialect::Sqlite) => "REAL",
            (ColumnType::Text, _) => "TEXT",
            (ColumnType::Date, _) => "DATE",
        }
    }
}

/// Quote an SQL identifier
pub fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

/// Persisted table definition
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TableSchema {
    pub name: String,
    pub columns: Vec<ColumnDef>,
    /// Store-assigned surrogate key column
    pub serial_key: Option<String>,
}

impl TableSchema {
    /// Source schema of the raw listings table
    pub fn listings_raw(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            columns: LISTING_COLUMNS
                .iter()
                .map(|(name, ty)| ColumnDef::new(*name, *ty))
                .collect(),
            serial_key: Some(ID.to_string()),
        }
    }

    /// Source schema plus the derived `average_price` column
    pub fn listings_transformed(name: impl Into<String>) -> Self {
        let mut schema = Self::listings_raw(name);
        schema
            .columns
            .push(ColumnDef::new(AVERAGE_PRICE, ColumnType::Float));
        schema
    }

    pub fn column(&self, name: &str) -> Option<&ColumnDef> {
        self.columns.iter().find(|c| c.name == name)
    }

    /// `CREATE TABLE IF NOT EXISTS` statement; an existing table is left untouched
    pub fn create_table_sql(&self, dialect: SqlDialect) -> String {
        let columns: Vec<String> = self
            .columns
            .iter()
            .map(|column| {
                let is_key = self.serial_key.as_deref() == Some(column.name.as_str());
                let ty = match (is_key, dialect) {
                    (true, SqlDialect::PostgreSQL) => "SERIAL PRIMARY KEY",
                    (true, SqlDialect::Sqlite) => "INTEGER PRIMARY KEY AUTOINCREMENT",
                    (false, _) => column.column_type.sql_type(dialect),
                };
                format!("    {} {}", quote_ident(&column.name), ty)
            })
            .collect();

        format!(
            "CREATE TABLE IF NOT EXISTS {} (\n{}\n)",
            quote_ident(&self.name),
            columns.join(",\n")
        )
    }
}
