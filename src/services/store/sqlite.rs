use rusqlite::types::{Value as SqlValue, ValueRef};
use rusqlite::{params_from_iter, Connection, OptionalExtension};
use std::sync::Arc;
use tokio::sync::Mutex;

use crate::error::AppError;
use crate::models::{parse_date, quote_ident, ColumnDef, ColumnType, SqlDialect, Table, TableSchema, Value};
use crate::services::store::adapter::RelationalStore;

/// SQLite-backed relational store
/// Uses tokio::Mutex for async-friendly locking
pub struct SqliteStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteStore {
    /// Open a database file, or an in-memory database for `:memory:`
    pub async fn open(path: &str) -> Result<Self, AppError> {
        // Accept sqlite:./path and sqlite://path as well as bare paths
        let clean_path = path.trim_start_matches("sqlite:").trim_start_matches("//");

        let conn = if clean_path == ":memory:" {
            Connection::open_in_memory()
        } else {
            Connection::open(clean_path)
        }
        .map_err(|e| AppError::Connection(format!("Failed to open {}: {}", clean_path, e)))?;

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Declared columns of an existing table, in ordinal order
    fn declared_columns(conn: &Connection, name: &str) -> Result<Vec<ColumnDef>, AppError> {
        let mut stmt = conn.prepare(&format!("PRAGMA table_info({})", quote_ident(name)))?;
        let columns = stmt
            .query_map([], |row| {
                let column: String = row.get(1)?;
                let declared: String = row.get(2)?;
                Ok(ColumnDef::new(column, Self::affinity(&declared)))
            })?
            .collect::<Result<Vec<_>, _>>()?;

        if columns.is_empty() {
            return Err(AppError::NotFound(format!("relation \"{}\" does not exist", name)));
        }
        Ok(columns)
    }

    /// Map a declared SQLite column type onto a logical column type
    fn affinity(declared: &str) -> ColumnType {
        let declared = declared.to_uppercase();
        if declared.contains("DATE") || declared.contains("TIME") {
            ColumnType::Date
        } else if declared.contains("INT") {
            ColumnType::Integer
        } else if declared.contains("REAL") || declared.contains("FLOA") || declared.contains("DOUB") {
            ColumnType::Float
        } else {
            ColumnType::Text
        }
    }

    fn read_value(raw: ValueRef<'_>, column_type: ColumnType) -> Result<Value, AppError> {
        Ok(match raw {
            ValueRef::Null => Value::Null,
            ValueRef::Integer(v) => match column_type {
                ColumnType::Float => Value::Float(v as f64),
                _ => Value::Integer(v),
            },
            ValueRef::Real(v) => Value::float(v),
            ValueRef::Text(bytes) => {
                let text = std::str::from_utf8(bytes)
                    .map_err(|e| AppError::Parse(format!("Stored text is not valid UTF-8: {}", e)))?
                    .to_string();
                match column_type {
                    ColumnType::Date if !text.is_empty() => Value::Date(parse_date(&text)?),
                    _ => Value::Text(text),
                }
            }
            ValueRef::Blob(_) => {
                return Err(AppError::Database("BLOB columns are not supported".to_string()))
            }
        })
    }

    /// Coerce a value to the destination column's declared type
    fn coerce(value: &Value, column_type: ColumnType) -> Result<SqlValue, AppError> {
        Ok(match column_type {
            ColumnType::Integer => value.as_i64()?.map_or(SqlValue::Null, SqlValue::Integer),
            ColumnType::Float => value.as_f64()?.map_or(SqlValue::Null, SqlValue::Real),
            ColumnType::Date => value
                .as_date()?
                .map_or(SqlValue::Null, |d| SqlValue::Text(d.format("%Y-%m-%d").to_string())),
            ColumnType::Text => value.as_text().map_or(SqlValue::Null, SqlValue::Text),
        })
    }
}

#[async_trait::async_trait]
impl RelationalStore for SqliteStore {
    async fn execute_ddl(&self, schema: &TableSchema) -> Result<(), AppError> {
        let sql = schema.create_table_sql(SqlDialect::Sqlite);
        tracing::debug!("Executing SQL command:\n{}", sql);

        let conn = self.conn.lock().await;
        conn.execute(&sql, [])?;
        Ok(())
    }

    async fn table_exists(&self, name: &str) -> Result<bool, AppError> {
        let conn = self.conn.lock().await;
        let found: Option<String> = conn
            .query_row(
                "SELECT name FROM sqlite_master WHERE type = 'table' AND name = ?1",
                [name],
                |row| row.get(0),
            )
            .optional()?;
        Ok(found.is_some())
    }

    async fn read_table(&self, name: &str) -> Result<Table, AppError> {
        let conn = self.conn.lock().await;
        let columns = Self::declared_columns(&conn, name)?;

        let mut stmt = conn.prepare(&format!("SELECT * FROM {}", quote_ident(name)))?;
        let mut rows = stmt.query([])?;
        let mut table = Table::new(columns.clone());

        while let Some(row) = rows.next()? {
            let values = columns
                .iter()
                .enumerate()
                .map(|(idx, column)| Self::read_value(row.get_ref(idx)?, column.column_type))
                .collect::<Result<Vec<_>, AppError>>()?;
            table.push_row(values)?;
        }

        Ok(table)
    }

    async fn replace_table(&self, name: &str, table: &Table) -> Result<u64, AppError> {
        let mut conn = self.conn.lock().await;
        let declared = Self::declared_columns(&conn, name)?;

        // Resolve each incoming column against the destination's declared type
        let targets = table
            .columns()
            .iter()
            .map(|column| {
                declared
                    .iter()
                    .find(|d| d.name == column.name)
                    .map(|d| d.column_type)
                    .ok_or_else(|| {
                        AppError::Database(format!(
                            "column \"{}\" of relation \"{}\" does not exist",
                            column.name, name
                        ))
                    })
            })
            .collect::<Result<Vec<_>, AppError>>()?;

        let column_list: Vec<String> = table.columns().iter().map(|c| quote_ident(&c.name)).collect();
        let placeholders: Vec<String> = (1..=column_list.len()).map(|i| format!("?{}", i)).collect();
        let insert_sql = format!(
            "INSERT INTO {} ({}) VALUES ({})",
            quote_ident(name),
            column_list.join(", "),
            placeholders.join(", ")
        );

        let tx = conn.transaction()?;
        tx.execute(&format!("DELETE FROM {}", quote_ident(name)), [])?;

        let mut written = 0u64;
        {
            let mut stmt = tx.prepare(&insert_sql)?;
            for row in table.rows() {
                let params = row
                    .iter()
                    .zip(&targets)
                    .map(|(value, ty)| Self::coerce(value, *ty))
                    .collect::<Result<Vec<_>, AppError>>()?;
                stmt.execute(params_from_iter(params))?;
                written += 1;
            }
        }
        tx.commit()?;

        Ok(written)
    }

    fn backend(&self) -> &str {
        "sqlite"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use tempfile::tempdir;

    fn store() -> SqliteStore {
        tokio_test::block_on(SqliteStore::open(":memory:")).unwrap()
    }

    fn listing(id: i64, neighbourhood: &str, price: i64) -> Vec<Value> {
        let schema = TableSchema::listings_raw("listings_raw");
        schema
            .columns
            .iter()
            .map(|c| match c.name.as_str() {
                "id" => Value::Integer(id),
                "neighbourhood" => Value::Text(neighbourhood.to_string()),
                "price" => Value::Integer(price),
                "last_review" => Value::Date(NaiveDate::from_ymd_opt(2019, 5, 21).unwrap()),
                _ => Value::Null,
            })
            .collect()
    }

    fn raw_table(rows: Vec<Vec<Value>>) -> Table {
        Table::with_rows(TableSchema::listings_raw("listings_raw").columns, rows).unwrap()
    }

    #[test]
    fn test_execute_ddl_is_idempotent() {
        let store = store();
        let schema = TableSchema::listings_raw("listings_raw");
        tokio_test::block_on(async {
            assert!(!store.table_exists("listings_raw").await.unwrap());
            store.execute_ddl(&schema).await.unwrap();
            store.execute_ddl(&schema).await.unwrap();
            assert!(store.table_exists("listings_raw").await.unwrap());
        });
    }

    #[test]
    fn test_execute_ddl_leaves_existing_shape() {
        let store = store();
        tokio_test::block_on(async {
            {
                let conn = store.conn.lock().await;
                conn.execute("CREATE TABLE listings_raw (other TEXT)", []).unwrap();
            }
            store
                .execute_ddl(&TableSchema::listings_raw("listings_raw"))
                .await
                .unwrap();
            let table = store.read_table("listings_raw").await.unwrap();
            assert_eq!(table.column_names(), vec!["other"]);
        });
    }

    #[test]
    fn test_read_missing_table() {
        let store = store();
        let result = tokio_test::block_on(store.read_table("listings_raw"));
        assert!(matches!(result, Err(AppError::NotFound(_))));
    }

    #[test]
    fn test_replace_then_read() {
        let store = store();
        let table = raw_table(vec![listing(1, "Harlem", 150), listing(2, "Midtown", 225)]);
        tokio_test::block_on(async {
            store
                .execute_ddl(&TableSchema::listings_raw("listings_raw"))
                .await
                .unwrap();
            let written = store.replace_table("listings_raw", &table).await.unwrap();
            assert_eq!(written, 2);

            let read = store.read_table("listings_raw").await.unwrap();
            assert_eq!(read, table);
        });
    }

    #[test]
    fn test_replace_does_not_append() {
        let store = store();
        let table = raw_table(vec![listing(1, "Harlem", 150), listing(2, "Midtown", 225)]);
        tokio_test::block_on(async {
            store
                .execute_ddl(&TableSchema::listings_raw("listings_raw"))
                .await
                .unwrap();
            store.replace_table("listings_raw", &table).await.unwrap();
            store.replace_table("listings_raw", &table).await.unwrap();
            let read = store.read_table("listings_raw").await.unwrap();
            assert_eq!(read.row_count(), 2);
        });
    }

    #[test]
    fn test_replace_rejects_type_mismatch_and_keeps_old_rows() {
        let store = store();
        let good = raw_table(vec![listing(1, "Harlem", 150)]);
        let mut bad_row = listing(2, "Midtown", 0);
        let price_idx = good.column_index("price").unwrap();
        bad_row[price_idx] = Value::Text("expensive".to_string());
        let bad = raw_table(vec![listing(3, "SoHo", 300), bad_row]);

        tokio_test::block_on(async {
            store
                .execute_ddl(&TableSchema::listings_raw("listings_raw"))
                .await
                .unwrap();
            store.replace_table("listings_raw", &good).await.unwrap();

            let result = store.replace_table("listings_raw", &bad).await;
            assert!(matches!(result, Err(AppError::Parse(_))));

            let read = store.read_table("listings_raw").await.unwrap();
            assert_eq!(read, good);
        });
    }

    #[test]
    fn test_replace_unknown_column() {
        let store = store();
        let mut table = raw_table(vec![listing(1, "Harlem", 150)]);
        table
            .add_column(ColumnDef::new("average_price", ColumnType::Float), vec![Value::Float(1.0)])
            .unwrap();
        tokio_test::block_on(async {
            store
                .execute_ddl(&TableSchema::listings_raw("listings_raw"))
                .await
                .unwrap();
            let result = store.replace_table("listings_raw", &table).await;
            assert!(matches!(result, Err(AppError::Database(_))));
        });
    }

    #[test]
    fn test_file_backed_store_persists() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("etl.db");
        let path = path.to_str().unwrap().to_string();
        let table = raw_table(vec![listing(7, "Astoria", 80)]);

        tokio_test::block_on(async {
            let store = SqliteStore::open(&path).await.unwrap();
            store
                .execute_ddl(&TableSchema::listings_raw("listings_raw"))
                .await
                .unwrap();
            store.replace_table("listings_raw", &table).await.unwrap();
        });

        let reopened = tokio_test::block_on(SqliteStore::open(&format!("sqlite:{}", path))).unwrap();
        let read = tokio_test::block_on(reopened.read_table("listings_raw")).unwrap();
        assert_eq!(read.row_count(), 1);
        assert_eq!(read.get(0, "neighbourhood"), Some(&Value::Text("Astoria".to_string())));
    }

    #[test]
    fn test_read_rejects_invalid_utf8_text() {
        let store = store();
        tokio_test::block_on(async {
            {
                let conn = store.conn.lock().await;
                conn.execute_batch(
                    "CREATE TABLE notes (body TEXT); INSERT INTO notes VALUES (CAST(x'ff' AS TEXT));",
                )
                .unwrap();
            }
            let result = store.read_table("notes").await;
            assert!(matches!(result, Err(AppError::Parse(_))));
        });
    }

    #[test]
    fn test_affinity() {
        assert_eq!(SqliteStore::affinity("INTEGER"), ColumnType::Integer);
        assert_eq!(SqliteStore::affinity("double precision"), ColumnType::Float);
        assert_eq!(SqliteStore::affinity("DATE"), ColumnType::Date);
        assert_eq!(SqliteStore::affinity(""), ColumnType::Text);
    }
}
