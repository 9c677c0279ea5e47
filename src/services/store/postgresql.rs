// PostgreSQL store using a deadpool connection pool
use chrono::{NaiveDate, NaiveDateTime};
use deadpool_postgres::{Config as PoolConfig, ManagerConfig, Pool, RecyclingMethod};
use tokio_postgres::binary_copy::BinaryCopyInWriter;
use tokio_postgres::types::{ToSql, Type};
use tokio_postgres::NoTls;

use crate::config::DatabaseConfig;
use crate::error::AppError;
use crate::models::{quote_ident, ColumnDef, ColumnType, SqlDialect, Table, TableSchema, Value};
use crate::services::store::adapter::RelationalStore;

/// Owned COPY parameter
type Param = Box<dyn ToSql + Sync + Send>;

pub struct PostgresStore {
    pool: Pool,
}

impl PostgresStore {
    /// Build a pool for the configured database and verify it can hand out a
    /// connection
    pub async fn connect(config: &DatabaseConfig) -> Result<Self, AppError> {
        let mut cfg = PoolConfig::new();
        cfg.host = Some(config.host.clone());
        cfg.port = Some(config.port);
        cfg.user = Some(config.user.clone());
        cfg.password = Some(config.password.clone());
        cfg.dbname = Some(config.name.clone());
        cfg.manager = Some(ManagerConfig {
            recycling_method: RecyclingMethod::Fast,
        });

        let pool = cfg
            .create_pool(Some(deadpool_postgres::Runtime::Tokio1), NoTls)
            .map_err(|e| {
                tracing::error!("Failed to create connection pool: {}", e);
                AppError::Connection(format!("Failed to create connection pool: {}", e))
            })?;

        // Runs are sequential; one connection is enough
        pool.resize(1);

        let store = Self { pool };
        store.test_connection().await?;
        Ok(store)
    }

    pub async fn test_connection(&self) -> Result<(), AppError> {
        let _client = self.client().await?;
        Ok(())
    }

    async fn client(&self) -> Result<deadpool_postgres::Object, AppError> {
        self.pool
            .get()
            .await
            .map_err(|e| AppError::Connection(format!("Failed to get connection from pool: {}", e)))
    }

    /// Map a PostgreSQL column type onto a logical column type
    fn column_type(pg_type: &Type) -> Result<ColumnType, AppError> {
        match *pg_type {
            Type::INT2 | Type::INT4 | Type::INT8 => Ok(ColumnType::Integer),
            Type::FLOAT4 | Type::FLOAT8 => Ok(ColumnType::Float),
            Type::TEXT | Type::VARCHAR | Type::BPCHAR | Type::NAME => Ok(ColumnType::Text),
            Type::DATE | Type::TIMESTAMP => Ok(ColumnType::Date),
            _ => Err(AppError::Database(format!(
                "Unsupported column type: {}",
                pg_type.name()
            ))),
        }
    }

    fn read_value(row: &tokio_postgres::Row, idx: usize, pg_type: &Type) -> Result<Value, AppError> {
        let value = match *pg_type {
            Type::INT2 => row.try_get::<_, Option<i16>>(idx)?.map(|v| Value::Integer(v.into())),
            Type::INT4 => row.try_get::<_, Option<i32>>(idx)?.map(|v| Value::Integer(v.into())),
            Type::INT8 => row.try_get::<_, Option<i64>>(idx)?.map(Value::Integer),
            Type::FLOAT4 => row.try_get::<_, Option<f32>>(idx)?.map(|v| Value::float(v.into())),
            Type::FLOAT8 => row.try_get::<_, Option<f64>>(idx)?.map(Value::float),
            Type::DATE => row.try_get::<_, Option<NaiveDate>>(idx)?.map(Value::Date),
            Type::TIMESTAMP => row
                .try_get::<_, Option<NaiveDateTime>>(idx)?
                .map(|v| Value::Date(v.date())),
            _ => row.try_get::<_, Option<String>>(idx)?.map(Value::Text),
        };
        Ok(value.unwrap_or(Value::Null))
    }

    /// Coerce a value to the destination column's PostgreSQL type
    fn coerce(value: &Value, pg_type: &Type) -> Result<Param, AppError> {
        let narrow = |v: i64| -> Result<i32, AppError> {
            i32::try_from(v).map_err(|_| AppError::Parse(format!("{} is out of range for INT", v)))
        };
        let param: Param = match *pg_type {
            Type::INT2 => Box::new(
                value
                    .as_i64()?
                    .map(|v| {
                        i16::try_from(v)
                            .map_err(|_| AppError::Parse(format!("{} is out of range for SMALLINT", v)))
                    })
                    .transpose()?,
            ),
            Type::INT4 => Box::new(value.as_i64()?.map(narrow).transpose()?),
            Type::INT8 => Box::new(value.as_i64()?),
            Type::FLOAT4 => Box::new(value.as_f64()?.map(|v| v as f32)),
            Type::FLOAT8 => Box::new(value.as_f64()?),
            Type::DATE => Box::new(value.as_date()?),
            Type::TIMESTAMP => Box::new(value.as_date()?.and_then(|d| d.and_hms_opt(0, 0, 0))),
            Type::TEXT | Type::VARCHAR | Type::BPCHAR | Type::NAME => Box::new(value.as_text()),
            _ => {
                return Err(AppError::Database(format!(
                    "Unsupported column type: {}",
                    pg_type.name()
                )))
            }
        };
        Ok(param)
    }
}

#[async_trait::async_trait]
impl RelationalStore for PostgresStore {
    async fn execute_ddl(&self, schema: &TableSchema) -> Result<(), AppError> {
        let sql = schema.create_table_sql(SqlDialect::PostgreSQL);
        tracing::debug!("Executing SQL command:\n{}", sql);

        let client = self.client().await?;
        client.batch_execute(&sql).await?;
        Ok(())
    }

    async fn table_exists(&self, name: &str) -> Result<bool, AppError> {
        let client = self.client().await?;
        let row = client
            .query_one(
                "SELECT EXISTS (SELECT 1 FROM information_schema.tables WHERE table_schema = current_schema() AND table_name = $1)",
                &[&name],
            )
            .await?;
        Ok(row.get(0))
    }

    async fn read_table(&self, name: &str) -> Result<Table, AppError> {
        let client = self.client().await?;

        // Preparing first yields the column layout even for an empty table
        let statement = client
            .prepare(&format!("SELECT * FROM {}", quote_ident(name)))
            .await?;

        let columns = statement
            .columns()
            .iter()
            .map(|c| Ok(ColumnDef::new(c.name(), Self::column_type(c.type_())?)))
            .collect::<Result<Vec<_>, AppError>>()?;
        let types: Vec<Type> = statement.columns().iter().map(|c| c.type_().clone()).collect();

        let rows = client.query(&statement, &[]).await?;
        let mut table = Table::new(columns);
        for row in &rows {
            let values = types
                .iter()
                .enumerate()
                .map(|(idx, ty)| Self::read_value(row, idx, ty))
                .collect::<Result<Vec<_>, AppError>>()?;
            table.push_row(values)?;
        }

        Ok(table)
    }

    async fn replace_table(&self, name: &str, table: &Table) -> Result<u64, AppError> {
        let mut client = self.client().await?;
        let column_list = table
            .columns()
            .iter()
            .map(|c| quote_ident(&c.name))
            .collect::<Vec<_>>()
            .join(", ");

        let tx = client.transaction().await?;

        // Destination column types drive the binary COPY encoding
        let shape = tx
            .prepare(&format!("SELECT {} FROM {} LIMIT 0", column_list, quote_ident(name)))
            .await?;
        let types: Vec<Type> = shape.columns().iter().map(|c| c.type_().clone()).collect();

        tx.execute(&format!("DELETE FROM {}", quote_ident(name)), &[])
            .await?;

        let copy_sql = format!(
            "COPY {} ({}) FROM STDIN BINARY",
            quote_ident(name),
            column_list
        );
        let sink = tx.copy_in(copy_sql.as_str()).await?;
        let writer = BinaryCopyInWriter::new(sink, &types);
        futures::pin_mut!(writer);

        for row in table.rows() {
            let params = row
                .iter()
                .zip(&types)
                .map(|(value, ty)| Self::coerce(value, ty))
                .collect::<Result<Vec<_>, AppError>>()?;
            let refs: Vec<&(dyn ToSql + Sync)> = params
                .iter()
                .map(|p| p.as_ref() as &(dyn ToSql + Sync))
                .collect();
            writer.as_mut().write(&refs).await?;
        }

        let written = writer.as_mut().finish().await?;
        tx.commit().await?;

        Ok(written)
    }

    fn backend(&self) -> &str {
        "postgresql"
    }
}
