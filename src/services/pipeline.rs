// Staged ETL flow: start -> extract_data -> transform_data -> load_transformed_data -> end
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::fmt;
use std::sync::Arc;
use tracing::Instrument;

use crate::config::TablesConfig;
use crate::error::AppError;
use crate::models::{Table, TableSchema};
use crate::services::clock::Clock;
use crate::services::store::RelationalStore;
use crate::services::transform::{transform_listings, Transformed};

/// Pipeline stages, in execution order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Start,
    ExtractData,
    TransformData,
    LoadTransformedData,
    End,
}

impl Stage {
    pub const ALL: [Stage; 5] = [
        Stage::Start,
        Stage::ExtractData,
        Stage::TransformData,
        Stage::LoadTransformedData,
        Stage::End,
    ];

    /// The unconditional successor; `None` only for `End`
    pub fn next(self) -> Option<Stage> {
        match self {
            Stage::Start => Some(Stage::ExtractData),
            Stage::ExtractData => Some(Stage::TransformData),
            Stage::TransformData => Some(Stage::LoadTransformedData),
            Stage::LoadTransformedData => Some(Stage::End),
            Stage::End => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::Start => "start",
            Stage::ExtractData => "extract_data",
            Stage::TransformData => "transform_data",
            Stage::LoadTransformedData => "load_transformed_data",
            Stage::End => "end",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Position in the flow together with the data handed to the next stage
enum Flow {
    Start,
    Extract,
    Transform(Table),
    Load(Transformed),
    End,
}

impl Flow {
    fn stage(&self) -> Stage {
        match self {
            Flow::Start => Stage::Start,
            Flow::Extract => Stage::ExtractData,
            Flow::Transform(_) => Stage::TransformData,
            Flow::Load(_) => Stage::LoadTransformedData,
            Flow::End => Stage::End,
        }
    }
}

/// Summary of one successful run
#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub run_id: String,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub rows_extracted: usize,
    pub rows_loaded: u64,
    pub neighbourhoods: usize,
    pub stages: Vec<Stage>,
}

/// The ETL pipeline. Each run is one sequential pass over the stages; any
/// stage error aborts the run.
pub struct EtlPipeline {
    store: Arc<dyn RelationalStore>,
    raw_table: String,
    transformed_schema: TableSchema,
    clock: Arc<dyn Clock>,
}

impl EtlPipeline {
    pub fn new(store: Arc<dyn RelationalStore>, tables: &TablesConfig, clock: Arc<dyn Clock>) -> Self {
        Self {
            store,
            raw_table: tables.raw.clone(),
            transformed_schema: TableSchema::listings_transformed(tables.transformed.clone()),
            clock,
        }
    }

    pub async fn run(&self) -> Result<RunReport, AppError> {
        let run_id = uuid::Uuid::new_v4().to_string();
        let span = tracing::info_span!("etl_run", run_id = %run_id);
        self.run_stages(run_id).instrument(span).await
    }

    async fn run_stages(&self, run_id: String) -> Result<RunReport, AppError> {
        let started_at = Utc::now();
        let mut report = RunReport {
            run_id,
            started_at,
            finished_at: started_at,
            rows_extracted: 0,
            rows_loaded: 0,
            neighbourhoods: 0,
            stages: Vec::with_capacity(Stage::ALL.len()),
        };

        let mut flow = Flow::Start;
        loop {
            let stage = flow.stage();
            flow = match self.step(flow, &mut report).await {
                Ok(Some(next)) => next,
                Ok(None) => {
                    report.stages.push(stage);
                    break;
                }
                Err(e) => {
                    tracing::error!("Stage {} failed: {}", stage, e);
                    return Err(AppError::in_stage(stage.as_str(), e));
                }
            };
            report.stages.push(stage);
            debug_assert_eq!(stage.next(), Some(flow.stage()));
        }

        report.finished_at = Utc::now();
        Ok(report)
    }

    /// Execute one stage, returning the next position or `None` after `end`
    async fn step(&self, flow: Flow, report: &mut RunReport) -> Result<Option<Flow>, AppError> {
        let next = match flow {
            Flow::Start => {
                tracing::info!("Starting the ETL flow.");
                Flow::Extract
            }
            Flow::Extract => {
                let table = self.extract_data().await?;
                report.rows_extracted = table.row_count();
                Flow::Transform(table)
            }
            Flow::Transform(table) => {
                let transformed = self.transform_data(table)?;
                report.neighbourhoods = transformed.aggregate.len();
                Flow::Load(transformed)
            }
            Flow::Load(transformed) => {
                report.rows_loaded = self.load_transformed_data(&transformed.table).await?;
                Flow::End
            }
            Flow::End => {
                tracing::info!("ETL process completed successfully!");
                return Ok(None);
            }
        };
        Ok(Some(next))
    }

    /// Read the whole raw table into memory
    pub async fn extract_data(&self) -> Result<Table, AppError> {
        tracing::info!("Extracting data from {}.", self.raw_table);
        let table = self.store.read_table(&self.raw_table).await?;
        tracing::info!("Data extraction successful ({} rows).", table.row_count());
        Ok(table)
    }

    pub fn transform_data(&self, table: Table) -> Result<Transformed, AppError> {
        tracing::info!("Transforming data.");
        let today = self.clock.today();
        let transformed = transform_listings(table, today)?;
        tracing::info!(
            "Transformed {} rows across {} neighbourhoods (missing reviews dated {}).",
            transformed.table.row_count(),
            transformed.aggregate.len(),
            today
        );
        Ok(transformed)
    }

    /// Create the transformed table if absent, then replace its contents
    pub async fn load_transformed_data(&self, table: &Table) -> Result<u64, AppError> {
        let name = &self.transformed_schema.name;
        tracing::info!("Loading transformed data into {}.", name);

        self.store.execute_ddl(&self.transformed_schema).await?;
        tracing::info!("Transformed table {} is ready.", name);

        let rows = self.store.replace_table(name, table).await?;
        tracing::info!("Transformed data loaded into {} table successfully ({} rows).", name, rows);
        Ok(rows)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Value, AVERAGE_PRICE, LAST_REVIEW, NEIGHBOURHOOD, PRICE, REVIEWS_PER_MONTH};
    use crate::services::clock::FixedClock;
    use crate::services::store::SqliteStore;
    use chrono::NaiveDate;

    fn tables() -> TablesConfig {
        TablesConfig {
            raw: "listings_raw".to_string(),
            transformed: "listings_transformed".to_string(),
        }
    }

    fn reference_date() -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 3, 1).unwrap()
    }

    async fn seeded_store(rows: &[(&str, i64, Option<&str>, Option<f64>)]) -> Arc<dyn RelationalStore> {
        let store = SqliteStore::open(":memory:").await.unwrap();
        let schema = TableSchema::listings_raw("listings_raw");
        let mut table = Table::new(schema.columns.clone());
        for (idx, (neighbourhood, price, last_review, reviews)) in rows.iter().enumerate() {
            let row = schema
                .columns
                .iter()
                .map(|c| match c.name.as_str() {
                    "id" => Value::Integer(idx as i64 + 1),
                    "name" => Value::Text(format!("Listing {}", idx + 1)),
                    NEIGHBOURHOOD => Value::Text(neighbourhood.to_string()),
                    PRICE => Value::Integer(*price),
                    LAST_REVIEW => last_review
                        .map(|d| Value::Date(NaiveDate::parse_from_str(d, "%Y-%m-%d").unwrap()))
                        .unwrap_or(Value::Null),
                    REVIEWS_PER_MONTH => reviews.map_or(Value::Null, Value::Float),
                    _ => Value::Null,
                })
                .collect();
            table.push_row(row).unwrap();
        }
        store.execute_ddl(&schema).await.unwrap();
        store.replace_table("listings_raw", &table).await.unwrap();
        Arc::new(store)
    }

    fn pipeline(store: Arc<dyn RelationalStore>) -> EtlPipeline {
        EtlPipeline::new(store, &tables(), Arc::new(FixedClock(reference_date())))
    }

    #[test]
    fn test_stage_order_is_linear() {
        let mut stage = Stage::Start;
        let mut visited = vec![stage];
        while let Some(next) = stage.next() {
            visited.push(next);
            stage = next;
        }
        assert_eq!(visited, Stage::ALL.to_vec());
        assert_eq!(Stage::LoadTransformedData.to_string(), "load_transformed_data");
    }

    #[tokio::test]
    async fn test_run_end_to_end() {
        let store = seeded_store(&[
            ("A", 100, Some("2019-05-21"), Some(0.5)),
            ("A", 200, None, None),
            ("B", 300, Some("2018-12-01"), Some(1.2)),
        ])
        .await;

        let report = pipeline(store.clone()).run().await.unwrap();
        assert_eq!(report.rows_extracted, 3);
        assert_eq!(report.rows_loaded, 3);
        assert_eq!(report.neighbourhoods, 2);
        assert_eq!(report.stages, Stage::ALL.to_vec());

        let out = store.read_table("listings_transformed").await.unwrap();
        assert_eq!(out.row_count(), 3);
        assert_eq!(out.get(0, AVERAGE_PRICE), Some(&Value::Float(150.0)));
        assert_eq!(out.get(1, AVERAGE_PRICE), Some(&Value::Float(150.0)));
        assert_eq!(out.get(2, AVERAGE_PRICE), Some(&Value::Float(300.0)));
        assert_eq!(out.get(1, LAST_REVIEW), Some(&Value::Date(reference_date())));
        assert_eq!(out.get(1, REVIEWS_PER_MONTH), Some(&Value::Float(0.0)));
        assert_eq!(out.get(1, "id"), Some(&Value::Integer(2)));
    }

    #[tokio::test]
    async fn test_run_twice_does_not_duplicate() {
        let store = seeded_store(&[("A", 100, None, None), ("B", 50, None, None)]).await;
        let pipeline = pipeline(store.clone());

        pipeline.run().await.unwrap();
        let first = store.read_table("listings_transformed").await.unwrap();
        pipeline.run().await.unwrap();
        let second = store.read_table("listings_transformed").await.unwrap();

        assert_eq!(second.row_count(), 2);
        assert_eq!(first, second);
    }

    #[tokio::test]
    async fn test_missing_raw_table_fails_in_extract() {
        let store: Arc<dyn RelationalStore> = Arc::new(SqliteStore::open(":memory:").await.unwrap());

        let err = pipeline(store.clone()).run().await.unwrap_err();
        assert_eq!(err.stage(), Some("extract_data"));
        match err {
            AppError::Stage { source, .. } => assert!(matches!(*source, AppError::NotFound(_))),
            other => panic!("unexpected error: {}", other),
        }
        assert!(!store.table_exists("listings_transformed").await.unwrap());
    }

    #[tokio::test]
    async fn test_missing_raw_table_leaves_transformed_untouched() {
        let store = seeded_store(&[("A", 100, None, None)]).await;
        pipeline(store.clone()).run().await.unwrap();
        let before = store.read_table("listings_transformed").await.unwrap();

        let other = EtlPipeline::new(
            store.clone(),
            &TablesConfig {
                raw: "listings_missing".to_string(),
                transformed: "listings_transformed".to_string(),
            },
            Arc::new(FixedClock(reference_date())),
        );
        assert!(other.run().await.is_err());

        let after = store.read_table("listings_transformed").await.unwrap();
        assert_eq!(before, after);
    }

    #[tokio::test]
    async fn test_existing_transformed_table_is_not_altered() {
        let store = seeded_store(&[("A", 100, None, None)]).await;
        // A pre-existing destination without average_price surfaces at replace time
        store
            .execute_ddl(&TableSchema::listings_raw("listings_transformed"))
            .await
            .unwrap();

        let err = pipeline(store.clone()).run().await.unwrap_err();
        assert_eq!(err.stage(), Some("load_transformed_data"));
    }

    #[tokio::test]
    async fn test_stages_callable_individually() {
        let store = seeded_store(&[("Harlem", 120, Some("2019-07-01"), Some(2.0))]).await;
        let pipeline = pipeline(store.clone());

        let raw = pipeline.extract_data().await.unwrap();
        let transformed = pipeline.transform_data(raw).unwrap();
        assert_eq!(transformed.aggregate.get("Harlem"), Some(120.0));

        let written = pipeline.load_transformed_data(&transformed.table).await.unwrap();
        assert_eq!(written, 1);
    }

    #[test]
    fn test_report_serializes_stage_names() {
        let now = Utc::now();
        let report = RunReport {
            run_id: "run".to_string(),
            started_at: now,
            finished_at: now,
            rows_extracted: 1,
            rows_loaded: 1,
            neighbourhoods: 1,
            stages: vec![Stage::Start, Stage::ExtractData],
        };
        let json = serde_json::to_value(&report).unwrap();
        assert_eq!(json["stages"], serde_json::json!(["start", "extract_data"]));
    }
}
