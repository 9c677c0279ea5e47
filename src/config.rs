use chrono::NaiveDate;
use serde::Deserialize;
use std::env;

use crate::error::AppError;

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub database: DatabaseConfig,
    pub source: SourceConfig,
    pub tables: TablesConfig,
    #[serde(default)]
    pub pipeline: PipelineConfig,
    pub logging: LoggingConfig,
}

/// Relational store connection parameters
#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    /// `postgresql` or `sqlite`
    pub backend: String,
    pub host: String,
    pub port: u16,
    pub user: String,
    pub password: String,
    /// Database name; for SQLite the file path or `:memory:`
    pub name: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SourceConfig {
    pub path: String,
    pub delimiter: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TablesConfig {
    pub raw: String,
    pub transformed: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct PipelineConfig {
    /// Date used to fill missing `last_review`; the wall clock when unset
    #[serde(default)]
    pub reference_date: Option<NaiveDate>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    pub level: String,
    pub style: String,
}

impl Config {
    pub fn from_env() -> Result<Self, config::ConfigError> {
        // Values from a .env file never override the real environment
        let _ = dotenv::dotenv();

        let mut builder = config::Config::builder()
            .set_default("database.backend", "postgresql")?
            .set_default("database.host", "localhost")?
            .set_default("database.port", 5432)?
            .set_default("database.user", "postgres")?
            .set_default("database.password", "test")?
            .set_default("database.name", "airbnb_nyc")?
            .set_default("source.path", "AB_NYC_2019.csv")?
            .set_default("source.delimiter", ",")?
            .set_default("tables.raw", "listings_raw")?
            .set_default("tables.transformed", "listings_transformed")?
            .set_default("logging.level", "info")?
            .set_default("logging.style", "auto")?;

        let overrides = [
            ("DB_BACKEND", "database.backend"),
            ("DB_HOST", "database.host"),
            ("DB_PORT", "database.port"),
            ("DB_USER", "database.user"),
            ("DB_PASSWORD", "database.password"),
            ("DB_NAME", "database.name"),
            ("SOURCE_PATH", "source.path"),
            ("SOURCE_DELIMITER", "source.delimiter"),
            ("RAW_TABLE", "tables.raw"),
            ("TRANSFORMED_TABLE", "tables.transformed"),
            ("REFERENCE_DATE", "pipeline.reference_date"),
            ("RUST_LOG", "logging.level"),
            ("RUST_LOG_STYLE", "logging.style"),
        ];
        for (var, key) in overrides {
            if let Ok(value) = env::var(var) {
                builder = builder.set_override(key, value)?;
            }
        }

        builder.build()?.try_deserialize()
    }
}

impl DatabaseConfig {
    /// Connection URL with the password masked, safe for logging
    pub fn display_url(&self) -> String {
        if self.backend.eq_ignore_ascii_case("sqlite") {
            return format!("sqlite:{}", self.name);
        }
        let raw = format!("postgresql://{}:{}/{}", self.host, self.port, self.name);
        match url::Url::parse(&raw) {
            Ok(mut parsed) => {
                let _ = parsed.set_username(&self.user);
                let _ = parsed.set_password(Some("***"));
                parsed.to_string()
            }
            Err(_) => "[invalid-url]".to_string(),
        }
    }
}

impl SourceConfig {
    /// Field delimiter as a single byte
    pub fn delimiter_byte(&self) -> Result<u8, AppError> {
        match self.delimiter.as_bytes() {
            [b] => Ok(*b),
            _ => Err(AppError::Config(format!(
                "Delimiter must be a single byte, got '{}'",
                self.delimiter
            ))),
        }
    }
}
