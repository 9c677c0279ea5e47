use thiserror::Error;

/// Application error types
#[derive(Debug, Error)]
pub enum AppError {
    #[error("Database error: {0}")]
    Database(String),

    #[error("Connection error: {0}")]
    Connection(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Parse error: {0}")]
    Parse(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("I/O error: {0}")]
    Io(String),

    #[error("Configuration error: {0}")]
    Config(String),

    /// An error raised while a pipeline stage was executing
    #[error("Stage '{stage}' failed: {source}")]
    Stage {
        stage: &'static str,
        #[source]
        source: Box<AppError>,
    },
}

impl AppError {
    pub fn in_stage(stage: &'static str, err: AppError) -> Self {
        AppError::Stage {
            stage,
            source: Box::new(err),
        }
    }

    /// Name of the pipeline stage that failed, if any
    pub fn stage(&self) -> Option<&'static str> {
        match self {
            AppError::Stage { stage, .. } => Some(stage),
            _ => None,
        }
    }
}

/// Convert rusqlite::Error to AppError
impl From<rusqlite::Error> for AppError {
    fn from(err: rusqlite::Error) -> Self {
        AppError::Database(err.to_string())
    }
}

/// Convert tokio_postgres::Error to AppError, surfacing missing relations as NotFound
impl From<tokio_postgres::Error> for AppError {
    fn from(err: tokio_postgres::Error) -> Self {
        if let Some(db_error) = err.as_db_error() {
            if *db_error.code() == tokio_postgres::error::SqlState::UNDEFINED_TABLE {
                return AppError::NotFound(db_error.message().to_string());
            }
            return AppError::Database(format!(
                "Code: {}, Message: {}",
                db_error.code().code(),
                db_error.message()
            ));
        }
        if err.is_closed() {
            return AppError::Connection(err.to_string());
        }
        AppError::Database(err.to_string())
    }
}

impl From<csv::Error> for AppError {
    fn from(err: csv::Error) -> Self {
        if err.is_io_error() {
            AppError::Io(err.to_string())
        } else {
            AppError::Parse(err.to_string())
        }
    }
}

impl From<std::io::Error> for AppError {
    fn from(err: std::io::Error) -> Self {
        AppError::Io(err.to_string())
    }
}

impl From<config::ConfigError> for AppError {
    fn from(err: config::ConfigError) -> Self {
        AppError::Config(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stage_error_names_stage() {
        let error = AppError::in_stage(
            "extract_data",
            AppError::NotFound("relation \"listings_raw\" does not exist".to_string()),
        );
        assert_eq!(error.stage(), Some("extract_data"));
        let message = error.to_string();
        assert!(message.starts_with("Stage 'extract_data' failed"));
        assert!(message.contains("listings_raw"));
    }

    #[test]
    fn test_io_error_conversion() {
        let io = std::io::Error::new(std::io::ErrorKind::NotFound, "missing.csv");
        let error: AppError = io.into();
        assert!(matches!(error, AppError::Io(_)));
        assert!(error.stage().is_none());
    }
}
