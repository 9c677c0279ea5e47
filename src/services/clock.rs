use chrono::NaiveDate;
use std::sync::Arc;

use crate::config::PipelineConfig;

/// Source of "today" for the null-fill of `last_review`
pub trait Clock: Send + Sync {
    fn today(&self) -> NaiveDate;
}

/// Local wall clock
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn today(&self) -> NaiveDate {
        chrono::Local::now().date_naive()
    }
}

/// A pinned reference date, for reproducible runs
#[derive(Debug, Clone, Copy)]
pub struct FixedClock(pub NaiveDate);

impl Clock for FixedClock {
    fn today(&self) -> NaiveDate {
        self.0
    }
}

pub fn clock_from_config(config: &PipelineConfig) -> Arc<dyn Clock> {
    match config.reference_date {
        Some(date) => {
            tracing::info!("Using fixed reference date {}", date);
            Arc::new(FixedClock(date))
        }
        None => Arc::new(SystemClock),
    }
}
