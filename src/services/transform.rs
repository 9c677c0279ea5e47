// Pure transforms over the working table
use chrono::NaiveDate;
use std::collections::BTreeMap;

use crate::error::AppError;
use crate::models::{
    ColumnDef, ColumnType, Table, Value, AVERAGE_PRICE, LAST_REVIEW, NEIGHBOURHOOD, PRICE,
    REVIEWS_PER_MONTH,
};

/// Mean price per neighbourhood, computed from one table
#[derive(Debug, Clone, Default, PartialEq)]
pub struct NeighbourhoodAggregate {
    means: BTreeMap<String, f64>,
}

impl NeighbourhoodAggregate {
    /// Group rows by neighbourhood and average their prices.
    /// NULL prices are skipped; rows with a NULL neighbourhood form no group.
    pub fn from_table(table: &Table) -> Result<Self, AppError> {
        let key_idx = table.column_index(NEIGHBOURHOOD)?;
        let price_idx = table.column_index(PRICE)?;

        let mut sums: BTreeMap<String, (f64, u64)> = BTreeMap::new();
        for row in table.rows() {
            let Some(key) = row[key_idx].as_text() else {
                continue;
            };
            let entry = sums.entry(key).or_insert((0.0, 0));
            if let Some(price) = row[price_idx].as_f64()? {
                entry.0 += price;
                entry.1 += 1;
            }
        }

        let means = sums
            .into_iter()
            .filter(|(_, (_, count))| *count > 0)
            .map(|(key, (sum, count))| (key, sum / count as f64))
            .collect();

        Ok(Self { means })
    }

    pub fn get(&self, neighbourhood: &str) -> Option<f64> {
        self.means.get(neighbourhood).copied()
    }

    pub fn len(&self) -> usize {
        self.means.len()
    }

    pub fn is_empty(&self) -> bool {
        self.means.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, f64)> {
        self.means.iter().map(|(k, v)| (k.as_str(), *v))
    }
}

/// Result of the transform stage
#[derive(Debug, Clone)]
pub struct Transformed {
    pub table: Table,
    pub aggregate: NeighbourhoodAggregate,
}

/// Parse `last_review` into dates; absent values stay NULL
pub fn normalize_dates(table: &mut Table) -> Result<(), AppError> {
    table.map_column(LAST_REVIEW, ColumnType::Date, |value| {
        Ok(value.as_date()?.map_or(Value::Null, Value::Date))
    })
}

/// Replace NULLs in one column, keeping its declared type
pub fn fill_nulls(table: &mut Table, column: &str, fill: Value) -> Result<(), AppError> {
    let column_type = table.columns()[table.column_index(column)?].column_type;
    table.map_column(column, column_type, |value| {
        Ok(if value.is_null() { fill.clone() } else { value.clone() })
    })
}

/// Left-join the aggregate onto every row as `average_price`
pub fn merge_aggregate(table: &mut Table, aggregate: &NeighbourhoodAggregate) -> Result<(), AppError> {
    let values = table
        .column_values(NEIGHBOURHOOD)?
        .map(|key| {
            key.as_text()
                .and_then(|k| aggregate.get(&k))
                .map_or(Value::Null, Value::Float)
        })
        .collect();
    table.add_column(ColumnDef::new(AVERAGE_PRICE, ColumnType::Float), values)
}

/// The full transform: date normalization, null-filling, then the
/// neighbourhood average price join. Row count is preserved.
pub fn transform_listings(mut table: Table, today: NaiveDate) -> Result<Transformed, AppError> {
    normalize_dates(&mut table)?;
    fill_nulls(&mut table, REVIEWS_PER_MONTH, Value::Float(0.0))?;
    fill_nulls(&mut table, LAST_REVIEW, Value::Date(today))?;

    let aggregate = NeighbourhoodAggregate::from_table(&table)?;
    merge_aggregate(&mut table, &aggregate)?;

    Ok(Transformed { table, aggregate })
}
