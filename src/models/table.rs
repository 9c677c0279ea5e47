// In-memory tabular data passed between loader, pipeline stages and stores
use chrono::{NaiveDate, NaiveDateTime};
use serde::Serialize;
use std::fmt;

use crate::error::AppError;

/// Date formats accepted when a date arrives as text
const DATE_FORMATS: &[&str] = &["%Y-%m-%d", "%m/%d/%Y"];
const DATETIME_FORMATS: &[&str] = &["%Y-%m-%d %H:%M:%S", "%Y-%m-%dT%H:%M:%S", "%Y-%m-%d %H:%M:%S%.f"];

/// Cell contents read as missing, matching the usual dataframe defaults
pub const NULL_TOKENS: &[&str] = &[
    "", "#N/A", "#N/A N/A", "#NA", "-1.#IND", "-1.#QNAN", "-NaN", "-nan", "1.#IND", "1.#QNAN",
    "<NA>", "N/A", "NA", "NULL", "NaN", "None", "n/a", "nan", "null",
];

/// A single cell value
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Value {
    Null,
    Integer(i64),
    Float(f64),
    Text(String),
    Date(NaiveDate),
}

impl Value {
    /// Float constructor; NaN is stored as NULL
    pub fn float(v: f64) -> Value {
        if v.is_nan() {
            Value::Null
        } else {
            Value::Float(v)
        }
    }

    /// NULL, or a NaN float
    pub fn is_null(&self) -> bool {
        match self {
            Value::Null => true,
            Value::Float(v) => v.is_nan(),
            _ => false,
        }
    }

    pub fn as_i64(&self) -> Result<Option<i64>, AppError> {
        match self {
            Value::Null => Ok(None),
            Value::Integer(v) => Ok(Some(*v)),
            Value::Float(v) if v.is_nan() => Ok(None),
            // i64::MAX as f64 rounds up to 2^63, which is already out of range
            Value::Float(v)
                if v.fract() == 0.0 && *v >= i64::MIN as f64 && *v < i64::MAX as f64 =>
            {
                Ok(Some(*v as i64))
            }
            Value::Text(s) => s
                .trim()
                .parse::<i64>()
                .map(Some)
                .map_err(|_| AppError::Parse(format!("'{}' is not an integer", s))),
            other => Err(AppError::Parse(format!("{} is not an integer", other))),
        }
    }

    pub fn as_f64(&self) -> Result<Option<f64>, AppError> {
        match self {
            Value::Null => Ok(None),
            Value::Integer(v) => Ok(Some(*v as f64)),
            Value::Float(v) if v.is_nan() => Ok(None),
            Value::Float(v) => Ok(Some(*v)),
            Value::Text(s) => s
                .trim()
                .parse::<f64>()
                .map(|v| Some(v).filter(|v| !v.is_nan()))
                .map_err(|_| AppError::Parse(format!("'{}' is not a number", s))),
            other => Err(AppError::Parse(format!("{} is not a number", other))),
        }
    }

    pub fn as_date(&self) -> Result<Option<NaiveDate>, AppError> {
        match self {
            Value::Null => Ok(None),
            Value::Date(d) => Ok(Some(*d)),
            Value::Text(s) if s.trim().is_empty() => Ok(None),
            Value::Text(s) => parse_date(s).map(Some),
            other => Err(AppError::Parse(format!("{} is not a date", other))),
        }
    }

    /// Text rendering of non-null values; dates render as `YYYY-MM-DD`
    pub fn as_text(&self) -> Option<String> {
        match self {
            Value::Null => None,
            Value::Text(s) => Some(s.clone()),
            other => Some(other.to_string()),
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => write!(f, "NULL"),
            Value::Integer(v) => write!(f, "{}", v),
            Value::Float(v) => write!(f, "{}", v),
            Value::Text(s) => write!(f, "{}", s),
            Value::Date(d) => write!(f, "{}", d.format("%Y-%m-%d")),
        }
    }
}

/// Parse a date, accepting a handful of common date and datetime layouts
pub fn parse_date(raw: &str) -> Result<NaiveDate, AppError> {
    let raw = raw.trim();
    for format in DATE_FORMATS {
        if let Ok(date) = NaiveDate::parse_from_str(raw, format) {
            return Ok(date);
        }
    }
    for format in DATETIME_FORMATS {
        if let Ok(datetime) = NaiveDateTime::parse_from_str(raw, format) {
            return Ok(datetime.date());
        }
    }
    Err(AppError::Parse(format!("'{}' is not a valid date", raw)))
}

/// Logical column type shared by files, tables and stores
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ColumnType {
    Integer,
    Float,
    Text,
    Date,
}

impl ColumnType {
    /// Parse a raw text cell into a value of this type; empty cells and
    /// `NULL_TOKENS` are NULL
    pub fn parse_cell(&self, raw: &str) -> Result<Value, AppError> {
        if NULL_TOKENS.contains(&raw.trim()) {
            return Ok(Value::Null);
        }
        let text = Value::Text(raw.to_string());
        Ok(match self {
            ColumnType::Integer => text.as_i64()?.map_or(Value::Null, Value::Integer),
            ColumnType::Float => text.as_f64()?.map_or(Value::Null, Value::float),
            ColumnType::Text => text,
            ColumnType::Date => text.as_date()?.map_or(Value::Null, Value::Date),
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ColumnDef {
    pub name: String,
    pub column_type: ColumnType,
}

impl ColumnDef {
    pub fn new(name: impl Into<String>, column_type: ColumnType) -> Self {
        Self {
            name: name.into(),
            column_type,
        }
    }
}

/// An ordered collection of rows sharing one set of columns
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Table {
    columns: Vec<ColumnDef>,
    rows: Vec<Vec<Value>>,
}

impl Table {
    pub fn new(columns: Vec<ColumnDef>) -> Self {
        Self {
            columns,
            rows: Vec::new(),
        }
    }

    pub fn with_rows(columns: Vec<ColumnDef>, rows: Vec<Vec<Value>>) -> Result<Self, AppError> {
        let mut table = Self::new(columns);
        for row in rows {
            table.push_row(row)?;
        }
        Ok(table)
    }

    pub fn push_row(&mut self, row: Vec<Value>) -> Result<(), AppError> {
        if row.len() != self.columns.len() {
            return Err(AppError::Validation(format!(
                "Row has {} values but table has {} columns",
                row.len(),
                self.columns.len()
            )));
        }
        self.rows.push(row);
        Ok(())
    }

    pub fn columns(&self) -> &[ColumnDef] {
        &self.columns
    }

    pub fn column_names(&self) -> Vec<&str> {
        self.columns.iter().map(|c| c.name.as_str()).collect()
    }

    pub fn rows(&self) -> &[Vec<Value>] {
        &self.rows
    }

    pub fn row_count(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn column_index(&self, name: &str) -> Result<usize, AppError> {
        self.columns
            .iter()
            .position(|c| c.name == name)
            .ok_or_else(|| AppError::NotFound(format!("Column '{}' not found", name)))
    }

    pub fn column_values(&self, name: &str) -> Result<impl Iterator<Item = &Value>, AppError> {
        let idx = self.column_index(name)?;
        Ok(self.rows.iter().map(move |row| &row[idx]))
    }

    pub fn get(&self, row: usize, column: &str) -> Option<&Value> {
        let idx = self.column_index(column).ok()?;
        self.rows.get(row).map(|r| &r[idx])
    }

    /// Rewrite every value of one column, updating its declared type
    pub fn map_column<F>(&mut self, name: &str, column_type: ColumnType, mut f: F) -> Result<(), AppError>
    where
        F: FnMut(&Value) -> Result<Value, AppError>,
    {
        let idx = self.column_index(name)?;
        for row in &mut self.rows {
            row[idx] = f(&row[idx])?;
        }
        self.columns[idx].column_type = column_type;
        Ok(())
    }

    /// Append a column; `values` must hold one entry per row
    pub fn add_column(&mut self, column: ColumnDef, values: Vec<Value>) -> Result<(), AppError> {
        if self.columns.iter().any(|c| c.name == column.name) {
            return Err(AppError::Validation(format!(
                "Column '{}' already exists",
                column.name
            )));
        }
        if values.len() != self.rows.len() {
            return Err(AppError::Validation(format!(
                "Column '{}' has {} values for {} rows",
                column.name,
                values.len(),
                self.rows.len()
            )));
        }
        for (row, value) in self.rows.iter_mut().zip(values) {
            row.push(value);
        }
        self.columns.push(column);
        Ok(())
    }
}
