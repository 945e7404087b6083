// Database Result
// Query output envelope and its array / JSON / pagination renderings

use crate::db::traits::Record;
use serde::{Serialize, Serializer};
use serde_json::{Map, Value};
use std::ops::Index;
use std::sync::OnceLock;

/// A row after normalization: column name -> portable JSON value
pub type JsonRow = Map<String, Value>;

/// `to_array` output: the rows, or `{"error": ...}` when the statement failed
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum ArrayOutput {
    Rows(Vec<JsonRow>),
    Error { error: String },
}

impl ArrayOutput {
    pub fn is_error(&self) -> bool {
        matches!(self, ArrayOutput::Error { .. })
    }

    pub fn rows(&self) -> &[JsonRow] {
        match self {
            ArrayOutput::Rows(rows) => rows,
            ArrayOutput::Error { .. } => &[],
        }
    }

    pub fn into_value(self) -> Value {
        match self {
            ArrayOutput::Rows(rows) => Value::Array(rows.into_iter().map(Value::Object).collect()),
            ArrayOutput::Error { error } => {
                let mut map = Map::new();
                map.insert("error".to_string(), Value::String(error));
                Value::Object(map)
            }
        }
    }
}

/// Envelope for client-side pagination widgets
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Paginated {
    pub records_total: u64,
    pub records_filtered: u64,
    pub fields: Vec<String>,
    pub data: ArrayOutput,
}

/// Output of one statement: rows, column names, pagination cursors and any error.
///
/// Errors are data here. A failed statement produces a result with `error` set
/// and no records; callers check it instead of handling a `Result`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DatabaseResult {
    pub records: Vec<Record>,
    pub columns: Vec<String>,
    pub count: u64,
    pub limit: Option<u64>,
    pub skip: Option<u64>,
    pub error: Option<String>,
}

fn empty_record() -> &'static Record {
    static EMPTY: OnceLock<Record> = OnceLock::new();
    EMPTY.get_or_init(Record::new)
}

fn normalize(record: &Record) -> JsonRow {
    record
        .iter()
        .map(|(column, value)| (column.clone(), value.to_json_value()))
        .collect()
}

impl DatabaseResult {
    pub fn new(records: Vec<Record>, columns: Vec<String>) -> Self {
        Self {
            count: records.len() as u64,
            records,
            columns,
            ..Default::default()
        }
    }

    pub fn from_error(error: impl Into<String>) -> Self {
        Self::default().with_error(error)
    }

    pub fn with_count(mut self, count: u64) -> Self {
        self.count = count;
        self
    }

    pub fn with_limit(mut self, limit: Option<u64>) -> Self {
        self.limit = limit;
        self
    }

    pub fn with_skip(mut self, skip: Option<u64>) -> Self {
        self.skip = skip;
        self
    }

    pub fn with_error(mut self, error: impl Into<String>) -> Self {
        self.error = Some(error.into());
        self
    }

    pub fn is_ok(&self) -> bool {
        self.error.is_none()
    }

    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Record> {
        self.records.iter()
    }

    pub fn to_array(&self) -> ArrayOutput {
        self.to_array_with(|row| row.clone())
    }

    /// Normalize every row, then pass it through `filter`
    pub fn to_array_with<F>(&self, filter: F) -> ArrayOutput
    where
        F: Fn(&JsonRow) -> JsonRow,
    {
        match &self.error {
            Some(error) => ArrayOutput::Error {
                error: error.clone(),
            },
            None => ArrayOutput::Rows(self.records.iter().map(|r| filter(&normalize(r))).collect()),
        }
    }

    pub fn to_json(&self) -> String {
        self.to_array().into_value().to_string()
    }

    pub fn to_paginate(&self) -> Paginated {
        Paginated {
            records_total: self.count,
            records_filtered: self.count,
            fields: self.columns.clone(),
            data: self.to_array(),
        }
    }

    pub fn to_paginate_json(&self) -> String {
        serde_json::to_value(self.to_paginate())
            .unwrap_or(Value::Null)
            .to_string()
    }

    /// Normalized row at `index`, or an empty map when out of range
    pub fn get(&self, index: usize) -> JsonRow {
        self.records.get(index).map(normalize).unwrap_or_default()
    }
}

impl Index<usize> for DatabaseResult {
    type Output = Record;

    fn index(&self, index: usize) -> &Record {
        self.records.get(index).unwrap_or_else(|| empty_record())
    }
}

impl IntoIterator for DatabaseResult {
    type Item = Record;
    type IntoIter = std::vec::IntoIter<Record>;

    fn into_iter(self) -> Self::IntoIter {
        self.records.into_iter()
    }
}

impl<'a> IntoIterator for &'a DatabaseResult {
    type Item = &'a Record;
    type IntoIter = std::slice::Iter<'a, Record>;

    fn into_iter(self) -> Self::IntoIter {
        self.records.iter()
    }
}

impl Serialize for DatabaseResult {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.to_array().serialize(serializer)
    }
}
