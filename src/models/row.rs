//! Raw result rows.
//!
//! A `Row` is what a connection provider hands back per result record:
//! column names in select order plus one `Value` per column. Typed getters
//! map NULL cells to the field's zero-equivalent; the `opt_*` getters map
//! NULL to `None` for nullable fields. Rows produced by this crate's own
//! select templates carry aliased `<table>_<column>` names.

use crate::error::{DalError, DalResult};
use crate::models::Value;

/// One raw result row.
#[derive(Debug, Clone, PartialEq)]
pub struct Row {
    columns: Vec<String>,
    values: Vec<Value>,
}

impl Row {
    /// Build a row from parallel column/value lists.
    pub fn new(columns: Vec<String>, values: Vec<Value>) -> Self {
        debug_assert_eq!(columns.len(), values.len());
        Self { columns, values }
    }

    /// Column names in select order.
    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    /// Cell at `index` in select order.
    pub fn value_at(&self, index: usize) -> Option<&Value> {
        self.values.get(index)
    }

    /// Look up a cell by column name.
    pub fn get(&self, column: &str) -> Option<&Value> {
        self.columns
            .iter()
            .position(|c| c == column)
            .map(|i| &self.values[i])
    }

    fn require(&self, column: &str) -> DalResult<&Value> {
        self.get(column)
            .ok_or_else(|| DalError::hydration("column not present in row", column))
    }

    /// Integer cell; NULL maps to 0.
    pub fn i64(&self, column: &str) -> DalResult<i64> {
        match self.require(column)? {
            Value::Null => Ok(0),
            Value::Int(v) => Ok(*v),
            other => Err(type_mismatch(column, "int", other)),
        }
    }

    /// Float cell; NULL maps to 0.0. Integer cells widen.
    pub fn f64(&self, column: &str) -> DalResult<f64> {
        match self.require(column)? {
            Value::Null => Ok(0.0),
            Value::Float(v) => Ok(*v),
            Value::Int(v) => Ok(*v as f64),
            other => Err(type_mismatch(column, "float", other)),
        }
    }

    /// Boolean cell; NULL maps to false. Integer cells read as != 0.
    pub fn bool(&self, column: &str) -> DalResult<bool> {
        match self.require(column)? {
            Value::Null => Ok(false),
            Value::Bool(v) => Ok(*v),
            Value::Int(v) => Ok(*v != 0),
            other => Err(type_mismatch(column, "bool", other)),
        }
    }

    /// String cell; NULL maps to the empty string.
    pub fn string(&self, column: &str) -> DalResult<String> {
        match self.require(column)? {
            Value::Null => Ok(String::new()),
            Value::String(v) => Ok(v.clone()),
            other => Err(type_mismatch(column, "string", other)),
        }
    }

    /// Binary cell; NULL maps to an empty buffer.
    pub fn bytes(&self, column: &str) -> DalResult<Vec<u8>> {
        match self.require(column)? {
            Value::Null => Ok(Vec::new()),
            Value::Bytes(v) => Ok(v.clone()),
            other => Err(type_mismatch(column, "bytes", other)),
        }
    }

    /// Integer cell for nullable fields.
    pub fn opt_i64(&self, column: &str) -> DalResult<Option<i64>> {
        match self.require(column)? {
            Value::Null => Ok(None),
            Value::Int(v) => Ok(Some(*v)),
            other => Err(type_mismatch(column, "int", other)),
        }
    }

    /// String cell for nullable fields.
    pub fn opt_string(&self, column: &str) -> DalResult<Option<String>> {
        match self.require(column)? {
            Value::Null => Ok(None),
            Value::String(v) => Ok(Some(v.clone())),
            other => Err(type_mismatch(column, "string", other)),
        }
    }
}

fn type_mismatch(column: &str, wanted: &str, got: &Value) -> DalError {
    DalError::hydration(
        format!("expected {}, row holds {}", wanted, got.type_name()),
        column,
    )
}
