//! Tabular frames keyed by a row index
//!
//! A `Frame` is the unit the dataset backends store and the revision engine
//! merges. Rows are ordered by [`RowId`]; cells are JSON values, and a
//! missing cell is the same as `null`.
//!
//! ```rust
//! use mlvault::frame::Frame;
//! use serde_json::json;
//!
//! let mut base = Frame::from_json_rows([(0, json!({"x": 1, "y": "a"}))])?;
//! let delta = Frame::from_json_rows([(0, json!({"x": 2, "y": null})), (1, json!({"x": 3}))])?;
//! base.merge_override(&delta);
//!
//! assert_eq!(base.value(0, "x"), Some(&json!(2)));
//! assert_eq!(base.value(0, "y"), Some(&json!("a"))); // nulls never override
//! assert_eq!(base.len(), 2);
//! # Ok::<(), mlvault::Error>(())
//! ```

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::storage::Document;
use crate::{Error, Result};

/// Field holding the row index in stored row documents.
pub const INDEX_FIELD: &str = "_idx";

/// One row: column name to cell value.
pub type Row = Map<String, Value>;

/// Row index value.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RowId {
    /// Integer index (the common case)
    Int(i64),
    /// String index
    Str(String),
}

impl From<i64> for RowId {
    fn from(v: i64) -> Self {
        Self::Int(v)
    }
}

impl From<i32> for RowId {
    fn from(v: i32) -> Self {
        Self::Int(i64::from(v))
    }
}

impl From<&str> for RowId {
    fn from(v: &str) -> Self {
        Self::Str(v.to_string())
    }
}

impl From<String> for RowId {
    fn from(v: String) -> Self {
        Self::Str(v)
    }
}

impl fmt::Display for RowId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Int(v) => write!(f, "{v}"),
            Self::Str(v) => f.write_str(v),
        }
    }
}

impl RowId {
    fn from_value(value: &Value) -> Result<Self> {
        match value {
            Value::Number(n) => n
                .as_i64()
                .map(Self::Int)
                .ok_or_else(|| Error::InvalidInput(format!("row index {n} is not an integer"))),
            Value::String(s) => Ok(Self::Str(s.clone())),
            other => Err(Error::InvalidInput(format!("invalid row index {other}"))),
        }
    }

    fn to_value(&self) -> Value {
        match self {
            Self::Int(v) => Value::from(*v),
            Self::Str(v) => Value::from(v.as_str()),
        }
    }
}

/// Row-indexed table of JSON cells.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Frame {
    columns: Vec<String>,
    rows: BTreeMap<RowId, Row>,
}

impl Frame {
    /// Create an empty frame.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a frame from `(index, row)` pairs. Later duplicates replace earlier ones.
    pub fn from_rows<I, K>(rows: I) -> Self
    where
        I: IntoIterator<Item = (K, Row)>,
        K: Into<RowId>,
    {
        let mut frame = Self::new();
        for (id, row) in rows {
            frame.insert(id, row);
        }
        frame
    }

    /// Build a frame from `(index, json object)` pairs.
    ///
    /// # Errors
    ///
    /// Returns `Error::InvalidInput` if a row is not a JSON object.
    pub fn from_json_rows<I, K>(rows: I) -> Result<Self>
    where
        I: IntoIterator<Item = (K, Value)>,
        K: Into<RowId>,
    {
        let mut frame = Self::new();
        for (id, value) in rows {
            let id = id.into();
            match value {
                Value::Object(row) => frame.insert(id, row),
                other => {
                    return Err(Error::InvalidInput(format!(
                        "row {id} must be an object, got {other}"
                    )))
                }
            }
        }
        Ok(frame)
    }

    /// Insert or replace a row.
    pub fn insert(&mut self, id: impl Into<RowId>, row: Row) {
        for column in row.keys() {
            self.ensure_column(column);
        }
        self.rows.insert(id.into(), row);
    }

    fn ensure_column(&mut self, column: &str) {
        if !self.columns.iter().any(|c| c == column) {
            self.columns.push(column.to_string());
        }
    }

    /// Column names in first-seen order.
    #[must_use]
    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    /// Check if a column exists.
    #[must_use]
    pub fn has_column(&self, column: &str) -> bool {
        self.columns.iter().any(|c| c == column)
    }

    /// Number of rows.
    #[must_use]
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    /// Check if the frame has no rows.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Row by index.
    #[must_use]
    pub fn row(&self, id: impl Into<RowId>) -> Option<&Row> {
        self.rows.get(&id.into())
    }

    /// Cell value; `None` for a missing row or an absent cell.
    #[must_use]
    pub fn value(&self, id: impl Into<RowId>, column: &str) -> Option<&Value> {
        self.rows.get(&id.into()).and_then(|row| row.get(column))
    }

    /// Row indices in order.
    pub fn ids(&self) -> impl Iterator<Item = &RowId> {
        self.rows.keys()
    }

    /// Iterate `(index, row)` in index order.
    pub fn iter(&self) -> impl Iterator<Item = (&RowId, &Row)> {
        self.rows.iter()
    }

    /// Set `column` to `value` on every row, adding the column if needed.
    pub fn set_column(&mut self, column: &str, value: &Value) {
        self.ensure_column(column);
        for row in self.rows.values_mut() {
            row.insert(column.to_string(), value.clone());
        }
    }

    /// Set `column` to `value` on rows where the cell is missing or null.
    pub fn fill_column(&mut self, column: &str, value: &Value) {
        self.ensure_column(column);
        for row in self.rows.values_mut() {
            let cell = row.entry(column.to_string()).or_insert(Value::Null);
            if cell.is_null() {
                *cell = value.clone();
            }
        }
    }

    /// Remove columns from the frame and every row.
    pub fn drop_columns(&mut self, columns: &[&str]) {
        self.columns.retain(|c| !columns.contains(&c.as_str()));
        for row in self.rows.values_mut() {
            for column in columns {
                row.remove(*column);
            }
        }
    }

    /// Keep only rows for which `keep` returns true.
    pub fn retain<F>(&mut self, mut keep: F)
    where
        F: FnMut(&RowId, &Row) -> bool,
    {
        self.rows.retain(|id, row| keep(id, row));
    }

    /// Outer-join `other` into `self` by row index.
    ///
    /// Rows only in `other` are added; for rows in both, every non-null cell
    /// of `other` overrides the existing cell and null cells are ignored.
    pub fn merge_override(&mut self, other: &Self) {
        for column in &other.columns {
            self.ensure_column(column);
        }
        for (id, incoming) in &other.rows {
            let row = self.rows.entry(id.clone()).or_default();
            for (column, value) in incoming {
                if !value.is_null() {
                    row.insert(column.clone(), value.clone());
                }
            }
        }
    }

    /// Rows as standalone documents, index stored under [`INDEX_FIELD`].
    #[must_use]
    pub fn to_documents(&self) -> Vec<Document> {
        self.rows
            .iter()
            .map(|(id, row)| {
                let mut doc = row.clone();
                doc.insert(INDEX_FIELD.to_string(), id.to_value());
                Value::Object(doc)
            })
            .collect()
    }

    /// Rebuild a frame from row documents. Later documents win on duplicate indices.
    ///
    /// # Errors
    ///
    /// Returns `Error::InvalidInput` if a document is not an object or lacks an index.
    pub fn from_documents<I>(docs: I) -> Result<Self>
    where
        I: IntoIterator<Item = Document>,
    {
        let mut frame = Self::new();
        for doc in docs {
            let Value::Object(mut row) = doc else {
                return Err(Error::InvalidInput("row document must be an object".into()));
            };
            let id = row
                .remove(INDEX_FIELD)
                .ok_or_else(|| Error::InvalidInput(format!("row document lacks '{INDEX_FIELD}'")))
                .and_then(|v| RowId::from_value(&v))?;
            frame.insert(id, row);
        }
        Ok(frame)
    }

    fn normalized(&self) -> BTreeMap<&RowId, BTreeMap<&String, &Value>> {
        self.rows
            .iter()
            .map(|(id, row)| (id, row.iter().filter(|(_, v)| !v.is_null()).collect()))
            .collect()
    }
}

// Column order and explicit nulls are presentation details, not content.
impl PartialEq for Frame {
    fn eq(&self, other: &Self) -> bool {
        self.normalized() == other.normalized()
    }
}
