//! Result types for query responses.

use crate::value::Value;
use rkyv::{Archive, Deserialize, Serialize};
use serde::{Deserialize as SerdeDeserialize, Serialize as SerdeSerialize};

/// Records produced for one query subject.
///
/// Uses column-oriented storage; every column has the same length as `keys`.
#[derive(Debug, Clone, PartialEq, Archive, Serialize, Deserialize, SerdeSerialize, SerdeDeserialize)]
pub struct RecordBlock {
    /// Subject alias the block belongs to.
    pub subject: String,
    /// Entity name.
    pub entity: String,
    /// Natural keys (parallel with column values).
    pub keys: Vec<String>,
    /// Column data.
    pub columns: Vec<ColumnData>,
}

/// Column data within a record block.
#[derive(Debug, Clone, PartialEq, Archive, Serialize, Deserialize, SerdeSerialize, SerdeDeserialize)]
pub struct ColumnData {
    /// Column name.
    pub name: String,
    /// Values for each row.
    pub values: Vec<Value>,
}

impl ColumnData {
    /// Create a new column.
    pub fn new(name: impl Into<String>, values: Vec<Value>) -> Self {
        Self {
            name: name.into(),
            values,
        }
    }
}

impl RecordBlock {
    /// Create a new empty block.
    pub fn new(subject: impl Into<String>, entity: impl Into<String>) -> Self {
        Self {
            subject: subject.into(),
            entity: entity.into(),
            keys: vec![],
            columns: vec![],
        }
    }

    /// Create a block with data.
    pub fn with_data(
        subject: impl Into<String>,
        entity: impl Into<String>,
        keys: Vec<String>,
        columns: Vec<ColumnData>,
    ) -> Self {
        Self {
            subject: subject.into(),
            entity: entity.into(),
            keys,
            columns,
        }
    }

    /// Get the number of rows in this block.
    pub fn len(&self) -> usize {
        self.keys.len()
    }

    /// Check if this block is empty.
    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    /// Get a column by name.
    pub fn column(&self, name: &str) -> Option<&ColumnData> {
        self.columns.iter().find(|c| c.name == name)
    }

    /// Get the value at a specific row and column.
    pub fn get(&self, row: usize, column: &str) -> Option<&Value> {
        self.column(column).and_then(|c| c.values.get(row))
    }

    /// Get the value of `column` for the record with natural key `key`.
    pub fn lookup(&self, key: &str, column: &str) -> Option<&Value> {
        let row = self.keys.iter().position(|k| k == key)?;
        self.get(row, column)
    }

    /// Iterate over rows as (key, field_values) pairs.
    pub fn rows(&self) -> impl Iterator<Item = (&str, Vec<(&str, &Value)>)> {
        self.keys.iter().enumerate().map(|(i, key)| {
            let fields: Vec<(&str, &Value)> = self
                .columns
                .iter()
                .map(|col| (col.name.as_str(), &col.values[i]))
                .collect();
            (key.as_str(), fields)
        })
    }
}

/// Complete result of one query execution.
#[derive(Debug, Clone, PartialEq, Archive, Serialize, Deserialize, SerdeSerialize, SerdeDeserialize)]
pub struct QueryResult {
    /// Record blocks, one per subject in join order.
    pub blocks: Vec<RecordBlock>,
    /// Records written or removed by a write action.
    pub affected_rows: u64,
}

impl QueryResult {
    /// Create an empty result.
    pub fn empty() -> Self {
        Self {
            blocks: vec![],
            affected_rows: 0,
        }
    }

    /// Create a read result.
    pub fn new(blocks: Vec<RecordBlock>) -> Self {
        Self {
            blocks,
            affected_rows: 0,
        }
    }

    /// Create a write acknowledgement describing the affected records.
    pub fn affected(block: RecordBlock) -> Self {
        Self {
            affected_rows: block.len() as u64,
            blocks: vec![block],
        }
    }

    /// Get a block by subject alias.
    pub fn block(&self, subject: &str) -> Option<&RecordBlock> {
        self.blocks.iter().find(|b| b.subject == subject)
    }

    /// Get the first block.
    pub fn primary(&self) -> Option<&RecordBlock> {
        self.blocks.first()
    }

    /// Get total number of records across all blocks.
    pub fn total_records(&self) -> usize {
        self.blocks.iter().map(|b| b.len()).sum()
    }
}

impl Default for QueryResult {
    fn default() -> Self {
        Self::empty()
    }
}
