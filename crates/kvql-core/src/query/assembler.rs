//! Conversion of raw records into result blocks.

use kvql_proto::{ColumnData, RecordBlock, Value};

use super::scan::RawRecords;
use crate::catalog::EntityDef;

/// Column holding the full record name.
pub const KEY_COLUMN: &str = "key";

/// Column holding a list or hash value.
pub const VALUE_COLUMN: &str = "value";

/// Column holding a sorted-set score.
pub const SCORE_COLUMN: &str = "score";

/// Builds [`RecordBlock`]s from scan and fetch output.
pub struct ResultAssembler;

impl ResultAssembler {
    /// Package `records` for subject `alias`.
    ///
    /// Block keys are natural keys; the `key` column keeps the full names.
    pub fn assemble(alias: &str, entity: &EntityDef, records: RawRecords) -> RecordBlock {
        let (names, payload) = match records {
            RawRecords::List(entries) | RawRecords::Fields(entries) => {
                let (names, values): (Vec<String>, Vec<Value>) = entries.into_iter().unzip();
                (names, Some(ColumnData::new(VALUE_COLUMN, values)))
            }
            RawRecords::Members(members) => (members, None),
            RawRecords::Scores(entries) => {
                let (names, scores): (Vec<String>, Vec<f64>) = entries.into_iter().unzip();
                let scores = scores.into_iter().map(Value::Float64).collect();
                (names, Some(ColumnData::new(SCORE_COLUMN, scores)))
            }
        };

        let keys = names
            .iter()
            .map(|name| entity.natural_key(name).to_string())
            .collect();
        let mut columns = vec![ColumnData::new(
            KEY_COLUMN,
            names.into_iter().map(Value::String).collect(),
        )];
        columns.extend(payload);

        RecordBlock::with_data(alias, &entity.name, keys, columns)
    }

    /// Block listing records touched by a write.
    pub fn affected(alias: &str, entity: &EntityDef, names: Vec<String>) -> RecordBlock {
        Self::assemble(alias, entity, RawRecords::Members(names))
    }

    /// Keep only `columns`, in the given order.
    ///
    /// An empty projection keeps every column. Returns the name of the first
    /// column the block does not have.
    pub fn project(block: RecordBlock, columns: &[&str]) -> Result<RecordBlock, String> {
        if columns.is_empty() {
            return Ok(block);
        }

        let mut projected = Vec::with_capacity(columns.len());
        for name in columns {
            let column = block
                .column(name)
                .ok_or_else(|| name.to_string())?
                .clone();
            projected.push(column);
        }

        Ok(RecordBlock::with_data(block.subject, block.entity, block.keys, projected))
    }
}
