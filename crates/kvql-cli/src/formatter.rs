//! Output formatters for query results.

use clap::ValueEnum;
use comfy_table::{Cell, Table};
use kvql_core::{EntityDef, ErrorReport, StructureTypeResolver};
use kvql_proto::{QueryResult, RecordBlock, Value};

/// Output format for results.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    /// ASCII table format
    Table,
    /// JSON format
    Json,
    /// CSV format
    Csv,
}

impl std::fmt::Display for OutputFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OutputFormat::Table => write!(f, "table"),
            OutputFormat::Json => write!(f, "json"),
            OutputFormat::Csv => write!(f, "csv"),
        }
    }
}

/// Trait for formatting output.
pub trait Formatter: Send + Sync {
    /// Format the records read by a select.
    fn format_query_result(&self, result: &QueryResult) -> String;

    /// Format the acknowledgement of a write.
    fn format_mutation_result(&self, result: &QueryResult) -> String;

    /// Format a failed query.
    fn format_error(&self, report: &ErrorReport) -> String;

    /// Format a simple message.
    fn format_message(&self, message: &str) -> String;

    /// Format registered entities.
    fn format_entities(&self, entities: &[EntityDef]) -> String;
}

/// Create a formatter for the given output format.
pub fn create_formatter(format: OutputFormat) -> Box<dyn Formatter> {
    match format {
        OutputFormat::Table => Box::new(TableFormatter),
        OutputFormat::Json => Box::new(JsonFormatter),
        OutputFormat::Csv => Box::new(CsvFormatter),
    }
}

/// Table formatter using comfy-table.
pub struct TableFormatter;

impl Formatter for TableFormatter {
    fn format_query_result(&self, result: &QueryResult) -> String {
        let mut output = String::new();

        for block in &result.blocks {
            if !output.is_empty() {
                output.push_str("\n\n");
            }
            output.push_str(&format_block_as_table(block));
        }

        if output.is_empty() {
            output = "No results".to_string();
        }

        output
    }

    fn format_mutation_result(&self, result: &QueryResult) -> String {
        let keys = affected_keys(result);
        if keys.is_empty() {
            format!("{} row(s) affected", result.affected_rows)
        } else {
            format!("{} row(s) affected: {}", result.affected_rows, keys.join(", "))
        }
    }

    fn format_error(&self, report: &ErrorReport) -> String {
        format!("Error: {}", report.message)
    }

    fn format_message(&self, message: &str) -> String {
        message.to_string()
    }

    fn format_entities(&self, entities: &[EntityDef]) -> String {
        let resolver = StructureTypeResolver::default();
        let mut table = Table::new();
        table.set_header(vec!["Entity", "Structure", "Container", "Key prefix"]);

        for entity in entities {
            table.add_row(vec![
                entity.name.clone(),
                resolver.resolve(entity).to_string(),
                entity.container_key().to_string(),
                entity.key_prefix(),
            ]);
        }

        table.to_string()
    }
}

/// JSON formatter.
pub struct JsonFormatter;

impl Formatter for JsonFormatter {
    fn format_query_result(&self, result: &QueryResult) -> String {
        // A single subject prints as a bare array
        let value = match result.blocks.as_slice() {
            [] => serde_json::Value::Array(vec![]),
            [block] => serde_json::Value::Array(block_to_json_array(block)),
            blocks => {
                let mut obj = serde_json::Map::new();
                for block in blocks {
                    obj.insert(block.subject.clone(), serde_json::Value::Array(block_to_json_array(block)));
                }
                serde_json::Value::Object(obj)
            }
        };
        serde_json::to_string_pretty(&value).unwrap_or_else(|_| "[]".to_string())
    }

    fn format_mutation_result(&self, result: &QueryResult) -> String {
        serde_json::json!({
            "affected": result.affected_rows,
            "keys": affected_keys(result),
        })
        .to_string()
    }

    fn format_error(&self, report: &ErrorReport) -> String {
        serde_json::json!({ "error": report }).to_string()
    }

    fn format_message(&self, message: &str) -> String {
        serde_json::json!({
            "message": message
        })
        .to_string()
    }

    fn format_entities(&self, entities: &[EntityDef]) -> String {
        serde_json::to_string_pretty(entities).unwrap_or_else(|_| "[]".to_string())
    }
}

/// CSV formatter.
pub struct CsvFormatter;

impl Formatter for CsvFormatter {
    fn format_query_result(&self, result: &QueryResult) -> String {
        // CSV holds a single table: the primary block
        result.primary().map(format_block_as_csv).unwrap_or_default()
    }

    fn format_mutation_result(&self, result: &QueryResult) -> String {
        let mut output = String::from("affected,key\n");
        for key in affected_keys(result) {
            output.push_str(&format!("{},{}\n", result.affected_rows, quote_csv(key)));
        }
        output
    }

    fn format_error(&self, report: &ErrorReport) -> String {
        let kind = serde_json::to_value(report.kind)
            .ok()
            .and_then(|v| v.as_str().map(str::to_string))
            .unwrap_or_default();
        format!("kind,error\n{},{}", kind, quote_csv(&report.message))
    }

    fn format_message(&self, message: &str) -> String {
        message.to_string()
    }

    fn format_entities(&self, entities: &[EntityDef]) -> String {
        let resolver = StructureTypeResolver::default();
        let mut output = String::from("entity,structure,container,key_prefix\n");
        for entity in entities {
            output.push_str(&format!(
                "{},{},{},{}\n",
                quote_csv(&entity.name),
                resolver.resolve(entity),
                quote_csv(entity.container_key()),
                quote_csv(&entity.key_prefix())
            ));
        }
        output
    }
}

/// Natural keys of the records a write touched.
fn affected_keys(result: &QueryResult) -> Vec<&str> {
    result
        .blocks
        .iter()
        .flat_map(|block| block.keys.iter().map(String::as_str))
        .collect()
}

/// Format a record block as a table.
fn format_block_as_table(block: &RecordBlock) -> String {
    let mut table = Table::new();

    let mut headers: Vec<Cell> = vec![Cell::new("id")];
    for col in &block.columns {
        headers.push(Cell::new(&col.name));
    }
    table.set_header(headers);

    for (id, fields) in block.rows() {
        let mut cells: Vec<Cell> = vec![Cell::new(id)];
        for (_, value) in fields {
            cells.push(Cell::new(format_value(value)));
        }
        table.add_row(cells);
    }

    format!("{} ({})\n{}\n{} row(s)", block.subject, block.entity, table, block.len())
}

/// Convert a record block to a JSON array.
fn block_to_json_array(block: &RecordBlock) -> Vec<serde_json::Value> {
    block
        .rows()
        .map(|(id, fields)| {
            let mut obj = serde_json::Map::new();
            obj.insert("id".to_string(), serde_json::Value::String(id.to_string()));
            for (name, value) in fields {
                obj.insert(name.to_string(), value_to_json(value));
            }
            serde_json::Value::Object(obj)
        })
        .collect()
}

/// Format a record block as CSV.
fn format_block_as_csv(block: &RecordBlock) -> String {
    let mut output = String::new();

    let mut headers: Vec<&str> = vec!["id"];
    for col in &block.columns {
        headers.push(&col.name);
    }
    output.push_str(&headers.join(","));
    output.push('\n');

    for (id, fields) in block.rows() {
        let mut cells: Vec<String> = vec![quote_csv(id)];
        for (_, value) in fields {
            cells.push(quote_csv(&format_value(value)));
        }
        output.push_str(&cells.join(","));
        output.push('\n');
    }

    output
}

/// Format a value as a display string.
fn format_value(value: &Value) -> String {
    match value {
        Value::Null => "NULL".to_string(),
        other => other.to_string(),
    }
}

/// Convert a value to JSON. Bytes render as hex.
fn value_to_json(value: &Value) -> serde_json::Value {
    match value {
        Value::Null => serde_json::Value::Null,
        Value::Bool(b) => serde_json::Value::Bool(*b),
        Value::Int64(n) => serde_json::Value::from(*n),
        Value::Float64(n) => serde_json::Number::from_f64(*n)
            .map(serde_json::Value::Number)
            .unwrap_or(serde_json::Value::Null),
        Value::String(s) => serde_json::Value::String(s.clone()),
        Value::Bytes(_) => serde_json::Value::String(value.to_string()),
    }
}

/// Escape quotes in a CSV field.
fn escape_csv(s: &str) -> String {
    s.replace('"', "\"\"")
}

/// Quote a CSV field when it needs it.
fn quote_csv(s: &str) -> String {
    if s.contains(|c| matches!(c, ',' | '"' | '\n' | '\r')) {
        format!("\"{}\"", escape_csv(s))
    } else {
        s.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kvql_proto::ColumnData;

    fn scores() -> QueryResult {
        QueryResult::new(vec![RecordBlock::with_data(
            "board",
            "board",
            vec!["alice".into(), "bob".into()],
            vec![
                ColumnData::new("key", vec!["board:alice".into(), "board:bob".into()]),
                ColumnData::new("score", vec![Value::Float64(10.0), Value::Float64(7.5)]),
            ],
        )])
    }

    #[test]
    fn test_escape_csv() {
        assert_eq!(escape_csv("hello"), "hello");
        assert_eq!(escape_csv("say \"hi\""), "say \"\"hi\"\"");
        assert_eq!(quote_csv("hello, world"), "\"hello, world\"");
        assert_eq!(quote_csv("plain"), "plain");
    }

    #[test]
    fn test_format_value() {
        assert_eq!(format_value(&Value::Null), "NULL");
        assert_eq!(format_value(&Value::Float64(7.5)), "7.5");
        assert_eq!(format_value(&Value::Bytes(vec![0xde, 0xad])), "0xdead");
    }

    #[test]
    fn test_csv_result() {
        let output = CsvFormatter.format_query_result(&scores());
        assert_eq!(output, "id,key,score\nalice,board:alice,10\nbob,board:bob,7.5\n");
    }

    #[test]
    fn test_json_single_block_is_array() {
        let output = JsonFormatter.format_query_result(&scores());
        let parsed: serde_json::Value = serde_json::from_str(&output).unwrap();
        let rows = parsed.as_array().unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[1]["id"], "bob");
        assert_eq!(rows[1]["score"], 7.5);
    }

    #[test]
    fn test_json_multiple_blocks_keyed_by_subject() {
        let mut result = scores();
        result.blocks.push(RecordBlock::new("o", "orders"));

        let parsed: serde_json::Value =
            serde_json::from_str(&JsonFormatter.format_query_result(&result)).unwrap();
        assert_eq!(parsed["board"].as_array().unwrap().len(), 2);
        assert!(parsed["o"].as_array().unwrap().is_empty());
    }

    #[test]
    fn test_table_mutation_lists_keys() {
        let block = RecordBlock::with_data(
            "orders",
            "orders",
            vec!["4".into(), "5".into()],
            vec![ColumnData::new("key", vec!["orders:4".into(), "orders:5".into()])],
        );
        let output = TableFormatter.format_mutation_result(&QueryResult::affected(block));
        assert_eq!(output, "2 row(s) affected: 4, 5");
    }

    #[test]
    fn test_empty_table_result() {
        assert_eq!(TableFormatter.format_query_result(&QueryResult::empty()), "No results");
    }
}
