//! Query result export.
//!
//! Turns a `QueryResult` into CSV, JSON, JSON Lines, SQL INSERT statements,
//! a PostgreSQL COPY payload or a Markdown table. Every format produces valid
//! output for empty results.

use std::path::Path;

use anyhow::{Context, Result, anyhow};
use serde_json::{Map, Number, Value as JsonValue};

use crate::services::database::traits::{QueryResult, Value};

/// Supported export formats
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ExportFormat {
    Csv,
    Json,
    JsonLines,
    SqlInsert,
    SqlCopy,
    Markdown,
}

impl ExportFormat {
    pub fn all() -> Vec<ExportFormat> {
        vec![
            Self::Csv,
            Self::Json,
            Self::JsonLines,
            Self::SqlInsert,
            Self::SqlCopy,
            Self::Markdown,
        ]
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Csv => "csv",
            Self::Json => "json",
            Self::JsonLines => "jsonl",
            Self::SqlInsert => "sql_insert",
            Self::SqlCopy => "sql_copy",
            Self::Markdown => "markdown",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        Self::all()
            .into_iter()
            .find(|format| format.as_str() == s.to_lowercase())
    }

    /// File extension including the dot
    pub fn extension(&self) -> &'static str {
        match self {
            Self::Csv => ".csv",
            Self::Json => ".json",
            Self::JsonLines => ".jsonl",
            Self::SqlInsert | Self::SqlCopy => ".sql",
            Self::Markdown => ".md",
        }
    }

    pub fn mime_type(&self) -> &'static str {
        match self {
            Self::Csv => "text/csv",
            Self::Json => "application/json",
            Self::JsonLines => "application/x-ndjson",
            Self::SqlInsert | Self::SqlCopy => "application/sql",
            Self::Markdown => "text/markdown",
        }
    }
}

impl std::fmt::Display for ExportFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Options shared by all formats.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExportOptions {
    /// Target table for SQL formats
    pub table_name: String,
    /// Header row for CSV and Markdown
    pub include_headers: bool,
}

impl Default for ExportOptions {
    fn default() -> Self {
        Self {
            table_name: "data".to_string(),
            include_headers: true,
        }
    }
}

impl ExportOptions {
    pub fn with_table_name(mut self, table_name: impl Into<String>) -> Self {
        self.table_name = table_name.into();
        self
    }

    pub fn without_headers(mut self) -> Self {
        self.include_headers = false;
        self
    }
}

/// Exports one result.
#[derive(Debug, Clone, Copy)]
pub struct ResultExporter<'a> {
    result: &'a QueryResult,
}

impl<'a> ResultExporter<'a> {
    pub fn new(result: &'a QueryResult) -> Self {
        Self { result }
    }

    pub fn export(&self, format: ExportFormat, options: &ExportOptions) -> Result<String> {
        match format {
            ExportFormat::Csv => self.to_csv(options.include_headers),
            ExportFormat::Json => self.to_json(),
            ExportFormat::JsonLines => self.to_jsonl(),
            ExportFormat::SqlInsert => Ok(self.to_sql_insert(&options.table_name)),
            ExportFormat::SqlCopy => Ok(self.to_sql_copy(&options.table_name)),
            ExportFormat::Markdown => Ok(self.to_markdown(options.include_headers)),
        }
    }

    /// Export and write the text to `path`.
    pub async fn export_to_file(
        &self,
        path: &Path,
        format: ExportFormat,
        options: &ExportOptions,
    ) -> Result<()> {
        let content = self.export(format, options)?;
        async_fs::write(path, content)
            .await
            .with_context(|| format!("Failed to write export to {}", path.display()))?;
        tracing::info!(
            path = %path.display(),
            %format,
            rows = self.result.rows.len(),
            "Exported query result"
        );
        Ok(())
    }

    fn column_names(&self) -> impl Iterator<Item = &str> {
        self.result.columns.iter().map(|c| c.name.as_str())
    }

    pub fn to_csv(&self, include_headers: bool) -> Result<String> {
        let mut writer = csv::WriterBuilder::new()
            .terminator(csv::Terminator::CRLF)
            .from_writer(Vec::new());

        if include_headers {
            writer
                .write_record(self.column_names())
                .context("Failed to write CSV header")?;
        }
        for row in &self.result.rows {
            writer
                .write_record(row.iter().map(display_cell))
                .context("Failed to write CSV row")?;
        }

        let bytes = writer
            .into_inner()
            .map_err(|e| anyhow!("Failed to flush CSV: {}", e.error()))?;
        String::from_utf8(bytes).context("CSV output is not valid UTF-8")
    }

    fn row_objects(&self) -> Vec<JsonValue> {
        self.result
            .rows
            .iter()
            .map(|row| {
                let object: Map<String, JsonValue> = self
                    .column_names()
                    .zip(row.iter())
                    .map(|(name, value)| (name.to_string(), json_value(value)))
                    .collect();
                JsonValue::Object(object)
            })
            .collect()
    }

    /// Array of row objects, columns in result order, 2-space indent.
    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string_pretty(&self.row_objects()).context("Failed to serialize rows")
    }

    /// One compact row object per line.
    pub fn to_jsonl(&self) -> Result<String> {
        let lines = self
            .row_objects()
            .iter()
            .map(serde_json::to_string)
            .collect::<Result<Vec<_>, _>>()
            .context("Failed to serialize rows")?;
        Ok(lines.join("\n"))
    }

    fn quoted_columns(&self) -> String {
        self.column_names()
            .map(quote_identifier)
            .collect::<Vec<_>>()
            .join(", ")
    }

    pub fn to_sql_insert(&self, table_name: &str) -> String {
        if self.result.rows.is_empty() {
            return format!("-- No data to insert into {}\n", table_name);
        }

        let table = quote_identifier(table_name);
        let columns = self.quoted_columns();
        self.result
            .rows
            .iter()
            .map(|row| {
                let values: Vec<String> = row.iter().map(sql_literal).collect();
                format!(
                    "INSERT INTO {} ({}) VALUES ({});",
                    table,
                    columns,
                    values.join(", ")
                )
            })
            .collect::<Vec<_>>()
            .join("\n")
    }

    /// PostgreSQL `COPY ... FROM stdin` payload.
    pub fn to_sql_copy(&self, table_name: &str) -> String {
        if self.result.rows.is_empty() {
            return format!("-- No data to copy into {}\n", table_name);
        }

        let mut lines = vec![format!(
            "COPY {} ({}) FROM stdin;",
            quote_identifier(table_name),
            self.quoted_columns()
        )];
        for row in &self.result.rows {
            let values: Vec<String> = row.iter().map(copy_field).collect();
            lines.push(values.join("\t"));
        }
        lines.push("\\.".to_string());
        lines.join("\n")
    }

    pub fn to_markdown(&self, include_headers: bool) -> String {
        if self.result.columns.is_empty() {
            return "No data\n".to_string();
        }

        let mut lines = Vec::with_capacity(self.result.rows.len() + 2);
        if include_headers {
            let header: Vec<String> = self.column_names().map(escape_markdown).collect();
            lines.push(format!("| {} |", header.join(" | ")));
            let separator = vec!["---"; self.result.columns.len()];
            lines.push(format!("| {} |", separator.join(" | ")));
        }
        for row in &self.result.rows {
            let cells: Vec<String> = row
                .iter()
                .map(|value| escape_markdown(&display_cell(value)))
                .collect();
            lines.push(format!("| {} |", cells.join(" | ")));
        }
        lines.join("\n")
    }
}

/// Human-readable cell: empty for NULL, `<N bytes>` for binary.
fn display_cell(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        other => other.to_display_string(),
    }
}

fn escape_markdown(text: &str) -> String {
    text.replace('|', "\\|")
}

fn quote_identifier(identifier: &str) -> String {
    format!("\"{}\"", identifier.replace('"', "\"\""))
}

fn json_value(value: &Value) -> JsonValue {
    match value {
        Value::Null => JsonValue::Null,
        Value::Bool(b) => JsonValue::Bool(*b),
        Value::Int(v) => JsonValue::from(*v),
        Value::UInt(v) => JsonValue::from(*v),
        Value::Float(v) => Number::from_f64(*v)
            .map(JsonValue::Number)
            .unwrap_or_else(|| JsonValue::String(v.to_string())),
        Value::Text(s) => JsonValue::String(s.clone()),
        Value::Bytes(b) => JsonValue::String(hex::encode(b)),
        Value::Json(j) => j.clone(),
        Value::Array(items) => JsonValue::Array(items.iter().map(json_value).collect()),
        other => JsonValue::String(
            other
                .to_iso_string()
                .unwrap_or_else(|| other.to_plain_string()),
        ),
    }
}

fn sql_literal(value: &Value) -> String {
    match value {
        Value::Null => "NULL".to_string(),
        Value::Bool(true) => "TRUE".to_string(),
        Value::Bool(false) => "FALSE".to_string(),
        Value::Float(v) if !v.is_finite() => format!("'{}'", v),
        v if v.is_numeric() => v.to_plain_string(),
        Value::Bytes(b) => format!("E'\\\\x{}'", hex::encode(b)),
        other => format!("'{}'", other.to_plain_string().replace('\'', "''")),
    }
}

fn copy_field(value: &Value) -> String {
    match value {
        Value::Null => "\\N".to_string(),
        Value::Bool(true) => "t".to_string(),
        Value::Bool(false) => "f".to_string(),
        Value::Bytes(b) => format!("\\\\x{}", hex::encode(b)),
        other => other
            .to_plain_string()
            .replace('\\', "\\\\")
            .replace('\t', "\\t")
            .replace('\n', "\\n")
            .replace('\r', "\\r"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::database::traits::{ColumnInfo, Row};
    use chrono::NaiveDate;

    fn sample() -> QueryResult {
        QueryResult::new(
            vec![
                ColumnInfo::new("id", "int"),
                ColumnInfo::new("note", "text"),
                ColumnInfo::new("extra", "text"),
            ],
            vec![Row::new(vec![
                Value::Int(1),
                Value::from("it's a test"),
                Value::Null,
            ])],
        )
    }

    #[test]
    fn test_format_metadata() {
        assert_eq!(ExportFormat::Csv.mime_type(), "text/csv");
        assert_eq!(ExportFormat::JsonLines.mime_type(), "application/x-ndjson");
        assert_eq!(ExportFormat::SqlCopy.mime_type(), "application/sql");
        assert_eq!(ExportFormat::SqlInsert.extension(), ".sql");
        assert_eq!(ExportFormat::Markdown.extension(), ".md");
        assert_eq!(ExportFormat::from_str("JSONL"), Some(ExportFormat::JsonLines));
        assert_eq!(ExportFormat::from_str("xml"), None);
    }

    #[test]
    fn test_csv() {
        let result = sample();
        let csv = ResultExporter::new(&result).to_csv(true).unwrap();
        assert_eq!(csv, "id,note,extra\r\n1,it's a test,\r\n");

        let quoted = QueryResult::new(
            vec![ColumnInfo::new("v", "text")],
            vec![Row::new(vec![Value::from("a, \"b\"")])],
        );
        let csv = ResultExporter::new(&quoted).to_csv(false).unwrap();
        assert_eq!(csv, "\"a, \"\"b\"\"\"\r\n");
    }

    #[test]
    fn test_json_and_jsonl() {
        let result = sample();
        let exporter = ResultExporter::new(&result);

        let json = exporter.to_json().unwrap();
        assert!(json.contains("\"extra\": null"));
        let parsed: JsonValue = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed[0]["note"], "it's a test");
        let keys: Vec<&String> = parsed[0].as_object().unwrap().keys().collect();
        assert_eq!(keys, ["id", "note", "extra"]);

        assert_eq!(
            exporter.to_jsonl().unwrap(),
            r#"{"id":1,"note":"it's a test","extra":null}"#
        );
    }

    #[test]
    fn test_json_special_values() {
        let result = QueryResult::new(
            vec![ColumnInfo::new("b", "bytea"), ColumnInfo::new("d", "date")],
            vec![Row::new(vec![
                Value::Bytes(vec![0xde, 0xad]),
                Value::Date(NaiveDate::from_ymd_opt(2024, 3, 1).unwrap()),
            ])],
        );
        let jsonl = ResultExporter::new(&result).to_jsonl().unwrap();
        assert_eq!(jsonl, r#"{"b":"dead","d":"2024-03-01"}"#);
    }

    #[test]
    fn test_sql_insert() {
        let result = sample();
        assert_eq!(
            ResultExporter::new(&result).to_sql_insert("notes"),
            r#"INSERT INTO "notes" ("id", "note", "extra") VALUES (1, 'it''s a test', NULL);"#
        );

        let mixed = QueryResult::new(
            vec![ColumnInfo::new("flag", "bool"), ColumnInfo::new("raw", "bytea")],
            vec![Row::new(vec![Value::Bool(true), Value::Bytes(vec![1, 255])])],
        );
        assert_eq!(
            ResultExporter::new(&mixed).to_sql_insert("t"),
            r#"INSERT INTO "t" ("flag", "raw") VALUES (TRUE, E'\\x01ff');"#
        );
    }

    #[test]
    fn test_sql_copy() {
        let result = QueryResult::new(
            vec![ColumnInfo::new("a", "text"), ColumnInfo::new("b", "bool")],
            vec![
                Row::new(vec![Value::from("x\ty\\z\n"), Value::Bool(false)]),
                Row::new(vec![Value::Null, Value::Bool(true)]),
            ],
        );
        assert_eq!(
            ResultExporter::new(&result).to_sql_copy("t"),
            "COPY \"t\" (\"a\", \"b\") FROM stdin;\nx\\ty\\\\z\\n\tf\n\\N\tt\n\\."
        );
    }

    #[test]
    fn test_markdown() {
        let result = QueryResult::new(
            vec![ColumnInfo::new("a", "text"), ColumnInfo::new("b", "bytea")],
            vec![Row::new(vec![Value::from("x|y"), Value::Bytes(vec![0; 4])])],
        );
        let exporter = ResultExporter::new(&result);
        assert_eq!(
            exporter.to_markdown(true),
            "| a | b |\n| --- | --- |\n| x\\|y | <4 bytes> |"
        );
        assert_eq!(exporter.to_markdown(false), "| x\\|y | <4 bytes> |");
    }

    #[test]
    fn test_empty_results() {
        let empty = QueryResult::default();
        let exporter = ResultExporter::new(&empty);
        let options = ExportOptions::default();

        assert_eq!(exporter.export(ExportFormat::Markdown, &options).unwrap(), "No data\n");
        assert_eq!(exporter.export(ExportFormat::Json, &options).unwrap(), "[]");
        assert_eq!(exporter.export(ExportFormat::JsonLines, &options).unwrap(), "");
        assert_eq!(
            exporter.export(ExportFormat::SqlInsert, &options).unwrap(),
            "-- No data to insert into data\n"
        );
        assert_eq!(
            exporter
                .export(ExportFormat::SqlCopy, &options.clone().with_table_name("t"))
                .unwrap(),
            "-- No data to copy into t\n"
        );
    }

    #[test]
    fn test_export_to_file() {
        smol::block_on(async {
            let temp = tempfile::tempdir().unwrap();
            let path = temp.path().join("out.csv");
            let result = sample();

            ResultExporter::new(&result)
                .export_to_file(&path, ExportFormat::Csv, &ExportOptions::default().without_headers())
                .await
                .unwrap();
            assert_eq!(std::fs::read_to_string(&path).unwrap(), "1,it's a test,\r\n");

            let missing_dir = temp.path().join("nope").join("out.csv");
            assert!(
                ResultExporter::new(&result)
                    .export_to_file(&missing_dir, ExportFormat::Csv, &ExportOptions::default())
                    .await
                    .is_err()
            );
        });
    }
}
