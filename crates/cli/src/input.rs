//! Source record files
//!
//! Records come either as JSON (an array of objects, a single object, or an
//! export envelope with a `records` array) or as CSV with a header row. CSV
//! columns named `customFields.<name>` are folded into a nested
//! `customFields` object so the transformer treats them like JSON exports.

use anyhow::{anyhow, bail, Context, Result};
use serde_json::{Map, Value};
use std::path::Path;
use std::str::FromStr;

const CUSTOM_FIELDS_PREFIX: &str = "customFields.";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InputFormat {
    Json,
    Csv,
}

impl InputFormat {
    /// Guess from the file extension; anything that is not `.csv` is JSON
    pub fn from_path(path: &Path) -> Self {
        match path.extension().and_then(|ext| ext.to_str()) {
            Some(ext) if ext.eq_ignore_ascii_case("csv") => InputFormat::Csv,
            _ => InputFormat::Json,
        }
    }
}

impl FromStr for InputFormat {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "json" => Ok(InputFormat::Json),
            "csv" => Ok(InputFormat::Csv),
            other => Err(format!("unknown input format '{}' (expected json or csv)", other)),
        }
    }
}

pub async fn read_records(path: &Path, format: Option<InputFormat>) -> Result<Vec<Value>> {
    let content = tokio::fs::read_to_string(path)
        .await
        .with_context(|| format!("Failed to read {}", path.display()))?;

    let format = format.unwrap_or_else(|| InputFormat::from_path(path));
    let records = match format {
        InputFormat::Json => parse_json(&content),
        InputFormat::Csv => parse_csv(content.as_bytes()),
    }
    .with_context(|| format!("Failed to parse {}", path.display()))?;

    tracing::debug!("Read {} records from {}", records.len(), path.display());
    Ok(records)
}

pub fn parse_json(content: &str) -> Result<Vec<Value>> {
    let value: Value = serde_json::from_str(content)?;
    let records = match value {
        Value::Array(items) => items,
        Value::Object(mut object) => match object.remove("records") {
            Some(Value::Array(items)) => items,
            Some(_) => bail!("`records` must be an array"),
            None => vec![Value::Object(object)],
        },
        _ => bail!("expected a JSON array of records"),
    };

    if let Some(index) = records.iter().position(|record| !record.is_object()) {
        bail!("record {} is not a JSON object", index);
    }
    Ok(records)
}

pub fn parse_csv<R: std::io::Read>(reader: R) -> Result<Vec<Value>> {
    let mut reader = csv::ReaderBuilder::new()
        .trim(csv::Trim::All)
        .flexible(true)
        .from_reader(reader);
    let headers = reader.headers()?.clone();

    let mut records = Vec::new();
    for (row, result) in reader.records().enumerate() {
        let row_values = result.map_err(|e| anyhow!("row {}: {}", row + 1, e))?;
        let mut record = Map::new();
        let mut custom = Map::new();

        for (header, cell) in headers.iter().zip(row_values.iter()) {
            if cell.is_empty() || header.is_empty() {
                continue;
            }
            match header.strip_prefix(CUSTOM_FIELDS_PREFIX) {
                Some(name) if !name.is_empty() => {
                    custom.insert(name.to_string(), Value::String(cell.to_string()));
                }
                _ => {
                    record.insert(header.to_string(), Value::String(cell.to_string()));
                }
            }
        }

        if !custom.is_empty() {
            record.insert("customFields".to_string(), Value::Object(custom));
        }
        records.push(Value::Object(record));
    }
    Ok(records)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_json_shapes() {
        let array = parse_json(r#"[{"id": 1}, {"id": 2}]"#).unwrap();
        assert_eq!(array.len(), 2);

        let single = parse_json(r#"{"id": 1, "name": "Acme"}"#).unwrap();
        assert_eq!(single, vec![json!({"id": 1, "name": "Acme"})]);

        let envelope = parse_json(r#"{"records": [{"id": 1}], "total": 1}"#).unwrap();
        assert_eq!(envelope, vec![json!({"id": 1})]);

        assert!(parse_json(r#"[{"id": 1}, 2]"#).is_err());
        assert!(parse_json("42").is_err());
    }

    #[test]
    fn test_csv_rows_become_objects() {
        let csv = "id,lastName,email,customFields.Lead Source\n\
                   c-1, Doe ,jane@example.com,Web\n\
                   c-2,Roe,,\n";
        let records = parse_csv(csv.as_bytes()).unwrap();

        assert_eq!(
            records[0],
            json!({
                "id": "c-1",
                "lastName": "Doe",
                "email": "jane@example.com",
                "customFields": {"Lead Source": "Web"}
            })
        );
        assert_eq!(records[1], json!({"id": "c-2", "lastName": "Roe"}));
    }

    #[test]
    fn test_format_detection() {
        assert_eq!(InputFormat::from_path(Path::new("a/b.CSV")), InputFormat::Csv);
        assert_eq!(InputFormat::from_path(Path::new("export.json")), InputFormat::Json);
        assert_eq!(InputFormat::from_path(Path::new("export")), InputFormat::Json);
        assert_eq!("csv".parse::<InputFormat>(), Ok(InputFormat::Csv));
        assert!("xml".parse::<InputFormat>().is_err());
    }
}
