//! Importers for external listings.

use std::path::Path;

use anyhow::Context;
use brigade_object::ObjectBrigade;
use serde_json::{Map, Value};
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::info;

/// Fields kept from each imported record.
pub const KEPT_FIELDS: [&str; 4] = ["id", "ETag", "Key", "LastModified"];

const PROGRESS_EVERY: u64 = 10_000;

/// Outcome of an import.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct LoadStats {
    /// Input lines read.
    pub seen: u64,
    /// Records written.
    pub loaded: u64,
}

/// Keep only [`KEPT_FIELDS`] of `record`.
pub fn project(record: &Map<String, Value>) -> Value {
    let kept: Map<String, Value> = KEPT_FIELDS
        .iter()
        .filter_map(|&field| record.get(field).map(|v| (field.to_string(), v.clone())))
        .collect();
    Value::Object(kept)
}

/// Interpret a raw listing cell, turning numeric text into a number.
pub fn fix_value(raw: &str) -> Value {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Value::String(raw.to_string());
    }
    if let Ok(n) = trimmed.parse::<i64>() {
        return Value::from(n);
    }
    match trimmed.parse::<f64>().ok().and_then(serde_json::Number::from_f64) {
        Some(n) if trimmed.bytes().any(|b| b.is_ascii_digit()) => Value::Number(n),
        _ => Value::String(raw.to_string()),
    }
}

/// Build a record from one tab-separated line under the header `names`.
pub fn tsv_record(names: &[String], line: &str) -> Value {
    let record: Map<String, Value> = names
        .iter()
        .zip(line.split('\t'))
        .map(|(name, raw)| (name.clone(), fix_value(raw)))
        .collect();
    project(&record)
}

/// Parse a dump line of the form `{...},`. Other lines yield `None`.
pub fn dump_document(line: &str) -> anyhow::Result<Option<Value>> {
    let Some(body) = line.trim_end().strip_suffix(',') else {
        return Ok(None);
    };
    if !(body.starts_with('{') && body.ends_with('}')) {
        return Ok(None);
    }
    let doc = serde_json::from_str(body).context("malformed dump document")?;
    Ok(Some(doc))
}

/// The record carried by a dump document, if it has one.
pub fn dump_record(doc: &Value) -> Option<Value> {
    doc.get("doc")?.get("s3")?.as_object().map(project)
}

/// Import a tab-separated listing whose first line names the columns.
pub async fn load_tsv(ob: &ObjectBrigade, file: &Path) -> anyhow::Result<LoadStats> {
    let input = tokio::fs::File::open(file)
        .await
        .with_context(|| format!("opening {}", file.display()))?;
    let mut lines = BufReader::new(input).lines();
    let mut stats = LoadStats::default();
    let mut names: Option<Vec<String>> = None;

    while let Some(line) = lines.next_line().await? {
        match &names {
            Some(names) => {
                ob.write_value(tsv_record(names, &line)).await?;
                stats.loaded += 1;
            }
            None => names = Some(line.split('\t').map(str::to_string).collect()),
        }
        stats.seen += 1;
        if stats.seen % PROGRESS_EVERY == 0 {
            info!(lines = stats.seen, "loaded");
        }
    }
    ob.close().await?;
    Ok(stats)
}

/// Import a JSON dump, keeping each document's `doc.s3` record.
pub async fn load_dump(ob: &ObjectBrigade, file: &Path) -> anyhow::Result<LoadStats> {
    let input = tokio::fs::File::open(file)
        .await
        .with_context(|| format!("opening {}", file.display()))?;
    let mut lines = BufReader::new(input).lines();
    let mut stats = LoadStats::default();

    while let Some(line) = lines.next_line().await? {
        stats.seen += 1;
        let doc = dump_document(&line).with_context(|| format!("line {}", stats.seen))?;
        if let Some(record) = doc.as_ref().and_then(dump_record) {
            ob.write_value(record).await?;
            stats.loaded += 1;
        }
        if stats.seen % PROGRESS_EVERY == 0 {
            let at = doc
                .as_ref()
                .and_then(|d| d.get("id"))
                .and_then(Value::as_str)
                .unwrap_or("???");
            info!(seen = stats.seen, loaded = stats.loaded, at, "loading dump");
        }
    }
    ob.close().await?;
    Ok(stats)
}

#[cfg(test)]
mod tests {
    use super::*;
    use brigade_bucket::BrigadeKind;
    use brigade_object::ObjectConfig;
    use serde_json::json;

    #[test]
    fn numeric_cells_become_numbers() {
        assert_eq!(fix_value("3051"), json!(3051));
        assert_eq!(fix_value("2.5"), json!(2.5));
        assert_eq!(fix_value("b8b87d12"), json!("b8b87d12"));
        assert_eq!(fix_value("2019-08-23T08:55:30.000Z"), json!("2019-08-23T08:55:30.000Z"));
        assert_eq!(fix_value(""), json!(""));
        assert_eq!(fix_value("inf"), json!("inf"));
    }

    #[test]
    fn tsv_records_are_projected() {
        let names: Vec<String> = ["id", "Size", "ETag", "Key"].iter().map(|s| s.to_string()).collect();
        let record = tsv_record(&names, "p1\t3051\tabc\tk/p1");
        assert_eq!(record, json!({"id": "p1", "ETag": "abc", "Key": "k/p1"}));
    }

    #[test]
    fn dump_lines() {
        let line = r#"{"id":"x","doc":{"s3":{"id":"x","ETag":"e","Size":1}}},"#;
        let doc = dump_document(line).unwrap().unwrap();
        assert_eq!(dump_record(&doc), Some(json!({"id": "x", "ETag": "e"})));

        assert_eq!(dump_document("[").unwrap(), None);
        assert_eq!(dump_document(r#"{"id":"last"}"#).unwrap(), None);
        assert!(dump_document("{oops},").is_err());
        assert_eq!(dump_record(&json!({"doc": {}})), None);
    }

    #[tokio::test]
    async fn tsv_import_round_trip() {
        let tmp = tempfile::tempdir().unwrap();
        let file = tmp.path().join("listing.tsv");
        std::fs::write(&file, "id\tETag\tKey\tSize\na\t1\tk/a\t10\nb\t2\tk/b\t20\n").unwrap();

        let config = ObjectConfig::new(tmp.path().join("db")).with_chunk_size(10);
        let ob = ObjectBrigade::open(BrigadeKind::Store, config).await.unwrap();
        let stats = load_tsv(&ob, &file).await.unwrap();
        assert_eq!(stats, LoadStats { seen: 3, loaded: 2 });
        assert_eq!(ob.size().await.unwrap(), 2);

        let first = ob.read().await.unwrap().unwrap();
        assert_eq!(first.value, json!({"id": "a", "ETag": 1, "Key": "k/a"}));
        first.token.complete().await.unwrap();
    }
}
