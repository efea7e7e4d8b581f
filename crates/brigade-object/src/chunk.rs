//! Newline-delimited JSON chunk files.

use std::path::Path;

use serde_json::Value;

use crate::error::{ObjectError, ObjectResult};

/// Encode `records` as one JSON document per line.
pub fn encode(records: &[Value]) -> ObjectResult<String> {
    let mut body = String::new();
    for record in records {
        body.push_str(&serde_json::to_string(record)?);
        body.push('\n');
    }
    Ok(body)
}

/// Parse a chunk body. Blank lines are ignored.
pub fn decode(path: &Path, body: &str) -> ObjectResult<Vec<Value>> {
    body.lines()
        .enumerate()
        .filter(|(_, line)| !line.trim().is_empty())
        .map(|(i, line)| {
            serde_json::from_str(line).map_err(|e| ObjectError::CorruptChunk {
                path: path.to_path_buf(),
                line: i + 1,
                reason: e.to_string(),
            })
        })
        .collect()
}

/// Read and parse the chunk at `path`.
pub async fn read(path: &Path) -> ObjectResult<Vec<Value>> {
    let body = tokio::fs::read_to_string(path).await?;
    decode(path, &body)
}

/// Records held by a stream of `chunks` committed chunks.
///
/// Every chunk but the last is assumed full; the last, found through
/// `path_of`, is counted.
pub(crate) async fn stored_records<F>(chunks: u64, chunk_size: u64, path_of: F) -> ObjectResult<u64>
where
    F: FnOnce(u64) -> brigade_bucket::BrigadeResult<std::path::PathBuf>,
{
    if chunks == 0 {
        return Ok(0);
    }
    let last = read(&path_of(chunks - 1)?).await?;
    Ok((chunks - 1) * chunk_size + last.len() as u64)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn one_record_per_line() {
        let body = encode(&[json!({"id": "A"}), json!({"id": "B"})]).unwrap();
        assert_eq!(body, "{\"id\":\"A\"}\n{\"id\":\"B\"}\n");
    }

    #[test]
    fn decode_tolerates_missing_trailing_newline() {
        let records = decode(Path::new("c"), "{\"id\":1}\n\n{\"id\":2}").unwrap();
        assert_eq!(records, vec![json!({"id": 1}), json!({"id": 2})]);
    }

    #[test]
    fn decode_reports_bad_line() {
        let err = decode(Path::new("c.jsonl"), "{\"id\":1}\n{oops\n").unwrap_err();
        match err {
            ObjectError::CorruptChunk { line, path, .. } => {
                assert_eq!(line, 2);
                assert_eq!(path, Path::new("c.jsonl"));
            }
            other => panic!("unexpected error: {other}"),
        }
    }
}
