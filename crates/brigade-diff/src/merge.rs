//! Merge-style comparison of two id-sorted streams.
//!
//! Both streams must be sorted by `id`. The merge walks them in lockstep:
//! an id only in the previous stream is a deletion, an id only in the next
//! stream is an addition, and an id in both whose `ETag` differs is an
//! update. An exhausted stream sorts after every id.

use std::cmp::Ordering;
use std::fmt;

use serde_json::Value;
use tracing::debug;

use crate::error::{DiffError, DiffResult};
use crate::source::RecordSource;

/// Field identifying a record.
pub const ID_FIELD: &str = "id";
/// Field whose change marks a record as updated.
pub const ETAG_FIELD: &str = "ETag";

/// What happened to a record between the two streams.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ChangeKind {
    Add,
    Delete,
    Update,
}

impl fmt::Display for ChangeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ChangeKind::Add => "ADD",
            ChangeKind::Delete => "DELETE",
            ChangeKind::Update => "UPDATE",
        })
    }
}

/// A single difference, displayed as `ADD <id>` and so on.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Change {
    pub kind: ChangeKind,
    pub id: String,
}

impl fmt::Display for Change {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.kind, self.id)
    }
}

/// Counts of each outcome of a merge.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct DiffSummary {
    pub added: u64,
    pub deleted: u64,
    pub updated: u64,
    pub unchanged: u64,
}

impl DiffSummary {
    /// Returns `true` if the streams were equivalent.
    pub fn is_empty(&self) -> bool {
        self.added == 0 && self.deleted == 0 && self.updated == 0
    }

    /// Total number of changes.
    pub fn changes(&self) -> u64 {
        self.added + self.deleted + self.updated
    }

    fn record(&mut self, kind: ChangeKind) {
        match kind {
            ChangeKind::Add => self.added += 1,
            ChangeKind::Delete => self.deleted += 1,
            ChangeKind::Update => self.updated += 1,
        }
    }
}

/// The id of `record`, rendered as a string.
///
/// String ids are used as-is; any other JSON value uses its JSON text.
pub fn record_id(record: &Value) -> Option<String> {
    match record.get(ID_FIELD)? {
        Value::String(s) => Some(s.clone()),
        Value::Null => None,
        other => Some(other.to_string()),
    }
}

/// One side of the merge with its ordering check.
struct Cursor<'a, S: RecordSource + ?Sized> {
    side: &'static str,
    source: &'a mut S,
    current: Option<(String, Value)>,
}

impl<'a, S: RecordSource + ?Sized> Cursor<'a, S> {
    fn new(side: &'static str, source: &'a mut S) -> Self {
        Self {
            side,
            source,
            current: None,
        }
    }

    async fn advance(&mut self) -> DiffResult<()> {
        let previous = self.current.take().map(|(id, _)| id);
        let Some(record) = self.source.next_record().await? else {
            return Ok(());
        };
        let id = record_id(&record).ok_or_else(|| DiffError::MissingId {
            side: self.side,
            record: record.to_string(),
        })?;
        if let Some(previous) = previous {
            if id <= previous {
                return Err(DiffError::OutOfOrder {
                    side: self.side,
                    previous,
                    current: id,
                });
            }
        }
        self.current = Some((id, record));
        Ok(())
    }

    fn id(&self) -> Option<&str> {
        self.current.as_ref().map(|(id, _)| id.as_str())
    }
}

/// Compare two optional ids, treating `None` as greater than any id.
fn compare(a: Option<&str>, b: Option<&str>) -> Ordering {
    match (a, b) {
        (None, None) => Ordering::Equal,
        (None, Some(_)) => Ordering::Greater,
        (Some(_), None) => Ordering::Less,
        (Some(a), Some(b)) => a.cmp(b),
    }
}

/// Walk `prev` and `next` in id order, reporting each difference to `on_change`.
pub async fn diff_sources<P, N, F>(prev: &mut P, next: &mut N, mut on_change: F) -> DiffResult<DiffSummary>
where
    P: RecordSource + ?Sized,
    N: RecordSource + ?Sized,
    F: FnMut(&Change),
{
    let mut summary = DiffSummary::default();
    let mut left = Cursor::new("prev", prev);
    let mut right = Cursor::new("next", next);
    left.advance().await?;
    right.advance().await?;

    let mut emit = |kind: ChangeKind, id: &str, summary: &mut DiffSummary| {
        summary.record(kind);
        on_change(&Change {
            kind,
            id: id.to_string(),
        });
    };

    loop {
        match compare(left.id(), right.id()) {
            Ordering::Equal => {
                let (Some((id, old)), Some((_, new))) = (&left.current, &right.current) else {
                    break;
                };
                if old.get(ETAG_FIELD) != new.get(ETAG_FIELD) {
                    emit(ChangeKind::Update, id, &mut summary);
                } else {
                    summary.unchanged += 1;
                }
                left.advance().await?;
                right.advance().await?;
            }
            Ordering::Less => {
                if let Some(id) = left.id() {
                    emit(ChangeKind::Delete, id, &mut summary);
                }
                left.advance().await?;
            }
            Ordering::Greater => {
                if let Some(id) = right.id() {
                    emit(ChangeKind::Add, id, &mut summary);
                }
                right.advance().await?;
            }
        }
    }

    left.source.finish().await?;
    right.source.finish().await?;
    debug!(?summary, "diff complete");
    Ok(summary)
}
