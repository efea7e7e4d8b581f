//! Ordered per-key commit queues.
//!
//! A [`StateSection`] owns the pending mutations for one key of the ledger
//! (or, for the root sequence, the whole document). Tokens may complete in
//! any order, but a commit only ever covers the longest prefix of the queue
//! in which every entry is complete, so the committed position of a section
//! never runs ahead of unfinished work.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use serde_json::{Map, Value};
use tracing::debug;

use crate::error::{StateError, StateResult};
use crate::store::Ledger;
use crate::token::{Cleanup, CompletionToken, Mutator, TokenEffect};

/// Which part of the document a section folds its mutators over.
#[derive(Clone, Debug, PartialEq, Eq)]
pub(crate) enum Scope {
    /// The whole document.
    Root,
    /// The sub-document stored under this key.
    Key(String),
}

impl Scope {
    /// Fold `mutators` over the scoped part of `doc`, returning the new document.
    ///
    /// The input is never modified; unchanged documents are returned as an
    /// equal clone so the backend can skip the write.
    fn apply(&self, doc: &Value, mutators: &[Mutator]) -> Value {
        match self {
            Scope::Root => {
                let mut next = doc.clone();
                for m in mutators {
                    m(&mut next);
                }
                next
            }
            Scope::Key(key) => {
                let current = doc.get(key);
                let mut slot = current.cloned().unwrap_or_else(|| Value::Object(Map::new()));
                for m in mutators {
                    m(&mut slot);
                }
                if current == Some(&slot) {
                    return doc.clone();
                }
                let mut next = doc.clone();
                if let Some(map) = next.as_object_mut() {
                    map.insert(key.clone(), slot);
                }
                next
            }
        }
    }
}

struct PendingEntry {
    id: u64,
    mutators: Vec<Mutator>,
    fixups: Vec<Mutator>,
    complete: bool,
    cleanup: Option<Cleanup>,
}

#[derive(Default)]
struct PendingQueue {
    next_id: u64,
    entries: VecDeque<PendingEntry>,
}

pub(crate) struct SectionInner {
    ledger: Arc<Ledger>,
    scope: Scope,
    queue: Mutex<PendingQueue>,
    commit: tokio::sync::Mutex<()>,
}

impl SectionInner {
    fn mark_complete(&self, id: u64, fixups: Vec<Mutator>) -> StateResult<()> {
        let mut queue = self.queue.lock().expect("lock poisoned");
        let entry = queue
            .entries
            .iter_mut()
            .find(|e| e.id == id)
            .ok_or_else(|| StateError::ProtocolViolation(format!("unknown token {id}")))?;
        if entry.complete {
            return Err(StateError::AlreadyCompleted);
        }
        entry.complete = true;
        entry.fixups = fixups;
        Ok(())
    }

    /// Commit the completed prefix of the queue, then run its cleanups.
    async fn commit_prefix(&self) -> StateResult<()> {
        let _commit = self.commit.lock().await;

        let (count, mutators) = {
            let queue = self.queue.lock().expect("lock poisoned");
            let count = queue.entries.iter().take_while(|e| e.complete).count();
            let mutators: Vec<Mutator> = queue
                .entries
                .iter()
                .take(count)
                .flat_map(|e| e.mutators.iter().chain(e.fixups.iter()).cloned())
                .collect();
            (count, mutators)
        };
        if count == 0 {
            return Ok(());
        }

        let scope = &self.scope;
        self.ledger
            .mutate(&|doc: &Value| scope.apply(doc, &mutators))
            .await?;

        let cleanups: Vec<Cleanup> = {
            let mut queue = self.queue.lock().expect("lock poisoned");
            queue
                .entries
                .drain(..count)
                .filter_map(|e| e.cleanup)
                .collect()
        };
        debug!(scope = ?self.scope, committed = count, cleanups = cleanups.len(), "section commit");

        for cleanup in cleanups {
            cleanup().await?;
        }
        Ok(())
    }
}

struct SectionCompletion {
    section: Arc<SectionInner>,
    id: u64,
}

#[async_trait]
impl TokenEffect for SectionCompletion {
    async fn fire(&self, fixups: Vec<Mutator>) -> StateResult<()> {
        self.section.mark_complete(self.id, fixups)?;
        self.section.commit_prefix().await
    }
}

/// A named partition of the ledger with its own pending-token queue.
///
/// Cloning yields another handle on the same queue.
#[derive(Clone)]
pub struct StateSection {
    inner: Arc<SectionInner>,
}

impl StateSection {
    pub(crate) fn new(ledger: Arc<Ledger>, scope: Scope) -> Self {
        Self {
            inner: Arc::new(SectionInner {
                ledger,
                scope,
                queue: Mutex::new(PendingQueue::default()),
                commit: tokio::sync::Mutex::new(()),
            }),
        }
    }

    /// The key this section manages, or `None` for the root sequence.
    pub fn key(&self) -> Option<&str> {
        match &self.inner.scope {
            Scope::Root => None,
            Scope::Key(key) => Some(key),
        }
    }

    /// Enqueue a pending mutation and return the token that releases it.
    ///
    /// `cleanup` runs after the commit covering this entry has been
    /// persisted, in queue order relative to other cleanups.
    pub fn make_token(&self, mutators: Vec<Mutator>, cleanup: Option<Cleanup>) -> CompletionToken {
        let id = {
            let mut queue = self.inner.queue.lock().expect("lock poisoned");
            let id = queue.next_id;
            queue.next_id += 1;
            queue.entries.push_back(PendingEntry {
                id,
                mutators,
                fixups: Vec::new(),
                complete: false,
                cleanup,
            });
            id
        };
        CompletionToken::new(SectionCompletion {
            section: Arc::clone(&self.inner),
            id,
        })
    }

    /// The section's committed sub-document, if present.
    pub fn current(&self) -> Option<Value> {
        let doc = self.inner.ledger.current();
        match &self.inner.scope {
            Scope::Root => Some((*doc).clone()),
            Scope::Key(key) => doc.get(key).cloned(),
        }
    }

    /// The committed `pos` field of the section, defaulting to zero.
    pub fn position(&self) -> u64 {
        self.current()
            .and_then(|slot| slot.get("pos").and_then(Value::as_u64))
            .unwrap_or(0)
    }

    /// Number of entries still waiting to be committed.
    pub fn pending(&self) -> usize {
        self.inner.queue.lock().expect("lock poisoned").entries.len()
    }
}

impl std::fmt::Debug for StateSection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StateSection")
            .field("scope", &self.inner.scope)
            .field("pending", &self.pending())
            .finish()
    }
}
