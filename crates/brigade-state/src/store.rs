use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tokio::sync::OnceCell;
use tracing::{debug, trace};

use crate::backend::{DocumentFn, StateBackend};
use crate::error::{StateError, StateResult};
use crate::section::{Scope, StateSection};
use crate::token::{mutator, Cleanup, CompletionToken, Mutator};

/// Key under which [`StateStore::do_once`] memoizes its results.
pub const ONCE_KEY: &str = "_once";

/// Backoff used by [`StateStore::wait_for_change`].
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PollConfig {
    /// First polling interval, in milliseconds.
    pub min_delay_ms: u64,
    /// Cap on the polling interval, in milliseconds.
    pub max_delay_ms: u64,
}

impl PollConfig {
    fn min_delay(&self) -> Duration {
        Duration::from_millis(self.min_delay_ms)
    }

    fn max_delay(&self) -> Duration {
        Duration::from_millis(self.max_delay_ms.max(self.min_delay_ms))
    }
}

impl Default for PollConfig {
    fn default() -> Self {
        Self {
            min_delay_ms: 100,
            max_delay_ms: 10_000,
        }
    }
}

/// The backend plus the latest published snapshot.
///
/// Snapshots are immutable: every mutation publishes a fresh `Arc<Value>`
/// so concurrent readers of [`Ledger::current`] never see a torn document.
pub(crate) struct Ledger {
    backend: Arc<dyn StateBackend>,
    current: RwLock<Arc<Value>>,
}

impl Ledger {
    pub(crate) fn current(&self) -> Arc<Value> {
        Arc::clone(&self.current.read().expect("lock poisoned"))
    }

    pub(crate) async fn mutate(&self, f: DocumentFn<'_>) -> StateResult<Arc<Value>> {
        let next = Arc::new(self.backend.mutate(f).await?);
        *self.current.write().expect("lock poisoned") = Arc::clone(&next);
        Ok(next)
    }
}

/// The persisted ledger for one directory.
///
/// Holds the latest snapshot of the document, hands out per-key
/// [`StateSection`]s, and exposes polling-based change notification so that
/// several processes can coordinate through the ledger file alone.
pub struct StateStore {
    ledger: Arc<Ledger>,
    root: StateSection,
    sections: Mutex<HashMap<String, StateSection>>,
    resolving: Mutex<HashMap<String, Arc<OnceCell<Value>>>>,
    poll: PollConfig,
}

impl StateStore {
    /// Load the document from `backend`, seeding it with `fallback` if absent.
    pub async fn create(
        backend: Arc<dyn StateBackend>,
        fallback: Value,
        poll: PollConfig,
    ) -> StateResult<Self> {
        let current = backend.load(Some(&fallback)).await?;
        let ledger = Arc::new(Ledger {
            backend,
            current: RwLock::new(Arc::new(current)),
        });
        Ok(Self {
            root: StateSection::new(Arc::clone(&ledger), Scope::Root),
            ledger,
            sections: Mutex::new(HashMap::new()),
            resolving: Mutex::new(HashMap::new()),
            poll,
        })
    }

    /// Latest known snapshot of the document.
    pub fn current(&self) -> Arc<Value> {
        self.ledger.current()
    }

    /// Apply `f` to the freshest persisted document under the backend lock.
    pub async fn mutate(&self, f: DocumentFn<'_>) -> StateResult<Arc<Value>> {
        self.ledger.mutate(f).await
    }

    /// Reload the document, picking up changes made by other processes.
    pub async fn refresh(&self) -> StateResult<Arc<Value>> {
        self.ledger.mutate(&|doc: &Value| doc.clone()).await
    }

    /// The section for `key`, created on first use.
    pub fn section(&self, key: &str) -> StateSection {
        let mut sections = self.sections.lock().expect("lock poisoned");
        sections
            .entry(key.to_string())
            .or_insert_with(|| StateSection::new(Arc::clone(&self.ledger), Scope::Key(key.into())))
            .clone()
    }

    /// Enqueue a whole-document mutation on the root sequence.
    pub fn make_token(&self, mutators: Vec<Mutator>, cleanup: Option<Cleanup>) -> CompletionToken {
        self.root.make_token(mutators, cleanup)
    }

    /// Sleep until the document differs from the snapshot held on entry.
    ///
    /// Polls by reloading the document, starting at the configured minimum
    /// interval and doubling up to the maximum.
    pub async fn wait_for_change(&self) -> StateResult<()> {
        let before = self.current();
        self.wait_for_change_from(&before).await
    }

    /// Sleep until the document differs from `seen`.
    ///
    /// Callers that test a condition against a snapshot should wait on that
    /// same snapshot, so a commit landing between the test and the wait is
    /// not missed.
    pub async fn wait_for_change_from(&self, seen: &Value) -> StateResult<()> {
        let mut delay = self.poll.min_delay();
        let max_delay = self.poll.max_delay();
        if *self.current() != *seen {
            return Ok(());
        }
        loop {
            tokio::time::sleep(delay).await;
            let after = self.refresh().await?;
            if *after != *seen {
                return Ok(());
            }
            trace!(delay_ms = delay.as_millis() as u64, "no ledger change");
            delay = (delay * 2).min(max_delay);
        }
    }

    /// Compute a value once per ledger and remember it in the document.
    ///
    /// The first caller for `tag` runs `resolver` and commits its result
    /// under `_once`; concurrent callers in this process wait for that
    /// result, and later callers (in any process) read it back.
    pub async fn do_once<F, Fut>(&self, tag: &str, resolver: F) -> StateResult<Value>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = StateResult<Value>>,
    {
        if let Some(value) = self.once_value(tag) {
            return Ok(value);
        }

        let cell = {
            let mut resolving = self.resolving.lock().expect("lock poisoned");
            Arc::clone(resolving.entry(tag.to_string()).or_default())
        };

        let value = cell
            .get_or_try_init(|| async {
                if let Some(value) = self.once_value(tag) {
                    return Ok::<Value, StateError>(value);
                }
                let value = resolver().await?;
                let (key, stored) = (tag.to_string(), value.clone());
                let token = self.make_token(Vec::new(), None);
                token
                    .complete_with(mutator(move |doc| {
                        doc[ONCE_KEY][key.as_str()] = json!([stored.clone()]);
                    }))
                    .await?;
                debug!(tag = %tag, "resolved once-value");
                Ok(value)
            })
            .await?
            .clone();

        self.resolving.lock().expect("lock poisoned").remove(tag);
        Ok(value)
    }

    fn once_value(&self, tag: &str) -> Option<Value> {
        self.current()
            .get(ONCE_KEY)
            .and_then(|once| once.get(tag))
            .and_then(|slot| slot.get(0))
            .cloned()
    }
}

impl std::fmt::Debug for StateStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StateStore")
            .field("current", &self.current())
            .finish()
    }
}
