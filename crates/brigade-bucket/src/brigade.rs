use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use brigade_state::{
    mutator, set_pos, CompletionToken, FileStateBackend, Mutator, StateBackend, StateError,
    StateSection, StateStore,
};
use serde_json::Value;
use tracing::{debug, info, trace, warn};

use crate::config::{BrigadeConfig, ShardOptions};
use crate::error::{BrigadeError, BrigadeResult};
use crate::kind::{reader_positions, BrigadeKind, DEFAULT_READER, OPTIONS_KEY, OUTPUT_KEY};
use crate::layout::ShardLayout;
use crate::reader::BucketReader;

/// A reserved slot: the file to write or read, and the token releasing it.
#[derive(Debug)]
pub struct Slot {
    /// Path of the slot's data file.
    pub path: PathBuf,
    /// Logical offset of the slot.
    pub offset: u64,
    /// Completing this advances the owning section past the slot.
    pub token: CompletionToken,
}

/// State shared between a brigade and its readers.
#[derive(Debug)]
pub(crate) struct BrigadeCore {
    pub(crate) kind: BrigadeKind,
    pub(crate) layout: ShardLayout,
    pub(crate) state: Arc<StateStore>,
}

impl BrigadeCore {
    /// Committed write position and closed flag, read from one snapshot.
    pub(crate) fn output_state(doc: &Value) -> (u64, bool) {
        let out = doc.get(OUTPUT_KEY);
        let pos = out.and_then(|o| o.get("pos")).and_then(Value::as_u64).unwrap_or(0);
        let closed = out
            .and_then(|o| o.get("closed"))
            .and_then(Value::as_bool)
            .unwrap_or(false);
        (pos, closed)
    }

    pub(crate) fn capacity(&self) -> u64 {
        self.layout.capacity()
    }

    pub(crate) fn slot_path(&self, offset: u64) -> BrigadeResult<PathBuf> {
        let slot = self.kind.normalize(offset, self.capacity())?;
        self.layout.make_name(slot)
    }

    pub(crate) fn is_closed(&self, doc: &Value) -> bool {
        self.kind == BrigadeKind::Queue && Self::output_state(doc).1
    }
}

/// A directory of sharded data files plus the ledger that tracks them.
///
/// Writers reserve slots with [`next_output`](Self::next_output); readers
/// obtained from [`reader`](Self::reader) consume them in order. Every slot
/// comes with a [`CompletionToken`] and positions advance only when tokens
/// are completed.
pub struct BucketBrigade {
    core: Arc<BrigadeCore>,
    config: BrigadeConfig,
    out: StateSection,
    next_out: AtomicU64,
    output: tokio::sync::Mutex<()>,
    readers: Mutex<HashMap<String, BucketReader>>,
}

impl BucketBrigade {
    /// Open (or create) a brigade whose ledger is a file under `config.dir`.
    pub async fn open(kind: BrigadeKind, config: BrigadeConfig) -> BrigadeResult<Self> {
        tokio::fs::create_dir_all(&config.dir).await?;
        let backend = FileStateBackend::new(config.state_path(), config.lock.clone());
        Self::with_backend(kind, config, Arc::new(backend)).await
    }

    /// Open a brigade whose ledger lives in `backend`.
    pub async fn with_backend(
        kind: BrigadeKind,
        mut config: BrigadeConfig,
        backend: Arc<dyn StateBackend>,
    ) -> BrigadeResult<Self> {
        config.shard.capacity()?;
        let fallback = kind.default_document(&config.shard)?;
        let state = Arc::new(StateStore::create(backend, fallback, config.poll.clone()).await?);

        config.shard = reconcile_options(&config, state.current().get(OPTIONS_KEY))?;
        let layout = ShardLayout::new(config.data_dir(), config.shard.clone())?;
        tokio::fs::create_dir_all(layout.root()).await?;

        let out = state.section(OUTPUT_KEY);
        let next_out = out.position();
        info!(
            kind = %kind,
            dir = %config.dir.display(),
            capacity = layout.capacity(),
            next_out,
            "opened bucket brigade"
        );

        Ok(Self {
            core: Arc::new(BrigadeCore {
                kind,
                layout,
                state,
            }),
            config,
            out,
            next_out: AtomicU64::new(next_out),
            output: tokio::sync::Mutex::new(()),
            readers: Mutex::new(HashMap::new()),
        })
    }

    /// Addressing mode.
    pub fn kind(&self) -> BrigadeKind {
        self.core.kind
    }

    /// Effective configuration, with sharding options as recorded in the ledger.
    pub fn config(&self) -> &BrigadeConfig {
        &self.config
    }

    /// Offset to path mapping.
    pub fn layout(&self) -> &ShardLayout {
        &self.core.layout
    }

    /// The underlying ledger.
    pub fn state(&self) -> &Arc<StateStore> {
        &self.core.state
    }

    /// Number of addressable slots.
    pub fn capacity(&self) -> u64 {
        self.core.capacity()
    }

    /// Path of the file for `offset`.
    pub fn make_name(&self, offset: u64) -> BrigadeResult<PathBuf> {
        self.core.slot_path(offset)
    }

    /// Committed write position.
    pub fn write_position(&self) -> u64 {
        BrigadeCore::output_state(&self.core.state.current()).0
    }

    /// Whether the output side has been closed. Always false for a Store.
    pub fn is_closed(&self) -> bool {
        self.core.is_closed(&self.core.state.current())
    }

    /// Slots the writer may still reserve without waiting.
    pub fn space(&self) -> u64 {
        let next_out = self.next_out.load(Ordering::Acquire);
        self.space_at(next_out, &self.core.state.current())
    }

    fn space_at(&self, write: u64, doc: &Value) -> u64 {
        self.core
            .kind
            .space(write, &reader_positions(doc), self.capacity())
    }

    /// Sleep until some process commits a change to the ledger.
    pub async fn wait_for_commit(&self) -> BrigadeResult<()> {
        Ok(self.core.state.wait_for_change().await?)
    }

    /// Reserve the next output slot.
    pub async fn next_output(&self) -> BrigadeResult<Slot> {
        self.next_output_with(None).await
    }

    /// Reserve the next output slot, merging `extra` into its commit.
    pub async fn next_output_with(&self, extra: Option<Mutator>) -> BrigadeResult<Slot> {
        let _output = self.output.lock().await;
        if self.is_closed() {
            return Err(BrigadeError::StreamClosed);
        }
        let offset = self.next_out.load(Ordering::Acquire);
        self.wait_for_space(offset).await?;

        let path = self.core.slot_path(offset)?;
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let next = self.core.kind.increment_offset(offset, self.capacity());
        self.next_out.store(next, Ordering::Release);

        let mut mutators = vec![set_pos(next)];
        mutators.extend(extra);
        let token = self.out.make_token(mutators, None);
        debug!(offset, path = %path.display(), "reserved output slot");
        Ok(Slot {
            path,
            offset,
            token,
        })
    }

    async fn wait_for_space(&self, write: u64) -> BrigadeResult<()> {
        match self.core.kind {
            BrigadeKind::Queue => loop {
                let doc = self.core.state.current();
                if self.space_at(write, &doc) > 0 {
                    return Ok(());
                }
                trace!(write, "queue full, waiting for readers");
                self.core.state.wait_for_change_from(&doc).await?;
            },
            BrigadeKind::Store => {
                if self.space_at(write, &self.core.state.current()) == 0 {
                    return Err(BrigadeError::CapacityExceeded {
                        capacity: self.capacity(),
                    });
                }
                Ok(())
            }
        }
    }

    /// Mark the output side closed.
    pub async fn close(&self) -> BrigadeResult<()> {
        self.close_with(None).await
    }

    /// Mark the output side closed, merging `extra` into the commit.
    pub async fn close_with(&self, extra: Option<Mutator>) -> BrigadeResult<()> {
        self.set_closed(true, extra).await
    }

    /// Reopen a closed output side.
    pub async fn open_stream(&self) -> BrigadeResult<()> {
        self.open_stream_with(None).await
    }

    /// Reopen a closed output side, merging `extra` into the commit.
    pub async fn open_stream_with(&self, extra: Option<Mutator>) -> BrigadeResult<()> {
        self.set_closed(false, extra).await
    }

    async fn set_closed(&self, closed: bool, extra: Option<Mutator>) -> BrigadeResult<()> {
        let mut mutators = Vec::new();
        match self.core.kind {
            BrigadeKind::Queue => {
                mutators.push(mutator(move |out| out["closed"] = Value::Bool(closed)));
            }
            BrigadeKind::Store => {
                debug!(closed, "store has no closed state");
            }
        }
        mutators.extend(extra);
        if mutators.is_empty() {
            return Ok(());
        }
        self.out.make_token(mutators, None).complete().await?;
        info!(kind = %self.core.kind, closed, "output state changed");
        Ok(())
    }

    /// The reader for `key`, created on first use.
    pub fn reader(&self, key: &str) -> BrigadeResult<BucketReader> {
        if !self.core.kind.accepts_reader(key) {
            return Err(BrigadeError::UnknownReader(key.to_string()));
        }
        let mut readers = self.readers.lock().expect("lock poisoned");
        let reader = readers
            .entry(key.to_string())
            .or_insert_with(|| BucketReader::new(Arc::clone(&self.core), key));
        Ok(reader.clone())
    }

    /// Read the next slot through the default `"in"` reader.
    pub async fn next_input(&self) -> BrigadeResult<Option<Slot>> {
        self.reader(DEFAULT_READER)?.next_input().await
    }
}

impl std::fmt::Debug for BucketBrigade {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BucketBrigade")
            .field("kind", &self.core.kind)
            .field("dir", &self.config.dir)
            .field("capacity", &self.capacity())
            .finish()
    }
}

/// Check the ledger's recorded options against the configured ones.
///
/// Strict mode rejects any difference. Permissive mode adopts the recorded
/// options, since the files already on disk are laid out by them.
fn reconcile_options(config: &BrigadeConfig, recorded: Option<&Value>) -> BrigadeResult<ShardOptions> {
    let expected = serde_json::to_value(&config.shard).map_err(StateError::from)?;
    if recorded == Some(&expected) {
        return Ok(config.shard.clone());
    }

    let found = recorded.map_or_else(|| "nothing".to_string(), Value::to_string);
    if config.strict_state {
        return Err(BrigadeError::ConfigMismatch {
            expected: expected.to_string(),
            found,
        });
    }

    let adopted = match recorded {
        Some(value) => serde_json::from_value::<ShardOptions>(value.clone()).map_err(|_| {
            BrigadeError::ConfigMismatch {
                expected: expected.to_string(),
                found: found.clone(),
            }
        })?,
        None => config.shard.clone(),
    };
    adopted.capacity()?;
    warn!(
        configured = %expected,
        recorded = %found,
        "ledger options differ from configuration, using recorded options"
    );
    Ok(adopted)
}
