//! One-shot, forkable completion tokens.
//!
//! A [`CompletionToken`] is handed out by every operation that reserves a
//! slot. Invoking it signals that the unit of work behind the slot is
//! finished. Tokens can be forked: the underlying [`TokenEffect`] fires only
//! once every handle sharing the same join (the original plus all forks) has
//! been completed.

use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use serde_json::Value;
use tracing::warn;

use crate::error::{StateError, StateResult};

/// A mutation applied to a copy of a ledger sub-document.
pub type Mutator = Arc<dyn Fn(&mut Value) + Send + Sync>;

/// Future returned by a [`Cleanup`] hook.
pub type CleanupFuture = Pin<Box<dyn Future<Output = StateResult<()>> + Send>>;

/// Side effect run once the commit that governs it has been persisted.
pub type Cleanup = Box<dyn FnOnce() -> CleanupFuture + Send>;

/// Wrap a closure as a [`Mutator`].
pub fn mutator<F>(f: F) -> Mutator
where
    F: Fn(&mut Value) + Send + Sync + 'static,
{
    Arc::new(f)
}

/// Wrap an async closure as a [`Cleanup`].
pub fn cleanup<F, Fut>(f: F) -> Cleanup
where
    F: FnOnce() -> Fut + Send + 'static,
    Fut: Future<Output = StateResult<()>> + Send + 'static,
{
    Box::new(move || -> CleanupFuture { Box::pin(f()) })
}

/// Mutator that sets `pos` on a section document.
pub fn set_pos(pos: u64) -> Mutator {
    mutator(move |slot| slot["pos"] = Value::from(pos))
}

/// The real side effect behind a token, fired once per join.
#[async_trait]
pub trait TokenEffect: Send + Sync {
    /// Fire the effect with the fixups collected from every completed handle.
    async fn fire(&self, fixups: Vec<Mutator>) -> StateResult<()>;
}

struct TokenJoin {
    outstanding: AtomicUsize,
    fixups: Mutex<Vec<Mutator>>,
    effect: Box<dyn TokenEffect>,
}

/// Handle that must be completed exactly once.
pub struct CompletionToken {
    join: Arc<TokenJoin>,
    called: AtomicBool,
}

impl CompletionToken {
    /// Create a token whose join fires `effect`.
    pub fn new(effect: impl TokenEffect + 'static) -> Self {
        Self {
            join: Arc::new(TokenJoin {
                outstanding: AtomicUsize::new(1),
                fixups: Mutex::new(Vec::new()),
                effect: Box::new(effect),
            }),
            called: AtomicBool::new(false),
        }
    }

    /// Create another handle on the same join.
    ///
    /// The effect will not fire until the new handle has also been
    /// completed. Forking after the effect has fired is a protocol violation.
    pub fn fork(&self) -> StateResult<CompletionToken> {
        self.join
            .outstanding
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| {
                (n > 0).then_some(n + 1)
            })
            .map_err(|_| StateError::ProtocolViolation("cannot fork a fired token".into()))?;
        Ok(Self {
            join: Arc::clone(&self.join),
            called: AtomicBool::new(false),
        })
    }

    /// Complete this handle.
    pub async fn complete(&self) -> StateResult<()> {
        self.finish(None).await
    }

    /// Complete this handle, merging `fixup` into the commit it triggers.
    pub async fn complete_with(&self, fixup: Mutator) -> StateResult<()> {
        self.finish(Some(fixup)).await
    }

    /// Whether this handle has been completed.
    pub fn is_completed(&self) -> bool {
        self.called.load(Ordering::Acquire)
    }

    /// Number of handles on this join still outstanding.
    pub fn outstanding(&self) -> usize {
        self.join.outstanding.load(Ordering::Acquire)
    }

    async fn finish(&self, fixup: Option<Mutator>) -> StateResult<()> {
        if self.called.swap(true, Ordering::AcqRel) {
            return Err(StateError::AlreadyCompleted);
        }
        if let Some(fixup) = fixup {
            self.join.fixups.lock().expect("lock poisoned").push(fixup);
        }
        let previous = self.join.outstanding.fetch_sub(1, Ordering::AcqRel);
        debug_assert!(previous > 0);
        if previous != 1 {
            return Ok(());
        }
        let fixups = std::mem::take(&mut *self.join.fixups.lock().expect("lock poisoned"));
        self.join.effect.fire(fixups).await
    }
}

impl Drop for CompletionToken {
    fn drop(&mut self) {
        if !self.called.load(Ordering::Acquire) && !std::thread::panicking() {
            warn!(
                outstanding = self.join.outstanding.load(Ordering::Acquire),
                "completion token dropped without being completed"
            );
        }
    }
}

impl fmt::Debug for CompletionToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CompletionToken")
            .field("completed", &self.is_completed())
            .field("outstanding", &self.outstanding())
            .finish()
    }
}
