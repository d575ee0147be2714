//! # Transaction Lifecycle
//!
//! The tree does not pull transaction state; it reacts to events pushed by a
//! [`TransactionContext`]. Observers register once and receive the five
//! lifecycle events; the tree's own observer implementation maps them to
//! flush, cache rekey, unload, and teardown (see `PersistentTree`).
//!
//! The context snapshots its observer list before dispatching, so an
//! observer may take its own locks (the tree does) without holding the
//! context's.

use eyre::Result;
use parking_lot::Mutex;
use std::sync::Arc;
use tracing::trace;

/// Transaction lifecycle events, in the order a healthy transaction sees
/// them.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TxEvent {
    Open,
    BeforeCommit,
    AfterCommit,
    Rollback,
    Close,
}

/// Receiver of transaction events. Every hook defaults to a no-op.
pub trait TxObserver: Send + Sync {
    fn on_open(&self) -> Result<()> {
        Ok(())
    }

    fn on_before_commit(&self) -> Result<()> {
        Ok(())
    }

    fn on_after_commit(&self) -> Result<()> {
        Ok(())
    }

    fn on_rollback(&self) -> Result<()> {
        Ok(())
    }

    fn on_close(&self) -> Result<()> {
        Ok(())
    }
}

/// Owns the observer list and fans events out in registration order.
pub struct TransactionContext {
    observers: Mutex<Vec<Arc<dyn TxObserver>>>,
}

impl TransactionContext {
    pub fn new() -> Self {
        Self {
            observers: Mutex::new(Vec::new()),
        }
    }

    pub fn register(&self, observer: Arc<dyn TxObserver>) {
        self.observers.lock().push(observer);
    }

    pub fn observer_count(&self) -> usize {
        self.observers.lock().len()
    }

    fn emit(&self, event: TxEvent) -> Result<()> {
        trace!(?event, "dispatching transaction event");
        let observers = self.observers.lock().clone();
        for observer in observers {
            match event {
                TxEvent::Open => observer.on_open()?,
                TxEvent::BeforeCommit => observer.on_before_commit()?,
                TxEvent::AfterCommit => observer.on_after_commit()?,
                TxEvent::Rollback => observer.on_rollback()?,
                TxEvent::Close => observer.on_close()?,
            }
        }
        Ok(())
    }

    pub fn open(&self) -> Result<()> {
        self.emit(TxEvent::Open)
    }

    /// Pre-commit then post-commit. A pre-commit failure aborts before any
    /// post-commit hook runs.
    pub fn commit(&self) -> Result<()> {
        self.emit(TxEvent::BeforeCommit)?;
        self.emit(TxEvent::AfterCommit)
    }

    pub fn rollback(&self) -> Result<()> {
        self.emit(TxEvent::Rollback)
    }

    pub fn close(&self) -> Result<()> {
        self.emit(TxEvent::Close)
    }
}

impl Default for TransactionContext {
    fn default() -> Self {
        Self::new()
    }
}
