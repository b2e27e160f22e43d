//! Export change notifications

use crate::definition::ExportDefinition;
use crate::errors::Result;
use crate::transaction::AtomicComposition;

/// Export definitions added and removed by a composition batch
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExportsChange {
    /// Newly available exports
    pub added: Vec<ExportDefinition>,
    /// Exports no longer available
    pub removed: Vec<ExportDefinition>,
}

impl ExportsChange {
    /// Create a change from added and removed sets
    pub fn new(added: Vec<ExportDefinition>, removed: Vec<ExportDefinition>) -> Self {
        Self { added, removed }
    }

    /// Whether nothing was added or removed
    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.removed.is_empty()
    }

    /// Keep only definitions matching `predicate` in both sets
    pub fn filter(&self, predicate: impl Fn(&ExportDefinition) -> bool) -> ExportsChange {
        ExportsChange {
            added: self.added.iter().filter(|d| predicate(d)).cloned().collect(),
            removed: self.removed.iter().filter(|d| predicate(d)).cloned().collect(),
        }
    }

    /// Whether any added or removed definition has the given contract
    pub fn touches(&self, contract: &str) -> bool {
        self.added
            .iter()
            .chain(self.removed.iter())
            .any(|d| d.contract() == contract)
    }
}

/// A change notification, optionally bound to an open transaction
#[derive(Debug, Clone, Copy)]
pub struct ExportsChangeEvent<'a> {
    /// What changed
    pub change: &'a ExportsChange,
    /// Transaction the change belongs to; present for "changing" events
    pub transaction: Option<&'a AtomicComposition>,
}

impl<'a> ExportsChangeEvent<'a> {
    /// Event raised before a change is committed
    pub fn changing(change: &'a ExportsChange, transaction: &'a AtomicComposition) -> Self {
        Self {
            change,
            transaction: Some(transaction),
        }
    }

    /// Event raised after a change is committed
    pub fn changed(change: &'a ExportsChange) -> Self {
        Self {
            change,
            transaction: None,
        }
    }
}

/// Receiver of before/after change notifications from a part engine
pub trait CompositionObserver: Send + Sync {
    /// Called before the change is applied; failing vetoes the batch
    fn exports_changing(&self, event: &ExportsChangeEvent<'_>) -> Result<()>;

    /// Called after the change has been committed
    fn exports_changed(&self, event: &ExportsChangeEvent<'_>) -> Result<()>;
}

/// Observer that ignores every notification
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopObserver;

impl CompositionObserver for NoopObserver {
    fn exports_changing(&self, _event: &ExportsChangeEvent<'_>) -> Result<()> {
        Ok(())
    }

    fn exports_changed(&self, _event: &ExportsChangeEvent<'_>) -> Result<()> {
        Ok(())
    }
}
