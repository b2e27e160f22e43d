//! Part composition engine interface
//!
//! The engine is the substrate a node delegates real export resolution to.
//! Each node owns one engine instance; the hierarchy never looks inside it.

use crate::change::{CompositionObserver, ExportsChange};
use crate::definition::ImportDefinition;
use crate::errors::Result;
use crate::export::Export;
use crate::part::{CompositionBatch, PartRef};
use crate::transaction::AtomicComposition;
use std::sync::Arc;

/// Transactional store of composable parts that answers export queries
pub trait PartEngine: Send + Sync {
    /// Apply a batch atomically
    ///
    /// The engine raises `exports_changing` on the observer with an open
    /// transaction before applying the batch, commits the transaction, and
    /// then raises `exports_changed`. A failing `exports_changing` vetoes the
    /// batch and rolls the transaction back.
    fn compose(
        &self,
        batch: CompositionBatch,
        observer: &dyn CompositionObserver,
    ) -> Result<ExportsChange>;

    /// Exports matching the import
    ///
    /// With a transaction that is currently being applied, the query sees
    /// the staged part set; otherwise the committed part set.
    fn query(
        &self,
        import: &ImportDefinition,
        transaction: Option<&AtomicComposition>,
    ) -> Result<Vec<Export>>;

    /// Parts currently committed
    fn parts(&self) -> Vec<PartRef>;

    /// Part set an open transaction is about to commit
    fn staged_parts(&self, transaction: &AtomicComposition) -> Option<Vec<PartRef>>;

    /// Release engine resources; parts are disposed by their owner
    fn dispose(&self) -> Result<()>;
}

/// Constructs a fresh engine for each node
pub type EngineFactory = Arc<dyn Fn() -> Arc<dyn PartEngine> + Send + Sync>;
