//! In-memory part engine
//!
//! The default [`PartEngine`]: an ordered part set replaced wholesale by each
//! committed batch. While a batch is being applied the candidate part set is
//! staged under the batch's transaction id so observers can inspect it.

use arbor_core::{
    ArborError, AtomicComposition, CompositionBatch, CompositionObserver, EngineFactory, Export,
    ExportsChange, ExportsChangeEvent, ImportDefinition, PartEngine, PartId, PartRef, Result,
};
use indexmap::IndexMap;
use parking_lot::{Mutex, RwLock};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use uuid::Uuid;

/// Ordered in-memory part store
#[derive(Default)]
pub struct CompositionEngine {
    parts: RwLock<IndexMap<PartId, PartRef>>,
    staged: Mutex<Option<(Uuid, Vec<PartRef>)>>,
    compose_gate: Mutex<()>,
    disposed: AtomicBool,
}

impl CompositionEngine {
    /// Create an empty engine
    pub fn new() -> Self {
        Self::default()
    }

    fn ensure_live(&self) -> Result<()> {
        if self.disposed.load(Ordering::Acquire) {
            Err(ArborError::composition("engine has been disposed"))
        } else {
            Ok(())
        }
    }

    fn exports_of(parts: &[PartRef], import: &ImportDefinition) -> Result<Vec<Export>> {
        let mut exports = Vec::new();
        for part in parts {
            for definition in part.export_definitions() {
                if import.is_satisfied_by(definition) {
                    let value = part.export_value(definition)?;
                    exports.push(Export::new(definition.clone(), value).from_part(part.id()));
                }
            }
        }
        Ok(exports)
    }
}

impl PartEngine for CompositionEngine {
    fn compose(
        &self,
        batch: CompositionBatch,
        observer: &dyn CompositionObserver,
    ) -> Result<ExportsChange> {
        self.ensure_live()?;
        let _serial = self.compose_gate.lock();

        let mut next = self.parts.read().clone();
        let mut added = Vec::new();
        let mut removed = Vec::new();

        for id in batch.parts_to_remove() {
            match next.shift_remove(id) {
                Some(part) => removed.extend(part.export_definitions().iter().cloned()),
                None => tracing::trace!(part = %id, "ignoring removal of unknown part"),
            }
        }
        for part in batch.parts_to_add() {
            if next.contains_key(&part.id()) {
                return Err(ArborError::composition(format!(
                    "part {} is already composed",
                    part.id()
                )));
            }
            added.extend(part.export_definitions().iter().cloned());
            next.insert(part.id(), Arc::clone(part));
        }

        let change = ExportsChange::new(added, removed);
        let transaction = AtomicComposition::new();
        *self.staged.lock() = Some((transaction.id(), next.values().cloned().collect()));

        let event = ExportsChangeEvent::changing(&change, &transaction);
        if let Err(veto) = observer.exports_changing(&event) {
            *self.staged.lock() = None;
            transaction.rollback();
            tracing::debug!(transaction = %transaction.id(), error = %veto, "batch vetoed");
            return Err(veto);
        }

        *self.parts.write() = next;
        *self.staged.lock() = None;
        transaction.complete()?;

        observer.exports_changed(&ExportsChangeEvent::changed(&change))?;
        Ok(change)
    }

    fn query(
        &self,
        import: &ImportDefinition,
        transaction: Option<&AtomicComposition>,
    ) -> Result<Vec<Export>> {
        if self.disposed.load(Ordering::Acquire) {
            return Ok(Vec::new());
        }
        if let Some(transaction) = transaction {
            if let Some(staged) = self.staged_parts(transaction) {
                return Self::exports_of(&staged, import);
            }
        }
        let parts = self.parts();
        Self::exports_of(&parts, import)
    }

    fn parts(&self) -> Vec<PartRef> {
        self.parts.read().values().cloned().collect()
    }

    fn staged_parts(&self, transaction: &AtomicComposition) -> Option<Vec<PartRef>> {
        match &*self.staged.lock() {
            Some((id, parts)) if *id == transaction.id() => Some(parts.clone()),
            _ => None,
        }
    }

    fn dispose(&self) -> Result<()> {
        if self.disposed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        self.parts.write().clear();
        *self.staged.lock() = None;
        Ok(())
    }
}

/// Factory producing a fresh [`CompositionEngine`] per node
pub fn default_engine_factory() -> EngineFactory {
    Arc::new(|| Arc::new(CompositionEngine::new()) as Arc<dyn PartEngine>)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::part_factory::InstancePart;
    use arbor_core::{ExportDefinition, NoopObserver};

    fn part(contract: &str, value: u32) -> PartRef {
        InstancePart::builder()
            .export_value(ExportDefinition::new(contract), Arc::new(value))
            .build()
    }

    struct StagedInspector<'a> {
        engine: &'a CompositionEngine,
        seen: Mutex<Option<usize>>,
    }

    impl CompositionObserver for StagedInspector<'_> {
        fn exports_changing(&self, event: &ExportsChangeEvent<'_>) -> Result<()> {
            let Some(txn) = event.transaction else {
                return Err(ArborError::protocol_violation("no transaction"));
            };
            let staged = self
                .engine
                .query(&ImportDefinition::many("svc"), Some(txn))?;
            *self.seen.lock() = Some(staged.len());
            Ok(())
        }

        fn exports_changed(&self, _event: &ExportsChangeEvent<'_>) -> Result<()> {
            Ok(())
        }
    }

    struct Veto;

    impl CompositionObserver for Veto {
        fn exports_changing(&self, _event: &ExportsChangeEvent<'_>) -> Result<()> {
            Err(ArborError::composition("vetoed"))
        }

        fn exports_changed(&self, _event: &ExportsChangeEvent<'_>) -> Result<()> {
            Ok(())
        }
    }

    #[test]
    fn test_compose_reports_change_and_commits() {
        let engine = CompositionEngine::new();
        let first = part("svc", 1);
        let change = engine
            .compose(CompositionBatch::new().add_part(Arc::clone(&first)), &NoopObserver)
            .unwrap();
        assert_eq!(change.added.len(), 1);
        assert!(change.removed.is_empty());

        let change = engine
            .compose(
                CompositionBatch::new()
                    .remove_part(first.id())
                    .add_part(part("svc", 2)),
                &NoopObserver,
            )
            .unwrap();
        assert_eq!(change.added.len(), 1);
        assert_eq!(change.removed.len(), 1);

        let exports = engine.query(&ImportDefinition::many("svc"), None).unwrap();
        assert_eq!(exports.len(), 1);
        assert_eq!(exports[0].downcast::<u32>().as_deref(), Some(&2));
    }

    #[test]
    fn test_observer_sees_staged_parts() {
        let engine = CompositionEngine::new();
        engine
            .compose(CompositionBatch::new().add_part(part("svc", 1)), &NoopObserver)
            .unwrap();
        let inspector = StagedInspector {
            engine: &engine,
            seen: Mutex::new(None),
        };
        engine
            .compose(CompositionBatch::new().add_part(part("svc", 2)), &inspector)
            .unwrap();
        assert_eq!(*inspector.seen.lock(), Some(2));
    }

    #[test]
    fn test_veto_leaves_parts_untouched() {
        let engine = CompositionEngine::new();
        let result = engine.compose(CompositionBatch::new().add_part(part("svc", 1)), &Veto);
        assert!(result.is_err());
        assert!(engine.parts().is_empty());
    }

    #[test]
    fn test_duplicate_add_rejected() {
        let engine = CompositionEngine::new();
        let p = part("svc", 1);
        engine
            .compose(CompositionBatch::new().add_part(Arc::clone(&p)), &NoopObserver)
            .unwrap();
        let result = engine.compose(CompositionBatch::new().add_part(p), &NoopObserver);
        assert!(matches!(result, Err(ArborError::Composition { .. })));
        assert_eq!(engine.parts().len(), 1);
    }

    #[test]
    fn test_disposed_engine_is_empty() {
        let engine = CompositionEngine::new();
        engine
            .compose(CompositionBatch::new().add_part(part("svc", 1)), &NoopObserver)
            .unwrap();
        engine.dispose().unwrap();
        assert!(engine
            .query(&ImportDefinition::many("svc"), None)
            .unwrap()
            .is_empty());
        assert!(engine
            .compose(CompositionBatch::new(), &NoopObserver)
            .is_err());
    }
}
