//! Lazily instantiated parts
//!
//! A catalog entry declares its export definitions up front and builds its
//! part only when a query first matches one of them. The instance is shared
//! by every later query and disposed together with the catalog. While an
//! entry's factory runs, queries from that same thread do not see the entry.

use crate::part_factory::{Exportable, PartFactory};
use crate::provider::ExportProvider;
use arbor_core::{
    AggregateError, ArborError, Export, ExportDefinition, ImportDefinition, PartRef, Result,
};
use parking_lot::{Mutex, RwLock};
use std::sync::Arc;
use std::thread::ThreadId;

/// Builds a catalog part on first use
pub type CatalogFactory = Arc<dyn Fn() -> Result<PartRef> + Send + Sync>;

struct CatalogEntry {
    definitions: Vec<ExportDefinition>,
    factory: CatalogFactory,
    instance: Mutex<Option<PartRef>>,
    building: Mutex<Vec<ThreadId>>,
}

/// Marks the current thread as building an entry until dropped
struct BuildMark<'a> {
    entry: &'a CatalogEntry,
    thread: ThreadId,
}

impl Drop for BuildMark<'_> {
    fn drop(&mut self) {
        self.entry.building.lock().retain(|id| *id != self.thread);
    }
}

impl CatalogEntry {
    fn matches(&self, import: &ImportDefinition) -> bool {
        self.definitions.iter().any(|d| import.is_satisfied_by(d))
    }

    /// The shared part, built on first use
    ///
    /// The factory runs without the entry locked. `None` while the calling
    /// thread is itself inside this entry's factory. When two threads build
    /// concurrently the first stored part wins and the other is disposed.
    fn instance(&self) -> Result<Option<PartRef>> {
        if let Some(part) = self.instance.lock().as_ref() {
            return Ok(Some(Arc::clone(part)));
        }
        let thread = std::thread::current().id();
        let _mark = {
            let mut building = self.building.lock();
            if building.contains(&thread) {
                return Ok(None);
            }
            building.push(thread);
            BuildMark {
                entry: self,
                thread,
            }
        };

        let part = (self.factory)()?;
        let mut instance = self.instance.lock();
        if let Some(existing) = instance.as_ref() {
            let existing = Arc::clone(existing);
            drop(instance);
            if let Err(err) = part.dispose() {
                tracing::warn!(
                    part = %part.id(),
                    error = %err,
                    "discarded catalog part failed to dispose"
                );
            }
            return Ok(Some(existing));
        }
        tracing::trace!(part = %part.id(), "instantiated catalog part");
        *instance = Some(Arc::clone(&part));
        Ok(Some(part))
    }
}

/// Per-node catalog of lazily created parts
#[derive(Default)]
pub struct PartCatalog {
    entries: RwLock<Vec<Arc<CatalogEntry>>>,
}

impl PartCatalog {
    /// Create an empty catalog
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a factory producing a part with the given exports
    pub fn register(&self, definitions: Vec<ExportDefinition>, factory: CatalogFactory) {
        self.entries.write().push(Arc::new(CatalogEntry {
            definitions,
            factory,
            instance: Mutex::new(None),
            building: Mutex::new(Vec::new()),
        }));
    }

    /// Register an [`Exportable`] type built by `constructor` on first use
    pub fn register_exportable<T, F>(&self, parts: &PartFactory, constructor: F)
    where
        T: Exportable,
        F: Fn() -> T + Send + Sync + 'static,
    {
        let definitions = parts.cache().descriptor::<T>().definitions().to_vec();
        let parts = parts.clone();
        self.register(
            definitions,
            Arc::new(move || Ok(parts.create_part(Arc::new(constructor())))),
        );
    }

    /// Number of registered entries
    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    /// Whether nothing is registered
    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }

    /// Parts instantiated so far
    pub fn instantiated(&self) -> Vec<PartRef> {
        self.entries
            .read()
            .iter()
            .filter_map(|entry| entry.instance.lock().clone())
            .collect()
    }

    /// Dispose every instantiated part, collecting failures
    pub fn dispose(&self) -> AggregateError {
        let mut failures = AggregateError::new();
        let entries = std::mem::take(&mut *self.entries.write());
        for entry in entries {
            if let Some(part) = entry.instance.lock().take() {
                failures.collect(part.dispose());
            }
        }
        failures
    }
}

impl ExportProvider for PartCatalog {
    fn get_exports(&self, import: &ImportDefinition) -> Result<Vec<Export>> {
        let matching: Vec<Arc<CatalogEntry>> = self
            .entries
            .read()
            .iter()
            .filter(|entry| entry.matches(import))
            .cloned()
            .collect();

        let mut exports = Vec::new();
        for entry in matching {
            let Some(part) = entry.instance()? else {
                continue;
            };
            for definition in part.export_definitions() {
                if !import.is_satisfied_by(definition) {
                    continue;
                }
                let value = part.export_value(definition).map_err(|e| {
                    ArborError::composition(format!(
                        "catalog part {} failed to produce '{}': {e}",
                        part.id(),
                        definition.contract()
                    ))
                })?;
                exports.push(Export::new(definition.clone(), value).from_part(part.id()));
            }
        }
        Ok(exports)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::part_factory::InstancePart;
    use arbor_core::Scope;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn test_lazy_single_instantiation() {
        let created = Arc::new(AtomicUsize::new(0));
        let catalog = PartCatalog::new();
        let counter = Arc::clone(&created);
        catalog.register(
            vec![ExportDefinition::new("cache")],
            Arc::new(move || {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok(InstancePart::builder()
                    .export_value(ExportDefinition::new("cache"), Arc::new("lru"))
                    .build())
            }),
        );

        assert_eq!(created.load(Ordering::SeqCst), 0);
        assert!(catalog
            .get_exports(&ImportDefinition::many("other"))
            .unwrap()
            .is_empty());
        assert_eq!(created.load(Ordering::SeqCst), 0);

        for _ in 0..3 {
            let exports = catalog.get_exports(&ImportDefinition::many("cache")).unwrap();
            assert_eq!(exports.len(), 1);
        }
        assert_eq!(created.load(Ordering::SeqCst), 1);
        assert_eq!(catalog.instantiated().len(), 1);
    }

    #[test]
    fn test_scoped_import_does_not_instantiate_hidden_entries() {
        let catalog = PartCatalog::new();
        catalog.register(
            vec![ExportDefinition::new("secret").with_scope(Scope::Private)],
            Arc::new(|| Err(ArborError::composition("must not be built"))),
        );
        let import = ImportDefinition::many("secret").scoped(arbor_core::ScopeRadius::Protected);
        assert!(catalog.get_exports(&import).unwrap().is_empty());
    }

    #[test]
    fn test_dispose_collects_failures() {
        let catalog = PartCatalog::new();
        for name in ["a", "b"] {
            catalog.register(
                vec![ExportDefinition::new(name)],
                Arc::new(move || {
                    Ok(InstancePart::builder()
                        .export_value(ExportDefinition::new(name), Arc::new(()))
                        .on_dispose(move || Err(ArborError::composition(name)))
                        .build())
                }),
            );
        }
        catalog.get_exports(&ImportDefinition::many("a")).unwrap();
        catalog.get_exports(&ImportDefinition::many("b")).unwrap();

        let failures = catalog.dispose();
        assert_eq!(failures.len(), 2);
        assert!(catalog.is_empty());
    }

    #[test]
    fn test_factory_querying_its_own_entry_sees_nothing() {
        let catalog = Arc::new(PartCatalog::new());
        let inner = Arc::downgrade(&catalog);
        let seen_inside = Arc::new(AtomicUsize::new(usize::MAX));
        let seen = Arc::clone(&seen_inside);
        catalog.register(
            vec![ExportDefinition::new("cache")],
            Arc::new(move || {
                let catalog = inner
                    .upgrade()
                    .ok_or_else(|| ArborError::composition("catalog dropped"))?;
                let exports = catalog.get_exports(&ImportDefinition::many("cache"))?;
                seen.store(exports.len(), Ordering::SeqCst);
                Ok(InstancePart::builder()
                    .export_value(ExportDefinition::new("cache"), Arc::new("lru"))
                    .build())
            }),
        );

        let exports = catalog.get_exports(&ImportDefinition::many("cache")).unwrap();
        assert_eq!(exports.len(), 1);
        assert_eq!(seen_inside.load(Ordering::SeqCst), 0);
        assert_eq!(catalog.instantiated().len(), 1);
    }

    #[test]
    fn test_concurrent_first_use_keeps_one_instance() {
        let created = Arc::new(AtomicUsize::new(0));
        let disposed = Arc::new(AtomicUsize::new(0));
        let both_building = Arc::new(std::sync::Barrier::new(2));
        let catalog = Arc::new(PartCatalog::new());
        let (counter, drops, barrier) = (
            Arc::clone(&created),
            Arc::clone(&disposed),
            Arc::clone(&both_building),
        );
        catalog.register(
            vec![ExportDefinition::new("cache")],
            Arc::new(move || {
                counter.fetch_add(1, Ordering::SeqCst);
                barrier.wait();
                let drops = Arc::clone(&drops);
                Ok(InstancePart::builder()
                    .export_value(ExportDefinition::new("cache"), Arc::new("lru"))
                    .on_dispose(move || {
                        drops.fetch_add(1, Ordering::SeqCst);
                        Ok(())
                    })
                    .build())
            }),
        );

        let handles: Vec<_> = (0..2)
            .map(|_| {
                let catalog = Arc::clone(&catalog);
                std::thread::spawn(move || {
                    catalog.get_exports(&ImportDefinition::many("cache")).unwrap()[0].part()
                })
            })
            .collect();
        let parts: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();

        assert_eq!(created.load(Ordering::SeqCst), 2);
        assert_eq!(disposed.load(Ordering::SeqCst), 1);
        assert_eq!(parts[0], parts[1]);
        assert_eq!(catalog.instantiated().len(), 1);
        assert_eq!(Some(catalog.instantiated()[0].id()), parts[0]);
    }
}
