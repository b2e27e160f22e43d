//! Part creation
//!
//! Types describe their exports once through [`Exportable::describe`]; the
//! descriptions are cached per type in a [`PartMetadataCache`] keyed by
//! `TypeId`. [`PartFactory::create_part`] turns an object into a composable
//! part using the cached description. [`InstancePart`] covers ad-hoc parts
//! built from explicit definitions and values.

use arbor_core::{
    ArborError, ComposablePart, ExportDefinition, ExportValue, PartId, PartRef, Result,
};
use parking_lot::RwLock;
use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::sync::Arc;

/// Projection from an object to one of its exported values
pub type ExportProjection<T> = fn(&Arc<T>) -> ExportValue;

/// A type that can be turned into a composable part
pub trait Exportable: Any + Send + Sync + Sized {
    /// Declare this type's exports
    fn describe(exports: &mut ExportsBuilder<Self>);

    /// Release resources when the owning part is disposed
    fn dispose(&self) -> Result<()> {
        Ok(())
    }
}

struct DescribedExport<T> {
    definition: ExportDefinition,
    project: ExportProjection<T>,
}

/// Collects the export declarations of an [`Exportable`] type
pub struct ExportsBuilder<T> {
    exports: Vec<DescribedExport<T>>,
}

impl<T: Exportable> ExportsBuilder<T> {
    fn new() -> Self {
        Self {
            exports: Vec::new(),
        }
    }

    /// Export the object itself
    pub fn export(&mut self, definition: ExportDefinition) -> &mut Self {
        self.export_with(definition, |object| Arc::clone(object) as ExportValue)
    }

    /// Export a value projected from the object
    pub fn export_with(
        &mut self,
        definition: ExportDefinition,
        project: ExportProjection<T>,
    ) -> &mut Self {
        self.exports.push(DescribedExport {
            definition,
            project,
        });
        self
    }
}

/// Cached export description of one type
pub struct PartDescriptor<T> {
    definitions: Vec<ExportDefinition>,
    projections: Vec<ExportProjection<T>>,
}

impl<T: Exportable> PartDescriptor<T> {
    fn describe() -> Self {
        let mut builder = ExportsBuilder::new();
        T::describe(&mut builder);
        let (definitions, projections) = builder
            .exports
            .into_iter()
            .map(|export| (export.definition, export.project))
            .unzip();
        Self {
            definitions,
            projections,
        }
    }

    /// Declared export definitions
    pub fn definitions(&self) -> &[ExportDefinition] {
        &self.definitions
    }
}

/// Export descriptions keyed by type identity
///
/// Entries live until [`PartMetadataCache::clear`] is called.
#[derive(Default)]
pub struct PartMetadataCache {
    entries: RwLock<HashMap<TypeId, Arc<dyn Any + Send + Sync>>>,
}

impl PartMetadataCache {
    /// Create an empty cache
    pub fn new() -> Self {
        Self::default()
    }

    /// Description of `T`, computed on first use
    pub fn descriptor<T: Exportable>(&self) -> Arc<PartDescriptor<T>> {
        let key = TypeId::of::<T>();
        if let Some(cached) = self.entries.read().get(&key) {
            if let Ok(descriptor) = Arc::clone(cached).downcast::<PartDescriptor<T>>() {
                return descriptor;
            }
        }

        let mut entries = self.entries.write();
        if let Some(descriptor) = entries
            .get(&key)
            .and_then(|cached| Arc::clone(cached).downcast::<PartDescriptor<T>>().ok())
        {
            return descriptor;
        }
        let descriptor = Arc::new(PartDescriptor::<T>::describe());
        entries.insert(key, Arc::clone(&descriptor) as Arc<dyn Any + Send + Sync>);
        descriptor
    }

    /// Whether `T` has been described
    pub fn contains<T: Exportable>(&self) -> bool {
        self.entries.read().contains_key(&TypeId::of::<T>())
    }

    /// Number of cached types
    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    /// Whether the cache is empty
    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }

    /// Drop every cached description
    pub fn clear(&self) {
        self.entries.write().clear();
    }
}

/// Creates parts from objects
#[derive(Clone, Default)]
pub struct PartFactory {
    cache: Arc<PartMetadataCache>,
}

impl PartFactory {
    /// Create a factory with its own cache
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a factory over a shared cache
    pub fn with_cache(cache: Arc<PartMetadataCache>) -> Self {
        Self { cache }
    }

    /// Metadata cache in use
    pub fn cache(&self) -> &Arc<PartMetadataCache> {
        &self.cache
    }

    /// Turn an object into a composable part
    pub fn create_part<T: Exportable>(&self, object: Arc<T>) -> PartRef {
        Arc::new(ObjectPart {
            id: PartId::new(),
            descriptor: self.cache.descriptor::<T>(),
            object,
        })
    }
}

struct ObjectPart<T> {
    id: PartId,
    descriptor: Arc<PartDescriptor<T>>,
    object: Arc<T>,
}

impl<T: Exportable> ComposablePart for ObjectPart<T> {
    fn id(&self) -> PartId {
        self.id
    }

    fn export_definitions(&self) -> &[ExportDefinition] {
        &self.descriptor.definitions
    }

    fn export_value(&self, definition: &ExportDefinition) -> Result<ExportValue> {
        self.descriptor
            .definitions
            .iter()
            .position(|d| d == definition)
            .map(|index| (self.descriptor.projections[index])(&self.object))
            .ok_or_else(|| {
                ArborError::composition(format!(
                    "part {} does not export '{}'",
                    self.id,
                    definition.contract()
                ))
            })
    }

    fn dispose(&self) -> Result<()> {
        self.object.dispose()
    }
}

type DisposeHook = Box<dyn Fn() -> Result<()> + Send + Sync>;

/// Part built from explicit definitions and values
pub struct InstancePart {
    id: PartId,
    definitions: Vec<ExportDefinition>,
    values: Vec<ExportValue>,
    on_dispose: Option<DisposeHook>,
}

impl InstancePart {
    /// Start building an instance part
    pub fn builder() -> InstancePartBuilder {
        InstancePartBuilder::default()
    }
}

impl ComposablePart for InstancePart {
    fn id(&self) -> PartId {
        self.id
    }

    fn export_definitions(&self) -> &[ExportDefinition] {
        &self.definitions
    }

    fn export_value(&self, definition: &ExportDefinition) -> Result<ExportValue> {
        self.definitions
            .iter()
            .position(|d| d == definition)
            .map(|index| Arc::clone(&self.values[index]))
            .ok_or_else(|| {
                ArborError::composition(format!(
                    "part {} does not export '{}'",
                    self.id,
                    definition.contract()
                ))
            })
    }

    fn dispose(&self) -> Result<()> {
        match &self.on_dispose {
            Some(hook) => hook(),
            None => Ok(()),
        }
    }
}

/// Builder for [`InstancePart`]
#[derive(Default)]
pub struct InstancePartBuilder {
    definitions: Vec<ExportDefinition>,
    values: Vec<ExportValue>,
    on_dispose: Option<DisposeHook>,
}

impl InstancePartBuilder {
    /// Export a value under a definition
    pub fn export_value(mut self, definition: ExportDefinition, value: ExportValue) -> Self {
        self.definitions.push(definition);
        self.values.push(value);
        self
    }

    /// Run a hook when the part is disposed
    pub fn on_dispose(mut self, hook: impl Fn() -> Result<()> + Send + Sync + 'static) -> Self {
        self.on_dispose = Some(Box::new(hook));
        self
    }

    /// Finish the part
    pub fn build(self) -> PartRef {
        Arc::new(InstancePart {
            id: PartId::new(),
            definitions: self.definitions,
            values: self.values,
            on_dispose: self.on_dispose,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use arbor_core::Scope;
    use std::sync::atomic::{AtomicUsize, Ordering};

    static DESCRIBE_CALLS: AtomicUsize = AtomicUsize::new(0);

    struct Clock {
        offset: u64,
    }

    impl Exportable for Clock {
        fn describe(exports: &mut ExportsBuilder<Self>) {
            DESCRIBE_CALLS.fetch_add(1, Ordering::SeqCst);
            exports
                .export(ExportDefinition::new("clock"))
                .export_with(
                    ExportDefinition::new("clock.offset").with_scope(Scope::Internal),
                    |clock| Arc::new(clock.offset) as ExportValue,
                );
        }
    }

    #[test]
    fn test_create_part_uses_cached_description() {
        let factory = PartFactory::new();
        let before = DESCRIBE_CALLS.load(Ordering::SeqCst);
        let first = factory.create_part(Arc::new(Clock { offset: 3 }));
        let second = factory.create_part(Arc::new(Clock { offset: 4 }));
        assert_eq!(DESCRIBE_CALLS.load(Ordering::SeqCst), before + 1);
        assert!(factory.cache().contains::<Clock>());
        assert_ne!(first.id(), second.id());

        let offset_def = &second.export_definitions()[1];
        let value = second.export_value(offset_def).unwrap();
        assert_eq!(value.downcast_ref::<u64>(), Some(&4));

        let clock = first.export_value(&first.export_definitions()[0]).unwrap();
        assert!(clock.downcast::<Clock>().is_ok());
    }

    struct Thermometer;

    impl Exportable for Thermometer {
        fn describe(exports: &mut ExportsBuilder<Self>) {
            exports.export(ExportDefinition::new("thermometer"));
        }
    }

    #[test]
    fn test_cache_clear() {
        let cache = PartMetadataCache::new();
        let descriptor = cache.descriptor::<Thermometer>();
        assert_eq!(descriptor.definitions().len(), 1);
        assert_eq!(cache.len(), 1);
        cache.clear();
        assert!(cache.is_empty());
    }

    #[test]
    fn test_instance_part_unknown_definition() {
        let part = InstancePart::builder()
            .export_value(ExportDefinition::new("a"), Arc::new(1u8))
            .build();
        assert!(part.export_value(&ExportDefinition::new("b")).is_err());
        assert!(part.dispose().is_ok());
    }
}
