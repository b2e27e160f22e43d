//! Export providers
//!
//! A provider answers an import with the exports it can see. Each node has
//! one [`LocalExportProvider`] over its own parts and catalog; scope filters
//! of other nodes hold it to expose those exports at a bounded radius.

use crate::catalog::PartCatalog;
use arbor_core::{Export, ImportDefinition, NodeId, PartEngine, Result};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Source of exports for an import
pub trait ExportProvider: Send + Sync {
    /// Exports matching the import
    fn get_exports(&self, import: &ImportDefinition) -> Result<Vec<Export>>;
}

/// A node's own exports: composed parts first, then catalog parts
pub struct LocalExportProvider {
    node: NodeId,
    engine: Arc<dyn PartEngine>,
    catalog: Arc<PartCatalog>,
    disposed: AtomicBool,
}

impl LocalExportProvider {
    /// Create the local provider for a node
    pub fn new(node: NodeId, engine: Arc<dyn PartEngine>, catalog: Arc<PartCatalog>) -> Self {
        Self {
            node,
            engine,
            catalog,
            disposed: AtomicBool::new(false),
        }
    }

    /// Node whose exports this provider serves
    pub fn node(&self) -> NodeId {
        self.node
    }

    /// Exports from composed parts
    pub fn part_exports(&self, import: &ImportDefinition) -> Result<Vec<Export>> {
        if self.is_disposed() {
            return Ok(Vec::new());
        }
        Ok(self
            .engine
            .query(import, None)?
            .into_iter()
            .map(|export| export.with_origin(self.node))
            .collect())
    }

    /// Exports from catalog parts, instantiating on demand
    pub fn catalog_exports(&self, import: &ImportDefinition) -> Result<Vec<Export>> {
        if self.is_disposed() {
            return Ok(Vec::new());
        }
        Ok(self
            .catalog
            .get_exports(import)?
            .into_iter()
            .map(|export| export.with_origin(self.node))
            .collect())
    }

    /// Stop serving exports; in-flight queries see an empty provider
    pub fn dispose(&self) {
        self.disposed.store(true, Ordering::Release);
    }

    /// Whether the provider has been disposed
    pub fn is_disposed(&self) -> bool {
        self.disposed.load(Ordering::Acquire)
    }
}

impl ExportProvider for LocalExportProvider {
    fn get_exports(&self, import: &ImportDefinition) -> Result<Vec<Export>> {
        let mut exports = self.part_exports(import)?;
        exports.extend(self.catalog_exports(import)?);
        Ok(exports)
    }
}

impl std::fmt::Debug for LocalExportProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LocalExportProvider")
            .field("node", &self.node)
            .field("disposed", &self.is_disposed())
            .finish()
    }
}
