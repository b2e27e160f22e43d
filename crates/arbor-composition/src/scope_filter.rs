//! Scope filters
//!
//! A scope filter aggregates upstream providers behind a fixed radius. Every
//! query is re-wrapped so only exports whose scope tag is below the radius
//! match, and change notifications are filtered the same way. Each node owns
//! three filters (protected, internal, public); attach and detach propagation
//! link and unlink other nodes' local providers into them.

use crate::provider::ExportProvider;
use arbor_core::{
    Export, ExportDefinition, ExportsChange, ImportDefinition, NodeId, Result, ScopeRadius,
};
use parking_lot::RwLock;
use std::sync::Arc;

/// Radius-bounded aggregate of upstream providers
pub struct ScopeFilter {
    radius: ScopeRadius,
    upstream: RwLock<Vec<(NodeId, Arc<dyn ExportProvider>)>>,
}

impl ScopeFilter {
    /// Create an empty filter at the given radius
    pub fn new(radius: ScopeRadius) -> Self {
        Self {
            radius,
            upstream: RwLock::new(Vec::new()),
        }
    }

    /// Visibility radius
    pub fn radius(&self) -> ScopeRadius {
        self.radius
    }

    /// Whether an export definition passes this filter
    pub fn admits(&self, definition: &ExportDefinition) -> bool {
        self.radius.admits(definition.scope_tag())
    }

    /// Add a node's provider; returns false if it was already linked
    pub fn link(&self, node: NodeId, provider: Arc<dyn ExportProvider>) -> bool {
        let mut upstream = self.upstream.write();
        if upstream.iter().any(|(id, _)| *id == node) {
            return false;
        }
        upstream.push((node, provider));
        true
    }

    /// Remove a node's provider; returns false if it was not linked
    pub fn unlink(&self, node: NodeId) -> bool {
        let mut upstream = self.upstream.write();
        let before = upstream.len();
        upstream.retain(|(id, _)| *id != node);
        upstream.len() != before
    }

    /// Remove every provider, returning the nodes that were linked
    pub fn clear(&self) -> Vec<NodeId> {
        self.upstream
            .write()
            .drain(..)
            .map(|(id, _)| id)
            .collect()
    }

    /// Whether a node's provider is linked
    pub fn contains(&self, node: NodeId) -> bool {
        self.upstream.read().iter().any(|(id, _)| *id == node)
    }

    /// Linked nodes in link order
    pub fn linked_nodes(&self) -> Vec<NodeId> {
        self.upstream.read().iter().map(|(id, _)| *id).collect()
    }

    /// Number of linked providers
    pub fn len(&self) -> usize {
        self.upstream.read().len()
    }

    /// Whether nothing is linked
    pub fn is_empty(&self) -> bool {
        self.upstream.read().is_empty()
    }

    /// Filter a change notification; `None` when nothing relevant remains
    pub fn filter_change(&self, change: &ExportsChange) -> Option<ExportsChange> {
        let filtered = change.filter(|definition| self.admits(definition));
        if filtered.is_empty() {
            None
        } else {
            Some(filtered)
        }
    }
}

impl ExportProvider for ScopeFilter {
    fn get_exports(&self, import: &ImportDefinition) -> Result<Vec<Export>> {
        let scoped = import.scoped(self.radius);
        let upstream: Vec<Arc<dyn ExportProvider>> = self
            .upstream
            .read()
            .iter()
            .map(|(_, provider)| Arc::clone(provider))
            .collect();

        let mut exports = Vec::new();
        for provider in upstream {
            let found = provider.get_exports(&scoped)?;
            if !found.is_empty() {
                exports.extend(found);
            }
        }
        Ok(exports)
    }
}

impl std::fmt::Debug for ScopeFilter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScopeFilter")
            .field("radius", &self.radius)
            .field("upstream", &self.linked_nodes())
            .finish()
    }
}
