//! Arbor Composition - the controller hierarchy
//!
//! Controllers form a tree rooted at a [`HierarchyRoot`]. Each activated
//! controller owns a [`Node`] holding its composed parts, a lazily populated
//! catalog, and three scope filters through which it sees the rest of the
//! tree. Attach and detach keep those filters a mirror of the live tree.
//!
//! # Visibility
//!
//! An export owned by node O with scope tag s is visible from node N iff
//!
//! - Public: N is anywhere in the tree
//! - Internal: N is in the subtree of O's parent (O's own subtree for modules)
//! - Protected: N is in O's subtree
//! - Private: N is O
//!
//! # Locking
//!
//! One re-entrant reader/writer lock per hierarchy serializes structural
//! changes (activation, deactivation, composition) against each other and
//! against queries. Lifecycle hooks and change notifications run after the
//! lock is released.
//!
//! # Example
//!
//! ```ignore
//! let root = HierarchyRoot::new()?;
//! root.activate_module(Arc::clone(&shell))?;
//! shell.context().activate(editor.clone())?;
//! editor.context().add_part(part)?;
//! let clock: Arc<Clock> = editor.context().get_exported_value("clock")?;
//! ```

#![forbid(unsafe_code)]

/// Lazily instantiated parts
pub mod catalog;

/// Controller and module contracts
pub mod controller;

/// Dedicated coordination thread
pub mod dispatcher;

/// In-memory part engine
pub mod engine;

/// Event broker pseudo-export
pub mod event_broker;

/// Hierarchy root and tree-wide operations
pub mod hierarchy;

/// Re-entrant hierarchy lock
pub mod lock;

/// Composition nodes
pub mod node;

/// Part metadata cache and part factory
pub mod part_factory;

/// Export providers
pub mod provider;

/// Scope filters
pub mod scope_filter;

mod propagation;

// === Public API Re-exports ===

pub use catalog::{CatalogFactory, PartCatalog};
pub use controller::{Controller, ControllerContext, Module};
pub use dispatcher::DedicatedDispatcher;
pub use engine::{default_engine_factory, CompositionEngine};
pub use event_broker::{EventBroker, EventContext, EventListener, EVENT_BROKER_CONTRACT};
pub use hierarchy::{HierarchyBuilder, HierarchyEdge, HierarchyRoot};
pub use lock::{HierarchyGuard, HierarchyLock};
pub use node::Node;
pub use part_factory::{
    ExportProjection, Exportable, ExportsBuilder, InstancePart, InstancePartBuilder,
    PartDescriptor, PartFactory, PartMetadataCache,
};
pub use provider::{ExportProvider, LocalExportProvider};
pub use scope_filter::ScopeFilter;
