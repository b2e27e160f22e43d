//! Arbor Core - composition hierarchy vocabulary
//!
//! This crate holds the types and interfaces shared by every layer of the
//! composition hierarchy. It contains no tree logic.
//!
//! # Contents
//!
//! - Scope tags and filter radii (`Scope`, `ScopeRadius`)
//! - Export/import definitions and cardinality
//! - The composable-part contract and composition batches
//! - Atomic composition transactions and change notifications
//! - The part-engine and coordination-thread interfaces
//! - The unified error type and configuration layer
//!
//! # Visibility model
//!
//! A filter at radius `r` admits an export iff its scope tag value is
//! strictly less than `r`, with a missing tag treated as `Public`:
//!
//! | tag        | value | radius 1 | radius 2 | radius 3 |
//! |------------|-------|----------|----------|----------|
//! | Public     | 0     | yes      | yes      | yes      |
//! | Internal   | 1     | no       | yes      | yes      |
//! | Protected  | 2     | no       | no       | yes      |
//! | Private    | 3     | no       | no       | no       |

#![forbid(unsafe_code)]

/// Export change notifications
pub mod change;

/// Configuration layer
pub mod config;

/// Coordination-thread interface
pub mod coordination;

/// Export and import definitions
pub mod definition;

/// Part engine interface
pub mod engine;

/// Unified error handling
pub mod errors;

/// Resolved exports
pub mod export;

/// Controller, node and part identifiers
pub mod identifiers;

/// Composable parts and batches
pub mod part;

/// Scope tags and radii
pub mod scope;

/// Atomic composition transactions
pub mod transaction;

// === Public API Re-exports ===

pub use change::{CompositionObserver, ExportsChange, ExportsChangeEvent, NoopObserver};
pub use config::{ArborConfig, HierarchyConfig};
pub use coordination::{CoordinationThread, DispatchJob};
pub use definition::{
    Cardinality, ExportDefinition, ExportMetadata, ExportPredicate, ImportDefinition,
};
pub use engine::{EngineFactory, PartEngine};
pub use errors::{AggregateError, ArborError, BoxError, Result};
pub use export::{Export, ExportValue};
pub use identifiers::{ControllerId, NodeId, PartId};
pub use part::{ComposablePart, CompositionBatch, PartRef};
pub use scope::{Scope, ScopeRadius};
pub use transaction::AtomicComposition;
