//! Export and import definitions
//!
//! An [`ExportDefinition`] names a contract and carries metadata, including
//! the optional scope tag. An [`ImportDefinition`] is a query: a contract, a
//! cardinality and an optional constraint over export definitions.
//! Scope filtering is expressed by wrapping an import with a radius
//! ([`ImportDefinition::scoped`]); wrapping composes conjunctively.

use crate::scope::{Scope, ScopeRadius};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

/// Metadata attached to an export
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ExportMetadata {
    /// Visibility tag; `None` is treated as public
    pub scope: Option<Scope>,
    /// Listener must run on the coordination thread
    pub thread_affine: bool,
    /// Free-form metadata
    pub values: BTreeMap<String, String>,
}

impl ExportMetadata {
    /// Effective scope (absent tag is public)
    pub fn effective_scope(&self) -> Scope {
        Scope::or_public(self.scope)
    }
}

/// A named export with metadata
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ExportDefinition {
    contract: String,
    metadata: ExportMetadata,
}

impl ExportDefinition {
    /// Create a public export definition for a contract
    pub fn new(contract: impl Into<String>) -> Self {
        Self {
            contract: contract.into(),
            metadata: ExportMetadata::default(),
        }
    }

    /// Set the scope tag
    pub fn with_scope(mut self, scope: Scope) -> Self {
        self.metadata.scope = Some(scope);
        self
    }

    /// Mark as thread-affine
    pub fn thread_affine(mut self) -> Self {
        self.metadata.thread_affine = true;
        self
    }

    /// Add a metadata value
    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.values.insert(key.into(), value.into());
        self
    }

    /// Contract name
    pub fn contract(&self) -> &str {
        &self.contract
    }

    /// Metadata
    pub fn metadata(&self) -> &ExportMetadata {
        &self.metadata
    }

    /// Declared scope tag, if any
    pub fn scope_tag(&self) -> Option<Scope> {
        self.metadata.scope
    }

    /// Effective scope
    pub fn scope(&self) -> Scope {
        self.metadata.effective_scope()
    }

    /// Whether the thread-affinity flag is set
    pub fn is_thread_affine(&self) -> bool {
        self.metadata.thread_affine
    }
}

/// How many exports an import expects
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Cardinality {
    /// Zero or one match
    ZeroOrOne,
    /// Exactly one match
    ExactlyOne,
    /// Any number of matches
    ZeroOrMore,
}

impl fmt::Display for Cardinality {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Cardinality::ZeroOrOne => "zero-or-one",
            Cardinality::ExactlyOne => "exactly-one",
            Cardinality::ZeroOrMore => "zero-or-more",
        };
        f.write_str(name)
    }
}

/// Constraint over export definitions
pub type ExportPredicate = Arc<dyn Fn(&ExportDefinition) -> bool + Send + Sync>;

/// A query for exports
#[derive(Clone)]
pub struct ImportDefinition {
    contract: String,
    cardinality: Cardinality,
    constraint: Option<ExportPredicate>,
    radius: Option<ScopeRadius>,
}

impl ImportDefinition {
    /// Create an import for a contract
    pub fn new(contract: impl Into<String>, cardinality: Cardinality) -> Self {
        Self {
            contract: contract.into(),
            cardinality,
            constraint: None,
            radius: None,
        }
    }

    /// Import every export of a contract
    pub fn many(contract: impl Into<String>) -> Self {
        Self::new(contract, Cardinality::ZeroOrMore)
    }

    /// Import exactly one export of a contract
    pub fn single(contract: impl Into<String>) -> Self {
        Self::new(contract, Cardinality::ExactlyOne)
    }

    /// Import zero or one export of a contract
    pub fn optional(contract: impl Into<String>) -> Self {
        Self::new(contract, Cardinality::ZeroOrOne)
    }

    /// Add a constraint, AND-ed with any constraint already present
    pub fn with_constraint<F>(mut self, predicate: F) -> Self
    where
        F: Fn(&ExportDefinition) -> bool + Send + Sync + 'static,
    {
        let predicate: ExportPredicate = Arc::new(predicate);
        self.constraint = Some(match self.constraint.take() {
            None => predicate,
            Some(existing) => Arc::new(move |def: &ExportDefinition| {
                existing(def) && predicate(def)
            }),
        });
        self
    }

    /// Wrap this import so only exports admitted by `radius` match
    ///
    /// Wrapping an already scoped import keeps the existing predicate and
    /// AND-s the new radius onto it; the effective radius is the narrowest.
    pub fn scoped(&self, radius: ScopeRadius) -> Self {
        let mut wrapped = self
            .clone()
            .with_constraint(move |def: &ExportDefinition| radius.admits(def.scope_tag()));
        wrapped.radius = Some(match self.radius {
            Some(existing) => existing.narrowest(radius),
            None => radius,
        });
        wrapped
    }

    /// Contract name
    pub fn contract(&self) -> &str {
        &self.contract
    }

    /// Expected cardinality
    pub fn cardinality(&self) -> Cardinality {
        self.cardinality
    }

    /// Narrowest radius applied by scope wrapping, if any
    pub fn radius(&self) -> Option<ScopeRadius> {
        self.radius
    }

    /// Same query with a different cardinality
    pub fn with_cardinality(mut self, cardinality: Cardinality) -> Self {
        self.cardinality = cardinality;
        self
    }

    /// Whether an export definition satisfies this import
    pub fn is_satisfied_by(&self, definition: &ExportDefinition) -> bool {
        definition.contract() == self.contract
            && self
                .constraint
                .as_ref()
                .map(|constraint| constraint(definition))
                .unwrap_or(true)
    }
}

impl fmt::Debug for ImportDefinition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ImportDefinition")
            .field("contract", &self.contract)
            .field("cardinality", &self.cardinality)
            .field("constrained", &self.constraint.is_some())
            .field("radius", &self.radius)
            .finish()
    }
}
