//! Resolved exports

use crate::definition::ExportDefinition;
use crate::identifiers::{NodeId, PartId};
use std::any::Any;
use std::fmt;
use std::sync::Arc;

/// Type-erased exported value
pub type ExportValue = Arc<dyn Any + Send + Sync>;

/// An export resolved by a query: definition, value and provenance
#[derive(Clone)]
pub struct Export {
    definition: ExportDefinition,
    value: ExportValue,
    part: Option<PartId>,
    origin: Option<NodeId>,
}

impl Export {
    /// Create an export from a definition and value
    pub fn new(definition: ExportDefinition, value: ExportValue) -> Self {
        Self {
            definition,
            value,
            part: None,
            origin: None,
        }
    }

    /// Record the part that produced this export
    pub fn from_part(mut self, part: PartId) -> Self {
        self.part = Some(part);
        self
    }

    /// Record the node whose local composition produced this export
    pub fn with_origin(mut self, node: NodeId) -> Self {
        self.origin = Some(node);
        self
    }

    /// Export definition
    pub fn definition(&self) -> &ExportDefinition {
        &self.definition
    }

    /// Contract name
    pub fn contract(&self) -> &str {
        self.definition.contract()
    }

    /// Raw value
    pub fn value(&self) -> &ExportValue {
        &self.value
    }

    /// Producing part, if known
    pub fn part(&self) -> Option<PartId> {
        self.part
    }

    /// Owning node, if known
    pub fn origin(&self) -> Option<NodeId> {
        self.origin
    }

    /// Downcast the value to a concrete type
    pub fn downcast<T: Any + Send + Sync>(&self) -> Option<Arc<T>> {
        Arc::clone(&self.value).downcast::<T>().ok()
    }
}

impl fmt::Debug for Export {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Export")
            .field("definition", &self.definition)
            .field("part", &self.part)
            .field("origin", &self.origin)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_downcast() {
        let export = Export::new(ExportDefinition::new("answer"), Arc::new(42u32));
        assert_eq!(export.downcast::<u32>().as_deref(), Some(&42));
        assert!(export.downcast::<String>().is_none());
    }
}
