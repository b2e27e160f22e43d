//! Composable parts and composition batches

use crate::definition::ExportDefinition;
use crate::errors::Result;
use crate::export::ExportValue;
use crate::identifiers::PartId;
use std::fmt;
use std::sync::Arc;

/// A unit of composition: a set of export definitions backed by values
pub trait ComposablePart: Send + Sync {
    /// Stable identity of this part
    fn id(&self) -> PartId;

    /// Exports this part offers
    fn export_definitions(&self) -> &[ExportDefinition];

    /// Produce the value for one of this part's export definitions
    fn export_value(&self, definition: &ExportDefinition) -> Result<ExportValue>;

    /// Release resources held by the part
    fn dispose(&self) -> Result<()> {
        Ok(())
    }
}

/// Shared handle to a part
pub type PartRef = Arc<dyn ComposablePart>;

/// Parts to add and remove in a single transactional update
#[derive(Default, Clone)]
pub struct CompositionBatch {
    parts_to_add: Vec<PartRef>,
    parts_to_remove: Vec<PartId>,
}

impl CompositionBatch {
    /// Create an empty batch
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a part for addition
    pub fn add_part(mut self, part: PartRef) -> Self {
        self.parts_to_add.push(part);
        self
    }

    /// Queue a part for removal
    pub fn remove_part(mut self, part: PartId) -> Self {
        self.parts_to_remove.push(part);
        self
    }

    /// Parts queued for addition
    pub fn parts_to_add(&self) -> &[PartRef] {
        &self.parts_to_add
    }

    /// Parts queued for removal
    pub fn parts_to_remove(&self) -> &[PartId] {
        &self.parts_to_remove
    }

    /// Whether the batch changes nothing
    pub fn is_empty(&self) -> bool {
        self.parts_to_add.is_empty() && self.parts_to_remove.is_empty()
    }
}

impl fmt::Debug for CompositionBatch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CompositionBatch")
            .field(
                "parts_to_add",
                &self.parts_to_add.iter().map(|p| p.id()).collect::<Vec<_>>(),
            )
            .field("parts_to_remove", &self.parts_to_remove)
            .finish()
    }
}
