//! Configuration for the composition hierarchy

mod hierarchy;
mod traits;

pub use hierarchy::HierarchyConfig;
pub use traits::ArborConfig;
