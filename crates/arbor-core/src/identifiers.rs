//! Identifiers for controllers, nodes and parts

use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

macro_rules! uuid_identifier {
    ($(#[$meta:meta])* $name:ident, $prefix:literal) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        pub struct $name(pub Uuid);

        impl $name {
            /// Create a new random identifier
            pub fn new() -> Self {
                Self(Uuid::new_v4())
            }

            /// Create from a UUID
            pub fn from_uuid(uuid: Uuid) -> Self {
                Self(uuid)
            }

            /// Get the inner UUID
            pub fn uuid(&self) -> Uuid {
                self.0
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, concat!($prefix, "-{}"), self.0)
            }
        }

        impl From<Uuid> for $name {
            fn from(uuid: Uuid) -> Self {
                Self(uuid)
            }
        }
    };
}

uuid_identifier!(
    /// Identity of a controller; a node is keyed by its owner's identity
    ControllerId,
    "controller"
);

uuid_identifier!(
    /// Identity of a node in the composition hierarchy
    NodeId,
    "node"
);

uuid_identifier!(
    /// Identity of a composable part
    PartId,
    "part"
);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_identifiers_are_unique() {
        assert_ne!(ControllerId::new(), ControllerId::new());
        assert_ne!(NodeId::new(), NodeId::new());
    }

    #[test]
    fn test_display_prefix() {
        let id = PartId::from_uuid(Uuid::from_bytes([7u8; 16]));
        assert!(id.to_string().starts_with("part-"));
        assert_eq!(id.uuid(), Uuid::from_bytes([7u8; 16]));
    }
}
