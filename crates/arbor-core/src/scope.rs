//! Export visibility scopes
//!
//! Every export carries an optional [`Scope`] tag. A missing tag means
//! [`Scope::Public`]. Scope filters admit an export when its tag value is
//! strictly below the filter's [`ScopeRadius`].

use serde::{Deserialize, Serialize};
use std::fmt;

/// Visibility classification of an export, least restrictive first
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum Scope {
    /// Visible from every node in the tree
    #[default]
    Public = 0,
    /// Visible within the subtree of the owner's parent
    Internal = 1,
    /// Visible within the owner's own subtree
    Protected = 2,
    /// Visible only to the owner
    Private = 3,
}

impl Scope {
    /// Numeric tag value used for radius comparisons
    pub fn value(self) -> u8 {
        self as u8
    }

    /// Resolve an optional tag, treating absence as public
    pub fn or_public(tag: Option<Scope>) -> Scope {
        tag.unwrap_or_default()
    }

    /// All scopes, least restrictive first
    pub fn all() -> [Scope; 4] {
        [Scope::Public, Scope::Internal, Scope::Protected, Scope::Private]
    }

    /// Lowercase name
    pub fn as_str(self) -> &'static str {
        match self {
            Scope::Public => "public",
            Scope::Internal => "internal",
            Scope::Protected => "protected",
            Scope::Private => "private",
        }
    }
}

impl fmt::Display for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Visibility threshold of a scope filter
///
/// A filter at radius `r` admits an export iff its scope tag value is
/// strictly less than `r`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum ScopeRadius {
    /// Radius 1: public exports only
    Public = 1,
    /// Radius 2: public and internal exports
    Internal = 2,
    /// Radius 3: everything except private exports
    Protected = 3,
}

impl ScopeRadius {
    /// Numeric threshold
    pub fn value(self) -> u8 {
        self as u8
    }

    /// Whether an export with the given (optional) tag passes this radius
    pub fn admits(self, tag: Option<Scope>) -> bool {
        Scope::or_public(tag).value() < self.value()
    }

    /// The more restrictive of two radii
    pub fn narrowest(self, other: ScopeRadius) -> ScopeRadius {
        self.min(other)
    }

    /// All radii, narrowest first
    pub fn all() -> [ScopeRadius; 3] {
        [
            ScopeRadius::Public,
            ScopeRadius::Internal,
            ScopeRadius::Protected,
        ]
    }
}

impl fmt::Display for ScopeRadius {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ScopeRadius::Public => "public",
            ScopeRadius::Internal => "internal",
            ScopeRadius::Protected => "protected",
        };
        write!(f, "{name}({})", self.value())
    }
}
