//! Natural keys, node labels and relationship types.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Natural key of a node: the `id` property is unique per primary label.
///
/// This is what the loader addresses nodes by. Internal [`NodeId`]s are a
/// backend detail and never cross the adapter boundary.
///
/// [`NodeId`]: super::NodeId
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct NodeKey {
    pub label: String,
    pub id: String,
}

impl NodeKey {
    pub fn new(label: impl Into<String>, id: impl Into<String>) -> Self {
        Self { label: label.into(), id: id.into() }
    }

    pub fn entity(id: impl Into<String>) -> Self { Self::new(label::ENTITY, id) }
    pub fn product(id: impl Into<String>) -> Self { Self::new(label::PRODUCT, id) }
    pub fn region(id: impl Into<String>) -> Self { Self::new(label::GROWING_REGION, id) }
    pub fn state(code: impl Into<String>) -> Self { Self::new(label::STATE, code) }

    /// City keys are scoped by state: `"CA:salinas"`.
    pub fn city(state_code: &str, city: &str) -> Self {
        Self::new(label::CITY, format!("{state_code}:{}", slug(city)))
    }
}

impl fmt::Display for NodeKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.label, self.id)
    }
}

/// Lowercase, ASCII-alphanumeric, `_`-separated form of a display name.
pub fn slug(name: &str) -> String {
    let mut out = String::with_capacity(name.len());
    let mut pending_sep = false;
    for ch in name.trim().chars() {
        if ch.is_ascii_alphanumeric() {
            if pending_sep && !out.is_empty() {
                out.push('_');
            }
            out.push(ch.to_ascii_lowercase());
            pending_sep = false;
        } else {
            pending_sep = true;
        }
    }
    out
}

/// Primary node labels.
pub mod label {
    pub const ENTITY: &str = "Entity";
    pub const PRODUCT: &str = "Product";
    pub const GROWING_REGION: &str = "GrowingRegion";
    pub const STATE: &str = "State";
    pub const CITY: &str = "City";
    pub const ZONE: &str = "Zone";
    pub const CERTIFICATION: &str = "Certification";
    pub const CULTIVAR: &str = "Cultivar";
    pub const ROOTSTOCK: &str = "Rootstock";
    pub const QUALITY_TIER: &str = "QualityTier";
}

/// Relationship types written by the loader and the shipped rules.
pub mod rel {
    // Structural (upsert engine)
    pub const LOCATED_IN: &str = "LOCATED_IN";
    pub const IN_CITY: &str = "IN_CITY";

    // Linker
    pub const GROWS: &str = "GROWS";
    pub const SELLS: &str = "SELLS";
    pub const IN_GROWING_REGION: &str = "IN_GROWING_REGION";
    pub const SOURCES_FROM: &str = "SOURCES_FROM";

    // Taxonomy seed
    pub const IN_ZONE: &str = "IN_ZONE";
    pub const OF_PRODUCT: &str = "OF_PRODUCT";

    // Inference
    pub const IMPLIES: &str = "IMPLIES";
    pub const SUITABLE_FOR_ZONE: &str = "SUITABLE_FOR_ZONE";
    pub const HAS_QUALITY_TIER: &str = "HAS_QUALITY_TIER";
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_slug() {
        assert_eq!(slug("Salinas Valley"), "salinas_valley");
        assert_eq!(slug("  St. Augustine "), "st_augustine");
        assert_eq!(slug("Fort-Pierce"), "fort_pierce");
        assert_eq!(slug(""), "");
    }

    #[test]
    fn test_key_display() {
        assert_eq!(NodeKey::entity("acme_farm").to_string(), "Entity:acme_farm");
        assert_eq!(NodeKey::city("FL", "Vero Beach").id, "FL:vero_beach");
    }
}
