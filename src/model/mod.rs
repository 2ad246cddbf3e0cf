//! # Property Graph Model
//!
//! Clean DTOs that cross every boundary: input files ↔ upsert engine ↔
//! linker ↔ inference ↔ storage.
//!
//! Pure data: no I/O, no state, no async.

pub mod node;
pub mod relationship;
pub mod value;
pub mod property_map;
pub mod key;
pub mod entity;

pub use node::{Node, NodeId, Labels};
pub use relationship::{Relationship, RelId};
pub use value::Value;
pub use property_map::{PropertyMap, props};
pub use key::{NodeKey, slug, label, rel};
pub use entity::{
    CanonicalEntity, EntityPatch, Coordinates,
    Role, RoleSet, role_labels, normalize_state_code, VerificationLevel, UpsertMode,
};
