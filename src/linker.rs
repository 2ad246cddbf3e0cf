//! Relationship linker.
//!
//! Turns an upserted entity's declared references into structural edges:
//!
//! | Declared | Edge | Target |
//! |----------|------|--------|
//! | `products` | `GROWS` if the entity is a Grower, else `SELLS` | `Product` |
//! | `region` | `IN_GROWING_REGION` | `GrowingRegion` |
//! | `suppliers` | `SOURCES_FROM` (ids resolved through the crosswalk) | `Entity` |
//!
//! The GROWS/SELLS choice is made once per entity, so a Grower that also
//! retails records every product as GROWS.
//!
//! A reference whose target node is missing is skipped with a warning; the
//! remaining edges are still written.

use serde::{Deserialize, Serialize};
use smallvec::SmallVec;

use crate::crosswalk::Crosswalk;
use crate::model::*;
use crate::storage::GraphStore;
use crate::{Error, Result};

/// Relationship types owned by the linker.
pub const LINKED_TYPES: [&str; 4] = [rel::GROWS, rel::SELLS, rel::IN_GROWING_REGION, rel::SOURCES_FROM];

/// What happens to linker edges that the latest record no longer declares.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EdgePolicy {
    /// Edges accumulate across loads; nothing is retracted.
    #[default]
    Cumulative,
    /// Undeclared linker edges are deleted, like role labels.
    ExactSet,
}

/// An edge that could not be written.
#[derive(Debug, Clone, PartialEq)]
pub struct LinkSkip {
    pub rel_type: &'static str,
    pub target: NodeKey,
    pub reason: String,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct LinkReport {
    pub entity: String,
    /// Edges present after linking (created or matched).
    pub linked: usize,
    /// Of those, newly created.
    pub created: usize,
    /// Edges deleted under `EdgePolicy::ExactSet`.
    pub retracted: usize,
    pub skipped: Vec<LinkSkip>,
}

type PlannedEdges = SmallVec<[(&'static str, NodeKey); 8]>;

/// Product edge type for an entity.
pub fn product_rel_type(roles: &RoleSet) -> &'static str {
    if roles.contains(&Role::Grower) { rel::GROWS } else { rel::SELLS }
}

fn plan(entity: &CanonicalEntity, crosswalk: &Crosswalk) -> PlannedEdges {
    let mut edges = PlannedEdges::new();
    let mut push = |rel_type: &'static str, key: NodeKey| {
        if !edges.iter().any(|(t, k)| *t == rel_type && *k == key) {
            edges.push((rel_type, key));
        }
    };

    let product_rel = product_rel_type(&entity.roles);
    for product in entity.products.iter().map(|p| p.trim()).filter(|p| !p.is_empty()) {
        push(product_rel, NodeKey::product(product));
    }
    if let Some(region) = entity.region.as_deref().map(str::trim).filter(|r| !r.is_empty()) {
        push(rel::IN_GROWING_REGION, NodeKey::region(region));
    }
    for supplier in entity.suppliers.iter().map(|s| s.trim()).filter(|s| !s.is_empty()) {
        let canonical = crosswalk.resolve(supplier).into_canonical_id();
        if canonical != entity.id {
            push(rel::SOURCES_FROM, NodeKey::entity(canonical));
        }
    }
    edges
}

/// Write the structural edges of an already-upserted entity.
pub async fn link_entity<S: GraphStore + ?Sized>(
    store: &S,
    entity: &CanonicalEntity,
    crosswalk: &Crosswalk,
    policy: EdgePolicy,
) -> Result<LinkReport> {
    let from = NodeKey::entity(&entity.id);
    let planned = plan(entity, crosswalk);
    let mut report = LinkReport { entity: entity.id.clone(), ..Default::default() };

    for (rel_type, to) in planned.iter().map(|(t, k)| (*t, k)) {
        match store.upsert_edge(&from, rel_type, to, PropertyMap::new()).await {
            Ok(outcome) => {
                report.linked += 1;
                if outcome.created() {
                    report.created += 1;
                }
            }
            Err(Error::MissingReference { key, .. }) => {
                tracing::warn!(
                    record = %entity.id,
                    rel_type,
                    target = %to,
                    reason = "target not in graph",
                    "skipping edge"
                );
                report.skipped.push(LinkSkip {
                    rel_type,
                    target: to.clone(),
                    reason: format!("missing reference {key}"),
                });
            }
            Err(e) => return Err(e),
        }
    }

    if policy == EdgePolicy::ExactSet {
        for rel_type in LINKED_TYPES {
            for existing in store.outgoing_keys(&from, rel_type).await? {
                let declared = planned.iter().any(|(t, k)| *t == rel_type && *k == existing);
                if !declared && store.delete_edge(&from, rel_type, &existing).await? {
                    tracing::debug!(record = %entity.id, rel_type, target = %existing, "retracted edge");
                    report.retracted += 1;
                }
            }
        }
    }

    Ok(report)
}
