//! Entity upsert engine.
//!
//! `upsert_entity` MERGEs a canonical entity by its natural key and then
//! reconciles it to the incoming record:
//!
//! 1. the node is created if absent;
//! 2. every label of the whole role universe is cleared, not just the roles
//!    being applied, so a role dropped from the input really disappears;
//! 3. exactly the declared roles are applied;
//! 4. properties are overwritten (FULL_REPLACE) or merged (ENRICH_MERGE);
//! 5. the `LOCATED_IN` edge to the declared state is ensured.
//!
//! Afterwards the node's role labels equal the declared role set. Geography
//! is never created here: an undeclared state node is a `MissingReference`
//! and nothing is written.

use chrono::Utc;

use crate::model::*;
use crate::storage::{GraphStore, PropertyWrite, WriteOutcome};
use crate::{Error, Result};

/// What a single upsert did.
#[derive(Debug, Clone, PartialEq)]
pub struct UpsertReport {
    pub id: String,
    pub outcome: WriteOutcome,
    /// Roles on the node after the write.
    pub roles: RoleSet,
    /// Non-fatal integrity warnings (e.g. a city that is not in the catalog).
    pub warnings: Vec<String>,
}

/// Upsert a canonical entity.
///
/// FULL_REPLACE overwrites every attribute; ENRICH_MERGE writes only the
/// fields the record actually carries (non-empty) and requires the node to
/// exist already.
pub async fn upsert_entity<S: GraphStore + ?Sized>(
    store: &S,
    entity: &CanonicalEntity,
    mode: UpsertMode,
) -> Result<UpsertReport> {
    entity.validate()?;

    if mode == UpsertMode::EnrichMerge {
        return enrich_entity(store, &entity.id, &EntityPatch::from(entity)).await;
    }

    let key = NodeKey::entity(&entity.id);
    let state = resolve_location(store, &entity.id, entity.state_code.as_deref()).await?;

    let roles = role_labels(&entity.roles);
    let outcome = store
        .upsert_node(
            &key,
            &roles,
            &Role::universe_labels(),
            entity.to_properties(Utc::now()),
            PropertyWrite::Replace,
        )
        .await?;

    let mut warnings = Vec::new();
    link_location(store, &key, state.as_ref(), entity.city.as_deref(), &mut warnings).await?;

    tracing::debug!(id = %entity.id, ?outcome, roles = ?roles, "entity upserted");
    Ok(UpsertReport { id: entity.id.clone(), outcome, roles: entity.roles.clone(), warnings })
}

/// ENRICH_MERGE a partial record into an existing canonical entity.
///
/// Supplied fields overwrite; absent fields are left untouched. A supplied
/// role set replaces the role labels exactly. Fails with `NotFound` when
/// `canonical_id` does not exist.
pub async fn enrich_entity<S: GraphStore + ?Sized>(
    store: &S,
    canonical_id: &str,
    patch: &EntityPatch,
) -> Result<UpsertReport> {
    if canonical_id.trim().is_empty() {
        return Err(Error::Validation {
            record: String::new(),
            reason: "enrichment target id is empty".into(),
        });
    }
    patch.validate(canonical_id)?;

    let key = NodeKey::entity(canonical_id);
    let existing = store
        .get_node(&key)
        .await?
        .ok_or_else(|| Error::NotFound(format!("canonical entity '{canonical_id}'")))?;

    // A new city is keyed under the patch's state, else the stored one.
    let relocate = patch.state_code.as_deref().and_then(normalize_state_code).is_some()
        || patch.city.is_some();
    let state = if relocate {
        let code = patch
            .state_code
            .as_deref()
            .or_else(|| existing.get("stateCode").and_then(Value::as_str));
        resolve_location(store, canonical_id, code).await?
    } else {
        None
    };

    let outcome = store
        .upsert_node(&key, &[], &[], patch.to_properties(Utc::now()), PropertyWrite::Merge)
        .await?;
    if let Some(roles) = &patch.roles {
        store.set_roles(&key, &Role::universe_labels(), &role_labels(roles)).await?;
    }

    let mut warnings = Vec::new();
    if relocate {
        let city = patch.city.as_deref().or_else(|| existing.get("city").and_then(Value::as_str));
        link_location(store, &key, state.as_ref(), city, &mut warnings).await?;
    }

    let roles = patch.roles.clone().unwrap_or_else(|| existing.roles());
    tracing::debug!(id = canonical_id, ?outcome, "entity enriched");
    Ok(UpsertReport { id: canonical_id.to_string(), outcome, roles, warnings })
}

/// Look up the declared state node. `None` when no state is declared.
async fn resolve_location<S: GraphStore + ?Sized>(
    store: &S,
    record: &str,
    state_code: Option<&str>,
) -> Result<Option<NodeKey>> {
    let Some(code) = state_code.and_then(normalize_state_code) else {
        return Ok(None);
    };
    let key = NodeKey::state(code);
    if !store.node_exists(&key).await? {
        return Err(Error::MissingReference {
            context: format!("location of entity '{record}'"),
            key: key.to_string(),
        });
    }
    Ok(Some(key))
}

/// Ensure the single `LOCATED_IN` edge (and `IN_CITY` when the city is in
/// the catalog). A location is single-valued: edges to a previous state or
/// city are removed.
async fn link_location<S: GraphStore + ?Sized>(
    store: &S,
    entity: &NodeKey,
    state: Option<&NodeKey>,
    city: Option<&str>,
    warnings: &mut Vec<String>,
) -> Result<()> {
    let city_key = match (state, city.map(str::trim).filter(|c| !c.is_empty())) {
        (Some(state), Some(city)) => {
            let key = NodeKey::city(&state.id, city);
            if store.node_exists(&key).await? {
                Some(key)
            } else {
                tracing::warn!(entity = %entity.id, city = %key, "city not in geography catalog");
                warnings.push(format!("city {key} not in geography catalog"));
                None
            }
        }
        _ => None,
    };

    replace_single_edge(store, entity, rel::LOCATED_IN, state).await?;
    replace_single_edge(store, entity, rel::IN_CITY, city_key.as_ref()).await
}

async fn replace_single_edge<S: GraphStore + ?Sized>(
    store: &S,
    from: &NodeKey,
    rel_type: &str,
    to: Option<&NodeKey>,
) -> Result<()> {
    for stale in store.outgoing_keys(from, rel_type).await? {
        if Some(&stale) != to {
            store.delete_edge(from, rel_type, &stale).await?;
        }
    }
    if let Some(to) = to {
        store.upsert_edge(from, rel_type, to, PropertyMap::new()).await?;
    }
    Ok(())
}

impl From<&CanonicalEntity> for EntityPatch {
    /// Fields the record actually carries: non-empty strings and lists.
    fn from(e: &CanonicalEntity) -> Self {
        fn some_str(s: &str) -> Option<String> {
            (!s.trim().is_empty()).then(|| s.to_string())
        }
        fn some_vec(v: &[String]) -> Option<Vec<String>> {
            (!v.is_empty()).then(|| v.to_vec())
        }
        EntityPatch {
            name: some_str(&e.name),
            roles: (!e.roles.is_empty()).then(|| e.roles.clone()),
            city: e.city.clone(),
            state_code: e.state_code.clone(),
            coordinates: e.coordinates,
            website: e.website.clone(),
            facility_types: some_vec(&e.facility_types),
            retail_channels: some_vec(&e.retail_channels),
            b2b_channels: some_vec(&e.b2b_channels),
            certifications: some_vec(&e.certifications),
            features: some_vec(&e.features),
            verification_level: (e.verification_level != VerificationLevel::Unverified)
                .then_some(e.verification_level),
            data_source: e.data_source.clone(),
        }
    }
}
