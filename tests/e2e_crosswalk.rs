//! End-to-end tests for identity reconciliation and enrichment merges.

use fielder_graph::model::label;
use fielder_graph::seed::SeedNode;
use fielder_graph::{
    upsert_entity, CanonicalEntity, Crosswalk, CrosswalkRow, EntityPatch, Error, GraphStore,
    MemoryStore, NodeKey, Resolution, Role, RoleSet, SeedCatalog, UpsertMode, Value,
};
use pretty_assertions::assert_eq;
use proptest::prelude::*;

async fn store_with_salinas() -> MemoryStore {
    let store = MemoryStore::new();
    let mut catalog = SeedCatalog::new("geo");
    catalog.nodes.push(SeedNode::new(label::STATE, "CA"));
    catalog.load(&store).await.unwrap();

    let salinas = CanonicalEntity::new("salinas_valley_ca", "Salinas Valley Growers")
        .with_roles([Role::Grower, Role::Packinghouse])
        .with_state("CA");
    upsert_entity(&store, &salinas, UpsertMode::FullReplace).await.unwrap();
    store
}

fn crosswalk() -> Crosswalk {
    Crosswalk::from_rows([
        CrosswalkRow::mapped("california_coastal", "salinas_valley_ca"),
        CrosswalkRow::unmapped("bfa_new_farm"),
    ])
    .unwrap()
}

// ============================================================================
// 1. Mapped external id enriches the existing node
// ============================================================================

#[tokio::test]
async fn test_enrich_mapped_id_updates_existing_node() {
    let store = store_with_salinas().await;
    let cw = crosswalk();
    assert_eq!(cw.resolve("california_coastal"), Resolution::Mapped("salinas_valley_ca".into()));

    let before = store.stats().await.unwrap().node_count;
    let patch = EntityPatch {
        website: Some("https://salinas.example".into()),
        certifications: Some(vec!["usda_organic".into()]),
        ..Default::default()
    };
    let report = cw.enrich(&store, "california_coastal", &patch).await.unwrap();
    assert_eq!(report.id, "salinas_valley_ca");
    assert!(!report.outcome.created());

    assert_eq!(store.stats().await.unwrap().node_count, before);
    assert!(!store.node_exists(&NodeKey::entity("california_coastal")).await.unwrap());

    let node = store.get_node(&NodeKey::entity("salinas_valley_ca")).await.unwrap().unwrap();
    assert_eq!(node.get("website"), Some(&Value::from("https://salinas.example")));
    // Untouched by the patch.
    assert_eq!(node.get("name"), Some(&Value::from("Salinas Valley Growers")));
    assert_eq!(node.sorted_labels(), vec!["Entity", "Grower", "Packinghouse"]);
}

// ============================================================================
// 2. Enrichment against a missing canonical id
// ============================================================================

#[tokio::test]
async fn test_enrich_unmapped_missing_entity_is_not_found() {
    let store = store_with_salinas().await;
    let err = crosswalk()
        .enrich(&store, "bfa_new_farm", &EntityPatch::default())
        .await
        .unwrap_err();
    assert!(matches!(err, Error::NotFound(_)));
    assert!(!store.node_exists(&NodeKey::entity("bfa_new_farm")).await.unwrap());
}

// ============================================================================
// 3. Enrichment that supplies roles replaces them exactly
// ============================================================================

#[tokio::test]
async fn test_enrich_with_roles_replaces_role_set() {
    let store = store_with_salinas().await;
    let patch = EntityPatch { roles: Some([Role::Retailer].into()), ..Default::default() };
    let report = crosswalk().enrich(&store, "california_coastal", &patch).await.unwrap();
    assert_eq!(report.roles, RoleSet::from([Role::Retailer]));

    let node = store.get_node(&NodeKey::entity("salinas_valley_ca")).await.unwrap().unwrap();
    assert_eq!(node.sorted_labels(), vec!["Entity", "Retailer"]);
}

#[tokio::test]
async fn test_enrich_with_empty_roles_is_invalid() {
    let store = store_with_salinas().await;
    let patch = EntityPatch { roles: Some(Default::default()), ..Default::default() };
    let err = crosswalk().enrich(&store, "california_coastal", &patch).await.unwrap_err();
    assert!(matches!(err, Error::Validation { .. }));
}

// ============================================================================
// 4. Determinism
// ============================================================================

proptest! {
    #[test]
    fn prop_unknown_ids_resolve_to_themselves(
        table in prop::collection::hash_map("[a-z]{1,8}", prop::option::of("[a-z]{1,8}"), 0..16),
        lookup in "[a-z_]{1,12}",
    ) {
        let rows = table.iter().map(|(ext, canon)| CrosswalkRow {
            external_id: ext.clone(),
            canonical_id: canon.clone(),
        });
        let cw = Crosswalk::from_rows(rows).unwrap();

        let first = cw.resolve(&lookup);
        prop_assert_eq!(&first, &cw.resolve(&lookup));
        match table.get(&lookup) {
            Some(Some(canonical)) => prop_assert_eq!(first, Resolution::Mapped(canonical.clone())),
            _ => prop_assert_eq!(first, Resolution::Unmapped(lookup.clone())),
        }
    }
}
