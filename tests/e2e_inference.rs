//! End-to-end tests for the inference rule engine.

use fielder_graph::inference::{self, DerivedAttribute};
use fielder_graph::model::{label, rel, PropertyMap};
use fielder_graph::{
    GraphStore, Implication, MemoryStore, NodeKey, Pattern, PropagationRule, PropertyWrite, Rule,
    RuleSet, SkipKind, Value,
};
use pretty_assertions::assert_eq;

async fn put(store: &MemoryStore, key: NodeKey, props: PropertyMap) {
    store.upsert_node(&key, &[], &[], props, PropertyWrite::Merge).await.unwrap();
}

fn cert(id: &str) -> NodeKey {
    NodeKey::new(label::CERTIFICATION, id)
}

async fn holder(store: &MemoryStore, id: &str, certs: &[&str]) {
    let props = fielder_graph::model::props([("certifications", Value::from(certs.to_vec()))]);
    put(store, NodeKey::entity(id), props).await;
}

// ============================================================================
// 1. Propagation is idempotent across passes
// ============================================================================

#[tokio::test]
async fn test_implication_created_once_over_two_passes() {
    let store = MemoryStore::new();
    put(&store, cert("usda_organic"), PropertyMap::new()).await;
    put(&store, cert("non_gmo"), PropertyMap::new()).await;
    holder(&store, "acme_farm", &["usda_organic"]).await;

    let rules = RuleSet::from_rules([Rule::from(PropagationRule::new(
        "certs",
        vec![Implication::new("usda_organic", "non_gmo", "organic prohibits GMOs")],
    ))])
    .unwrap();

    let first = rules.run(&store).await.unwrap();
    let second = rules.run(&store).await.unwrap();
    assert_eq!(first.created(), 1);
    assert_eq!(second.created(), 0);
    assert_eq!(second.produced(), 1);

    let rows = store.query(&Pattern::edges(rel::IMPLIES)).await.unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].key("a").unwrap(), &cert("usda_organic"));
    assert_eq!(rows[0].key("b").unwrap(), &cert("non_gmo"));
    assert_eq!(rows[0].get::<String>("r.reason").unwrap(), "organic prohibits GMOs");
    assert_eq!(rows[0].get::<f64>("r.confidence").unwrap(), 1.0);
    assert_eq!(rows[0].get::<String>("r.rule").unwrap(), "certs");
}

#[tokio::test]
async fn test_implication_only_for_held_certifications() {
    let store = MemoryStore::new();
    for id in ["usda_organic", "non_gmo", "demeter_biodynamic"] {
        put(&store, cert(id), PropertyMap::new()).await;
    }
    holder(&store, "acme_farm", &["usda_organic"]).await;
    // A plain string is not a certification list.
    put(
        &store,
        NodeKey::entity("odd_farm"),
        fielder_graph::model::props([("certifications", Value::from("demeter_biodynamic"))]),
    )
    .await;

    let rules = RuleSet::from_rules([Rule::from(inference::certification_implications())]).unwrap();
    let pass = rules.run(&store).await.unwrap();
    assert_eq!(pass.rules[0].matched, 1);
    assert_eq!(pass.created(), 1);

    assert!(store.outgoing_keys(&cert("demeter_biodynamic"), rel::IMPLIES).await.unwrap().is_empty());
    assert_eq!(store.outgoing_keys(&cert("usda_organic"), rel::IMPLIES).await.unwrap(), vec![cert("non_gmo")]);
    assert!(!store.node_exists(&cert("no_synthetic_pesticides")).await.unwrap());
}

// ============================================================================
// 2. One hop per run
// ============================================================================

#[tokio::test]
async fn test_chained_implications_are_not_transitive() {
    let store = MemoryStore::new();
    for id in ["a", "y", "z"] {
        put(&store, cert(id), PropertyMap::new()).await;
    }
    holder(&store, "acme_farm", &["a"]).await;
    holder(&store, "beta_farm", &["y"]).await;
    let rules = RuleSet::from_rules([Rule::from(PropagationRule::new(
        "chain",
        vec![Implication::new("a", "y", "a implies y"), Implication::new("y", "z", "y implies z")],
    ))])
    .unwrap();
    rules.run(&store).await.unwrap();

    assert_eq!(store.outgoing_keys(&cert("a"), rel::IMPLIES).await.unwrap(), vec![cert("y")]);
    assert_eq!(store.outgoing_keys(&cert("y"), rel::IMPLIES).await.unwrap(), vec![cert("z")]);
    assert!(!store.outgoing_keys(&cert("a"), rel::IMPLIES).await.unwrap().contains(&cert("z")));
}

// ============================================================================
// 3. Binning boundaries
// ============================================================================

#[tokio::test]
async fn test_brix_bins_assign_expected_tiers() {
    let store = MemoryStore::new();
    let samples = [("trifoliate", -0.5), ("carrizo", 0.0), ("sour_orange", 0.3), ("swingle", 0.29)];
    for (id, brix) in samples {
        put(
            &store,
            NodeKey::new(label::ROOTSTOCK, id),
            fielder_graph::model::props([("brixModifier", Value::from(brix))]),
        )
        .await;
    }

    let rules = RuleSet::from_rules([Rule::from(inference::rootstock_quality_tiers().unwrap())]).unwrap();
    let pass = rules.run(&store).await.unwrap();
    assert_eq!(pass.rules[0].matched, 4);
    assert_eq!(pass.rules[0].created, 4);

    let tier_of = |id: &'static str| {
        let store = store.clone();
        async move {
            store
                .outgoing_keys(&NodeKey::new(label::ROOTSTOCK, id), rel::HAS_QUALITY_TIER)
                .await
                .unwrap()
        }
    };
    let tier = |t: &str| vec![NodeKey::new(label::QUALITY_TIER, t)];
    assert_eq!(tier_of("trifoliate").await, tier("yield"));
    assert_eq!(tier_of("carrizo").await, tier("standard"));
    assert_eq!(tier_of("sour_orange").await, tier("premium"));
    assert_eq!(tier_of("swingle").await, tier("standard"));
}

#[tokio::test]
async fn test_non_numeric_value_is_skipped() {
    let store = MemoryStore::new();
    put(
        &store,
        NodeKey::new(label::ROOTSTOCK, "mystery"),
        fielder_graph::model::props([("brixModifier", Value::from("high"))]),
    )
    .await;

    let rules = RuleSet::from_rules([Rule::from(inference::rootstock_quality_tiers().unwrap())]).unwrap();
    let pass = rules.run(&store).await.unwrap();
    assert_eq!(pass.rules[0].skipped, 1);
    assert!(!pass.rules[0].failed());
}

// ============================================================================
// 4. Partial-failure isolation with data-driven rules
// ============================================================================

#[tokio::test]
async fn test_ambiguous_bin_isolated_to_its_rule() {
    let store = MemoryStore::new();
    put(
        &store,
        NodeKey::new(label::ROOTSTOCK, "outlier"),
        fielder_graph::model::props([("brixModifier", Value::from(99.0))]),
    )
    .await;
    put(&store, cert("usda_organic"), PropertyMap::new()).await;
    put(&store, cert("non_gmo"), PropertyMap::new()).await;
    holder(&store, "acme_farm", &["usda_organic"]).await;

    let json = r#"[
        {"kind": "binning", "name": "bounded_tiers", "label": "Rootstock",
         "property": "brixModifier", "reason": "bounded",
         "bins": [{"lower": 0.0, "upper": 1.0, "tier": "narrow"}]},
        {"kind": "propagation", "name": "certs",
         "implications": [{"from": "usda_organic", "to": "non_gmo", "reason": "organic"}]}
    ]"#;
    let rules = RuleSet::from_reader(json.as_bytes()).unwrap();
    let pass = rules.run(&store).await.unwrap();

    let failed: Vec<&str> = pass.failed_rules().map(|r| r.rule.as_str()).collect();
    assert_eq!(failed, vec!["bounded_tiers"]);
    assert_eq!(pass.get("bounded_tiers").unwrap().error_kind, Some(SkipKind::AmbiguousBin));
    assert_eq!(pass.get("certs").unwrap().created, 1);
}

// ============================================================================
// 5. Derived attributes are read-side only
// ============================================================================

#[tokio::test]
async fn test_derived_zone_follows_region_mapping() {
    let store = MemoryStore::new();
    let entity = NodeKey::entity("grove");
    let region = NodeKey::region("indian_river");
    let z9 = NodeKey::new(label::ZONE, "9");
    let z10 = NodeKey::new(label::ZONE, "10");
    put(&store, entity.clone(), PropertyMap::new()).await;
    put(&store, region.clone(), PropertyMap::new()).await;
    put(&store, z9.clone(), fielder_graph::model::props([("usdaZone", Value::from(9i64))])).await;
    put(&store, z10.clone(), fielder_graph::model::props([("usdaZone", Value::from(10i64))])).await;
    store.upsert_edge(&entity, rel::IN_GROWING_REGION, &region, PropertyMap::new()).await.unwrap();
    store.upsert_edge(&region, rel::IN_ZONE, &z9, PropertyMap::new()).await.unwrap();

    let zone = DerivedAttribute::usda_zone();
    let before_rels = store.stats().await.unwrap().relationship_count;
    assert_eq!(zone.for_node(&store, &entity).await.unwrap(), vec![Value::Int(9)]);
    assert_eq!(store.stats().await.unwrap().relationship_count, before_rels);

    // Re-point the region; the derived value follows without any rewrite.
    store.delete_edge(&region, rel::IN_ZONE, &z9).await.unwrap();
    store.upsert_edge(&region, rel::IN_ZONE, &z10, PropertyMap::new()).await.unwrap();
    assert_eq!(zone.for_node(&store, &entity).await.unwrap(), vec![Value::Int(10)]);

    let all = zone.evaluate(&store).await.unwrap();
    assert_eq!(all.len(), 1);
    assert_eq!(all[0].via, region);
}
