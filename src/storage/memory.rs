//! In-memory storage backend.
//!
//! This is the reference implementation of `GraphStore`.
//! It keeps the whole graph in hash maps behind a single `RwLock`.
//!
//! ## Guarantees
//!
//! - **Atomic single writes**: every `upsert_node` / `upsert_edge` /
//!   `delete_edge` holds the write lock for its full duration, so a write is
//!   either fully applied or not at all, and writes to the same natural key
//!   are serialized.
//! - **Read-your-writes**: writes are visible to the next read immediately.
//! - **No persistence**: the graph lives as long as the store.
//!
//! `set_offline(true)` simulates a lost connection: connectivity checks fail
//! and every other call returns a transient `Error::Store`.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use hashbrown::{HashMap, HashSet};
use parking_lot::RwLock;

use crate::model::*;
use crate::{Error, Result};
use super::{GraphStats, GraphStore, Pattern, PropertyWrite, Record, WriteOutcome};

// ============================================================================
// MemoryStore
// ============================================================================

/// In-memory property graph storage. Cloning shares the same graph.
#[derive(Clone, Default)]
pub struct MemoryStore {
    inner: Arc<MemoryInner>,
}

#[derive(Default)]
struct MemoryInner {
    graph: RwLock<GraphState>,
    next_node_id: AtomicU64,
    next_rel_id: AtomicU64,
    offline: AtomicBool,
}

#[derive(Default)]
struct GraphState {
    nodes: HashMap<NodeId, Node>,
    /// natural key → node id (the uniqueness constraint)
    key_index: HashMap<NodeKey, NodeId>,
    relationships: HashMap<RelId, Relationship>,
    /// node_id → relationship ids touching the node (both directions)
    adjacency: HashMap<NodeId, Vec<RelId>>,
    /// (src, type, dst) → relationship id, the MERGE key
    edge_index: HashMap<(NodeId, String, NodeId), RelId>,
    /// label → node ids in insertion order (poor man's label index)
    label_index: HashMap<String, Vec<NodeId>>,
    unique_labels: HashSet<String>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Simulate losing (or regaining) the backend connection.
    pub fn set_offline(&self, offline: bool) {
        self.inner.offline.store(offline, Ordering::SeqCst);
    }

    /// Labels declared unique via `ensure_unique_key`, sorted.
    pub fn unique_labels(&self) -> Vec<String> {
        let mut labels: Vec<String> =
            self.inner.graph.read().unique_labels.iter().cloned().collect();
        labels.sort();
        labels
    }

    fn check_online(&self) -> Result<()> {
        if self.inner.offline.load(Ordering::SeqCst) {
            return Err(Error::Store("memory store is offline".into()));
        }
        Ok(())
    }

    fn next_node_id(&self) -> NodeId {
        NodeId(self.inner.next_node_id.fetch_add(1, Ordering::Relaxed) + 1)
    }

    fn next_rel_id(&self) -> RelId {
        RelId(self.inner.next_rel_id.fetch_add(1, Ordering::Relaxed) + 1)
    }
}

// ============================================================================
// GraphState helpers (called with the lock held)
// ============================================================================

impl GraphState {
    fn node_by_key(&self, key: &NodeKey) -> Option<&Node> {
        self.key_index.get(key).and_then(|id| self.nodes.get(id))
    }

    fn index_label(&mut self, label: &str, id: NodeId) {
        let ids = self.label_index.entry(label.to_string()).or_default();
        if !ids.contains(&id) {
            ids.push(id);
        }
    }

    fn unindex_label(&mut self, label: &str, id: NodeId) {
        if let Some(ids) = self.label_index.get_mut(label) {
            ids.retain(|nid| *nid != id);
            if ids.is_empty() {
                self.label_index.remove(label);
            }
        }
    }

    fn outgoing(&self, node: NodeId, rel_type: &str) -> Vec<&Relationship> {
        let mut rels: Vec<&Relationship> = self.adjacency
            .get(&node)
            .into_iter()
            .flatten()
            .filter_map(|rid| self.relationships.get(rid))
            .filter(|r| r.src == node && r.rel_type == rel_type)
            .collect();
        rels.sort_by_key(|r| r.id.0);
        rels
    }

    fn nodes_with_label(&self, label: &str) -> Vec<&Node> {
        self.label_index
            .get(label)
            .into_iter()
            .flatten()
            .filter_map(|id| self.nodes.get(id))
            .collect()
    }
}

/// Apply property writes. `Null` never gets stored.
fn write_properties(node: &mut Node, props: PropertyMap, write: PropertyWrite) {
    if write == PropertyWrite::Replace {
        node.properties.retain(|k, _| k == "id");
    }
    for (k, v) in props {
        if k == "id" {
            continue;
        }
        if v.is_null() {
            node.properties.remove(&k);
        } else {
            node.properties.insert(k, v);
        }
    }
}

// ============================================================================
// GraphStore impl
// ============================================================================

#[async_trait]
impl GraphStore for MemoryStore {
    async fn verify_connectivity(&self) -> Result<()> {
        if self.inner.offline.load(Ordering::SeqCst) {
            return Err(Error::Connectivity("memory store is offline".into()));
        }
        Ok(())
    }

    async fn ensure_unique_key(&self, label: &str) -> Result<()> {
        self.check_online()?;
        self.inner.graph.write().unique_labels.insert(label.to_string());
        Ok(())
    }

    // ========================================================================
    // Nodes
    // ========================================================================

    async fn upsert_node(
        &self,
        key: &NodeKey,
        labels_to_add: &[&str],
        label_universe_to_clear: &[&str],
        props: PropertyMap,
        write: PropertyWrite,
    ) -> Result<WriteOutcome> {
        self.check_online()?;
        let mut graph = self.inner.graph.write();

        let (id, outcome) = match graph.key_index.get(key).copied() {
            Some(id) => (id, WriteOutcome::Matched),
            None => {
                let id = self.next_node_id();
                let node = Node::new(id, key.clone()).with_property("id", key.id.as_str());
                graph.nodes.insert(id, node);
                graph.key_index.insert(key.clone(), id);
                graph.adjacency.insert(id, Vec::new());
                graph.index_label(&key.label, id);
                (id, WriteOutcome::Created)
            }
        };

        let (before, after) = {
            let node = graph.nodes.get_mut(&id)
                .ok_or_else(|| Error::NotFound(format!("Node {id}")))?;
            let before: Vec<String> = node.labels.iter().cloned().collect();

            // The primary label is part of the natural key and never cleared.
            node.labels.retain(|l| l == &key.label || !label_universe_to_clear.contains(&l.as_str()));
            for label in labels_to_add {
                if !node.has_label(label) {
                    node.labels.push(label.to_string());
                }
            }

            write_properties(node, props, write);
            (before, node.labels.iter().cloned().collect::<Vec<_>>())
        };

        for label in before.iter().filter(|l| !after.contains(l)) {
            graph.unindex_label(label, id);
        }
        for label in after.iter().filter(|l| !before.contains(l)) {
            graph.index_label(label, id);
        }

        Ok(outcome)
    }

    async fn get_node(&self, key: &NodeKey) -> Result<Option<Node>> {
        self.check_online()?;
        Ok(self.inner.graph.read().node_by_key(key).cloned())
    }

    // ========================================================================
    // Relationships
    // ========================================================================

    async fn upsert_edge(
        &self,
        from: &NodeKey,
        rel_type: &str,
        to: &NodeKey,
        props: PropertyMap,
    ) -> Result<WriteOutcome> {
        self.check_online()?;
        let mut graph = self.inner.graph.write();

        let src = *graph.key_index.get(from).ok_or_else(|| Error::MissingReference {
            context: format!("{from} -{rel_type}->"),
            key: from.to_string(),
        })?;
        let dst = *graph.key_index.get(to).ok_or_else(|| Error::MissingReference {
            context: format!("{from} -{rel_type}->"),
            key: to.to_string(),
        })?;

        let merge_key = (src, rel_type.to_string(), dst);
        if let Some(rid) = graph.edge_index.get(&merge_key).copied() {
            let rel = graph.relationships.get_mut(&rid)
                .ok_or_else(|| Error::NotFound(format!("Relationship {rid}")))?;
            for (k, v) in props {
                if v.is_null() {
                    rel.properties.remove(&k);
                } else {
                    rel.properties.insert(k, v);
                }
            }
            return Ok(WriteOutcome::Matched);
        }

        let id = self.next_rel_id();
        let mut rel = Relationship::new(id, src, dst, rel_type);
        rel.properties = props.into_iter().filter(|(_, v)| !v.is_null()).collect();

        graph.relationships.insert(id, rel);
        graph.edge_index.insert(merge_key, id);
        graph.adjacency.entry(src).or_default().push(id);
        if src != dst {
            graph.adjacency.entry(dst).or_default().push(id);
        }

        Ok(WriteOutcome::Created)
    }

    async fn delete_edge(&self, from: &NodeKey, rel_type: &str, to: &NodeKey) -> Result<bool> {
        self.check_online()?;
        let mut graph = self.inner.graph.write();

        let (Some(src), Some(dst)) = (graph.key_index.get(from).copied(), graph.key_index.get(to).copied())
        else {
            return Ok(false);
        };
        let Some(rid) = graph.edge_index.remove(&(src, rel_type.to_string(), dst)) else {
            return Ok(false);
        };

        graph.relationships.remove(&rid);
        for endpoint in [src, dst] {
            if let Some(rels) = graph.adjacency.get_mut(&endpoint) {
                rels.retain(|r| *r != rid);
            }
        }
        Ok(true)
    }

    // ========================================================================
    // Reads
    // ========================================================================

    async fn query(&self, pattern: &Pattern) -> Result<Vec<Record>> {
        self.check_online()?;
        let graph = self.inner.graph.read();
        let mut rows = Vec::new();

        match pattern {
            Pattern::Nodes { label, filters } => {
                for node in graph.nodes_with_label(label) {
                    if filters.iter().all(|f| f.matches(&node.properties)) {
                        let mut row = Record::default();
                        row.bind_node("n", node);
                        rows.push(row);
                    }
                }
            }

            Pattern::Edges { from_label, rel_type, to_label } => {
                let mut rels: Vec<&Relationship> = graph.relationships
                    .values()
                    .filter(|r| &r.rel_type == rel_type)
                    .collect();
                rels.sort_by_key(|r| r.id.0);

                for rel in rels {
                    let (Some(a), Some(b)) = (graph.nodes.get(&rel.src), graph.nodes.get(&rel.dst)) else {
                        continue;
                    };
                    let label_ok = |want: &Option<String>, n: &Node| {
                        want.as_deref().is_none_or(|l| n.has_label(l))
                    };
                    if label_ok(from_label, a) && label_ok(to_label, b) {
                        let mut row = Record::default();
                        row.bind_node("a", a);
                        row.bind_relationship("r", rel);
                        row.bind_node("b", b);
                        rows.push(row);
                    }
                }
            }

            Pattern::Outgoing { from, rel_type } => {
                if let Some(src) = graph.key_index.get(from).copied() {
                    for rel in graph.outgoing(src, rel_type) {
                        if let Some(b) = graph.nodes.get(&rel.dst) {
                            let mut row = Record::default();
                            row.bind_relationship("r", rel);
                            row.bind_node("b", b);
                            rows.push(row);
                        }
                    }
                }
            }

            Pattern::TwoHop { from_label, first, second } => {
                for a in graph.nodes_with_label(from_label) {
                    for r1 in graph.outgoing(a.id, first) {
                        let Some(b) = graph.nodes.get(&r1.dst) else { continue };
                        for r2 in graph.outgoing(b.id, second) {
                            let Some(c) = graph.nodes.get(&r2.dst) else { continue };
                            let mut row = Record::default();
                            row.bind_node("a", a);
                            row.bind_node("b", b);
                            row.bind_node("c", c);
                            rows.push(row);
                        }
                    }
                }
            }
        }

        Ok(rows)
    }

    async fn stats(&self) -> Result<GraphStats> {
        self.check_online()?;
        let graph = self.inner.graph.read();

        let mut stats = GraphStats {
            node_count: graph.nodes.len() as u64,
            relationship_count: graph.relationships.len() as u64,
            ..Default::default()
        };
        for (label, ids) in &graph.label_index {
            stats.labels.insert(label.clone(), ids.len() as u64);
        }
        for rel in graph.relationships.values() {
            *stats.relationship_types.entry(rel.rel_type.clone()).or_default() += 1;
        }
        Ok(stats)
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    const ROLES: [&str; 3] = ["Grower", "Packinghouse", "Retailer"];

    #[tokio::test]
    async fn test_upsert_and_get_node() {
        let db = MemoryStore::new();
        let key = NodeKey::entity("acme_farm");

        let outcome = db
            .upsert_node(&key, &["Grower"], &ROLES, props([("name", "Acme")]), PropertyWrite::Replace)
            .await
            .unwrap();
        assert_eq!(outcome, WriteOutcome::Created);

        let node = db.get_node(&key).await.unwrap().unwrap();
        assert_eq!(node.sorted_labels(), vec!["Entity", "Grower"]);
        assert_eq!(node.get("name"), Some(&Value::from("Acme")));
        assert_eq!(node.get("id"), Some(&Value::from("acme_farm")));
    }

    #[tokio::test]
    async fn test_set_roles_replaces_exactly() {
        let db = MemoryStore::new();
        let key = NodeKey::entity("acme_farm");

        let err = db.set_roles(&key, &ROLES, &["Grower"]).await.unwrap_err();
        assert!(matches!(err, Error::NotFound(_)));
        assert!(!db.node_exists(&key).await.unwrap());

        db.upsert_node(&key, &["Grower", "Packinghouse"], &ROLES, props([("name", "Acme")]), PropertyWrite::Merge)
            .await
            .unwrap();
        db.set_roles(&key, &ROLES, &["Retailer"]).await.unwrap();

        let node = db.get_node(&key).await.unwrap().unwrap();
        assert_eq!(node.sorted_labels(), vec!["Entity", "Retailer"]);
        assert_eq!(node.get("name"), Some(&Value::from("Acme")));
    }

    #[tokio::test]
    async fn test_upsert_clears_label_universe() {
        let db = MemoryStore::new();
        let key = NodeKey::entity("acme_farm");

        db.upsert_node(&key, &["Grower", "Packinghouse"], &ROLES, PropertyMap::new(), PropertyWrite::Merge)
            .await
            .unwrap();
        let outcome = db
            .upsert_node(&key, &["Grower"], &ROLES, PropertyMap::new(), PropertyWrite::Merge)
            .await
            .unwrap();
        assert_eq!(outcome, WriteOutcome::Matched);

        let node = db.get_node(&key).await.unwrap().unwrap();
        assert_eq!(node.sorted_labels(), vec!["Entity", "Grower"]);

        let stats = db.stats().await.unwrap();
        assert_eq!(stats.labels.get("Packinghouse"), None);
        assert_eq!(stats.labels.get("Grower"), Some(&1));
    }

    #[tokio::test]
    async fn test_replace_drops_stale_properties_merge_keeps_them() {
        let db = MemoryStore::new();
        let key = NodeKey::entity("acme_farm");

        db.upsert_node(&key, &[], &[], props([("website", "a"), ("name", "Acme")]), PropertyWrite::Replace)
            .await
            .unwrap();
        db.upsert_node(&key, &[], &[], props([("city", "Fresno")]), PropertyWrite::Merge)
            .await
            .unwrap();
        let node = db.get_node(&key).await.unwrap().unwrap();
        assert_eq!(node.get("website"), Some(&Value::from("a")));
        assert_eq!(node.get("city"), Some(&Value::from("Fresno")));

        db.upsert_node(&key, &[], &[], props([("name", "Acme Farms")]), PropertyWrite::Replace)
            .await
            .unwrap();
        let node = db.get_node(&key).await.unwrap().unwrap();
        assert_eq!(node.get("website"), None);
        assert_eq!(node.get("city"), None);
        assert_eq!(node.get("id"), Some(&Value::from("acme_farm")));
    }

    #[tokio::test]
    async fn test_edge_merge_is_idempotent() {
        let db = MemoryStore::new();
        let a = NodeKey::entity("acme_farm");
        let p = NodeKey::product("peach");
        db.upsert_node(&a, &[], &[], PropertyMap::new(), PropertyWrite::Merge).await.unwrap();
        db.upsert_node(&p, &[], &[], PropertyMap::new(), PropertyWrite::Merge).await.unwrap();

        let first = db.upsert_edge(&a, "GROWS", &p, props([("confidence", 0.5)])).await.unwrap();
        let second = db.upsert_edge(&a, "GROWS", &p, props([("confidence", 1.0)])).await.unwrap();
        assert_eq!(first, WriteOutcome::Created);
        assert_eq!(second, WriteOutcome::Matched);

        let rows = db.query(&Pattern::edges("GROWS")).await.unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].get::<f64>("r.confidence").unwrap(), 1.0);
        assert_eq!(db.stats().await.unwrap().relationship_count, 1);
    }

    #[tokio::test]
    async fn test_edge_to_missing_node_is_missing_reference() {
        let db = MemoryStore::new();
        let a = NodeKey::entity("acme_farm");
        db.upsert_node(&a, &[], &[], PropertyMap::new(), PropertyWrite::Merge).await.unwrap();

        let err = db
            .upsert_edge(&a, "GROWS", &NodeKey::product("durian"), PropertyMap::new())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::MissingReference { .. }));
        assert_eq!(db.stats().await.unwrap().relationship_count, 0);
    }

    #[tokio::test]
    async fn test_delete_edge() {
        let db = MemoryStore::new();
        let a = NodeKey::entity("a");
        let b = NodeKey::entity("b");
        db.upsert_node(&a, &[], &[], PropertyMap::new(), PropertyWrite::Merge).await.unwrap();
        db.upsert_node(&b, &[], &[], PropertyMap::new(), PropertyWrite::Merge).await.unwrap();
        db.upsert_edge(&a, "SOURCES_FROM", &b, PropertyMap::new()).await.unwrap();

        assert!(db.delete_edge(&a, "SOURCES_FROM", &b).await.unwrap());
        assert!(!db.delete_edge(&a, "SOURCES_FROM", &b).await.unwrap());
        assert!(db.outgoing_keys(&a, "SOURCES_FROM").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_two_hop_query() {
        let db = MemoryStore::new();
        let e = NodeKey::entity("acme_farm");
        let r = NodeKey::region("central_valley");
        let z = NodeKey::new("Zone", "zone_9");
        for k in [&e, &r, &z] {
            db.upsert_node(k, &[], &[], PropertyMap::new(), PropertyWrite::Merge).await.unwrap();
        }
        db.upsert_node(&z, &[], &[], props([("usdaZone", 9)]), PropertyWrite::Merge).await.unwrap();
        db.upsert_edge(&e, "IN_GROWING_REGION", &r, PropertyMap::new()).await.unwrap();
        db.upsert_edge(&r, "IN_ZONE", &z, PropertyMap::new()).await.unwrap();

        let rows = db
            .query(&Pattern::TwoHop {
                from_label: "Entity".into(),
                first: "IN_GROWING_REGION".into(),
                second: "IN_ZONE".into(),
            })
            .await
            .unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].key("a").unwrap(), &e);
        assert_eq!(rows[0].get::<i64>("c.usdaZone").unwrap(), 9);
    }

    #[tokio::test]
    async fn test_offline_store() {
        let db = MemoryStore::new();
        db.set_offline(true);
        assert!(matches!(db.verify_connectivity().await, Err(Error::Connectivity(_))));
        assert!(matches!(db.stats().await, Err(Error::Store(_))));
        db.set_offline(false);
        assert!(db.verify_connectivity().await.is_ok());
    }
}
