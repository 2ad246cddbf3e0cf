//! # Graph Store Adapter
//!
//! This is THE contract between the loader and any property-graph engine.
//! Everything the upsert engine, linker and inference rules need from the
//! backend is defined here, addressed by natural [`NodeKey`]s.
//!
//! ## Implementations
//!
//! | Backend | Module | Description |
//! |---------|--------|-------------|
//! | `MemoryStore` | `memory` | In-memory reference backend for testing/embedding |
//! | `RetryingStore<S>` | `retry` | Bounded retry of transient failures around any store |

pub mod memory;
pub mod retry;

use std::collections::{BTreeMap, HashMap};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::model::*;
use crate::{Error, Result};

pub use memory::MemoryStore;
pub use retry::{RetryPolicy, RetryingStore};

// ============================================================================
// Write options
// ============================================================================

/// How `upsert_node` combines the supplied properties with a stored node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PropertyWrite {
    /// Stored properties are replaced wholesale (the `id` key is kept).
    Replace,
    /// Supplied properties overwrite; the rest are left as they are.
    Merge,
}

impl From<UpsertMode> for PropertyWrite {
    fn from(mode: UpsertMode) -> Self {
        match mode {
            UpsertMode::FullReplace => PropertyWrite::Replace,
            UpsertMode::EnrichMerge => PropertyWrite::Merge,
        }
    }
}

/// Result of a MERGE-style write.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum WriteOutcome {
    Created,
    Matched,
}

impl WriteOutcome {
    pub fn created(&self) -> bool { matches!(self, WriteOutcome::Created) }
}

// ============================================================================
// Read patterns
// ============================================================================

/// Property predicate applied to a matched node.
#[derive(Debug, Clone, PartialEq)]
pub enum PropertyFilter {
    /// Property is present and not null.
    Exists(String),
    /// Property equals the value (numeric values compare by magnitude).
    Equals(String, Value),
    /// Property is a list containing the string.
    Contains(String, String),
}

impl PropertyFilter {
    pub fn matches(&self, props: &PropertyMap) -> bool {
        match self {
            PropertyFilter::Exists(k) => props.get(k).is_some_and(|v| !v.is_null()),
            PropertyFilter::Equals(k, want) => props.get(k).is_some_and(|v| v.loosely_equals(want)),
            PropertyFilter::Contains(k, s) => props.get(k).is_some_and(|v| v.list_contains_str(s)),
        }
    }
}

/// Read-only pattern specification.
///
/// Records expose matched nodes' properties under an alias prefix, the way
/// a Cypher `RETURN a.id, b.zoneMin` would: `"a.id"`, `"b.zoneMin"`. Each
/// node also contributes `"<alias>.labels"` as a string list.
#[derive(Debug, Clone, PartialEq)]
pub enum Pattern {
    /// `MATCH (n:label) WHERE filters`: alias `n`.
    Nodes { label: String, filters: Vec<PropertyFilter> },
    /// `MATCH (a:from_label)-[r:rel_type]->(b:to_label)`: aliases `a`, `r`, `b`.
    /// `None` labels match any node.
    Edges { from_label: Option<String>, rel_type: String, to_label: Option<String> },
    /// `MATCH (a {key})-[r:rel_type]->(b)`: aliases `r`, `b`.
    Outgoing { from: NodeKey, rel_type: String },
    /// `MATCH (a:from_label)-[:first]->(b)-[:second]->(c)`: aliases `a`, `b`, `c`.
    TwoHop { from_label: String, first: String, second: String },
}

impl Pattern {
    pub fn nodes(label: impl Into<String>) -> Self {
        Pattern::Nodes { label: label.into(), filters: Vec::new() }
    }

    pub fn nodes_where(label: impl Into<String>, filters: Vec<PropertyFilter>) -> Self {
        Pattern::Nodes { label: label.into(), filters }
    }

    pub fn edges(rel_type: impl Into<String>) -> Self {
        Pattern::Edges { from_label: None, rel_type: rel_type.into(), to_label: None }
    }

    pub fn outgoing(from: NodeKey, rel_type: impl Into<String>) -> Self {
        Pattern::Outgoing { from, rel_type: rel_type.into() }
    }
}

/// A single row returned by [`GraphStore::query`].
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Record {
    pub values: HashMap<String, Value>,
    /// Natural key of each bound node alias.
    pub keys: HashMap<String, NodeKey>,
}

impl Record {
    /// Get a typed value from the row.
    pub fn get<T: FromValue>(&self, key: &str) -> Result<T> {
        let val = self.values.get(key)
            .ok_or_else(|| Error::NotFound(format!("Column '{key}'")))?;
        T::from_value(val)
    }

    /// Get a raw value; absent columns read as `None`.
    pub fn value(&self, key: &str) -> Option<&Value> {
        self.values.get(key).filter(|v| !v.is_null())
    }

    /// Natural key of the node bound to `alias`.
    pub fn key(&self, alias: &str) -> Result<&NodeKey> {
        self.keys.get(alias)
            .ok_or_else(|| Error::NotFound(format!("Node alias '{alias}'")))
    }

    /// Add every property of `node` under `alias.`, plus `alias.labels`.
    pub fn bind_node(&mut self, alias: &str, node: &Node) {
        self.keys.insert(alias.to_string(), node.key.clone());
        for (k, v) in &node.properties {
            self.values.insert(format!("{alias}.{k}"), v.clone());
        }
        self.values.insert(
            format!("{alias}.labels"),
            Value::List(node.labels.iter().map(|l| Value::from(l.as_str())).collect()),
        );
    }

    /// Add every property of `rel` under `alias.`, plus `alias.type`.
    pub fn bind_relationship(&mut self, alias: &str, rel: &Relationship) {
        for (k, v) in &rel.properties {
            self.values.insert(format!("{alias}.{k}"), v.clone());
        }
        self.values.insert(format!("{alias}.type"), Value::from(rel.rel_type.as_str()));
    }
}

/// Convert from Value to concrete types.
pub trait FromValue: Sized {
    fn from_value(val: &Value) -> Result<Self>;
}

fn type_error(expected: &str, val: &Value) -> Error {
    Error::TypeError { expected: expected.into(), got: val.type_name().into() }
}

impl FromValue for Value {
    fn from_value(val: &Value) -> Result<Self> { Ok(val.clone()) }
}

impl FromValue for String {
    fn from_value(val: &Value) -> Result<Self> {
        val.as_str().map(str::to_owned).ok_or_else(|| type_error("String", val))
    }
}

impl FromValue for i64 {
    fn from_value(val: &Value) -> Result<Self> {
        val.as_int().ok_or_else(|| type_error("Integer", val))
    }
}

impl FromValue for f64 {
    fn from_value(val: &Value) -> Result<Self> {
        val.as_float().ok_or_else(|| type_error("Float", val))
    }
}

impl FromValue for Vec<String> {
    fn from_value(val: &Value) -> Result<Self> {
        match val {
            Value::List(_) => Ok(val.as_str_list().into_iter().map(str::to_owned).collect()),
            _ => Err(type_error("List", val)),
        }
    }
}

// ============================================================================
// Statistics
// ============================================================================

/// Whole-graph counts for the run summary. Maps are ordered for stable output.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GraphStats {
    pub node_count: u64,
    pub relationship_count: u64,
    pub labels: BTreeMap<String, u64>,
    pub relationship_types: BTreeMap<String, u64>,
}

// ============================================================================
// GraphStore Trait
// ============================================================================

/// The property-graph storage contract.
///
/// Every write is MERGE-idempotent on its natural key and atomic on its own;
/// a sequence of writes is not transactional. Backends must serialize
/// concurrent writes to the same natural key (a uniqueness constraint on
/// `(label, id)` or client-side serialization).
#[async_trait]
pub trait GraphStore: Send + Sync + 'static {
    // ========================================================================
    // Lifecycle / schema
    // ========================================================================

    /// Round trip to the backend. Fails with `Error::Connectivity`.
    async fn verify_connectivity(&self) -> Result<()>;

    /// Declare `(label, id)` unique. Idempotent.
    async fn ensure_unique_key(&self, label: &str) -> Result<()>;

    // ========================================================================
    // Nodes
    // ========================================================================

    /// MERGE the node by natural key, remove every label in
    /// `label_universe_to_clear` then add `labels_to_add`, and write `props`
    /// according to `write`. `Null` property values remove the key.
    async fn upsert_node(
        &self,
        key: &NodeKey,
        labels_to_add: &[&str],
        label_universe_to_clear: &[&str],
        props: PropertyMap,
        write: PropertyWrite,
    ) -> Result<WriteOutcome>;

    /// Fetch a node by natural key.
    async fn get_node(&self, key: &NodeKey) -> Result<Option<Node>>;

    async fn node_exists(&self, key: &NodeKey) -> Result<bool> {
        Ok(self.get_node(key).await?.is_some())
    }

    /// Replace the role labels of an existing node: afterwards the labels of
    /// `universe` present on the node are exactly `roles`.
    ///
    /// Default: a merge-upsert with no properties, after checking existence.
    async fn set_roles(&self, key: &NodeKey, universe: &[&str], roles: &[&str]) -> Result<()> {
        if !self.node_exists(key).await? {
            return Err(Error::NotFound(key.to_string()));
        }
        self.upsert_node(key, roles, universe, PropertyMap::new(), PropertyWrite::Merge)
            .await
            .map(|_| ())
    }

    // ========================================================================
    // Relationships
    // ========================================================================

    /// MERGE `(from)-[rel_type]->(to)`. An existing edge gets `props`
    /// merged in; no duplicate is ever created. Either endpoint missing is
    /// `Error::MissingReference`.
    async fn upsert_edge(
        &self,
        from: &NodeKey,
        rel_type: &str,
        to: &NodeKey,
        props: PropertyMap,
    ) -> Result<WriteOutcome>;

    /// Delete `(from)-[rel_type]->(to)`. Returns true if it existed.
    async fn delete_edge(&self, from: &NodeKey, rel_type: &str, to: &NodeKey) -> Result<bool>;

    // ========================================================================
    // Reads
    // ========================================================================

    /// Read-only pattern match.
    async fn query(&self, pattern: &Pattern) -> Result<Vec<Record>>;

    /// Keys of every `to` in `(from)-[rel_type]->(to)`.
    ///
    /// Default: built on `query(Pattern::Outgoing)`.
    async fn outgoing_keys(&self, from: &NodeKey, rel_type: &str) -> Result<Vec<NodeKey>> {
        let rows = self.query(&Pattern::outgoing(from.clone(), rel_type)).await?;
        rows.iter().map(|row| row.key("b").cloned()).collect()
    }

    /// Whole-graph counts.
    async fn stats(&self) -> Result<GraphStats>;
}
