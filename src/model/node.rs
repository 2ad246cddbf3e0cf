//! Node in the property graph.

use serde::{Deserialize, Serialize};
use smallvec::SmallVec;

use super::{NodeKey, PropertyMap, Role, RoleSet, Value};

/// Opaque node identifier, assigned by the backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct NodeId(pub u64);

impl std::fmt::Display for NodeId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Label storage. Most nodes carry one primary label plus a few role labels.
pub type Labels = SmallVec<[String; 4]>;

/// A node in the property graph.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Node {
    pub id: NodeId,
    /// Natural key; `key.label` is always present in `labels`.
    pub key: NodeKey,
    pub labels: Labels,
    pub properties: PropertyMap,
}

impl Node {
    pub fn new(id: NodeId, key: NodeKey) -> Self {
        let mut labels = Labels::new();
        labels.push(key.label.clone());
        Self { id, key, labels, properties: PropertyMap::new() }
    }

    pub fn with_property(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.properties.insert(key.into(), value.into());
        self
    }

    pub fn has_label(&self, label: &str) -> bool {
        self.labels.iter().any(|l| l == label)
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.properties.get(key)
    }

    /// Role labels present on the node. Labels outside the role universe
    /// (the primary label, for instance) are ignored.
    pub fn roles(&self) -> RoleSet {
        self.labels.iter().filter_map(|l| l.parse::<Role>().ok()).collect()
    }

    /// Sorted copy of the label set, for comparisons in tests and reports.
    pub fn sorted_labels(&self) -> Vec<String> {
        let mut labels: Vec<String> = self.labels.iter().cloned().collect();
        labels.sort();
        labels
    }
}
