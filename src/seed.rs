//! Static seed catalogs (geography, taxonomy).
//!
//! A catalog is plain JSON: nodes keyed by `(label, id)` with a property
//! bag, and edges between node keys. Loading MERGEs everything, so a
//! catalog can be replayed on every run.
//!
//! ```json
//! {
//!   "nodes": [
//!     {"label": "State", "id": "CA", "properties": {"name": "California"}},
//!     {"label": "Zone", "id": "9", "properties": {"usdaZone": 9}}
//!   ],
//!   "edges": [
//!     {"from": {"label": "GrowingRegion", "id": "central_valley"},
//!      "type": "IN_ZONE",
//!      "to": {"label": "Zone", "id": "9"}}
//!   ]
//! }
//! ```

use std::io::Read;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::model::{label, rel, NodeKey, PropertyMap, Value};
use crate::storage::{GraphStore, PropertyWrite};
use crate::{Error, Result, SkipKind};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SeedNode {
    pub label: String,
    pub id: String,
    /// Labels besides the primary one.
    #[serde(default)]
    pub labels: Vec<String>,
    #[serde(default)]
    pub properties: serde_json::Map<String, serde_json::Value>,
}

impl SeedNode {
    pub fn new(label: impl Into<String>, id: impl Into<String>) -> Self {
        Self { label: label.into(), id: id.into(), labels: Vec::new(), properties: Default::default() }
    }

    pub fn with_property(mut self, key: impl Into<String>, value: impl Into<serde_json::Value>) -> Self {
        self.properties.insert(key.into(), value.into());
        self
    }

    pub fn key(&self) -> NodeKey {
        NodeKey::new(&self.label, &self.id)
    }

    fn to_properties(&self) -> PropertyMap {
        let mut props: PropertyMap = self
            .properties
            .iter()
            .map(|(k, v)| (k.clone(), Value::from(v.clone())))
            .collect();
        props.insert("id".into(), Value::from(self.id.as_str()));
        props
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SeedEdge {
    pub from: NodeKey,
    #[serde(rename = "type")]
    pub rel_type: String,
    pub to: NodeKey,
}

impl SeedEdge {
    pub fn new(from: NodeKey, rel_type: impl Into<String>, to: NodeKey) -> Self {
        Self { from, rel_type: rel_type.into(), to }
    }
}

/// What a catalog load wrote.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SeedReport {
    pub catalog: String,
    pub nodes: usize,
    pub edges: usize,
    pub skipped: Vec<SkipKind>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SeedCatalog {
    /// Used in logs only.
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub nodes: Vec<SeedNode>,
    #[serde(default)]
    pub edges: Vec<SeedEdge>,
}

impl SeedCatalog {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into(), ..Default::default() }
    }

    pub fn from_reader(reader: impl Read) -> Result<Self> {
        Ok(serde_json::from_reader(reader)?)
    }

    pub fn from_path(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let file = std::fs::File::open(path)?;
        let mut catalog = Self::from_reader(std::io::BufReader::new(file))?;
        if catalog.name.is_empty() {
            catalog.name = path.display().to_string();
        }
        Ok(catalog)
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty() && self.edges.is_empty()
    }

    /// Append another catalog's nodes and edges.
    pub fn extend(&mut self, other: SeedCatalog) {
        self.nodes.extend(other.nodes);
        self.edges.extend(other.edges);
    }

    /// MERGE every node, then every edge. A node without an id is skipped as
    /// invalid; an edge with a missing endpoint is skipped as a missing
    /// reference. Anything else is returned.
    pub async fn load<S: GraphStore + ?Sized>(&self, store: &S) -> Result<SeedReport> {
        let mut report = SeedReport { catalog: self.name.clone(), ..Default::default() };

        for node in &self.nodes {
            if node.id.trim().is_empty() || node.label.trim().is_empty() {
                tracing::warn!(catalog = %self.name, label = %node.label, reason = "empty label or id", "skipping seed node");
                report.skipped.push(SkipKind::Validation);
                continue;
            }
            let extra: Vec<&str> = node.labels.iter().map(String::as_str).collect();
            store
                .upsert_node(&node.key(), &extra, &[], node.to_properties(), PropertyWrite::Merge)
                .await?;
            report.nodes += 1;
        }

        for edge in &self.edges {
            match store.upsert_edge(&edge.from, &edge.rel_type, &edge.to, PropertyMap::new()).await {
                Ok(_) => report.edges += 1,
                Err(e @ Error::MissingReference { .. }) => {
                    tracing::warn!(catalog = %self.name, record = %edge.from, reason = %e, "skipping seed edge");
                    report.skipped.push(e.skip_kind());
                }
                Err(e) => return Err(e),
            }
        }

        tracing::info!(catalog = %self.name, nodes = report.nodes, edges = report.edges, "seed catalog loaded");
        Ok(report)
    }

    // ========================================================================
    // Built-in geography
    // ========================================================================

    /// The 50 states plus DC, keyed by postal code.
    pub fn us_states() -> Self {
        let mut catalog = Self::new("us_states");
        catalog.nodes = US_STATES
            .iter()
            .map(|(code, name)| SeedNode::new(label::STATE, *code).with_property("name", *name))
            .collect();
        catalog
    }

    /// USDA plant hardiness zones 1 through 13.
    pub fn usda_zones() -> Self {
        let mut catalog = Self::new("usda_zones");
        catalog.nodes = (1..=13)
            .map(|z: i64| SeedNode::new(label::ZONE, z.to_string()).with_property("usdaZone", z))
            .collect();
        catalog
    }

    /// Region node with its zone range, linked to every zone in the range.
    pub fn with_region(mut self, id: &str, name: &str, category: &str, zone_min: i64, zone_max: i64) -> Self {
        self.nodes.push(
            SeedNode::new(label::GROWING_REGION, id)
                .with_property("name", name)
                .with_property("category", category)
                .with_property("zoneMin", zone_min)
                .with_property("zoneMax", zone_max),
        );
        for zone in zone_min..=zone_max {
            self.edges.push(SeedEdge::new(
                NodeKey::region(id),
                rel::IN_ZONE,
                NodeKey::new(label::ZONE, zone.to_string()),
            ));
        }
        self
    }
}

const US_STATES: [(&str, &str); 51] = [
    ("AL", "Alabama"), ("AK", "Alaska"), ("AZ", "Arizona"), ("AR", "Arkansas"),
    ("CA", "California"), ("CO", "Colorado"), ("CT", "Connecticut"), ("DE", "Delaware"),
    ("DC", "District of Columbia"), ("FL", "Florida"), ("GA", "Georgia"), ("HI", "Hawaii"),
    ("ID", "Idaho"), ("IL", "Illinois"), ("IN", "Indiana"), ("IA", "Iowa"),
    ("KS", "Kansas"), ("KY", "Kentucky"), ("LA", "Louisiana"), ("ME", "Maine"),
    ("MD", "Maryland"), ("MA", "Massachusetts"), ("MI", "Michigan"), ("MN", "Minnesota"),
    ("MS", "Mississippi"), ("MO", "Missouri"), ("MT", "Montana"), ("NE", "Nebraska"),
    ("NV", "Nevada"), ("NH", "New Hampshire"), ("NJ", "New Jersey"), ("NM", "New Mexico"),
    ("NY", "New York"), ("NC", "North Carolina"), ("ND", "North Dakota"), ("OH", "Ohio"),
    ("OK", "Oklahoma"), ("OR", "Oregon"), ("PA", "Pennsylvania"), ("RI", "Rhode Island"),
    ("SC", "South Carolina"), ("SD", "South Dakota"), ("TN", "Tennessee"), ("TX", "Texas"),
    ("UT", "Utah"), ("VT", "Vermont"), ("VA", "Virginia"), ("WA", "Washington"),
    ("WV", "West Virginia"), ("WI", "Wisconsin"), ("WY", "Wyoming"),
];
