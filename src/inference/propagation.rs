//! Propagation rules: a static implication table driving `IMPLIES` edges.
//!
//! A row `(X, Y)` matches every holder node (by default an `Entity`) whose
//! `certifications` list contains `X`. When a row has at least one holder the
//! rule ensures both `X` and `Y` exist and MERGEs `X -IMPLIES-> Y` carrying
//! the row's provenance. Each run is one hop: `X → Y` and `Y → Z` rows
//! produce exactly those two edges, never `X → Z`.

use chrono::Utc;
use serde::{Deserialize, Serialize};

use super::provenance::{check_confidence, default_confidence, Provenance};
use super::RuleReport;
use crate::model::{label, rel, NodeKey, PropertyMap, Value};
use crate::storage::{GraphStore, Pattern, PropertyFilter, PropertyWrite};
use crate::{Error, Result};

/// One implication-table row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Implication {
    pub from: String,
    pub to: String,
    pub reason: String,
    #[serde(default = "default_confidence")]
    pub confidence: f64,
}

impl Implication {
    pub fn new(from: impl Into<String>, to: impl Into<String>, reason: impl Into<String>) -> Self {
        Self { from: from.into(), to: to.into(), reason: reason.into(), confidence: 1.0 }
    }

    pub fn with_confidence(mut self, confidence: f64) -> Self {
        self.confidence = confidence;
        self
    }
}

fn default_label() -> String {
    label::CERTIFICATION.to_string()
}

fn default_rel_type() -> String {
    rel::IMPLIES.to_string()
}

fn default_holder_label() -> String {
    label::ENTITY.to_string()
}

fn default_holder_property() -> String {
    "certifications".to_string()
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PropagationRule {
    pub name: String,
    /// Label of both implying and implied nodes.
    #[serde(default = "default_label")]
    pub label: String,
    #[serde(default = "default_rel_type")]
    pub rel_type: String,
    /// Nodes whose `holder_property` list names the implying id.
    #[serde(default = "default_holder_label")]
    pub holder_label: String,
    #[serde(default = "default_holder_property")]
    pub holder_property: String,
    pub implications: Vec<Implication>,
}

impl PropagationRule {
    pub fn new(name: impl Into<String>, implications: Vec<Implication>) -> Self {
        Self {
            name: name.into(),
            label: default_label(),
            rel_type: default_rel_type(),
            holder_label: default_holder_label(),
            holder_property: default_holder_property(),
            implications,
        }
    }

    pub fn validate(&self) -> Result<()> {
        for row in &self.implications {
            check_confidence(&self.name, row.confidence)?;
            if row.from == row.to {
                return Err(Error::Validation {
                    record: self.name.clone(),
                    reason: format!("'{}' implies itself", row.from),
                });
            }
        }
        Ok(())
    }

    pub(crate) async fn apply<S: GraphStore + ?Sized>(
        &self,
        store: &S,
        report: &mut RuleReport,
    ) -> Result<()> {
        let now = Utc::now();
        for row in &self.implications {
            let holders = store
                .query(&Pattern::nodes_where(
                    &self.holder_label,
                    vec![PropertyFilter::Contains(self.holder_property.clone(), row.from.clone())],
                ))
                .await?;
            if holders.is_empty() {
                continue;
            }
            report.matched += holders.len();

            let from = NodeKey::new(&self.label, &row.from);
            let to = NodeKey::new(&self.label, &row.to);
            for key in [&from, &to] {
                store
                    .upsert_node(key, &[], &[], PropertyMap::new(), PropertyWrite::Merge)
                    .await?;
            }

            let provenance = Provenance::new(&self.name, &row.reason, row.confidence);
            let outcome = store
                .upsert_edge(&from, &self.rel_type, &to, provenance.to_properties(now))
                .await?;
            report.record_production(outcome);

            let holder_ids: Vec<&str> = holders
                .iter()
                .filter_map(|h| h.value("n.id").and_then(Value::as_str))
                .collect();
            tracing::debug!(rule = %self.name, from = %from, to = %to, holders = ?holder_ids, "implication asserted");
        }
        Ok(())
    }
}
