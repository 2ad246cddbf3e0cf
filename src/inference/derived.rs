//! Read-side derived attributes.
//!
//! A derived attribute exposes `Z.<attribute>` for every path
//! `A -first-> R -second-> Z`. Nothing is written: the value is computed at
//! read time, so re-pointing `R → Z` never leaves a stale copy on `A`.

use serde::{Deserialize, Serialize};

use crate::model::{label, rel, NodeKey, Value};
use crate::storage::{GraphStore, Pattern};
use crate::Result;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DerivedAttribute {
    pub name: String,
    pub from_label: String,
    pub first: String,
    pub second: String,
    /// Property read from the far node.
    pub attribute: String,
}

/// One derived value for one node.
#[derive(Debug, Clone, PartialEq)]
pub struct DerivedValue {
    pub key: NodeKey,
    /// The intermediate node the value was reached through.
    pub via: NodeKey,
    pub value: Value,
}

impl DerivedAttribute {
    /// Entity USDA hardiness zone through its growing region.
    pub fn usda_zone() -> Self {
        Self {
            name: "usdaZone".into(),
            from_label: label::ENTITY.into(),
            first: rel::IN_GROWING_REGION.into(),
            second: rel::IN_ZONE.into(),
            attribute: "usdaZone".into(),
        }
    }

    fn pattern(&self) -> Pattern {
        Pattern::TwoHop {
            from_label: self.from_label.clone(),
            first: self.first.clone(),
            second: self.second.clone(),
        }
    }

    /// Every `(node, value)` pair currently derivable. Paths whose far node
    /// lacks the attribute are left out.
    pub async fn evaluate<S: GraphStore + ?Sized>(&self, store: &S) -> Result<Vec<DerivedValue>> {
        let column = format!("c.{}", self.attribute);
        let rows = store.query(&self.pattern()).await?;

        let mut values = Vec::with_capacity(rows.len());
        for row in rows {
            let Some(value) = row.value(&column).cloned() else { continue };
            values.push(DerivedValue {
                key: row.key("a")?.clone(),
                via: row.key("b")?.clone(),
                value,
            });
        }
        Ok(values)
    }

    /// Distinct values for a single node, in path order.
    pub async fn for_node<S: GraphStore + ?Sized>(&self, store: &S, key: &NodeKey) -> Result<Vec<Value>> {
        let mut out: Vec<Value> = Vec::new();
        for derived in self.evaluate(store).await? {
            if &derived.key == key && !out.contains(&derived.value) {
                out.push(derived.value);
            }
        }
        Ok(out)
    }
}
