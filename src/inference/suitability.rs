//! Range-intersection suitability.
//!
//! `A -SUITABLE_FOR_ZONE-> B` when `A.<value>` lies in the closed range
//! `B.<min> ..= B.<max>`, optionally gated by equal categorical properties
//! on both sides (a citrus cultivar only matches citrus regions).

use chrono::Utc;
use serde::{Deserialize, Serialize};

use super::provenance::{check_confidence, default_confidence, Provenance};
use super::RuleReport;
use crate::model::{label, rel};
use crate::storage::{GraphStore, Pattern, PropertyFilter, Record};
use crate::{Error, Result};

/// Categorical equality gate between subject and target.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CategoryGate {
    pub subject_property: String,
    pub target_property: String,
}

impl CategoryGate {
    pub fn same(property: impl Into<String>) -> Self {
        let property = property.into();
        Self { subject_property: property.clone(), target_property: property }
    }
}

fn default_rel_type() -> String {
    rel::SUITABLE_FOR_ZONE.to_string()
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SuitabilityRule {
    pub name: String,
    pub subject_label: String,
    pub subject_property: String,
    pub target_label: String,
    pub min_property: String,
    pub max_property: String,
    #[serde(default)]
    pub gate: Option<CategoryGate>,
    #[serde(default = "default_rel_type")]
    pub rel_type: String,
    pub reason: String,
    #[serde(default = "default_confidence")]
    pub confidence: f64,
}

struct Target {
    record: Record,
    min: f64,
    max: f64,
}

impl SuitabilityRule {
    /// Cultivar hardiness zone inside a growing region's zone range, same
    /// crop category.
    pub fn cultivar_zones() -> Self {
        Self {
            name: "cultivar_zone_suitability".into(),
            subject_label: label::CULTIVAR.into(),
            subject_property: "hardinessZone".into(),
            target_label: label::GROWING_REGION.into(),
            min_property: "zoneMin".into(),
            max_property: "zoneMax".into(),
            gate: Some(CategoryGate::same("category")),
            rel_type: default_rel_type(),
            reason: "cultivar hardiness zone within region zone range".into(),
            confidence: 0.9,
        }
    }

    pub fn validate(&self) -> Result<()> {
        check_confidence(&self.name, self.confidence)?;
        if self.min_property == self.max_property {
            return Err(Error::Validation {
                record: self.name.clone(),
                reason: "range needs distinct min and max properties".into(),
            });
        }
        Ok(())
    }

    fn gate_passes(&self, subject: &Record, target: &Record) -> bool {
        let Some(gate) = &self.gate else { return true };
        match (
            subject.value(&format!("n.{}", gate.subject_property)),
            target.value(&format!("n.{}", gate.target_property)),
        ) {
            (Some(a), Some(b)) => a.loosely_equals(b),
            _ => false,
        }
    }

    pub(crate) async fn apply<S: GraphStore + ?Sized>(
        &self,
        store: &S,
        report: &mut RuleReport,
    ) -> Result<()> {
        // Both reads are side-effect free and run concurrently.
        let subjects_pattern = Pattern::nodes_where(
            &self.subject_label,
            vec![PropertyFilter::Exists(self.subject_property.clone())],
        );
        let targets_pattern = Pattern::nodes_where(
            &self.target_label,
            vec![
                PropertyFilter::Exists(self.min_property.clone()),
                PropertyFilter::Exists(self.max_property.clone()),
            ],
        );
        let (subjects, targets) =
            tokio::try_join!(store.query(&subjects_pattern), store.query(&targets_pattern))?;

        let min_col = format!("n.{}", self.min_property);
        let max_col = format!("n.{}", self.max_property);
        let mut ranges = Vec::with_capacity(targets.len());
        for record in targets {
            let key = record.key("n")?.clone();
            match (record.get::<f64>(&min_col), record.get::<f64>(&max_col)) {
                (Ok(min), Ok(max)) => ranges.push(Target { record, min, max }),
                (Err(e), _) | (_, Err(e)) => report.skip(&self.name, &key, &e),
            }
        }

        let value_col = format!("n.{}", self.subject_property);
        let provenance = Provenance::new(&self.name, &self.reason, self.confidence);
        let now = Utc::now();

        for subject in subjects {
            let from = subject.key("n")?.clone();
            let value = match subject.get::<f64>(&value_col) {
                Ok(v) => v,
                Err(e) => {
                    report.skip(&self.name, &from, &e);
                    continue;
                }
            };

            for target in &ranges {
                if !(target.min..=target.max).contains(&value) || !self.gate_passes(&subject, &target.record) {
                    continue;
                }
                report.matched += 1;
                let to = target.record.key("n")?;
                match store.upsert_edge(&from, &self.rel_type, to, provenance.to_properties(now)).await {
                    Ok(outcome) => report.record_production(outcome),
                    Err(e @ Error::MissingReference { .. }) => report.skip(&self.name, &from, &e),
                    Err(e) => return Err(e),
                }
            }
        }
        Ok(())
    }
}
