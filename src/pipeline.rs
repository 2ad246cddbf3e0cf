//! Load orchestrator.
//!
//! One run:
//!
//! ```text
//! connectivity → unique keys → geography → taxonomy
//!   → entities (input order: upsert + link) → enrichments
//!   → inference (declaration order) → summary
//! ```
//!
//! Writes are issued one at a time in that order. A failed record is
//! logged, counted by category and skipped; only a connectivity failure
//! aborts the run.

use std::collections::BTreeMap;
use std::path::Path;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::config::InputPaths;
use crate::crosswalk::Crosswalk;
use crate::inference::{InferenceReport, RuleSet};
use crate::linker::{link_entity, EdgePolicy};
use crate::model::*;
use crate::seed::SeedCatalog;
use crate::storage::{GraphStats, GraphStore};
use crate::upsert::upsert_entity;
use crate::{Error, Result, SkipKind};

/// Labels whose `(label, id)` natural key is declared unique before loading.
pub const KEYED_LABELS: [&str; 10] = [
    label::ENTITY,
    label::PRODUCT,
    label::GROWING_REGION,
    label::STATE,
    label::CITY,
    label::ZONE,
    label::CERTIFICATION,
    label::CULTIVAR,
    label::ROOTSTOCK,
    label::QUALITY_TIER,
];

// ============================================================================
// Input
// ============================================================================

/// A secondary-source record: merged into whatever `external_id` resolves to.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Enrichment {
    pub external_id: String,
    #[serde(flatten)]
    pub patch: EntityPatch,
}

impl Enrichment {
    pub fn new(external_id: impl Into<String>, patch: EntityPatch) -> Self {
        Self { external_id: external_id.into(), patch }
    }
}

/// A record file element that did not convert into its record type.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RejectedRecord {
    pub source: String,
    /// Position in the file's top-level array.
    pub index: usize,
    /// The element's `id` or `externalId`, when it had one.
    pub id: Option<String>,
    pub reason: String,
}

impl RejectedRecord {
    pub fn record(&self) -> String {
        match &self.id {
            Some(id) => id.clone(),
            None => format!("{}[{}]", self.source, self.index),
        }
    }
}

/// Everything one run loads.
#[derive(Debug, Clone, Default)]
pub struct LoadInput {
    pub geography: Vec<SeedCatalog>,
    pub taxonomy: Vec<SeedCatalog>,
    /// Primary-source records, loaded FULL_REPLACE in this order.
    pub entities: Vec<CanonicalEntity>,
    pub crosswalk: Crosswalk,
    /// Secondary-source records, loaded ENRICH_MERGE after all entities.
    pub enrichments: Vec<Enrichment>,
    pub rules: RuleSet,
    /// Elements of record files that failed to parse; counted as validation skips.
    pub rejected: Vec<RejectedRecord>,
}

fn read_json<T: for<'de> Deserialize<'de>>(path: &Path) -> Result<T> {
    let file = std::fs::File::open(path)
        .map_err(|e| Error::Config(format!("cannot open {}: {e}", path.display())))?;
    Ok(serde_json::from_reader(std::io::BufReader::new(file))?)
}

/// Read a JSON array one element at a time. A malformed file is an error;
/// a malformed element only rejects that element.
fn read_records<T: DeserializeOwned>(path: &Path, rejected: &mut Vec<RejectedRecord>) -> Result<Vec<T>> {
    let items: Vec<serde_json::Value> = read_json(path)?;
    let mut records = Vec::with_capacity(items.len());
    for (index, item) in items.into_iter().enumerate() {
        let id = ["id", "externalId"]
            .iter()
            .find_map(|k| item.get(*k).and_then(serde_json::Value::as_str))
            .map(str::to_string);
        match serde_json::from_value(item) {
            Ok(record) => records.push(record),
            Err(e) => rejected.push(RejectedRecord {
                source: path.display().to_string(),
                index,
                id,
                reason: e.to_string(),
            }),
        }
    }
    Ok(records)
}

impl LoadInput {
    /// Read every configured input file. Without a rules file the built-in
    /// default rules are used.
    pub fn from_paths(paths: &InputPaths) -> Result<Self> {
        let mut input = LoadInput::default();
        for path in &paths.geography {
            input.geography.push(SeedCatalog::from_path(path)?);
        }
        for path in &paths.taxonomy {
            input.taxonomy.push(SeedCatalog::from_path(path)?);
        }
        for path in &paths.entities {
            let records = read_records::<CanonicalEntity>(path, &mut input.rejected)?;
            input.entities.extend(records);
        }
        for path in &paths.enrichments {
            let records = read_records::<Enrichment>(path, &mut input.rejected)?;
            input.enrichments.extend(records);
        }
        if let Some(path) = &paths.crosswalk {
            input.crosswalk = Crosswalk::from_path(path)?;
        }
        input.rules = match &paths.rules {
            Some(path) => RuleSet::from_path(path)?,
            None => crate::inference::defaults()?,
        };
        Ok(input)
    }
}

// ============================================================================
// Summary
// ============================================================================

/// Skips by category.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SkipCounts(BTreeMap<SkipKind, usize>);

impl SkipCounts {
    pub fn record(&mut self, kind: SkipKind) {
        *self.0.entry(kind).or_default() += 1;
    }

    pub fn get(&self, kind: SkipKind) -> usize {
        self.0.get(&kind).copied().unwrap_or(0)
    }

    pub fn total(&self) -> usize {
        self.0.values().sum()
    }

    pub fn iter(&self) -> impl Iterator<Item = (SkipKind, usize)> + '_ {
        self.0.iter().map(|(k, v)| (*k, *v))
    }
}

/// Final report of a run.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct RunSummary {
    pub seed_nodes: usize,
    pub seed_edges: usize,
    pub entities_created: usize,
    pub entities_updated: usize,
    pub entities_enriched: usize,
    /// Linker edges present after the run (created or matched).
    pub relationships_linked: usize,
    pub relationships_created: usize,
    pub relationships_retracted: usize,
    /// Inference edges written (created or refreshed).
    pub inference_edges: usize,
    pub inference_created: usize,
    pub inference: InferenceReport,
    pub skips: SkipCounts,
    pub stats: GraphStats,
}

impl RunSummary {
    pub fn failed_rules(&self) -> Vec<&str> {
        self.inference.failed_rules().map(|r| r.rule.as_str()).collect()
    }
}

// ============================================================================
// Loader
// ============================================================================

pub struct Loader<S: GraphStore> {
    store: S,
    edge_policy: EdgePolicy,
}

impl<S: GraphStore> Loader<S> {
    pub fn new(store: S) -> Self {
        Self { store, edge_policy: EdgePolicy::default() }
    }

    pub fn with_edge_policy(mut self, policy: EdgePolicy) -> Self {
        self.edge_policy = policy;
        self
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn into_store(self) -> S {
        self.store
    }

    /// Execute one full run. Returns `Err` only when the run aborted.
    pub async fn run(&self, input: LoadInput) -> Result<RunSummary> {
        let store = &self.store;
        let mut summary = RunSummary::default();

        store.verify_connectivity().await?;
        for label in KEYED_LABELS {
            store.ensure_unique_key(label).await?;
        }

        tracing::info!(
            geography = input.geography.len(),
            taxonomy = input.taxonomy.len(),
            "loading seed catalogs"
        );
        for catalog in input.geography.iter().chain(&input.taxonomy) {
            let report = catalog.load(store).await?;
            summary.seed_nodes += report.nodes;
            summary.seed_edges += report.edges;
            for kind in report.skipped {
                summary.skips.record(kind);
            }
        }

        for rejected in &input.rejected {
            let record = rejected.record();
            let error = Error::Validation { record: record.clone(), reason: rejected.reason.clone() };
            skip(&mut summary, &record, error)?;
        }

        tracing::info!(entities = input.entities.len(), policy = ?self.edge_policy, "loading entities");
        for entity in &input.entities {
            self.load_entity(entity, &input.crosswalk, &mut summary).await?;
        }

        tracing::info!(enrichments = input.enrichments.len(), "applying enrichments");
        for enrichment in &input.enrichments {
            match input.crosswalk.enrich(store, &enrichment.external_id, &enrichment.patch).await {
                Ok(_) => summary.entities_enriched += 1,
                Err(e) => skip(&mut summary, &enrichment.external_id, e)?,
            }
        }

        tracing::info!(rules = input.rules.len(), "running inference");
        summary.inference = input.rules.run(store).await?;
        summary.inference_edges = summary.inference.produced();
        summary.inference_created = summary.inference.created();
        summary.stats = store.stats().await?;

        tracing::info!(
            entities_created = summary.entities_created,
            entities_updated = summary.entities_updated,
            relationships_linked = summary.relationships_linked,
            inference_edges = summary.inference_edges,
            skipped = summary.skips.total(),
            "load complete"
        );
        Ok(summary)
    }

    async fn load_entity(
        &self,
        entity: &CanonicalEntity,
        crosswalk: &Crosswalk,
        summary: &mut RunSummary,
    ) -> Result<()> {
        let resolution = crosswalk.resolve(&entity.id);
        let resolved;
        let entity = if resolution.canonical_id() != entity.id {
            resolved = CanonicalEntity { id: resolution.into_canonical_id(), ..entity.clone() };
            &resolved
        } else {
            entity
        };

        match upsert_entity(&self.store, entity, UpsertMode::FullReplace).await {
            Ok(report) if report.outcome.created() => summary.entities_created += 1,
            Ok(_) => summary.entities_updated += 1,
            Err(e) => return skip(summary, &entity.id, e),
        }

        match link_entity(&self.store, entity, crosswalk, self.edge_policy).await {
            Ok(link) => {
                summary.relationships_linked += link.linked;
                summary.relationships_created += link.created;
                summary.relationships_retracted += link.retracted;
                for _ in &link.skipped {
                    summary.skips.record(SkipKind::MissingReference);
                }
                Ok(())
            }
            Err(e) => skip(summary, &entity.id, e),
        }
    }
}

/// Count and log a per-record failure; fatal errors are returned.
fn skip(summary: &mut RunSummary, record: &str, error: Error) -> Result<()> {
    if error.is_fatal() {
        return Err(error);
    }
    let kind = error.skip_kind();
    tracing::warn!(record, kind = ?kind, reason = %error, "skipping record");
    summary.skips.record(kind);
    Ok(())
}
