//! Identity reconciliation across source systems.
//!
//! The crosswalk is a static table of `{externalId, canonicalId|null}` rows,
//! loaded once before any entity load. A row with a canonical id says the
//! external record describes an entity that already exists under another
//! source's id. A null canonical id, or no row at all, means the external id
//! itself becomes the canonical id.

use std::collections::HashMap;
use std::io::Read;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::model::EntityPatch;
use crate::storage::GraphStore;
use crate::upsert::{enrich_entity, UpsertReport};
use crate::{Error, Result};

/// One row of the crosswalk input file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CrosswalkRow {
    pub external_id: String,
    #[serde(default)]
    pub canonical_id: Option<String>,
}

impl CrosswalkRow {
    pub fn mapped(external_id: impl Into<String>, canonical_id: impl Into<String>) -> Self {
        Self { external_id: external_id.into(), canonical_id: Some(canonical_id.into()) }
    }

    pub fn unmapped(external_id: impl Into<String>) -> Self {
        Self { external_id: external_id.into(), canonical_id: None }
    }
}

/// Outcome of resolving an external id.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Resolution {
    /// The record corresponds to this existing canonical entity.
    Mapped(String),
    /// No prior match: the external id is minted as the canonical id.
    Unmapped(String),
}

impl Resolution {
    /// The canonical id to write to, whichever branch was taken.
    pub fn canonical_id(&self) -> &str {
        match self {
            Resolution::Mapped(id) | Resolution::Unmapped(id) => id,
        }
    }

    pub fn into_canonical_id(self) -> String {
        match self {
            Resolution::Mapped(id) | Resolution::Unmapped(id) => id,
        }
    }

    pub fn is_mapped(&self) -> bool {
        matches!(self, Resolution::Mapped(_))
    }
}

/// External id → canonical id table.
#[derive(Debug, Clone, Default)]
pub struct Crosswalk {
    rows: HashMap<String, Option<String>>,
}

impl Crosswalk {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build the table. Each external id may map to at most one canonical
    /// id; a conflicting duplicate row is a `Validation` error. Exact
    /// duplicates are accepted. Blank canonical ids count as null.
    pub fn from_rows(rows: impl IntoIterator<Item = CrosswalkRow>) -> Result<Self> {
        let mut table: HashMap<String, Option<String>> = HashMap::new();
        for row in rows {
            let external = row.external_id.trim().to_string();
            if external.is_empty() {
                return Err(Error::Validation {
                    record: "crosswalk".into(),
                    reason: "row with empty externalId".into(),
                });
            }
            let canonical = row.canonical_id
                .map(|c| c.trim().to_string())
                .filter(|c| !c.is_empty());

            match table.get(&external) {
                Some(existing) if *existing != canonical => {
                    return Err(Error::Validation {
                        record: external,
                        reason: format!(
                            "conflicting crosswalk rows: {existing:?} vs {canonical:?}"
                        ),
                    });
                }
                Some(_) => {}
                None => {
                    table.insert(external, canonical);
                }
            }
        }
        Ok(Self { rows: table })
    }

    pub fn from_reader(reader: impl Read) -> Result<Self> {
        let rows: Vec<CrosswalkRow> = serde_json::from_reader(reader)?;
        Self::from_rows(rows)
    }

    pub fn from_path(path: impl AsRef<Path>) -> Result<Self> {
        let file = std::fs::File::open(path)?;
        Self::from_reader(std::io::BufReader::new(file))
    }

    /// Resolve an external id. Pure given the table. Surrounding whitespace
    /// is not part of an id, in the lookup or in a minted key.
    pub fn resolve(&self, external_id: &str) -> Resolution {
        let external_id = external_id.trim();
        match self.rows.get(external_id) {
            Some(Some(canonical)) => Resolution::Mapped(canonical.clone()),
            _ => Resolution::Unmapped(external_id.to_string()),
        }
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Rows that point at an existing canonical entity.
    pub fn mapped_count(&self) -> usize {
        self.rows.values().filter(|c| c.is_some()).count()
    }

    /// ENRICH_MERGE a secondary-source record into the entity its external
    /// id resolves to. The target must already exist (`NotFound` otherwise);
    /// the caller decides whether to create it first or skip.
    pub async fn enrich<S: GraphStore + ?Sized>(
        &self,
        store: &S,
        external_id: &str,
        patch: &EntityPatch,
    ) -> Result<UpsertReport> {
        let resolution = self.resolve(external_id);
        tracing::debug!(
            external_id,
            canonical_id = resolution.canonical_id(),
            mapped = resolution.is_mapped(),
            "crosswalk resolved"
        );
        enrich_entity(store, resolution.canonical_id(), patch).await
    }
}
