//! # fielder-graph: Supply-Chain Knowledge Graph Loader
//!
//! Builds and maintains a property-graph knowledge base of growers,
//! packinghouses, retailers, products and growing regions from overlapping
//! sources, and derives additional facts from it.
//!
//! ## Design Principles
//!
//! 1. **Trait-first**: `GraphStore` is the contract between the loader and storage
//! 2. **Clean DTOs**: `CanonicalEntity`, `NodeKey`, `Value` cross all boundaries
//! 3. **Exact role sets**: an upsert replaces the role labels, it never appends
//! 4. **Rules are data**: implication tables and tier bins are loaded, not coded
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use fielder_graph::{Loader, LoadInput, MemoryStore, CanonicalEntity, Role};
//!
//! # async fn example() -> fielder_graph::Result<()> {
//! let loader = Loader::new(MemoryStore::new());
//!
//! let mut input = LoadInput::default();
//! input.entities.push(
//!     CanonicalEntity::new("acme_farm", "Acme Farm")
//!         .with_roles([Role::Grower, Role::Retailer])
//!         .with_products(["peach"]),
//! );
//!
//! let summary = loader.run(input).await?;
//! println!("{} entities created", summary.entities_created);
//! # Ok(())
//! # }
//! ```
//!
//! ## Load order
//!
//! connectivity → constraints → geography → taxonomy → entities (input
//! order) → enrichments → inference (declaration order) → summary.

// ============================================================================
// Modules
// ============================================================================

pub mod model;
pub mod storage;
pub mod crosswalk;
pub mod upsert;
pub mod linker;
pub mod inference;
pub mod seed;
pub mod pipeline;
pub mod config;

// ============================================================================
// Re-exports: Model (the DTOs)
// ============================================================================

pub use model::{
    Node, Relationship, Value, PropertyMap, NodeKey, NodeId, RelId,
    CanonicalEntity, EntityPatch, Role, RoleSet, UpsertMode, VerificationLevel,
};

// ============================================================================
// Re-exports: Storage
// ============================================================================

pub use storage::{
    GraphStore, MemoryStore, RetryingStore, RetryPolicy,
    Pattern, PropertyFilter, PropertyWrite, Record, GraphStats, WriteOutcome,
};

// ============================================================================
// Re-exports: Engine
// ============================================================================

pub use crosswalk::{Crosswalk, CrosswalkRow, Resolution};
pub use upsert::{upsert_entity, enrich_entity, UpsertReport};
pub use linker::{link_entity, EdgePolicy, LinkReport};
pub use inference::{
    RuleSet, Rule, RuleReport, Provenance, InferenceReport,
    PropagationRule, Implication, BinningRule, QualityTierBinning, TierBin,
    SuitabilityRule, CategoryGate, DerivedAttribute,
};
pub use seed::{SeedCatalog, SeedNode, SeedEdge};
pub use pipeline::{Loader, LoadInput, Enrichment, RejectedRecord, RunSummary, SkipCounts};
pub use config::LoaderConfig;

// ============================================================================
// Error Types
// ============================================================================

#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The backend cannot be reached. Aborts the run.
    #[error("Connectivity error: {0}")]
    Connectivity(String),

    /// Transient backend failure, retried by `RetryingStore`.
    #[error("Store error: {0}")]
    Store(String),

    #[error("Validation error for '{record}': {reason}")]
    Validation { record: String, reason: String },

    #[error("Missing reference {key} ({context})")]
    MissingReference { context: String, key: String },

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Rule '{rule}': value {value} matches {matches} bins, expected exactly one")]
    AmbiguousBin { rule: String, value: f64, matches: usize },

    #[error("Type error: expected {expected}, got {got}")]
    TypeError { expected: String, got: String },

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Per-record failure categories reported in the run summary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SkipKind {
    Validation,
    MissingReference,
    NotFound,
    AmbiguousBin,
    Other,
}

impl Error {
    /// Only connectivity failures abort a load.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Error::Connectivity(_))
    }

    /// Worth retrying against the same backend.
    pub fn is_transient(&self) -> bool {
        matches!(self, Error::Store(_))
    }

    pub fn skip_kind(&self) -> SkipKind {
        match self {
            Error::Validation { .. } => SkipKind::Validation,
            Error::MissingReference { .. } => SkipKind::MissingReference,
            Error::NotFound(_) => SkipKind::NotFound,
            Error::AmbiguousBin { .. } => SkipKind::AmbiguousBin,
            _ => SkipKind::Other,
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
