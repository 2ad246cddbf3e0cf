//! # Inference Rule Engine
//!
//! An ordered list of rules, evaluated once per load after every entity and
//! relationship write. Rules run in declaration order in a single pass, so a
//! later rule sees edges produced by an earlier one; nothing iterates to a
//! fixpoint.
//!
//! Every production is an idempotent edge MERGE carrying [`Provenance`].
//! A failing rule is logged and reported; the remaining rules still run.
//! Only a connectivity failure stops the pass.
//!
//! ## Rule shapes
//!
//! | Shape | Type | Produces |
//! |-------|------|----------|
//! | Propagation | [`PropagationRule`] | `X -IMPLIES-> Y` from an implication table |
//! | Threshold binning | [`BinningRule`] | `A -HAS_QUALITY_TIER-> tier` |
//! | Range suitability | [`SuitabilityRule`] | `A -SUITABLE_FOR_ZONE-> B` |
//! | Derived attribute | [`DerivedAttribute`] | nothing; evaluated at read time |

pub mod provenance;
pub mod propagation;
pub mod binning;
pub mod suitability;
pub mod derived;

use std::io::Read;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::model::{label, NodeKey};
use crate::storage::{GraphStore, WriteOutcome};
use crate::{Error, Result, SkipKind};

pub use provenance::Provenance;
pub use propagation::{Implication, PropagationRule};
pub use binning::{BinningRule, QualityTierBinning, TierBin};
pub use suitability::{CategoryGate, SuitabilityRule};
pub use derived::{DerivedAttribute, DerivedValue};

// ============================================================================
// Rules
// ============================================================================

/// A write-time inference rule. Deserializes from `{"kind": "...", ...}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Rule {
    Propagation(PropagationRule),
    Binning(BinningRule),
    Suitability(SuitabilityRule),
}

impl Rule {
    pub fn name(&self) -> &str {
        match self {
            Rule::Propagation(r) => &r.name,
            Rule::Binning(r) => &r.name,
            Rule::Suitability(r) => &r.name,
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.name().trim().is_empty() {
            return Err(Error::Validation { record: "rule".into(), reason: "rule has no name".into() });
        }
        match self {
            Rule::Propagation(r) => r.validate(),
            Rule::Binning(r) => r.validate(),
            Rule::Suitability(r) => r.validate(),
        }
    }

    async fn apply<S: GraphStore + ?Sized>(&self, store: &S, report: &mut RuleReport) -> Result<()> {
        match self {
            Rule::Propagation(r) => r.apply(store, report).await,
            Rule::Binning(r) => r.apply(store, report).await,
            Rule::Suitability(r) => r.apply(store, report).await,
        }
    }
}

impl From<PropagationRule> for Rule {
    fn from(r: PropagationRule) -> Self { Rule::Propagation(r) }
}

impl From<BinningRule> for Rule {
    fn from(r: BinningRule) -> Self { Rule::Binning(r) }
}

impl From<SuitabilityRule> for Rule {
    fn from(r: SuitabilityRule) -> Self { Rule::Suitability(r) }
}

// ============================================================================
// Reports
// ============================================================================

/// Outcome of one rule in one pass.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct RuleReport {
    pub rule: String,
    /// Candidate tuples the pattern matched.
    pub matched: usize,
    /// Edges written (created or refreshed).
    pub produced: usize,
    /// Of those, newly created.
    pub created: usize,
    /// Matches whose production was skipped.
    pub skipped: usize,
    /// Set when the rule aborted.
    pub error: Option<String>,
    pub error_kind: Option<SkipKind>,
}

impl RuleReport {
    pub fn new(rule: impl Into<String>) -> Self {
        Self { rule: rule.into(), ..Default::default() }
    }

    pub fn failed(&self) -> bool {
        self.error.is_some()
    }

    pub(crate) fn record_production(&mut self, outcome: WriteOutcome) {
        self.produced += 1;
        if outcome.created() {
            self.created += 1;
        }
    }

    pub(crate) fn skip(&mut self, rule: &str, subject: &NodeKey, error: &Error) {
        tracing::warn!(rule, record = %subject, reason = %error, "skipping inference match");
        self.skipped += 1;
    }
}

/// Reports of a whole pass, in rule order.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct InferenceReport {
    pub rules: Vec<RuleReport>,
}

impl InferenceReport {
    pub fn produced(&self) -> usize {
        self.rules.iter().map(|r| r.produced).sum()
    }

    pub fn created(&self) -> usize {
        self.rules.iter().map(|r| r.created).sum()
    }

    pub fn skipped(&self) -> usize {
        self.rules.iter().map(|r| r.skipped).sum()
    }

    pub fn failed_rules(&self) -> impl Iterator<Item = &RuleReport> {
        self.rules.iter().filter(|r| r.failed())
    }

    pub fn get(&self, rule: &str) -> Option<&RuleReport> {
        self.rules.iter().find(|r| r.rule == rule)
    }
}

// ============================================================================
// RuleSet
// ============================================================================

/// The ordered, validated rule list.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RuleSet {
    rules: Vec<Rule>,
}

impl RuleSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a rule after validating it. Names are unique within a set.
    pub fn register(&mut self, rule: impl Into<Rule>) -> Result<()> {
        let rule = rule.into();
        rule.validate()?;
        if self.rules.iter().any(|r| r.name() == rule.name()) {
            return Err(Error::Validation {
                record: rule.name().to_string(),
                reason: "duplicate rule name".into(),
            });
        }
        self.rules.push(rule);
        Ok(())
    }

    pub fn from_rules(rules: impl IntoIterator<Item = Rule>) -> Result<Self> {
        let mut set = Self::new();
        for rule in rules {
            set.register(rule)?;
        }
        Ok(set)
    }

    /// A JSON array of rule definitions.
    pub fn from_reader(reader: impl Read) -> Result<Self> {
        let rules: Vec<Rule> = serde_json::from_reader(reader)?;
        Self::from_rules(rules)
    }

    pub fn from_path(path: impl AsRef<Path>) -> Result<Self> {
        let file = std::fs::File::open(path)?;
        Self::from_reader(std::io::BufReader::new(file))
    }

    pub fn rules(&self) -> &[Rule] {
        &self.rules
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    /// Names in declaration order.
    pub fn names(&self) -> Vec<&str> {
        self.rules.iter().map(Rule::name).collect()
    }

    /// Run every rule once, in order. Returns `Err` only for fatal
    /// (connectivity) failures; anything else is captured in the rule's report.
    pub async fn run<S: GraphStore + ?Sized>(&self, store: &S) -> Result<InferenceReport> {
        let mut pass = InferenceReport::default();
        for rule in &self.rules {
            let mut report = RuleReport::new(rule.name());
            match rule.apply(store, &mut report).await {
                Ok(()) => {
                    tracing::info!(
                        rule = rule.name(),
                        matched = report.matched,
                        produced = report.produced,
                        created = report.created,
                        skipped = report.skipped,
                        "rule applied"
                    );
                }
                Err(e) if e.is_fatal() => return Err(e),
                Err(e) => {
                    tracing::error!(rule = rule.name(), error = %e, "rule failed, continuing with next rule");
                    report.error_kind = Some(e.skip_kind());
                    report.error = Some(e.to_string());
                }
            }
            pass.rules.push(report);
        }
        Ok(pass)
    }
}

// ============================================================================
// Default domain rules
// ============================================================================

/// Certification implications shipped with the loader.
pub fn certification_implications() -> PropagationRule {
    PropagationRule::new(
        "certification_implications",
        vec![
            Implication::new("usda_organic", "non_gmo", "USDA Organic prohibits genetically engineered inputs"),
            Implication::new(
                "regenerative_organic_certified",
                "usda_organic",
                "Regenerative Organic Certified requires USDA Organic as a baseline",
            ),
            Implication::new("demeter_biodynamic", "usda_organic", "Demeter Biodynamic standards include organic"),
            Implication::new("non_gmo_project_verified", "non_gmo", "Non-GMO Project verification"),
            Implication::new(
                "certified_naturally_grown",
                "no_synthetic_pesticides",
                "Certified Naturally Grown follows organic input rules",
            )
            .with_confidence(0.9),
        ],
    )
}

/// Rootstock quality tiers from the rootstock's Brix modifier.
pub fn rootstock_quality_tiers() -> Result<BinningRule> {
    let bins = QualityTierBinning::new(vec![
        TierBin::new(None, Some(-0.2), "yield"),
        TierBin::new(Some(-0.2), Some(0.3), "standard"),
        TierBin::new(Some(0.3), None, "premium"),
    ])?;
    Ok(BinningRule::new(
        "rootstock_quality_tier",
        label::ROOTSTOCK,
        "brixModifier",
        bins,
        "rootstock Brix modifier",
    ))
}

/// The default rule list, in evaluation order.
pub fn defaults() -> Result<RuleSet> {
    let mut set = RuleSet::new();
    set.register(certification_implications())?;
    set.register(rootstock_quality_tiers()?)?;
    set.register(SuitabilityRule::cultivar_zones())?;
    Ok(set)
}
