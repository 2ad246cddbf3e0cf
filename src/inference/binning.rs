//! Threshold binning: assigns a node to the one tier whose half-open
//! interval `[lower, upper)` contains a numeric property.
//!
//! A [`QualityTierBinning`] is checked when it is built: bins must be
//! ordered, contiguous (`bins[i].upper == bins[i + 1].lower`) and only the
//! first lower bound and the last upper bound may be open. Inside its domain
//! exactly one bin matches any value. Outside the domain (or for NaN) no bin
//! matches and evaluation fails with `AmbiguousBin`, which aborts that rule
//! only.

use chrono::Utc;
use serde::{Deserialize, Serialize};

use super::provenance::{check_confidence, default_confidence, Provenance};
use super::RuleReport;
use crate::model::{label, rel, NodeKey, PropertyMap, Value};
use crate::storage::{GraphStore, Pattern, PropertyFilter, PropertyWrite};
use crate::{Error, Result};

/// A tier and its interval. `None` bounds are open.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TierBin {
    pub lower: Option<f64>,
    pub upper: Option<f64>,
    pub tier: String,
}

impl TierBin {
    pub fn new(lower: Option<f64>, upper: Option<f64>, tier: impl Into<String>) -> Self {
        Self { lower, upper, tier: tier.into() }
    }

    /// Half-open containment: `lower <= v < upper`.
    pub fn contains(&self, v: f64) -> bool {
        self.lower.is_none_or(|l| v >= l) && self.upper.is_none_or(|u| v < u)
    }
}

/// Ordered, contiguous, disjoint tier bins.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "Vec<TierBin>", into = "Vec<TierBin>")]
pub struct QualityTierBinning {
    bins: Vec<TierBin>,
}

impl QualityTierBinning {
    pub fn new(bins: Vec<TierBin>) -> Result<Self> {
        validate_bins(&bins)?;
        Ok(Self { bins })
    }

    pub fn bins(&self) -> &[TierBin] {
        &self.bins
    }

    /// `(lowest lower bound, highest upper bound)`; `None` is unbounded.
    pub fn domain(&self) -> (Option<f64>, Option<f64>) {
        (
            self.bins.first().and_then(|b| b.lower),
            self.bins.last().and_then(|b| b.upper),
        )
    }

    pub fn matching(&self, v: f64) -> Vec<&TierBin> {
        self.bins.iter().filter(|b| b.contains(v)).collect()
    }

    /// The unique bin containing `v`, or `AmbiguousBin`.
    pub fn assign(&self, rule: &str, v: f64) -> Result<&TierBin> {
        match self.matching(v).as_slice() {
            [bin] => Ok(*bin),
            other => Err(Error::AmbiguousBin { rule: rule.to_string(), value: v, matches: other.len() }),
        }
    }
}

impl TryFrom<Vec<TierBin>> for QualityTierBinning {
    type Error = Error;

    fn try_from(bins: Vec<TierBin>) -> Result<Self> {
        Self::new(bins)
    }
}

impl From<QualityTierBinning> for Vec<TierBin> {
    fn from(binning: QualityTierBinning) -> Self {
        binning.bins
    }
}

fn invalid(reason: String) -> Error {
    Error::Validation { record: "quality tier binning".into(), reason }
}

fn validate_bins(bins: &[TierBin]) -> Result<()> {
    if bins.is_empty() {
        return Err(invalid("no bins".into()));
    }
    let last = bins.len() - 1;
    for (i, bin) in bins.iter().enumerate() {
        if bin.tier.trim().is_empty() {
            return Err(invalid(format!("bin {i} has no tier")));
        }
        if bin.lower.is_some_and(f64::is_nan) || bin.upper.is_some_and(f64::is_nan) {
            return Err(invalid(format!("bin {i} has a NaN bound")));
        }
        if bin.lower.is_none() && i != 0 {
            return Err(invalid(format!("bin {i} ('{}') has an open lower bound", bin.tier)));
        }
        if bin.upper.is_none() && i != last {
            return Err(invalid(format!("bin {i} ('{}') has an open upper bound", bin.tier)));
        }
        if let (Some(l), Some(u)) = (bin.lower, bin.upper) {
            if l >= u {
                return Err(invalid(format!("bin {i} ('{}') is empty: [{l}, {u})", bin.tier)));
            }
        }
    }
    for (i, pair) in bins.windows(2).enumerate() {
        if pair[0].upper != pair[1].lower {
            return Err(invalid(format!(
                "bins {i} and {} are not contiguous: {:?} vs {:?}",
                i + 1,
                pair[0].upper,
                pair[1].lower
            )));
        }
    }
    Ok(())
}

fn default_tier_label() -> String {
    label::QUALITY_TIER.to_string()
}

fn default_rel_type() -> String {
    rel::HAS_QUALITY_TIER.to_string()
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BinningRule {
    pub name: String,
    /// Label of the binned nodes.
    pub label: String,
    /// Numeric property to bin.
    pub property: String,
    pub bins: QualityTierBinning,
    #[serde(default = "default_tier_label")]
    pub tier_label: String,
    #[serde(default = "default_rel_type")]
    pub rel_type: String,
    pub reason: String,
    #[serde(default = "default_confidence")]
    pub confidence: f64,
}

impl BinningRule {
    pub fn new(
        name: impl Into<String>,
        label: impl Into<String>,
        property: impl Into<String>,
        bins: QualityTierBinning,
        reason: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            label: label.into(),
            property: property.into(),
            bins,
            tier_label: default_tier_label(),
            rel_type: default_rel_type(),
            reason: reason.into(),
            confidence: 1.0,
        }
    }

    pub fn tier_key(&self, tier: &str) -> NodeKey {
        NodeKey::new(&self.tier_label, tier)
    }

    pub fn validate(&self) -> Result<()> {
        check_confidence(&self.name, self.confidence)?;
        validate_bins(self.bins.bins())
    }

    pub(crate) async fn apply<S: GraphStore + ?Sized>(
        &self,
        store: &S,
        report: &mut RuleReport,
    ) -> Result<()> {
        self.ensure_tiers(store).await?;

        let rows = store
            .query(&Pattern::nodes_where(&self.label, vec![PropertyFilter::Exists(self.property.clone())]))
            .await?;
        let column = format!("n.{}", self.property);
        let provenance = Provenance::new(&self.name, &self.reason, self.confidence);
        let now = Utc::now();

        for row in rows {
            let subject = row.key("n")?.clone();
            let value = match row.get::<f64>(&column) {
                Ok(v) => v,
                Err(e) => {
                    report.skip(&self.name, &subject, &e);
                    continue;
                }
            };
            report.matched += 1;

            let tier = self.tier_key(&self.bins.assign(&self.name, value)?.tier);
            let outcome = store.upsert_edge(&subject, &self.rel_type, &tier, provenance.to_properties(now)).await?;
            report.record_production(outcome);

            // A node sits in one tier: drop edges left by an earlier value.
            for stale in store.outgoing_keys(&subject, &self.rel_type).await? {
                if stale.label == self.tier_label && stale != tier {
                    store.delete_edge(&subject, &self.rel_type, &stale).await?;
                }
            }
        }
        Ok(())
    }

    /// Tier nodes are owned by the rule and created on demand.
    async fn ensure_tiers<S: GraphStore + ?Sized>(&self, store: &S) -> Result<()> {
        for (rank, bin) in self.bins.bins().iter().enumerate() {
            let mut props = PropertyMap::new();
            props.insert("name".into(), Value::from(bin.tier.as_str()));
            props.insert("rank".into(), Value::Int(rank as i64));
            props.insert("lower".into(), Value::from(bin.lower));
            props.insert("upper".into(), Value::from(bin.upper));
            store
                .upsert_node(&self.tier_key(&bin.tier), &[], &[], props, PropertyWrite::Merge)
                .await?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn brix_bins() -> QualityTierBinning {
        QualityTierBinning::new(vec![
            TierBin::new(None, Some(-0.2), "yield"),
            TierBin::new(Some(-0.2), Some(0.3), "standard"),
            TierBin::new(Some(0.3), None, "premium"),
        ])
        .unwrap()
    }

    #[test]
    fn test_upper_bound_is_exclusive() {
        let bins = brix_bins();
        assert_eq!(bins.assign("brix", 0.3).unwrap().tier, "premium");
        assert_eq!(bins.assign("brix", 0.2999).unwrap().tier, "standard");
        assert_eq!(bins.assign("brix", -0.2).unwrap().tier, "standard");
        assert_eq!(bins.assign("brix", -5.0).unwrap().tier, "yield");
    }

    #[test]
    fn test_rejects_gaps_overlaps_and_inner_open_bounds() {
        let gap = QualityTierBinning::new(vec![
            TierBin::new(None, Some(0.0), "low"),
            TierBin::new(Some(0.1), None, "high"),
        ]);
        assert!(matches!(gap, Err(Error::Validation { .. })));

        let overlap = QualityTierBinning::new(vec![
            TierBin::new(None, Some(0.5), "low"),
            TierBin::new(Some(0.4), None, "high"),
        ]);
        assert!(overlap.is_err());

        let inner_open = QualityTierBinning::new(vec![
            TierBin::new(None, None, "all"),
            TierBin::new(None, Some(1.0), "dup"),
        ]);
        assert!(inner_open.is_err());

        assert!(QualityTierBinning::new(vec![]).is_err());
    }

    #[test]
    fn test_outside_bounded_domain_is_ambiguous() {
        let bins = QualityTierBinning::new(vec![
            TierBin::new(Some(0.0), Some(10.0), "low"),
            TierBin::new(Some(10.0), Some(20.0), "high"),
        ])
        .unwrap();
        let err = bins.assign("bounded", 20.0).unwrap_err();
        assert!(matches!(err, Error::AmbiguousBin { matches: 0, .. }));
        assert!(bins.assign("bounded", f64::NAN).is_err());
    }

    #[test]
    fn test_deserialize_validates() {
        let ok: QualityTierBinning = serde_json::from_str(
            r#"[{"lower": null, "upper": 0.0, "tier": "low"}, {"lower": 0.0, "upper": null, "tier": "high"}]"#,
        )
        .unwrap();
        assert_eq!(ok.bins().len(), 2);

        let bad = serde_json::from_str::<QualityTierBinning>(
            r#"[{"lower": null, "upper": 0.0, "tier": "low"}, {"lower": 1.0, "upper": null, "tier": "high"}]"#,
        );
        assert!(bad.is_err());
    }

    fn contiguous_bins() -> impl Strategy<Value = QualityTierBinning> {
        (prop::collection::vec(0.01f64..100.0, 1..8), any::<bool>(), any::<bool>()).prop_map(
            |(widths, open_low, open_high)| {
                let mut edges = vec![-50.0];
                for w in &widths {
                    let next = edges[edges.len() - 1] + w;
                    edges.push(next);
                }
                let n = widths.len();
                let bins = (0..n)
                    .map(|i| {
                        let lower = if i == 0 && open_low { None } else { Some(edges[i]) };
                        let upper = if i == n - 1 && open_high { None } else { Some(edges[i + 1]) };
                        TierBin::new(lower, upper, format!("t{i}"))
                    })
                    .collect();
                QualityTierBinning::new(bins).unwrap()
            },
        )
    }

    proptest! {
        #[test]
        fn prop_exactly_one_bin_inside_domain(bins in contiguous_bins(), v in -100.0f64..1000.0) {
            let (lo, hi) = bins.domain();
            let inside = lo.is_none_or(|l| v >= l) && hi.is_none_or(|h| v < h);
            let hits = bins.matching(v).len();
            if inside {
                prop_assert_eq!(hits, 1);
                prop_assert!(bins.assign("p", v).is_ok());
            } else {
                prop_assert_eq!(hits, 0);
                let is_ambiguous = matches!(bins.assign("p", v), Err(Error::AmbiguousBin { .. }));
                prop_assert!(is_ambiguous);
            }
        }
    }
}
