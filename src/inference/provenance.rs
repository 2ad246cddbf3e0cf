//! Provenance metadata on derived edges.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::model::{PropertyMap, Value};
use crate::{Error, Result};

pub(crate) fn default_confidence() -> f64 {
    1.0
}

/// Why a derived fact exists and how sure the rule is about it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Provenance {
    pub reason: String,
    #[serde(default = "default_confidence")]
    pub confidence: f64,
    /// Name of the producing rule.
    #[serde(default)]
    pub rule: String,
}

impl Provenance {
    pub fn new(rule: impl Into<String>, reason: impl Into<String>, confidence: f64) -> Self {
        Self { reason: reason.into(), confidence, rule: rule.into() }
    }

    /// Confidence must lie in `[0, 1]`.
    pub fn validate(&self) -> Result<()> {
        check_confidence(&self.rule, self.confidence)
    }

    /// Edge properties: `reason`, `confidence`, `rule`, `inferredAt`.
    pub fn to_properties(&self, now: DateTime<Utc>) -> PropertyMap {
        let mut props = PropertyMap::new();
        props.insert("reason".into(), Value::from(self.reason.as_str()));
        props.insert("confidence".into(), Value::Float(self.confidence));
        props.insert("rule".into(), Value::from(self.rule.as_str()));
        props.insert("inferredAt".into(), Value::from(now));
        props
    }
}

pub(crate) fn check_confidence(rule: &str, confidence: f64) -> Result<()> {
    if (0.0..=1.0).contains(&confidence) {
        Ok(())
    } else {
        Err(Error::Validation {
            record: rule.to_string(),
            reason: format!("confidence {confidence} outside [0, 1]"),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_confidence_bounds() {
        assert!(Provenance::new("r", "x", 0.0).validate().is_ok());
        assert!(Provenance::new("r", "x", 1.0).validate().is_ok());
        assert!(Provenance::new("r", "x", 1.01).validate().is_err());
        assert!(Provenance::new("r", "x", f64::NAN).validate().is_err());
    }

    #[test]
    fn test_default_confidence_from_json() {
        let p: Provenance = serde_json::from_str(r#"{"reason": "organic implies non-GMO"}"#).unwrap();
        assert_eq!(p.confidence, 1.0);
        let props = p.to_properties(Utc::now());
        assert_eq!(props["confidence"], Value::Float(1.0));
        assert!(props.contains_key("inferredAt"));
    }
}
