//! Canonical supply-chain entities and their role sets.
//!
//! A [`CanonicalEntity`] is the full record of a primary load. An
//! [`EntityPatch`] is the partial record of an enrichment load: a `None`
//! field leaves the stored value untouched.

use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{PropertyMap, Value};
use crate::{Error, Result};

// ============================================================================
// Roles
// ============================================================================

/// Supply-chain role of an entity. Each role is written as a node label.
///
/// Serializes snake_case; deserializes through [`FromStr`], so any letter
/// case is accepted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", try_from = "String")]
pub enum Role {
    Grower,
    Packinghouse,
    Retailer,
    Distributor,
    Processor,
}

impl Role {
    /// The complete role universe. Upserts clear every one of these labels
    /// before applying the declared set, so a new variant must be listed here.
    pub const ALL: [Role; 5] = [
        Role::Grower,
        Role::Packinghouse,
        Role::Retailer,
        Role::Distributor,
        Role::Processor,
    ];

    pub fn label(&self) -> &'static str {
        match self {
            Role::Grower => "Grower",
            Role::Packinghouse => "Packinghouse",
            Role::Retailer => "Retailer",
            Role::Distributor => "Distributor",
            Role::Processor => "Processor",
        }
    }

    /// Labels of the whole universe, in declaration order.
    pub fn universe_labels() -> [&'static str; 5] {
        Role::ALL.map(|r| r.label())
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

impl FromStr for Role {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Role::ALL
            .into_iter()
            .find(|r| r.label().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| Error::Validation {
                record: s.to_string(),
                reason: "unknown role".into(),
            })
    }
}

impl TryFrom<String> for Role {
    type Error = Error;

    fn try_from(s: String) -> Result<Self> {
        s.parse()
    }
}

/// Ordered, duplicate-free role set.
pub type RoleSet = BTreeSet<Role>;

/// Labels for a role set, in role order.
pub fn role_labels(roles: &RoleSet) -> Vec<&'static str> {
    roles.iter().map(Role::label).collect()
}

// ============================================================================
// Verification level
// ============================================================================

/// How strongly the entity's existence and attributes have been confirmed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VerificationLevel {
    #[default]
    Unverified,
    SelfReported,
    WebsiteVerified,
    ThirdPartyVerified,
}

impl VerificationLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            VerificationLevel::Unverified => "unverified",
            VerificationLevel::SelfReported => "self_reported",
            VerificationLevel::WebsiteVerified => "website_verified",
            VerificationLevel::ThirdPartyVerified => "third_party_verified",
        }
    }
}

// ============================================================================
// Upsert mode
// ============================================================================

/// How an incoming record's fields combine with the stored node.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum UpsertMode {
    /// Primary loads: every field is overwritten, absent fields become empty.
    #[default]
    FullReplace,
    /// Secondary loads: present fields overwrite, absent fields are untouched.
    EnrichMerge,
}

// ============================================================================
// Entity records
// ============================================================================

/// Postal code as stored and keyed: trimmed and uppercased. Blank is `None`.
pub fn normalize_state_code(code: &str) -> Option<String> {
    let code = code.trim();
    (!code.is_empty()).then(|| code.to_ascii_uppercase())
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Coordinates {
    pub lat: f64,
    pub lon: f64,
}

/// Full record of a canonical entity, as supplied by a primary load.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct CanonicalEntity {
    pub id: String,
    pub name: String,
    pub roles: RoleSet,

    // Location
    pub city: Option<String>,
    pub state_code: Option<String>,
    pub coordinates: Option<Coordinates>,
    pub website: Option<String>,

    // Role-specific attribute bags
    pub facility_types: Vec<String>,
    pub retail_channels: Vec<String>,
    pub b2b_channels: Vec<String>,

    // Tags
    pub certifications: Vec<String>,
    pub features: Vec<String>,

    pub verification_level: VerificationLevel,
    pub data_source: Option<String>,

    // Declared references, turned into edges by the linker
    pub products: Vec<String>,
    pub region: Option<String>,
    pub suppliers: Vec<String>,
}

impl CanonicalEntity {
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self { id: id.into(), name: name.into(), ..Default::default() }
    }

    pub fn with_roles(mut self, roles: impl IntoIterator<Item = Role>) -> Self {
        self.roles = roles.into_iter().collect();
        self
    }

    pub fn with_state(mut self, state_code: impl Into<String>) -> Self {
        self.state_code = Some(state_code.into());
        self
    }

    pub fn with_products<S: Into<String>>(mut self, products: impl IntoIterator<Item = S>) -> Self {
        self.products = products.into_iter().map(Into::into).collect();
        self
    }

    pub fn has_role(&self, role: Role) -> bool {
        self.roles.contains(&role)
    }

    /// Every entity needs a non-blank id and at least one role.
    pub fn validate(&self) -> Result<()> {
        if self.id.trim().is_empty() {
            return Err(Error::Validation {
                record: self.name.clone(),
                reason: "entity id is empty".into(),
            });
        }
        if self.roles.is_empty() {
            return Err(Error::Validation {
                record: self.id.clone(),
                reason: "entity declares no roles".into(),
            });
        }
        Ok(())
    }

    /// Complete property bag. Absent optional fields map to `Null` (removed
    /// by the store) and absent bags to empty lists, so nothing stale survives
    /// a full replace.
    pub fn to_properties(&self, now: DateTime<Utc>) -> PropertyMap {
        let mut props = PropertyMap::new();
        props.insert("id".into(), Value::from(self.id.as_str()));
        props.insert("name".into(), Value::from(self.name.as_str()));
        props.insert("city".into(), Value::from(self.city.clone()));
        props.insert(
            "stateCode".into(),
            Value::from(self.state_code.as_deref().and_then(normalize_state_code)),
        );
        props.insert("lat".into(), Value::from(self.coordinates.map(|c| c.lat)));
        props.insert("lon".into(), Value::from(self.coordinates.map(|c| c.lon)));
        props.insert("website".into(), Value::from(self.website.clone()));
        props.insert("facilityTypes".into(), Value::from(self.facility_types.clone()));
        props.insert("retailChannels".into(), Value::from(self.retail_channels.clone()));
        props.insert("b2bChannels".into(), Value::from(self.b2b_channels.clone()));
        props.insert("certifications".into(), Value::from(self.certifications.clone()));
        props.insert("features".into(), Value::from(self.features.clone()));
        props.insert("verificationLevel".into(), Value::from(self.verification_level.as_str()));
        props.insert("dataSource".into(), Value::from(self.data_source.clone()));
        props.insert("updatedAt".into(), Value::from(now));
        props
    }
}

/// Partial record for enrichment loads. `None` means "not supplied".
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct EntityPatch {
    pub name: Option<String>,
    pub roles: Option<RoleSet>,
    pub city: Option<String>,
    pub state_code: Option<String>,
    pub coordinates: Option<Coordinates>,
    pub website: Option<String>,
    pub facility_types: Option<Vec<String>>,
    pub retail_channels: Option<Vec<String>>,
    pub b2b_channels: Option<Vec<String>>,
    pub certifications: Option<Vec<String>>,
    pub features: Option<Vec<String>>,
    pub verification_level: Option<VerificationLevel>,
    pub data_source: Option<String>,
}

impl EntityPatch {
    /// A supplied role set must not be empty; omitting it is fine.
    pub fn validate(&self, record: &str) -> Result<()> {
        if matches!(&self.roles, Some(roles) if roles.is_empty()) {
            return Err(Error::Validation {
                record: record.to_string(),
                reason: "patch supplies an empty role set".into(),
            });
        }
        Ok(())
    }

    /// Only the supplied fields, plus the `updatedAt` stamp.
    pub fn to_properties(&self, now: DateTime<Utc>) -> PropertyMap {
        let mut props = PropertyMap::new();
        let mut put = |key: &str, value: Option<Value>| {
            if let Some(v) = value {
                props.insert(key.to_string(), v);
            }
        };
        put("name", self.name.clone().map(Value::from));
        put("city", self.city.clone().map(Value::from));
        put("stateCode", self.state_code.as_deref().and_then(normalize_state_code).map(Value::from));
        put("lat", self.coordinates.map(|c| Value::from(c.lat)));
        put("lon", self.coordinates.map(|c| Value::from(c.lon)));
        put("website", self.website.clone().map(Value::from));
        put("facilityTypes", self.facility_types.clone().map(Value::from));
        put("retailChannels", self.retail_channels.clone().map(Value::from));
        put("b2bChannels", self.b2b_channels.clone().map(Value::from));
        put("certifications", self.certifications.clone().map(Value::from));
        put("features", self.features.clone().map(Value::from));
        put("verificationLevel", self.verification_level.map(|v| Value::from(v.as_str())));
        put("dataSource", self.data_source.clone().map(Value::from));
        props.insert("updatedAt".into(), Value::from(now));
        props
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_role_parse_is_case_insensitive() {
        assert_eq!("grower".parse::<Role>().unwrap(), Role::Grower);
        assert_eq!("Packinghouse".parse::<Role>().unwrap(), Role::Packinghouse);
        assert!("wholesaler".parse::<Role>().is_err());
    }

    #[test]
    fn test_validate_rejects_empty_id_and_roles() {
        let no_roles = CanonicalEntity::new("acme_farm", "Acme Farm");
        assert!(matches!(no_roles.validate(), Err(Error::Validation { .. })));

        let no_id = CanonicalEntity::new("  ", "Nameless").with_roles([Role::Grower]);
        assert!(matches!(no_id.validate(), Err(Error::Validation { .. })));

        let ok = CanonicalEntity::new("acme_farm", "Acme Farm").with_roles([Role::Grower]);
        assert!(ok.validate().is_ok());
    }

    #[test]
    fn test_full_properties_blank_absent_fields() {
        let e = CanonicalEntity::new("acme_farm", "Acme Farm").with_roles([Role::Grower]);
        let props = e.to_properties(Utc::now());
        assert_eq!(props["website"], Value::Null);
        assert_eq!(props["certifications"], Value::List(vec![]));
        assert_eq!(props["verificationLevel"], Value::from("unverified"));
    }

    #[test]
    fn test_patch_properties_only_supplied() {
        let patch = EntityPatch {
            website: Some("https://acme.example".into()),
            ..Default::default()
        };
        let props = patch.to_properties(Utc::now());
        assert_eq!(props.len(), 2);
        assert!(props.contains_key("website"));
        assert!(props.contains_key("updatedAt"));
    }

    #[test]
    fn test_deserialize_entity_json() {
        let json = r#"{
            "id": "acme_farm",
            "name": "Acme Farm",
            "roles": ["grower", "retailer"],
            "stateCode": "CA",
            "retailChannels": ["farm_stand"],
            "verificationLevel": "website_verified",
            "products": ["peach"]
        }"#;
        let e: CanonicalEntity = serde_json::from_str(json).unwrap();
        assert!(e.has_role(Role::Grower));
        assert!(e.has_role(Role::Retailer));
        assert_eq!(e.verification_level, VerificationLevel::WebsiteVerified);
        assert_eq!(e.products, vec!["peach"]);
    }

    #[test]
    fn test_roles_deserialize_in_any_case() {
        let roles: RoleSet = serde_json::from_str(r#"["Grower", "PACKINGHOUSE", "retailer"]"#).unwrap();
        assert_eq!(roles, RoleSet::from([Role::Grower, Role::Packinghouse, Role::Retailer]));
        assert_eq!(serde_json::to_string(&Role::Packinghouse).unwrap(), r#""packinghouse""#);
        assert!(serde_json::from_str::<Role>(r#""wholesaler""#).is_err());
    }

    #[test]
    fn test_state_code_stored_normalized() {
        let e = CanonicalEntity::new("acme_farm", "Acme Farm")
            .with_roles([Role::Grower])
            .with_state(" fl ");
        assert_eq!(e.to_properties(Utc::now())["stateCode"], Value::from("FL"));

        let patch = EntityPatch { state_code: Some("ca".into()), ..Default::default() };
        assert_eq!(patch.to_properties(Utc::now())["stateCode"], Value::from("CA"));
        assert_eq!(normalize_state_code("  "), None);
    }
}
