//! Plans - tenant resource tiers.
//!
//! Plan はランタイム中に変更されない参照データ。未知の plan は
//! ゼロ値（全上限 0）として扱われ、どの deploy も決定的に拒否される。

use std::collections::HashMap;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

use super::errors::ConfigError;

/// Plan feature flag.
///
/// Closed set: an unknown feature name fails deserialization instead of
/// being silently ignored.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Feature {
    /// Hardened container (capabilities dropped, no privilege escalation).
    Shield,
    /// Runtime restarts the container on its own.
    AlwaysOn,
    /// App may be routed under a tenant-owned domain.
    CustomDomain,
}

impl Feature {
    pub const ALL: [Feature; 3] = [Feature::Shield, Feature::AlwaysOn, Feature::CustomDomain];

    fn bit(self) -> u8 {
        match self {
            Feature::Shield => 1 << 0,
            Feature::AlwaysOn => 1 << 1,
            Feature::CustomDomain => 1 << 2,
        }
    }
}

/// Bitmask of [`Feature`]s.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct FeatureSet(u8);

impl FeatureSet {
    pub fn empty() -> Self {
        Self(0)
    }

    pub fn with(mut self, feature: Feature) -> Self {
        self.0 |= feature.bit();
        self
    }

    pub fn contains(&self, feature: Feature) -> bool {
        self.0 & feature.bit() != 0
    }

    pub fn iter(&self) -> impl Iterator<Item = Feature> + '_ {
        Feature::ALL.into_iter().filter(|f| self.contains(*f))
    }
}

impl FromIterator<Feature> for FeatureSet {
    fn from_iter<I: IntoIterator<Item = Feature>>(iter: I) -> Self {
        iter.into_iter().fold(FeatureSet::empty(), FeatureSet::with)
    }
}

impl Serialize for FeatureSet {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_seq(self.iter())
    }
}

impl<'de> Deserialize<'de> for FeatureSet {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let features = Vec::<Feature>::deserialize(deserializer)?;
        Ok(features.into_iter().collect())
    }
}

/// Immutable resource tier.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Plan {
    #[serde(default)]
    pub id: String,
    /// Tenant-wide memory ceiling.
    pub memory_mb: u64,
    /// Minimum reservation per App.
    pub per_app_mb: u64,
    #[serde(default)]
    pub cpu_cores: f64,
    pub max_projects: u32,
    #[serde(default)]
    pub features: FeatureSet,
}

impl Plan {
    /// Zero-value plan: every ceiling is 0.
    pub fn zero(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            ..Default::default()
        }
    }
}

/// Read-only lookup table of plans.
#[derive(Debug, Clone, Default)]
pub struct PlanTable {
    plans: HashMap<String, Plan>,
}

impl PlanTable {
    /// Build the table. Map keys win over the `id` field of each entry.
    pub fn new(plans: HashMap<String, Plan>) -> Result<Self, ConfigError> {
        if plans.is_empty() {
            return Err(ConfigError::EmptyPlanTable);
        }
        let plans = plans
            .into_iter()
            .map(|(key, mut plan)| {
                plan.id = key.clone();
                (key, plan)
            })
            .collect();
        Ok(Self { plans })
    }

    /// Look up a plan; unknown ids yield the zero plan.
    pub fn get(&self, id: &str) -> Plan {
        self.plans
            .get(id)
            .cloned()
            .unwrap_or_else(|| Plan::zero(id))
    }

    pub fn contains(&self, id: &str) -> bool {
        self.plans.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.plans.len()
    }

    pub fn is_empty(&self) -> bool {
        self.plans.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn plan(id: &str) -> Plan {
        Plan {
            id: id.to_string(),
            memory_mb: 512,
            per_app_mb: 128,
            cpu_cores: 1.0,
            max_projects: 3,
            features: FeatureSet::empty().with(Feature::Shield),
        }
    }

    #[test]
    fn empty_table_is_rejected() {
        assert!(matches!(
            PlanTable::new(HashMap::new()),
            Err(ConfigError::EmptyPlanTable)
        ));
    }

    #[test]
    fn unknown_plan_is_zero_valued() {
        let table = PlanTable::new(HashMap::from([("pro".to_string(), plan("pro"))])).unwrap();
        let unknown = table.get("gold");
        assert_eq!(unknown.memory_mb, 0);
        assert_eq!(unknown.max_projects, 0);
        assert_eq!(table.get("pro").per_app_mb, 128);
    }

    #[test]
    fn features_deserialize_from_names() {
        let set: FeatureSet = serde_json::from_str(r#"["shield", "always_on"]"#).unwrap();
        assert!(set.contains(Feature::Shield));
        assert!(set.contains(Feature::AlwaysOn));
        assert!(!set.contains(Feature::CustomDomain));
        assert_eq!(serde_json::to_string(&set).unwrap(), r#"["shield","always_on"]"#);
    }

    #[test]
    fn unknown_feature_is_an_error() {
        let parsed = serde_json::from_str::<FeatureSet>(r#"["shield", "turbo"]"#);
        assert!(parsed.is_err());
    }
}
