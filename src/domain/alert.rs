use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;

pub const ALERTNAME_LABEL: &str = "alertname";
/// Annotation carrying the token of a rendered panel image.
pub const IMAGE_TOKEN_ANNOTATION: &str = "__alertImageToken__";

/// Sorted set of label (or annotation) pairs.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct LabelSet(BTreeMap<String, String>);

impl LabelSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.0.get(name).map(String::as_str)
    }

    pub fn insert(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.0.insert(name.into(), value.into());
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &String)> {
        self.0.iter()
    }

    /// Overlays `other` on top of `self`; keys in `other` win.
    pub fn merge(&self, other: &LabelSet) -> LabelSet {
        let mut merged = self.clone();
        for (k, v) in other.iter() {
            merged.insert(k.clone(), v.clone());
        }
        merged
    }

    /// Pairs present with the same value in every set.
    pub fn common<'a>(sets: impl IntoIterator<Item = &'a LabelSet>) -> LabelSet {
        let mut iter = sets.into_iter();
        let Some(first) = iter.next() else {
            return LabelSet::new();
        };
        let mut common = first.clone();
        for set in iter {
            common.0.retain(|k, v| set.get(k) == Some(v.as_str()));
        }
        common
    }

    /// Stable identity of the set, independent of insertion order.
    pub fn fingerprint(&self) -> String {
        let mut hasher = Sha256::new();
        for (name, value) in &self.0 {
            hasher.update(name.as_bytes());
            hasher.update([0xff]);
            hasher.update(value.as_bytes());
            hasher.update([0xff]);
        }
        hex::encode(&hasher.finalize()[..8])
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for LabelSet {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self(iter.into_iter().map(|(k, v)| (k.into(), v.into())).collect())
    }
}

impl std::fmt::Display for LabelSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{{")?;
        for (i, (k, v)) in self.0.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{}=\"{}\"", k, v)?;
        }
        write!(f, "}}")
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AlertStatus {
    Firing,
    Resolved,
}

impl AlertStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Firing => "firing",
            Self::Resolved => "resolved",
        }
    }
}

impl std::fmt::Display for AlertStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An alert handed to notifiers by the alerting engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Alert {
    pub labels: LabelSet,
    #[serde(default)]
    pub annotations: LabelSet,
    pub starts_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ends_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub generator_url: String,
    pub updated_at: DateTime<Utc>,
}

impl Alert {
    pub fn new(labels: LabelSet, annotations: LabelSet, now: DateTime<Utc>) -> Self {
        Self {
            labels,
            annotations,
            starts_at: now,
            ends_at: None,
            generator_url: String::new(),
            updated_at: now,
        }
    }

    pub fn name(&self) -> &str {
        self.labels.get(ALERTNAME_LABEL).unwrap_or_default()
    }

    pub fn fingerprint(&self) -> String {
        self.labels.fingerprint()
    }

    pub fn resolved_at(&self, at: DateTime<Utc>) -> bool {
        self.ends_at.is_some_and(|end| end <= at)
    }

    pub fn resolved(&self) -> bool {
        self.resolved_at(Utc::now())
    }

    pub fn status(&self) -> AlertStatus {
        if self.resolved() {
            AlertStatus::Resolved
        } else {
            AlertStatus::Firing
        }
    }
}

/// Status of a batch: firing while any member is firing.
pub fn batch_status(alerts: &[Alert]) -> AlertStatus {
    if alerts.iter().any(|a| a.status() == AlertStatus::Firing) {
        AlertStatus::Firing
    } else {
        AlertStatus::Resolved
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fingerprint_is_order_independent() {
        let a: LabelSet = [("alertname", "A"), ("instance", "x")].into_iter().collect();
        let mut b = LabelSet::new();
        b.insert("instance", "x");
        b.insert("alertname", "A");
        assert_eq!(a.fingerprint(), b.fingerprint());
        assert_eq!(a.fingerprint().len(), 16);

        b.insert("instance", "y");
        assert_ne!(a.fingerprint(), b.fingerprint());
    }

    #[test]
    fn test_merge_overlays_values() {
        let base: LabelSet = [("alertname", "TestAlert"), ("instance", "Grafana")]
            .into_iter()
            .collect();
        let extra: LabelSet = [("instance", "override"), ("team", "ops")].into_iter().collect();
        let merged = base.merge(&extra);
        assert_eq!(merged.get("alertname"), Some("TestAlert"));
        assert_eq!(merged.get("instance"), Some("override"));
        assert_eq!(merged.get("team"), Some("ops"));
    }

    #[test]
    fn test_common_labels() {
        let a: LabelSet = [("alertname", "A"), ("env", "prod")].into_iter().collect();
        let b: LabelSet = [("alertname", "B"), ("env", "prod")].into_iter().collect();
        let common = LabelSet::common([&a, &b]);
        assert_eq!(common.len(), 1);
        assert_eq!(common.get("env"), Some("prod"));
    }

    #[test]
    fn test_alert_status() {
        let now = Utc::now();
        let mut alert = Alert::new(LabelSet::new(), LabelSet::new(), now);
        assert_eq!(alert.status(), AlertStatus::Firing);
        alert.ends_at = Some(now - chrono::Duration::seconds(1));
        assert_eq!(alert.status(), AlertStatus::Resolved);
        assert_eq!(batch_status(&[alert]), AlertStatus::Resolved);
    }
}
