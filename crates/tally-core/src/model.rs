use serde::{Serialize, Serializer};
use time::OffsetDateTime;

use crate::counts::CounterSet;

// ── Hierarchy nodes ──

/// Leaf of the hierarchy: one auth or secrets mount inside a namespace.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MountNode {
    pub mount_path: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mount_type: Option<String>,
    pub namespace_path: String,
    #[serde(flatten)]
    pub counts: CounterSet,
}

/// A namespace with its mounts in the order the source listed them.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NamespaceNode {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub namespace_id: Option<String>,
    pub namespace_path: String,
    pub label: String,
    #[serde(flatten)]
    pub counts: CounterSet,
    pub mounts: Vec<MountNode>,
}

/// Display label for a namespace path; the root namespace has an empty path.
pub fn namespace_label(path: &str) -> String {
    if path.is_empty() {
        "root".to_string()
    } else {
        path.to_string()
    }
}

// ── Month bucket ──

/// Counts for a month that has data: the month total plus the breakdown.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MonthActivity {
    pub total: CounterSet,
    pub namespaces: Vec<NamespaceNode>,
}

/// One calendar month of the series.
///
/// A month either has activity (total and namespaces both present) or is
/// empty (both absent). Zero usage is activity with all-zero counts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MonthBucket {
    /// First instant of the month, UTC.
    pub timestamp: OffsetDateTime,
    pub activity: Option<MonthActivity>,
    /// Clients first seen this month. The nested bucket never has its own
    /// `new_clients`.
    pub new_clients: Option<Box<MonthBucket>>,
    /// Declared counts disagreed with their children or categories, or the
    /// source had to be clamped/defaulted. Diagnostic only.
    pub unreconciled: bool,
}

impl MonthBucket {
    /// A month with no data at all.
    pub fn empty(timestamp: OffsetDateTime) -> Self {
        Self {
            timestamp,
            activity: None,
            new_clients: None,
            unreconciled: false,
        }
    }

    pub fn populated(
        timestamp: OffsetDateTime,
        total: CounterSet,
        namespaces: Vec<NamespaceNode>,
    ) -> Self {
        Self {
            timestamp,
            activity: Some(MonthActivity { total, namespaces }),
            new_clients: None,
            unreconciled: false,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.activity.is_none()
    }

    pub fn total(&self) -> Option<&CounterSet> {
        self.activity.as_ref().map(|a| &a.total)
    }

    pub fn namespaces(&self) -> Option<&[NamespaceNode]> {
        self.activity.as_ref().map(|a| a.namespaces.as_slice())
    }

    pub fn namespace(&self, path: &str) -> Option<&NamespaceNode> {
        self.namespaces()?
            .iter()
            .find(|ns| ns.namespace_path == path)
    }
}

impl Serialize for MonthBucket {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        #[derive(Serialize)]
        struct Wire<'a> {
            #[serde(with = "time::serde::rfc3339")]
            timestamp: OffsetDateTime,
            total: Option<&'a CounterSet>,
            namespaces: Option<&'a [NamespaceNode]>,
            #[serde(skip_serializing_if = "Option::is_none")]
            new_clients: Option<&'a MonthBucket>,
            unreconciled: bool,
        }

        Wire {
            timestamp: self.timestamp,
            total: self.total(),
            namespaces: self.namespaces(),
            new_clients: self.new_clients.as_deref(),
            unreconciled: self.unreconciled,
        }
        .serialize(serializer)
    }
}

// ── Versions ──

/// One entry of the product's upgrade history.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct VersionMarker {
    pub version: String,
    #[serde(with = "time::serde::rfc3339")]
    pub installed_at: OffsetDateTime,
}

/// "This month's numbers were collected under `version`."
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct VersionAnnotation {
    #[serde(with = "time::serde::rfc3339")]
    pub month: OffsetDateTime,
    pub version: String,
}

/// An upgrade inside the reporting window that changed how clients are counted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UpgradeNotice {
    pub version: String,
    #[serde(with = "time::serde::rfc3339")]
    pub installed_at: OffsetDateTime,
    pub caveat: String,
}

// ── Series ──

/// The assembled, gap-filled series handed to report consumers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ActivitySeries {
    #[serde(with = "time::serde::rfc3339")]
    pub start_time: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub end_time: OffsetDateTime,
    pub months: Vec<MonthBucket>,
    pub total: CounterSet,
    pub new_clients_total: CounterSet,
    pub version_annotations: Vec<VersionAnnotation>,
    pub upgrades: Vec<UpgradeNotice>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::counts::ClientType;
    use time::macros::datetime;

    #[test]
    fn empty_month_serializes_nulls() {
        let b = MonthBucket::empty(datetime!(2024-01-01 0:00 UTC));
        let v = serde_json::to_value(&b).unwrap();
        assert_eq!(v["timestamp"], "2024-01-01T00:00:00Z");
        assert!(v["total"].is_null());
        assert!(v["namespaces"].is_null());
        assert!(v.get("new_clients").is_none());
    }

    #[test]
    fn zero_month_is_not_empty() {
        let b = MonthBucket::populated(datetime!(2024-01-01 0:00 UTC), CounterSet::zero(), vec![]);
        assert!(!b.is_empty());
        let v = serde_json::to_value(&b).unwrap();
        assert_eq!(v["total"]["clients"], 0);
        assert_eq!(v["namespaces"], serde_json::json!([]));
    }

    #[test]
    fn namespace_flattens_counts() {
        let ns = NamespaceNode {
            namespace_id: Some("root".into()),
            namespace_path: String::new(),
            label: namespace_label(""),
            counts: CounterSet::reported(&[(ClientType::Clients, 4)]),
            mounts: vec![MountNode {
                mount_path: "auth/userpass/".into(),
                mount_type: None,
                namespace_path: String::new(),
                counts: CounterSet::reported(&[(ClientType::Clients, 4)]),
            }],
        };
        let v = serde_json::to_value(&ns).unwrap();
        assert_eq!(v["label"], "root");
        assert_eq!(v["clients"], 4);
        assert_eq!(v["mounts"][0]["mount_path"], "auth/userpass/");
        assert!(v["mounts"][0].get("mount_type").is_none());
    }

    #[test]
    fn namespace_lookup_by_path() {
        let ns = NamespaceNode {
            namespace_id: None,
            namespace_path: "team-a/".into(),
            label: namespace_label("team-a/"),
            counts: CounterSet::zero(),
            mounts: vec![],
        };
        let b = MonthBucket::populated(datetime!(2024-01-01 0:00 UTC), CounterSet::zero(), vec![ns]);
        assert!(b.namespace("team-a/").is_some());
        assert!(b.namespace("team-b/").is_none());
        assert!(MonthBucket::empty(b.timestamp).namespace("team-a/").is_none());
    }
}
