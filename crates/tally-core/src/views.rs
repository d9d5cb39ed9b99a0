//! Per-entity cuts over an assembled series.

use serde::Serialize;
use std::collections::BTreeMap;
use time::OffsetDateTime;

use crate::counts::CounterSet;
use crate::model::{namespace_label, ActivitySeries, MonthBucket};

/// One mount's counts summed across every month it appears in.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MountTotal {
    pub mount_path: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mount_type: Option<String>,
    #[serde(flatten)]
    pub counts: CounterSet,
}

/// One namespace's counts summed across the range, with its mounts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NamespaceTotal {
    pub namespace_path: String,
    pub label: String,
    #[serde(flatten)]
    pub counts: CounterSet,
    pub mounts: Vec<MountTotal>,
}

pub type MonthlyCounts = Vec<(OffsetDateTime, Option<CounterSet>)>;

fn by_clients_desc<T>(items: &mut [T], key: impl Fn(&T) -> (u64, &str)) {
    items.sort_by(|a, b| {
        let (ca, pa) = key(a);
        let (cb, pb) = key(b);
        cb.cmp(&ca).then_with(|| pa.cmp(pb))
    });
}

impl ActivitySeries {
    pub fn totals_by_month(&self) -> MonthlyCounts {
        self.months
            .iter()
            .map(|m| (m.timestamp, m.total().copied()))
            .collect()
    }

    pub fn new_clients_by_month(&self) -> MonthlyCounts {
        self.months
            .iter()
            .map(|m| {
                let counts = m.new_clients.as_deref().and_then(MonthBucket::total).copied();
                (m.timestamp, counts)
            })
            .collect()
    }

    /// Namespaces summed over the range, biggest first (ties by path).
    pub fn namespace_totals(&self) -> Vec<NamespaceTotal> {
        // path -> (namespace counts, mount path -> (type, counts))
        type MountAcc = BTreeMap<String, (Option<String>, CounterSet)>;
        let mut acc: BTreeMap<String, (CounterSet, MountAcc)> = BTreeMap::new();

        for ns in self.months.iter().filter_map(|m| m.namespaces()).flatten() {
            let entry = acc
                .entry(ns.namespace_path.clone())
                .or_insert_with(|| (CounterSet::zero(), BTreeMap::new()));
            entry.0 = entry.0.merged(&ns.counts);
            for mount in &ns.mounts {
                let m = entry
                    .1
                    .entry(mount.mount_path.clone())
                    .or_insert_with(|| (mount.mount_type.clone(), CounterSet::zero()));
                if m.0.is_none() {
                    m.0 = mount.mount_type.clone();
                }
                m.1 = m.1.merged(&mount.counts);
            }
        }

        let mut out: Vec<NamespaceTotal> = acc
            .into_iter()
            .map(|(path, (counts, mounts))| {
                let mut mounts: Vec<MountTotal> = mounts
                    .into_iter()
                    .map(|(mount_path, (mount_type, counts))| MountTotal {
                        mount_path,
                        mount_type,
                        counts,
                    })
                    .collect();
                by_clients_desc(&mut mounts, |m| (m.counts.clients, m.mount_path.as_str()));
                NamespaceTotal {
                    label: namespace_label(&path),
                    namespace_path: path,
                    counts,
                    mounts,
                }
            })
            .collect();
        by_clients_desc(&mut out, |n| (n.counts.clients, n.namespace_path.as_str()));
        out
    }

    pub fn top_namespaces(&self, n: usize) -> Vec<NamespaceTotal> {
        let mut all = self.namespace_totals();
        all.truncate(n);
        all
    }

    /// One namespace per month. `None` for empty months and for months
    /// where the namespace does not appear.
    pub fn namespace_by_month(&self, namespace_path: &str) -> MonthlyCounts {
        self.months
            .iter()
            .map(|m| (m.timestamp, m.namespace(namespace_path).map(|ns| ns.counts)))
            .collect()
    }

    /// One mount per month, same `None` rules as [`Self::namespace_by_month`].
    pub fn mount_by_month(&self, namespace_path: &str, mount_path: &str) -> MonthlyCounts {
        self.months
            .iter()
            .map(|m| {
                let counts = m
                    .namespace(namespace_path)
                    .and_then(|ns| ns.mounts.iter().find(|mt| mt.mount_path == mount_path))
                    .map(|mt| mt.counts);
                (m.timestamp, counts)
            })
            .collect()
    }
}
