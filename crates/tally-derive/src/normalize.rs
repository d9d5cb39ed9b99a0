use serde_json::Value;
use tally_core::month::month_start;
use tally_core::{namespace_label, ClientType, CounterSet, MonthBucket, MountNode, NamespaceNode};
use time::OffsetDateTime;

use crate::raw::{RawCounts, RawMonth, RawMount, RawNamespace, RawSnapshot};

/// Normalize one month's raw payload into the slot for `month`.
///
/// `null` becomes an empty bucket. Any month object, even one with only a
/// timestamp, becomes a populated bucket; missing counts are left `Absent`
/// for the aggregator to fill.
pub fn normalize(raw: &Value, month: OffsetDateTime) -> MonthBucket {
    normalize_snapshot(&RawSnapshot::from_value(raw), month)
}

pub fn normalize_snapshot(snapshot: &RawSnapshot, month: OffsetDateTime) -> MonthBucket {
    let ts = month_start(month);
    match snapshot {
        RawSnapshot::Missing => MonthBucket::empty(ts),
        RawSnapshot::Malformed { found } => {
            tracing::debug!(month = %ts, found, "raw month is not an object, treating as empty");
            MonthBucket {
                unreconciled: true,
                ..MonthBucket::empty(ts)
            }
        }
        RawSnapshot::Month(raw) => {
            let mut bucket = normalize_month(raw, ts);
            bucket.new_clients = raw
                .new_clients
                .as_deref()
                .map(|nc| Box::new(normalize_month(nc, ts)));
            bucket
        }
    }
}

fn normalize_month(raw: &RawMonth, ts: OffsetDateTime) -> MonthBucket {
    let mut degraded = raw.malformed;
    let total = counter_set(raw.counts.as_ref(), &mut degraded);
    let namespaces = raw
        .namespaces
        .iter()
        .flatten()
        .map(|ns| normalize_namespace(ns, &mut degraded))
        .collect();
    if degraded {
        tracing::debug!(month = %ts, "month had malformed or negative counts");
    }
    MonthBucket {
        unreconciled: degraded,
        ..MonthBucket::populated(ts, total, namespaces)
    }
}

fn normalize_namespace(raw: &RawNamespace, degraded: &mut bool) -> NamespaceNode {
    *degraded |= raw.malformed;
    let mounts = raw
        .mounts
        .iter()
        .map(|m| normalize_mount(m, &raw.namespace_path, degraded))
        .collect();
    NamespaceNode {
        namespace_id: raw.namespace_id.clone(),
        namespace_path: raw.namespace_path.clone(),
        label: namespace_label(&raw.namespace_path),
        counts: counter_set(raw.counts.as_ref(), degraded),
        mounts,
    }
}

fn normalize_mount(raw: &RawMount, namespace_path: &str, degraded: &mut bool) -> MountNode {
    *degraded |= raw.malformed;
    // Leaves have nothing to be filled from, so missing counts are zero.
    let counts = match raw.counts.as_ref() {
        None => CounterSet::reported(&[]),
        counts => counter_set(counts, degraded),
    };
    MountNode {
        mount_path: raw.mount_path.clone(),
        mount_type: raw.mount_type.clone(),
        namespace_path: namespace_path.to_string(),
        counts,
    }
}

// ── Counts ──

fn clamp(v: i64, degraded: &mut bool) -> u64 {
    if v < 0 {
        *degraded = true;
        0
    } else {
        v as u64
    }
}

fn counter_set(raw: Option<&RawCounts>, degraded: &mut bool) -> CounterSet {
    let fields = match raw {
        None => return CounterSet::absent(),
        Some(RawCounts::Current {
            clients,
            entity_clients,
            non_entity_clients,
            secret_sync_clients,
            acme_clients,
        }) => [
            (ClientType::Clients, *clients),
            (ClientType::EntityClients, *entity_clients),
            (ClientType::NonEntityClients, *non_entity_clients),
            (ClientType::SecretSyncClients, *secret_sync_clients),
            (ClientType::AcmeClients, *acme_clients),
        ],
        Some(RawCounts::Legacy {
            clients,
            distinct_entities,
            non_entity_tokens,
        }) => [
            (ClientType::Clients, *clients),
            (ClientType::EntityClients, *distinct_entities),
            (ClientType::NonEntityClients, *non_entity_tokens),
            (ClientType::SecretSyncClients, None),
            (ClientType::AcmeClients, None),
        ],
    };

    let mut present: Vec<(ClientType, u64)> = fields
        .iter()
        .filter_map(|&(t, v)| v.map(|v| (t, clamp(v, degraded))))
        .collect();

    // A total-less payload still counts its categories.
    let has_total = present.iter().any(|(t, _)| *t == ClientType::Clients);
    if !has_total && !present.is_empty() {
        let sum = present.iter().fold(0u64, |acc, (_, v)| acc.saturating_add(*v));
        present.push((ClientType::Clients, sum));
    }

    CounterSet::reported(&present)
}
