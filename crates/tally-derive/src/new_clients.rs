use tally_core::{CounterSet, MonthBucket, NamespaceNode};

use crate::aggregate::aggregate;

/// Counts for clients first seen in this month, as attributed by the source.
///
/// `None` when the month carries no new-client breakdown. Nothing is
/// inferred from differences between months.
pub fn derive_new_clients(bucket: &MonthBucket) -> Option<CounterSet> {
    let nested = bucket.new_clients.as_deref()?;
    aggregate(nested).total().copied()
}

/// The aggregated per-namespace breakdown of new clients.
pub fn new_clients_by_namespace(bucket: &MonthBucket) -> Option<Vec<NamespaceNode>> {
    let nested = bucket.new_clients.as_deref()?;
    aggregate(nested).activity.map(|a| a.namespaces)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::normalize::normalize;
    use serde_json::json;
    use time::macros::datetime;
    use time::OffsetDateTime;

    const JAN: OffsetDateTime = datetime!(2024-01-01 0:00 UTC);

    #[test]
    fn reads_new_client_total() {
        let b = normalize(
            &json!({"timestamp": "2024-01-01", "counts": {"clients": 9}, "new_clients": {"total": {"clients": 2}}}),
            JAN,
        );
        assert_eq!(derive_new_clients(&b).map(|c| c.clients), Some(2));
    }

    #[test]
    fn missing_breakdown_is_none() {
        let b = normalize(&json!({"timestamp": "2024-01-01", "counts": {"clients": 9}}), JAN);
        assert!(derive_new_clients(&b).is_none());
        assert!(new_clients_by_namespace(&b).is_none());
        assert!(derive_new_clients(&MonthBucket::empty(JAN)).is_none());
    }

    #[test]
    fn null_new_clients_is_none() {
        let b = normalize(&json!({"counts": {"clients": 1}, "new_clients": null}), JAN);
        assert!(derive_new_clients(&b).is_none());
    }

    #[test]
    fn derived_from_namespace_breakdown() {
        let b = normalize(
            &json!({"new_clients": {"namespaces": [
                {"namespace_path": "", "mounts": [{"mount_path": "a/", "clients": 1}]},
                {"namespace_path": "x/", "counts": {"clients": 3}}
            ]}}),
            JAN,
        );
        assert_eq!(derive_new_clients(&b).map(|c| c.clients), Some(4));
        let by_ns = new_clients_by_namespace(&b).unwrap();
        assert_eq!(by_ns[0].counts.clients, 1);
        assert_eq!(by_ns[1].label, "x/");
    }
}
