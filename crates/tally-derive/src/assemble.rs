use std::collections::HashMap;

use serde_json::Value;
use tally_core::error::json_type_name;
use tally_core::month::{month_key, months_between};
use tally_core::{ActivitySeries, CounterSet, MonthBucket, Result, TallyError, VersionMarker};
use time::{Month, OffsetDateTime};

use crate::aggregate::aggregate;
use crate::new_clients::derive_new_clients;
use crate::normalize::normalize_snapshot;
use crate::raw::RawSnapshot;
use crate::types::AssembleOptions;
use crate::version::{annotate, upgrades_in_window};

/// Build the gap-filled series for `[start, end]` with default options.
pub fn assemble(
    raw_months: &Value,
    start: OffsetDateTime,
    end: OffsetDateTime,
    history: &[VersionMarker],
) -> Result<ActivitySeries> {
    assemble_with(raw_months, start, end, history, &AssembleOptions::default())
}

/// Build the gap-filled series for `[start, end]`.
///
/// Every calendar month touching the range gets exactly one bucket, in
/// order. Months with no usable raw entry are empty. Only a non-array input
/// or an inverted range is an error; bad individual months degrade.
pub fn assemble_with(
    raw_months: &Value,
    start: OffsetDateTime,
    end: OffsetDateTime,
    history: &[VersionMarker],
    opts: &AssembleOptions,
) -> Result<ActivitySeries> {
    let Value::Array(entries) = raw_months else {
        return Err(TallyError::NotAnArray {
            found: json_type_name(raw_months),
        });
    };
    if start > end {
        return Err(TallyError::InvertedRange { start, end });
    }

    let slots = months_between(start, end);
    let index = index_by_month(entries, &slots);

    let months: Vec<MonthBucket> = slots
        .iter()
        .map(|&slot| match index.get(&month_key(slot)) {
            Some(snapshot) => build_month(snapshot, slot, opts),
            None => MonthBucket::empty(slot),
        })
        .collect();

    let total = CounterSet::sum(months.iter().filter_map(|m| m.total()));
    let new_clients: Vec<CounterSet> = months.iter().filter_map(derive_new_clients).collect();
    let new_clients_total = CounterSet::sum(&new_clients);

    let version_annotations = annotate(&months, history);
    let upgrades = upgrades_in_window(history, start, end, opts.notable_only_upgrades);

    tracing::debug!(
        months = months.len(),
        populated = index.len(),
        clients = total.clients,
        annotations = version_annotations.len(),
        "assembled activity series"
    );

    Ok(ActivitySeries {
        start_time: start,
        end_time: end,
        months,
        total,
        new_clients_total,
        version_annotations,
        upgrades,
    })
}

fn build_month(snapshot: &RawSnapshot, slot: OffsetDateTime, opts: &AssembleOptions) -> MonthBucket {
    let mut bucket = aggregate(&normalize_snapshot(snapshot, slot));
    if !opts.include_new_clients {
        bucket.new_clients = None;
    }
    bucket
}

/// Match raw entries to range slots by `(year, month)`. The first entry
/// for a month wins.
fn index_by_month(entries: &[Value], slots: &[OffsetDateTime]) -> HashMap<(i32, Month), RawSnapshot> {
    let wanted: Vec<(i32, Month)> = slots.iter().map(|s| month_key(*s)).collect();
    let mut index = HashMap::new();

    for (i, entry) in entries.iter().enumerate() {
        let snapshot = RawSnapshot::from_value(entry);
        let ts = match &snapshot {
            RawSnapshot::Month(m) => m.timestamp,
            RawSnapshot::Missing | RawSnapshot::Malformed { .. } => None,
        };
        let Some(ts) = ts else {
            tracing::debug!(entry = i, kind = json_type_name(entry), "skipping month without a usable timestamp");
            continue;
        };
        let key = month_key(ts);
        if !wanted.contains(&key) {
            tracing::debug!(entry = i, month = %ts, "skipping month outside the requested range");
            continue;
        }
        if index.contains_key(&key) {
            tracing::warn!(entry = i, month = %ts, "duplicate month in input, keeping the first");
            continue;
        }
        index.insert(key, snapshot);
    }
    index
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tally_core::Origin;
    use time::macros::datetime;

    const JAN: OffsetDateTime = datetime!(2024-01-01 0:00 UTC);
    const FEB: OffsetDateTime = datetime!(2024-02-01 0:00 UTC);
    const MAR_END: OffsetDateTime = datetime!(2024-03-31 23:59:59 UTC);

    fn series(raw: Value, start: OffsetDateTime, end: OffsetDateTime) -> ActivitySeries {
        assemble(&raw, start, end, &[]).unwrap()
    }

    #[test]
    fn single_reported_month() {
        let s = series(
            json!([{
                "timestamp": "2024-01-01",
                "total": {"clients": 10, "entity_clients": 6, "non_entity_clients": 4},
                "namespaces": []
            }]),
            JAN,
            datetime!(2024-01-31 0:00 UTC),
        );
        assert_eq!(s.months.len(), 1);
        assert_eq!(s.months[0].total().unwrap().clients, 10);
        assert!(!s.months[0].unreconciled);
        assert_eq!(s.total.clients, 10);
    }

    #[test]
    fn empty_input_gap_fills() {
        let s = series(json!([]), JAN, MAR_END);
        assert_eq!(s.months.len(), 3);
        assert!(s.months.iter().all(|m| m.is_empty()));
        assert!(s.total.is_zero());
        assert!(s.new_clients_total.is_zero());
        assert_eq!(s.months[1].timestamp, FEB);
    }

    #[test]
    fn namespace_filled_from_mounts() {
        let s = series(
            json!([{"timestamp": "2024-01-01", "namespaces": [
                {"namespace_path": "", "mounts": [{"mount_path": "a/", "clients": 3}, {"mount_path": "b/", "clients": 5}]}
            ]}]),
            JAN,
            JAN,
        );
        let ns = &s.months[0].namespaces().unwrap()[0];
        assert_eq!(ns.counts.clients, 8);
        assert_eq!(ns.counts.origin, Origin::Derived);
        assert_eq!(s.total.clients, 8);
    }

    #[test]
    fn new_clients_per_month() {
        let s = series(
            json!([
                {"timestamp": "2024-01-01", "total": {"clients": 9}, "new_clients": {"total": {"clients": 2}}},
                {"timestamp": "2024-02-01", "total": {"clients": 9}}
            ]),
            JAN,
            datetime!(2024-02-29 0:00 UTC),
        );
        assert_eq!(derive_new_clients(&s.months[0]).map(|c| c.clients), Some(2));
        assert!(derive_new_clients(&s.months[1]).is_none());
        assert_eq!(s.new_clients_total.clients, 2);
    }

    #[test]
    fn version_annotations_across_upgrade() {
        let history = vec![
            VersionMarker {
                version: "1.9".into(),
                installed_at: datetime!(2023-06-01 0:00 UTC),
            },
            VersionMarker {
                version: "1.17".into(),
                installed_at: datetime!(2024-01-01 0:00 UTC),
            },
        ];
        let s = assemble(
            &json!([]),
            datetime!(2023-12-01 0:00 UTC),
            datetime!(2024-02-15 0:00 UTC),
            &history,
        )
        .unwrap();
        let versions: Vec<(u8, &str)> = s
            .version_annotations
            .iter()
            .map(|a| (a.month.month() as u8, a.version.as_str()))
            .collect();
        assert_eq!(versions, vec![(12, "1.9"), (1, "1.17"), (2, "1.17")]);
        assert_eq!(s.upgrades.len(), 1);
        assert_eq!(s.upgrades[0].version, "1.17");
    }

    #[test]
    fn gap_fill_totality() {
        let raw = json!([
            {"timestamp": "2023-03-01", "counts": {"clients": 1}},
            {"timestamp": "2023-07-15T12:00:00Z", "counts": {"clients": 1}},
            {"timestamp": "2024-11-01", "counts": {"clients": 1}}
        ]);
        let cases = [
            (datetime!(2023-01-01 0:00 UTC), datetime!(2023-01-01 0:00 UTC), 1),
            (datetime!(2023-01-31 0:00 UTC), datetime!(2023-02-01 0:00 UTC), 2),
            (datetime!(2023-01-01 0:00 UTC), datetime!(2023-12-31 0:00 UTC), 12),
            (datetime!(2022-11-10 0:00 UTC), datetime!(2024-02-02 0:00 UTC), 16),
        ];
        for (start, end, expected) in cases {
            let s = assemble(&raw, start, end, &[]).unwrap();
            assert_eq!(s.months.len(), expected, "{start} .. {end}");
            assert!(s.months.windows(2).all(|w| w[0].timestamp < w[1].timestamp));
        }
    }

    #[test]
    fn entries_matched_by_calendar_month() {
        let s = series(
            json!([
                {"timestamp": "2024-02-20T08:00:00+02:00", "counts": {"clients": 4}},
                {"timestamp": "2024-01-31T23:30:00-01:00", "counts": {"clients": 7}}
            ]),
            JAN,
            MAR_END,
        );
        // The second entry is 2024-02-01T00:30Z, so it loses to the first.
        assert!(s.months[0].is_empty());
        assert_eq!(s.months[1].timestamp, FEB);
        assert_eq!(s.months[1].total().unwrap().clients, 4);
        assert!(s.months[2].is_empty());
    }

    #[test]
    fn duplicate_month_first_wins() {
        let s = series(
            json!([
                {"timestamp": "2024-01-01", "counts": {"clients": 1}},
                {"timestamp": "2024-01-15", "counts": {"clients": 2}}
            ]),
            JAN,
            JAN,
        );
        assert_eq!(s.months[0].total().unwrap().clients, 1);
    }

    #[test]
    fn unusable_entries_skipped() {
        let s = series(
            json!([
                null,
                17,
                {"counts": {"clients": 3}},
                {"timestamp": "not a date", "counts": {"clients": 3}},
                {"timestamp": "2019-01-01", "counts": {"clients": 3}},
                {"timestamp": "2024-01-01", "counts": {"clients": -5}}
            ]),
            JAN,
            FEB,
        );
        assert_eq!(s.months.len(), 2);
        assert_eq!(s.months[0].total().unwrap().clients, 0);
        assert!(s.months[0].unreconciled);
        assert!(s.months[1].is_empty());
        assert!(!s.months[1].unreconciled);
    }

    #[test]
    fn rejects_non_array() {
        let err = assemble(&json!({"months": []}), JAN, FEB, &[]).unwrap_err();
        assert!(matches!(err, TallyError::NotAnArray { found: "object" }));
    }

    #[test]
    fn rejects_inverted_range() {
        let err = assemble(&json!([]), FEB, JAN, &[]).unwrap_err();
        assert!(matches!(err, TallyError::InvertedRange { .. }));
    }

    #[test]
    fn options_drop_new_clients_and_widen_upgrades() {
        let history = vec![VersionMarker {
            version: "1.15.2".into(),
            installed_at: datetime!(2024-01-10 0:00 UTC),
        }];
        let raw = json!([{"timestamp": "2024-01-01", "counts": {"clients": 4}, "new_clients": {"counts": {"clients": 1}}}]);
        let opts = AssembleOptions {
            include_new_clients: false,
            notable_only_upgrades: false,
        };
        let s = assemble_with(&raw, JAN, JAN, &history, &opts).unwrap();
        assert!(s.months[0].new_clients.is_none());
        assert!(s.new_clients_total.is_zero());
        assert_eq!(s.upgrades.len(), 1);
        assert!(s.upgrades[0].caveat.is_empty());

        let s = assemble(&raw, JAN, JAN, &history).unwrap();
        assert_eq!(s.new_clients_total.clients, 1);
        assert!(s.upgrades.is_empty());
    }

    #[test]
    fn series_serializes_for_consumers() {
        let s = series(
            json!([{"timestamp": "2024-02-01", "counts": {"clients": 2}}]),
            JAN,
            FEB,
        );
        let v = serde_json::to_value(&s).unwrap();
        assert_eq!(v["start_time"], "2024-01-01T00:00:00Z");
        assert!(v["months"][0]["total"].is_null());
        assert_eq!(v["months"][1]["total"]["clients"], 2);
        assert_eq!(v["total"]["clients"], 2);
    }
}
