//! Which release governed each month, and which upgrades changed counting.

use serde_json::{Map, Value};
use tally_core::month::{month_start, next_month, timestamp_from_value};
use tally_core::{MonthBucket, UpgradeNotice, VersionAnnotation, VersionMarker};
use time::OffsetDateTime;

// ── Known counting-policy changes ──

/// A release that changed how clients are counted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PolicyChange {
    pub major: u64,
    pub minor: u64,
    pub caveat: &'static str,
}

pub const POLICY_CHANGES: &[PolicyChange] = &[
    PolicyChange {
        major: 1,
        minor: 9,
        caveat: "Non-entity token and local auth mount counting changed in 1.9; \
                 months before and after the upgrade are not directly comparable.",
    },
    PolicyChange {
        major: 1,
        minor: 10,
        caveat: "Monthly breakdowns and mount-level attribution start in 1.10; \
                 earlier months have no per-mount detail.",
    },
    PolicyChange {
        major: 1,
        minor: 17,
        caveat: "ACME clients are counted separately from non-entity clients starting in 1.17.",
    },
];

/// `(major, minor)` of a version string such as `1.10.3+ent` or `v1.9.0`.
pub fn major_minor(version: &str) -> Option<(u64, u64)> {
    let v = version.trim();
    let v = v.strip_prefix('v').unwrap_or(v);
    let core = v
        .split(|c: char| !(c.is_ascii_digit() || c == '.'))
        .next()
        .unwrap_or("");
    let mut parts = core.split('.');
    let major = parts.next()?.parse().ok()?;
    let minor = parts.next()?.parse().ok()?;
    Some((major, minor))
}

pub fn policy_change_for(version: &str) -> Option<&'static PolicyChange> {
    let (major, minor) = major_minor(version)?;
    POLICY_CHANGES
        .iter()
        .find(|p| p.major == major && p.minor == minor)
}

// ── History input ──

fn marker_from_object(version: Option<&str>, obj: &Map<String, Value>) -> Option<VersionMarker> {
    let version = version
        .or_else(|| obj.get("version").and_then(|v| v.as_str()))
        .filter(|v| !v.trim().is_empty())?;
    let installed = ["timestamp_installed", "timestampInstalled", "installed_at"]
        .iter()
        .find_map(|k| obj.get(*k))?;
    let installed_at = timestamp_from_value(installed).ok()?;
    Some(VersionMarker {
        version: version.to_string(),
        installed_at,
    })
}

/// Read an upgrade history payload.
///
/// Accepts an array of `{version, timestamp_installed}` objects, a
/// `key_info` map keyed by version, or either one wrapped in `data` or
/// `versions`.
/// Unusable entries are skipped with a warning. The result is sorted by
/// install time.
pub fn parse_version_history(raw: &Value) -> Vec<VersionMarker> {
    let mut out = Vec::new();
    match raw {
        Value::Array(items) => {
            for item in items {
                match item.as_object().and_then(|o| marker_from_object(None, o)) {
                    Some(m) => out.push(m),
                    None => tracing::warn!(entry = %item, "skipping unusable version history entry"),
                }
            }
        }
        Value::Object(obj) => {
            if let Some(inner) = obj.get("data").or_else(|| obj.get("versions")) {
                return parse_version_history(inner);
            }
            if let Some(Value::Object(key_info)) = obj.get("key_info") {
                for (version, info) in key_info {
                    match info.as_object().and_then(|o| marker_from_object(Some(version.as_str()), o)) {
                        Some(m) => out.push(m),
                        None => tracing::warn!(version = %version, "skipping unusable version history entry"),
                    }
                }
            }
        }
        _ => {}
    }
    sorted_history(&out)
}

/// Stable sort by install time; equal timestamps keep their listed order.
pub fn sorted_history(history: &[VersionMarker]) -> Vec<VersionMarker> {
    let mut sorted = history.to_vec();
    sorted.sort_by_key(|m| m.installed_at);
    sorted
}

// ── Annotation ──

/// Annotate each month with the version(s) it was collected under.
///
/// A month gets the latest version installed at or before its first
/// instant (the last listed wins on ties), followed by every version
/// installed during the month, in install order. Months before the first
/// install get nothing.
///
/// A month whose only install lands after its first instant is still
/// annotated with that version, even though nothing governed its start:
/// in-month installs always count toward their month.
pub fn annotate(months: &[MonthBucket], history: &[VersionMarker]) -> Vec<VersionAnnotation> {
    let history = sorted_history(history);
    let mut out = Vec::new();

    for month in months {
        let start = month.timestamp;
        let idx = history.partition_point(|m| m.installed_at <= start);
        if idx > 0 {
            out.push(VersionAnnotation {
                month: start,
                version: history[idx - 1].version.clone(),
            });
        }
        let end = next_month(start);
        for marker in &history[idx..] {
            if end.is_some_and(|end| marker.installed_at >= end) {
                break;
            }
            out.push(VersionAnnotation {
                month: start,
                version: marker.version.clone(),
            });
        }
    }
    out
}

/// Upgrades installed in any calendar month touched by `[start, end]`, the
/// same months the series covers. With `notable_only`, just the releases in
/// [`POLICY_CHANGES`]; otherwise every install, with an empty caveat for
/// releases that did not change counting.
pub fn upgrades_in_window(
    history: &[VersionMarker],
    start: OffsetDateTime,
    end: OffsetDateTime,
    notable_only: bool,
) -> Vec<UpgradeNotice> {
    let from = month_start(start);
    let until = next_month(month_start(end));
    sorted_history(history)
        .into_iter()
        .filter(|m| m.installed_at >= from && until.map_or(true, |u| m.installed_at < u))
        .filter_map(|m| {
            let caveat = match policy_change_for(&m.version) {
                Some(p) => p.caveat.to_string(),
                None if notable_only => return None,
                None => String::new(),
            };
            Some(UpgradeNotice {
                version: m.version,
                installed_at: m.installed_at,
                caveat,
            })
        })
        .collect()
}

pub fn notable_upgrades(
    history: &[VersionMarker],
    start: OffsetDateTime,
    end: OffsetDateTime,
) -> Vec<UpgradeNotice> {
    upgrades_in_window(history, start, end, true)
}
