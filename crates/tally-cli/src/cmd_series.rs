use anyhow::Context;
use clap::{Args, ValueEnum};
use serde::Serialize;
use serde_json::Value;
use std::io::Read;
use std::path::Path;
use tally_core::month::{format_rfc3339, month_label, parse_timestamp, timestamp_from_value};
use tally_core::{ActivitySeries, ClientType, CounterSet, NamespaceTotal, UpgradeNotice};
use tally_derive::{assemble_with, parse_version_history, AssembleOptions};
use time::OffsetDateTime;

use crate::cmd_config;

// ── CLI Schema ──

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum View {
    /// One row per month
    Months,
    /// Namespaces summed over the range, biggest first
    Namespaces,
    /// Range totals only
    Total,
}

impl View {
    pub fn parse(s: &str) -> Option<View> {
        <View as ValueEnum>::from_str(s, true).ok()
    }
}

#[derive(Args)]
pub struct SeriesArgs {
    /// Raw months JSON file, or `-` for stdin
    #[arg(long, default_value = "-")]
    pub input: String,
    /// Range start (RFC 3339, YYYY-MM-DD or YYYY-MM); defaults to the input's start_time
    #[arg(long)]
    pub start: Option<String>,
    /// Range end, inclusive; defaults to the input's end_time
    #[arg(long)]
    pub end: Option<String>,
    /// Version history JSON file
    #[arg(long)]
    pub versions: Option<String>,
    /// What to print (default: months)
    #[arg(long, value_enum)]
    pub view: Option<View>,
    /// Restrict the months view to one namespace path ("" is root)
    #[arg(long)]
    pub namespace: Option<String>,
    /// Restrict the months view to one mount of --namespace
    #[arg(long, requires = "namespace")]
    pub mount: Option<String>,
    /// Number of namespaces in the namespaces view
    #[arg(long, default_value = "10")]
    pub top: usize,
    /// Output as JSON
    #[arg(long)]
    pub json: bool,
    /// Drop per-month new-client breakdowns
    #[arg(long)]
    pub no_new_clients: bool,
    /// List every upgrade in range, not just counting-policy changes
    #[arg(long)]
    pub all_upgrades: bool,
}

// ── Command ──

/// `tally series`: assemble a gap-filled monthly series and print it.
pub fn execute(repo_root: &Path, args: SeriesArgs) -> anyhow::Result<()> {
    let config = cmd_config::load(repo_root)?;

    let input = read_json(&args.input)?;
    let envelope = Envelope::from_input(&input);
    let start = resolve_bound(args.start.as_deref(), envelope.start_time, "start")?;
    let end = resolve_bound(args.end.as_deref(), envelope.end_time, "end")?;

    let history = match args.versions.as_deref() {
        Some(path) => parse_version_history(&read_json(path)?),
        None => match &config.versions {
            Some(path) => parse_version_history(&read_json(&path.to_string_lossy())?),
            None => Vec::new(),
        },
    };
    tracing::debug!(markers = history.len(), "loaded version history");

    let opts = AssembleOptions {
        include_new_clients: !args.no_new_clients,
        notable_only_upgrades: !args.all_upgrades,
    };
    let series = assemble_with(envelope.months, start, end, &history, &opts)?;

    let json = args.json || config.json.unwrap_or(false);
    let view = match args.view {
        Some(v) => v,
        None => config
            .view
            .as_deref()
            .and_then(View::parse)
            .unwrap_or(View::Months),
    };
    let focus = args.namespace.as_deref().map(|ns| Focus {
        namespace: ns,
        mount: args.mount.as_deref(),
    });

    if json {
        println!("{}", render_json(&series, view, focus, args.top)?);
    } else {
        let text = match (view, focus) {
            (View::Months, Some(focus)) => format_focus(&series, focus),
            (View::Months, None) => format_months(&series),
            (View::Namespaces, _) => format_namespaces(&series.top_namespaces(args.top)),
            (View::Total, _) => format_total(&series),
        };
        print!("{text}");
    }
    Ok(())
}

// ── Input ──

fn read_json(source: &str) -> anyhow::Result<Value> {
    let text = if source == "-" {
        let mut buf = String::new();
        std::io::stdin()
            .read_to_string(&mut buf)
            .context("failed to read stdin")?;
        buf
    } else {
        std::fs::read_to_string(source).with_context(|| format!("failed to read {source}"))?
    };
    serde_json::from_str(&text).with_context(|| format!("invalid JSON in {source}"))
}

/// The months array plus any range the payload carries with it.
struct Envelope<'a> {
    months: &'a Value,
    start_time: Option<&'a Value>,
    end_time: Option<&'a Value>,
}

impl<'a> Envelope<'a> {
    /// Accepts a bare array, `{months, start_time, end_time}`, or either
    /// wrapped in `data`. Anything else is passed through so assembly can
    /// report its type.
    fn from_input(v: &'a Value) -> Self {
        match v {
            Value::Object(obj) => {
                if let Some(data) = obj.get("data").filter(|d| d.is_object()) {
                    return Self::from_input(data);
                }
                match obj.get("months") {
                    Some(months) => Self {
                        months,
                        start_time: obj.get("start_time").filter(|t| !t.is_null()),
                        end_time: obj.get("end_time").filter(|t| !t.is_null()),
                    },
                    None => Self::bare(v),
                }
            }
            _ => Self::bare(v),
        }
    }

    fn bare(months: &'a Value) -> Self {
        Self {
            months,
            start_time: None,
            end_time: None,
        }
    }
}

fn resolve_bound(
    flag: Option<&str>,
    fallback: Option<&Value>,
    name: &str,
) -> anyhow::Result<OffsetDateTime> {
    match (flag, fallback) {
        (Some(s), _) => Ok(parse_timestamp(s)?),
        (None, Some(v)) => timestamp_from_value(v)
            .with_context(|| format!("input {name}_time is unusable")),
        (None, None) => anyhow::bail!("--{name} is required (the input has no {name}_time)"),
    }
}

// ── JSON output ──

#[derive(Clone, Copy)]
struct Focus<'a> {
    namespace: &'a str,
    mount: Option<&'a str>,
}

impl Focus<'_> {
    fn counts(&self, series: &ActivitySeries) -> tally_core::MonthlyCounts {
        match self.mount {
            Some(mount) => series.mount_by_month(self.namespace, mount),
            None => series.namespace_by_month(self.namespace),
        }
    }
}

#[derive(Serialize)]
struct MonthCounts {
    #[serde(with = "time::serde::rfc3339")]
    month: OffsetDateTime,
    counts: Option<CounterSet>,
}

#[derive(Serialize)]
struct TotalView<'a> {
    #[serde(with = "time::serde::rfc3339")]
    start_time: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    end_time: OffsetDateTime,
    months: usize,
    total: &'a CounterSet,
    new_clients_total: &'a CounterSet,
    upgrades: &'a [UpgradeNotice],
}

fn render_json(
    series: &ActivitySeries,
    view: View,
    focus: Option<Focus>,
    top: usize,
) -> anyhow::Result<String> {
    let text = match (view, focus) {
        (View::Months, Some(focus)) => {
            let rows: Vec<MonthCounts> = focus
                .counts(series)
                .into_iter()
                .map(|(month, counts)| MonthCounts { month, counts })
                .collect();
            serde_json::to_string_pretty(&rows)?
        }
        (View::Months, None) => serde_json::to_string_pretty(series)?,
        (View::Namespaces, _) => serde_json::to_string_pretty(&series.top_namespaces(top))?,
        (View::Total, _) => serde_json::to_string_pretty(&TotalView {
            start_time: series.start_time,
            end_time: series.end_time,
            months: series.months.len(),
            total: &series.total,
            new_clients_total: &series.new_clients_total,
            upgrades: &series.upgrades,
        })?,
    };
    Ok(text)
}

// ── Human output ──

const COUNT_HEADERS: [&str; 5] = ["CLIENTS", "ENTITY", "NON-ENTITY", "SECRET-SYNC", "ACME"];

fn count_header(first: &str) -> String {
    let mut line = format!("{first:<24}");
    for h in COUNT_HEADERS {
        line.push_str(&format!(" {h:>11}"));
    }
    line
}

fn count_cells(counts: Option<&CounterSet>) -> String {
    let mut cells = String::new();
    for t in ClientType::ALL {
        match counts {
            Some(c) => cells.push_str(&format!(" {:>11}", c.get(t))),
            None => cells.push_str(&format!(" {:>11}", "-")),
        }
    }
    cells
}

fn format_upgrades(out: &mut String, upgrades: &[UpgradeNotice]) {
    if upgrades.is_empty() {
        return;
    }
    out.push_str("\n── Upgrades in range ──────────────────\n");
    for u in upgrades {
        out.push_str(&format!("  {}  {}\n", format_rfc3339(u.installed_at), u.version));
        if !u.caveat.is_empty() {
            out.push_str(&format!("    {}\n", u.caveat));
        }
    }
}

pub fn format_months(series: &ActivitySeries) -> String {
    let mut out = String::new();
    out.push_str(&format!("{} {:>11}  VERSION\n", count_header("MONTH"), "NEW"));

    let mut flagged = false;
    for (m, (_, new)) in series.months.iter().zip(series.new_clients_by_month()) {
        let versions: Vec<&str> = series
            .version_annotations
            .iter()
            .filter(|a| a.month == m.timestamp)
            .map(|a| a.version.as_str())
            .collect();
        let new = match new {
            Some(c) => c.clients.to_string(),
            None => "-".to_string(),
        };
        let mut label = month_label(m.timestamp);
        if m.unreconciled {
            label.push_str(" *");
            flagged = true;
        }
        out.push_str(&format!(
            "{label:<24}{} {new:>11}  {}\n",
            count_cells(m.total()),
            versions.join(", ")
        ));
    }
    out.push_str(&format!(
        "{:<24}{} {:>11}\n",
        "TOTAL",
        count_cells(Some(&series.total)),
        series.new_clients_total.clients
    ));
    if flagged {
        out.push_str("\n* counts disagree with their breakdown or were repaired\n");
    }
    format_upgrades(&mut out, &series.upgrades);
    out
}

fn format_focus(series: &ActivitySeries, focus: Focus) -> String {
    let mut out = String::new();
    let name = match focus.mount {
        Some(mount) => format!("{} {mount}", tally_core::namespace_label(focus.namespace)),
        None => tally_core::namespace_label(focus.namespace),
    };
    out.push_str(&format!("── {name} ──\n"));
    out.push_str(&count_header("MONTH"));
    out.push('\n');
    for (month, counts) in focus.counts(series) {
        out.push_str(&format!("{:<24}{}\n", month_label(month), count_cells(counts.as_ref())));
    }
    out
}

pub fn format_namespaces(namespaces: &[NamespaceTotal]) -> String {
    if namespaces.is_empty() {
        return "No namespace activity in range.\n".to_string();
    }
    let mut out = String::new();
    out.push_str(&count_header("NAMESPACE"));
    out.push('\n');
    for ns in namespaces {
        out.push_str(&format!("{:<24}{}\n", ns.label, count_cells(Some(&ns.counts))));
        for m in &ns.mounts {
            let label = format!("  {}", m.mount_path);
            out.push_str(&format!("{label:<24}{}\n", count_cells(Some(&m.counts))));
        }
    }
    out
}

pub fn format_total(series: &ActivitySeries) -> String {
    let mut out = String::new();
    out.push_str(&format!(
        "{} .. {} ({} months)\n\n",
        month_label(series.start_time),
        month_label(series.end_time),
        series.months.len()
    ));
    for t in ClientType::ALL {
        out.push_str(&format!("  {:<20} {:>10}\n", t.label(), series.total.get(t)));
    }
    out.push_str(&format!("  {:<20} {:>10}\n", "New clients", series.new_clients_total.clients));
    format_upgrades(&mut out, &series.upgrades);
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tally_core::VersionMarker;
    use tally_derive::assemble;
    use time::macros::datetime;

    fn sample() -> ActivitySeries {
        let raw = json!([
            {"timestamp": "2024-01-01", "counts": {"clients": 8}, "namespaces": [
                {"namespace_path": "", "mounts": [{"mount_path": "auth/a/", "clients": 3}, {"mount_path": "auth/b/", "clients": 5}]}
            ], "new_clients": {"counts": {"clients": 2}}},
            {"timestamp": "2024-03-01", "counts": {"clients": 9}}
        ]);
        let history = vec![VersionMarker {
            version: "1.17.0".into(),
            installed_at: datetime!(2024-02-10 0:00 UTC),
        }];
        assemble(
            &raw,
            datetime!(2024-01-01 0:00 UTC),
            datetime!(2024-03-31 0:00 UTC),
            &history,
        )
        .unwrap()
    }

    #[test]
    fn envelope_shapes() {
        let bare = json!([]);
        assert!(Envelope::from_input(&bare).months.is_array());

        let wrapped = json!({"data": {"months": [{}], "start_time": "2024-01-01", "end_time": null}});
        let env = Envelope::from_input(&wrapped);
        assert_eq!(env.months.as_array().map(|a| a.len()), Some(1));
        assert_eq!(env.start_time, Some(&json!("2024-01-01")));
        assert!(env.end_time.is_none());

        let other = json!({"total": 1});
        assert!(Envelope::from_input(&other).months.is_object());
    }

    #[test]
    fn bounds_prefer_flags() {
        let fallback = json!("2023-01-01T00:00:00Z");
        let from_flag = resolve_bound(Some("2024-02"), Some(&fallback), "start").unwrap();
        assert_eq!(from_flag, datetime!(2024-02-01 0:00 UTC));
        let from_input = resolve_bound(None, Some(&fallback), "start").unwrap();
        assert_eq!(from_input, datetime!(2023-01-01 0:00 UTC));
        let err = resolve_bound(None, None, "end").unwrap_err();
        assert!(err.to_string().contains("--end"));
        assert!(resolve_bound(Some("soon"), None, "start").is_err());
    }

    #[test]
    fn read_json_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("months.json");
        std::fs::write(&path, r#"{"months": []}"#).unwrap();
        let v = read_json(&path.to_string_lossy()).unwrap();
        assert_eq!(v, json!({"months": []}));

        std::fs::write(&path, "not json").unwrap();
        let err = read_json(&path.to_string_lossy()).unwrap_err();
        assert!(err.to_string().contains("invalid JSON"));
        let missing = read_json(&dir.path().join("missing.json").to_string_lossy()).unwrap_err();
        assert!(missing.to_string().starts_with("failed to read"));
        assert!(missing.chain().count() > 1);
    }

    #[test]
    fn view_parse() {
        assert_eq!(View::parse("namespaces"), Some(View::Namespaces));
        assert_eq!(View::parse("TOTAL"), Some(View::Total));
        assert_eq!(View::parse("pie"), None);
    }

    #[test]
    fn months_table() {
        let s = sample();
        let text = format_months(&s);
        assert!(text.starts_with("MONTH"));
        assert!(text.contains("2024-01"));
        assert!(text.contains("2024-02"));
        assert!(text.contains("1.17.0"));
        assert!(text.contains("TOTAL"));
        assert!(text.contains("ACME clients are counted separately"));
    }

    #[test]
    fn namespaces_table() {
        let s = sample();
        let text = format_namespaces(&s.top_namespaces(5));
        assert!(text.contains("root"));
        assert!(text.contains("  auth/b/"));
        assert_eq!(format_namespaces(&[]), "No namespace activity in range.\n");
    }

    #[test]
    fn total_summary() {
        let text = format_total(&sample());
        assert!(text.contains("2024-01 .. 2024-03 (3 months)"));
        assert!(text.contains("Total clients"));
        assert!(text.contains("17"));
    }

    #[test]
    fn focus_json() {
        let s = sample();
        let focus = Focus {
            namespace: "",
            mount: Some("auth/b/"),
        };
        let out: Value = serde_json::from_str(&render_json(&s, View::Months, Some(focus), 10).unwrap()).unwrap();
        assert_eq!(out[0]["month"], "2024-01-01T00:00:00Z");
        assert_eq!(out[0]["counts"]["clients"], 5);
        assert!(out[1]["counts"].is_null());
        assert!(format_focus(&s, focus).contains("── root auth/b/ ──"));
    }

    #[test]
    fn total_json() {
        let out: Value = serde_json::from_str(&render_json(&sample(), View::Total, None, 10).unwrap()).unwrap();
        assert_eq!(out["months"], 3);
        assert_eq!(out["total"]["clients"], 17);
        assert_eq!(out["new_clients_total"]["clients"], 2);
        assert_eq!(out["upgrades"][0]["version"], "1.17.0");
    }
}
