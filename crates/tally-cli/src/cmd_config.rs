use anyhow::Context;
use clap::Subcommand;
use serde::Deserialize;
use std::io::Write;
use std::path::{Path, PathBuf};

/// Keys `tally config` knows about.
pub const KNOWN_KEYS: &[&str] = &["versions", "json", "view"];

// ── CLI Schema ──

#[derive(Subcommand)]
pub enum ConfigCmd {
    /// Set a config value
    Set {
        /// Config key (versions, json, view)
        key: String,
        /// Config value (true/false or a string)
        value: String,
    },
    /// Get a config value
    Get {
        /// Config key
        key: String,
    },
    /// List all config values
    List,
}

// ── Dispatch ──

pub fn run(cmd: ConfigCmd, repo_root: &Path) -> anyhow::Result<()> {
    match cmd {
        ConfigCmd::Set { key, value } => set(repo_root, &key, &value),
        ConfigCmd::Get { key } => get(repo_root, &key),
        ConfigCmd::List => list(repo_root),
    }
}

// ── Typed view ──

/// Defaults for `tally series`, read from `.tally/config.json`.
#[derive(Debug, Default, Deserialize, PartialEq)]
#[serde(default)]
pub struct TallyConfig {
    /// Version history file used when `--versions` is not given.
    pub versions: Option<PathBuf>,
    /// Print JSON unless told otherwise.
    pub json: Option<bool>,
    /// Default `--view`.
    pub view: Option<String>,
}

pub fn config_path(repo_root: &Path) -> PathBuf {
    repo_root.join(".tally").join("config.json")
}

/// Load series defaults. A missing file gives the defaults; a `versions`
/// path is resolved against `repo_root`.
pub fn load(repo_root: &Path) -> anyhow::Result<TallyConfig> {
    let map = read_config(&config_path(repo_root))?;
    let mut config: TallyConfig = serde_json::from_value(serde_json::Value::Object(map))
        .context("invalid .tally/config.json")?;
    if let Some(p) = config.versions.take() {
        config.versions = Some(if p.is_absolute() { p } else { repo_root.join(p) });
    }
    Ok(config)
}

// ── Command Implementations ──

/// Read config from `.tally/config.json`. Returns empty map if file doesn't exist.
fn read_config(path: &Path) -> anyhow::Result<serde_json::Map<String, serde_json::Value>> {
    if !path.exists() {
        return Ok(serde_json::Map::new());
    }
    let content = std::fs::read_to_string(path)?;
    let val: serde_json::Value = serde_json::from_str(&content)?;
    match val {
        serde_json::Value::Object(map) => Ok(map),
        _ => Ok(serde_json::Map::new()),
    }
}

/// Write config to `.tally/config.json`.
fn write_config(
    path: &Path,
    config: &serde_json::Map<String, serde_json::Value>,
) -> anyhow::Result<()> {
    let json = serde_json::to_string_pretty(&config)?;
    write_atomic(path, json.as_bytes())
}

/// Write via a temp file in the same directory, then rename over `path`.
fn write_atomic(path: &Path, data: &[u8]) -> anyhow::Result<()> {
    let parent = path
        .parent()
        .ok_or_else(|| anyhow::anyhow!("no parent dir for {}", path.display()))?;
    std::fs::create_dir_all(parent)?;
    let mut tmp = tempfile::NamedTempFile::new_in(parent)?;
    tmp.write_all(data)?;
    tmp.flush()?;
    tmp.persist(path)?;
    Ok(())
}

/// Every key is a flag or a string, so `true`/`false` are the only non-strings.
fn parse_value(s: &str) -> serde_json::Value {
    match s {
        "true" => serde_json::Value::Bool(true),
        "false" => serde_json::Value::Bool(false),
        _ => serde_json::Value::String(s.to_string()),
    }
}

/// Reject values that would make `load` fail later.
fn check_value(key: &str, value: &serde_json::Value) -> anyhow::Result<()> {
    let ok = match key {
        "json" => value.is_boolean(),
        "versions" => value.is_string(),
        "view" => value
            .as_str()
            .is_some_and(|v| crate::cmd_series::View::parse(v).is_some()),
        _ => anyhow::bail!("unknown config key {key:?} (known: {})", KNOWN_KEYS.join(", ")),
    };
    if !ok {
        anyhow::bail!("invalid value {value} for {key}");
    }
    Ok(())
}

/// `tally config set <key> <value>`
pub fn set(repo_root: &Path, key: &str, value: &str) -> anyhow::Result<()> {
    let path = config_path(repo_root);
    let parsed = parse_value(value);
    check_value(key, &parsed)?;
    let mut config = read_config(&path)?;
    config.insert(key.to_string(), parsed);
    write_config(&path, &config)?;
    println!("{key} = {value}");
    Ok(())
}

/// `tally config get <key>`
pub fn get(repo_root: &Path, key: &str) -> anyhow::Result<()> {
    let config = read_config(&config_path(repo_root))?;
    match config.get(key) {
        Some(val) => println!("{val}"),
        None => println!("(not set)"),
    }
    Ok(())
}

/// `tally config list`
pub fn list(repo_root: &Path) -> anyhow::Result<()> {
    let config = read_config(&config_path(repo_root))?;
    if config.is_empty() {
        println!("(no config set)");
    } else {
        for (k, v) in &config {
            println!("{k} = {v}");
        }
    }
    Ok(())
}
