//! Loosely-typed snapshot payloads, read into explicit optional-field types.
//!
//! Reading never fails: wrong-typed fields read as absent and set `malformed`
//! on the node they belong to.

use serde_json::{Map, Value};
use tally_core::month::timestamp_from_value;
use tally_core::ClientType;
use time::OffsetDateTime;

// ── Types ──

/// One month as received.
#[derive(Debug, Clone, PartialEq)]
pub enum RawSnapshot {
    /// `null` or absent.
    Missing,
    /// Not an object at all.
    Malformed { found: &'static str },
    Month(RawMonth),
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct RawMonth {
    pub timestamp: Option<OffsetDateTime>,
    pub counts: Option<RawCounts>,
    pub namespaces: Option<Vec<RawNamespace>>,
    pub new_clients: Option<Box<RawMonth>>,
    pub malformed: bool,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct RawNamespace {
    pub namespace_id: Option<String>,
    pub namespace_path: String,
    pub counts: Option<RawCounts>,
    pub mounts: Vec<RawMount>,
    pub malformed: bool,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct RawMount {
    pub mount_path: String,
    pub mount_type: Option<String>,
    pub counts: Option<RawCounts>,
    pub malformed: bool,
}

/// Count fields as the source sent them. `None` is "not in this schema";
/// negative values are kept so the normalizer can clamp and flag them.
#[derive(Debug, Clone, PartialEq)]
pub enum RawCounts {
    Current {
        clients: Option<i64>,
        entity_clients: Option<i64>,
        non_entity_clients: Option<i64>,
        secret_sync_clients: Option<i64>,
        acme_clients: Option<i64>,
    },
    /// Pre-1.10 naming: `distinct_entities` and `non_entity_tokens`.
    Legacy {
        clients: Option<i64>,
        distinct_entities: Option<i64>,
        non_entity_tokens: Option<i64>,
    },
}

// ── Helpers ──

fn as_str(obj: &Map<String, Value>, keys: &[&str]) -> Option<String> {
    keys.iter()
        .find_map(|k| obj.get(*k).and_then(|v| v.as_str()))
        .map(|s| s.to_string())
}

fn read_count(obj: &Map<String, Value>, key: &str, malformed: &mut bool) -> Option<i64> {
    match obj.get(key)? {
        Value::Null => None,
        Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                return Some(i);
            }
            if n.as_u64().is_some() {
                return Some(i64::MAX);
            }
            let f = n.as_f64().filter(|f| f.is_finite())?;
            if f.fract() != 0.0 {
                *malformed = true;
            }
            Some(f as i64)
        }
        _ => {
            *malformed = true;
            None
        }
    }
}

fn read_first(obj: &Map<String, Value>, keys: &[&str], malformed: &mut bool) -> Option<i64> {
    keys.iter().find_map(|k| read_count(obj, k, malformed))
}

fn read_legacy(obj: &Map<String, Value>, t: ClientType, malformed: &mut bool) -> Option<i64> {
    read_count(obj, t.legacy_key()?, malformed)
}

fn has_any(obj: &Map<String, Value>, keys: &[&str]) -> bool {
    keys.iter().any(|k| obj.contains_key(*k))
}

const CURRENT_ONLY_KEYS: &[&str] = &[
    "entity_clients",
    "non_entity_clients",
    "secret_sync_clients",
    "secret_syncs",
    "acme_clients",
];

const LEGACY_KEYS: [&str; 2] = ["distinct_entities", "non_entity_tokens"];

impl RawCounts {
    /// Read a counts object, picking the schema by which keys are present.
    pub fn from_object(obj: &Map<String, Value>, malformed: &mut bool) -> Self {
        let clients = read_first(obj, ClientType::Clients.raw_aliases(), malformed);

        if !has_any(obj, CURRENT_ONLY_KEYS) && has_any(obj, &LEGACY_KEYS) {
            return RawCounts::Legacy {
                clients,
                distinct_entities: read_legacy(obj, ClientType::EntityClients, malformed),
                non_entity_tokens: read_legacy(obj, ClientType::NonEntityClients, malformed),
            };
        }
        RawCounts::Current {
            clients,
            entity_clients: read_first(obj, ClientType::EntityClients.raw_aliases(), malformed),
            non_entity_clients: read_first(
                obj,
                ClientType::NonEntityClients.raw_aliases(),
                malformed,
            ),
            secret_sync_clients: read_first(
                obj,
                ClientType::SecretSyncClients.raw_aliases(),
                malformed,
            ),
            acme_clients: read_first(obj, ClientType::AcmeClients.raw_aliases(), malformed),
        }
    }

    /// Locate counts on a node: a `counts` object, a `total` object, or count
    /// keys directly on the node. `None` when none of these exist.
    pub fn locate(node: &Map<String, Value>, malformed: &mut bool) -> Option<Self> {
        for key in ["counts", "total"] {
            match node.get(key) {
                Some(Value::Object(obj)) => return Some(Self::from_object(obj, malformed)),
                Some(Value::Null) | None => {}
                Some(_) => *malformed = true,
            }
        }
        let flat = ClientType::ALL
            .iter()
            .flat_map(|t| t.raw_aliases().iter())
            .chain(LEGACY_KEYS.iter())
            .any(|k| node.contains_key(*k));
        if flat {
            Some(Self::from_object(node, malformed))
        } else {
            None
        }
    }
}

// ── Readers ──

impl RawSnapshot {
    pub fn from_value(v: &Value) -> Self {
        match v {
            Value::Null => RawSnapshot::Missing,
            Value::Object(obj) => RawSnapshot::Month(RawMonth::from_object(obj, true)),
            other => RawSnapshot::Malformed {
                found: tally_core::error::json_type_name(other),
            },
        }
    }
}

impl RawMonth {
    /// `with_new_clients` is false for the nested `new_clients` block, which
    /// never carries its own breakdown.
    pub fn from_object(obj: &Map<String, Value>, with_new_clients: bool) -> Self {
        let mut malformed = false;

        let timestamp = match obj.get("timestamp") {
            None | Some(Value::Null) => None,
            Some(v) => match timestamp_from_value(v) {
                Ok(ts) => Some(ts),
                Err(_) => {
                    malformed = true;
                    None
                }
            },
        };

        let counts = RawCounts::locate(obj, &mut malformed);

        let namespaces = match obj.get("namespaces") {
            None | Some(Value::Null) => None,
            Some(Value::Array(items)) => Some(
                items
                    .iter()
                    .filter_map(|item| match item.as_object() {
                        Some(ns) => Some(RawNamespace::from_object(ns)),
                        None => {
                            malformed = true;
                            None
                        }
                    })
                    .collect(),
            ),
            Some(_) => {
                malformed = true;
                None
            }
        };

        let new_clients = if with_new_clients {
            match obj.get("new_clients") {
                None | Some(Value::Null) => None,
                Some(Value::Object(nc)) => Some(Box::new(RawMonth::from_object(nc, false))),
                Some(_) => {
                    malformed = true;
                    None
                }
            }
        } else {
            None
        };

        RawMonth {
            timestamp,
            counts,
            namespaces,
            new_clients,
            malformed,
        }
    }
}

impl RawNamespace {
    pub fn from_object(obj: &Map<String, Value>) -> Self {
        let mut malformed = false;
        let counts = RawCounts::locate(obj, &mut malformed);
        let mounts = match obj.get("mounts") {
            None | Some(Value::Null) => Vec::new(),
            Some(Value::Array(items)) => items
                .iter()
                .filter_map(|item| match item.as_object() {
                    Some(m) => Some(RawMount::from_object(m)),
                    None => {
                        malformed = true;
                        None
                    }
                })
                .collect(),
            Some(_) => {
                malformed = true;
                Vec::new()
            }
        };
        RawNamespace {
            namespace_id: as_str(obj, &["namespace_id", "id"]),
            namespace_path: as_str(obj, &["namespace_path", "path"]).unwrap_or_default(),
            counts,
            mounts,
            malformed,
        }
    }
}

impl RawMount {
    pub fn from_object(obj: &Map<String, Value>) -> Self {
        let mut malformed = false;
        let counts = RawCounts::locate(obj, &mut malformed);
        RawMount {
            mount_path: as_str(obj, &["mount_path", "path", "label"]).unwrap_or_default(),
            mount_type: as_str(obj, &["mount_type"]),
            counts,
            malformed,
        }
    }
}
