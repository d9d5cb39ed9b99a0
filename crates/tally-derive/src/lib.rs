mod types;
mod raw;
mod normalize;
mod aggregate;
mod new_clients;
mod version;
mod assemble;

pub use types::*;
pub use raw::{RawCounts, RawMonth, RawMount, RawNamespace, RawSnapshot};
pub use normalize::{normalize, normalize_snapshot};
pub use aggregate::aggregate;
pub use new_clients::{derive_new_clients, new_clients_by_namespace};
pub use version::{
    annotate, major_minor, notable_upgrades, parse_version_history, policy_change_for,
    sorted_history, upgrades_in_window, PolicyChange, POLICY_CHANGES,
};
pub use assemble::{assemble, assemble_with};
