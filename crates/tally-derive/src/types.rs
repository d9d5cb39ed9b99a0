// ── Options ──

/// Knobs for [`crate::assemble_with`].
#[derive(Debug, Clone)]
pub struct AssembleOptions {
    /// Keep each month's nested new-client breakdown and sum it into
    /// `new_clients_total`.
    pub include_new_clients: bool,
    /// List only upgrades that changed client counting.
    pub notable_only_upgrades: bool,
}

impl Default for AssembleOptions {
    fn default() -> Self {
        Self {
            include_new_clients: true,
            notable_only_upgrades: true,
        }
    }
}
