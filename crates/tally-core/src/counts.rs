use serde::Serialize;

// ── Client categories ──

/// A client-count category.
///
/// `Clients` is the node total; the other four are its sub-categories.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ClientType {
    Clients,
    EntityClients,
    NonEntityClients,
    SecretSyncClients,
    AcmeClients,
}

impl ClientType {
    pub const ALL: [ClientType; 5] = [
        ClientType::Clients,
        ClientType::EntityClients,
        ClientType::NonEntityClients,
        ClientType::SecretSyncClients,
        ClientType::AcmeClients,
    ];

    pub const SUB_CATEGORIES: [ClientType; 4] = [
        ClientType::EntityClients,
        ClientType::NonEntityClients,
        ClientType::SecretSyncClients,
        ClientType::AcmeClients,
    ];

    /// Canonical snake_case key used in output.
    pub fn key(self) -> &'static str {
        match self {
            ClientType::Clients => "clients",
            ClientType::EntityClients => "entity_clients",
            ClientType::NonEntityClients => "non_entity_clients",
            ClientType::SecretSyncClients => "secret_sync_clients",
            ClientType::AcmeClients => "acme_clients",
        }
    }

    /// Keys accepted in current raw payloads, canonical first.
    pub fn raw_aliases(self) -> &'static [&'static str] {
        match self {
            ClientType::Clients => &["clients"],
            ClientType::EntityClients => &["entity_clients"],
            ClientType::NonEntityClients => &["non_entity_clients"],
            ClientType::SecretSyncClients => &["secret_sync_clients", "secret_syncs"],
            ClientType::AcmeClients => &["acme_clients"],
        }
    }

    /// Key used by payloads from before 1.10, when only entities and
    /// non-entity tokens were counted.
    pub fn legacy_key(self) -> Option<&'static str> {
        match self {
            ClientType::EntityClients => Some("distinct_entities"),
            ClientType::NonEntityClients => Some("non_entity_tokens"),
            _ => None,
        }
    }

    /// Human label for tables.
    pub fn label(self) -> &'static str {
        match self {
            ClientType::Clients => "Total clients",
            ClientType::EntityClients => "Entity clients",
            ClientType::NonEntityClients => "Non-entity clients",
            ClientType::SecretSyncClients => "Secret sync clients",
            ClientType::AcmeClients => "ACME clients",
        }
    }

    fn bit(self) -> u8 {
        match self {
            ClientType::Clients => 1,
            ClientType::EntityClients => 1 << 1,
            ClientType::NonEntityClients => 1 << 2,
            ClientType::SecretSyncClients => 1 << 3,
            ClientType::AcmeClients => 1 << 4,
        }
    }
}

// ── Origin ──

/// Where a node's counts came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Origin {
    /// Taken from the source payload; authoritative.
    Reported,
    /// Summed from child nodes.
    Derived,
    /// Source gave nothing for this node; must be filled from children.
    Absent,
}

// ── CounterSet ──

/// Bit set of categories the source actually reported.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
struct Reported(u8);

impl Reported {
    const ALL: Reported = Reported(0b1_1111);

    fn contains(self, t: ClientType) -> bool {
        self.0 & t.bit() != 0
    }
}

/// The client counts at one hierarchy node.
///
/// Values are immutable once built. Rollups produce new sets through
/// [`CounterSet::sum`] and [`CounterSet::merged`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct CounterSet {
    pub clients: u64,
    pub entity_clients: u64,
    pub non_entity_clients: u64,
    pub secret_sync_clients: u64,
    pub acme_clients: u64,
    pub origin: Origin,
    #[serde(skip)]
    reported: Reported,
}

impl CounterSet {
    /// Placeholder for a node the source gave no counts for.
    pub fn absent() -> Self {
        Self {
            clients: 0,
            entity_clients: 0,
            non_entity_clients: 0,
            secret_sync_clients: 0,
            acme_clients: 0,
            origin: Origin::Absent,
            reported: Reported::default(),
        }
    }

    /// All-zero derived set (the sum of nothing).
    pub fn zero() -> Self {
        Self::sum(std::iter::empty())
    }

    /// Build an authoritative set from the categories the source reported.
    /// Categories not listed read as 0 and are not reported.
    pub fn reported(values: &[(ClientType, u64)]) -> Self {
        let mut set = Self::absent();
        set.origin = Origin::Reported;
        for &(t, v) in values {
            *set.slot(t) = v;
            set.reported.0 |= t.bit();
        }
        set
    }

    /// Field-wise sum. The result is `Derived` and reports a category only
    /// when every input reported it.
    pub fn sum<'a, I>(sets: I) -> Self
    where
        I: IntoIterator<Item = &'a CounterSet>,
    {
        sets.into_iter().fold(
            Self {
                origin: Origin::Derived,
                reported: Reported::ALL,
                ..Self::absent()
            },
            |acc, s| acc.merged(s),
        )
    }

    /// Field-wise sum of two sets, as a new `Derived` set.
    pub fn merged(&self, other: &CounterSet) -> Self {
        Self {
            clients: self.clients.saturating_add(other.clients),
            entity_clients: self.entity_clients.saturating_add(other.entity_clients),
            non_entity_clients: self
                .non_entity_clients
                .saturating_add(other.non_entity_clients),
            secret_sync_clients: self
                .secret_sync_clients
                .saturating_add(other.secret_sync_clients),
            acme_clients: self.acme_clients.saturating_add(other.acme_clients),
            origin: Origin::Derived,
            reported: Reported(self.reported.0 & other.reported.0),
        }
    }

    pub fn get(&self, t: ClientType) -> u64 {
        match t {
            ClientType::Clients => self.clients,
            ClientType::EntityClients => self.entity_clients,
            ClientType::NonEntityClients => self.non_entity_clients,
            ClientType::SecretSyncClients => self.secret_sync_clients,
            ClientType::AcmeClients => self.acme_clients,
        }
    }

    fn slot(&mut self, t: ClientType) -> &mut u64 {
        match t {
            ClientType::Clients => &mut self.clients,
            ClientType::EntityClients => &mut self.entity_clients,
            ClientType::NonEntityClients => &mut self.non_entity_clients,
            ClientType::SecretSyncClients => &mut self.secret_sync_clients,
            ClientType::AcmeClients => &mut self.acme_clients,
        }
    }

    pub fn is_reported(&self, t: ClientType) -> bool {
        self.reported.contains(t)
    }

    /// `clients` equals the sum of the sub-categories whenever all four were
    /// reported. Partially reported sets are always reconciled.
    pub fn is_reconciled(&self) -> bool {
        if !ClientType::SUB_CATEGORIES
            .iter()
            .all(|&t| self.is_reported(t))
        {
            return true;
        }
        let parts = ClientType::SUB_CATEGORIES
            .iter()
            .fold(0u64, |acc, &t| acc.saturating_add(self.get(t)));
        parts == self.clients
    }

    pub fn is_zero(&self) -> bool {
        ClientType::ALL.iter().all(|&t| self.get(t) == 0)
    }
}
