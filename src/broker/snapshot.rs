use serde::Serialize;

#[derive(Debug, Clone, Default, Serialize)]
pub struct BrokerSnapshot {
    pub active_clients: usize,
    pub subscriptions: usize,
    pub filters: Vec<FilterSnapshot>,
    pub wildcard_subscriptions: Vec<WildcardSubscription>,
    pub stats: DispatchStats,
}

#[derive(Debug, Clone, Serialize)]
pub struct FilterSnapshot {
    pub pattern: String,
    pub subscribers: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct WildcardSubscription {
    pub pattern: String,
    pub client_id: String,
}

/// Running totals kept by the dispatch loop.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct DispatchStats {
    pub published: u64,
    pub delivered: u64,
    pub failed: u64,
    pub evicted: u64,
}
