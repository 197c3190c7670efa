//! Subscription registry: filter -> clients, and the reverse client -> filters index.
//!
//! The reverse index keeps disconnect cleanup proportional to what the client
//! held instead of the whole filter space. The segment trie mirrors `filters`
//! and is only an accelerator; `MatchStrategy::Linear` answers from `filters`
//! directly and must always agree with it.

use std::collections::{HashMap, HashSet};

use crate::broker::errors::FilterError;
use crate::broker::radix_tree::Node;
use crate::broker::topic::{TopicFilter, TopicPath};
use crate::broker::types::ClientId;
use crate::config::MatchStrategy;

#[derive(Default)]
pub struct SubscriptionRegistry {
    strategy: MatchStrategy,
    filters: HashMap<TopicFilter, HashSet<ClientId>>,
    client_filters: HashMap<ClientId, HashSet<TopicFilter>>,
    index: Node,
}

impl SubscriptionRegistry {
    pub fn new(strategy: MatchStrategy) -> Self {
        Self {
            strategy,
            ..Default::default()
        }
    }

    pub fn strategy(&self) -> MatchStrategy {
        self.strategy
    }

    /// Parses `pattern` and records the subscription. Returns false if it already existed.
    pub fn subscribe(&mut self, client: &ClientId, pattern: &str) -> Result<bool, FilterError> {
        let filter = TopicFilter::parse(pattern)?;
        Ok(self.subscribe_filter(client, filter))
    }

    pub fn subscribe_filter(&mut self, client: &ClientId, filter: TopicFilter) -> bool {
        let added = self
            .client_filters
            .entry(client.clone())
            .or_default()
            .insert(filter.clone());
        if !added {
            return false;
        }

        self.index.insert(filter.segments(), client);
        self.filters.entry(filter).or_default().insert(client.clone());
        true
    }

    /// Removes the pair if present. Returns false when there was nothing to remove.
    pub fn unsubscribe(&mut self, client: &ClientId, filter: &TopicFilter) -> bool {
        let removed = match self.client_filters.get_mut(client) {
            Some(held) => {
                let removed = held.remove(filter);
                if held.is_empty() {
                    self.client_filters.remove(client);
                }
                removed
            }
            None => false,
        };

        if removed {
            self.detach(client, filter);
        }
        removed
    }

    /// Drops every subscription `client` holds. Returns how many were removed.
    pub fn remove_client(&mut self, client: &ClientId) -> usize {
        let Some(held) = self.client_filters.remove(client) else {
            return 0;
        };

        let count = held.len();
        for filter in &held {
            self.detach(client, filter);
        }
        count
    }

    fn detach(&mut self, client: &ClientId, filter: &TopicFilter) {
        if let Some(subscribers) = self.filters.get_mut(filter) {
            subscribers.remove(client);
            if subscribers.is_empty() {
                self.filters.remove(filter);
            }
        }
        self.index.remove(filter.segments(), client);
    }

    /// Every client holding at least one filter that matches `topic`, each exactly once.
    pub fn matching_subscribers(&self, topic: &TopicPath) -> HashSet<ClientId> {
        match self.strategy {
            MatchStrategy::Trie => {
                let mut matched = HashSet::new();
                self.index.collect_matches(topic.segments(), &mut matched);
                matched
            }
            MatchStrategy::Linear => self
                .filters
                .iter()
                .filter(|(filter, _)| filter.matches(topic))
                .flat_map(|(_, subscribers)| subscribers.iter().cloned())
                .collect(),
        }
    }

    pub fn filters_of(&self, client: &ClientId) -> Option<&HashSet<TopicFilter>> {
        self.client_filters.get(client)
    }

    pub fn subscribers_of(&self, filter: &TopicFilter) -> Option<&HashSet<ClientId>> {
        self.filters.get(filter)
    }

    pub fn filters(&self) -> impl Iterator<Item = (&TopicFilter, &HashSet<ClientId>)> {
        self.filters.iter()
    }

    pub fn filter_count(&self) -> usize {
        self.filters.len()
    }

    pub fn subscription_count(&self) -> usize {
        self.client_filters.values().map(HashSet::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.filters.is_empty() && self.client_filters.is_empty() && self.index.is_empty()
    }

    /// Both maps describe the same set of (client, filter) pairs.
    #[cfg(test)]
    pub(crate) fn is_consistent(&self) -> bool {
        let forward = self
            .filters
            .iter()
            .flat_map(|(f, cs)| cs.iter().map(move |c| (c.clone(), f.clone())))
            .collect::<HashSet<_>>();
        let reverse = self
            .client_filters
            .iter()
            .flat_map(|(c, fs)| fs.iter().map(move |f| (c.clone(), f.clone())))
            .collect::<HashSet<_>>();
        forward == reverse
            && self.filters.values().all(|cs| !cs.is_empty())
            && self.client_filters.values().all(|fs| !fs.is_empty())
    }
}
