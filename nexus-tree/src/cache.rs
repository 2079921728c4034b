use log::debug;
use std::collections::HashMap;

use crate::{LinkToken, NodeId};

/// At most one in-memory node per physical object of the open file.
#[derive(Debug, Default)]
pub struct IdentityCache {
    by_token: HashMap<LinkToken, NodeId>,
}

impl IdentityCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, token: &LinkToken) -> Option<NodeId> {
        self.by_token.get(token).copied()
    }

    /// Returns false for tokens that must never be cached.
    pub fn insert(&mut self, token: LinkToken, id: NodeId) -> bool {
        if !token.is_cacheable() {
            debug!("identity cache: refusing token {} for node {}", token, id);
            return false;
        }
        self.by_token.insert(token, id);
        true
    }

    pub fn evict(&mut self, token: &LinkToken) -> Option<NodeId> {
        self.by_token.remove(token)
    }

    /// Drop every token that maps to `id`.
    pub fn evict_node(&mut self, id: NodeId) -> usize {
        let before = self.by_token.len();
        self.by_token.retain(|_, v| *v != id);
        before - self.by_token.len()
    }

    pub fn token_of(&self, id: NodeId) -> Option<LinkToken> {
        self.by_token
            .iter()
            .find(|(_, v)| **v == id)
            .map(|(token, _)| *token)
    }

    pub fn len(&self) -> usize {
        self.by_token.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_token.is_empty()
    }
}

/// Where each caller supplied node was first written during one bulk insert.
#[derive(Debug, Default)]
pub struct InsertionMap {
    first_path: HashMap<NodeId, String>,
}

impl InsertionMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn first_path(&self, id: NodeId) -> Option<&str> {
        self.first_path.get(&id).map(|s| s.as_str())
    }

    /// Keeps the earlier path if `id` was already recorded.
    pub fn record(&mut self, id: NodeId, path: &str) -> bool {
        if self.first_path.contains_key(&id) {
            return false;
        }
        self.first_path.insert(id, path.to_string());
        true
    }

    pub fn len(&self) -> usize {
        self.first_path.len()
    }

    pub fn is_empty(&self) -> bool {
        self.first_path.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_identity_cache_refuses_sentinels() {
        let mut cache = IdentityCache::new();
        assert!(!cache.insert(LinkToken::External, NodeId(1)));
        assert!(!cache.insert(LinkToken::NoLink, NodeId(1)));
        assert!(cache.is_empty());

        assert!(cache.insert(LinkToken::Root, NodeId(0)));
        assert!(cache.insert(LinkToken::Object(42), NodeId(1)));
        assert_eq!(cache.get(&LinkToken::Object(42)), Some(NodeId(1)));
        assert_eq!(cache.len(), 2);
    }

    #[test]
    fn test_identity_cache_evict_node() {
        let mut cache = IdentityCache::new();
        cache.insert(LinkToken::Object(1), NodeId(3));
        cache.insert(LinkToken::Object(2), NodeId(4));
        assert_eq!(cache.token_of(NodeId(3)), Some(LinkToken::Object(1)));
        assert_eq!(cache.evict_node(NodeId(3)), 1);
        assert_eq!(cache.get(&LinkToken::Object(1)), None);
        assert_eq!(cache.evict(&LinkToken::Object(2)), Some(NodeId(4)));
        assert!(cache.is_empty());
    }

    #[test]
    fn test_insertion_map_keeps_first_path() {
        let mut map = InsertionMap::new();
        assert!(map.record(NodeId(5), "/entry/a"));
        assert!(!map.record(NodeId(5), "/entry/b"));
        assert_eq!(map.first_path(NodeId(5)), Some("/entry/a"));
        assert_eq!(map.first_path(NodeId(6)), None);
    }
}
