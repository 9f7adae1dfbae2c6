use super::{Storage, TweetFilter};
use crate::membership::types::Node;
use crate::tweets::types::{Reference, Tweet, TweetKind, wire_time};

use anyhow::Result;
use dashmap::DashMap;
use std::collections::HashMap;
use std::sync::RwLock;
use std::sync::atomic::{AtomicU64, Ordering};

/// In-memory storage backend.
///
/// Tweets live in a `DashMap` keyed by id; ids come from a monotonic counter starting at 1.
/// The node table sits behind a single `RwLock` so that `replace_nodes` is atomic.
pub struct MemoryStorage {
    tweets: DashMap<u64, Tweet>,
    next_id: AtomicU64,
    nodes: RwLock<HashMap<String, Node>>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self {
            tweets: DashMap::new(),
            next_id: AtomicU64::new(1),
            nodes: RwLock::new(HashMap::new()),
        }
    }

    fn allocate_id(&self) -> u64 {
        self.next_id.fetch_add(1, Ordering::SeqCst)
    }

    fn read_nodes(&self) -> Result<std::sync::RwLockReadGuard<'_, HashMap<String, Node>>> {
        self.nodes
            .read()
            .map_err(|_| anyhow::anyhow!("Node table lock poisoned"))
    }

    fn write_nodes(&self) -> Result<std::sync::RwLockWriteGuard<'_, HashMap<String, Node>>> {
        self.nodes
            .write()
            .map_err(|_| anyhow::anyhow!("Node table lock poisoned"))
    }
}

impl Default for MemoryStorage {
    fn default() -> Self {
        Self::new()
    }
}

fn sort_ascending(tweets: &mut [Tweet]) {
    tweets.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
}

impl Storage for MemoryStorage {
    fn insert_tweet(&self, content: &str) -> Result<Tweet> {
        let tweet = Tweet::original(self.allocate_id(), content, wire_time::now());
        self.tweets.insert(tweet.id, tweet.clone());
        Ok(tweet)
    }

    fn get_tweet(&self, id: u64) -> Result<Option<Tweet>> {
        Ok(self.tweets.get(&id).map(|entry| entry.value().clone()))
    }

    fn modify_tweet(&self, id: u64, content: &str) -> Result<Option<Tweet>> {
        match self.tweets.get_mut(&id) {
            Some(mut entry) => {
                let tweet = entry.value_mut();
                tweet.content = content.to_string();
                tweet.modified_at = wire_time::now();
                Ok(Some(tweet.clone()))
            }
            None => Ok(None),
        }
    }

    fn delete_tweet(&self, id: u64) -> Result<bool> {
        Ok(self.tweets.remove(&id).is_some())
    }

    fn create_retweet(&self, origin_node: &str, origin_id: u64) -> Result<Tweet> {
        let tweet = Tweet::retweet(
            self.allocate_id(),
            Reference::new(origin_node, origin_id),
            wire_time::now(),
        );
        self.tweets.insert(tweet.id, tweet.clone());
        Ok(tweet)
    }

    fn search_tweets(&self, filter: &TweetFilter) -> Result<Vec<Tweet>> {
        let mut found: Vec<Tweet> = self
            .tweets
            .iter()
            .filter(|entry| filter.matches(entry.value()))
            .map(|entry| entry.value().clone())
            .collect();

        sort_ascending(&mut found);
        if let Some(limit) = filter.limit {
            found.truncate(limit);
        }
        Ok(found)
    }

    fn count_tweets(&self, kind: Option<TweetKind>) -> Result<u64> {
        let count = self
            .tweets
            .iter()
            .filter(|entry| kind.is_none_or(|k| entry.value().kind == k))
            .count();
        Ok(count as u64)
    }

    fn all_tweets(&self) -> Result<Vec<Tweet>> {
        let mut all: Vec<Tweet> = self
            .tweets
            .iter()
            .map(|entry| entry.value().clone())
            .collect();
        sort_ascending(&mut all);
        all.reverse();
        Ok(all)
    }

    fn all_nodes(&self) -> Result<Vec<Node>> {
        let mut nodes: Vec<Node> = self.read_nodes()?.values().cloned().collect();
        nodes.sort_by(|a, b| a.last_checked_at.cmp(&b.last_checked_at));
        Ok(nodes)
    }

    fn insert_node(&self, name: &str, address: &str) -> Result<Node> {
        let mut nodes = self.write_nodes()?;
        if nodes.contains_key(name) {
            return Err(anyhow::anyhow!("Node {} already stored", name));
        }
        let node = Node::new(name, address);
        nodes.insert(name.to_string(), node.clone());
        Ok(node)
    }

    fn get_node(&self, name: &str) -> Result<Option<Node>> {
        Ok(self.read_nodes()?.get(name).cloned())
    }

    fn update_node(&self, name: &str, address: &str) -> Result<Option<Node>> {
        let mut nodes = self.write_nodes()?;
        match nodes.get_mut(name) {
            Some(node) => {
                node.address = address.to_string();
                node.last_checked_at = wire_time::now();
                Ok(Some(node.clone()))
            }
            None => Ok(None),
        }
    }

    fn delete_node(&self, name: &str) -> Result<bool> {
        Ok(self.write_nodes()?.remove(name).is_some())
    }

    fn delete_all_nodes(&self) -> Result<bool> {
        let mut nodes = self.write_nodes()?;
        let had_any = !nodes.is_empty();
        nodes.clear();
        Ok(had_any)
    }

    fn replace_nodes(&self, replacement: &[(String, String)]) -> Result<()> {
        let fresh: HashMap<String, Node> = replacement
            .iter()
            .map(|(name, address)| (name.clone(), Node::new(name.clone(), address.clone())))
            .collect();
        *self.write_nodes()? = fresh;
        Ok(())
    }
}
