//! Storage Module
//!
//! The persistence boundary of a node. The federation core never talks to a database
//! directly; it goes through the [`Storage`] trait, which both backends implement:
//!
//! - **`memory`**: `DashMap`-backed store, used for tests and throwaway nodes.
//! - **`sqlite`**: durable store on top of `rusqlite`. Every operation runs inside its own
//!   transaction, committed on success and rolled back when the operation fails.
//!
//! The backend is chosen once at startup from configuration (`StorageBackend`).

pub mod memory;
pub mod sqlite;


use crate::config::StorageBackend;
use crate::membership::types::Node;
use crate::tweets::types::{Tweet, TweetKind};

use anyhow::Result;
use chrono::{DateTime, Utc};
use std::sync::Arc;

/// Storage-level search filter.
///
/// Time bounds are inclusive. `created_after` is the pagination cursor and is strict.
/// Results are always ordered by `created_at` ascending (ties broken by id).
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TweetFilter {
    /// Case-insensitive substring match against stored content.
    pub content: Option<String>,
    pub created_from: Option<DateTime<Utc>>,
    pub created_to: Option<DateTime<Utc>>,
    pub modified_from: Option<DateTime<Utc>>,
    pub modified_to: Option<DateTime<Utc>>,
    pub kind: Option<TweetKind>,
    pub created_after: Option<DateTime<Utc>>,
    pub limit: Option<usize>,
}

impl TweetFilter {
    pub fn matches(&self, tweet: &Tweet) -> bool {
        if let Some(kind) = self.kind
            && tweet.kind != kind
        {
            return false;
        }
        if let Some(content) = &self.content
            && !contains_ignore_case(&tweet.content, content)
        {
            return false;
        }
        if self.created_from.is_some_and(|from| tweet.created_at < from)
            || self.created_to.is_some_and(|to| tweet.created_at > to)
            || self.modified_from.is_some_and(|from| tweet.modified_at < from)
            || self.modified_to.is_some_and(|to| tweet.modified_at > to)
            || self.created_after.is_some_and(|after| tweet.created_at <= after)
        {
            return false;
        }
        true
    }
}

pub fn contains_ignore_case(haystack: &str, needle: &str) -> bool {
    haystack.to_lowercase().contains(&needle.to_lowercase())
}

/// Operations the federation core needs from a node's storage.
///
/// Implementations must be safe to share between request handlers; each call is atomic
/// on its own and no lock is held across calls.
pub trait Storage: Send + Sync {
    // --- Tweets ---

    fn insert_tweet(&self, content: &str) -> Result<Tweet>;

    fn get_tweet(&self, id: u64) -> Result<Option<Tweet>>;

    /// Replaces the content of an original tweet and bumps `modified_at`.
    /// Returns `None` when no tweet has this id.
    fn modify_tweet(&self, id: u64, content: &str) -> Result<Option<Tweet>>;

    fn delete_tweet(&self, id: u64) -> Result<bool>;

    fn create_retweet(&self, origin_node: &str, origin_id: u64) -> Result<Tweet>;

    fn search_tweets(&self, filter: &TweetFilter) -> Result<Vec<Tweet>>;

    /// Counts tweets of one kind, or all tweets when `kind` is `None`.
    fn count_tweets(&self, kind: Option<TweetKind>) -> Result<u64>;

    /// All tweets, newest first.
    fn all_tweets(&self) -> Result<Vec<Tweet>>;

    // --- Nodes ---

    fn all_nodes(&self) -> Result<Vec<Node>>;

    fn insert_node(&self, name: &str, address: &str) -> Result<Node>;

    fn get_node(&self, name: &str) -> Result<Option<Node>>;

    fn update_node(&self, name: &str, address: &str) -> Result<Option<Node>>;

    fn delete_node(&self, name: &str) -> Result<bool>;

    fn delete_all_nodes(&self) -> Result<bool>;

    /// Atomically replaces the whole node table with `nodes` (`(name, address)` pairs).
    fn replace_nodes(&self, nodes: &[(String, String)]) -> Result<()>;
}

/// Opens the storage backend selected in configuration.
pub fn open(backend: &StorageBackend) -> Result<Arc<dyn Storage>> {
    match backend {
        StorageBackend::Memory => {
            tracing::info!("Using in-memory storage");
            Ok(Arc::new(memory::MemoryStorage::new()))
        }
        StorageBackend::Sqlite { path } => {
            tracing::info!("Using sqlite storage at {}", path.display());
            Ok(Arc::new(sqlite::SqliteStorage::open(path)?))
        }
    }
}
