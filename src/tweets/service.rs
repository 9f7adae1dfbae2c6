use super::resolver::ReferenceResolver;
use super::types::{MAX_TWEET_LENGTH, Tweet, TweetKind, TweetStats};
use crate::error::{ApiError, ApiResult};
use crate::membership::types::is_valid_node_name;
use crate::storage::Storage;

use std::sync::Arc;

/// Tweet operations of this node: CRUD on originals, retweet creation and statistics.
/// Reads hand back resolved content.
#[derive(Clone)]
pub struct TweetService {
    storage: Arc<dyn Storage>,
    resolver: ReferenceResolver,
    own_name: String,
}

impl TweetService {
    pub fn new(storage: Arc<dyn Storage>, resolver: ReferenceResolver, own_name: impl Into<String>) -> Self {
        Self {
            storage,
            resolver,
            own_name: own_name.into(),
        }
    }

    /// `resolve = false` returns the tweet as stored (retweets keep empty content).
    pub async fn get(&self, id: u64, resolve: bool) -> ApiResult<Tweet> {
        let tweet = self.stored(id)?;
        if resolve {
            Ok(self.resolver.resolve(tweet).await)
        } else {
            Ok(tweet)
        }
    }

    /// Resolved read on behalf of a peer that is partway through a chain and has
    /// `depth` hops left.
    pub async fn get_within(&self, id: u64, depth: usize) -> ApiResult<Tweet> {
        let tweet = self.stored(id)?;
        Ok(self.resolver.resolve_within(tweet, depth).await)
    }

    /// Every tweet of this node, newest first.
    pub async fn list(&self) -> ApiResult<Vec<Tweet>> {
        let mut listed = Vec::new();
        for tweet in self.storage.all_tweets()? {
            listed.push(self.resolver.resolve(tweet).await);
        }
        Ok(listed)
    }

    pub fn create(&self, content: &str) -> ApiResult<Tweet> {
        check_length(content)?;
        let tweet = self.storage.insert_tweet(content)?;
        tracing::info!("Created tweet {}", tweet.id);
        Ok(tweet)
    }

    pub fn modify(&self, id: u64, content: &str) -> ApiResult<Tweet> {
        check_length(content)?;
        if self.stored(id)?.is_retweet() {
            return Err(ApiError::BadRequest("Retweets cannot be modified.".to_string()));
        }
        self.storage
            .modify_tweet(id, content)?
            .ok_or_else(|| not_found(id))
    }

    pub fn delete(&self, id: u64) -> ApiResult<()> {
        if !self.storage.delete_tweet(id)? {
            return Err(not_found(id));
        }
        tracing::info!("Deleted tweet {}", id);
        Ok(())
    }

    /// Stores a retweet of `origin_node#origin_id`. A local origin must exist; a remote
    /// one is only checked when the retweet is read.
    pub async fn retweet(&self, origin_node: &str, origin_id: u64) -> ApiResult<Tweet> {
        if !is_valid_node_name(origin_node) {
            return Err(ApiError::BadRequest(format!("Invalid node name: {:?}", origin_node)));
        }
        if origin_node == self.own_name {
            self.stored(origin_id)?;
        }

        let tweet = self.storage.create_retweet(origin_node, origin_id)?;
        tracing::info!("Created retweet {} of {}#{}", tweet.id, origin_node, origin_id);
        Ok(self.resolver.resolve(tweet).await)
    }

    pub fn stats(&self) -> ApiResult<TweetStats> {
        let original = self.storage.count_tweets(Some(TweetKind::Original))?;
        let retweets = self.storage.count_tweets(Some(TweetKind::Retweet))?;
        Ok(TweetStats {
            original,
            retweets,
            total: original + retweets,
        })
    }

    fn stored(&self, id: u64) -> ApiResult<Tweet> {
        self.storage.get_tweet(id)?.ok_or_else(|| not_found(id))
    }
}

fn not_found(id: u64) -> ApiError {
    ApiError::NotFound(format!("Tweet with id: {} not found.", id))
}

fn check_length(content: &str) -> ApiResult<()> {
    if content.trim().is_empty() {
        return Err(ApiError::BadRequest("Tweet must not be empty.".to_string()));
    }
    if content.chars().count() > MAX_TWEET_LENGTH {
        return Err(ApiError::BadRequest(format!(
            "Tweet exceeds maximum length of {} characters.",
            MAX_TWEET_LENGTH
        )));
    }
    Ok(())
}
