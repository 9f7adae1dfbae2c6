use super::types::{SearchCriteria, SearchPage, SearchScope};
use crate::error::{ApiError, ApiResult};
use crate::membership::registry::NodeRegistry;
use crate::storage::{Storage, contains_ignore_case};
use crate::tweets::resolver::ReferenceResolver;
use crate::tweets::types::{Tweet, TweetKind};

use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;

/// Runs a search on this node, on one named node, or across the whole mesh, and
/// merges the results into one page ordered by creation time.
#[derive(Clone)]
pub struct SearchAggregator {
    storage: Arc<dyn Storage>,
    registry: NodeRegistry,
    resolver: ReferenceResolver,
    fanout_width: usize,
}

impl SearchAggregator {
    pub fn new(
        storage: Arc<dyn Storage>,
        registry: NodeRegistry,
        resolver: ReferenceResolver,
        fanout_width: usize,
    ) -> Self {
        Self {
            storage,
            registry,
            resolver,
            fanout_width: fanout_width.max(1),
        }
    }

    /// Fails with `NotFound` when no source produced anything.
    pub async fn search(&self, criteria: &SearchCriteria) -> ApiResult<SearchPage> {
        let results = match &criteria.scope {
            SearchScope::Local => self.search_local(criteria).await?,
            SearchScope::Node(name) if name == self.registry.own_name() => {
                self.search_local(criteria).await?
            }
            SearchScope::Node(name) => {
                let client = self.registry.client_by_name(name)?;
                client.search(criteria).await?
            }
            SearchScope::Mesh => self.search_mesh(criteria).await?,
        };

        if results.is_empty() {
            return Err(ApiError::NotFound("No search results".to_string()));
        }
        Ok(paginate(results, criteria.per_page))
    }

    /// Originals and retweets of this node matching `criteria`, retweets resolved.
    /// Retweets whose content cannot be resolved are left out.
    pub async fn search_local(&self, criteria: &SearchCriteria) -> ApiResult<Vec<Tweet>> {
        let mut results = Vec::new();
        if criteria.wants(TweetKind::Original) {
            results.extend(
                self.storage
                    .search_tweets(&criteria.storage_filter(TweetKind::Original))?,
            );
        }
        if criteria.wants(TweetKind::Retweet) {
            results.extend(self.search_retweets(criteria).await?);
        }
        Ok(results)
    }

    async fn search_retweets(&self, criteria: &SearchCriteria) -> ApiResult<Vec<Tweet>> {
        let mut filter = criteria.storage_filter(TweetKind::Retweet);
        let content = criteria.content.as_deref();
        let mut found = Vec::new();

        let Some(per_page) = criteria.per_page else {
            for row in self.storage.search_tweets(&filter)? {
                if let Some(tweet) = self.displayable(row, content).await {
                    found.push(tweet);
                }
            }
            return Ok(found);
        };

        // Rows that cannot be shown still move the scan position forward, and the
        // storage is queried again from there until the page is full or rows run out.
        let mut remaining = per_page;
        loop {
            filter.limit = Some(per_page);
            let rows = self.storage.search_tweets(&filter)?;
            let exhausted = rows.len() < per_page;

            for row in rows {
                if remaining == 0 {
                    break;
                }
                filter.created_after = Some(row.created_at);
                if let Some(tweet) = self.displayable(row, content).await {
                    found.push(tweet);
                    remaining -= 1;
                }
            }

            if remaining == 0 || exhausted {
                return Ok(found);
            }
        }
    }

    /// The retweet with resolved content, or `None` if it cannot be resolved or does
    /// not match the content filter.
    async fn displayable(&self, mut row: Tweet, content: Option<&str>) -> Option<Tweet> {
        let resolved = match self.resolver.try_resolve(&row).await {
            Ok(resolved) => resolved,
            Err(e) => {
                tracing::debug!("Skipping retweet {}: {}", row.id, e);
                return None;
            }
        };
        if let Some(needle) = content
            && !contains_ignore_case(&resolved, needle)
        {
            return None;
        }
        row.content = resolved;
        Some(row)
    }

    /// This node plus every peer, at most `fanout_width` peer calls in flight.
    /// Waits for all of them; failing peers contribute nothing.
    async fn search_mesh(&self, criteria: &SearchCriteria) -> ApiResult<Vec<Tweet>> {
        let mut results = self.search_local(criteria).await?;

        let peer_criteria = SearchCriteria {
            scope: SearchScope::Local,
            ..criteria.clone()
        };
        let permits = Arc::new(Semaphore::new(self.fanout_width));
        let mut tasks = JoinSet::new();

        for node in self.registry.get_all()? {
            if node.name == self.registry.own_name() {
                continue;
            }
            let client = self.registry.client_for(&node);
            let permits = permits.clone();
            let criteria = peer_criteria.clone();
            tasks.spawn(async move {
                let _permit = permits.acquire_owned().await;
                (node.name, client.search(&criteria).await)
            });
        }

        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((_, Ok(tweets))) => results.extend(tweets),
                Ok((name, Err(e))) if e.is_not_found() => {
                    tracing::debug!("Peer {} had no results", name);
                }
                Ok((name, Err(e))) => tracing::warn!("Peer {} contributed nothing: {}", name, e),
                Err(e) => tracing::error!("Search task failed: {}", e),
            }
        }

        Ok(results)
    }
}

/// Sorts ascending by creation time and cuts to `per_page`. The cursor is the creation
/// time of the last kept item when at least `per_page` results came in.
pub fn paginate(mut results: Vec<Tweet>, per_page: Option<usize>) -> SearchPage {
    results.sort_by(|a, b| a.created_at.cmp(&b.created_at));

    let Some(per_page) = per_page else {
        return SearchPage {
            items: results,
            cursor: None,
        };
    };

    let more = results.len() >= per_page;
    results.truncate(per_page);
    let cursor = if more {
        results.last().map(|tweet| tweet.created_at)
    } else {
        None
    };

    SearchPage {
        items: results,
        cursor,
    }
}
