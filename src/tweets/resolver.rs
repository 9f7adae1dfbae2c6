use super::types::{Reference, Tweet};
use crate::client::remote::RemoteClient;
use crate::error::ApiError;
use crate::membership::registry::NodeRegistry;
use crate::storage::Storage;

use std::collections::HashSet;
use std::sync::Arc;
use thiserror::Error;

#[derive(Debug, Error, PartialEq)]
pub enum ResolveError {
    #[error("retweet {0} has no reference")]
    MissingReference(u64),

    #[error("reference cycle through {0}")]
    Cycle(Reference),

    #[error("reference chain longer than {0} hops")]
    TooDeep(usize),

    #[error("origin {0} has no content")]
    EmptyOrigin(Reference),

    #[error("peer holding {0} could not resolve it")]
    Unresolved(Reference),

    #[error("origin {reference} unavailable: {source}")]
    Origin {
        reference: Reference,
        #[source]
        source: ApiError,
    },
}

/// Follows retweet references to the original content.
///
/// The walk is iterative and runs on this node as long as it knows every node on the
/// chain: remote hops fetch the peer's stored tweet without letting the peer resolve it,
/// so the visited set and the depth cap cover node boundaries too. Past a node this
/// registry does not know, the peer before it finishes the walk under the same hop budget.
#[derive(Clone)]
pub struct ReferenceResolver {
    storage: Arc<dyn Storage>,
    registry: NodeRegistry,
    max_depth: usize,
}

impl ReferenceResolver {
    pub fn new(storage: Arc<dyn Storage>, registry: NodeRegistry, max_depth: usize) -> Self {
        Self {
            storage,
            registry,
            max_depth,
        }
    }

    /// Effective content of `tweet`. Never fails: an unresolvable retweet yields its
    /// stored (empty) content.
    pub async fn resolve_content(&self, tweet: &Tweet) -> String {
        self.resolve_content_within(tweet, self.max_depth).await
    }

    async fn resolve_content_within(&self, tweet: &Tweet, depth: usize) -> String {
        match self.try_resolve_within(tweet, depth).await {
            Ok(content) => content,
            Err(e) => {
                tracing::debug!("Tweet {} left unresolved: {}", tweet.id, e);
                tweet.content.clone()
            }
        }
    }

    /// `tweet` with its content filled in.
    pub async fn resolve(&self, tweet: Tweet) -> Tweet {
        self.resolve_within(tweet, self.max_depth).await
    }

    /// Like [`resolve`](Self::resolve), following at most `depth` references. A peer that
    /// hands part of a chain to this node passes its remaining hop budget here.
    pub async fn resolve_within(&self, mut tweet: Tweet, depth: usize) -> Tweet {
        if tweet.is_retweet() {
            tweet.content = self.resolve_content_within(&tweet, depth).await;
        }
        tweet
    }

    pub async fn try_resolve(&self, tweet: &Tweet) -> Result<String, ResolveError> {
        self.try_resolve_within(tweet, self.max_depth).await
    }

    /// Walks the chain starting at `tweet`, fetching at most `depth` tweets (capped by
    /// this node's own limit).
    ///
    /// When a peer's retweet points at a node this registry does not know, the rest of
    /// the chain is handed to that peer together with the hops still left, so partial
    /// membership does not break resolution and the cap holds mesh-wide.
    pub async fn try_resolve_within(&self, tweet: &Tweet, depth: usize) -> Result<String, ResolveError> {
        if !tweet.is_retweet() {
            return Ok(tweet.content.clone());
        }

        let budget = depth.min(self.max_depth);
        let mut current = tweet
            .reference
            .clone()
            .ok_or(ResolveError::MissingReference(tweet.id))?;
        let mut visited = HashSet::new();

        for used in 1..=budget {
            if !visited.insert(current.clone()) {
                return Err(ResolveError::Cycle(current));
            }

            let (hop, holder) = self.fetch(&current).await?;
            if !hop.is_retweet() {
                if hop.content.is_empty() {
                    return Err(ResolveError::EmptyOrigin(current));
                }
                return Ok(hop.content);
            }
            // A peer that resolves on its own answers with filled-in content.
            if !hop.content.is_empty() {
                return Ok(hop.content);
            }

            let next = hop
                .reference
                .ok_or(ResolveError::MissingReference(hop.id))?;
            if let Some(holder) = holder
                && !self.knows(&next.node)
            {
                return self.delegate(&holder, current, budget - used).await;
            }
            current = next;
        }

        Err(ResolveError::TooDeep(budget))
    }

    fn knows(&self, node: &str) -> bool {
        node == self.registry.own_name() || matches!(self.registry.is_known(node), Ok(true))
    }

    /// Asks the peer holding `reference` to resolve it with `remaining` hops.
    async fn delegate(
        &self,
        holder: &RemoteClient,
        reference: Reference,
        remaining: usize,
    ) -> Result<String, ResolveError> {
        if remaining == 0 {
            return Err(ResolveError::TooDeep(self.max_depth));
        }

        tracing::debug!(
            "Handing {} to {} with {} hops left",
            reference,
            holder.base_url(),
            remaining
        );
        match holder.get_tweet_within(reference.tweet_id, remaining).await {
            Ok(resolved) if !resolved.content.is_empty() => Ok(resolved.content),
            Ok(_) => Err(ResolveError::Unresolved(reference)),
            Err(source) => Err(ResolveError::Origin { reference, source }),
        }
    }

    /// One hop: the stored tweet behind `reference`, plus the client of the peer that
    /// holds it when the hop was remote.
    async fn fetch(
        &self,
        reference: &Reference,
    ) -> Result<(Tweet, Option<Arc<RemoteClient>>), ResolveError> {
        let origin = |source: ApiError| ResolveError::Origin {
            reference: reference.clone(),
            source,
        };

        if reference.node == self.registry.own_name() {
            let tweet = self
                .storage
                .get_tweet(reference.tweet_id)
                .map_err(|e| origin(e.into()))?
                .ok_or_else(|| origin(ApiError::NotFound("Tweet not found".to_string())))?;
            return Ok((tweet, None));
        }

        let client = self.registry.client_by_name(&reference.node).map_err(origin)?;
        let tweet = client
            .get_stored_tweet(reference.tweet_id)
            .await
            .map_err(origin)?;
        Ok((tweet, Some(client)))
    }
}
