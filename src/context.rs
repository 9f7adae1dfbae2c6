//! Per-process node context.
//!
//! Everything a request needs (configuration, storage, registry and the services built on
//! them) is wired once here and handed to the HTTP layer. There is no global state.

use anyhow::Result;
use std::sync::Arc;

use crate::config::NodeConfig;
use crate::membership::join::MeshJoin;
use crate::membership::registry::NodeRegistry;
use crate::membership::types::NodeInfo;
use crate::search::aggregator::SearchAggregator;
use crate::storage::{self, Storage};
use crate::tweets::resolver::ReferenceResolver;
use crate::tweets::service::TweetService;

#[derive(Clone)]
pub struct NodeContext {
    pub config: Arc<NodeConfig>,
    pub storage: Arc<dyn Storage>,
    pub registry: NodeRegistry,
    pub resolver: ReferenceResolver,
    pub tweets: TweetService,
    pub search: SearchAggregator,
    pub join: Arc<MeshJoin>,
}

impl NodeContext {
    pub fn new(config: NodeConfig, storage: Arc<dyn Storage>) -> Self {
        let registry = NodeRegistry::new(
            storage.clone(),
            config.own_name.clone(),
            config.client.clone(),
        );
        let resolver = ReferenceResolver::new(
            storage.clone(),
            registry.clone(),
            config.max_reference_depth,
        );
        let tweets = TweetService::new(storage.clone(), resolver.clone(), config.own_name.clone());
        let search = SearchAggregator::new(
            storage.clone(),
            registry.clone(),
            resolver.clone(),
            config.fanout_width,
        );
        let me = NodeInfo::new(config.own_name.clone(), config.own_address.clone());
        let join = Arc::new(MeshJoin::new(registry.clone(), me));

        Self {
            config: Arc::new(config),
            storage,
            registry,
            resolver,
            tweets,
            search,
            join,
        }
    }

    /// Validates `config` and opens the configured storage backend.
    pub fn open(config: NodeConfig) -> Result<Self> {
        config.validate()?;
        let storage = storage::open(&config.storage)?;
        Ok(Self::new(config, storage))
    }

    pub fn me(&self) -> NodeInfo {
        NodeInfo::new(self.config.own_name.clone(), self.config.own_address.clone())
    }
}
