use super::types::{Node, NodeInfo, is_valid_node_name};
use crate::client::remote::{CleanupCallback, RemoteClient, normalize_address};
use crate::config::ClientConfig;
use crate::error::{ApiError, ApiResult};
use crate::storage::Storage;

use dashmap::DashMap;
use std::sync::Arc;
use tokio::task::JoinSet;

/// Peer name to address mapping, backed by the storage collaborator.
///
/// The registry keeps no lock of its own: every mutation is a single storage call.
/// It also owns one cached `RemoteClient` per peer; a client that gives up on its peer
/// calls back into the registry, which then forgets that peer.
#[derive(Clone)]
pub struct NodeRegistry {
    storage: Arc<dyn Storage>,
    own_name: String,
    client_config: ClientConfig,
    clients: Arc<DashMap<String, Arc<RemoteClient>>>,
}

impl NodeRegistry {
    pub fn new(storage: Arc<dyn Storage>, own_name: impl Into<String>, client_config: ClientConfig) -> Self {
        Self {
            storage,
            own_name: own_name.into(),
            client_config,
            clients: Arc::new(DashMap::new()),
        }
    }

    pub fn own_name(&self) -> &str {
        &self.own_name
    }

    /// Registers a peer. Without `force_update` an existing name is a `Conflict`;
    /// with it the stored address is overwritten.
    pub fn add(&self, name: &str, address: &str, force_update: bool) -> ApiResult<Node> {
        if !is_valid_node_name(name) {
            return Err(ApiError::BadRequest(format!("Invalid node name: {:?}", name)));
        }
        if address.trim().is_empty() {
            return Err(ApiError::BadRequest("Node address must not be empty".to_string()));
        }
        if name == self.own_name {
            return Err(name_conflict());
        }

        if self.storage.get_node(name)?.is_some() {
            if !force_update {
                return Err(name_conflict());
            }
            if let Some(updated) = self.storage.update_node(name, address)? {
                self.clients.remove(name);
                tracing::info!("Updated node {} -> {}", name, address);
                return Ok(updated);
            }
            // Deleted between the lookup and the update; fall through to insert.
        }

        match self.storage.insert_node(name, address) {
            Ok(node) => {
                tracing::info!("Registered node {} at {}", name, address);
                Ok(node)
            }
            Err(e) => {
                // A concurrent registration won the insert.
                if self.storage.get_node(name)?.is_none() {
                    return Err(e.into());
                }
                if !force_update {
                    return Err(name_conflict());
                }
                self.storage
                    .update_node(name, address)?
                    .ok_or_else(|| ApiError::ServerError(format!("Node {} vanished", name)))
            }
        }
    }

    pub fn get(&self, name: &str) -> ApiResult<Node> {
        self.storage
            .get_node(name)?
            .ok_or_else(|| ApiError::NotFound(format!("Node {} is not registered.", name)))
    }

    pub fn is_known(&self, name: &str) -> ApiResult<bool> {
        Ok(self.storage.get_node(name)?.is_some())
    }

    pub fn get_all(&self) -> ApiResult<Vec<Node>> {
        Ok(self.storage.all_nodes()?)
    }

    /// Returns whether the peer was known.
    pub fn delete(&self, name: &str) -> ApiResult<bool> {
        self.clients.remove(name);
        let removed = self.storage.delete_node(name)?;
        if removed {
            tracing::info!("Unregistered node {}", name);
        }
        Ok(removed)
    }

    pub fn delete_all(&self) -> ApiResult<bool> {
        self.clients.clear();
        Ok(self.storage.delete_all_nodes()?)
    }

    /// Replaces the whole registry with `nodes`, leaving out this node itself.
    pub fn replace_all(&self, nodes: &[NodeInfo]) -> ApiResult<()> {
        let mut entries: Vec<(String, String)> = Vec::with_capacity(nodes.len());
        for node in nodes {
            if node.name == self.own_name || !is_valid_node_name(&node.name) {
                continue;
            }
            if entries.iter().any(|(name, _)| name == &node.name) {
                continue;
            }
            entries.push((node.name.clone(), node.address.clone()));
        }

        self.storage.replace_nodes(&entries)?;
        self.clients.clear();
        tracing::info!("Registry replaced with {} peers", entries.len());
        Ok(())
    }

    /// Membership snapshot as handed to a registering peer: every known node plus this one.
    pub fn snapshot(&self, own_address: &str) -> ApiResult<Vec<NodeInfo>> {
        let mut nodes: Vec<NodeInfo> = self.get_all()?.iter().map(Node::info).collect();
        nodes.push(NodeInfo::new(self.own_name.clone(), own_address));
        Ok(nodes)
    }

    /// Cached client for a registered peer. The client evicts the peer from this
    /// registry once it is found unreachable.
    pub fn client_for(&self, node: &Node) -> Arc<RemoteClient> {
        let base_url = normalize_address(&node.address);
        if let Some(client) = self.clients.get(&node.name)
            && client.base_url() == base_url
        {
            return client.clone();
        }

        let client = Arc::new(
            RemoteClient::new(&node.address, self.client_config.clone())
                .with_cleanup(self.eviction_callback(&node.name)),
        );
        self.clients.insert(node.name.clone(), client.clone());
        client
    }

    pub fn client_by_name(&self, name: &str) -> ApiResult<Arc<RemoteClient>> {
        let node = self.get(name)?;
        Ok(self.client_for(&node))
    }

    /// One-off client for an address that is not (yet) registered, e.g. a bootstrap peer.
    pub fn client_for_address(&self, address: &str) -> RemoteClient {
        RemoteClient::new(address, self.client_config.clone())
    }

    fn eviction_callback(&self, name: &str) -> CleanupCallback {
        let storage = self.storage.clone();
        let clients = self.clients.clone();
        let name = name.to_string();
        Arc::new(move || {
            clients.remove(&name);
            match storage.delete_node(&name) {
                Ok(true) => tracing::warn!("Evicted unreachable node {}", name),
                Ok(false) => {}
                Err(e) => tracing::error!("Failed to evict node {}: {:#}", name, e),
            }
        })
    }

    /// Tells every known peer that this node is leaving. Failures are ignored.
    pub async fn unregister_all(&self) {
        let nodes = match self.get_all() {
            Ok(nodes) => nodes,
            Err(e) => {
                tracing::warn!("Cannot list peers for shutdown notification: {}", e);
                return;
            }
        };

        let mut tasks = JoinSet::new();
        for node in nodes {
            let client = self.client_for_address(&node.address);
            let own_name = self.own_name.clone();
            tasks.spawn(async move {
                if let Err(e) = client.unregister(&own_name).await {
                    tracing::debug!("Unregister from {} failed: {}", node.name, e);
                }
            });
        }
        while tasks.join_next().await.is_some() {}
    }
}

fn name_conflict() -> ApiError {
    ApiError::Conflict("Node with same name already registered.".to_string())
}
