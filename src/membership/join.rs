use super::registry::NodeRegistry;
use super::types::{JoinState, Node, NodeInfo};
use crate::client::remote::normalize_address;
use crate::error::{ApiError, ApiResult};

use tokio::sync::Mutex;
use tokio::task::JoinSet;

/// One-time handshake that brings an isolated node into an existing mesh.
///
/// `Isolated -> Joined` is the only transition; the state lock is held for the whole
/// handshake so two concurrent join requests cannot both run it.
pub struct MeshJoin {
    registry: NodeRegistry,
    me: NodeInfo,
    state: Mutex<JoinState>,
}

impl MeshJoin {
    pub fn new(registry: NodeRegistry, me: NodeInfo) -> Self {
        Self {
            registry,
            me,
            state: Mutex::new(JoinState::Isolated),
        }
    }

    pub async fn state(&self) -> JoinState {
        *self.state.lock().await
    }

    /// Registers with `bootstrap_address` (forcing over any stale entry for our name),
    /// adopts its membership snapshot and then announces ourselves to the rest of it.
    ///
    /// Returns the adopted peer list. Failing to register with the bootstrap peer is a
    /// `BadGateway`; failing to reach the others is only logged.
    pub async fn join(&self, bootstrap_address: &str) -> ApiResult<Vec<NodeInfo>> {
        let mut state = self.state.lock().await;
        if *state == JoinState::Joined {
            return Err(ApiError::Conflict("This node already joined the mesh.".to_string()));
        }

        tracing::info!("Joining mesh through {}", bootstrap_address);
        let bootstrap = self.registry.client_for_address(bootstrap_address);
        let snapshot = match bootstrap.register(&self.me, true).await {
            Ok(snapshot) => snapshot,
            Err(e) => {
                tracing::error!("Bootstrap peer {} refused or failed: {}", bootstrap_address, e);
                return Err(ApiError::unreachable());
            }
        };

        self.registry.replace_all(&snapshot)?;
        *state = JoinState::Joined;

        let peers: Vec<NodeInfo> = snapshot
            .into_iter()
            .filter(|node| node.name != self.me.name)
            .collect();
        tracing::info!("Joined mesh with {} peers", peers.len());

        self.announce(&peers, &normalize_address(bootstrap_address)).await;
        Ok(peers)
    }

    /// Registers with every peer except the bootstrap one so their registries learn
    /// about us too.
    async fn announce(&self, peers: &[NodeInfo], bootstrap_url: &str) {
        let mut tasks = JoinSet::new();
        for peer in peers {
            if normalize_address(&peer.address) == bootstrap_url {
                continue;
            }
            let client = self.registry.client_for(&Node::new(&peer.name, &peer.address));
            let me = self.me.clone();
            let name = peer.name.clone();
            tasks.spawn(async move {
                match client.register(&me, true).await {
                    Ok(_) => tracing::debug!("Announced to {}", name),
                    Err(e) => tracing::warn!("Could not announce to {}: {}", name, e),
                }
            });
        }
        while tasks.join_next().await.is_some() {}
    }
}
