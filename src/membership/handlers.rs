use super::join::MeshJoin;
use super::registry::NodeRegistry;
use super::types::{NodeInfo, RegisterParams};
use crate::config::NodeConfig;
use crate::error::{ApiError, ApiResult};

use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, Query};
use axum::http::StatusCode;
use axum::{Extension, Json};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

#[derive(Debug, Serialize, Deserialize)]
pub struct JoinResponse {
    pub message: String,
    pub peers: Vec<NodeInfo>,
}

pub async fn handle_list_nodes(
    Extension(registry): Extension<NodeRegistry>,
) -> ApiResult<Json<Vec<NodeInfo>>> {
    let nodes = registry.get_all()?;
    Ok(Json(nodes.iter().map(|node| node.info()).collect()))
}

/// Registers the calling node and answers with the full membership, this node included.
pub async fn handle_register(
    Query(params): Query<RegisterParams>,
    Extension(config): Extension<Arc<NodeConfig>>,
    Extension(registry): Extension<NodeRegistry>,
    payload: Result<Json<NodeInfo>, JsonRejection>,
) -> ApiResult<(StatusCode, Json<Vec<NodeInfo>>)> {
    let Json(node) = payload?;
    registry.add(&node.name, &node.address, params.force())?;
    let snapshot = registry.snapshot(&config.own_address)?;
    Ok((StatusCode::CREATED, Json(snapshot)))
}

pub async fn handle_unregister(
    Path(name): Path<String>,
    Extension(registry): Extension<NodeRegistry>,
) -> ApiResult<StatusCode> {
    if registry.delete(&name)? {
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(ApiError::NotFound(format!("Node with name {} not found.", name)))
    }
}

/// Joins the mesh through the existing node given in the body.
pub async fn handle_join(
    Extension(join): Extension<Arc<MeshJoin>>,
    payload: Result<Json<NodeInfo>, JsonRejection>,
) -> ApiResult<Json<JoinResponse>> {
    let Json(bootstrap) = payload?;
    let peers = join.join(&bootstrap.address).await?;
    Ok(Json(JoinResponse {
        message: "Node successfully joined network.".to_string(),
        peers,
    }))
}
