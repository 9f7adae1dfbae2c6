use super::aggregator::SearchAggregator;
use super::types::{SearchPageBody, SearchQuery};
use crate::error::ApiResult;
use crate::tweets::types::Tweet;

use axum::extract::Query;
use axum::{Extension, Json};

/// Search over this node's tweets, or the whole mesh with `all=true`. Peers call this
/// endpoint during fan-out.
pub async fn handle_search_local(
    Query(query): Query<SearchQuery>,
    Extension(search): Extension<SearchAggregator>,
) -> ApiResult<Json<Vec<Tweet>>> {
    let criteria = query.local_criteria()?;
    tracing::debug!("Local search: {:?}", criteria);
    let page = search.search(&criteria).await?;
    Ok(Json(page.items))
}

/// Paginated search across the mesh, or on the node given by `name`.
pub async fn handle_search_mesh(
    Query(query): Query<SearchQuery>,
    Extension(search): Extension<SearchAggregator>,
) -> ApiResult<Json<SearchPageBody>> {
    let criteria = query.mesh_criteria()?;
    tracing::debug!("Mesh search: {:?}", criteria);
    let page = search.search(&criteria).await?;
    Ok(Json(page.into()))
}
