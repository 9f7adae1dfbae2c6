use super::service::TweetService;
use super::types::{NodeIndex, RetweetBody, Tweet, TweetBody};
use crate::auth::require_api_token;
use crate::config::NodeConfig;
use crate::error::{ApiError, ApiResult};
use crate::search::types::parse_bool;

use axum::extract::rejection::{JsonRejection, PathRejection};
use axum::extract::{Path, Query};
use axum::http::{HeaderMap, StatusCode};
use axum::{Extension, Json};
use serde::Deserialize;
use std::sync::Arc;

#[derive(Debug, Default, Deserialize)]
pub struct GetTweetParams {
    /// `resolve=false` returns a retweet without following its reference.
    #[serde(default)]
    pub resolve: Option<String>,
    /// Hop budget left for resolving, set by a peer that hands over the rest of a chain.
    #[serde(default)]
    pub depth: Option<String>,
}

impl GetTweetParams {
    fn depth(&self) -> ApiResult<Option<usize>> {
        match self.depth.as_deref().map(str::trim).filter(|raw| !raw.is_empty()) {
            Some(raw) => raw
                .parse()
                .map(Some)
                .map_err(|_| ApiError::BadRequest(format!("Expected integer, got: {}", raw))),
            None => Ok(None),
        }
    }
}

pub async fn handle_index(
    Extension(config): Extension<Arc<NodeConfig>>,
    Extension(tweets): Extension<TweetService>,
) -> ApiResult<Json<NodeIndex>> {
    Ok(Json(NodeIndex {
        name: config.own_name.clone(),
        address: config.own_address.clone(),
        stats: tweets.stats()?,
    }))
}

pub async fn handle_list_tweets(
    Extension(tweets): Extension<TweetService>,
) -> ApiResult<Json<Vec<Tweet>>> {
    Ok(Json(tweets.list().await?))
}

pub async fn handle_get_tweet(
    id: Result<Path<u64>, PathRejection>,
    Query(params): Query<GetTweetParams>,
    Extension(tweets): Extension<TweetService>,
) -> ApiResult<Json<Tweet>> {
    let Path(id) = id?;
    let resolve = parse_bool(params.resolve.as_deref()).unwrap_or(true);
    let tweet = match params.depth()? {
        Some(depth) if resolve => tweets.get_within(id, depth).await?,
        _ => tweets.get(id, resolve).await?,
    };
    Ok(Json(tweet))
}

pub async fn handle_create_tweet(
    Extension(tweets): Extension<TweetService>,
    payload: Result<Json<TweetBody>, JsonRejection>,
) -> ApiResult<(StatusCode, Json<Tweet>)> {
    let Json(body) = payload?;
    let tweet = tweets.create(&body.tweet)?;
    Ok((StatusCode::CREATED, Json(tweet)))
}

pub async fn handle_modify_tweet(
    id: Result<Path<u64>, PathRejection>,
    Extension(tweets): Extension<TweetService>,
    payload: Result<Json<TweetBody>, JsonRejection>,
) -> ApiResult<Json<Tweet>> {
    let Path(id) = id?;
    let Json(body) = payload?;
    Ok(Json(tweets.modify(id, &body.tweet)?))
}

pub async fn handle_delete_tweet(
    id: Result<Path<u64>, PathRejection>,
    headers: HeaderMap,
    Extension(config): Extension<Arc<NodeConfig>>,
    Extension(tweets): Extension<TweetService>,
) -> ApiResult<StatusCode> {
    require_api_token(&headers, config.api_token.as_deref())?;
    let Path(id) = id?;
    tweets.delete(id)?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn handle_retweet(
    Extension(tweets): Extension<TweetService>,
    payload: Result<Json<RetweetBody>, JsonRejection>,
) -> ApiResult<(StatusCode, Json<Tweet>)> {
    let Json(body) = payload?;
    let tweet = tweets.retweet(&body.server, body.id).await?;
    Ok((StatusCode::CREATED, Json(tweet)))
}
