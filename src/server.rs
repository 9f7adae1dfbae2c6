//! HTTP server assembly.

use anyhow::Result;
use axum::http::HeaderValue;
use axum::middleware;
use axum::response::Response;
use axum::routing::{delete, get, post};
use axum::{Extension, Router};
use std::future::Future;
use tokio::net::TcpListener;

use crate::client::protocol::*;
use crate::context::NodeContext;
use crate::membership::handlers::*;
use crate::search::handlers::*;
use crate::tweets::handlers::*;

pub fn router(ctx: &NodeContext) -> Router {
    Router::new()
        .route(ENDPOINT_INDEX, get(handle_index))
        // Registry
        .route("/registry", get(handle_list_nodes).post(handle_register))
        .route(ENDPOINT_REGISTRY, get(handle_list_nodes).post(handle_register))
        .route(ENDPOINT_JOIN, post(handle_join))
        .route("/registry/:name", delete(handle_unregister))
        // Tweets
        .route("/tweets", get(handle_list_tweets).post(handle_create_tweet))
        .route(ENDPOINT_TWEETS, get(handle_list_tweets).post(handle_create_tweet))
        .route(ENDPOINT_RETWEET, post(handle_retweet))
        .route(ENDPOINT_SEARCH_LOCAL, get(handle_search_local))
        .route(
            "/tweets/:id",
            get(handle_get_tweet)
                .put(handle_modify_tweet)
                .delete(handle_delete_tweet),
        )
        // Search
        .route(ENDPOINT_SEARCH_MESH, get(handle_search_mesh))
        .layer(Extension(ctx.config.clone()))
        .layer(Extension(ctx.registry.clone()))
        .layer(Extension(ctx.join.clone()))
        .layer(Extension(ctx.tweets.clone()))
        .layer(Extension(ctx.search.clone()))
        .layer(middleware::map_response(stamp_server_header))
}

async fn stamp_server_header(mut response: Response) -> Response {
    response
        .headers_mut()
        .insert(SERVER_HEADER, HeaderValue::from_static(SERVER_HEADER_VALUE));
    response
}

/// Serves until `shutdown` resolves, then tells every peer this node is leaving.
pub async fn serve<F>(ctx: NodeContext, listener: TcpListener, shutdown: F) -> Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    let app = router(&ctx);
    tracing::info!(
        "Node {} listening on {}",
        ctx.config.own_name,
        listener.local_addr()?
    );

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown)
        .await?;

    tracing::info!("Shutting down, notifying peers");
    ctx.registry.unregister_all().await;
    Ok(())
}

/// Resolves on Ctrl+C or SIGTERM.
pub async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!("Failed to listen for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
