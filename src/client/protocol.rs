//! Node HTTP Protocol
//!
//! Paths of the public HTTP API. Every node serves the same surface, and peers talk
//! to each other through it; there is no separate internal API.

/// Node identity and tweet statistics.
pub const ENDPOINT_INDEX: &str = "/";
/// Registry listing (`GET`) and registration (`POST`, optional `?force=true`).
pub const ENDPOINT_REGISTRY: &str = "/registry/";
/// Asks this node to join the mesh through the node named in the body.
pub const ENDPOINT_JOIN: &str = "/registry/join_network";
/// Tweet listing (`GET`) and creation (`POST`).
pub const ENDPOINT_TWEETS: &str = "/tweets/";
/// Creates a retweet of `{server, id}`.
pub const ENDPOINT_RETWEET: &str = "/tweets/retweet";
/// Filtered search over this node's tweets (`all=true` widens it to the mesh).
pub const ENDPOINT_SEARCH_LOCAL: &str = "/tweets/search";
/// Paginated mesh search.
pub const ENDPOINT_SEARCH_MESH: &str = "/search";

/// Value of the `X-Server` header attached to every response.
pub const SERVER_HEADER_VALUE: &str = "tweet-mesh";
/// Name of the header carrying [`SERVER_HEADER_VALUE`].
pub const SERVER_HEADER: &str = "x-server";
/// Header carrying the API token for protected operations.
pub const API_TOKEN_HEADER: &str = "x-api-token";

pub fn registry_entry(name: &str) -> String {
    format!("{}{}", ENDPOINT_REGISTRY, name)
}

pub fn tweet_entry(id: u64) -> String {
    format!("{}{}", ENDPOINT_TWEETS, id)
}
