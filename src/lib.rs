//! Federated Tweet Mesh Library
//!
//! A tweet node that owns its own tweets and federates with peer nodes over HTTP.
//! The binary (`main.rs`) wires these modules into a running node.
//!
//! ## Architecture Modules
//! - **`membership`**: the peer registry, the one-time mesh join and shutdown unregistration.
//! - **`client`**: typed HTTP client for one peer with retries and unreachable-peer eviction.
//! - **`tweets`**: local tweet CRUD and retweet reference resolution across nodes.
//! - **`search`**: local, single-node and mesh-wide search with creation-time pagination.
//! - **`storage`**: the storage trait with in-memory and SQLite backends.
//! - **`context`** / **`server`**: explicit per-process wiring and the axum router.

pub mod auth;
pub mod client;
pub mod config;
pub mod context;
pub mod error;
pub mod membership;
pub mod search;
pub mod server;
pub mod storage;
pub mod tweets;
