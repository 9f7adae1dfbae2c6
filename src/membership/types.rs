use chrono::{DateTime, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::LazyLock;

static NODE_NAME: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z0-9_.\-]+$").expect("valid node name pattern"));

/// A peer known to this node.
///
/// `name` is unique mesh-wide by convention only. `last_checked_at` is an advisory
/// freshness marker and never leaves the node.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Node {
    pub name: String,
    pub address: String,

    #[serde(skip)]
    pub last_checked_at: DateTime<Utc>,
}

impl Node {
    pub fn new(name: impl Into<String>, address: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            address: address.into(),
            last_checked_at: Utc::now(),
        }
    }

    pub fn info(&self) -> NodeInfo {
        NodeInfo {
            name: self.name.clone(),
            address: self.address.clone(),
        }
    }
}

/// Registration payload and membership snapshot entry: `{"name", "address"}`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct NodeInfo {
    pub name: String,
    pub address: String,
}

impl NodeInfo {
    pub fn new(name: impl Into<String>, address: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            address: address.into(),
        }
    }
}

/// Query of the registration endpoint. `force=true` overwrites an existing entry.
#[derive(Debug, Default, Deserialize)]
pub struct RegisterParams {
    #[serde(default)]
    pub force: Option<String>,
}

impl RegisterParams {
    pub fn force(&self) -> bool {
        crate::search::types::parse_bool(self.force.as_deref()).unwrap_or(false)
    }
}

/// Node names end up inside retweet references (`<name>#<id>`), so `#` and whitespace
/// are not allowed.
pub fn is_valid_node_name(name: &str) -> bool {
    NODE_NAME.is_match(name)
}

/// Lifecycle of this process' membership: joining happens at most once.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JoinState {
    Isolated,
    Joined,
}
