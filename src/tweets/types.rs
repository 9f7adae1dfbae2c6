//! Tweet Data Types
//!
//! The `Tweet` struct is used both at rest and on the wire. Field names on the wire follow
//! the format every node in the mesh speaks: `type` for the kind and `tweet` for the content.

use chrono::{DateTime, NaiveDateTime, SubsecRound, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Maximum length (in characters) of an original tweet.
pub const MAX_TWEET_LENGTH: usize = 140;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum TweetKind {
    Original,
    Retweet,
}

impl TweetKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            TweetKind::Original => "original",
            TweetKind::Retweet => "retweet",
        }
    }
}

impl FromStr for TweetKind {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "original" => Ok(TweetKind::Original),
            "retweet" => Ok(TweetKind::Retweet),
            other => Err(anyhow::anyhow!("Unknown tweet kind: {}", other)),
        }
    }
}

/// Pointer from a retweet to the tweet it re-publishes: `(origin node, origin tweet id)`.
///
/// Serialized as `"<node>#<id>"`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Reference {
    pub node: String,
    pub tweet_id: u64,
}

impl Reference {
    pub fn new(node: impl Into<String>, tweet_id: u64) -> Self {
        Self {
            node: node.into(),
            tweet_id,
        }
    }
}

impl fmt::Display for Reference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}", self.node, self.tweet_id)
    }
}

impl FromStr for Reference {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (node, id) = s
            .rsplit_once('#')
            .ok_or_else(|| anyhow::anyhow!("Malformed reference: {}", s))?;
        if node.is_empty() {
            return Err(anyhow::anyhow!("Malformed reference: {}", s));
        }
        let tweet_id = id
            .parse::<u64>()
            .map_err(|e| anyhow::anyhow!("Malformed reference id in {}: {}", s, e))?;
        Ok(Reference::new(node, tweet_id))
    }
}

impl TryFrom<String> for Reference {
    type Error = anyhow::Error;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<Reference> for String {
    fn from(reference: Reference) -> Self {
        reference.to_string()
    }
}

/// A single tweet, owned by the node that created it.
///
/// An `Original` never carries a `reference`. A `Retweet` is stored with empty content;
/// its content is resolved on read by following `reference`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Tweet {
    pub id: u64,
    #[serde(rename = "type")]
    pub kind: TweetKind,
    #[serde(rename = "tweet", default)]
    pub content: String,
    #[serde(with = "wire_time")]
    pub created_at: DateTime<Utc>,
    #[serde(with = "wire_time")]
    pub modified_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reference: Option<Reference>,
}

impl Tweet {
    pub fn original(id: u64, content: impl Into<String>, at: DateTime<Utc>) -> Self {
        Self {
            id,
            kind: TweetKind::Original,
            content: content.into(),
            created_at: at,
            modified_at: at,
            reference: None,
        }
    }

    pub fn retweet(id: u64, reference: Reference, at: DateTime<Utc>) -> Self {
        Self {
            id,
            kind: TweetKind::Retweet,
            content: String::new(),
            created_at: at,
            modified_at: at,
            reference: Some(reference),
        }
    }

    pub fn is_retweet(&self) -> bool {
        self.kind == TweetKind::Retweet
    }
}

/// Payload for creating or modifying an original tweet: `{"tweet": "..."}`.
#[derive(Debug, Serialize, Deserialize)]
pub struct TweetBody {
    pub tweet: String,
}

/// Payload for creating a retweet: `{"server": "<node>", "id": <id>}`.
#[derive(Debug, Serialize, Deserialize)]
pub struct RetweetBody {
    #[serde(alias = "name")]
    pub server: String,
    pub id: u64,
}

#[derive(Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct TweetStats {
    pub original: u64,
    pub retweets: u64,
    pub total: u64,
}

/// Response of the node index endpoint.
#[derive(Debug, Serialize, Deserialize)]
pub struct NodeIndex {
    pub name: String,
    pub address: String,
    pub stats: TweetStats,
}

/// Wire timestamps: ISO-8601 with microseconds and a trailing `Z`.
pub mod wire_time {
    use super::*;
    use serde::{Deserializer, Serializer};

    pub fn format(at: &DateTime<Utc>) -> String {
        at.format("%Y-%m-%dT%H:%M:%S%.6fZ").to_string()
    }

    /// Accepts RFC 3339 as well as the naive `YYYY-MM-DDTHH:MM:SS[.f][Z]` form.
    pub fn parse(raw: &str) -> Option<DateTime<Utc>> {
        if let Ok(at) = DateTime::parse_from_rfc3339(raw) {
            return Some(at.with_timezone(&Utc));
        }
        let trimmed = raw.trim_end_matches('Z');
        NaiveDateTime::parse_from_str(trimmed, "%Y-%m-%dT%H:%M:%S%.f")
            .ok()
            .map(|naive| naive.and_utc())
    }

    /// Current time truncated to wire precision, so a cursor read back from the wire
    /// compares equal to the stored value.
    pub fn now() -> DateTime<Utc> {
        Utc::now().trunc_subsecs(6)
    }

    pub fn serialize<S>(at: &DateTime<Utc>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&format(at))
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<DateTime<Utc>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let raw = String::deserialize(deserializer)?;
        parse(&raw)
            .ok_or_else(|| serde::de::Error::custom(format!("invalid timestamp: {}", raw)))
    }
}
