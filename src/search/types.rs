use crate::error::{ApiError, ApiResult};
use crate::storage::TweetFilter;
use crate::tweets::types::{Tweet, TweetKind, wire_time};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Where a search runs.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum SearchScope {
    /// This node only.
    #[default]
    Local,
    /// Delegated entirely to one named node (which may be this node).
    Node(String),
    /// This node plus every known peer.
    Mesh,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct SearchCriteria {
    pub content: Option<String>,
    pub created_from: Option<DateTime<Utc>>,
    pub created_to: Option<DateTime<Utc>>,
    pub modified_from: Option<DateTime<Utc>>,
    pub modified_to: Option<DateTime<Utc>>,
    /// `Some(true)`: retweets only, `Some(false)`: originals only, `None`: both.
    pub retweet: Option<bool>,
    pub scope: SearchScope,
    pub per_page: Option<usize>,
    /// Pagination cursor: only tweets created strictly after this instant.
    pub last_creation_time: Option<DateTime<Utc>>,
}

impl SearchCriteria {
    pub fn wants(&self, kind: TweetKind) -> bool {
        match self.retweet {
            None => true,
            Some(true) => kind == TweetKind::Retweet,
            Some(false) => kind == TweetKind::Original,
        }
    }

    /// Storage filter for one kind. Retweet content is only known after resolution,
    /// so the content filter is dropped for retweets and applied by the caller.
    pub fn storage_filter(&self, kind: TweetKind) -> TweetFilter {
        TweetFilter {
            content: match kind {
                TweetKind::Original => self.content.clone(),
                TweetKind::Retweet => None,
            },
            created_from: self.created_from,
            created_to: self.created_to,
            modified_from: self.modified_from,
            modified_to: self.modified_to,
            kind: Some(kind),
            created_after: self.last_creation_time,
            limit: self.per_page,
        }
    }
}

/// Result of one search: items sorted by creation time plus the continuation cursor.
#[derive(Debug, Clone, PartialEq)]
pub struct SearchPage {
    pub items: Vec<Tweet>,
    /// `None` means there are no more pages.
    pub cursor: Option<DateTime<Utc>>,
}

/// Wire form of [`SearchPage`]. `last_creation_time` is `"0"` when there are no more pages.
#[derive(Debug, Serialize, Deserialize)]
pub struct SearchPageBody {
    pub items: Vec<Tweet>,
    pub last_creation_time: String,
}

pub const NO_MORE_PAGES: &str = "0";

impl From<SearchPage> for SearchPageBody {
    fn from(page: SearchPage) -> Self {
        Self {
            items: page.items,
            last_creation_time: page
                .cursor
                .map(|at| wire_time::format(&at))
                .unwrap_or_else(|| NO_MORE_PAGES.to_string()),
        }
    }
}

/// Query string of the search endpoints.
///
/// Everything is kept as raw strings so malformed values surface as `BadRequest`
/// in the taxonomy instead of an extractor rejection. Time filters are Unix epoch seconds.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SearchQuery {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_from: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_to: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub modified_from: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub modified_to: Option<String>,
    #[serde(default, alias = "retweets", skip_serializing_if = "Option::is_none")]
    pub retweet: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub all: Option<String>,
    /// Target node for the mesh search endpoint.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub per_page: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_creation_time: Option<String>,
}

impl SearchQuery {
    /// Query sent to a peer's search-local endpoint: same filters, never fanned out again.
    pub fn for_peer(criteria: &SearchCriteria) -> Self {
        let epoch = |at: &Option<DateTime<Utc>>| at.as_ref().map(format_epoch);
        Self {
            content: criteria.content.clone(),
            created_from: epoch(&criteria.created_from),
            created_to: epoch(&criteria.created_to),
            modified_from: epoch(&criteria.modified_from),
            modified_to: epoch(&criteria.modified_to),
            retweet: criteria.retweet.map(|r| r.to_string()),
            all: Some("false".to_string()),
            name: None,
            per_page: criteria.per_page.map(|n| n.to_string()),
            last_creation_time: criteria.last_creation_time.map(|at| wire_time::format(&at)),
        }
    }

    /// Criteria for the search-local endpoint: `all=true` widens the scope to the mesh.
    pub fn local_criteria(&self) -> ApiResult<SearchCriteria> {
        let mut criteria = self.filters()?;
        if parse_bool(self.all.as_deref()) == Some(true) {
            criteria.scope = SearchScope::Mesh;
        }
        Ok(criteria)
    }

    /// Criteria for the mesh search endpoint: `name` picks one node, otherwise the whole mesh.
    pub fn mesh_criteria(&self) -> ApiResult<SearchCriteria> {
        let mut criteria = self.filters()?;
        criteria.scope = match non_empty(self.name.as_deref()) {
            Some(name) => SearchScope::Node(name.to_string()),
            None => SearchScope::Mesh,
        };
        Ok(criteria)
    }

    fn filters(&self) -> ApiResult<SearchCriteria> {
        let per_page = match non_empty(self.per_page.as_deref()) {
            Some(raw) => {
                let n: usize = raw
                    .parse()
                    .map_err(|_| ApiError::BadRequest(format!("Expected integer, got: {}", raw)))?;
                if n == 0 {
                    return Err(ApiError::BadRequest("per_page must be positive".to_string()));
                }
                Some(n)
            }
            None => None,
        };

        Ok(SearchCriteria {
            content: non_empty(self.content.as_deref()).map(str::to_string),
            created_from: parse_epoch(self.created_from.as_deref())?,
            created_to: parse_epoch(self.created_to.as_deref())?,
            modified_from: parse_epoch(self.modified_from.as_deref())?,
            modified_to: parse_epoch(self.modified_to.as_deref())?,
            retweet: parse_bool(self.retweet.as_deref()),
            scope: SearchScope::Local,
            per_page,
            last_creation_time: parse_cursor(self.last_creation_time.as_deref())?,
        })
    }
}

fn non_empty(raw: Option<&str>) -> Option<&str> {
    raw.map(str::trim).filter(|v| !v.is_empty())
}

/// `"true"` (any case) is true, any other non-empty value is false.
pub fn parse_bool(raw: Option<&str>) -> Option<bool> {
    non_empty(raw).map(|v| v.eq_ignore_ascii_case("true"))
}

/// Unix epoch seconds, integer or fractional.
pub fn parse_epoch(raw: Option<&str>) -> ApiResult<Option<DateTime<Utc>>> {
    let Some(raw) = non_empty(raw) else {
        return Ok(None);
    };
    let secs: f64 = raw
        .parse()
        .ok()
        .filter(|secs: &f64| secs.is_finite())
        .ok_or_else(|| ApiError::BadRequest(format!("Expected integer, got: {}", raw)))?;
    let at = DateTime::from_timestamp_micros((secs * 1_000_000.0).round() as i64)
        .ok_or_else(|| ApiError::BadRequest(format!("Unable to convert {} to datetime.", raw)))?;
    Ok(Some(at))
}

/// Epoch seconds with microsecond digits, the inverse of [`parse_epoch`].
pub fn format_epoch(at: &DateTime<Utc>) -> String {
    let micros = at.timestamp_micros();
    let sign = if micros < 0 { "-" } else { "" };
    let abs = micros.unsigned_abs();
    format!("{}{}.{:06}", sign, abs / 1_000_000, abs % 1_000_000)
}

/// Pagination cursor: `"0"`/empty means "from the beginning"; otherwise a wire timestamp
/// or epoch seconds.
pub fn parse_cursor(raw: Option<&str>) -> ApiResult<Option<DateTime<Utc>>> {
    match non_empty(raw) {
        None | Some(NO_MORE_PAGES) => Ok(None),
        Some(value) => match wire_time::parse(value) {
            Some(at) => Ok(Some(at)),
            None => parse_epoch(Some(value)),
        },
    }
}
