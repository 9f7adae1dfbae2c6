//! Durable storage backend on SQLite.
//!
//! Timestamps are stored as microseconds since the Unix epoch so that ordering and range
//! filters stay plain integer comparisons. Every trait operation opens its own
//! transaction: commit on success, rollback (on drop) when the operation returns early.
//!
//! The trait is synchronous and is called from async handlers, so on a multi-threaded
//! runtime each transaction runs under `block_in_place` to keep the worker free for
//! other tasks while SQLite does its I/O.

use super::{Storage, TweetFilter};
use crate::membership::types::Node;
use crate::tweets::types::{Reference, Tweet, TweetKind};

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use rusqlite::{Connection, OptionalExtension, ToSql, Transaction, params};
use std::path::Path;
use std::sync::Mutex;
use tokio::runtime::{Handle, RuntimeFlavor};

const TWEET_COLUMNS: &str = "id, tweet, type, created_at, modified_at, reference";
const NODE_COLUMNS: &str = "name, address, last_checked_at";

const SCHEMA: &str = "
    CREATE TABLE IF NOT EXISTS tweets (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        tweet TEXT NOT NULL DEFAULT '',
        type TEXT NOT NULL DEFAULT 'original',
        created_at INTEGER NOT NULL,
        modified_at INTEGER NOT NULL,
        reference TEXT
    );
    CREATE INDEX IF NOT EXISTS idx_tweets_created_at ON tweets(created_at);
    CREATE TABLE IF NOT EXISTS nodes (
        name TEXT PRIMARY KEY,
        address TEXT NOT NULL,
        last_checked_at INTEGER NOT NULL
    );
";

pub struct SqliteStorage {
    conn: Mutex<Connection>,
}

/// Raw tweet row, converted into a `Tweet` outside of rusqlite's row callback.
struct TweetRow {
    id: i64,
    tweet: String,
    kind: String,
    created_at: i64,
    modified_at: i64,
    reference: Option<String>,
}

impl TweetRow {
    fn read(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            tweet: row.get(1)?,
            kind: row.get(2)?,
            created_at: row.get(3)?,
            modified_at: row.get(4)?,
            reference: row.get(5)?,
        })
    }

    fn into_tweet(self) -> Result<Tweet> {
        let kind: TweetKind = self.kind.parse()?;
        let reference = match (kind, self.reference) {
            (TweetKind::Retweet, Some(raw)) => Some(raw.parse::<Reference>()?),
            (TweetKind::Retweet, None) => {
                return Err(anyhow::anyhow!("Retweet {} has no reference", self.id));
            }
            (TweetKind::Original, _) => None,
        };

        Ok(Tweet {
            id: self.id as u64,
            kind,
            content: self.tweet,
            created_at: from_micros(self.created_at)?,
            modified_at: from_micros(self.modified_at)?,
            reference,
        })
    }
}

struct NodeRow {
    name: String,
    address: String,
    last_checked_at: i64,
}

impl NodeRow {
    fn read(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            name: row.get(0)?,
            address: row.get(1)?,
            last_checked_at: row.get(2)?,
        })
    }

    fn into_node(self) -> Result<Node> {
        Ok(Node {
            name: self.name,
            address: self.address,
            last_checked_at: from_micros(self.last_checked_at)?,
        })
    }
}

fn micros(at: &DateTime<Utc>) -> i64 {
    at.timestamp_micros()
}

fn from_micros(value: i64) -> Result<DateTime<Utc>> {
    DateTime::from_timestamp_micros(value)
        .ok_or_else(|| anyhow::anyhow!("Timestamp out of range: {}", value))
}

/// Runs `f` where blocking is allowed. `block_in_place` is only legal on the
/// multi-threaded runtime; anywhere else `f` runs inline.
fn blocking<T>(f: impl FnOnce() -> T) -> T {
    match Handle::try_current() {
        Ok(handle) if handle.runtime_flavor() == RuntimeFlavor::MultiThread => {
            tokio::task::block_in_place(f)
        }
        _ => f(),
    }
}

impl SqliteStorage {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let conn = Connection::open(path.as_ref())
            .with_context(|| format!("Failed to open database {}", path.as_ref().display()))?;
        Self::with_connection(conn)
    }

    pub fn open_in_memory() -> Result<Self> {
        Self::with_connection(Connection::open_in_memory()?)
    }

    fn with_connection(conn: Connection) -> Result<Self> {
        conn.execute_batch(SCHEMA)
            .context("Failed to initialize schema")?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Runs `op` inside a transaction. The transaction is committed when `op` succeeds
    /// and rolled back when it returns an error.
    fn with_tx<T>(&self, op: impl FnOnce(&Transaction<'_>) -> Result<T>) -> Result<T> {
        blocking(|| {
            let mut conn = self
                .conn
                .lock()
                .map_err(|_| anyhow::anyhow!("Database connection lock poisoned"))?;
            let tx = conn.transaction()?;
            let value = op(&tx)?;
            tx.commit()?;
            Ok(value)
        })
    }

    fn fetch_tweet(tx: &Transaction<'_>, id: i64) -> Result<Option<Tweet>> {
        let row = tx
            .query_row(
                &format!("SELECT {} FROM tweets WHERE id = ?1", TWEET_COLUMNS),
                [id],
                TweetRow::read,
            )
            .optional()?;
        row.map(TweetRow::into_tweet).transpose()
    }

    fn fetch_node(tx: &Transaction<'_>, name: &str) -> Result<Option<Node>> {
        let row = tx
            .query_row(
                &format!("SELECT {} FROM nodes WHERE name = ?1", NODE_COLUMNS),
                [name],
                NodeRow::read,
            )
            .optional()?;
        row.map(NodeRow::into_node).transpose()
    }
}

impl Storage for SqliteStorage {
    fn insert_tweet(&self, content: &str) -> Result<Tweet> {
        self.with_tx(|tx| {
            let now = micros(&Utc::now());
            tx.execute(
                "INSERT INTO tweets (tweet, type, created_at, modified_at) VALUES (?1, 'original', ?2, ?2)",
                params![content, now],
            )?;
            let id = tx.last_insert_rowid();
            Self::fetch_tweet(tx, id)?
                .ok_or_else(|| anyhow::anyhow!("Inserted tweet {} vanished", id))
        })
    }

    fn get_tweet(&self, id: u64) -> Result<Option<Tweet>> {
        self.with_tx(|tx| Self::fetch_tweet(tx, id as i64))
    }

    fn modify_tweet(&self, id: u64, content: &str) -> Result<Option<Tweet>> {
        self.with_tx(|tx| {
            let changed = tx.execute(
                "UPDATE tweets SET tweet = ?1, modified_at = ?2 WHERE id = ?3",
                params![content, micros(&Utc::now()), id as i64],
            )?;
            if changed == 0 {
                return Ok(None);
            }
            Self::fetch_tweet(tx, id as i64)
        })
    }

    fn delete_tweet(&self, id: u64) -> Result<bool> {
        self.with_tx(|tx| {
            let removed = tx.execute("DELETE FROM tweets WHERE id = ?1", [id as i64])?;
            Ok(removed > 0)
        })
    }

    fn create_retweet(&self, origin_node: &str, origin_id: u64) -> Result<Tweet> {
        let reference = Reference::new(origin_node, origin_id).to_string();
        self.with_tx(|tx| {
            let now = micros(&Utc::now());
            tx.execute(
                "INSERT INTO tweets (tweet, type, created_at, modified_at, reference) VALUES ('', 'retweet', ?1, ?1, ?2)",
                params![now, reference],
            )?;
            let id = tx.last_insert_rowid();
            Self::fetch_tweet(tx, id)?
                .ok_or_else(|| anyhow::anyhow!("Inserted retweet {} vanished", id))
        })
    }

    fn search_tweets(&self, filter: &TweetFilter) -> Result<Vec<Tweet>> {
        let mut clauses: Vec<&str> = Vec::new();
        let mut values: Vec<Box<dyn ToSql>> = Vec::new();

        if let Some(content) = &filter.content {
            clauses.push("instr(lower(tweet), lower(?)) > 0");
            values.push(Box::new(content.clone()));
        }
        if let Some(from) = &filter.created_from {
            clauses.push("created_at >= ?");
            values.push(Box::new(micros(from)));
        }
        if let Some(to) = &filter.created_to {
            clauses.push("created_at <= ?");
            values.push(Box::new(micros(to)));
        }
        if let Some(from) = &filter.modified_from {
            clauses.push("modified_at >= ?");
            values.push(Box::new(micros(from)));
        }
        if let Some(to) = &filter.modified_to {
            clauses.push("modified_at <= ?");
            values.push(Box::new(micros(to)));
        }
        if let Some(kind) = filter.kind {
            clauses.push("type = ?");
            values.push(Box::new(kind.as_str()));
        }
        if let Some(after) = &filter.created_after {
            clauses.push("created_at > ?");
            values.push(Box::new(micros(after)));
        }

        let mut sql = format!("SELECT {} FROM tweets", TWEET_COLUMNS);
        if !clauses.is_empty() {
            sql.push_str(" WHERE ");
            sql.push_str(&clauses.join(" AND "));
        }
        sql.push_str(" ORDER BY created_at ASC, id ASC");
        if let Some(limit) = filter.limit {
            sql.push_str(" LIMIT ?");
            values.push(Box::new(limit as i64));
        }

        self.with_tx(|tx| {
            let mut stmt = tx.prepare(&sql)?;
            let bound: Vec<&dyn ToSql> = values.iter().map(|v| v.as_ref()).collect();
            let rows = stmt
                .query_map(bound.as_slice(), TweetRow::read)?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            rows.into_iter().map(TweetRow::into_tweet).collect()
        })
    }

    fn count_tweets(&self, kind: Option<TweetKind>) -> Result<u64> {
        self.with_tx(|tx| {
            let count: i64 = match kind {
                Some(kind) => tx.query_row(
                    "SELECT count(*) FROM tweets WHERE type = ?1",
                    [kind.as_str()],
                    |row| row.get(0),
                )?,
                None => tx.query_row("SELECT count(*) FROM tweets", [], |row| row.get(0))?,
            };
            Ok(count as u64)
        })
    }

    fn all_tweets(&self) -> Result<Vec<Tweet>> {
        self.with_tx(|tx| {
            let mut stmt = tx.prepare(&format!(
                "SELECT {} FROM tweets ORDER BY created_at DESC, id DESC",
                TWEET_COLUMNS
            ))?;
            let rows = stmt
                .query_map([], TweetRow::read)?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            rows.into_iter().map(TweetRow::into_tweet).collect()
        })
    }

    fn all_nodes(&self) -> Result<Vec<Node>> {
        self.with_tx(|tx| {
            let mut stmt = tx.prepare(&format!(
                "SELECT {} FROM nodes ORDER BY last_checked_at",
                NODE_COLUMNS
            ))?;
            let rows = stmt
                .query_map([], NodeRow::read)?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            rows.into_iter().map(NodeRow::into_node).collect()
        })
    }

    fn insert_node(&self, name: &str, address: &str) -> Result<Node> {
        self.with_tx(|tx| {
            tx.execute(
                "INSERT INTO nodes (name, address, last_checked_at) VALUES (?1, ?2, ?3)",
                params![name, address, micros(&Utc::now())],
            )?;
            Self::fetch_node(tx, name)?
                .ok_or_else(|| anyhow::anyhow!("Inserted node {} vanished", name))
        })
    }

    fn get_node(&self, name: &str) -> Result<Option<Node>> {
        self.with_tx(|tx| Self::fetch_node(tx, name))
    }

    fn update_node(&self, name: &str, address: &str) -> Result<Option<Node>> {
        self.with_tx(|tx| {
            let changed = tx.execute(
                "UPDATE nodes SET address = ?1, last_checked_at = ?2 WHERE name = ?3",
                params![address, micros(&Utc::now()), name],
            )?;
            if changed == 0 {
                return Ok(None);
            }
            Self::fetch_node(tx, name)
        })
    }

    fn delete_node(&self, name: &str) -> Result<bool> {
        self.with_tx(|tx| Ok(tx.execute("DELETE FROM nodes WHERE name = ?1", [name])? > 0))
    }

    fn delete_all_nodes(&self) -> Result<bool> {
        self.with_tx(|tx| Ok(tx.execute("DELETE FROM nodes", [])? > 0))
    }

    fn replace_nodes(&self, nodes: &[(String, String)]) -> Result<()> {
        self.with_tx(|tx| {
            tx.execute("DELETE FROM nodes", [])?;
            let now = micros(&Utc::now());
            for (name, address) in nodes {
                tx.execute(
                    "INSERT OR REPLACE INTO nodes (name, address, last_checked_at) VALUES (?1, ?2, ?3)",
                    params![name, address, now],
                )?;
            }
            Ok(())
        })
    }
}
