//! Tweets Module
//!
//! Tweets owned by this node and the machinery to display retweets.
//!
//! ## Components
//! - **`types`**: the `Tweet` record shared by storage and the wire, references and timestamps.
//! - **`service`**: CRUD on originals, retweet creation, per-kind statistics.
//! - **`resolver`**: follows retweet references, locally or across peers, to the original
//!   content. Cycles and over-long chains are detected and reported as failures, which
//!   readers turn into empty content.

pub mod handlers;
pub mod resolver;
pub mod service;
pub mod types;
