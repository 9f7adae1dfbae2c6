//! Search Module
//!
//! Filtered tweet search on three scopes: this node, one named node, or the whole mesh.
//!
//! ## Behavior
//! - **Fan-out**: mesh searches query every peer's local search concurrently, bounded by a
//!   semaphore, and wait for all of them. A failing peer only costs its own results.
//! - **Merge**: results from all sources are sorted by creation time before being cut
//!   to a page.
//! - **Pagination**: the cursor is the creation time of the last item on a full page;
//!   the next request passes it back as `last_creation_time`.

pub mod aggregator;
pub mod handlers;
pub mod types;
