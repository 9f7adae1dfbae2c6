//! Remote Node Client
//!
//! Outbound side of the mesh: a typed HTTP client for one peer.
//!
//! ## Failure Handling
//! - **Retries**: connection errors, timeouts and 502/503/504 answers are retried with
//!   exponential backoff and a little jitter.
//! - **Eviction hook**: when a peer stays unreachable, the client fires a cleanup callback
//!   (the registry uses it to forget the peer) and reports `BadGateway`.
//! - **Status mapping**: any other non-success answer becomes the matching `ApiError`.

pub mod protocol;
pub mod remote;
