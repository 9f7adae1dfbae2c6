//! Membership Module
//!
//! Who is in the mesh, as seen from this node.
//!
//! ## Core Mechanisms
//! - **Registry**: peer name to address mapping kept in storage. Names are unique unless a
//!   registration explicitly forces an overwrite.
//! - **Eviction**: every peer gets a cached `RemoteClient` whose cleanup callback removes the
//!   peer once it stays unreachable through all retries.
//! - **Join**: a node started with a bootstrap peer registers there, adopts the returned
//!   membership and announces itself to the rest of the mesh. Joining happens at most once.
//! - **Leave**: on shutdown every known peer is told to forget this node, best effort.

pub mod handlers;
pub mod join;
pub mod registry;
pub mod types;

#[cfg(test)]
mod tests;
