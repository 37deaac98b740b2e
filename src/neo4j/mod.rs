//! Neo4j graph store: client, retry policy and wire models

pub mod client;
pub mod models;
pub mod retry;
pub mod traits;

pub use client::Neo4jClient;
pub use retry::{Attempted, RetryPolicy};
pub use traits::GraphStore;

#[cfg(test)]
pub(crate) mod mock;
