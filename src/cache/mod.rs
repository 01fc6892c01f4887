//! Caching subsystem.
//!
//! - [`ResultCache`]: bounded TTL cache of read-call results, shared by
//!   every caller of a [`ResilientClient`](crate::ResilientClient) and by
//!   clients built over the same cache handle.
//!
//! Invalidation after a state-mutating call is the caller's job: the layer
//! does not know which reads a write affects.

pub mod result;

pub use result::{CacheConfig, ResultCache, SweeperHandle};
