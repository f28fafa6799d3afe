//! Bounded caches shared between workers.
//!
//! * [`LruCache`] / [`Memoized`] - recency ordered memoization of a
//!   deterministic function, used to avoid re-rendering identical responses.
//! * [`BoundedOrderedMap`] - insertion ordered map with FIFO eviction, used
//!   for bounded histories where access recency does not matter.
pub mod lru;
pub mod ordered_map;

pub use lru::{LruCache, Memoized};
pub use ordered_map::BoundedOrderedMap;
