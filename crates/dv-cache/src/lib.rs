#![forbid(unsafe_code)]

//! Message cache for the Deltaview session core.
//!
//! Large or repeated payloads are sent once; later messages carry only a
//! reference to the payload's hash. [`ForwardMsgCache`] keeps the payloads,
//! ages them by completed script runs, and resolves references, collapsing
//! concurrent misses on one hash into a single fetch.

pub mod cache;
pub mod fetch;

pub use cache::{CacheError, CacheStats, ForwardMsgCache, Resolution};
pub use fetch::{FetchCompletion, FetchError, MessageFetcher, WaiterToken};
