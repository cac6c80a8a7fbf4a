//! Key Pool Module
//!
//! This module owns the upstream API keys: their enabled/disabled status,
//! their per-key counters, and the round-robin rotation that picks a key for
//! each forwarded request.
//!
//! # Features
//! - Blind round-robin rotation that skips disabled keys
//! - Runtime enable/disable/toggle by secret value
//! - Lock-protected value snapshots for dashboards
//!
//! # Example
//! ```
//! use gemini_key_proxy::services::key_pool::KeyPool;
//!
//! let pool = KeyPool::new(["key-one-AAAAA", "key-two-BBBBB"]).unwrap();
//! assert_eq!(pool.select().unwrap().display_id(), "...AAAAA");
//! assert_eq!(pool.select().unwrap().display_id(), "...BBBBB");
//!
//! pool.set_enabled("key-two-BBBBB", false).unwrap();
//! assert_eq!(pool.select().unwrap().display_id(), "...AAAAA");
//! ```

mod credential;
mod cursor;
mod pool;

pub use credential::{ApiKey, KeySnapshot, KeyStatus};
pub use cursor::RoundRobinCursor;
pub use pool::{KeyPool, PoolError, PoolStats};
