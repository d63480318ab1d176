//! # Franchise Counter
//!
//! Fixed-window counters shared by every request handler:
//! - `CounterStore` trait with an atomic increment-with-expiry contract
//! - Redis-backed store using a server-side script
//! - In-process fallback store with a background sweep
//! - Failover store that degrades to the fallback when Redis is unreachable
//!
//! ## Example
//!
//! ```rust,ignore
//! use franchise_counter::{CounterStore, FailoverCounterStore, LocalCounterStore, RedisCounterStore};
//!
//! let local = LocalCounterStore::shared();
//! let _sweeper = local.clone().spawn_sweeper(std::time::Duration::from_secs(30));
//!
//! let store = FailoverCounterStore::new(RedisCounterStore::open("redis://127.0.0.1/")?, local);
//! let entry = store.increment("user:42:/orders", std::time::Duration::from_secs(60)).await?;
//! ```

mod error;
mod failover;
mod local;
#[cfg(feature = "redis-store")]
mod remote;
mod store;

pub use error::{StoreError, StoreResult};
pub use failover::FailoverCounterStore;
pub use local::LocalCounterStore;
#[cfg(feature = "redis-store")]
pub use remote::{RedisCounterConfig, RedisCounterStore};
pub use store::{CounterEntry, CounterStore};
