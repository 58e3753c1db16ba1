//! A concurrent in-memory cache with hierarchical timer-wheel expiration,
//! single-flight value computation and reload-in-place refresh.
//!
//! # Example
//! ```
//! use lungo::{CacheBuilder, FakeTicker};
//! use std::time::Duration;
//!
//! let ticker = FakeTicker::new();
//! let cache: lungo::Cache<&str, u32> = CacheBuilder::new(100)
//!     .expire_after_write(Duration::from_secs(60))
//!     .ticker(ticker.clone())
//!     .build();
//!
//! cache.put("answer", 42).unwrap();
//! ticker.advance(Duration::from_secs(61));
//! assert!(cache.get_if_present(&"answer").is_none());
//! ```

mod async_cache;
mod buffer;
mod builder;
mod cache;
mod error;
mod executor;
mod future;
mod inspect;
mod loader;
mod metrics;
mod policy;
mod refresh;
mod scheduler;
mod store;
mod sync;
mod ticker;
pub mod expiry;
pub mod listener;
pub mod weigher;

pub use async_cache::{AsyncCache, AsyncLoadingCache};
pub use builder::CacheBuilder;
pub use error::{BoxError, CacheError, SharedError};
pub use executor::{Executor, SameThreadExecutor, Task, ThreadExecutor};
pub use expiry::{Expiry, FixedTti, FixedTtl};
pub use future::{Outcome, ValueFuture};
pub use inspect::Inspector;
pub use listener::{RemovalCause, RemovalListener};
pub use loader::{AsyncCacheLoader, Blocking, CacheLoader, FnLoader};
pub use metrics::stats::Metrics;
pub use refresh::ConsistencyMode;
pub use scheduler::{Cancellable, ScheduledHandle, Scheduler, ThreadScheduler};
pub use sync::{Cache, LoadingCache};
pub use ticker::{FakeTicker, SystemTicker, Ticker};
pub use weigher::Weigher;
