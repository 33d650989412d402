//! Filesystem-backed cache with checksummed, expiring entry files
//!
//! Each cache key maps to one file in a flat directory. The file starts with
//! a fixed header (signature, expiration timestamp, SHA-1 of the payload)
//! followed by the payload itself:
//! - [`Entry`] reads and writes the header fields and streams the payload,
//!   verifying its checksum on every full read
//! - [`Item`] is one key's handle onto its entry file, with a lock and typed
//!   errors
//! - [`Pool`] hands out items for a directory and provides existence checks,
//!   deletion and clearing
//!
//! Expired entries are evicted lazily when they are looked up; there is no
//! background cleanup and no size bound.
//!
//! # Example
//!
//! ```no_run
//! use chrono::{TimeDelta, Utc};
//! use filecache::Pool;
//!
//! let pool = Pool::builder()
//!     .dir("/tmp/my-cache")
//!     .create_dir(true)
//!     .build()?;
//!
//! pool.put("foo", &b"foo data"[..], Utc::now() + TimeDelta::seconds(10))?;
//!
//! let mut value = Vec::new();
//! pool.get("foo", &mut value)?;
//! assert_eq!(value, b"foo data");
//! # Ok::<(), filecache::Error>(())
//! ```

#![allow(clippy::missing_errors_doc)]

mod config;
pub mod entry;
mod error;
mod item;
pub mod key;
mod lock;
mod pool;

// Re-export error types at crate root
pub use error::{Error, Result};

// Re-export main types
pub use config::{CACHE_DIR_ENV, PoolBuilder, default_cache_dir};
pub use entry::{Entry, OpenMode, Signature};
pub use item::Item;
pub use pool::Pool;
