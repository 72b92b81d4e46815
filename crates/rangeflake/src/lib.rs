//! Snowflake-style 64-bit IDs for fleets of hosts that share no coordinator.
//!
//! Each ID packs the milliseconds elapsed since a configured epoch, a worker
//! id, and a per-millisecond sequence:
//!
//! ```text
//! | sign (optional) | timestamp | worker | sequence |
//! ```
//!
//! The worker id comes either from a configured application id or from the
//! host's offset within a declared IPv4 range, so hosts in the range get
//! distinct ids from static configuration alone. A host-local registry file
//! stops two live processes with the same business label from sharing one.
//!
//! ```
//! use rangeflake::{Bootstrap, NoopRegistrar, SnowflakeConfig, SystemClock, TimeSource, WorkerSource};
//!
//! let epoch = SystemClock.current_millis() - 1_000;
//! let config = SnowflakeConfig::new(epoch, WorkerSource::AppId(5));
//! let allocator = Bootstrap::new(config)
//!     .with_registrar(NoopRegistrar)
//!     .lock()
//!     .unwrap();
//!
//! let first = allocator.next_id();
//! let second = allocator.next_id();
//! assert!(first < second);
//! ```

mod allocator;
mod bootstrap;
mod config;
mod error;
mod layout;
mod registry;
mod time;
mod worker;

pub use crate::allocator::*;
pub use crate::bootstrap::*;
pub use crate::config::*;
pub use crate::error::*;
pub use crate::layout::*;
pub use crate::registry::*;
pub use crate::time::*;
pub use crate::worker::*;
