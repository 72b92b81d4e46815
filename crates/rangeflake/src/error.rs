//! Error types for allocator construction.
//!
//! Every error in this crate is raised while an allocator is being built.
//! Once construction succeeds, [`IdAllocator::next_id`] has no failure mode:
//! clock rollbacks and per-millisecond exhaustion are absorbed by spinning.
//!
//! [`IdAllocator::next_id`]: crate::IdAllocator::next_id

use std::{net::Ipv4Addr, path::PathBuf};

/// A result type defaulting to the crate-wide [`Error`].
pub type Result<T, E = Error> = core::result::Result<T, E>;

/// All errors `rangeflake` can produce.
#[derive(thiserror::Error, Debug)]
#[non_exhaustive]
pub enum Error {
    /// The configuration is malformed or cannot be satisfied on this host.
    #[error(transparent)]
    Configuration(#[from] ConfigurationError),

    /// The business label could not be registered for this process.
    #[error(transparent)]
    Registration(#[from] RegistrationError),
}

/// Invalid or unsatisfiable configuration. Always fatal and never retried.
#[derive(thiserror::Error, Debug)]
#[non_exhaustive]
pub enum ConfigurationError {
    /// Bit widths must cover the whole ID (63 bits with the sign bit
    /// reserved, 64 without).
    #[error("bit widths sum to {actual}, expected {expected}")]
    BitSum { expected: u64, actual: u64 },

    #[error("address range {start}-{end} must run from low to high")]
    ReversedRange { start: Ipv4Addr, end: Ipv4Addr },

    /// The range holds more addresses than the worker field can encode.
    #[error("address range of {size} addresses exceeds {worker_bits} worker bits")]
    RangeTooLarge { size: u64, worker_bits: u32 },

    #[error("local address {address} is outside {start}-{end}")]
    AddressOutOfRange {
        address: Ipv4Addr,
        start: Ipv4Addr,
        end: Ipv4Addr,
    },

    #[error("could not resolve a local IPv4 address")]
    UnresolvedLocalAddress,

    /// An explicit application id of zero is indistinguishable from "unset".
    #[error("appId must be greater than 0")]
    ZeroAppId,

    #[error("worker id {worker_id} does not fit in {worker_bits} worker bits")]
    WorkerIdOverflow { worker_id: u64, worker_bits: u32 },

    #[error("missing required field `{0}`")]
    MissingField(&'static str),

    #[error("invalid value {value:?} for `{key}`")]
    InvalidValue { key: &'static str, value: String },

    #[error("address range {0:?} must look like 192.168.0.1-192.168.0.100")]
    MalformedRange(String),

    #[error("appId and ipRanges are mutually exclusive")]
    ConflictingWorkerSource,

    /// The time elapsed since the epoch already overflows the timestamp field.
    #[error("{elapsed}ms since the epoch exceeds {timestamp_bits} timestamp bits")]
    TimestampExhausted { elapsed: u64, timestamp_bits: u32 },

    #[error("epoch {epoch}ms is ahead of the current time {now}ms")]
    EpochInFuture { epoch: u64, now: u64 },

    #[error("failed to load properties from {path:?}: {source}")]
    Load {
        path: PathBuf,
        #[source]
        source: dotenvy::Error,
    },
}

/// Failure to claim a business label in the instance registry.
#[derive(thiserror::Error, Debug)]
#[non_exhaustive]
pub enum RegistrationError {
    /// Another live process already holds the label on this host.
    #[error("{label} is used by process {pid}")]
    Claimed { label: String, pid: u32 },

    #[error("registry file I/O failed: {0}")]
    Io(#[from] std::io::Error),
}
