use tracing::instrument;

use crate::{
    allocator::{AtomicAllocator, IdAllocator, LockAllocator},
    config::SnowflakeConfig,
    error::{ConfigurationError, RegistrationError, Result},
    layout::BitLayout,
    registry::{FileRegistry, Registrar},
    time::{SystemClock, TimeSource},
    worker::{HostAddress, LocalAddress},
};

/// Remaining timestamp budget below which construction logs a warning.
pub const EXHAUSTION_WARNING_MILLIS: u64 = 2 * 12 * 365 * 24 * 60 * 60 * 1000;

/// Validates a [`SnowflakeConfig`] against this host and builds an
/// allocator from it.
///
/// Construction runs, in order: the bit-layout check, worker id resolution,
/// the start-timestamp check, and finally business-label registration. The
/// registry is only written once everything else has passed, so a rejected
/// configuration never leaves a claim behind.
///
/// The host-facing pieces (clock, local address, registrar, process id) are
/// replaceable, which is how tests run without a network or a shared file.
///
/// # Example
///
/// ```
/// use std::net::Ipv4Addr;
/// use rangeflake::{
///     AddressRange, Bootstrap, IdAllocator, LockAllocator, NoopRegistrar, SnowflakeConfig,
///     SystemClock, TimeSource, WorkerSource,
/// };
///
/// let range: AddressRange = "192.168.0.1-192.168.0.100".parse().unwrap();
/// let epoch = SystemClock.current_millis() - 60_000;
/// let config = SnowflakeConfig::new(epoch, WorkerSource::Range(range));
///
/// let allocator: LockAllocator<_> = Bootstrap::new(config)
///     .with_local_address(Ipv4Addr::new(192, 168, 0, 50))
///     .with_registrar(NoopRegistrar)
///     .build()
///     .unwrap();
/// assert_eq!(allocator.worker_id().get(), 49);
/// ```
#[derive(Debug)]
pub struct Bootstrap<T = SystemClock, L = HostAddress, R = FileRegistry> {
    config: SnowflakeConfig,
    time: T,
    local: L,
    registrar: R,
    process_id: u32,
}

impl Bootstrap {
    /// Uses the system clock, the host's routed IPv4 address, and a
    /// [`FileRegistry`] at the configured path.
    pub fn new(config: SnowflakeConfig) -> Self {
        let registrar = FileRegistry::new(config.registry_path.clone());
        Self {
            config,
            time: SystemClock,
            local: HostAddress::default(),
            registrar,
            process_id: std::process::id(),
        }
    }
}

impl<T, L, R> Bootstrap<T, L, R>
where
    T: TimeSource,
    L: LocalAddress,
    R: Registrar,
{
    pub fn config(&self) -> &SnowflakeConfig {
        &self.config
    }

    pub fn with_time<U: TimeSource>(self, time: U) -> Bootstrap<U, L, R> {
        Bootstrap {
            config: self.config,
            time,
            local: self.local,
            registrar: self.registrar,
            process_id: self.process_id,
        }
    }

    pub fn with_local_address<M: LocalAddress>(self, local: M) -> Bootstrap<T, M, R> {
        Bootstrap {
            config: self.config,
            time: self.time,
            local,
            registrar: self.registrar,
            process_id: self.process_id,
        }
    }

    pub fn with_registrar<S: Registrar>(self, registrar: S) -> Bootstrap<T, L, S> {
        Bootstrap {
            config: self.config,
            time: self.time,
            local: self.local,
            registrar,
            process_id: self.process_id,
        }
    }

    /// Overrides the pid recorded in the registry.
    #[must_use]
    pub fn with_process_id(mut self, process_id: u32) -> Self {
        self.process_id = process_id;
        self
    }

    /// Runs every construction check and returns a ready allocator.
    ///
    /// # Errors
    ///
    /// - [`ConfigurationError`] for an empty or multi-word business label, bad widths, an unresolvable or
    ///   out-of-range worker id, or an exhausted or future epoch
    /// - [`RegistrationError`] if a live process already holds the business
    ///   label, or the registry cannot be read or written
    #[instrument(
        level = "debug",
        skip_all,
        fields(business_type = %self.config.business_type),
        err
    )]
    pub fn build<A: IdAllocator<T>>(self) -> Result<A> {
        let config = &self.config;
        check_business_type(&config.business_type)?;
        let layout = BitLayout::new(
            config.timestamp_bits,
            config.worker_bits,
            config.sequence_bits,
            config.reserve_sign_bit,
        )?;
        let worker_id = config.worker.resolve(&layout, &self.local)?;
        tracing::debug!(?layout, %worker_id, "resolved worker id");

        check_start_timestamp(&layout, config.start_timestamp, self.time.current_millis())?;

        if let Some(pid) = self.registrar.holder(&config.business_type)? {
            return Err(RegistrationError::Claimed {
                label: config.business_type.clone(),
                pid,
            }
            .into());
        }
        self.registrar
            .claim(&config.business_type, self.process_id)?;
        tracing::info!(pid = self.process_id, %worker_id, "registered business label");

        Ok(A::new(layout, worker_id, config.start_timestamp, self.time))
    }

    /// [`build`](Self::build) a [`LockAllocator`].
    ///
    /// # Errors
    ///
    /// See [`build`](Self::build).
    pub fn lock(self) -> Result<LockAllocator<T>> {
        self.build()
    }

    /// [`build`](Self::build) an [`AtomicAllocator`].
    ///
    /// # Errors
    ///
    /// See [`build`](Self::build).
    pub fn atomic(self) -> Result<AtomicAllocator<T>> {
        self.build()
    }
}

/// Registry lines are `<label> <pid>`, so a label must be a single
/// non-empty word to be found again.
fn check_business_type(label: &str) -> Result<(), ConfigurationError> {
    if label.is_empty() || label.contains(char::is_whitespace) {
        return Err(ConfigurationError::InvalidValue {
            key: "businessType",
            value: label.to_owned(),
        });
    }
    Ok(())
}

/// Checks that the time elapsed since `epoch` fits the timestamp field.
///
/// Logs a warning when fewer than [`EXHAUSTION_WARNING_MILLIS`] remain.
///
/// # Errors
///
/// - [`ConfigurationError::EpochInFuture`] if `epoch > now`
/// - [`ConfigurationError::TimestampExhausted`] if the elapsed time no longer
///   fits in `timestamp_bits`
pub fn check_start_timestamp(
    layout: &BitLayout,
    epoch: u64,
    now: u64,
) -> Result<(), ConfigurationError> {
    let elapsed = now
        .checked_sub(epoch)
        .ok_or(ConfigurationError::EpochInFuture { epoch, now })?;
    let bits = layout.timestamp_bits();

    if !BitLayout::fits(elapsed, bits) {
        return Err(ConfigurationError::TimestampExhausted {
            elapsed,
            timestamp_bits: bits,
        });
    }
    if !BitLayout::fits(elapsed.saturating_add(EXHAUSTION_WARNING_MILLIS), bits) {
        tracing::warn!(
            elapsed,
            timestamp_bits = bits,
            remaining_ms = layout.max_timestamp() - elapsed,
            "timestamp bits are close to exhaustion"
        );
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        Error, NoopRegistrar, ProcessTable, WorkerSource,
        worker::AddressRange,
    };
    use parking_lot::Mutex;
    use std::{
        collections::HashSet,
        net::Ipv4Addr,
        sync::{
            Arc,
            atomic::{AtomicUsize, Ordering},
        },
    };
    use tracing_subscriber::{
        Layer,
        layer::{Context, SubscriberExt},
    };

    const NOW: u64 = 1_700_000_000_000;
    const EPOCH: u64 = NOW - 86_400_000;

    struct FixedTime(u64);
    impl TimeSource for FixedTime {
        fn current_millis(&self) -> u64 {
            self.0
        }
    }

    #[derive(Default)]
    struct MockProcesses(Mutex<HashSet<u32>>);
    impl ProcessTable for MockProcesses {
        fn is_alive(&self, pid: u32) -> bool {
            self.0.lock().contains(&pid)
        }
    }

    fn app(id: u64) -> SnowflakeConfig {
        SnowflakeConfig::new(EPOCH, WorkerSource::AppId(id))
    }

    fn bootstrap(config: SnowflakeConfig) -> Bootstrap<FixedTime, Ipv4Addr, NoopRegistrar> {
        Bootstrap::new(config)
            .with_time(FixedTime(NOW))
            .with_local_address(Ipv4Addr::new(192, 168, 0, 50))
            .with_registrar(NoopRegistrar)
    }

    #[test]
    fn explicit_app_id_builds() {
        let allocator = bootstrap(app(5)).lock().unwrap();
        assert_eq!(allocator.worker_id().get(), 5);
        assert_eq!(allocator.epoch(), EPOCH);
    }

    #[test]
    fn range_resolves_worker_from_local_address() {
        let range: AddressRange = "192.168.0.1-192.168.0.100".parse().unwrap();
        let config = SnowflakeConfig::new(EPOCH, WorkerSource::Range(range));
        let allocator = bootstrap(config).atomic().unwrap();
        assert_eq!(allocator.worker_id().get(), 49);
    }

    #[test]
    fn bad_widths_fail_construction() {
        let err = bootstrap(app(5).with_bits(41, 10, 13)).lock().unwrap_err();
        assert!(matches!(
            err,
            Error::Configuration(ConfigurationError::BitSum { expected: 63, actual: 64 })
        ));

        let ok = bootstrap(app(5).with_bits(41, 10, 13).with_reserve_sign_bit(false)).lock();
        assert!(ok.is_ok());
    }

    #[test]
    fn zero_app_id_fails_construction() {
        let err = bootstrap(app(0)).lock().unwrap_err();
        assert!(matches!(err, Error::Configuration(ConfigurationError::ZeroAppId)));
    }

    #[test]
    fn exhausted_timestamp_fails_construction() {
        let err = bootstrap(app(5).with_bits(20, 21, 22)).lock().unwrap_err();
        assert!(matches!(
            err,
            Error::Configuration(ConfigurationError::TimestampExhausted { timestamp_bits: 20, .. })
        ));
    }

    #[test]
    fn future_epoch_fails_construction() {
        let config = SnowflakeConfig::new(NOW + 1, WorkerSource::AppId(1));
        let err = bootstrap(config).lock().unwrap_err();
        assert!(matches!(err, Error::Configuration(ConfigurationError::EpochInFuture { .. })));
    }

    /// Counts WARN events seen while installed.
    #[derive(Clone, Default)]
    struct WarnCounter(Arc<AtomicUsize>);

    impl<S: tracing::Subscriber> Layer<S> for WarnCounter {
        fn on_event(&self, event: &tracing::Event<'_>, _ctx: Context<'_, S>) {
            if *event.metadata().level() == tracing::Level::WARN {
                self.0.fetch_add(1, Ordering::SeqCst);
            }
        }
    }

    fn warnings_during(f: impl FnOnce()) -> usize {
        let counter = WarnCounter::default();
        let subscriber = tracing_subscriber::registry().with(counter.clone());
        tracing::subscriber::with_default(subscriber, f);
        counter.0.load(Ordering::SeqCst)
    }

    #[test]
    fn nearly_exhausted_timestamp_warns() {
        let layout = BitLayout::default();
        // 1970 epoch: fits 41 bits today, but not 24 years from now.
        let warnings = warnings_during(|| {
            assert!(check_start_timestamp(&layout, 0, NOW).is_ok());
        });
        assert_eq!(warnings, 1);

        let warnings = warnings_during(|| {
            assert!(check_start_timestamp(&layout, EPOCH, NOW).is_ok());
        });
        assert_eq!(warnings, 0);
    }

    #[test]
    fn exhausted_timestamp_is_fatal() {
        let layout = BitLayout::default();
        let err = check_start_timestamp(&layout, 0, layout.max_timestamp() + 1).unwrap_err();
        assert!(matches!(err, ConfigurationError::TimestampExhausted { .. }));
    }

    #[test]
    fn unregistrable_business_types_are_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ids.txt");
        let processes = MockProcesses::default();
        processes.0.lock().extend([100, 200]);
        let registry = FileRegistry::with_processes(&path, &processes);

        for label in ["", "order service", "orders\t", " "] {
            let err = bootstrap(app(1).with_business_type(label))
                .with_registrar(&registry)
                .with_process_id(100)
                .lock()
                .unwrap_err();
            assert!(
                matches!(
                    err,
                    Error::Configuration(ConfigurationError::InvalidValue { key: "businessType", .. })
                ),
                "{label:?}: {err:?}"
            );
        }
        assert!(!path.exists());
    }

    #[test]
    fn second_live_instance_sees_first_claim_on_disk() {
        let dir = tempfile::tempdir().unwrap();
        let processes = MockProcesses::default();
        processes.0.lock().extend([100, 200]);
        let registry = FileRegistry::with_processes(dir.path().join("ids.txt"), &processes);

        let first = bootstrap(app(1).with_business_type("order-service"))
            .with_registrar(&registry)
            .with_process_id(100)
            .atomic();
        assert!(first.is_ok());

        let second = bootstrap(app(2).with_business_type("order-service"))
            .with_registrar(&registry)
            .with_process_id(200)
            .atomic();
        assert!(matches!(
            second,
            Err(Error::Registration(RegistrationError::Claimed { pid: 100, .. }))
        ));
    }

    #[test]
    fn live_holder_blocks_second_instance() {
        let dir = tempfile::tempdir().unwrap();
        let processes = MockProcesses::default();
        let registry = FileRegistry::with_processes(dir.path().join("ids.txt"), &processes);

        processes.0.lock().insert(100);
        let first = bootstrap(app(1).with_business_type("orders"))
            .with_registrar(&registry)
            .with_process_id(100)
            .lock();
        assert!(first.is_ok());

        processes.0.lock().insert(200);
        let err = bootstrap(app(2).with_business_type("orders"))
            .with_registrar(&registry)
            .with_process_id(200)
            .lock()
            .unwrap_err();
        assert!(matches!(
            err,
            Error::Registration(RegistrationError::Claimed { ref label, pid: 100 }) if label == "orders"
        ));

        // Another label is unaffected.
        let other = bootstrap(app(3).with_business_type("payments"))
            .with_registrar(&registry)
            .with_process_id(200)
            .lock();
        assert!(other.is_ok());

        // Once the holder exits, its line is stale.
        processes.0.lock().remove(&100);
        let retry = bootstrap(app(2).with_business_type("orders"))
            .with_registrar(&registry)
            .with_process_id(200)
            .lock();
        assert!(retry.is_ok());
    }

    #[test]
    fn rejected_config_leaves_registry_untouched() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ids.txt");
        let registry = FileRegistry::with_processes(&path, MockProcesses::default());

        let err = bootstrap(app(0)).with_registrar(&registry).lock();
        assert!(err.is_err());
        assert!(!path.exists());
    }
}
