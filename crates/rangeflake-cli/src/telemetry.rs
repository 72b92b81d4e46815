//! Log output for the `rangeflake` binary.
//!
//! Everything goes to stderr so stdout carries nothing but IDs. Verbosity
//! follows `RUST_LOG` and defaults to `info`:
//!
//! ```bash
//! RUST_LOG=rangeflake=debug rangeflake --app-id 3 --start-timestamp 1700000000000
//! ```

use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

pub fn init_telemetry() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(std::io::stderr)
                .with_thread_ids(true)
                .with_line_number(true)
                .with_target(false)
                .with_timer(tracing_subscriber::fmt::time::ChronoLocal::rfc_3339())
                .with_file(true),
        )
        .try_init()?;
    Ok(())
}
