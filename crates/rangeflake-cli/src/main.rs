#![doc = include_str!("../README.md")]

mod config;
mod telemetry;

use std::{
    io::{BufWriter, Write},
    time::Instant,
};

use clap::Parser;
use config::{CliArgs, CliConfig, Mode, Strategy};
use rangeflake::{
    AtomicAllocator, BitLayout, Bootstrap, FileRegistry, HostAddress, IdAllocator, LocalAddress,
    LockAllocator, NoopRegistrar, Registrar, SystemClock,
};
use telemetry::init_telemetry;

#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

fn main() -> anyhow::Result<()> {
    // Load from .env
    let _ = dotenvy::dotenv();
    let args = CliArgs::parse();
    let config = CliConfig::try_from(args)?;

    init_telemetry()?;

    match config.mode {
        Mode::Decode { id } => decode(&config, id),
        Mode::Allocate { count } => allocate(&config, count),
    }
}

/// Prints the fields of `id` under the configured layout. Nothing is
/// registered.
fn decode(config: &CliConfig, id: u64) -> anyhow::Result<()> {
    let snowflake = &config.snowflake;
    let layout = BitLayout::new(
        snowflake.timestamp_bits,
        snowflake.worker_bits,
        snowflake.sequence_bits,
        snowflake.reserve_sign_bit,
    )?;
    let parts = layout.decompose(id);

    let mut out = std::io::stdout().lock();
    writeln!(out, "id          {id}")?;
    writeln!(
        out,
        "unix_millis {}",
        snowflake.start_timestamp.saturating_add(parts.timestamp)
    )?;
    writeln!(out, "elapsed_ms  {}", parts.timestamp)?;
    writeln!(out, "worker_id   {}", parts.worker_id)?;
    writeln!(out, "sequence    {}", parts.sequence)?;
    Ok(())
}

fn allocate(config: &CliConfig, count: usize) -> anyhow::Result<()> {
    let host = HostAddress::default();
    let local: &dyn LocalAddress = match &config.local_ip {
        Some(ip) => ip,
        None => &host,
    };
    let registry = FileRegistry::new(config.snowflake.registry_path.clone());
    let registrar: &dyn Registrar = if config.register {
        &registry
    } else {
        &NoopRegistrar
    };

    let bootstrap = Bootstrap::new(config.snowflake.clone())
        .with_local_address(local)
        .with_registrar(registrar);

    match config.strategy {
        Strategy::Lock => emit::<LockAllocator<SystemClock>>(bootstrap.build()?, count),
        Strategy::Atomic => emit::<AtomicAllocator<SystemClock>>(bootstrap.build()?, count),
    }
}

fn emit<A: IdAllocator<SystemClock>>(allocator: A, count: usize) -> anyhow::Result<()> {
    let start = Instant::now();
    let mut out = BufWriter::new(std::io::stdout().lock());
    for _ in 0..count {
        writeln!(out, "{}", allocator.next_id())?;
    }
    out.flush()?;

    tracing::debug!(
        count,
        worker_id = %allocator.worker_id(),
        elapsed_us = start.elapsed().as_micros() as u64,
        "allocated ids"
    );
    Ok(())
}
